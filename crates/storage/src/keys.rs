//! Key layout of the local store. Keys are scoped by wallet so several voters
//! can share a device.

use shared::domain::{CategoryId, WalletAddress};

pub fn distribution_method(address: &WalletAddress) -> String {
    format!("distributionMethod_{address}")
}

pub fn ballot_unlocked(address: &WalletAddress) -> String {
    format!("ballot_unlocked_{address}")
}

pub fn unlock_dialog_shown(address: &WalletAddress) -> String {
    format!("unlock_dialog_shown_{address}")
}

pub fn skipped_projects(category: &CategoryId, address: &WalletAddress) -> String {
    format!("skipped_projects_{category}_{address}")
}
