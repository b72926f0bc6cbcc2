//! Balanced-allocation calculator.
//!
//! Locked entries keep their value; the share left over (`100 - locked`) is
//! split evenly across the unlocked entries. Work happens in hundredths so the
//! split is exact at 2 decimal places: the cents that do not divide evenly go
//! to the last unlocked entries in key order, which is how three open
//! categories land on 33.33 / 33.33 / 33.34.

use std::collections::BTreeMap;

use shared::domain::{clamp_allocation, AllocationEntry, ALLOCATION_EPSILON, MAX_ALLOCATION};

const CENTS: f64 = 100.0;

pub fn rebalance<K: Ord + Clone>(
    entries: &BTreeMap<K, AllocationEntry>,
) -> BTreeMap<K, AllocationEntry> {
    let locked_total: f64 = entries
        .values()
        .filter(|entry| entry.locked)
        .map(|entry| entry.allocation)
        .sum();
    let unlocked: Vec<&K> = entries
        .iter()
        .filter(|(_, entry)| !entry.locked)
        .map(|(key, _)| key)
        .collect();

    let mut balanced = entries.clone();
    if unlocked.is_empty() {
        return balanced;
    }

    // Locked entries above 100 leave a negative remainder; the unlocked ones are
    // pinned to 0 and the total stays above 100.
    let remaining_cents = ((MAX_ALLOCATION - locked_total) * CENTS).round().max(0.0) as i64;
    let count = unlocked.len() as i64;
    let share = remaining_cents / count;
    let leftover = remaining_cents % count;

    for (index, key) in unlocked.into_iter().enumerate() {
        let extra = i64::from((index as i64) >= count - leftover);
        let allocation = clamp_allocation((share + extra) as f64 / CENTS);
        if let Some(entry) = balanced.get_mut(key) {
            entry.allocation = allocation;
        }
    }

    balanced
}

pub fn total<K>(entries: &BTreeMap<K, AllocationEntry>) -> f64 {
    entries.values().map(|entry| entry.allocation).sum()
}

pub fn is_balanced<K>(entries: &BTreeMap<K, AllocationEntry>) -> bool {
    entries.is_empty() || (total(entries) - MAX_ALLOCATION).abs() <= ALLOCATION_EPSILON
}

#[cfg(test)]
#[path = "tests/rebalance_tests.rs"]
mod tests;
