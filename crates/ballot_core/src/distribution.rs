//! Distribution-method state machine.
//!
//! `None` means no method chosen yet. Allocation edits move the ballot to
//! `Custom`; ranking methods are only entered through a confirmed change,
//! which asks the server to recompute allocations from positions. The method
//! lives both in the local store (read first) and on the remote ballot
//! (authoritative).

use std::sync::Arc;

use anyhow::Result;
use shared::{
    domain::{DistributionMethod, WalletAddress},
    protocol::Ballot,
};
use storage::{keys, LocalStore};
use tracing::{info, warn};

use crate::{
    api::BallotApi,
    events::{report_persist_failure, BallotEvent, EventSender},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodSync {
    InSync,
    Refetch,
}

/// A method change waiting for the user to confirm that customizations are lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingMethodChange {
    pub method: DistributionMethod,
    pub discards_custom_allocations: bool,
}

pub struct DistributionOrchestrator {
    method: Option<DistributionMethod>,
    address: WalletAddress,
    api: Arc<dyn BallotApi>,
    store: Arc<dyn LocalStore>,
    events: EventSender,
}

impl DistributionOrchestrator {
    pub fn new(
        address: WalletAddress,
        api: Arc<dyn BallotApi>,
        store: Arc<dyn LocalStore>,
        events: EventSender,
    ) -> Self {
        Self {
            method: None,
            address,
            api,
            store,
            events,
        }
    }

    pub fn method(&self) -> Option<DistributionMethod> {
        self.method
    }

    pub fn is_movable(&self) -> bool {
        self.method.is_some_and(DistributionMethod::is_movable)
    }

    pub async fn load(&mut self) -> Result<Option<DistributionMethod>> {
        let key = keys::distribution_method(&self.address);
        self.method = match self.store.get(&key).await? {
            Some(raw) => match raw.parse::<DistributionMethod>() {
                Ok(method) => Some(method),
                Err(err) => {
                    warn!("distribution: ignoring stored method key={key} error={err}");
                    None
                }
            },
            None => None,
        };
        Ok(self.method)
    }

    /// Compares the remote method with the local one. A remote method that
    /// differs is adopted and remembered, and the caller should refetch.
    pub async fn reconcile_remote(
        &mut self,
        remote: Option<DistributionMethod>,
    ) -> Result<MethodSync> {
        let Some(remote) = remote else {
            return Ok(MethodSync::InSync);
        };
        if self.method == Some(remote) {
            return Ok(MethodSync::InSync);
        }

        info!(
            "distribution: adopting remote method local={:?} remote={remote}",
            self.method
        );
        self.method = Some(remote);
        self.remember().await?;
        self.announce();
        Ok(MethodSync::Refetch)
    }

    pub fn request_change(&self, method: DistributionMethod) -> Option<PendingMethodChange> {
        (self.method != Some(method)).then_some(PendingMethodChange {
            method,
            discards_custom_allocations: self.method == Some(DistributionMethod::Custom),
        })
    }

    pub async fn confirm_change(&mut self, change: PendingMethodChange) -> Result<Ballot> {
        self.method = Some(change.method);
        self.remember().await?;
        self.announce();
        info!("distribution: method changed method={}", change.method);
        self.api
            .update_distribution_method(&self.address, change.method)
            .await
    }

    pub async fn on_allocation_edit(&mut self, total: f64) {
        let next = if total <= 0.0 && matches!(self.method, None | Some(DistributionMethod::Custom))
        {
            None
        } else {
            Some(DistributionMethod::Custom)
        };
        if next == self.method {
            return;
        }

        self.method = next;
        if let Err(err) = self.remember().await {
            report_persist_failure(&self.events, "distribution method".into(), &err);
        }
        if let Some(method) = next {
            if let Err(err) = self
                .api
                .update_distribution_method(&self.address, method)
                .await
            {
                report_persist_failure(&self.events, "distribution method".into(), &err);
            }
        }
        info!("distribution: method follows allocation edit method={next:?} total={total}");
        self.announce();
    }

    /// Failures are reported and yield `None`.
    pub async fn redistribute(&self) -> Option<Ballot> {
        let method = self.method.filter(|method| method.is_server_computed())?;
        match self
            .api
            .update_distribution_method(&self.address, method)
            .await
        {
            Ok(ballot) => Some(ballot),
            Err(err) => {
                report_persist_failure(&self.events, format!("redistribute {method}"), &err);
                None
            }
        }
    }

    async fn remember(&self) -> Result<()> {
        let key = keys::distribution_method(&self.address);
        match self.method {
            Some(method) => self.store.set(&key, method.as_str()).await,
            None => self.store.remove(&key).await,
        }
    }

    fn announce(&self) {
        let _ = self.events.send(BallotEvent::MethodChanged(self.method));
    }
}

#[cfg(test)]
#[path = "tests/distribution_tests.rs"]
mod tests;
