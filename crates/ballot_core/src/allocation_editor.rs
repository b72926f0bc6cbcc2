//! Category-level allocation editor.
//!
//! Owns the budget split across categories. Every mutation runs the
//! calculator before the new state is committed, then queues a debounced write
//! carrying the post-rebalance value of the edited category.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use futures::future::BoxFuture;
use shared::{
    domain::{
        clamp_allocation, round_allocation, AllocationEntry, CategoryId, WalletAddress,
        MAX_ALLOCATION,
    },
    protocol::{CategoryAllocation, CategoryAllocationUpdate},
};
use tracing::debug;

use crate::{
    api::BallotApi,
    debounce::{Debouncer, FlushFn},
    error::AllocationError,
    events::{report_persist_failure, EventSender},
    rebalance::{rebalance, total},
};

pub type RemoveHook = Box<dyn Fn(&CategoryId) + Send + Sync>;

pub struct AllocationEditor {
    state: BTreeMap<CategoryId, AllocationEntry>,
    writes: Debouncer<CategoryId, AllocationEntry>,
    on_remove: Option<RemoveHook>,
}

impl AllocationEditor {
    pub fn new(writes: Debouncer<CategoryId, AllocationEntry>) -> Self {
        Self {
            state: BTreeMap::new(),
            writes,
            on_remove: None,
        }
    }

    pub fn with_remote(
        api: Arc<dyn BallotApi>,
        address: WalletAddress,
        events: EventSender,
        delay: Duration,
    ) -> Self {
        let flush: FlushFn<CategoryId, AllocationEntry> = Arc::new(
            move |category: CategoryId, entry: AllocationEntry| -> BoxFuture<'static, ()> {
                let api = Arc::clone(&api);
                let address = address.clone();
                let events = events.clone();
                Box::pin(async move {
                    let update = CategoryAllocationUpdate {
                        category_slug: category.clone(),
                        allocation: entry.allocation,
                        locked: entry.locked,
                    };
                    if let Err(err) = api.update_category_allocation(&address, update).await {
                        report_persist_failure(&events, format!("category {category}"), &err);
                    }
                })
            },
        );
        Self::new(Debouncer::new(delay, flush))
    }

    pub fn on_remove(mut self, hook: RemoveHook) -> Self {
        self.on_remove = Some(hook);
        self
    }

    pub fn state(&self) -> &BTreeMap<CategoryId, AllocationEntry> {
        &self.state
    }

    pub fn get(&self, id: &CategoryId) -> Option<AllocationEntry> {
        self.state.get(id).copied()
    }

    pub fn total(&self) -> f64 {
        total(&self.state)
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    pub fn snapshot(&self) -> Vec<CategoryAllocation> {
        self.state
            .iter()
            .map(|(id, entry)| CategoryAllocation {
                category_slug: id.clone(),
                allocation: entry.allocation,
                locked: entry.locked,
            })
            .collect()
    }

    /// Sets `id` to `amount` and locks it, unless `unlock` is set.
    ///
    /// A locked value is capped at what the other locked categories leave
    /// free. When no other category is unlocked, the edited one takes the
    /// exact remainder so the set still adds up to 100.
    pub fn set(&mut self, id: &CategoryId, amount: f64, unlock: bool) {
        let locked = !unlock;
        let others_locked: f64 = self
            .state
            .iter()
            .filter(|(key, entry)| *key != id && entry.locked)
            .map(|(_, entry)| entry.allocation)
            .sum();
        let others_unlocked = self
            .state
            .iter()
            .filter(|(key, entry)| *key != id && !entry.locked)
            .count();
        let headroom = clamp_allocation(MAX_ALLOCATION - others_locked);

        let amount = clamp_allocation(amount);
        let allocation = match (locked, others_unlocked) {
            (true, 0) => headroom,
            (true, _) => amount.min(headroom),
            (false, _) => amount,
        };

        let mut next = self.state.clone();
        next.insert(
            id.clone(),
            AllocationEntry {
                allocation: round_allocation(allocation),
                locked,
            },
        );
        self.commit(next);
        self.persist(id);
    }

    pub fn inc(&mut self, id: &CategoryId) {
        let current = self.get(id).map(|entry| entry.allocation).unwrap_or_default();
        self.set(id, current.floor() + 1.0, false);
    }

    pub fn dec(&mut self, id: &CategoryId) {
        let current = self.get(id).map(|entry| entry.allocation).unwrap_or_default();
        self.set(id, current.ceil() - 1.0, false);
    }

    pub fn add(&mut self, id: &CategoryId, allocation: f64) {
        let mut next = self.state.clone();
        next.insert(
            id.clone(),
            AllocationEntry::unlocked(clamp_allocation(allocation)),
        );
        self.commit(next);
        let balanced = self.get(id).map(|entry| entry.allocation).unwrap_or_default();
        self.set(id, balanced, true);
    }

    pub fn remove(&mut self, id: &CategoryId) -> bool {
        let mut next = self.state.clone();
        if next.remove(id).is_none() {
            return false;
        }
        self.writes.cancel(id);
        if let Some(hook) = &self.on_remove {
            hook(id);
        }

        // With only locked categories left nothing could absorb the freed share.
        if !next.is_empty() && next.values().all(|entry| entry.locked) {
            if let Some(entry) = next.values_mut().next_back() {
                entry.locked = false;
            }
        }
        self.commit(next);
        true
    }

    /// Replaces the whole state with a server snapshot, as is.
    pub fn reset(&mut self, entries: impl IntoIterator<Item = (CategoryId, AllocationEntry)>) {
        self.state = entries.into_iter().collect();
    }

    pub fn reset_from(&mut self, allocations: &[CategoryAllocation]) {
        self.reset(allocations.iter().map(|allocation| {
            (
                allocation.category_slug.clone(),
                AllocationEntry {
                    allocation: allocation.allocation,
                    locked: allocation.locked,
                },
            )
        }));
    }

    /// Flips the lock on `id`. Locking the last unlocked category is refused:
    /// something has to absorb future edits.
    pub fn toggle_lock(&mut self, id: &CategoryId) -> Result<(), AllocationError> {
        let entry = self
            .get(id)
            .ok_or_else(|| AllocationError::UnknownEntry(id.clone()))?;
        if !entry.locked {
            let others_unlocked = self
                .state
                .iter()
                .any(|(key, other)| key != id && !other.locked);
            if !others_unlocked {
                return Err(AllocationError::LastUnlockedEntry);
            }
        }

        let mut next = self.state.clone();
        next.insert(
            id.clone(),
            AllocationEntry {
                allocation: entry.allocation,
                locked: !entry.locked,
            },
        );
        self.commit(next);
        self.persist(id);
        Ok(())
    }

    pub fn has_pending_writes(&self) -> bool {
        self.writes.pending_len() > 0
    }

    pub async fn flush(&self) {
        self.writes.flush_all().await;
    }

    fn commit(&mut self, next: BTreeMap<CategoryId, AllocationEntry>) {
        self.state = rebalance(&next);
    }

    fn persist(&self, id: &CategoryId) {
        if let Some(entry) = self.get(id) {
            debug!(
                "categories: queue write category={id} allocation={} locked={}",
                entry.allocation, entry.locked
            );
            self.writes.schedule(id.clone(), entry);
        }
    }
}

#[cfg(test)]
#[path = "tests/allocation_editor_tests.rs"]
mod tests;
