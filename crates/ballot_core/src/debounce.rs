//! Trailing-edge, per-key write coalescing.
//!
//! Each `schedule` replaces the pending value for its key and restarts that
//! key's quiet period; only the last value is handed to the flush callback.
//! Keys are independent, so writes for different keys may land in any order.

use std::{
    collections::HashMap,
    hash::Hash,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use futures::future::{join_all, BoxFuture};
use tokio::{runtime::Handle, sync::Notify};
use tracing::{debug, warn};

pub type FlushFn<K, V> = Arc<dyn Fn(K, V) -> BoxFuture<'static, ()> + Send + Sync>;

struct Pending<V> {
    value: V,
    generation: u64,
}

struct DebounceState<K, V> {
    entries: HashMap<K, Pending<V>>,
    generation: u64,
}

struct Shared<K, V> {
    state: Mutex<DebounceState<K, V>>,
    in_flight: AtomicUsize,
    idle: Notify,
}

impl<K, V> Shared<K, V> {
    fn lock(&self) -> MutexGuard<'_, DebounceState<K, V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K: Eq + Hash, V> Shared<K, V> {
    /// Takes the value a timer of `generation` is due to send. The write is
    /// counted in flight before the lock is released, so `flush_all` always
    /// finds it either queued or in flight.
    fn take_due(&self, key: &K, generation: u64) -> Option<V> {
        let mut state = self.lock();
        if state.entries.get(key)?.generation != generation {
            return None;
        }
        let pending = state.entries.remove(key)?;
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Some(pending.value)
    }
}

pub struct Debouncer<K, V> {
    delay: Duration,
    flush: FlushFn<K, V>,
    shared: Arc<Shared<K, V>>,
}

impl<K, V> Debouncer<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + 'static,
    V: Send + 'static,
{
    pub fn new(delay: Duration, flush: FlushFn<K, V>) -> Self {
        Self {
            delay,
            flush,
            shared: Arc::new(Shared {
                state: Mutex::new(DebounceState {
                    entries: HashMap::new(),
                    generation: 0,
                }),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Queues `value` for `key`, superseding any value still waiting for that key.
    ///
    /// Outside a tokio runtime the value stays queued until [`Debouncer::flush_all`].
    pub fn schedule(&self, key: K, value: V) {
        let generation = {
            let mut state = self.shared.lock();
            state.generation += 1;
            let generation = state.generation;
            state
                .entries
                .insert(key.clone(), Pending { value, generation });
            generation
        };

        let Ok(handle) = Handle::try_current() else {
            warn!("debounce: no runtime available, holding write key={key:?} until flush");
            return;
        };

        let shared = Arc::clone(&self.shared);
        let flush = Arc::clone(&self.flush);
        let delay = self.delay;
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(value) = shared.take_due(&key, generation) else {
                return;
            };

            debug!("debounce: flushing key={key:?}");
            flush(key, value).await;
            shared.in_flight.fetch_sub(1, Ordering::SeqCst);
            shared.idle.notify_waiters();
        });
    }

    pub fn cancel(&self, key: &K) -> bool {
        self.shared.lock().entries.remove(key).is_some()
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.shared.lock().entries.contains_key(key)
    }

    pub fn pending_len(&self) -> usize {
        self.shared.lock().entries.len()
    }

    /// Flushes every queued value now and waits for flushes already running.
    pub async fn flush_all(&self) {
        let drained: Vec<(K, V)> = {
            let mut state = self.shared.lock();
            state
                .entries
                .drain()
                .map(|(key, pending)| (key, pending.value))
                .collect()
        };

        if !drained.is_empty() {
            debug!("debounce: flushing {} queued writes", drained.len());
        }
        join_all(
            drained
                .into_iter()
                .map(|(key, value)| (self.flush)(key, value)),
        )
        .await;

        loop {
            let idle = self.shared.idle.notified();
            if self.shared.in_flight.load(Ordering::SeqCst) == 0 {
                break;
            }
            idle.await;
        }
    }
}

#[cfg(test)]
#[path = "tests/debounce_tests.rs"]
mod tests;
