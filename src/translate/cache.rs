//! Volatile result cache + in-flight registry.
//! Terminal translation states only, bounded with insertion-order eviction.
//! `request` guarantees at most one running producer per key; the producer
//! runs to completion and settles the cache even if every waiter abandons.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use super::TranslationState;

/// Default bound on cached per-message states.
pub const DEFAULT_CAPACITY: usize = 2500;

type SharedResult = Shared<BoxFuture<'static, TranslationState>>;

struct CacheInner {
    entries: HashMap<String, TranslationState>,
    order: VecDeque<String>,
}

pub struct ResultCache {
    inner: Mutex<CacheInner>,
    in_flight: Mutex<HashMap<String, SharedResult>>,
    capacity: usize,
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            in_flight: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, key: &str) -> Option<TranslationState> {
        self.inner.lock().entries.get(key).cloned()
    }

    /// Insert a terminal state, evicting oldest-inserted entries past the
    /// bound. Re-inserting an existing key replaces the value in place.
    pub fn put(&self, key: &str, state: TranslationState) {
        let mut inner = self.inner.lock();
        if inner.entries.insert(key.to_string(), state).is_none() {
            inner.order.push_back(key.to_string());
        }
        while inner.entries.len() > self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    /// Deduplicated request: a cached terminal state returns immediately, an
    /// in-flight request is joined, otherwise `producer` is spawned. All
    /// concurrent callers for a key observe the same eventual result.
    pub async fn request<F>(self: &Arc<Self>, key: &str, producer: F) -> TranslationState
    where
        F: Future<Output = TranslationState> + Send + 'static,
    {
        if let Some(state) = self.get(key) {
            return state;
        }

        let waiter = {
            let mut in_flight = self.in_flight.lock();
            if let Some(existing) = in_flight.get(key) {
                existing.clone()
            } else {
                let (tx, rx) = oneshot::channel();
                let waiter: SharedResult = async move {
                    rx.await
                        .unwrap_or_else(|_| TranslationState::error("translation request dropped"))
                }
                .boxed()
                .shared();
                in_flight.insert(key.to_string(), waiter.clone());

                let cache = Arc::clone(self);
                let key = key.to_string();
                tokio::spawn(async move {
                    let state = producer.await;
                    debug_assert!(state.is_terminal(), "producer must resolve to a terminal state");
                    cache.settle(&key, state.clone());
                    let _ = tx.send(state);
                });
                waiter
            }
        };

        waiter.await
    }

    /// Store the produced state and drop the in-flight entry, success or not.
    fn settle(&self, key: &str, state: TranslationState) {
        self.in_flight.lock().remove(key);
        if state.is_terminal() {
            self.put(key, state);
        } else {
            debug!(key, "non-terminal state discarded");
        }
    }

    #[cfg(test)]
    pub(crate) fn in_flight_len(&self) -> usize {
        self.in_flight.lock().len()
    }
}
