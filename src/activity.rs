//! Visibility and scroll-activity tracking.
//! One host-side observer is multiplexed per message id here; scroll
//! activity flips on edge-triggered and is released by a quiet-window timer.
//! Subscriptions are explicit handles; dropping a handle unsubscribes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::host::HostAdapter;

/// Quiet window after the last scroll signal before activity ends.
pub const SCROLL_QUIET_WINDOW: Duration = Duration::from_millis(320);

type Callback = Arc<dyn Fn(bool) + Send + Sync>;

struct MessageWatchers {
    visible: bool,
    watchers: HashMap<u64, Callback>,
}

#[derive(Default)]
struct ActivityInner {
    messages: HashMap<String, MessageWatchers>,
    scroll_subs: HashMap<u64, Callback>,
    next_id: u64,
}

pub struct ActivityTracker {
    host: Arc<dyn HostAdapter>,
    inner: Mutex<ActivityInner>,
    scroll_active: AtomicBool,
    scroll_epoch: AtomicU64,
    shutdown: CancellationToken,
}

impl ActivityTracker {
    pub fn new(host: Arc<dyn HostAdapter>, shutdown: CancellationToken) -> Self {
        Self {
            host,
            inner: Mutex::new(ActivityInner::default()),
            scroll_active: AtomicBool::new(false),
            scroll_epoch: AtomicU64::new(0),
            shutdown,
        }
    }

    /// Last-known visibility. Unobserved messages count as visible, as do
    /// all messages on hosts without visibility support.
    pub fn is_visible(&self, message_id: &str) -> bool {
        self.inner
            .lock()
            .messages
            .get(message_id)
            .map_or(true, |watch| watch.visible)
    }

    pub fn is_scroll_active(&self) -> bool {
        self.scroll_active.load(Ordering::SeqCst)
    }

    /// Watch a message's visibility. The first watcher for an id starts host
    /// observation; dropping the last one stops it and forgets the state.
    /// On hosts with visibility support, a newly watched message counts as
    /// hidden until the host reports otherwise.
    pub fn watch_visibility(
        self: &Arc<Self>,
        message_id: &str,
        callback: impl Fn(bool) + Send + Sync + 'static,
    ) -> VisibilityWatch {
        let supports = self.host.supports_visibility();
        let (fresh, id) = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            let fresh = !inner.messages.contains_key(message_id);
            inner
                .messages
                .entry(message_id.to_string())
                .or_insert_with(|| MessageWatchers {
                    visible: !supports,
                    watchers: HashMap::new(),
                })
                .watchers
                .insert(id, Arc::new(callback));
            (fresh, id)
        };
        if fresh {
            self.host.observe(message_id);
        }
        VisibilityWatch {
            tracker: Arc::downgrade(self),
            message_id: message_id.to_string(),
            id,
        }
    }

    /// Host-driven visibility event for an observed message.
    pub fn note_visibility(&self, message_id: &str, visible: bool) {
        let callbacks: Vec<Callback> = {
            let mut inner = self.inner.lock();
            let Some(watch) = inner.messages.get_mut(message_id) else {
                return;
            };
            watch.visible = visible;
            watch.watchers.values().cloned().collect()
        };
        trace!(message_id, visible, "visibility event");
        for callback in callbacks {
            callback(visible);
        }
    }

    /// Mark scroll/navigation/touch activity: flips active on immediately
    /// and re-arms the quiet-window timer.
    pub fn note_scroll_activity(self: &Arc<Self>) {
        let epoch = self.scroll_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.scroll_active.swap(true, Ordering::SeqCst) {
            debug!("scroll activity started");
            self.notify_scroll(true);
        }

        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(SCROLL_QUIET_WINDOW) => {
                    // A newer signal re-armed the window; this timer is stale.
                    if tracker.scroll_epoch.load(Ordering::SeqCst) != epoch {
                        return;
                    }
                    if tracker.scroll_active.swap(false, Ordering::SeqCst) {
                        debug!("scroll activity ended");
                        tracker.notify_scroll(false);
                    }
                }
                _ = tracker.shutdown.cancelled() => {}
            }
        });
    }

    /// Subscribe to scroll-active transitions (true on start, false on end).
    pub fn subscribe_scroll(
        self: &Arc<Self>,
        callback: impl Fn(bool) + Send + Sync + 'static,
    ) -> ScrollSubscription {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.scroll_subs.insert(id, Arc::new(callback));
        ScrollSubscription {
            tracker: Arc::downgrade(self),
            id,
        }
    }

    fn notify_scroll(&self, active: bool) {
        let callbacks: Vec<Callback> = self.inner.lock().scroll_subs.values().cloned().collect();
        for callback in callbacks {
            callback(active);
        }
    }

    fn unwatch(&self, message_id: &str, id: u64) {
        let forget = {
            let mut inner = self.inner.lock();
            match inner.messages.get_mut(message_id) {
                Some(watch) => {
                    watch.watchers.remove(&id);
                    if watch.watchers.is_empty() {
                        inner.messages.remove(message_id);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };
        if forget {
            self.host.unobserve(message_id);
        }
    }

    fn unsubscribe_scroll(&self, id: u64) {
        self.inner.lock().scroll_subs.remove(&id);
    }

    #[cfg(test)]
    pub(crate) fn watched_len(&self) -> usize {
        self.inner.lock().messages.len()
    }
}

/// Visibility subscription handle; dropping it unsubscribes.
pub struct VisibilityWatch {
    tracker: Weak<ActivityTracker>,
    message_id: String,
    id: u64,
}

impl Drop for VisibilityWatch {
    fn drop(&mut self) {
        if let Some(tracker) = self.tracker.upgrade() {
            tracker.unwatch(&self.message_id, self.id);
        }
    }
}

/// Scroll subscription handle; dropping it unsubscribes.
pub struct ScrollSubscription {
    tracker: Weak<ActivityTracker>,
    id: u64,
}

impl Drop for ScrollSubscription {
    fn drop(&mut self) {
        if let Some(tracker) = self.tracker.upgrade() {
            tracker.unsubscribe_scroll(self.id);
        }
    }
}
