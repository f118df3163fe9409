//! Mutation batcher: coalesces per-message content changes and applies them
//! in small rate-limited batches so visual updates never fight the user's
//! scrolling. Pristine/translated forms live in an owned side-table, never
//! on host message objects.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::activity::ActivityTracker;
use crate::host::{ContentPatch, HostAdapter};

/// Delay between an enqueued mutation and its flush tick.
pub const FLUSH_DELAY: Duration = Duration::from_millis(50);
/// Retry delay when a flush tick lands during active scrolling.
pub const SCROLL_RETRY_DELAY: Duration = Duration::from_millis(150);
/// Mutations applied per tick; keeps a tick short on large backlogs.
pub const FLUSH_BATCH_SIZE: usize = 8;

/// An intended but not-yet-applied change to a displayed message.
/// Superseded by later intents for the same message id until flushed.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMutation {
    pub channel_id: String,
    pub new_content: String,
    pub original_content: String,
    pub translated_content: String,
}

/// Pristine and translated forms of a message, kept so the original can be
/// recovered even after the host's visible content has drifted.
#[derive(Debug, Clone)]
pub struct TrackedMessage {
    pub channel_id: String,
    pub original_content: String,
    pub translated_content: String,
    pub showing_translation: bool,
}

pub struct MutationBatcher {
    host: Arc<dyn HostAdapter>,
    activity: Arc<ActivityTracker>,
    pending: Mutex<HashMap<String, PendingMutation>>,
    tracked: Mutex<HashMap<String, TrackedMessage>>,
    flush_scheduled: AtomicBool,
    shutdown: CancellationToken,
}

impl MutationBatcher {
    pub fn new(
        host: Arc<dyn HostAdapter>,
        activity: Arc<ActivityTracker>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            host,
            activity,
            pending: Mutex::new(HashMap::new()),
            tracked: Mutex::new(HashMap::new()),
            flush_scheduled: AtomicBool::new(false),
            shutdown,
        }
    }

    /// Queue "show translation"; last write wins before flush.
    pub fn queue_translation(
        self: &Arc<Self>,
        message_id: &str,
        channel_id: &str,
        original: &str,
        translated: &str,
    ) {
        {
            let mut tracked = self.tracked.lock();
            tracked
                .entry(message_id.to_string())
                .and_modify(|entry| entry.translated_content = translated.to_string())
                .or_insert_with(|| TrackedMessage {
                    channel_id: channel_id.to_string(),
                    original_content: original.to_string(),
                    translated_content: translated.to_string(),
                    showing_translation: false,
                });
        }
        self.pending.lock().insert(
            message_id.to_string(),
            PendingMutation {
                channel_id: channel_id.to_string(),
                new_content: translated.to_string(),
                original_content: original.to_string(),
                translated_content: translated.to_string(),
            },
        );
        self.schedule_flush(FLUSH_DELAY);
    }

    /// Queue "restore original" for a tracked message.
    pub fn queue_restore(self: &Arc<Self>, message_id: &str) {
        let Some(tracked) = self.tracked.lock().get(message_id).cloned() else {
            return;
        };
        self.pending.lock().insert(
            message_id.to_string(),
            PendingMutation {
                channel_id: tracked.channel_id,
                new_content: tracked.original_content.clone(),
                original_content: tracked.original_content,
                translated_content: tracked.translated_content,
            },
        );
        self.schedule_flush(FLUSH_DELAY);
    }

    /// Invalidation path: drop queued intents, queue restores for every
    /// message currently showing a translation, and forget the side-table.
    pub fn restore_all(self: &Arc<Self>) {
        let restores: Vec<(String, PendingMutation)> = {
            let mut tracked = self.tracked.lock();
            let restores = tracked
                .iter()
                .filter(|(_, entry)| entry.showing_translation)
                .map(|(id, entry)| {
                    (
                        id.clone(),
                        PendingMutation {
                            channel_id: entry.channel_id.clone(),
                            new_content: entry.original_content.clone(),
                            original_content: entry.original_content.clone(),
                            translated_content: entry.translated_content.clone(),
                        },
                    )
                })
                .collect();
            tracked.clear();
            restores
        };

        let mut pending = self.pending.lock();
        pending.clear();
        let count = restores.len();
        for (id, mutation) in restores {
            pending.insert(id, mutation);
        }
        drop(pending);

        if count > 0 {
            debug!(count, "queued restores for invalidation");
            self.schedule_flush(FLUSH_DELAY);
        }
    }

    /// Manual show-original / show-translation toggle. Applies immediately,
    /// bypassing both batching and the scroll gate, and supersedes any
    /// queued intent for this message.
    pub fn toggle_now(&self, message_id: &str) -> bool {
        let (channel_id, patch) = {
            let mut tracked = self.tracked.lock();
            let Some(entry) = tracked.get_mut(message_id) else {
                return false;
            };
            entry.showing_translation = !entry.showing_translation;
            let patch = if entry.showing_translation {
                ContentPatch {
                    content: entry.translated_content.clone(),
                    original_content: Some(entry.original_content.clone()),
                    translated_content: Some(entry.translated_content.clone()),
                }
            } else {
                ContentPatch {
                    content: entry.original_content.clone(),
                    original_content: None,
                    translated_content: None,
                }
            };
            (entry.channel_id.clone(), patch)
        };
        self.pending.lock().remove(message_id);
        self.apply(&channel_id, message_id, &patch);
        true
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_showing_translation(&self, message_id: &str) -> bool {
        self.tracked
            .lock()
            .get(message_id)
            .is_some_and(|entry| entry.showing_translation)
    }

    /// Arm the flush timer if it is not already armed.
    pub fn schedule_flush(self: &Arc<Self>, delay: Duration) {
        if self.flush_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let batcher = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    batcher.flush_scheduled.store(false, Ordering::SeqCst);
                    batcher.flush_tick();
                }
                _ = batcher.shutdown.cancelled() => {}
            }
        });
    }

    /// One flush tick. Applies nothing while scrolling is active; otherwise
    /// applies up to `FLUSH_BATCH_SIZE` mutations and re-arms if more remain.
    fn flush_tick(self: &Arc<Self>) {
        if self.activity.is_scroll_active() {
            trace!("flush deferred: scroll active");
            self.schedule_flush(SCROLL_RETRY_DELAY);
            return;
        }

        let batch: Vec<(String, PendingMutation)> = {
            let mut pending = self.pending.lock();
            let keys: Vec<String> = pending.keys().take(FLUSH_BATCH_SIZE).cloned().collect();
            keys.into_iter()
                .filter_map(|key| pending.remove(&key).map(|mutation| (key, mutation)))
                .collect()
        };

        for (message_id, mutation) in &batch {
            let restoring = mutation.new_content == mutation.original_content;
            let patch = if restoring {
                ContentPatch {
                    content: mutation.original_content.clone(),
                    original_content: None,
                    translated_content: None,
                }
            } else {
                ContentPatch {
                    content: mutation.new_content.clone(),
                    original_content: Some(mutation.original_content.clone()),
                    translated_content: Some(mutation.translated_content.clone()),
                }
            };
            self.apply(&mutation.channel_id, message_id, &patch);
            if let Some(entry) = self.tracked.lock().get_mut(message_id) {
                entry.showing_translation = !restoring;
            }
        }

        if !batch.is_empty() {
            debug!(applied = batch.len(), "mutation batch flushed");
        }
        if self.has_pending() {
            self.schedule_flush(FLUSH_DELAY);
        }
    }

    /// Write-back failures (message gone from host state) are swallowed.
    fn apply(&self, channel_id: &str, message_id: &str, patch: &ContentPatch) {
        if let Err(e) = self.host.apply_content(channel_id, message_id, patch) {
            debug!(message_id, error = %e, "content write-back failed, ignoring");
        }
    }
}
