//! Engine assembly and the per-message request pipeline.
//! One `TranslationEngine` owns every cache, timer, and counter, so multiple
//! isolated instances can coexist (and be torn down) within one process.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::activity::{ActivityTracker, ScrollSubscription, VisibilityWatch};
use crate::batcher::{MutationBatcher, FLUSH_DELAY};
use crate::host::{HostAdapter, MessageRef};
use crate::scheduler::RequestGate;
use crate::settings::Settings;
use crate::storage::MemoryBackend;
use crate::translate::cache::{ResultCache, DEFAULT_CAPACITY};
use crate::translate::keys::{volatile_key, ContentScreen};
use crate::translate::resolver::{BackendResolver, UNAVAILABLE_MESSAGE};
use crate::translate::store::TranslationStore;
use crate::translate::{BackendError, TranslationState};

pub struct TranslationEngine {
    host: Arc<dyn HostAdapter>,
    settings: RwLock<Settings>,
    fingerprint: RwLock<String>,
    screen: ContentScreen,
    cache: Arc<ResultCache>,
    store: Arc<TranslationStore>,
    gate: RwLock<Arc<RequestGate>>,
    resolver: Arc<BackendResolver>,
    batcher: Arc<MutationBatcher>,
    activity: Arc<ActivityTracker>,
    /// One-shot visibility watches for messages waiting to scroll into view.
    deferred: Mutex<HashMap<String, VisibilityWatch>>,
    scroll_sub: Mutex<Option<ScrollSubscription>>,
    shutdown: CancellationToken,
}

impl TranslationEngine {
    /// Build an engine with the standard HTTP backends.
    pub fn create(
        host: Arc<dyn HostAdapter>,
        memory: Arc<dyn MemoryBackend>,
        settings: Settings,
    ) -> Result<Arc<Self>, BackendError> {
        let resolver = Arc::new(BackendResolver::with_default_backends()?);
        Ok(Self::create_with_resolver(host, memory, settings, resolver))
    }

    /// Build an engine around a caller-supplied resolver (tests, custom
    /// backends).
    pub fn create_with_resolver(
        host: Arc<dyn HostAdapter>,
        memory: Arc<dyn MemoryBackend>,
        settings: Settings,
        resolver: Arc<BackendResolver>,
    ) -> Arc<Self> {
        let shutdown = CancellationToken::new();
        let activity = Arc::new(ActivityTracker::new(
            Arc::clone(&host),
            shutdown.child_token(),
        ));
        let batcher = Arc::new(MutationBatcher::new(
            Arc::clone(&host),
            Arc::clone(&activity),
            shutdown.child_token(),
        ));
        let store = Arc::new(TranslationStore::new(memory, shutdown.child_token()));
        let fingerprint = settings.fingerprint();
        let gate = Arc::new(RequestGate::new(settings.max_concurrent_requests));

        let engine = Arc::new(Self {
            host,
            settings: RwLock::new(settings),
            fingerprint: RwLock::new(fingerprint),
            screen: ContentScreen::new(),
            cache: Arc::new(ResultCache::new(DEFAULT_CAPACITY)),
            store,
            gate: RwLock::new(gate),
            resolver,
            batcher,
            activity,
            deferred: Mutex::new(HashMap::new()),
            scroll_sub: Mutex::new(None),
            shutdown,
        });

        // Re-arm the flush loop when scrolling goes quiet with work pending.
        let weak = Arc::downgrade(&engine);
        let subscription = engine.activity.subscribe_scroll(move |active| {
            if active {
                return;
            }
            if let Some(engine) = weak.upgrade() {
                if engine.batcher.has_pending() {
                    engine.batcher.schedule_flush(FLUSH_DELAY);
                }
            }
        });
        *engine.scroll_sub.lock() = Some(subscription);

        info!(fingerprint = %engine.fingerprint.read(), "translation engine created");
        engine
    }

    /// Tear down: cancel every pending timer, close the gate, and flush the
    /// durable memory. Queued-but-not-started backend calls are dropped.
    pub fn dispose(&self) {
        self.shutdown.cancel();
        self.gate.read().close();
        self.deferred.lock().clear();
        self.scroll_sub.lock().take();
        self.store.flush();
        info!("translation engine disposed");
    }

    pub fn settings(&self) -> Settings {
        self.settings.read().clone()
    }

    /// Settings-change notification. A fingerprint change invalidates all
    /// volatile state and restores every translated message to its original
    /// content; a concurrency change rebuilds the admission gate.
    pub fn apply_settings(self: &Arc<Self>, settings: Settings) {
        let new_fingerprint = settings.fingerprint();
        let new_limit = settings.max_concurrent_requests;

        let (fingerprint_changed, limit_changed) = {
            let mut current = self.settings.write();
            let limit_changed = current.max_concurrent_requests != new_limit;
            *current = settings;
            let mut fingerprint = self.fingerprint.write();
            let fingerprint_changed = *fingerprint != new_fingerprint;
            *fingerprint = new_fingerprint;
            (fingerprint_changed, limit_changed)
        };

        if limit_changed {
            *self.gate.write() = Arc::new(RequestGate::new(new_limit));
            debug!(limit = new_limit, "request gate rebuilt");
        }
        if fingerprint_changed {
            self.invalidate();
        }
    }

    /// Drop every cached volatile state and restore translated messages.
    /// Durable entries are orphaned by the fingerprint, never purged.
    pub fn invalidate(self: &Arc<Self>) {
        self.cache.clear();
        self.deferred.lock().clear();
        self.batcher.restore_all();
        debug!("volatile translation state invalidated");
    }

    /// Per-visible-message entry point. Resolves the message's translation
    /// (deduplicated, cached, gated) and queues the visible-content update.
    pub async fn translate_message(self: &Arc<Self>, message: MessageRef) -> TranslationState {
        if !self.screen.is_translation_worthy(&message.content) {
            return TranslationState::Idle;
        }
        let only_visible = self.settings.read().only_translate_visible;
        if only_visible && !self.begin_when_visible(&message) {
            return TranslationState::Pending;
        }
        self.resolve_and_apply(message).await
    }

    /// Peek at the cached state for a message without starting work.
    pub fn cached_state(&self, message: &MessageRef) -> Option<TranslationState> {
        let key = volatile_key(
            &message.message_id,
            &message.content,
            &self.fingerprint.read(),
        );
        self.cache.get(&key)
    }

    /// Manual show-original / show-translation toggle; applied immediately,
    /// regardless of scroll state.
    pub fn toggle_message(&self, message_id: &str) -> bool {
        self.batcher.toggle_now(message_id)
    }

    /// Host signal: scroll / page-navigation key / touch movement.
    pub fn note_scroll_activity(&self) {
        self.activity.note_scroll_activity();
    }

    /// Host signal: observed message visibility changed.
    pub fn note_visibility(&self, message_id: &str, visible: bool) {
        self.activity.note_visibility(message_id, visible);
    }

    /// Abandon interest in a message (UI unmount). Any shared in-flight
    /// request keeps running and still settles the caches.
    pub fn release_message(&self, message_id: &str) {
        self.deferred.lock().remove(message_id);
    }

    /// Returns true when the message can start now; otherwise registers a
    /// one-shot watch that starts the pipeline once it scrolls into view.
    fn begin_when_visible(self: &Arc<Self>, message: &MessageRef) -> bool {
        let weak = Arc::downgrade(self);
        let deferred_message = message.clone();
        let watch = self
            .activity
            .watch_visibility(&message.message_id, move |visible| {
                if !visible {
                    return;
                }
                let Some(engine) = weak.upgrade() else {
                    return;
                };
                let message = deferred_message.clone();
                tokio::spawn(async move {
                    // Dropping the watch here also stops host observation.
                    engine.deferred.lock().remove(&message.message_id);
                    let _ = engine.resolve_and_apply(message).await;
                });
            });

        if self.activity.is_visible(&message.message_id) {
            return true;
        }
        debug!(message_id = %message.message_id, "translation deferred until visible");
        self.deferred
            .lock()
            .insert(message.message_id.clone(), watch);
        false
    }

    async fn resolve_and_apply(self: &Arc<Self>, message: MessageRef) -> TranslationState {
        let state = self.resolve(&message).await;
        if let TranslationState::Ready { text, .. } = &state {
            self.batcher.queue_translation(
                &message.message_id,
                &message.channel_id,
                &message.content,
                text,
            );
        }
        state
    }

    /// Volatile cache → in-flight dedup → durable memory → gated backend
    /// call, with the result written through to both caches.
    async fn resolve(self: &Arc<Self>, message: &MessageRef) -> TranslationState {
        let settings = self.settings();
        let fingerprint = self.fingerprint.read().clone();
        let key = volatile_key(&message.message_id, &message.content, &fingerprint);

        let engine = Arc::clone(self);
        let text = message.content.clone();
        let producer = async move {
            if settings.persistent_cache_enabled {
                engine.store.load().await;
                if let Some(state) = engine.store.lookup(&text, &fingerprint, settings.ttl_ms()) {
                    debug!("durable memory hit");
                    return state;
                }
            }

            let gate = Arc::clone(&engine.gate.read());
            let state = match gate.run(engine.resolver.fetch(&text, &settings)).await {
                Some(state) => state,
                None => TranslationState::error(UNAVAILABLE_MESSAGE),
            };

            if settings.persistent_cache_enabled && state.is_ready() {
                engine.store.remember(
                    &text,
                    &fingerprint,
                    &state,
                    settings.ttl_ms(),
                    settings.max_entries,
                );
            }
            state
        };

        self.cache.request(&key, producer).await
    }
}
