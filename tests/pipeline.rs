//! End-to-end engine tests: mock host + scripted backends + in-memory
//! durable storage, driving the full request pipeline.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;

use parla::batcher::FLUSH_DELAY;
use parla::translate::resolver::UNAVAILABLE_MESSAGE;
use parla::{
    BackendError, BackendResolver, ContentPatch, EphemeralMemory, HostAdapter, HostError,
    MemoryBackend, MessageRef, Settings, TranslateBackend, TranslationEngine, TranslationOutcome,
    TranslationState,
};

#[derive(Default)]
struct RecordingHost {
    applied: Mutex<Vec<(String, ContentPatch)>>,
    observed: Mutex<Vec<String>>,
    visibility_capable: bool,
}

impl RecordingHost {
    fn visibility_capable() -> Self {
        Self {
            visibility_capable: true,
            ..Self::default()
        }
    }

    fn last_patch_for(&self, message_id: &str) -> Option<ContentPatch> {
        self.applied
            .lock()
            .iter()
            .rev()
            .find(|(id, _)| id == message_id)
            .map(|(_, patch)| patch.clone())
    }
}

impl HostAdapter for RecordingHost {
    fn apply_content(
        &self,
        _channel_id: &str,
        message_id: &str,
        patch: &ContentPatch,
    ) -> Result<(), HostError> {
        self.applied
            .lock()
            .push((message_id.to_string(), patch.clone()));
        Ok(())
    }

    fn supports_visibility(&self) -> bool {
        self.visibility_capable
    }

    fn observe(&self, message_id: &str) {
        self.observed.lock().push(message_id.to_string());
    }
}

struct ScriptedBackend {
    result: Result<TranslationOutcome, BackendError>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    fn ok(text: &str) -> Arc<Self> {
        Self::ok_after(text, Duration::ZERO)
    }

    fn ok_after(text: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            result: Ok(TranslationOutcome {
                source_language: "es".into(),
                text: text.into(),
            }),
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            result: Err(BackendError::Network("connection refused".into())),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TranslateBackend for ScriptedBackend {
    fn translate<'a>(
        &'a self,
        _text: &'a str,
        _settings: &'a Settings,
    ) -> BoxFuture<'a, Result<TranslationOutcome, BackendError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.result.clone()
        }
        .boxed()
    }
}

fn message(id: &str, content: &str) -> MessageRef {
    MessageRef {
        message_id: id.into(),
        channel_id: "channel-1".into(),
        content: content.into(),
        author_id: "author-1".into(),
    }
}

fn settings_with_key() -> Settings {
    Settings {
        primary_api_key: Some("test-key".into()),
        ..Settings::default()
    }
}

struct Fixture {
    host: Arc<RecordingHost>,
    memory: Arc<EphemeralMemory>,
    primary: Arc<ScriptedBackend>,
    secondary: Arc<ScriptedBackend>,
    engine: Arc<TranslationEngine>,
}

fn fixture(host: RecordingHost, settings: Settings) -> Fixture {
    fixture_with_backends(
        host,
        settings,
        ScriptedBackend::ok("translated by primary"),
        ScriptedBackend::ok("translated by secondary"),
    )
}

fn fixture_with_backends(
    host: RecordingHost,
    settings: Settings,
    primary: Arc<ScriptedBackend>,
    secondary: Arc<ScriptedBackend>,
) -> Fixture {
    let host = Arc::new(host);
    let memory = Arc::new(EphemeralMemory::new());
    let resolver = Arc::new(BackendResolver::new(
        Arc::clone(&primary) as Arc<dyn TranslateBackend>,
        Arc::clone(&secondary) as Arc<dyn TranslateBackend>,
    ));
    let engine = TranslationEngine::create_with_resolver(
        Arc::clone(&host) as Arc<dyn HostAdapter>,
        Arc::clone(&memory) as Arc<dyn MemoryBackend>,
        settings,
        resolver,
    );
    Fixture {
        host,
        memory,
        primary,
        secondary,
        engine,
    }
}

#[tokio::test(start_paused = true)]
async fn translation_is_resolved_and_applied() {
    let fx = fixture(RecordingHost::default(), settings_with_key());

    let state = fx.engine.translate_message(message("m1", "hola mundo")).await;
    assert_eq!(
        state,
        TranslationState::Ready {
            source_language: "es".into(),
            text: "translated by primary".into(),
        }
    );
    assert_eq!(fx.primary.call_count(), 1);
    assert_eq!(fx.secondary.call_count(), 0);

    tokio::time::sleep(FLUSH_DELAY * 2).await;
    let patch = fx.host.last_patch_for("m1").expect("mutation applied");
    assert_eq!(patch.content, "translated by primary");
    assert_eq!(patch.original_content.as_deref(), Some("hola mundo"));
}

#[tokio::test(start_paused = true)]
async fn unworthy_content_never_starts_work() {
    let fx = fixture(RecordingHost::default(), settings_with_key());

    for content in ["", "   ", "https://example.com", "<:wave:12345>"] {
        let state = fx.engine.translate_message(message("m1", content)).await;
        assert_eq!(state, TranslationState::Idle);
    }
    assert_eq!(fx.primary.call_count(), 0);
    assert!(fx.host.applied.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn concurrent_requests_share_one_backend_call() {
    let fx = fixture_with_backends(
        RecordingHost::default(),
        settings_with_key(),
        ScriptedBackend::ok_after("translated by primary", Duration::from_millis(20)),
        ScriptedBackend::ok("translated by secondary"),
    );

    let mut handles = Vec::new();
    for _ in 0..5 {
        let engine = Arc::clone(&fx.engine);
        handles.push(tokio::spawn(async move {
            engine.translate_message(message("m1", "hola mundo")).await
        }));
    }

    let mut states = Vec::new();
    for handle in handles {
        states.push(handle.await.unwrap());
    }
    assert_eq!(fx.primary.call_count(), 1);
    assert!(states.iter().all(|state| state == &states[0]));
}

#[tokio::test(start_paused = true)]
async fn durable_memory_survives_engine_restart() {
    let fx = fixture(RecordingHost::default(), settings_with_key());
    fx.engine.translate_message(message("m1", "hola mundo")).await;
    assert_eq!(fx.primary.call_count(), 1);
    fx.engine.dispose();

    // Same durable memory, fresh process state, fresh backends.
    let primary = ScriptedBackend::ok("translated by primary");
    let secondary = ScriptedBackend::ok("translated by secondary");
    let host = Arc::new(RecordingHost::default());
    let resolver = Arc::new(BackendResolver::new(
        Arc::clone(&primary) as Arc<dyn TranslateBackend>,
        Arc::clone(&secondary) as Arc<dyn TranslateBackend>,
    ));
    let engine = TranslationEngine::create_with_resolver(
        Arc::clone(&host) as Arc<dyn HostAdapter>,
        Arc::clone(&fx.memory) as Arc<dyn MemoryBackend>,
        settings_with_key(),
        resolver,
    );

    // Different message id, same content: the durable store is
    // content-addressed, so no backend call is needed.
    let state = engine.translate_message(message("m2", "hola  mundo")).await;
    assert!(state.is_ready());
    assert_eq!(primary.call_count(), 0);
    assert_eq!(secondary.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn fallback_recovers_from_primary_failure() {
    let fx = fixture_with_backends(
        RecordingHost::default(),
        settings_with_key(),
        ScriptedBackend::failing(),
        ScriptedBackend::ok("translated by secondary"),
    );

    let state = fx.engine.translate_message(message("m1", "hola mundo")).await;
    assert_eq!(
        state,
        TranslationState::Ready {
            source_language: "es".into(),
            text: "translated by secondary".into(),
        }
    );
    assert_eq!(fx.primary.call_count(), 1);
    assert_eq!(fx.secondary.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn total_backend_failure_caches_generic_error() {
    let fx = fixture_with_backends(
        RecordingHost::default(),
        settings_with_key(),
        ScriptedBackend::failing(),
        ScriptedBackend::failing(),
    );

    let state = fx.engine.translate_message(message("m1", "hola mundo")).await;
    assert_eq!(state, TranslationState::error(UNAVAILABLE_MESSAGE));

    // The error state is terminal and cached: no second round of calls.
    let state = fx.engine.translate_message(message("m1", "hola mundo")).await;
    assert_eq!(state, TranslationState::error(UNAVAILABLE_MESSAGE));
    assert_eq!(fx.primary.call_count(), 1);
    assert_eq!(fx.secondary.call_count(), 1);
    assert!(fx.host.applied.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn concurrency_limit_gates_backend_calls() {
    let settings = Settings {
        max_concurrent_requests: 2,
        persistent_cache_enabled: false,
        ..settings_with_key()
    };
    let fx = fixture_with_backends(
        RecordingHost::default(),
        settings,
        ScriptedBackend::ok_after("translated by primary", Duration::from_millis(50)),
        ScriptedBackend::ok("translated by secondary"),
    );

    let mut handles = Vec::new();
    for i in 0..3 {
        let engine = Arc::clone(&fx.engine);
        handles.push(tokio::spawn(async move {
            engine
                .translate_message(message(&format!("m{i}"), &format!("texto {i}")))
                .await
        }));
    }
    // Let all three requests reach the gate.
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(fx.primary.call_count(), 2);

    tokio::time::advance(Duration::from_millis(60)).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(fx.primary.call_count(), 3);

    for handle in handles {
        assert!(handle.await.unwrap().is_ready());
    }
}

#[tokio::test(start_paused = true)]
async fn settings_change_invalidates_and_restores() {
    let fx = fixture(RecordingHost::default(), settings_with_key());

    fx.engine.translate_message(message("m1", "hola mundo")).await;
    tokio::time::sleep(FLUSH_DELAY * 2).await;
    assert_eq!(
        fx.host.last_patch_for("m1").unwrap().content,
        "translated by primary"
    );
    assert!(fx.engine.cached_state(&message("m1", "hola mundo")).is_some());

    let mut changed = settings_with_key();
    changed.target_language = "de".into();
    fx.engine.apply_settings(changed);

    assert!(fx.engine.cached_state(&message("m1", "hola mundo")).is_none());
    tokio::time::sleep(FLUSH_DELAY * 2).await;
    let patch = fx.host.last_patch_for("m1").unwrap();
    assert_eq!(patch.content, "hola mundo");
    assert_eq!(patch.original_content, None);

    // Same text again now misses the durable memory (new fingerprint).
    fx.engine.translate_message(message("m1", "hola mundo")).await;
    assert_eq!(fx.primary.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn only_translate_visible_defers_until_scrolled_into_view() {
    let settings = Settings {
        only_translate_visible: true,
        ..settings_with_key()
    };
    let fx = fixture(RecordingHost::visibility_capable(), settings);

    let state = fx.engine.translate_message(message("m1", "hola mundo")).await;
    assert_eq!(state, TranslationState::Pending);
    assert_eq!(fx.primary.call_count(), 0);
    assert_eq!(fx.host.observed.lock().as_slice(), ["m1"]);

    fx.engine.note_visibility("m1", true);
    tokio::time::sleep(FLUSH_DELAY * 4).await;
    assert_eq!(fx.primary.call_count(), 1);
    assert_eq!(
        fx.host.last_patch_for("m1").unwrap().content,
        "translated by primary"
    );
}

#[tokio::test(start_paused = true)]
async fn manual_toggle_round_trips() {
    let fx = fixture(RecordingHost::default(), settings_with_key());

    fx.engine.translate_message(message("m1", "hola mundo")).await;
    tokio::time::sleep(FLUSH_DELAY * 2).await;

    assert!(fx.engine.toggle_message("m1"));
    assert_eq!(fx.host.last_patch_for("m1").unwrap().content, "hola mundo");

    assert!(fx.engine.toggle_message("m1"));
    assert_eq!(
        fx.host.last_patch_for("m1").unwrap().content,
        "translated by primary"
    );

    // Unknown messages are a no-op.
    assert!(!fx.engine.toggle_message("m999"));
}

#[tokio::test(start_paused = true)]
async fn dispose_flushes_durable_memory() {
    let fx = fixture(RecordingHost::default(), settings_with_key());
    fx.engine.translate_message(message("m1", "hola mundo")).await;

    // Nothing persisted yet: the debounced save has not fired.
    assert!(fx
        .memory
        .get(parla::translate::store::STORAGE_KEY)
        .unwrap()
        .is_none());

    fx.engine.dispose();
    let persisted = fx
        .memory
        .get(parla::translate::store::STORAGE_KEY)
        .unwrap()
        .expect("memory persisted on dispose");
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].1.translated_text, "translated by primary");
}
