//! parla: on-demand chat translation engine.
//! Deduplicates per-message translation requests, bounds backend concurrency,
//! caches results in a volatile per-process cache and a durable translation
//! memory, resolves across two backends with fallback, and applies results
//! to the host UI through a scroll-aware mutation batcher.

pub mod activity;
pub mod batcher;
pub mod engine;
pub mod host;
pub mod scheduler;
pub mod settings;
pub mod storage;
pub mod translate;

pub use engine::TranslationEngine;
pub use host::{ContentPatch, HostAdapter, HostError, MessageRef};
pub use settings::{BackendMode, Settings};
pub use storage::{EphemeralMemory, MemoryBackend, MemoryError, SqliteMemory};
pub use translate::resolver::BackendResolver;
pub use translate::store::PersistentEntry;
pub use translate::{BackendError, TranslateBackend, TranslationOutcome, TranslationState};

use tracing::info;

/// Initialize tracing for hosts that do not bring their own subscriber.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parla=debug".parse().unwrap()),
        )
        .with_target(true)
        .init();
    info!("parla tracing initialized");
}
