//! Durable translation memory: fingerprint+content addressed entries with
//! TTL expiry, size-bounded pruning, and debounced persistence.
//! Loaded lazily once per process; legacy storage keys are read-only
//! migration sources. Storage failures are absorbed, never surfaced.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::keys::{durable_key, normalize};
use super::TranslationState;
use crate::storage::MemoryBackend;

/// Storage key for the current on-disk format.
pub const STORAGE_KEY: &str = "parla.translation-memory.v2";
/// Older keys read once at load time, never written.
pub const LEGACY_STORAGE_KEYS: &[&str] = &["parla.translation-memory", "translator.memory"];

/// Debounce window between a mutation and the persisted write.
const SAVE_DEBOUNCE: Duration = Duration::from_secs(2);

/// One remembered translation, durable across restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentEntry {
    pub normalized_source: String,
    pub translated_text: String,
    pub source_language: String,
    pub cached_at: i64,
    pub last_used_at: i64,
}

pub struct TranslationStore {
    backend: Arc<dyn MemoryBackend>,
    entries: Mutex<HashMap<String, PersistentEntry>>,
    loaded: OnceCell<()>,
    save_pending: AtomicBool,
    shutdown: CancellationToken,
}

impl TranslationStore {
    pub fn new(backend: Arc<dyn MemoryBackend>, shutdown: CancellationToken) -> Self {
        Self {
            backend,
            entries: Mutex::new(HashMap::new()),
            loaded: OnceCell::new(),
            save_pending: AtomicBool::new(false),
            shutdown,
        }
    }

    /// Lazy load. Concurrent callers share one read; later calls are no-ops.
    /// The current key is tried first, then each legacy key in order, taking
    /// the first that yields entries.
    pub async fn load(&self) {
        self.loaded
            .get_or_init(|| async {
                let mut pairs = self.read_key(STORAGE_KEY);
                if pairs.is_empty() {
                    for legacy in LEGACY_STORAGE_KEYS {
                        pairs = self.read_key(legacy);
                        if !pairs.is_empty() {
                            info!(
                                from = legacy,
                                entries = pairs.len(),
                                "migrated legacy translation memory"
                            );
                            break;
                        }
                    }
                }
                let mut entries = self.entries.lock();
                *entries = pairs.into_iter().collect();
                debug!(entries = entries.len(), "translation memory loaded");
            })
            .await;
    }

    fn read_key(&self, key: &str) -> Vec<(String, PersistentEntry)> {
        match self.backend.get(key) {
            Ok(Some(pairs)) => pairs,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(key, error = %e, "translation memory read failed, treating as empty");
                Vec::new()
            }
        }
    }

    /// Durable lookup. TTL-expired entries are removed as a side effect; a
    /// bucket-key match with a different stored source is rejected. A hit
    /// refreshes `last_used_at` and schedules a debounced save.
    pub fn lookup(
        self: &Arc<Self>,
        text: &str,
        fingerprint: &str,
        ttl_ms: i64,
    ) -> Option<TranslationState> {
        let normalized = normalize(text);
        let key = durable_key(fingerprint, &normalized);
        let now = now_unix_ms();

        let state = {
            let mut entries = self.entries.lock();
            let entry = entries.get_mut(&key)?;
            if now - entry.cached_at > ttl_ms {
                entries.remove(&key);
                drop(entries);
                self.schedule_save();
                return None;
            }
            // The hash+length key is a bucket, not a guarantee.
            if entry.normalized_source != normalized {
                debug!(%key, "durable key collision rejected");
                return None;
            }
            entry.last_used_at = now;
            TranslationState::Ready {
                source_language: entry.source_language.clone(),
                text: entry.translated_text.clone(),
            }
        };
        self.schedule_save();
        Some(state)
    }

    /// Remember a terminal result. Only `Ready` states are stored.
    pub fn remember(
        self: &Arc<Self>,
        text: &str,
        fingerprint: &str,
        state: &TranslationState,
        ttl_ms: i64,
        max_entries: usize,
    ) {
        let TranslationState::Ready {
            source_language,
            text: translated,
        } = state
        else {
            return;
        };

        let normalized = normalize(text);
        let key = durable_key(fingerprint, &normalized);
        let now = now_unix_ms();
        {
            let mut entries = self.entries.lock();
            entries.insert(
                key,
                PersistentEntry {
                    normalized_source: normalized,
                    translated_text: translated.clone(),
                    source_language: source_language.clone(),
                    cached_at: now,
                    last_used_at: now,
                },
            );
            prune_locked(&mut entries, ttl_ms, max_entries, now);
        }
        self.schedule_save();
    }

    /// TTL sweep, then lowest-`last_used_at` eviction down to `max_entries`.
    pub fn prune(self: &Arc<Self>, ttl_ms: i64, max_entries: usize) {
        {
            let mut entries = self.entries.lock();
            prune_locked(&mut entries, ttl_ms, max_entries, now_unix_ms());
        }
        self.schedule_save();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the full map through to the backend immediately (shutdown path).
    pub fn flush(&self) {
        let pairs: Vec<(String, PersistentEntry)> = {
            let entries = self.entries.lock();
            entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        if let Err(e) = self.backend.set(STORAGE_KEY, &pairs) {
            warn!(error = %e, "translation memory write failed");
        } else {
            debug!(entries = pairs.len(), "translation memory flushed");
        }
    }

    /// Collapse rapid mutations into one write per debounce window.
    fn schedule_save(self: &Arc<Self>) {
        if self.save_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let store = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(SAVE_DEBOUNCE) => {
                    store.save_pending.store(false, Ordering::SeqCst);
                    store.flush();
                }
                _ = store.shutdown.cancelled() => {
                    store.save_pending.store(false, Ordering::SeqCst);
                }
            }
        });
    }

    #[cfg(test)]
    pub(crate) fn insert_raw(&self, key: String, entry: PersistentEntry) {
        self.entries.lock().insert(key, entry);
    }

    #[cfg(test)]
    pub(crate) fn entry_mut<R>(
        &self,
        key: &str,
        f: impl FnOnce(&mut PersistentEntry) -> R,
    ) -> Option<R> {
        self.entries.lock().get_mut(key).map(f)
    }

    #[cfg(test)]
    pub(crate) fn contains_key(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }
}

fn prune_locked(
    entries: &mut HashMap<String, PersistentEntry>,
    ttl_ms: i64,
    max_entries: usize,
    now: i64,
) {
    entries.retain(|_, entry| now - entry.cached_at <= ttl_ms);
    if entries.len() > max_entries {
        let excess = entries.len() - max_entries;
        let mut by_use: Vec<(String, i64)> = entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.last_used_at))
            .collect();
        by_use.sort_by_key(|(_, last_used)| *last_used);
        for (key, _) in by_use.into_iter().take(excess) {
            entries.remove(&key);
        }
        debug!(removed = excess, "translation memory size pruned");
    }
}

/// Current wall-clock time in milliseconds.
fn now_unix_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{EphemeralMemory, MemoryError};

    const FP: &str = "tl=en|mode=fallback|ep=|rg=|key=0";
    const TTL: i64 = 30 * 86_400_000;
    const MAX: usize = 100;

    fn ready(text: &str) -> TranslationState {
        TranslationState::Ready {
            source_language: "es".into(),
            text: text.into(),
        }
    }

    fn store_with(backend: Arc<dyn MemoryBackend>) -> Arc<TranslationStore> {
        Arc::new(TranslationStore::new(backend, CancellationToken::new()))
    }

    #[tokio::test]
    async fn remember_then_lookup_round_trips() {
        let store = store_with(Arc::new(EphemeralMemory::new()));
        store.load().await;
        store.remember("hola mundo", FP, &ready("hello world"), TTL, MAX);
        let state = store.lookup("hola mundo", FP, TTL);
        assert_eq!(state, Some(ready("hello world")));
    }

    #[tokio::test]
    async fn lookup_normalizes_whitespace_variants() {
        let store = store_with(Arc::new(EphemeralMemory::new()));
        store.load().await;
        store.remember("  hola   mundo  ", FP, &ready("hello world"), TTL, MAX);
        assert_eq!(store.lookup("hola mundo", FP, TTL), Some(ready("hello world")));
        assert_eq!(
            store.lookup("hola \t mundo", FP, TTL),
            Some(ready("hello world"))
        );
    }

    #[tokio::test]
    async fn lookup_misses_on_fingerprint_change() {
        let store = store_with(Arc::new(EphemeralMemory::new()));
        store.load().await;
        store.remember("hola", FP, &ready("hello"), TTL, MAX);
        assert!(store.lookup("hola", "tl=de|mode=fallback|ep=|rg=|key=0", TTL).is_none());
    }

    #[tokio::test]
    async fn expired_entry_is_removed_on_lookup() {
        let store = store_with(Arc::new(EphemeralMemory::new()));
        store.load().await;
        store.remember("hola", FP, &ready("hello"), TTL, MAX);

        let key = durable_key(FP, "hola");
        store.entry_mut(&key, |entry| {
            entry.cached_at -= TTL + 1;
        });

        assert!(store.lookup("hola", FP, TTL).is_none());
        assert!(!store.contains_key(&key));
    }

    #[tokio::test]
    async fn collision_is_rejected_by_source_equality() {
        let store = store_with(Arc::new(EphemeralMemory::new()));
        store.load().await;

        // Forge an entry under "hola"'s bucket key with a different source.
        let key = durable_key(FP, "hola");
        let now = 1_700_000_000_000;
        store.insert_raw(
            key,
            PersistentEntry {
                normalized_source: "something else".into(),
                translated_text: "wrong".into(),
                source_language: "fr".into(),
                cached_at: now,
                last_used_at: now,
            },
        );

        assert!(store.lookup("hola", FP, i64::MAX / 2).is_none());
    }

    #[tokio::test]
    async fn prune_removes_exactly_the_least_recently_used() {
        let store = store_with(Arc::new(EphemeralMemory::new()));
        store.load().await;

        for (i, text) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            store.remember(text, FP, &ready(text), TTL, MAX);
            let key = durable_key(FP, text);
            store.entry_mut(&key, |entry| {
                entry.last_used_at = 1000 + i as i64;
            });
        }

        store.prune(TTL, 3);
        assert_eq!(store.len(), 3);
        assert!(!store.contains_key(&durable_key(FP, "a")));
        assert!(!store.contains_key(&durable_key(FP, "b")));
        assert!(store.contains_key(&durable_key(FP, "c")));
        assert!(store.contains_key(&durable_key(FP, "e")));
    }

    #[tokio::test]
    async fn only_ready_states_are_remembered() {
        let store = store_with(Arc::new(EphemeralMemory::new()));
        store.load().await;
        store.remember("hola", FP, &TranslationState::error("boom"), TTL, MAX);
        store.remember("hola", FP, &TranslationState::Pending, TTL, MAX);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn load_migrates_from_first_legacy_key_with_entries() {
        let backend = Arc::new(EphemeralMemory::new());
        let entry = PersistentEntry {
            normalized_source: "hola".into(),
            translated_text: "hello".into(),
            source_language: "es".into(),
            cached_at: now_unix_ms(),
            last_used_at: now_unix_ms(),
        };
        backend
            .set(
                LEGACY_STORAGE_KEYS[1],
                &[(durable_key(FP, "hola"), entry)],
            )
            .unwrap();

        let store = store_with(backend);
        store.load().await;
        assert_eq!(store.lookup("hola", FP, TTL), Some(ready("hello")));
    }

    #[tokio::test]
    async fn corrupt_backend_reads_as_empty() {
        struct CorruptBackend;
        impl MemoryBackend for CorruptBackend {
            fn get(
                &self,
                _key: &str,
            ) -> Result<Option<Vec<(String, PersistentEntry)>>, MemoryError> {
                Err(MemoryError::Corrupt("bad json".into()))
            }
            fn set(
                &self,
                _key: &str,
                _entries: &[(String, PersistentEntry)],
            ) -> Result<(), MemoryError> {
                Ok(())
            }
        }

        let store = store_with(Arc::new(CorruptBackend));
        store.load().await;
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_mutations_coalesce_into_one_debounced_save() {
        let backend = Arc::new(EphemeralMemory::new());
        let store = store_with(backend.clone() as Arc<dyn MemoryBackend>);
        store.load().await;

        store.remember("uno", FP, &ready("one"), TTL, MAX);
        store.remember("dos", FP, &ready("two"), TTL, MAX);
        store.remember("tres", FP, &ready("three"), TTL, MAX);

        // Nothing persisted before the debounce window elapses.
        tokio::task::yield_now().await;
        assert!(backend.get(STORAGE_KEY).unwrap().is_none());

        tokio::time::sleep(SAVE_DEBOUNCE + Duration::from_millis(10)).await;
        let persisted = backend.get(STORAGE_KEY).unwrap().unwrap();
        assert_eq!(persisted.len(), 3);
    }

    #[tokio::test]
    async fn flush_persists_immediately() {
        let backend = Arc::new(EphemeralMemory::new());
        let store = store_with(backend.clone() as Arc<dyn MemoryBackend>);
        store.load().await;
        store.remember("hola", FP, &ready("hello"), TTL, MAX);
        store.flush();
        assert_eq!(backend.get(STORAGE_KEY).unwrap().unwrap().len(), 1);
    }
}
