//! Settings snapshot and config fingerprint.
//! The fingerprint is the stable identity of "what configuration produced
//! this translation"; it participates in every cache key, so a settings
//! change orphans old entries without a physical purge.

use serde::{Deserialize, Serialize};

/// Which backend(s) the resolver may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    PrimaryOnly,
    SecondaryOnly,
    #[default]
    PrimaryWithFallback,
}

impl BackendMode {
    fn tag(self) -> &'static str {
        match self {
            BackendMode::PrimaryOnly => "primary",
            BackendMode::SecondaryOnly => "secondary",
            BackendMode::PrimaryWithFallback => "fallback",
        }
    }
}

/// Read-only snapshot of the host's translation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub target_language: String,
    pub backend_mode: BackendMode,
    pub primary_api_key: Option<String>,
    pub primary_region: String,
    pub primary_endpoint: String,
    pub only_translate_visible: bool,
    pub max_concurrent_requests: usize,
    pub persistent_cache_enabled: bool,
    pub ttl_days: u32,
    pub max_entries: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            target_language: "en".into(),
            backend_mode: BackendMode::PrimaryWithFallback,
            primary_api_key: None,
            primary_region: String::new(),
            primary_endpoint: "https://api.cognitive.microsofttranslator.com".into(),
            only_translate_visible: false,
            max_concurrent_requests: 4,
            persistent_cache_enabled: true,
            ttl_days: 30,
            max_entries: 10_000,
        }
    }
}

impl Settings {
    pub fn has_primary_credential(&self) -> bool {
        self.primary_api_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty())
    }

    pub fn normalized_endpoint(&self) -> String {
        self.primary_endpoint
            .trim()
            .trim_end_matches('/')
            .to_ascii_lowercase()
    }

    pub fn ttl_ms(&self) -> i64 {
        i64::from(self.ttl_days) * 86_400_000
    }

    /// Order-stable fingerprint over the output-affecting fields.
    /// Only credential *presence* participates, so rotating a key for the
    /// same backend keeps the durable memory valid.
    pub fn fingerprint(&self) -> String {
        format!(
            "tl={}|mode={}|ep={}|rg={}|key={}",
            self.target_language.trim().to_ascii_lowercase(),
            self.backend_mode.tag(),
            self.normalized_endpoint(),
            self.primary_region.trim().to_ascii_lowercase(),
            u8::from(self.has_primary_credential()),
        )
    }
}
