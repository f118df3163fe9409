//! Backend selection: mode policy, credential gating, fallback, and the
//! user-facing error surface.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use super::azure::AzureBackend;
use super::google::GoogleBackend;
use super::{BackendError, TranslateBackend, TranslationOutcome, TranslationState};
use crate::settings::{BackendMode, Settings};

/// Shown when the last-resort backend fails. Deliberately generic so
/// transient network detail never reaches the end user.
pub const UNAVAILABLE_MESSAGE: &str = "Translation is currently unavailable. Try again later.";
/// Shown under `PrimaryOnly` with no credential configured.
pub const MISSING_KEY_MESSAGE: &str =
    "Set the Microsoft Translator key in the plugin settings to use this backend.";

pub struct BackendResolver {
    primary: Arc<dyn TranslateBackend>,
    secondary: Arc<dyn TranslateBackend>,
}

impl BackendResolver {
    pub fn new(primary: Arc<dyn TranslateBackend>, secondary: Arc<dyn TranslateBackend>) -> Self {
        Self { primary, secondary }
    }

    /// Standard adapters over one pooled HTTP client.
    pub fn with_default_backends() -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| BackendError::Network(e.to_string()))?;

        Ok(Self::new(
            Arc::new(AzureBackend::new(http.clone())),
            Arc::new(GoogleBackend::new(http)),
        ))
    }

    /// Resolve one translation request according to the configured mode.
    /// Always returns a terminal state.
    pub async fn fetch(&self, text: &str, settings: &Settings) -> TranslationState {
        let request_id = Uuid::new_v4();
        match settings.backend_mode {
            BackendMode::SecondaryOnly => self.try_secondary(request_id, text, settings).await,
            BackendMode::PrimaryOnly => {
                if !settings.has_primary_credential() {
                    return TranslationState::error(MISSING_KEY_MESSAGE);
                }
                match self.primary.translate(text, settings).await {
                    Ok(outcome) => ready(outcome),
                    Err(e) => {
                        warn!(%request_id, error = %e, "primary backend failed");
                        // Authoritative failure: surfaced verbatim, status included.
                        TranslationState::error(format!("Translation failed ({e})"))
                    }
                }
            }
            BackendMode::PrimaryWithFallback => {
                if settings.has_primary_credential() {
                    match self.primary.translate(text, settings).await {
                        Ok(outcome) => return ready(outcome),
                        Err(e) => {
                            debug!(%request_id, error = %e, "primary backend failed, falling back");
                        }
                    }
                }
                self.try_secondary(request_id, text, settings).await
            }
        }
    }

    async fn try_secondary(
        &self,
        request_id: Uuid,
        text: &str,
        settings: &Settings,
    ) -> TranslationState {
        match self.secondary.translate(text, settings).await {
            Ok(outcome) => ready(outcome),
            Err(e) => {
                warn!(%request_id, error = %e, "secondary backend failed");
                TranslationState::error(UNAVAILABLE_MESSAGE)
            }
        }
    }
}

fn ready(outcome: TranslationOutcome) -> TranslationState {
    TranslationState::Ready {
        source_language: outcome.source_language,
        text: outcome.text,
    }
}
