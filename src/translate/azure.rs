//! Microsoft Translator v3 client (the credentialed primary backend).
//! Endpoint, subscription key, and region come from settings; failures carry
//! the HTTP status and any backend-supplied message.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{BackendError, TranslateBackend, TranslationOutcome};
use crate::settings::Settings;

pub struct AzureBackend {
    http: reqwest::Client,
}

impl AzureBackend {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn call(
        &self,
        text: &str,
        settings: &Settings,
    ) -> Result<TranslationOutcome, BackendError> {
        let url = format!(
            "{}/translate?api-version=3.0&to={}",
            settings.normalized_endpoint(),
            settings.target_language.trim().to_ascii_lowercase()
        );

        let key = settings.primary_api_key.as_deref().unwrap_or_default();
        let mut request = self
            .http
            .post(&url)
            .header("Ocp-Apim-Subscription-Key", key)
            .json(&[TranslateItem { text }]);
        let region = settings.primary_region.trim();
        if !region.is_empty() {
            request = request.header("Ocp-Apim-Subscription-Region", region);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(classify_error_body(status, &body));
        }
        parse_success_body(&body)
    }
}

impl TranslateBackend for AzureBackend {
    fn translate<'a>(
        &'a self,
        text: &'a str,
        settings: &'a Settings,
    ) -> BoxFuture<'a, Result<TranslationOutcome, BackendError>> {
        self.call(text, settings).boxed()
    }
}

/// Parse a 2xx body: `[{detectedLanguage, translations: [{text, to}]}]`.
fn parse_success_body(body: &str) -> Result<TranslationOutcome, BackendError> {
    let parsed: Vec<TranslateResponse> =
        serde_json::from_str(body).map_err(|e| BackendError::Parse(e.to_string()))?;
    let first = parsed
        .into_iter()
        .next()
        .ok_or(BackendError::MissingField("translations"))?;
    let translation = first
        .translations
        .into_iter()
        .next()
        .ok_or(BackendError::MissingField("translations"))?;
    let source_language = first
        .detected_language
        .map(|detected| detected.language)
        .unwrap_or_default();

    Ok(TranslationOutcome {
        source_language,
        text: translation.text,
    })
}

/// Classify a non-2xx body, preferring the structured `{error:{code,message}}`
/// shape and falling back to a raw snippet.
fn classify_error_body(status: u16, body: &str) -> BackendError {
    let message = match serde_json::from_str::<ApiError>(body) {
        Ok(parsed) => {
            debug!(status, code = parsed.error.code, "primary backend error");
            parsed.error.message
        }
        Err(_) => body.chars().take(200).collect(),
    };
    BackendError::Http { status, message }
}

#[derive(Serialize)]
struct TranslateItem<'a> {
    #[serde(rename = "Text")]
    text: &'a str,
}

#[derive(Deserialize)]
struct TranslateResponse {
    #[serde(rename = "detectedLanguage")]
    detected_language: Option<DetectedLanguage>,
    #[serde(default)]
    translations: Vec<Translation>,
}

#[derive(Deserialize)]
struct DetectedLanguage {
    language: String,
}

#[derive(Deserialize)]
struct Translation {
    text: String,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: i64,
    message: String,
}
