//! Keyless fallback client against the public `translate_a/single` endpoint.
//! Best effort: no credential, no region, no delivery guarantees.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Deserialize;

use super::{BackendError, TranslateBackend, TranslationOutcome};
use crate::settings::Settings;

const ENDPOINT: &str = "https://translate.googleapis.com/translate_a/single";

pub struct GoogleBackend {
    http: reqwest::Client,
}

impl GoogleBackend {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn call(
        &self,
        text: &str,
        settings: &Settings,
    ) -> Result<TranslationOutcome, BackendError> {
        let target = settings.target_language.trim().to_ascii_lowercase();
        let response = self
            .http
            .get(ENDPOINT)
            .query(&[
                ("client", "gtx"),
                ("sl", "auto"),
                ("tl", target.as_str()),
                ("dt", "t"),
                ("dj", "1"),
                ("q", text),
            ])
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(BackendError::Http {
                status,
                message: body.chars().take(200).collect(),
            });
        }
        parse_body(&body)
    }
}

impl TranslateBackend for GoogleBackend {
    fn translate<'a>(
        &'a self,
        text: &'a str,
        settings: &'a Settings,
    ) -> BoxFuture<'a, Result<TranslationOutcome, BackendError>> {
        self.call(text, settings).boxed()
    }
}

/// Parse `{"sentences":[{"trans":...}],"src":...}`, concatenating sentence
/// fragments in order.
fn parse_body(body: &str) -> Result<TranslationOutcome, BackendError> {
    let parsed: GtxResponse =
        serde_json::from_str(body).map_err(|e| BackendError::Parse(e.to_string()))?;
    let sentences = parsed
        .sentences
        .ok_or(BackendError::MissingField("sentences"))?;
    let text: String = sentences
        .iter()
        .filter_map(|sentence| sentence.trans.as_deref())
        .collect();
    if text.is_empty() {
        return Err(BackendError::MissingField("trans"));
    }

    Ok(TranslationOutcome {
        source_language: parsed.src.unwrap_or_default(),
        text,
    })
}

#[derive(Deserialize)]
struct GtxResponse {
    sentences: Option<Vec<GtxSentence>>,
    src: Option<String>,
}

#[derive(Deserialize)]
struct GtxSentence {
    trans: Option<String>,
}
