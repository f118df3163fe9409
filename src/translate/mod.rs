//! Translation pipeline: state model, key codec, volatile and durable
//! caches, and backend resolution.

pub mod azure;
pub mod cache;
pub mod google;
pub mod keys;
pub mod resolver;
pub mod store;

use futures_util::future::BoxFuture;
use serde::Serialize;

use crate::settings::Settings;

/// Lifecycle of one message's translation.
/// Only `Ready` and `Error` are terminal; terminal states are cacheable,
/// `Idle`/`Pending` never are.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranslationState {
    Idle,
    Pending,
    Ready {
        source_language: String,
        text: String,
    },
    Error {
        message: String,
    },
}

impl TranslationState {
    pub fn error(message: impl Into<String>) -> Self {
        TranslationState::Error {
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TranslationState::Ready { .. } | TranslationState::Error { .. }
        )
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, TranslationState::Ready { .. })
    }
}

/// Successful backend response.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationOutcome {
    pub source_language: String,
    pub text: String,
}

/// Classified backend failure.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Non-2xx response; `message` carries any backend-supplied human text.
    Http { status: u16, message: String },
    /// Connection-level failure, no status was received.
    Network(String),
    Parse(String),
    MissingField(&'static str),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::Http { status, message } => write!(f, "status {status}: {message}"),
            BackendError::Network(msg) => write!(f, "network: {msg}"),
            BackendError::Parse(msg) => write!(f, "malformed response: {msg}"),
            BackendError::MissingField(field) => write!(f, "response missing {field}"),
        }
    }
}

/// Adapter seam for a concrete translation backend.
pub trait TranslateBackend: Send + Sync {
    fn translate<'a>(
        &'a self,
        text: &'a str,
        settings: &'a Settings,
    ) -> BoxFuture<'a, Result<TranslationOutcome, BackendError>>;
}
