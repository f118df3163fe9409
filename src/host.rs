//! Host interface boundary.
//! The engine never mutates host-owned message objects; every visible change
//! goes through `HostAdapter::apply_content`, and visibility signals come
//! back in through the activity tracker.

use serde::{Deserialize, Serialize};

/// Per-visible-message invocation payload from the host UI layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRef {
    pub message_id: String,
    pub channel_id: String,
    pub content: String,
    pub author_id: String,
}

/// Content patch applied to a displayed message.
/// `original_content` / `translated_content` mirror the engine's side-table
/// so the host can render a toggle affordance; both are cleared when the
/// pristine content is restored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPatch {
    pub content: String,
    pub original_content: Option<String>,
    pub translated_content: Option<String>,
}

#[derive(Debug)]
pub enum HostError {
    /// The target message no longer exists in the host's state.
    UnknownMessage,
    Other(String),
}

impl std::fmt::Display for HostError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostError::UnknownMessage => write!(f, "message not present in host state"),
            HostError::Other(msg) => write!(f, "host error: {msg}"),
        }
    }
}

/// Adapter implemented by the host.
/// `apply_content` failures are absorbed by the caller; a host without
/// visibility detection keeps the default hooks and every message counts as
/// visible.
pub trait HostAdapter: Send + Sync {
    /// Write a content change back into the host's message state.
    fn apply_content(
        &self,
        channel_id: &str,
        message_id: &str,
        patch: &ContentPatch,
    ) -> Result<(), HostError>;

    /// Whether this host can report per-message visibility.
    fn supports_visibility(&self) -> bool {
        false
    }

    /// Start observing a message element for visibility changes.
    fn observe(&self, _message_id: &str) {}

    /// Stop observing a message element.
    fn unobserve(&self, _message_id: &str) {}
}
