//! Memory key codec.
//! The durable key is content-addressed (`fingerprint:len:hash` over
//! normalized text, shared across messages with identical text); the
//! volatile key is message-addressed. The asymmetry is intentional: durable
//! memory is reusable across messages, the volatile cache is not.

use regex::Regex;

/// Trim and collapse internal whitespace runs to a single space.
/// Idempotent: `normalize(normalize(t)) == normalize(t)`.
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fixed-width hex digest of the input. Deterministic across restarts.
/// Collisions are tolerated: the durable store re-checks the stored source.
pub fn content_hash(text: &str) -> String {
    let digest = blake3::hash(text.as_bytes());
    digest.to_hex().as_str()[..16].to_string()
}

/// Durable lookup key: `fingerprint:normalizedLength:hashHex`.
/// Normalizes internally, so any whitespace variant of the same text maps to
/// the same key.
pub fn durable_key(fingerprint: &str, text: &str) -> String {
    let normalized = normalize(text);
    format!(
        "{}:{}:{}",
        fingerprint,
        normalized.len(),
        content_hash(&normalized)
    )
}

/// Volatile per-message key: `messageId:rawSourceText:fingerprint`.
/// Identical text in two messages does not collide here.
pub fn volatile_key(message_id: &str, raw_source: &str, fingerprint: &str) -> String {
    format!("{message_id}:{raw_source}:{fingerprint}")
}

/// Trivial content-worthiness screen. Messages that are only whitespace,
/// only custom emote codes, or only links never enter the pipeline.
pub struct ContentScreen {
    emote_only: Regex,
    link_only: Regex,
}

impl ContentScreen {
    pub fn new() -> Self {
        Self {
            // Custom emote codes like <:name:123> / <a:name:123>
            emote_only: Regex::new(r"^(?:<a?:\w+:\d+>|\s)+$").unwrap(),
            link_only: Regex::new(r"^(?:https?://\S+|\s)+$").unwrap(),
        }
    }

    pub fn is_translation_worthy(&self, text: &str) -> bool {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return false;
        }
        !self.emote_only.is_match(trimmed) && !self.link_only.is_match(trimmed)
    }
}

impl Default for ContentScreen {
    fn default() -> Self {
        Self::new()
    }
}
