//! Shared types for the Torale task execution runtime: the crate-level error
//! enum, structured logging init, and defensive JSONB helpers used by every
//! repository that reads `result`/`grounding_sources`/`last_known_state`/
//! `payload` columns.

pub mod logging;

use serde_json::Value;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum ToraleError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Webhook error: {0}")]
    Webhook(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),
}

pub type Result<T> = std::result::Result<T, ToraleError>;

/// Parse a JSONB column that the driver may hand back as an already-decoded
/// value, a raw string, or nothing at all. Corrupt JSON and unexpected shapes
/// are logged and coerced to `default` rather than propagated, matching the
/// defensive-reader design note in SPEC_FULL.md §9.
pub fn parse_jsonb_text(raw: Option<&str>, field: &str, default: Value) -> Value {
    match raw {
        None => default,
        Some(text) if text.trim().is_empty() => default,
        Some(text) => match serde_json::from_str::<Value>(text) {
            Ok(value) => value,
            Err(err) => {
                warn!(field, error = %err, "corrupt JSONB column, falling back to default");
                default
            }
        },
    }
}

/// Canonicalize a JSON value for writing: object keys sorted so that two
/// semantically equal payloads serialize identically (relevant anywhere a
/// payload's bytes are hashed or signed, e.g. the webhook HMAC body).
pub fn canonical_json(value: &Value) -> String {
    fn sort(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<_> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let mut sorted = serde_json::Map::new();
                for (k, v) in entries {
                    sorted.insert(k.clone(), sort(v));
                }
                Value::Object(sorted)
            }
            Value::Array(items) => Value::Array(items.iter().map(sort).collect()),
            other => other.clone(),
        }
    }
    serde_json::to_string(&sort(value)).unwrap_or_else(|_| "null".to_string())
}

/// Truncate evidence text for prompt rendering, appending an ellipsis when
/// the text was cut. Operates on chars, not bytes, so multi-byte UTF-8 text
/// is never split mid-codepoint.
pub fn truncate_evidence(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push('…');
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_jsonb_text_missing_falls_back() {
        let default = serde_json::json!({"evidence": ""});
        assert_eq!(parse_jsonb_text(None, "result", default.clone()), default);
    }

    #[test]
    fn parse_jsonb_text_corrupt_falls_back() {
        let default = serde_json::json!([]);
        let parsed = parse_jsonb_text(Some("{not json"), "grounding_sources", default.clone());
        assert_eq!(parsed, default);
    }

    #[test]
    fn parse_jsonb_text_valid_roundtrips() {
        let value = parse_jsonb_text(Some(r#"{"a":1}"#), "result", Value::Null);
        assert_eq!(value, serde_json::json!({"a": 1}));
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn truncate_evidence_under_limit_unchanged() {
        assert_eq!(truncate_evidence("short", 300), "short");
    }

    #[test]
    fn truncate_evidence_over_limit_gets_ellipsis() {
        let text = "x".repeat(310);
        let truncated = truncate_evidence(&text, 300);
        assert_eq!(truncated.chars().count(), 301);
        assert!(truncated.ends_with('…'));
    }
}
