//! Payload scrubber.
//!
//! Grounded on `backend/app/utils/payload_scrubber.py`. Redacts, truncates,
//! or passes through JSON fields by (lower-cased) key name before a payload
//! is handed to the timeline bus or response logging.

use std::collections::HashSet;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Settings controlling how sensitive payload fields are sanitized.
///
/// Field-name sets are matched case-insensitively; construct with whatever
/// casing is convenient and call [`ScrubberSettings::normalized`] once up
/// front (mirrors the original's `ScrubberSettings.normalized()`).
#[derive(Debug, Clone)]
pub struct ScrubberSettings {
    pub redact_fields: HashSet<String>,
    pub truncate_fields: HashSet<String>,
    pub passthrough_fields: HashSet<String>,
    pub max_truncate_length: usize,
    pub mask: String,
    pub hash_mask: bool,
    pub debug_truncation_enabled: bool,
}

impl ScrubberSettings {
    pub fn normalized(&self) -> Self {
        Self {
            redact_fields: lower_all(&self.redact_fields),
            truncate_fields: lower_all(&self.truncate_fields),
            passthrough_fields: lower_all(&self.passthrough_fields),
            max_truncate_length: self.max_truncate_length,
            mask: self.mask.clone(),
            hash_mask: self.hash_mask,
            debug_truncation_enabled: self.debug_truncation_enabled,
        }
    }
}

fn lower_all(fields: &HashSet<String>) -> HashSet<String> {
    fields.iter().map(|f| f.to_lowercase()).collect()
}

/// Truncate `text` to `max_length` chars, appending an ellipsis if needed.
pub fn truncate_text(text: &str, max_length: usize) -> String {
    if max_length == 0 {
        return String::new();
    }
    let char_count = text.chars().count();
    if char_count <= max_length {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_length).collect();
    truncated.push('\u{2026}');
    truncated
}

/// Deterministic hash label for logging without leaking payload contents.
///
/// The original hashes Python's `repr(value)`; there is no equivalent
/// canonical "repr" for an arbitrary `serde_json::Value`, so this hashes the
/// value's compact JSON rendering instead. Still deterministic and still
/// unrecoverable, which is the property the timeline bus relies on.
fn hash_value(value: &Value) -> String {
    let stringified = value.to_string();
    let mut hasher = Sha256::new();
    hasher.update(stringified.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    format!("[hash:{hex}]")
}

/// Return a sanitized copy of `payload` based on `settings`.
///
/// `debug_truncation_override`: `None` uses `settings.debug_truncation_enabled`;
/// `Some(false)` forces full redaction of truncate-fields; `Some(true)` emits
/// truncated values for truncate-fields even if settings disable it.
pub fn scrub_payload(
    payload: &Value,
    settings: &ScrubberSettings,
    debug_truncation_override: Option<bool>,
) -> Value {
    let normalized = settings.normalized();
    let allow_truncation = debug_truncation_override.unwrap_or(normalized.debug_truncation_enabled);
    scrub(payload, &normalized, allow_truncation)
}

fn scrub(value: &Value, settings: &ScrubberSettings, allow_truncation: bool) -> Value {
    match value {
        Value::Object(map) => {
            let mut result = serde_json::Map::with_capacity(map.len());
            for (key, child) in map {
                let lower_key = key.to_lowercase();

                if settings.passthrough_fields.contains(&lower_key) {
                    result.insert(key.clone(), scrub(child, settings, allow_truncation));
                    continue;
                }

                if settings.redact_fields.contains(&lower_key) {
                    let masked = if settings.hash_mask {
                        Value::String(hash_value(child))
                    } else {
                        Value::String(settings.mask.clone())
                    };
                    result.insert(key.clone(), masked);
                    continue;
                }

                if settings.truncate_fields.contains(&lower_key) {
                    let replacement = match child {
                        Value::String(text) if allow_truncation => {
                            Value::String(truncate_text(text, settings.max_truncate_length))
                        }
                        _ if settings.hash_mask => Value::String(hash_value(child)),
                        _ => Value::String(settings.mask.clone()),
                    };
                    result.insert(key.clone(), replacement);
                    continue;
                }

                result.insert(key.clone(), scrub(child, settings, allow_truncation));
            }
            Value::Object(result)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| scrub(item, settings, allow_truncation))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// The scrubber configuration the timeline bus applies to every event
/// payload before publishing, matching `DEFAULT_TIMELINE_SCRUBBER`.
pub fn default_timeline_scrubber() -> ScrubberSettings {
    ScrubberSettings {
        redact_fields: ["email", "user_id", "access_token", "refresh_token"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        truncate_fields: ["prompt", "response_fragment", "llm_input", "llm_output"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        passthrough_fields: ["query", "asin", "product_id", "score", "step"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        max_truncate_length: 512,
        mask: "[scrubbed]".to_string(),
        hash_mask: true,
        debug_truncation_enabled: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truncate_appends_ellipsis() {
        assert_eq!(truncate_text("hello world", 5), "hello\u{2026}");
        assert_eq!(truncate_text("hi", 5), "hi");
        assert_eq!(truncate_text("hi", 0), "");
    }

    #[test]
    fn redact_fields_are_hashed_by_default() {
        let settings = default_timeline_scrubber();
        let payload = json!({"email": "a@b.com", "step": "search.start"});
        let scrubbed = scrub_payload(&payload, &settings, None);
        let email = scrubbed.get("email").unwrap().as_str().unwrap();
        assert!(email.starts_with("[hash:"));
        assert_eq!(scrubbed.get("step").unwrap(), "search.start");
    }

    #[test]
    fn truncate_fields_hash_when_truncation_disabled() {
        let settings = default_timeline_scrubber();
        let payload = json!({"prompt": "a".repeat(1000)});
        let scrubbed = scrub_payload(&payload, &settings, None);
        let prompt = scrubbed.get("prompt").unwrap().as_str().unwrap();
        assert!(prompt.starts_with("[hash:"));
    }

    #[test]
    fn truncate_fields_truncate_when_override_enabled() {
        let settings = default_timeline_scrubber();
        let long = "a".repeat(1000);
        let payload = json!({"prompt": long});
        let scrubbed = scrub_payload(&payload, &settings, Some(true));
        let prompt = scrubbed.get("prompt").unwrap().as_str().unwrap();
        assert_eq!(prompt.chars().count(), 513);
        assert!(prompt.ends_with('\u{2026}'));
    }

    #[test]
    fn passthrough_fields_survive_untouched() {
        let settings = default_timeline_scrubber();
        let payload = json!({"query": "smart speaker", "asin": "B000000000"});
        let scrubbed = scrub_payload(&payload, &settings, None);
        assert_eq!(scrubbed, payload);
    }

    #[test]
    fn nested_objects_and_arrays_are_recursed() {
        let settings = default_timeline_scrubber();
        let payload = json!({
            "step": "search.products",
            "results": [
                {"email": "leak@example.com", "query": "kept"}
            ]
        });
        let scrubbed = scrub_payload(&payload, &settings, None);
        let first = &scrubbed["results"][0];
        assert!(first["email"].as_str().unwrap().starts_with("[hash:"));
        assert_eq!(first["query"], "kept");
    }

    #[test]
    fn unknown_fields_pass_through_recursively() {
        let settings = default_timeline_scrubber();
        let payload = json!({"anything": {"nested": 42}});
        let scrubbed = scrub_payload(&payload, &settings, None);
        assert_eq!(scrubbed, payload);
    }
}
