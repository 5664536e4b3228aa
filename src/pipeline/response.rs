//! Response cleanup: turn a VLM reply into typed extraction/detection output.
//!
//! Models asked for "one JSON object and nothing else" still sometimes wrap
//! it in ```json fences, prepend a sentence, use CRLF, or sprinkle zero-width
//! characters into values. The cleanup passes here are deterministic and run
//! before `serde_json` sees the text:
//!
//! 1. Strip outer markdown fences
//! 2. Normalise line endings (CRLF → LF)
//! 3. Remove invisible Unicode
//! 4. Cut from the first opening bracket to the last closing one

use crate::error::StageError;
use crate::geometry::PercentRect;
use crate::queue::ExtractedData;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

/// A field proposed by the detection collaborator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DetectedRegion {
    pub name: String,
    #[serde(flatten)]
    pub rect: PercentRect,
}

/// Parse an extraction reply into name → value.
///
/// Non-string values are stringified (`42.5` → `"42.5"`), `null` becomes an
/// empty string. Which keys are kept is the orchestrator's decision.
pub fn parse_extraction(raw: &str) -> Result<ExtractedData, StageError> {
    let cleaned = clean_response(raw);
    let json = json_slice(&cleaned, '{', '}').ok_or_else(|| malformed(raw, "no JSON object"))?;
    let map: Map<String, Value> =
        serde_json::from_str(json).map_err(|e| malformed(raw, &e.to_string()))?;

    Ok(map
        .into_iter()
        .map(|(k, v)| (k.trim().to_string(), value_to_string(v)))
        .collect())
}

/// Parse a detection reply into proposed fields.
///
/// Accepts a bare array or an object wrapping it under `fields`/`regions`.
/// Elements that are not well-formed fields are skipped with a warning.
pub fn parse_detection(raw: &str) -> Result<Vec<DetectedRegion>, StageError> {
    let cleaned = clean_response(raw);
    let items: Vec<Value> = match json_slice(&cleaned, '[', ']')
        .and_then(|s| serde_json::from_str::<Vec<Value>>(s).ok())
    {
        Some(items) => items,
        None => {
            let json = json_slice(&cleaned, '{', '}').ok_or_else(|| malformed(raw, "no JSON array"))?;
            let mut obj: Map<String, Value> =
                serde_json::from_str(json).map_err(|e| malformed(raw, &e.to_string()))?;
            match obj.remove("fields").or_else(|| obj.remove("regions")) {
                Some(Value::Array(items)) => items,
                _ => return Err(malformed(raw, "no `fields` array")),
            }
        }
    };

    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<DetectedRegion>(item.clone()) {
            Ok(region) => Some(region),
            Err(e) => {
                warn!("Ignoring detected field {}: {}", item, e);
                None
            }
        })
        .collect())
}

/// Apply all cleanup passes to a raw reply.
pub fn clean_response(input: &str) -> String {
    let s = strip_fences(input);
    let s = normalise_line_endings(&s);
    remove_invisible_chars(&s).trim().to_string()
}

fn value_to_string(v: Value) -> String {
    match v {
        Value::String(s) => remove_invisible_chars(s.trim()),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn malformed(raw: &str, why: &str) -> StageError {
    let preview: String = raw.chars().take(120).collect();
    StageError::MalformedResponse {
        detail: format!("{why}; reply began {preview:?}"),
    }
}

// ── Pass 1: Strip outer markdown fences ──────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\s*\n(.*)\n```\s*$").unwrap());

fn strip_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Pass 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Pass 3: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Pass 4: Slice out the JSON payload ───────────────────────────────────────

fn json_slice(input: &str, open: char, close: char) -> Option<&str> {
    let start = input.find(open)?;
    let end = input.rfind(close)?;
    (end > start).then(|| &input[start..=end])
}
