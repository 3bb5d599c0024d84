//! Robust decoding of model output into task predictions
//!
//! Model output is unreliable: the JSON object we ask for may arrive wrapped
//! in a markdown code fence, surrounded by prose, duplicated, truncated, or
//! not at all. `normalize_response` is a total function over that mess - it
//! always yields a well-formed `Prediction`, falling back to the conservative
//! all-false default rather than surfacing an error mid-batch.

use crate::core::Prediction;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// System prompt instructing the model to answer with a single JSON object
pub const EXTRACTION_PROMPT: &str = r#"You are a task detection system. Given a chat message, decide whether it contains an actionable task and, if so, extract a short summary of that task.

Respond with JSON only (no markdown, no explanation):
{"is_task": true or false, "confidence": 0.0-1.0, "task": "short imperative summary, or empty string when there is no task"}

Examples:
message: "Can you buy milk on your way home?" -> {"is_task": true, "confidence": 0.9, "task": "Buy milk"}
message: "lol that was hilarious" -> {"is_task": false, "confidence": 0.95, "task": ""}"#;

/// Matches a code fence wrapping the entire text, with an optional language tag
static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)\r?\n?```$").unwrap());

/// Decode raw model output into a `Prediction`.
///
/// Fallback chain, first success wins:
/// 1. empty input -> default prediction
/// 2. strip a whole-text code fence, if any
/// 3. parse the candidate directly as a JSON object
/// 4. scan for balanced brace-delimited fragments, earliest parseable object wins
/// 5. default prediction
pub fn normalize_response(raw: &str) -> Prediction {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Prediction::default();
    }

    let candidate = strip_code_fence(trimmed);

    if let Some(prediction) = parse_object(candidate) {
        return prediction;
    }

    for fragment in brace_fragments(candidate) {
        if let Some(prediction) = parse_object(fragment) {
            return prediction;
        }
    }

    Prediction::default()
}

/// Strip a code fence wrapping the whole text, returning the interior
fn strip_code_fence(text: &str) -> &str {
    FENCE_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or(text)
}

/// Parse a candidate as a JSON object; lists and scalars are rejected
fn parse_object(candidate: &str) -> Option<Prediction> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Some(coerce_prediction(&map)),
        _ => None,
    }
}

/// Collect balanced brace-delimited substrings in order of appearance.
///
/// Depth counting handles nested objects; braces are ASCII so byte slicing
/// stays on char boundaries.
fn brace_fragments(text: &str) -> Vec<&str> {
    let mut fragments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;

    for (i, byte) in text.bytes().enumerate() {
        match byte {
            b'{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            b'}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        fragments.push(&text[start..=i]);
                    }
                }
            }
            _ => {}
        }
    }

    fragments
}

fn coerce_prediction(map: &serde_json::Map<String, Value>) -> Prediction {
    Prediction {
        is_task: coerce_is_task(map.get("is_task")),
        confidence: coerce_confidence(map.get("confidence")),
        task: coerce_task(map.get("task")),
    }
}

/// Coerce any JSON shape to a definite boolean.
///
/// Booleans map directly, numbers are true iff nonzero, strings are matched
/// case-insensitively against a small truthy set. Every other shape
/// (including an absent key) is false.
fn coerce_is_task(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(s)) => matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "y" | "t"
        ),
        _ => false,
    }
}

/// Coerce a confidence value to a number in [0, 1], defaulting to 0.0
fn coerce_confidence(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(f) if f.is_finite() => f.clamp(0.0, 1.0),
        _ => 0.0,
    }
}

/// Coerce a task value to a string; missing/null become empty, non-string
/// values are stringified
fn coerce_task(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
