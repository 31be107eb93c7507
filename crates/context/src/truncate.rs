//! Output truncation.
//!
//! `smart_truncate` keeps the head and tail of an oversized string with an
//! omission marker between them. `truncate_tool_result` caps the well-known
//! fields of tool observations before they enter the conversation.

use serde_json::Value;

/// Head share of the character budget.
const HEAD_FRACTION: f64 = 0.7;
/// Tail share of the character budget.
const TAIL_FRACTION: f64 = 0.2;

/// Serialized-size threshold above which a whole observation is flattened
/// into truncated JSON text.
const RESULT_JSON_CAP: usize = 3_000;
const RESULT_JSON_SLACK: usize = 1_000;

const CONTENT_CAP: usize = 4_000;
const STDOUT_CAP: usize = 2_000;
const STDERR_CAP: usize = 1_000;
const FILES_CAP: usize = 80;
const MATCHES_CAP: usize = 30;

/// Truncate a string to at most `max` characters, keeping 70% head and 20%
/// tail around an omission marker. Strings within the limit are returned
/// unchanged.
pub fn smart_truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }

    let head_len = floor_char_boundary(text, (max as f64 * HEAD_FRACTION) as usize);
    let tail_len = (max as f64 * TAIL_FRACTION) as usize;
    let tail_start = ceil_char_boundary(text, text.len().saturating_sub(tail_len));
    let omitted = tail_start - head_len;

    format!(
        "{}… [{} characters omitted] …{}",
        &text[..head_len],
        omitted,
        &text[tail_start..]
    )
}

/// Truncate a tool observation before it is recorded.
///
/// Object results get per-field caps (`content`, `stdout`, `stderr`, `files`,
/// `matches`); if the serialised object is still oversized the whole JSON is
/// smart-truncated into a string. Plain strings get the `content` cap.
pub fn truncate_tool_result(result: &Value) -> Value {
    let truncated = match result {
        Value::Object(map) => {
            let mut out = map.clone();
            cap_string_field(&mut out, "content", CONTENT_CAP);
            cap_string_field(&mut out, "stdout", STDOUT_CAP);
            cap_string_field(&mut out, "stderr", STDERR_CAP);
            cap_array_field(&mut out, "files", FILES_CAP);
            if cap_array_field(&mut out, "matches", MATCHES_CAP) {
                out.insert(
                    "note".into(),
                    Value::String(format!("matches truncated to first {MATCHES_CAP}")),
                );
            }
            Value::Object(out)
        }
        Value::String(s) => Value::String(smart_truncate(s, CONTENT_CAP)),
        other => other.clone(),
    };

    let serialized = truncated.to_string();
    if serialized.len() > RESULT_JSON_CAP + RESULT_JSON_SLACK {
        Value::String(smart_truncate(&serialized, RESULT_JSON_CAP))
    } else {
        truncated
    }
}

fn cap_string_field(map: &mut serde_json::Map<String, Value>, key: &str, cap: usize) {
    let capped = match map.get(key) {
        Some(Value::String(s)) if s.len() > cap => smart_truncate(s, cap),
        _ => return,
    };
    map.insert(key.to_string(), Value::String(capped));
}

/// Returns true when the array was actually shortened.
fn cap_array_field(map: &mut serde_json::Map<String, Value>, key: &str, cap: usize) -> bool {
    if let Some(Value::Array(items)) = map.get_mut(key)
        && items.len() > cap
    {
        items.truncate(cap);
        return true;
    }
    false
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    index = index.min(s.len());
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(s: &str, mut index: usize) -> usize {
    index = index.min(s.len());
    while index < s.len() && !s.is_char_boundary(index) {
        index += 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn short_string_untouched() {
        assert_eq!(smart_truncate("hello", 100), "hello");
    }

    #[test]
    fn long_string_keeps_head_and_tail() {
        let text: String = (0..1000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let out = smart_truncate(&text, 100);
        assert!(out.starts_with(&text[..70]));
        assert!(out.ends_with(&text[text.len() - 20..]));
        assert!(out.contains("characters omitted"));
    }

    #[test]
    fn truncation_respects_utf8_boundaries() {
        let text = "é".repeat(500);
        let out = smart_truncate(&text, 100);
        assert!(out.contains("characters omitted"));
        // Must not panic and must remain valid UTF-8 (implicit).
        assert!(!out.is_empty());
    }

    #[test]
    fn content_field_capped() {
        let result = json!({ "content": "x".repeat(10_000) });
        let out = truncate_tool_result(&result);
        let content = out["content"].as_str().unwrap();
        assert!(content.len() < 10_000);
        assert!(content.contains("characters omitted"));
    }

    #[test]
    fn stdout_and_stderr_capped_separately() {
        let result = json!({
            "stdout": "o".repeat(5_000),
            "stderr": "e".repeat(5_000),
        });
        let out = truncate_tool_result(&result);
        assert!(out["stdout"].as_str().unwrap().len() <= STDOUT_CAP + 40);
        assert!(out["stderr"].as_str().unwrap().len() <= STDERR_CAP + 40);
    }

    #[test]
    fn files_array_capped_without_note() {
        let files: Vec<Value> = (0..200).map(|i| json!(format!("f{i}.rs"))).collect();
        let out = truncate_tool_result(&json!({ "files": files }));
        assert_eq!(out["files"].as_array().unwrap().len(), FILES_CAP);
        assert!(out.get("note").is_none());
    }

    #[test]
    fn matches_array_capped_with_note() {
        let matches: Vec<Value> = (0..100).map(|i| json!(format!("line {i}"))).collect();
        let out = truncate_tool_result(&json!({ "matches": matches }));
        assert_eq!(out["matches"].as_array().unwrap().len(), MATCHES_CAP);
        assert!(out["note"].as_str().unwrap().contains("30"));
    }

    #[test]
    fn oversized_object_flattens_to_string() {
        // Many large fields that are not individually capped.
        let mut obj = serde_json::Map::new();
        for i in 0..10 {
            obj.insert(format!("blob{i}"), json!("z".repeat(1_000)));
        }
        let out = truncate_tool_result(&Value::Object(obj));
        assert!(out.is_string());
        assert!(out.as_str().unwrap().contains("characters omitted"));
    }

    #[test]
    fn small_object_passes_through() {
        let result = json!({ "ok": true, "content": "small" });
        assert_eq!(truncate_tool_result(&result), result);
    }
}
