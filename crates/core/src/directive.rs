//! The directive sum type and its staged parsers.
//!
//! Every assistant turn must produce exactly one `Directive`. The strict
//! parser extracts the largest balanced JSON object from the raw reply and
//! deserialises it against the tagged union. Two lower-precedence salvage
//! stages follow: a key-value regex pass for replies like `action="read_file"
//! args={...}`, and a heuristic pass that maps imperative English onto an
//! action or thought. A reply that survives none of the stages is reported as
//! `ParseOutcome::Unparsed` and the engine injects a format reminder.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

/// One sub-task inside a `delegate` directive. The model may emit a bare
/// string or an object carrying an explicit model hint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskSpec {
    Text(String),
    Detailed {
        task: String,
        #[serde(default)]
        model: Option<String>,
    },
}

impl TaskSpec {
    pub fn text(&self) -> &str {
        match self {
            Self::Text(t) => t,
            Self::Detailed { task, .. } => task,
        }
    }

    pub fn model_hint(&self) -> Option<&str> {
        match self {
            Self::Text(_) => None,
            Self::Detailed { model, .. } => model.as_deref(),
        }
    }
}

/// The assistant's per-turn output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Directive {
    Thought {
        content: String,
    },
    Action {
        tool: String,
        #[serde(default)]
        args: Value,
    },
    #[serde(rename_all = "camelCase")]
    DiffRequest {
        file_path: String,
        diff: String,
    },
    Delegate {
        tasks: Vec<TaskSpec>,
    },
    Final {
        content: String,
    },
}

impl Directive {
    /// Serialise back to the canonical JSON text recorded in the conversation.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Result of running the staged parsers over a raw model reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Directive(Directive),
    /// Nothing parseable; the raw text should be pushed as an assistant
    /// message followed by a user-role JSON-format reminder.
    Unparsed,
}

/// Staged directive parser. Stateless; a single instance is shared.
#[derive(Debug, Default, Clone)]
pub struct DirectiveParser;

static KV_ACTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)action\s*[=:]\s*"?([A-Za-z_][A-Za-z0-9_:-]*)"?(?:.*?args\s*[=:]\s*(\{.*\}))?"#)
        .expect("kv action regex")
});

static RUN_CMD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\brun\s+`([^`]+)`").expect("run cmd regex"));

static READ_FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bread\s+(?:the\s+)?file\s+[`"']?([\w./\\-]+)[`"']?"#).expect("read file regex")
});

static SEARCH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bsearch\s+for\s+[`"']?([^`"'\n]+?)[`"']?(?:\s+in\b|[.!]|$)"#)
        .expect("search regex")
});

static LIST_FILES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\blist\s+(?:the\s+)?files\s+in\s+[`"']?([\w./\\-]+)[`"']?"#)
        .expect("list files regex")
});

impl DirectiveParser {
    pub fn new() -> Self {
        Self
    }

    /// Run all stages in precedence order.
    pub fn parse(&self, raw: &str) -> ParseOutcome {
        if let Some(d) = self.parse_strict(raw) {
            return ParseOutcome::Directive(d);
        }
        if let Some(d) = self.salvage_key_value(raw) {
            return ParseOutcome::Directive(d);
        }
        if let Some(d) = self.salvage_heuristic(raw) {
            return ParseOutcome::Directive(d);
        }
        ParseOutcome::Unparsed
    }

    /// Stage 1: strip wrappers, extract the largest balanced JSON object,
    /// and deserialise it strictly against the tagged union.
    pub fn parse_strict(&self, raw: &str) -> Option<Directive> {
        let stripped = strip_wrappers(raw);
        let candidate = largest_json_object(&stripped)?;

        if let Ok(d) = serde_json::from_str::<Directive>(candidate) {
            return Some(d);
        }

        // Lenient object shapes: {"action": "x", "args": {...}} and
        // {"tool": "x", "args": {...}} without a discriminator.
        let value: Value = serde_json::from_str(candidate).ok()?;
        let obj = value.as_object()?;
        let tool = obj
            .get("action")
            .or_else(|| obj.get("tool"))
            .and_then(Value::as_str)?;
        // "action":"thought"-style shapes are not tool invocations.
        if matches!(tool, "thought" | "final" | "diff_request" | "delegate") {
            return None;
        }
        let args = obj.get("args").cloned().unwrap_or(Value::Object(Default::default()));
        Some(Directive::Action {
            tool: tool.to_string(),
            args,
        })
    }

    /// Stage 2: regex key-value salvage, e.g. `action="read_file" args={...}`.
    pub fn salvage_key_value(&self, raw: &str) -> Option<Directive> {
        let caps = KV_ACTION_RE.captures(raw)?;
        let tool = caps.get(1)?.as_str().to_string();
        let args = caps
            .get(2)
            .and_then(|m| largest_json_object(m.as_str()))
            .and_then(|s| serde_json::from_str::<Value>(s).ok())
            .unwrap_or(Value::Object(Default::default()));
        Some(Directive::Action { tool, args })
    }

    /// Stage 3: heuristic salvage of imperative English.
    pub fn salvage_heuristic(&self, raw: &str) -> Option<Directive> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        if let Some(caps) = READ_FILE_RE.captures(trimmed) {
            return Some(Directive::Action {
                tool: "read_file".into(),
                args: serde_json::json!({ "path": caps[1].to_string() }),
            });
        }
        if let Some(caps) = RUN_CMD_RE.captures(trimmed) {
            return Some(Directive::Action {
                tool: "run_command".into(),
                args: serde_json::json!({ "command": caps[1].to_string() }),
            });
        }
        if let Some(caps) = LIST_FILES_RE.captures(trimmed) {
            return Some(Directive::Action {
                tool: "list_files".into(),
                args: serde_json::json!({ "path": caps[1].to_string() }),
            });
        }
        if let Some(caps) = SEARCH_RE.captures(trimmed) {
            return Some(Directive::Action {
                tool: "grep_search".into(),
                args: serde_json::json!({ "pattern": caps[1].trim().to_string() }),
            });
        }

        let lower = trimmed.to_lowercase();
        if lower.starts_with("let me") || lower.starts_with("my plan") || lower.starts_with("i will")
        {
            return Some(Directive::Thought {
                content: trimmed.to_string(),
            });
        }

        None
    }
}

/// Strip fenced code blocks and assistant-channel markers that models wrap
/// around their JSON.
fn strip_wrappers(raw: &str) -> String {
    let mut text = raw.trim().to_string();

    // ```json ... ``` or ``` ... ```: take the fenced body if one exists.
    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        if let Some(end) = after[body_start..].find("```") {
            text = after[body_start..body_start + end].trim().to_string();
        }
    }

    // Assistant-channel markers (harmony-style output).
    for marker in ["<|channel|>", "<|message|>", "<|end|>", "<|start|>"] {
        text = text.replace(marker, "\n");
    }

    text
}

/// Find the largest balanced `{...}` region in `text`, string-aware.
fn largest_json_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut best: Option<(usize, usize)> = None;
    let mut stack: Vec<usize> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => stack.push(i),
            b'}' => {
                if let Some(start) = stack.pop() {
                    // Only top-level objects are candidates.
                    if stack.is_empty() {
                        let len = i + 1 - start;
                        if best.map_or(true, |(s, e)| e - s < len) {
                            best = Some((start, i + 1));
                        }
                    }
                }
            }
            _ => {}
        }
    }

    best.map(|(s, e)| &text[s..e])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> DirectiveParser {
        DirectiveParser::new()
    }

    #[test]
    fn strict_thought() {
        let out = parser().parse(r#"{"type":"thought","content":"PLAN:\n1. Read"}"#);
        assert_eq!(
            out,
            ParseOutcome::Directive(Directive::Thought {
                content: "PLAN:\n1. Read".into()
            })
        );
    }

    #[test]
    fn strict_action_with_args() {
        let out = parser().parse(r#"{"type":"action","tool":"read_file","args":{"path":"src/a.ts"}}"#);
        match out {
            ParseOutcome::Directive(Directive::Action { tool, args }) => {
                assert_eq!(tool, "read_file");
                assert_eq!(args["path"], "src/a.ts");
            }
            other => panic!("expected action, got {other:?}"),
        }
    }

    #[test]
    fn strict_diff_request_camel_case() {
        let out =
            parser().parse(r#"{"type":"diff_request","filePath":"src/a.ts","diff":"--- a\n+++ b"}"#);
        match out {
            ParseOutcome::Directive(Directive::DiffRequest { file_path, .. }) => {
                assert_eq!(file_path, "src/a.ts");
            }
            other => panic!("expected diff_request, got {other:?}"),
        }
    }

    #[test]
    fn strict_final_roundtrips() {
        let d = Directive::Final {
            content: "done".into(),
        };
        let json = d.to_json();
        assert!(json.contains(r#""type":"final""#));
        let out = parser().parse(&json);
        assert_eq!(out, ParseOutcome::Directive(d));
    }

    #[test]
    fn delegate_accepts_strings_and_objects() {
        let out = parser().parse(
            r#"{"type":"delegate","tasks":["fix the tests",{"task":"check screenshot","model":"llava"}]}"#,
        );
        match out {
            ParseOutcome::Directive(Directive::Delegate { tasks }) => {
                assert_eq!(tasks.len(), 2);
                assert_eq!(tasks[0].text(), "fix the tests");
                assert_eq!(tasks[1].model_hint(), Some("llava"));
            }
            other => panic!("expected delegate, got {other:?}"),
        }
    }

    #[test]
    fn fenced_json_is_unwrapped() {
        let raw = "Here you go:\n```json\n{\"type\":\"final\",\"content\":\"ok\"}\n```";
        let out = parser().parse(raw);
        assert_eq!(
            out,
            ParseOutcome::Directive(Directive::Final { content: "ok".into() })
        );
    }

    #[test]
    fn largest_object_wins_over_smaller() {
        let raw = r#"{"x":1} and then {"type":"thought","content":"the bigger object"}"#;
        let out = parser().parse(raw);
        assert!(matches!(
            out,
            ParseOutcome::Directive(Directive::Thought { .. })
        ));
    }

    #[test]
    fn braces_inside_strings_do_not_break_balance() {
        let raw = r#"{"type":"thought","content":"code: fn main() { println!(\"{}\"); }"}"#;
        let out = parser().parse(raw);
        assert!(matches!(
            out,
            ParseOutcome::Directive(Directive::Thought { .. })
        ));
    }

    #[test]
    fn lenient_action_object_without_type() {
        let out = parser().parse(r#"{"action":"list_files","args":{"path":"src"}}"#);
        match out {
            ParseOutcome::Directive(Directive::Action { tool, .. }) => {
                assert_eq!(tool, "list_files")
            }
            other => panic!("expected action, got {other:?}"),
        }
    }

    #[test]
    fn key_value_salvage() {
        let out = parser().parse(r#"I should do action="read_file" args={"path":"Cargo.toml"}"#);
        match out {
            ParseOutcome::Directive(Directive::Action { tool, args }) => {
                assert_eq!(tool, "read_file");
                assert_eq!(args["path"], "Cargo.toml");
            }
            other => panic!("expected action, got {other:?}"),
        }
    }

    #[test]
    fn heuristic_read_file() {
        let out = parser().parse("First I'll read the file src/main.rs to see what's there.");
        match out {
            ParseOutcome::Directive(Directive::Action { tool, args }) => {
                assert_eq!(tool, "read_file");
                assert_eq!(args["path"], "src/main.rs");
            }
            other => panic!("expected action, got {other:?}"),
        }
    }

    #[test]
    fn heuristic_run_command() {
        let out = parser().parse("Now run `cargo fmt` please");
        match out {
            ParseOutcome::Directive(Directive::Action { tool, args }) => {
                assert_eq!(tool, "run_command");
                assert_eq!(args["command"], "cargo fmt");
            }
            other => panic!("expected action, got {other:?}"),
        }
    }

    #[test]
    fn heuristic_plan_text_becomes_thought() {
        let out = parser().parse("Let me start by exploring the repository structure.");
        assert!(matches!(
            out,
            ParseOutcome::Directive(Directive::Thought { .. })
        ));
    }

    #[test]
    fn garbage_is_unparsed() {
        assert_eq!(parser().parse("the quick brown fox"), ParseOutcome::Unparsed);
        assert_eq!(parser().parse(""), ParseOutcome::Unparsed);
    }
}
