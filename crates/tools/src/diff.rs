//! Unified diff engine.
//!
//! Diffs are generated with `similar` and applied by a hunk-at-a-time parser
//! that verifies context before touching anything. `try_apply` returns `None`
//! without side effects when the diff does not fit; `apply_diff` is the tool
//! surface that writes the result back to the workspace.

use crate::path::confine;
use async_trait::async_trait;
use isocode_core::{Tool, ToolCategory, ToolContext, ToolError};
use serde_json::{json, Value};
use similar::TextDiff;

/// Produce a unified diff between two versions of a file.
pub fn create_unified_diff(path: &str, original: &str, updated: &str) -> String {
    TextDiff::from_lines(original, updated)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{path}"), &format!("b/{path}"))
        .to_string()
}

/// Apply a unified diff to `original`, or `None` when any hunk fails to
/// match. Never partially applies.
pub fn try_apply(original: &str, diff: &str) -> Option<String> {
    let parsed = parse_hunks(diff)?;
    let lines: Vec<&str> = original.lines().collect();

    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut cursor = 0usize; // next unconsumed original line

    for hunk in &parsed.hunks {
        // Hunk headers are 1-based. A zero-length old range inserts *after*
        // the named line, so its index is the line number itself.
        let start = if hunk.old_count == 0 {
            hunk.old_start
        } else {
            hunk.old_start.saturating_sub(1)
        };
        if start < cursor || start > lines.len() {
            return None;
        }
        out.extend(lines[cursor..start].iter().map(|l| l.to_string()));
        cursor = start;

        for line in &hunk.lines {
            match line {
                HunkLine::Context(text) | HunkLine::Remove(text) => {
                    if lines.get(cursor) != Some(&text.as_str()) {
                        return None;
                    }
                    if matches!(line, HunkLine::Context(_)) {
                        out.push(text.clone());
                    }
                    cursor += 1;
                }
                HunkLine::Add(text) => out.push(text.clone()),
            }
        }
    }

    // Trailing newline: when the diff reaches EOF the new side decides,
    // otherwise the untouched original tail does.
    let touches_eof = cursor >= lines.len();
    out.extend(lines[cursor..].iter().map(|l| l.to_string()));

    let mut result = out.join("\n");
    let wants_newline = if touches_eof {
        !parsed.updated_no_trailing_newline
    } else {
        original.ends_with('\n')
    };
    if wants_newline && !result.is_empty() {
        result.push('\n');
    }
    Some(result)
}

#[derive(Debug)]
struct ParsedDiff {
    hunks: Vec<Hunk>,
    /// Set when a `\ No newline at end of file` marker follows a new-side
    /// line (add or context).
    updated_no_trailing_newline: bool,
}

#[derive(Debug)]
struct Hunk {
    old_start: usize,
    old_count: usize,
    lines: Vec<HunkLine>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum LineKind {
    Context,
    Add,
    Remove,
}

#[derive(Debug)]
enum HunkLine {
    Context(String),
    Add(String),
    Remove(String),
}

fn parse_hunks(diff: &str) -> Option<ParsedDiff> {
    let mut hunks: Vec<Hunk> = Vec::new();
    let mut updated_no_trailing_newline = false;
    let mut last_kind: Option<LineKind> = None;

    for line in diff.lines() {
        if line.starts_with("---") || line.starts_with("+++") {
            continue;
        }
        if let Some(rest) = line.strip_prefix("@@") {
            let (old_start, old_count) = parse_old_range(rest)?;
            hunks.push(Hunk {
                old_start,
                old_count,
                lines: Vec::new(),
            });
            last_kind = None;
            continue;
        }
        if line.starts_with('\\') {
            // "\ No newline at end of file" applies to the preceding line.
            if matches!(last_kind, Some(LineKind::Add | LineKind::Context)) {
                updated_no_trailing_newline = true;
            }
            continue;
        }
        let Some(hunk) = hunks.last_mut() else {
            // Preamble outside any hunk is tolerated.
            continue;
        };
        if let Some(text) = line.strip_prefix('+') {
            hunk.lines.push(HunkLine::Add(text.to_string()));
            last_kind = Some(LineKind::Add);
        } else if let Some(text) = line.strip_prefix('-') {
            hunk.lines.push(HunkLine::Remove(text.to_string()));
            last_kind = Some(LineKind::Remove);
        } else if let Some(text) = line.strip_prefix(' ') {
            hunk.lines.push(HunkLine::Context(text.to_string()));
            last_kind = Some(LineKind::Context);
        } else if line.is_empty() {
            hunk.lines.push(HunkLine::Context(String::new()));
            last_kind = Some(LineKind::Context);
        } else {
            return None;
        }
    }

    if hunks.is_empty() {
        None
    } else {
        Some(ParsedDiff {
            hunks,
            updated_no_trailing_newline,
        })
    }
}

/// `-l,c +l,c @@` → the old-side start line and count. A missing count
/// means 1.
fn parse_old_range(header_rest: &str) -> Option<(usize, usize)> {
    let minus = header_rest.trim_start().strip_prefix('-')?;
    let start: String = minus.chars().take_while(|c| c.is_ascii_digit()).collect();
    let rest = &minus[start.len()..];
    let count = if let Some(stripped) = rest.strip_prefix(',') {
        let digits: String = stripped.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse().ok()?
    } else {
        1
    };
    Some((start.parse().ok()?, count))
}

/// Tool surface: apply a stored unified diff to a workspace file.
pub struct ApplyDiffTool;

#[async_trait]
impl Tool for ApplyDiffTool {
    fn name(&self) -> &str {
        "apply_diff"
    }

    fn description(&self) -> &str {
        "Apply a unified diff to a file. The diff must match the file's current contents."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::File
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Workspace-relative file path" },
                "diff": { "type": "string", "description": "Unified diff text" }
            },
            "required": ["path", "diff"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let path = args["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path'".into()))?;
        let diff = args["diff"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'diff'".into()))?;

        let absolute = confine(&ctx.workspace_root, path)?;
        let original = tokio::fs::read_to_string(&absolute).await.unwrap_or_default();

        let updated = try_apply(&original, diff).ok_or_else(|| ToolError::ExecutionFailed {
            tool_name: "apply_diff".into(),
            reason: "diff does not apply to the current file contents".into(),
        })?;

        if let Some(parent) = absolute.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::ExecutionFailed {
                    tool_name: "apply_diff".into(),
                    reason: e.to_string(),
                })?;
        }
        tokio::fs::write(&absolute, &updated)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "apply_diff".into(),
                reason: e.to_string(),
            })?;

        Ok(json!({ "applied": true, "path": path, "bytes": updated.len() }))
    }
}
