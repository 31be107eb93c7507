//! File tools: read with pagination, write, surgical replace, batch read.

use crate::path::confine;
use async_trait::async_trait;
use isocode_core::{Tool, ToolCategory, ToolContext, ToolError};
use serde_json::{json, Value};
use tracing::debug;

/// Reads past this many lines auto-paginate.
const READ_PAGE_LINES: usize = 200;

fn invalid(reason: &str) -> ToolError {
    ToolError::InvalidArguments(reason.to_string())
}

fn failed(tool: &str, e: impl std::fmt::Display) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: tool.to_string(),
        reason: e.to_string(),
    }
}

/// Read a file, auto-paginating beyond 200 lines.
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file's contents. Large files return the first 200 lines; pass offset/limit to page through the rest."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::File
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Workspace-relative file path" },
                "offset": { "type": "integer", "description": "1-based first line to return" },
                "limit": { "type": "integer", "description": "Maximum lines to return" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let path = args["path"].as_str().ok_or_else(|| invalid("Missing 'path'"))?;
        let absolute = confine(&ctx.workspace_root, path)?;

        let content = tokio::fs::read_to_string(&absolute)
            .await
            .map_err(|e| failed("read_file", e))?;

        let lines: Vec<&str> = content.lines().collect();
        let total = lines.len();

        let offset = args["offset"].as_u64().map(|o| (o as usize).saturating_sub(1)).unwrap_or(0);
        let limit = args["limit"]
            .as_u64()
            .map(|l| l as usize)
            .unwrap_or(READ_PAGE_LINES)
            .min(READ_PAGE_LINES.max(1) * 10);

        let end = (offset + limit).min(total);
        let page = if offset < total {
            lines[offset..end].join("\n")
        } else {
            String::new()
        };

        let mut result = json!({ "content": page, "totalLines": total });
        if end < total {
            result["note"] = json!(format!(
                "Showing lines {}-{} of {total}. Call read_file again with offset={} to continue.",
                offset + 1,
                end,
                end + 1
            ));
        }
        Ok(result)
    }
}

/// Write (create or overwrite) a file.
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file with the given content. Read the file first when editing."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::File
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Workspace-relative file path" },
                "content": { "type": "string", "description": "Full file content" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let path = args["path"].as_str().ok_or_else(|| invalid("Missing 'path'"))?;
        let content = args["content"]
            .as_str()
            .ok_or_else(|| invalid("Missing 'content'"))?;

        let absolute = confine(&ctx.workspace_root, path)?;
        if let Some(parent) = absolute.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| failed("write_file", e))?;
        }
        tokio::fs::write(&absolute, content)
            .await
            .map_err(|e| failed("write_file", e))?;

        debug!(path, bytes = content.len(), "write_file");
        Ok(json!({ "written": true, "path": path, "bytes": content.len() }))
    }
}

/// Replace occurrences of a string in one file.
pub struct ReplaceInFileTool;

#[async_trait]
impl Tool for ReplaceInFileTool {
    fn name(&self) -> &str {
        "replace_in_file"
    }

    fn description(&self) -> &str {
        "Replace an exact text snippet in a file. Fails when the snippet is absent; prefer this over write_file for surgical edits."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::File
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "find": { "type": "string", "description": "Exact text to find" },
                "replace": { "type": "string", "description": "Replacement text" },
                "all": { "type": "boolean", "description": "Replace every occurrence (default: first only)" }
            },
            "required": ["path", "find", "replace"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let path = args["path"].as_str().ok_or_else(|| invalid("Missing 'path'"))?;
        let find = args["find"].as_str().ok_or_else(|| invalid("Missing 'find'"))?;
        let replace = args["replace"]
            .as_str()
            .ok_or_else(|| invalid("Missing 'replace'"))?;
        if find.is_empty() {
            return Err(invalid("'find' must not be empty"));
        }

        let absolute = confine(&ctx.workspace_root, path)?;
        let content = tokio::fs::read_to_string(&absolute)
            .await
            .map_err(|e| failed("replace_in_file", e))?;

        let occurrences = content.matches(find).count();
        if occurrences == 0 {
            return Err(ToolError::ExecutionFailed {
                tool_name: "replace_in_file".into(),
                reason: "'find' text not present in file".into(),
            });
        }

        let (updated, replaced) = if args["all"].as_bool().unwrap_or(false) {
            (content.replace(find, replace), occurrences)
        } else {
            (content.replacen(find, replace, 1), 1)
        };

        tokio::fs::write(&absolute, &updated)
            .await
            .map_err(|e| failed("replace_in_file", e))?;

        Ok(json!({ "replaced": replaced, "path": path }))
    }
}

/// Read several files in one call.
pub struct ReadManyTool;

#[async_trait]
impl Tool for ReadManyTool {
    fn name(&self) -> &str {
        "read_many_files"
    }

    fn description(&self) -> &str {
        "Read up to 10 files in one call. Batch related reads instead of issuing them one by one."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::File
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "paths": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Workspace-relative file paths"
                }
            },
            "required": ["paths"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let paths = args["paths"]
            .as_array()
            .ok_or_else(|| invalid("Missing 'paths' array"))?;

        let mut files = Vec::new();
        for path in paths.iter().take(10) {
            let Some(path) = path.as_str() else { continue };
            let entry = match confine(&ctx.workspace_root, path) {
                Ok(absolute) => match tokio::fs::read_to_string(&absolute).await {
                    Ok(content) => {
                        let lines: Vec<&str> = content.lines().collect();
                        let body = if lines.len() > READ_PAGE_LINES {
                            format!(
                                "{}\n[{} more lines, use read_file with offset]",
                                lines[..READ_PAGE_LINES].join("\n"),
                                lines.len() - READ_PAGE_LINES
                            )
                        } else {
                            content
                        };
                        json!({ "path": path, "content": body })
                    }
                    Err(e) => json!({ "path": path, "error": e.to_string() }),
                },
                Err(e) => json!({ "path": path, "error": e.to_string() }),
            };
            files.push(entry);
        }

        Ok(json!({ "files": files }))
    }
}
