//! Search and navigation tools: directory listing, glob, regex grep, and
//! term-scored codebase search over the shared file index.

use crate::index::IndexOwner;
use crate::path::confine;
use async_trait::async_trait;
use globset::Glob;
use isocode_core::{Tool, ToolCategory, ToolContext, ToolError};
use regex::Regex;
use serde_json::{json, Value};
use std::sync::Arc;

/// Hard cap on grep matches collected before truncation.
const GREP_MAX_MATCHES: usize = 100;
/// Skip files larger than this during content search.
const GREP_MAX_FILE_BYTES: u64 = 1_000_000;

fn invalid(reason: &str) -> ToolError {
    ToolError::InvalidArguments(reason.to_string())
}

/// List one directory level.
pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files and directories at a workspace path (non-recursive)."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Search
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory to list; defaults to the workspace root" }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let path = args["path"].as_str().unwrap_or(".");
        let absolute = confine(&ctx.workspace_root, path)?;

        let mut entries = tokio::fs::read_dir(&absolute)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "list_files".into(),
                reason: e.to_string(),
            })?;

        let mut files = Vec::new();
        let mut dirs = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            match entry.file_type().await {
                Ok(t) if t.is_dir() => dirs.push(name),
                Ok(_) => files.push(name),
                Err(_) => {}
            }
        }
        files.sort();
        dirs.sort();

        Ok(json!({ "path": path, "dirs": dirs, "files": files }))
    }
}

/// Glob over the indexed file list.
pub struct GlobTool {
    index: Arc<IndexOwner>,
}

impl GlobTool {
    pub fn new(index: Arc<IndexOwner>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob_files"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern, e.g. 'src/**/*.ts'."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Search
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Glob pattern relative to the workspace root" }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let pattern = args["pattern"]
            .as_str()
            .ok_or_else(|| invalid("Missing 'pattern'"))?;
        let matcher = Glob::new(pattern)
            .map_err(|e| invalid(&format!("Bad glob pattern: {e}")))?
            .compile_matcher();

        let index = self.index.get_or_build(&ctx.workspace_root).await;
        let files: Vec<&str> = index
            .files
            .iter()
            .map(|f| f.relative_path.as_str())
            .filter(|p| matcher.is_match(p))
            .collect();

        Ok(json!({ "pattern": pattern, "count": files.len(), "files": files }))
    }
}

/// Regex content search across indexed files.
pub struct GrepTool {
    index: Arc<IndexOwner>,
}

impl GrepTool {
    pub fn new(index: Arc<IndexOwner>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep_search"
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression. Returns path:line matches."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Search
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Regular expression" },
                "path": { "type": "string", "description": "Restrict to a subdirectory" },
                "extension": { "type": "string", "description": "Restrict to one file extension, e.g. 'rs'" }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let pattern = args["pattern"]
            .as_str()
            .ok_or_else(|| invalid("Missing 'pattern'"))?;
        let regex = Regex::new(pattern).map_err(|e| invalid(&format!("Bad regex: {e}")))?;
        let subdir = args["path"].as_str().map(|p| p.trim_matches('/'));
        let extension = args["extension"].as_str();

        let index = self.index.get_or_build(&ctx.workspace_root).await;
        let mut matches = Vec::new();

        for entry in &index.files {
            if matches.len() >= GREP_MAX_MATCHES {
                break;
            }
            if entry.size > GREP_MAX_FILE_BYTES {
                continue;
            }
            if let Some(subdir) = subdir
                && !entry.relative_path.starts_with(subdir)
            {
                continue;
            }
            if let Some(ext) = extension
                && entry.extension != ext.trim_start_matches('.')
            {
                continue;
            }

            let absolute = ctx.workspace_root.join(&entry.relative_path);
            let Ok(content) = tokio::fs::read_to_string(&absolute).await else {
                continue;
            };
            for (line_number, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    matches.push(json!(format!(
                        "{}:{}: {}",
                        entry.relative_path,
                        line_number + 1,
                        line.trim()
                    )));
                    if matches.len() >= GREP_MAX_MATCHES {
                        break;
                    }
                }
            }
        }

        Ok(json!({ "pattern": pattern, "count": matches.len(), "matches": matches }))
    }
}

/// Term-scored lookup over file names and key-file contents.
pub struct CodebaseSearchTool {
    index: Arc<IndexOwner>,
}

impl CodebaseSearchTool {
    pub fn new(index: Arc<IndexOwner>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl Tool for CodebaseSearchTool {
    fn name(&self) -> &str {
        "codebase_search"
    }

    fn description(&self) -> &str {
        "Find files relevant to a natural-language query by scoring file names and key project files."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Search
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "What you are looking for" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let query = args["query"]
            .as_str()
            .ok_or_else(|| invalid("Missing 'query'"))?;

        let index = self.index.get_or_build(&ctx.workspace_root).await;
        match index.gather_context(query, 3_000) {
            Some(context) => Ok(json!({ "content": context })),
            None => Ok(json!({
                "content": "No matching files.",
                "hint": "Try list_files or glob_files to explore the tree."
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(dir: &std::path::Path) -> ToolContext {
        ToolContext {
            workspace_root: dir.to_path_buf(),
            session_id: "t".into(),
            auto_mode: true,
        }
    }

    fn seed() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() { login(); }\n").unwrap();
        std::fs::write(dir.path().join("src/auth.rs"), "pub fn login() {}\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "nothing here\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn list_files_splits_dirs_and_files() {
        let dir = seed();
        let result = ListFilesTool
            .execute(json!({}), &ctx(dir.path()))
            .await
            .unwrap();
        assert!(result["dirs"].as_array().unwrap().iter().any(|d| d == "src"));
        assert!(result["files"]
            .as_array()
            .unwrap()
            .iter()
            .any(|f| f == "notes.txt"));
    }

    #[tokio::test]
    async fn glob_matches_nested_paths() {
        let dir = seed();
        let tool = GlobTool::new(Arc::new(IndexOwner::new()));
        let result = tool
            .execute(json!({ "pattern": "src/**/*.rs" }), &ctx(dir.path()))
            .await
            .unwrap();
        assert_eq!(result["count"], 2);
    }

    #[tokio::test]
    async fn grep_finds_lines_with_numbers() {
        let dir = seed();
        let tool = GrepTool::new(Arc::new(IndexOwner::new()));
        let result = tool
            .execute(json!({ "pattern": "fn login" }), &ctx(dir.path()))
            .await
            .unwrap();
        let matches = result["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 1);
        assert!(matches[0].as_str().unwrap().starts_with("src/auth.rs:1:"));
    }

    #[tokio::test]
    async fn grep_rejects_bad_regex() {
        let dir = seed();
        let tool = GrepTool::new(Arc::new(IndexOwner::new()));
        let err = tool
            .execute(json!({ "pattern": "([" }), &ctx(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn codebase_search_returns_context() {
        let dir = seed();
        let tool = CodebaseSearchTool::new(Arc::new(IndexOwner::new()));
        let result = tool
            .execute(json!({ "query": "auth login" }), &ctx(dir.path()))
            .await
            .unwrap();
        assert!(result["content"].as_str().unwrap().contains("src/auth.rs"));
    }
}
