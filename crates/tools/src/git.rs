//! Guarded git tools.
//!
//! Each subcommand runs `git` with a fixed argv (no shell interpolation) in
//! the workspace root. Commit messages travel as a single argument.

use crate::shell::run_process;
use async_trait::async_trait;
use isocode_core::{Tool, ToolCategory, ToolContext, ToolError};
use serde_json::{json, Value};
use std::time::Duration;

const GIT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct GitStatusTool;
pub struct GitDiffTool;
pub struct GitLogTool;
pub struct GitCommitTool;
pub struct GitBranchTool;

fn empty_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

#[async_trait]
impl Tool for GitStatusTool {
    fn name(&self) -> &str {
        "git_status"
    }
    fn description(&self) -> &str {
        "Show the git working-tree status (short format)."
    }
    fn category(&self) -> ToolCategory {
        ToolCategory::Git
    }
    fn parameters_schema(&self) -> Value {
        empty_schema()
    }
    async fn execute(&self, _args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        run_process(
            "git",
            &["status", "--short", "--branch"],
            &ctx.workspace_root,
            GIT_TIMEOUT,
        )
        .await
    }
}

#[async_trait]
impl Tool for GitDiffTool {
    fn name(&self) -> &str {
        "git_diff"
    }
    fn description(&self) -> &str {
        "Show unstaged changes as a unified diff, optionally for one path."
    }
    fn category(&self) -> ToolCategory {
        ToolCategory::Git
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Limit the diff to one path" }
            }
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let mut argv = vec!["diff"];
        if let Some(path) = args["path"].as_str() {
            argv.push("--");
            argv.push(path);
        }
        run_process("git", &argv, &ctx.workspace_root, GIT_TIMEOUT).await
    }
}

#[async_trait]
impl Tool for GitLogTool {
    fn name(&self) -> &str {
        "git_log"
    }
    fn description(&self) -> &str {
        "Show the last commits (oneline format)."
    }
    fn category(&self) -> ToolCategory {
        ToolCategory::Git
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "count": { "type": "integer", "description": "Commits to show (default 10)" }
            }
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let count = args["count"].as_u64().unwrap_or(10).min(100);
        let limit = format!("-{count}");
        run_process(
            "git",
            &["log", "--oneline", &limit],
            &ctx.workspace_root,
            GIT_TIMEOUT,
        )
        .await
    }
}

#[async_trait]
impl Tool for GitCommitTool {
    fn name(&self) -> &str {
        "git_commit"
    }
    fn description(&self) -> &str {
        "Stage all changes and create a commit with the given message."
    }
    fn category(&self) -> ToolCategory {
        ToolCategory::Git
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": { "type": "string", "description": "Commit message" }
            },
            "required": ["message"]
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let message = args["message"]
            .as_str()
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'message'".into()))?;

        let staged = run_process("git", &["add", "-A"], &ctx.workspace_root, GIT_TIMEOUT).await?;
        if staged["exitCode"] != 0 {
            return Ok(staged);
        }
        run_process(
            "git",
            &["commit", "-m", message],
            &ctx.workspace_root,
            GIT_TIMEOUT,
        )
        .await
    }
}

#[async_trait]
impl Tool for GitBranchTool {
    fn name(&self) -> &str {
        "git_branch"
    }
    fn description(&self) -> &str {
        "List branches, or create and switch to a new one when 'name' is given."
    }
    fn category(&self) -> ToolCategory {
        ToolCategory::Git
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Branch to create and switch to" }
            }
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        match args["name"].as_str() {
            Some(name) => {
                run_process(
                    "git",
                    &["checkout", "-b", name],
                    &ctx.workspace_root,
                    GIT_TIMEOUT,
                )
                .await
            }
            None => run_process("git", &["branch", "-a"], &ctx.workspace_root, GIT_TIMEOUT).await,
        }
    }
}
