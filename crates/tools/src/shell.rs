//! Shell execution tool with timeout and output caps.

use crate::path::confine;
use async_trait::async_trait;
use isocode_core::{Tool, ToolCategory, ToolContext, ToolError};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Default command deadline.
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_TIMEOUT_SECS: u64 = 300;

const STDOUT_CAP: usize = 20_000;
const STDERR_CAP: usize = 10_000;

/// Run a shell command inside the workspace.
pub struct RunCommandTool;

/// Run `program args...` in `cwd` with a deadline, capturing capped output.
pub async fn run_process(
    program: &str,
    args: &[&str],
    cwd: &std::path::Path,
    timeout: Duration,
) -> Result<Value, ToolError> {
    let result = tokio::time::timeout(
        timeout,
        Command::new(program).args(args).current_dir(cwd).output(),
    )
    .await;

    let output = match result {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(ToolError::ExecutionFailed {
                tool_name: program.to_string(),
                reason: e.to_string(),
            });
        }
        Err(_) => {
            return Err(ToolError::Timeout {
                tool_name: program.to_string(),
                timeout_secs: timeout.as_secs(),
            });
        }
    };

    let mut stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let mut stderr = String::from_utf8_lossy(&output.stderr).to_string();
    stdout.truncate(floor_boundary(&stdout, STDOUT_CAP));
    stderr.truncate(floor_boundary(&stderr, STDERR_CAP));

    let exit_code = output.status.code().unwrap_or(-1);
    if exit_code != 0 {
        warn!(program, exit_code, "command failed");
    }

    Ok(json!({
        "exitCode": exit_code,
        "stdout": stdout,
        "stderr": stderr,
    }))
}

fn floor_boundary(s: &str, mut index: usize) -> usize {
    index = index.min(s.len());
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the workspace and return stdout, stderr, and the exit code."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Shell
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "The shell command to execute" },
                "cwd": { "type": "string", "description": "Working directory relative to the workspace root" },
                "timeout": { "type": "integer", "description": "Deadline in seconds (default 30, max 300)" }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let command = args["command"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'command'".into()))?;

        let cwd = match args["cwd"].as_str() {
            Some(sub) => confine(&ctx.workspace_root, sub)?,
            None => ctx.workspace_root.clone(),
        };

        let timeout_secs = args["timeout"]
            .as_u64()
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .min(MAX_TIMEOUT_SECS);

        debug!(command, cwd = %cwd.display(), "run_command");
        run_process(
            "sh",
            &["-c", command],
            &cwd,
            Duration::from_secs(timeout_secs),
        )
        .await
    }
}
