//! Tool trait — the abstraction over workspace capabilities.
//!
//! Tools are what give the agent the ability to act: read and write files,
//! search, run commands, drive git, query external tool servers. The
//! dispatcher in `isocode-tools` owns lookup, permission policy, path
//! confinement, and output truncation; tools only implement `execute`.

use crate::error::ToolError;
use crate::provider::ToolSchema;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Broad tool grouping, used for the categorised prompt listing and for
/// default permission policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    File,
    Search,
    Shell,
    Git,
    Check,
    Memory,
    Tasks,
    Browser,
    External,
    Vision,
}

impl ToolCategory {
    pub fn label(&self) -> &'static str {
        match self {
            Self::File => "File operations",
            Self::Search => "Search and navigation",
            Self::Shell => "Shell execution",
            Self::Git => "Git",
            Self::Check => "Lint and tests",
            Self::Memory => "Persistent memory",
            Self::Tasks => "Task list",
            Self::Browser => "Browser automation",
            Self::External => "External tool servers",
            Self::Vision => "Vision",
        }
    }
}

/// Per-tool permission policy, configurable at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionPolicy {
    /// Proceed unconditionally.
    Always,
    /// Proceed only when the calling session runs with auto-mode.
    Ask,
    /// Refuse unconditionally.
    Never,
}

/// Execution context handed to every tool invocation.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Absolute workspace root; every path argument must resolve inside it.
    pub workspace_root: PathBuf,
    /// Owning session, for per-session tool state (task lists).
    pub session_id: String,
    /// Whether `ask`-policy tools may proceed without user approval.
    pub auto_mode: bool,
}

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name, e.g. "read_file".
    fn name(&self) -> &str;

    /// Description sent to the LLM in the tool catalogue.
    fn description(&self) -> &str;

    fn category(&self) -> ToolCategory;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute with already permission-checked arguments. Path confinement
    /// is each tool's responsibility via `isocode_tools::path::confine`.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError>;

    /// Provider-neutral schema for native tool calling.
    fn to_schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn category(&self) -> ToolCategory {
            ToolCategory::Shell
        }
        fn parameters_schema(&self) -> Value {
            serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }
        async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
            Ok(serde_json::json!({ "content": args["text"] }))
        }
    }

    #[tokio::test]
    async fn schema_conversion_carries_name_and_params() {
        let schema = EchoTool.to_schema();
        assert_eq!(schema.name, "echo");
        assert_eq!(schema.parameters["required"][0], "text");
    }

    #[test]
    fn policy_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&PermissionPolicy::Ask).unwrap(),
            r#""ask""#
        );
        let p: PermissionPolicy = serde_json::from_str(r#""never""#).unwrap();
        assert_eq!(p, PermissionPolicy::Never);
    }
}
