//! Workspace tools and the dispatcher.
//!
//! The dispatcher owns tool lookup, the runtime permission policy table,
//! and observation truncation. Execution never raises into the engine:
//! every failure becomes an error observation object and the loop
//! continues. Path confinement lives in `path::confine` and is applied by
//! each tool to every path argument.

pub mod browser;
pub mod check;
pub mod diff;
pub mod file;
pub mod git;
pub mod index;
pub mod mcp;
pub mod memory;
pub mod path;
pub mod search;
pub mod shell;
pub mod tasks;
pub mod vision;

use isocode_config::{McpServerConfig, PermissionsConfig};
use isocode_context::truncate_tool_result;
use isocode_core::{
    PermissionPolicy, Provider, Tool, ToolCategory, ToolContext, ToolError, ToolSchema,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

pub use browser::BrowserOwner;
pub use index::IndexOwner;
pub use mcp::McpPool;
pub use tasks::TaskBoard;

/// The result of one dispatch: an observation payload, already truncated.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub success: bool,
    pub payload: Value,
}

impl ToolOutcome {
    fn error(payload: Value) -> Self {
        Self {
            success: false,
            payload,
        }
    }
}

/// The tool dispatcher. One per process, shared across sessions.
pub struct Dispatcher {
    tools: HashMap<String, Arc<dyn Tool>>,
    policies: RwLock<HashMap<String, PermissionPolicy>>,
    pub index: Arc<IndexOwner>,
    pub tasks: Arc<TaskBoard>,
    pub browser: Arc<BrowserOwner>,
    pub external: Arc<McpPool>,
}

impl Dispatcher {
    /// Build the dispatcher with the full default tool set.
    pub fn new(provider: Arc<dyn Provider>, vision_model: Option<String>) -> Self {
        let index = Arc::new(IndexOwner::new());
        let tasks = Arc::new(TaskBoard::new());
        let browser = Arc::new(BrowserOwner::new());

        let mut tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(file::ReadFileTool),
            Arc::new(file::WriteFileTool),
            Arc::new(file::ReplaceInFileTool),
            Arc::new(file::ReadManyTool),
            Arc::new(diff::ApplyDiffTool),
            Arc::new(search::ListFilesTool),
            Arc::new(search::GlobTool::new(index.clone())),
            Arc::new(search::GrepTool::new(index.clone())),
            Arc::new(search::CodebaseSearchTool::new(index.clone())),
            Arc::new(shell::RunCommandTool),
            Arc::new(git::GitStatusTool),
            Arc::new(git::GitDiffTool),
            Arc::new(git::GitLogTool),
            Arc::new(git::GitCommitTool),
            Arc::new(git::GitBranchTool),
            Arc::new(check::RunLintTool),
            Arc::new(check::RunTestsTool),
            Arc::new(memory::MemorySetTool),
            Arc::new(memory::MemoryGetTool),
            Arc::new(memory::MemoryListTool),
            Arc::new(tasks::TaskAddTool::new(tasks.clone())),
            Arc::new(tasks::TaskCompleteTool::new(tasks.clone())),
            Arc::new(tasks::TaskListTool::new(tasks.clone())),
            Arc::new(browser::BrowserOpenTool::new(browser.clone())),
            Arc::new(browser::BrowserNavigateTool::new(browser.clone())),
            Arc::new(browser::BrowserExtractTool::new(browser.clone())),
            Arc::new(browser::BrowserCloseTool::new(browser.clone())),
            Arc::new(vision::VisionTool::new(provider, vision_model)),
        ];

        let mut map = HashMap::new();
        for tool in tools.drain(..) {
            map.insert(tool.name().to_string(), tool);
        }

        Self {
            policies: RwLock::new(default_policies()),
            tools: map,
            index,
            tasks,
            browser,
            external: Arc::new(McpPool::new()),
        }
    }

    /// Map the config permission groups onto the gated tools.
    pub async fn apply_permissions(&self, permissions: &PermissionsConfig) {
        let mut policies = self.policies.write().await;
        policies.insert("run_command".into(), permissions.shell);
        policies.insert("git_commit".into(), permissions.shell);
        policies.insert("write_file".into(), permissions.write);
        policies.insert("replace_in_file".into(), permissions.edit);
        policies.insert("apply_diff".into(), permissions.edit);
    }

    /// Override one tool's policy at runtime.
    pub async fn set_policy(&self, tool: &str, policy: PermissionPolicy) {
        self.policies.write().await.insert(tool.to_string(), policy);
    }

    /// Spawn or refresh external tool servers.
    pub async fn refresh_external(&self, configs: &[McpServerConfig]) {
        self.external.ensure_started(configs).await;
    }

    /// Tool names, sorted, for diagnostics and unknown-tool errors.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort();
        names
    }

    /// Tools grouped by category for the system prompt listing.
    pub fn catalogue(&self) -> Vec<(ToolCategory, Vec<Arc<dyn Tool>>)> {
        let order = [
            ToolCategory::File,
            ToolCategory::Search,
            ToolCategory::Shell,
            ToolCategory::Git,
            ToolCategory::Check,
            ToolCategory::Memory,
            ToolCategory::Tasks,
            ToolCategory::Browser,
            ToolCategory::Vision,
        ];
        order
            .into_iter()
            .map(|category| {
                let mut group: Vec<Arc<dyn Tool>> = self
                    .tools
                    .values()
                    .filter(|t| t.category() == category)
                    .cloned()
                    .collect();
                group.sort_by(|a, b| a.name().cmp(b.name()));
                (category, group)
            })
            .filter(|(_, group)| !group.is_empty())
            .collect()
    }

    /// Provider-neutral schemas for native tool calling, external tools
    /// included under their qualified names.
    pub async fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values().map(|t| t.to_schema()).collect();
        for external in self.external.list_tools().await {
            schemas.push(ToolSchema {
                name: format!("mcp:{}:{}", external.server, external.name),
                description: external.description,
                parameters: external.input_schema,
            });
        }
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Execute one tool call: lookup, policy, execute, truncate. Every
    /// failure path returns an observation object rather than an error.
    pub async fn run(&self, name: &str, args: Value, ctx: &ToolContext) -> ToolOutcome {
        debug!(tool = name, session = %ctx.session_id, auto = ctx.auto_mode, "dispatch");

        if let Some((server, tool)) = mcp::parse_qualified_name(name) {
            return match self.external.call(server, tool, args).await {
                Ok(result) => ToolOutcome {
                    success: true,
                    payload: truncate_tool_result(&result),
                },
                Err(reason) => ToolOutcome::error(json!({ "error": reason })),
            };
        }

        let Some(tool) = self.tools.get(name) else {
            return ToolOutcome::error(json!({
                "error": format!("Unknown tool '{name}'"),
                "hint": format!("Known tools: {}", self.names().join(", ")),
            }));
        };

        let policy = self
            .policies
            .read()
            .await
            .get(name)
            .copied()
            .unwrap_or(PermissionPolicy::Always);
        match policy {
            PermissionPolicy::Never => {
                return ToolOutcome::error(json!({
                    "error": format!("Tool '{name}' is disabled by policy"),
                }));
            }
            PermissionPolicy::Ask if !ctx.auto_mode => {
                return ToolOutcome::error(json!({
                    "error": format!("Tool '{name}' requires approval and auto mode is off"),
                    "hint": "Propose the change as a diff_request instead.",
                }));
            }
            _ => {}
        }

        match tool.execute(args, ctx).await {
            Ok(result) => ToolOutcome {
                success: true,
                payload: truncate_tool_result(&result),
            },
            Err(ToolError::PathEscape(path)) => ToolOutcome::error(json!({
                "error": format!("Security: path '{path}' resolves outside the workspace root"),
            })),
            Err(e) => ToolOutcome::error(json!({ "error": e.to_string() })),
        }
    }
}

fn default_policies() -> HashMap<String, PermissionPolicy> {
    let mut policies = HashMap::new();
    for gated in [
        "run_command",
        "git_commit",
        "write_file",
        "replace_in_file",
        "apply_diff",
    ] {
        policies.insert(gated.to_string(), PermissionPolicy::Ask);
    }
    policies
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use isocode_core::{ChatOptions, ChatOutcome, HealthReport, Message, ModelInfo, ProviderError};
    use tokio::sync::mpsc;

    struct NullProvider;

    #[async_trait]
    impl Provider for NullProvider {
        fn name(&self) -> &str {
            "null"
        }
        async fn call(
            &self,
            _model: &str,
            _messages: &[Message],
            _options: &ChatOptions,
        ) -> Result<ChatOutcome, ProviderError> {
            Err(ProviderError::NotConfigured("null".into()))
        }
        async fn stream(
            &self,
            _model: &str,
            _messages: &[Message],
            _options: &ChatOptions,
        ) -> Result<mpsc::Receiver<Result<String, ProviderError>>, ProviderError> {
            Err(ProviderError::NotConfigured("null".into()))
        }
        async fn call_vision(
            &self,
            _model: &str,
            _prompt: &str,
            _image_base64: &str,
            _mime_type: &str,
            _options: &ChatOptions,
        ) -> Result<String, ProviderError> {
            Err(ProviderError::NotConfigured("null".into()))
        }
        async fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
            Ok(vec![])
        }
        async fn health(&self) -> HealthReport {
            HealthReport {
                ok: false,
                provider: "null".into(),
                error: None,
            }
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(NullProvider), None)
    }

    fn ctx(dir: &std::path::Path, auto: bool) -> ToolContext {
        ToolContext {
            workspace_root: dir.to_path_buf(),
            session_id: "t".into(),
            auto_mode: auto,
        }
    }

    #[tokio::test]
    async fn unknown_tool_lists_known_names() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = dispatcher()
            .run("frobnicate", json!({}), &ctx(dir.path(), true))
            .await;
        assert!(!outcome.success);
        assert!(outcome.payload["error"]
            .as_str()
            .unwrap()
            .contains("frobnicate"));
        assert!(outcome.payload["hint"].as_str().unwrap().contains("read_file"));
    }

    #[tokio::test]
    async fn ask_policy_blocks_without_auto_mode() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher();

        let blocked = d
            .run(
                "write_file",
                json!({ "path": "a.txt", "content": "x" }),
                &ctx(dir.path(), false),
            )
            .await;
        assert!(!blocked.success);
        assert!(blocked.payload["error"]
            .as_str()
            .unwrap()
            .contains("requires approval"));

        let allowed = d
            .run(
                "write_file",
                json!({ "path": "a.txt", "content": "x" }),
                &ctx(dir.path(), true),
            )
            .await;
        assert!(allowed.success, "{:?}", allowed.payload);
    }

    #[tokio::test]
    async fn never_policy_blocks_even_in_auto_mode() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher();
        d.set_policy("run_command", PermissionPolicy::Never).await;

        let outcome = d
            .run(
                "run_command",
                json!({ "command": "echo hi" }),
                &ctx(dir.path(), true),
            )
            .await;
        assert!(!outcome.success);
        assert!(outcome.payload["error"].as_str().unwrap().contains("disabled"));
    }

    #[tokio::test]
    async fn path_escape_becomes_security_observation() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = dispatcher()
            .run(
                "read_file",
                json!({ "path": "../../etc/passwd" }),
                &ctx(dir.path(), true),
            )
            .await;
        assert!(!outcome.success);
        assert!(outcome.payload["error"]
            .as_str()
            .unwrap()
            .contains("outside the workspace"));
    }

    #[tokio::test]
    async fn tool_error_becomes_observation_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = dispatcher()
            .run(
                "read_file",
                json!({ "path": "does-not-exist.txt" }),
                &ctx(dir.path(), true),
            )
            .await;
        assert!(!outcome.success);
        assert!(outcome.payload.get("error").is_some());
    }

    #[tokio::test]
    async fn permissions_config_applies_to_groups() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher();
        let mut permissions = PermissionsConfig::default();
        permissions.shell = PermissionPolicy::Never;
        d.apply_permissions(&permissions).await;

        let outcome = d
            .run(
                "run_command",
                json!({ "command": "echo hi" }),
                &ctx(dir.path(), true),
            )
            .await;
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn catalogue_covers_all_registered_tools() {
        let d = dispatcher();
        let listed: usize = d.catalogue().iter().map(|(_, g)| g.len()).sum();
        assert_eq!(listed, d.tools.len());
    }

    #[tokio::test]
    async fn oversized_output_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("big.txt"),
            format!("{}\n", "x".repeat(100_000)),
        )
        .unwrap();
        let outcome = dispatcher()
            .run(
                "read_file",
                json!({ "path": "big.txt" }),
                &ctx(dir.path(), true),
            )
            .await;
        assert!(outcome.success);
        let serialized = outcome.payload.to_string();
        assert!(serialized.len() < 20_000, "not truncated: {}", serialized.len());
    }
}
