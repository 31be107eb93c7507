//! Lint and test runners.
//!
//! Project type is detected from marker files; the detected type decides the
//! command. Unknown project types return a hint instead of guessing.

use crate::shell::run_process;
use async_trait::async_trait;
use isocode_core::{Tool, ToolCategory, ToolContext, ToolError};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

const LINT_TIMEOUT: Duration = Duration::from_secs(45);
const TEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectKind {
    Cargo,
    Node,
    Python,
    Go,
    Make,
    Unknown,
}

/// Detect the project type from marker files at the workspace root.
pub fn detect_project(root: &Path) -> ProjectKind {
    if root.join("Cargo.toml").exists() {
        ProjectKind::Cargo
    } else if root.join("package.json").exists() {
        ProjectKind::Node
    } else if root.join("pyproject.toml").exists() || root.join("requirements.txt").exists() {
        ProjectKind::Python
    } else if root.join("go.mod").exists() {
        ProjectKind::Go
    } else if root.join("Makefile").exists() {
        ProjectKind::Make
    } else {
        ProjectKind::Unknown
    }
}

fn lint_argv(kind: ProjectKind) -> Option<(&'static str, Vec<&'static str>)> {
    match kind {
        ProjectKind::Cargo => Some(("cargo", vec!["clippy", "--no-deps", "--quiet"])),
        ProjectKind::Node => Some(("npm", vec!["run", "lint", "--if-present"])),
        ProjectKind::Python => Some(("ruff", vec!["check", "."])),
        ProjectKind::Go => Some(("go", vec!["vet", "./..."])),
        ProjectKind::Make => Some(("make", vec!["lint"])),
        ProjectKind::Unknown => None,
    }
}

fn test_argv(kind: ProjectKind) -> Option<(&'static str, Vec<&'static str>)> {
    match kind {
        ProjectKind::Cargo => Some(("cargo", vec!["test", "--quiet"])),
        ProjectKind::Node => Some(("npm", vec!["test", "--silent"])),
        ProjectKind::Python => Some(("pytest", vec!["-q"])),
        ProjectKind::Go => Some(("go", vec!["test", "./..."])),
        ProjectKind::Make => Some(("make", vec!["test"])),
        ProjectKind::Unknown => None,
    }
}

pub struct RunLintTool;

#[async_trait]
impl Tool for RunLintTool {
    fn name(&self) -> &str {
        "run_lint"
    }

    fn description(&self) -> &str {
        "Run the project's linter. The command is chosen from the detected project type."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Check
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let kind = detect_project(&ctx.workspace_root);
        match lint_argv(kind) {
            Some((program, argv)) => {
                run_process(program, &argv, &ctx.workspace_root, LINT_TIMEOUT).await
            }
            None => Ok(json!({
                "error": "No recognised project type",
                "hint": "Expected Cargo.toml, package.json, pyproject.toml, go.mod, or a Makefile."
            })),
        }
    }
}

pub struct RunTestsTool;

#[async_trait]
impl Tool for RunTestsTool {
    fn name(&self) -> &str {
        "run_tests"
    }

    fn description(&self) -> &str {
        "Run the project's test suite. The command is chosen from the detected project type."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Check
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let kind = detect_project(&ctx.workspace_root);
        match test_argv(kind) {
            Some((program, argv)) => {
                run_process(program, &argv, &ctx.workspace_root, TEST_TIMEOUT).await
            }
            None => Ok(json!({
                "error": "No recognised project type",
                "hint": "Expected Cargo.toml, package.json, pyproject.toml, go.mod, or a Makefile."
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_cargo_first() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        assert_eq!(detect_project(dir.path()), ProjectKind::Cargo);
    }

    #[test]
    fn detects_node_python_go_make() {
        let cases = [
            ("package.json", ProjectKind::Node),
            ("pyproject.toml", ProjectKind::Python),
            ("go.mod", ProjectKind::Go),
            ("Makefile", ProjectKind::Make),
        ];
        for (marker, expected) in cases {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join(marker), "").unwrap();
            assert_eq!(detect_project(dir.path()), expected, "{marker}");
        }
    }

    #[test]
    fn empty_dir_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_project(dir.path()), ProjectKind::Unknown);
    }

    #[tokio::test]
    async fn unknown_project_returns_hint() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext {
            workspace_root: dir.path().to_path_buf(),
            session_id: "t".into(),
            auto_mode: true,
        };
        let result = RunLintTool.execute(json!({}), &ctx).await.unwrap();
        assert!(result["hint"].as_str().unwrap().contains("Cargo.toml"));
    }
}
