//! Agent memory: a tool-accessible key-value file.
//!
//! Single file at `.isocode/agent-memory.json`; at most 200 keys, each value
//! capped at 8,000 characters, oldest key evicted on overflow. Writes are
//! last-write-wins across sessions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use isocode_core::{Tool, ToolCategory, ToolContext, ToolError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const MAX_KEYS: usize = 200;
const MAX_VALUE_CHARS: usize = 8_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemoryEntry {
    value: String,
    updated_at: DateTime<Utc>,
}

fn memory_path(workspace: &Path) -> PathBuf {
    workspace.join(".isocode").join("agent-memory.json")
}

fn read_all(workspace: &Path) -> BTreeMap<String, MemoryEntry> {
    std::fs::read_to_string(memory_path(workspace))
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_default()
}

fn write_all(workspace: &Path, entries: &BTreeMap<String, MemoryEntry>) -> Result<(), ToolError> {
    let path = memory_path(workspace);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ToolError::ExecutionFailed {
            tool_name: "memory_set".into(),
            reason: e.to_string(),
        })?;
    }
    let text = serde_json::to_string_pretty(entries).map_err(|e| ToolError::ExecutionFailed {
        tool_name: "memory_set".into(),
        reason: e.to_string(),
    })?;
    std::fs::write(&path, text).map_err(|e| ToolError::ExecutionFailed {
        tool_name: "memory_set".into(),
        reason: e.to_string(),
    })
}

pub struct MemorySetTool;

#[async_trait]
impl Tool for MemorySetTool {
    fn name(&self) -> &str {
        "memory_set"
    }

    fn description(&self) -> &str {
        "Store a value under a key in persistent agent memory. Survives across sessions."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Memory
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "key": { "type": "string" },
                "value": { "type": "string" }
            },
            "required": ["key", "value"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let key = args["key"]
            .as_str()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'key'".into()))?;
        let value = args["value"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'value'".into()))?;

        let mut capped = value.to_string();
        if capped.chars().count() > MAX_VALUE_CHARS {
            capped = capped.chars().take(MAX_VALUE_CHARS).collect();
        }

        let mut entries = read_all(&ctx.workspace_root);
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: capped,
                updated_at: Utc::now(),
            },
        );

        while entries.len() > MAX_KEYS {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.updated_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => entries.remove(&k),
                None => break,
            };
        }

        write_all(&ctx.workspace_root, &entries)?;
        Ok(json!({ "stored": true, "key": key, "keys": entries.len() }))
    }
}

pub struct MemoryGetTool;

#[async_trait]
impl Tool for MemoryGetTool {
    fn name(&self) -> &str {
        "memory_get"
    }

    fn description(&self) -> &str {
        "Read a value from persistent agent memory."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Memory
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "key": { "type": "string" } },
            "required": ["key"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let key = args["key"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'key'".into()))?;

        match read_all(&ctx.workspace_root).get(key) {
            Some(entry) => Ok(json!({ "key": key, "value": entry.value })),
            None => Ok(json!({ "key": key, "value": Value::Null, "hint": "Key not set. Use memory_list to see stored keys." })),
        }
    }
}

pub struct MemoryListTool;

#[async_trait]
impl Tool for MemoryListTool {
    fn name(&self) -> &str {
        "memory_list"
    }

    fn description(&self) -> &str {
        "List the keys stored in persistent agent memory."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Memory
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let keys: Vec<String> = read_all(&ctx.workspace_root).keys().cloned().collect();
        Ok(json!({ "keys": keys }))
    }
}
