//! Configuration loading, merging, and persistence for isocode.
//!
//! Sources are merged in order, later wins: built-in defaults, process
//! environment variables (`ISOCODE_*`), `user-config.json`, and `/config`
//! endpoint updates. Endpoint updates are persisted back to the same file.

use isocode_core::PermissionPolicy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, warn};

/// The root configuration structure.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Backend provider: "local" selects the dual-dialect adapter.
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Base URL of the backend.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Default model identifier; sessions may override per request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// API key for remote chat-completions providers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// HTTP listen port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Context window budget in tokens.
    #[serde(default = "default_context_tokens")]
    pub context_tokens: usize,

    /// Maximum messages kept in a persisted conversation record.
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Sampling temperature override; mode defaults apply when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Delegation worker cap, clamped to 1..=5 at use.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Preferred model for vision subtasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vision_model: Option<String>,

    /// Replaces the built-in agent prompt preamble when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_override: Option<String>,

    /// Permission policy for the gated tool groups.
    #[serde(default)]
    pub permissions: PermissionsConfig,

    /// External tool servers (JSON-RPC over stdio).
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
}

fn default_provider() -> String {
    "local".into()
}
fn default_api_base() -> String {
    "http://localhost:11434".into()
}
fn default_port() -> u16 {
    3742
}
fn default_context_tokens() -> usize {
    16_384
}
fn default_max_history() -> usize {
    100
}
fn default_max_workers() -> usize {
    2
}

impl Default for AppConfig {
    fn default() -> Self {
        serde_json::from_value(Value::Object(Default::default()))
            .unwrap_or_else(|_| unreachable!("defaults deserialize"))
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("provider", &self.provider)
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("port", &self.port)
            .field("context_tokens", &self.context_tokens)
            .field("max_history", &self.max_history)
            .field("temperature", &self.temperature)
            .field("max_workers", &self.max_workers)
            .field("vision_model", &self.vision_model)
            .field("permissions", &self.permissions)
            .field("mcp_servers", &self.mcp_servers)
            .finish()
    }
}

/// Policies for the approval-gated tool groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionsConfig {
    #[serde(default = "default_ask")]
    pub shell: PermissionPolicy,
    #[serde(default = "default_ask")]
    pub write: PermissionPolicy,
    #[serde(default = "default_ask")]
    pub edit: PermissionPolicy,
}

fn default_ask() -> PermissionPolicy {
    PermissionPolicy::Ask
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            shell: PermissionPolicy::Ask,
            write: PermissionPolicy::Ask,
            edit: PermissionPolicy::Ask,
        }
    }
}

/// One external tool server definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl AppConfig {
    /// Load configuration: defaults, then env overrides, then the user
    /// config file.
    pub fn load() -> Self {
        let mut config = Self::default();
        config.apply_env();
        if let Some(path) = user_config_path() {
            match std::fs::read_to_string(&path) {
                Ok(text) => match serde_json::from_str::<Value>(&text) {
                    Ok(update) => {
                        config.merge_update(&update);
                        debug!(path = %path.display(), "Loaded user config");
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "Invalid user config, ignoring"),
                },
                Err(_) => {}
            }
        }
        config
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("ISOCODE_PROVIDER") {
            self.provider = v;
        }
        if let Ok(v) = std::env::var("ISOCODE_API_BASE") {
            self.api_base = v;
        }
        if let Ok(v) = std::env::var("ISOCODE_MODEL") {
            self.model = Some(v);
        }
        if let Ok(v) = std::env::var("ISOCODE_API_KEY") {
            self.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("ISOCODE_PORT")
            && let Ok(port) = v.parse()
        {
            self.port = port;
        }
        if let Ok(v) = std::env::var("ISOCODE_CONTEXT_TOKENS")
            && let Ok(n) = v.parse()
        {
            self.context_tokens = n;
        }
        if let Ok(v) = std::env::var("ISOCODE_VISION_MODEL") {
            self.vision_model = Some(v);
        }
    }

    /// Merge a partial JSON update (the `/config` endpoint body). Unknown
    /// keys are ignored; known keys replace the current value.
    pub fn merge_update(&mut self, update: &Value) {
        let Some(obj) = update.as_object() else {
            return;
        };

        if let Some(v) = obj.get("provider").and_then(Value::as_str) {
            self.provider = v.to_string();
        }
        if let Some(v) = obj.get("apiBase").or_else(|| obj.get("api_base")).and_then(Value::as_str) {
            self.api_base = v.to_string();
        }
        if let Some(v) = obj.get("model").and_then(Value::as_str) {
            self.model = Some(v.to_string());
        }
        if let Some(v) = obj.get("apiKey").or_else(|| obj.get("api_key")).and_then(Value::as_str) {
            self.api_key = Some(v.to_string());
        }
        if let Some(v) = obj
            .get("contextTokens")
            .or_else(|| obj.get("context_tokens"))
            .and_then(Value::as_u64)
        {
            self.context_tokens = v as usize;
        }
        if let Some(v) = obj
            .get("maxHistory")
            .or_else(|| obj.get("max_history"))
            .and_then(Value::as_u64)
        {
            self.max_history = v as usize;
        }
        if let Some(v) = obj.get("temperature").and_then(Value::as_f64) {
            self.temperature = Some(v as f32);
        }
        if let Some(v) = obj
            .get("maxWorkers")
            .or_else(|| obj.get("max_workers"))
            .and_then(Value::as_u64)
        {
            self.max_workers = v as usize;
        }
        if let Some(v) = obj
            .get("visionModel")
            .or_else(|| obj.get("vision_model"))
            .and_then(Value::as_str)
        {
            self.vision_model = Some(v.to_string());
        }
        if let Some(v) = obj
            .get("systemPromptOverride")
            .or_else(|| obj.get("system_prompt_override"))
            .and_then(Value::as_str)
        {
            self.system_prompt_override = Some(v.to_string());
        }
        if let Some(v) = obj.get("permissions") {
            if let Ok(p) = serde_json::from_value::<PermissionsConfig>(v.clone()) {
                self.permissions = p;
            }
        }
        if let Some(v) = obj
            .get("mcpServers")
            .or_else(|| obj.get("mcp_servers"))
        {
            if let Ok(servers) = serde_json::from_value::<Vec<McpServerConfig>>(v.clone()) {
                self.mcp_servers = servers;
            }
        }
    }

    /// Persist the current configuration to `user-config.json`.
    pub fn save(&self) -> std::io::Result<()> {
        let Some(path) = user_config_path() else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&path, text)
    }

    /// Delegation worker cap clamped to the supported range.
    pub fn worker_cap(&self) -> usize {
        self.max_workers.clamp(1, 5)
    }
}

/// `$ISOCODE_CONFIG_DIR/user-config.json`, defaulting to `~/.isocode/`.
pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("ISOCODE_CONFIG_DIR") {
        return Some(PathBuf::from(dir).join("user-config.json"));
    }
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .ok()?;
    Some(PathBuf::from(home).join(".isocode").join("user-config.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_local_backend() {
        let config = AppConfig::default();
        assert_eq!(config.provider, "local");
        assert_eq!(config.api_base, "http://localhost:11434");
        assert_eq!(config.context_tokens, 16_384);
        assert_eq!(config.max_history, 100);
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.permissions.shell, PermissionPolicy::Ask);
    }

    #[test]
    fn merge_update_replaces_known_keys() {
        let mut config = AppConfig::default();
        config.merge_update(&serde_json::json!({
            "model": "qwen3:8b",
            "contextTokens": 32768,
            "permissions": { "shell": "always", "write": "never", "edit": "ask" },
            "unknownKey": true,
        }));
        assert_eq!(config.model.as_deref(), Some("qwen3:8b"));
        assert_eq!(config.context_tokens, 32_768);
        assert_eq!(config.permissions.shell, PermissionPolicy::Always);
        assert_eq!(config.permissions.write, PermissionPolicy::Never);
    }

    #[test]
    fn merge_update_accepts_server_list() {
        let mut config = AppConfig::default();
        config.merge_update(&serde_json::json!({
            "mcpServers": [{ "name": "fs", "command": "mcp-fs", "args": ["--root", "."] }]
        }));
        assert_eq!(config.mcp_servers.len(), 1);
        assert_eq!(config.mcp_servers[0].name, "fs");
        assert_eq!(config.mcp_servers[0].args, vec!["--root", "."]);
    }

    #[test]
    fn worker_cap_clamped() {
        let mut config = AppConfig::default();
        config.max_workers = 12;
        assert_eq!(config.worker_cap(), 5);
        config.max_workers = 0;
        assert_eq!(config.worker_cap(), 1);
    }

    #[test]
    fn debug_redacts_api_key() {
        let mut config = AppConfig::default();
        config.api_key = Some("sk-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn save_and_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        // Env-based path override keeps the test hermetic.
        unsafe { std::env::set_var("ISOCODE_CONFIG_DIR", dir.path()) };

        let mut config = AppConfig::default();
        config.model = Some("llama3.2".into());
        config.save().unwrap();

        let text =
            std::fs::read_to_string(dir.path().join("user-config.json")).unwrap();
        let reloaded: AppConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(reloaded.model.as_deref(), Some("llama3.2"));

        unsafe { std::env::remove_var("ISOCODE_CONFIG_DIR") };
    }
}
