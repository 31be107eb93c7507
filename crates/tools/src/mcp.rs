//! External tool servers: JSON-RPC 2.0 over newline-delimited stdio.
//!
//! Each configured server is spawned on first use, handshaken with
//! `initialize` (10 s deadline), then enumerated with `tools/list`. A server
//! that fails to start is recorded as failed and surfaces that error on every
//! attempted use; other servers are unaffected. Configuration changes are
//! detected by hashing the server list, which tears down and respawns the
//! pool.

use isocode_config::McpServerConfig;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const INIT_TIMEOUT: Duration = Duration::from_secs(10);
const CALL_TIMEOUT: Duration = Duration::from_secs(30);
const PROTOCOL_VERSION: &str = "2024-11-05";

/// A tool advertised by a server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalToolInfo {
    pub server: String,
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Status row for `/mcp-status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub name: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tools: Vec<String>,
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    id: u64,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

struct Connection {
    _process: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
}

impl Connection {
    /// Send one request and read responses until the matching id arrives.
    async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value, String> {
        let id = self.next_id;
        self.next_id += 1;

        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method: method.to_string(),
            params,
        };
        let mut line = serde_json::to_string(&request).map_err(|e| e.to_string())?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| format!("write failed: {e}"))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| format!("flush failed: {e}"))?;

        loop {
            let mut buf = String::new();
            let read = self
                .stdout
                .read_line(&mut buf)
                .await
                .map_err(|e| format!("read failed: {e}"))?;
            if read == 0 {
                return Err("server closed its stdout".into());
            }
            let trimmed = buf.trim();
            if trimmed.is_empty() {
                continue;
            }
            let Ok(response) = serde_json::from_str::<JsonRpcResponse>(trimmed) else {
                // Notifications and log lines are skipped.
                continue;
            };
            if response.id != Some(id) {
                continue;
            }
            if let Some(error) = response.error {
                return Err(format!("server error {}: {}", error.code, error.message));
            }
            return Ok(response.result.unwrap_or(Value::Null));
        }
    }

    async fn notify(&mut self, method: &str) -> Result<(), String> {
        let mut line = serde_json::to_string(&json!({
            "jsonrpc": "2.0",
            "method": method,
        }))
        .map_err(|e| e.to_string())?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| format!("write failed: {e}"))?;
        self.stdin.flush().await.map_err(|e| format!("flush failed: {e}"))
    }
}

enum ServerState {
    Running {
        connection: Connection,
        tools: Vec<ExternalToolInfo>,
    },
    Failed(String),
}

/// Owner of every external server child process, shared across sessions.
pub struct McpPool {
    servers: Mutex<HashMap<String, ServerState>>,
    config_hash: Mutex<u64>,
}

impl Default for McpPool {
    fn default() -> Self {
        Self::new()
    }
}

impl McpPool {
    pub fn new() -> Self {
        Self {
            servers: Mutex::new(HashMap::new()),
            config_hash: Mutex::new(0),
        }
    }

    fn hash_configs(configs: &[McpServerConfig]) -> u64 {
        let mut hasher = DefaultHasher::new();
        for config in configs {
            config.name.hash(&mut hasher);
            config.command.hash(&mut hasher);
            config.args.hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Spawn or respawn servers to match `configs`. No-op when the list is
    /// unchanged and the pool is already populated.
    pub async fn ensure_started(&self, configs: &[McpServerConfig]) {
        let hash = Self::hash_configs(configs);
        {
            let mut stored = self.config_hash.lock().await;
            let servers = self.servers.lock().await;
            if *stored == hash && (configs.is_empty() || !servers.is_empty()) {
                return;
            }
            *stored = hash;
        }

        let mut servers = self.servers.lock().await;
        servers.clear();
        for config in configs {
            let state = match Self::start_server(config).await {
                Ok((connection, tools)) => {
                    debug!(server = %config.name, tools = tools.len(), "tool server started");
                    ServerState::Running { connection, tools }
                }
                Err(reason) => {
                    warn!(server = %config.name, error = %reason, "tool server failed to start");
                    ServerState::Failed(reason)
                }
            };
            servers.insert(config.name.clone(), state);
        }
    }

    async fn start_server(
        config: &McpServerConfig,
    ) -> Result<(Connection, Vec<ExternalToolInfo>), String> {
        let mut process = Command::new(&config.command)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| format!("spawn '{}' failed: {e}", config.command))?;

        let stdin = process.stdin.take().ok_or("no stdin handle")?;
        let stdout = process.stdout.take().ok_or("no stdout handle")?;

        let mut connection = Connection {
            _process: process,
            stdin,
            stdout: BufReader::new(stdout),
            next_id: 1,
        };

        let init_params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": { "name": "isocode", "version": env!("CARGO_PKG_VERSION") },
        });
        tokio::time::timeout(INIT_TIMEOUT, connection.request("initialize", Some(init_params)))
            .await
            .map_err(|_| "initialize handshake timed out".to_string())??;
        connection.notify("notifications/initialized").await?;

        let listed = tokio::time::timeout(INIT_TIMEOUT, connection.request("tools/list", None))
            .await
            .map_err(|_| "tools/list timed out".to_string())??;

        let tools = listed["tools"]
            .as_array()
            .map(|tools| {
                tools
                    .iter()
                    .filter_map(|t| {
                        Some(ExternalToolInfo {
                            server: config.name.clone(),
                            name: t["name"].as_str()?.to_string(),
                            description: t["description"].as_str().unwrap_or("").to_string(),
                            input_schema: t["inputSchema"].clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok((connection, tools))
    }

    /// Invoke `tools/call` on one server.
    pub async fn call(&self, server: &str, tool: &str, args: Value) -> Result<Value, String> {
        let mut servers = self.servers.lock().await;
        match servers.get_mut(server) {
            None => Err(format!("unknown tool server '{server}'")),
            Some(ServerState::Failed(reason)) => {
                Err(format!("tool server '{server}' failed to start: {reason}"))
            }
            Some(ServerState::Running { connection, .. }) => {
                let params = json!({ "name": tool, "arguments": args });
                tokio::time::timeout(
                    CALL_TIMEOUT,
                    connection.request("tools/call", Some(params)),
                )
                .await
                .map_err(|_| format!("tool '{tool}' on '{server}' timed out"))?
            }
        }
    }

    /// Every advertised tool across running servers.
    pub async fn list_tools(&self) -> Vec<ExternalToolInfo> {
        let servers = self.servers.lock().await;
        servers
            .values()
            .filter_map(|state| match state {
                ServerState::Running { tools, .. } => Some(tools.clone()),
                ServerState::Failed(_) => None,
            })
            .flatten()
            .collect()
    }

    /// Per-server status for `/mcp-status`.
    pub async fn status(&self) -> Vec<ServerStatus> {
        let servers = self.servers.lock().await;
        let mut out: Vec<ServerStatus> = servers
            .iter()
            .map(|(name, state)| match state {
                ServerState::Running { tools, .. } => ServerStatus {
                    name: name.clone(),
                    ok: true,
                    error: None,
                    tools: tools.iter().map(|t| t.name.clone()).collect(),
                },
                ServerState::Failed(reason) => ServerStatus {
                    name: name.clone(),
                    ok: false,
                    error: Some(reason.clone()),
                    tools: Vec::new(),
                },
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

/// `mcp:<server>:<tool>` naming for dispatch.
pub fn parse_qualified_name(name: &str) -> Option<(&str, &str)> {
    let rest = name.strip_prefix("mcp:")?;
    rest.split_once(':')
}
