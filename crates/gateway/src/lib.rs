//! HTTP gateway for the isocode runtime.
//!
//! Exposes the chat/agent API consumed by the editor extension: an SSE
//! stream per agent turn, session control endpoints, runtime configuration,
//! and codebase inspection. The boundary owns input validation, SSE framing,
//! timeouts, and CORS, nothing else; all agent behaviour lives in the
//! engine.
//!
//! Built on Axum.

pub mod routes;

use axum::Router;
use axum::routing::{delete, get, post};
use isocode_config::AppConfig;
use isocode_core::Provider;
use isocode_engine::{EngineDeps, SessionManager};
use isocode_providers::LlmAdapter;
use isocode_tools::Dispatcher;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Step cap handed to interactive runs. A hard bound, set high enough that
/// interactive sessions rarely hit it.
pub const INTERACTIVE_MAX_STEPS: usize = 500;

/// Shared state for every route.
pub struct GatewayState {
    pub manager: Arc<SessionManager>,
    pub provider: Arc<dyn Provider>,
    pub dispatcher: Arc<Dispatcher>,
    pub config: Arc<RwLock<AppConfig>>,
    /// Default workspace for listing endpoints when requests omit one.
    pub workspace_root: PathBuf,
}

pub type SharedState = Arc<GatewayState>;

/// Build the router with every route attached.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(routes::status_page))
        .route("/health", get(routes::health))
        .route("/models", get(routes::models))
        .route("/config", post(routes::update_config))
        .route("/mcp-status", get(routes::mcp_status))
        .route("/chat", post(routes::chat))
        .route("/stop-agent", post(routes::stop_agent))
        .route("/clear-session", post(routes::clear_session))
        .route("/compact", post(routes::compact))
        .route("/switch-model", post(routes::switch_model))
        .route("/sessions", get(routes::list_sessions))
        .route("/sessions/{id}", get(routes::get_session))
        .route("/sessions/{id}", delete(routes::delete_session))
        .route("/codebase", get(routes::codebase))
        .route("/codebase/reindex", post(routes::codebase_reindex))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Wire up all subsystems from a configuration and start serving.
pub async fn serve(
    config: AppConfig,
    workspace_root: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let port = config.port;
    let state = build_state(config, workspace_root).await;

    let addr = format!("127.0.0.1:{port}");
    info!(addr = %addr, "gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

/// Merge the configured server list with the workspace's
/// `.isocode/mcp-servers.json`, config entries winning on name clashes.
pub fn merged_mcp_servers(
    config: &AppConfig,
    workspace_root: &std::path::Path,
) -> Vec<isocode_config::McpServerConfig> {
    let mut servers = config.mcp_servers.clone();
    let path = workspace_root.join(".isocode").join("mcp-servers.json");
    if let Ok(text) = std::fs::read_to_string(&path) {
        match serde_json::from_str::<Vec<isocode_config::McpServerConfig>>(&text) {
            Ok(extra) => {
                for server in extra {
                    if !servers.iter().any(|s| s.name == server.name) {
                        servers.push(server);
                    }
                }
            }
            Err(e) => tracing::warn!(
                path = %path.display(),
                error = %e,
                "invalid JSON in mcp-servers.json, ignoring"
            ),
        }
    }
    servers
}

/// Build shared state: one adapter, one dispatcher, one session manager.
pub async fn build_state(config: AppConfig, workspace_root: PathBuf) -> SharedState {
    let provider: Arc<dyn Provider> = Arc::new(LlmAdapter::from_config(&config));
    let dispatcher = Arc::new(Dispatcher::new(
        provider.clone(),
        config.vision_model.clone(),
    ));
    dispatcher.apply_permissions(&config.permissions).await;
    dispatcher
        .refresh_external(&merged_mcp_servers(&config, &workspace_root))
        .await;

    let shared_config = Arc::new(RwLock::new(config));
    let deps = Arc::new(EngineDeps {
        provider: provider.clone(),
        dispatcher: dispatcher.clone(),
        config: shared_config.clone(),
    });

    Arc::new(GatewayState {
        manager: Arc::new(SessionManager::new(deps)),
        provider,
        dispatcher,
        config: shared_config,
        workspace_root,
    })
}
