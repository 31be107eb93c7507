//! Route handlers.
//!
//! `/chat` carries both streaming chat and agent turns: when the client
//! accepts `text/event-stream` the response is an SSE stream of
//! `data: <json>` frames, otherwise the events are collected and returned
//! as one JSON array. Every uncaught failure inside a run is mapped to a
//! terminal `final` frame; the stream always ends.

use crate::{INTERACTIVE_MAX_STEPS, SharedState};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Json, Response};
use futures::StreamExt;
use isocode_core::{AgentEvent, ChatOptions, EventSink, Message, Provider, SessionError};
use isocode_engine::{ContextAttachment, Decision, OpenRequest};
use isocode_session::ConversationStore;
use serde::Deserialize;
use serde_json::{Value, json};
use std::convert::Infallible;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info};

// ── Small endpoints ───────────────────────────────────────────────────────

pub async fn status_page() -> Html<String> {
    Html(format!(
        "<html><body><h1>isocode</h1>\
         <p>Local agent runtime v{} is running.</p>\
         <p>POST /chat to talk to it; GET /health for backend status.</p>\
         </body></html>",
        env!("CARGO_PKG_VERSION")
    ))
}

pub async fn health(State(state): State<SharedState>) -> Json<Value> {
    let report = state.provider.health().await;
    Json(serde_json::to_value(report).unwrap_or_else(|_| json!({ "ok": false })))
}

/// Always HTTP 200; backend failure is carried in the body.
pub async fn models(State(state): State<SharedState>) -> Json<Value> {
    let provider = state.provider.name().to_string();
    match state.provider.list_models().await {
        Ok(models) => Json(json!({ "models": models, "provider": provider })),
        Err(e) => Json(json!({
            "models": [],
            "provider": provider,
            "error": e.to_string(),
        })),
    }
}

pub async fn update_config(
    State(state): State<SharedState>,
    Json(update): Json<Value>,
) -> Json<Value> {
    let snapshot = {
        let mut config = state.config.write().await;
        config.merge_update(&update);
        if let Err(e) = config.save() {
            error!(error = %e, "failed to persist user config");
        }
        config.clone()
    };

    state.dispatcher.apply_permissions(&snapshot.permissions).await;
    state.dispatcher.refresh_external(&snapshot.mcp_servers).await;

    let mut redacted = snapshot.clone();
    redacted.api_key = None;
    Json(json!({ "ok": true, "config": redacted }))
}

pub async fn mcp_status(State(state): State<SharedState>) -> Json<Value> {
    let servers = {
        let config = state.config.read().await;
        crate::merged_mcp_servers(&config, &state.workspace_root)
    };
    state.dispatcher.refresh_external(&servers).await;
    Json(json!({ "servers": state.dispatcher.external.status().await }))
}

// ── Chat / agent ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextFile {
    pub path: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub auto_mode: bool,
    #[serde(default)]
    pub agent_plus: bool,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    /// "approve" | "reject" — re-enters a waiting session.
    #[serde(default)]
    pub decision: Option<String>,
    #[serde(default)]
    pub context: Vec<ContextFile>,
    #[serde(default)]
    pub workspace_root: Option<String>,
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": message })),
    )
        .into_response()
}

fn wants_sse(headers: &HeaderMap) -> bool {
    headers
        .get(axum::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/event-stream"))
}

/// Frame a receiver of events as the response, SSE or collected JSON.
async fn respond(rx: mpsc::Receiver<AgentEvent>, sse: bool) -> Response {
    if sse {
        let stream = ReceiverStream::new(rx).map(|event| {
            let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".into());
            Ok::<_, Infallible>(SseEvent::default().data(data))
        });
        Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
    } else {
        let mut rx = rx;
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        Json(json!({ "events": events })).into_response()
    }
}

pub async fn chat(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(body): Json<ChatBody>,
) -> Response {
    let sse = wants_sse(&headers);

    // ── Decision path: re-enter a waiting session ──
    if let Some(decision) = &body.decision {
        let decision = match decision.as_str() {
            "approve" => Decision::Approve,
            "reject" => Decision::Reject,
            other => return bad_request(&format!("Unknown decision '{other}'")),
        };
        let Some(session_id) = body.session_id.clone() else {
            return bad_request("Missing required field 'sessionId' for a decision");
        };

        let (sink, rx) = EventSink::channel();
        let manager = state.manager.clone();
        tokio::spawn(async move {
            match manager
                .resume_with_decision(&session_id, decision, &sink, INTERACTIVE_MAX_STEPS)
                .await
            {
                Ok(_) => {}
                Err(SessionError::NoPendingDiff(id)) => {
                    sink.send(AgentEvent::Error {
                        content: format!("no pending diff for session {id}"),
                    })
                    .await;
                }
                Err(e) => {
                    sink.send(AgentEvent::Final {
                        content: e.to_string(),
                    })
                    .await;
                }
            }
        });
        return respond(rx, sse).await;
    }

    // ── Fresh turn ──
    let Some(message) = body.message.clone().filter(|m| !m.trim().is_empty()) else {
        return bad_request("Missing required field 'message'");
    };

    let agent_mode = body.auto_mode || body.agent_plus;
    if !agent_mode {
        return stream_chat(&state, &body, message, sse).await;
    }

    let workspace_root = body
        .workspace_root
        .clone()
        .map(PathBuf::from)
        .unwrap_or_else(|| state.workspace_root.clone());
    let session_id = body
        .session_id
        .clone()
        .unwrap_or_else(|| format!("session-{}", std::process::id()));

    let request = OpenRequest {
        session_id,
        agent_plus: body.agent_plus,
        model: body.model.clone(),
        workspace_root,
        message,
        context: body
            .context
            .iter()
            .map(|c| ContextAttachment {
                path: c.path.clone(),
                content: c.content.clone(),
            })
            .collect(),
    };

    info!(session = %request.session_id, plus = request.agent_plus, "agent turn");

    let (sink, rx) = EventSink::channel();
    let manager = state.manager.clone();
    tokio::spawn(async move {
        let handle = manager.open_or_get(request).await;
        manager.run(&handle, &sink, INTERACTIVE_MAX_STEPS).await;
    });

    respond(rx, sse).await
}

/// Plain chat mode: forward token deltas untouched.
async fn stream_chat(
    state: &SharedState,
    body: &ChatBody,
    message: String,
    sse: bool,
) -> Response {
    let model = {
        let config = state.config.read().await;
        body.model.clone().or_else(|| config.model.clone())
    };
    let Some(model) = model else {
        return bad_request("No model selected; pass 'model' or set one via /config");
    };

    let mut messages = Vec::new();
    for file in &body.context {
        messages.push(Message::system(format!(
            "[context file: {}]\n{}",
            file.path, file.content
        )));
    }
    messages.push(Message::user(message));

    let (sink, rx) = EventSink::channel();
    let provider = state.provider.clone();
    tokio::spawn(async move {
        let options = ChatOptions::default();
        match provider.stream(&model, &messages, &options).await {
            Ok(mut deltas) => {
                while let Some(delta) = deltas.recv().await {
                    match delta {
                        Ok(content) => sink.send(AgentEvent::Chunk { content }).await,
                        Err(e) => {
                            sink.send(AgentEvent::Error {
                                content: e.to_string(),
                            })
                            .await;
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                sink.send(AgentEvent::Final {
                    content: format!("The model backend is unavailable: {e}"),
                })
                .await;
                return;
            }
        }
        sink.send(AgentEvent::Done).await;
    });

    respond(rx, sse).await
}

// ── Session control ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdBody {
    pub session_id: String,
}

pub async fn stop_agent(
    State(state): State<SharedState>,
    Json(body): Json<SessionIdBody>,
) -> Response {
    if state.manager.stop(&body.session_id).await {
        Json(json!({ "stopped": true })).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("Session not found: {}", body.session_id) })),
        )
            .into_response()
    }
}

pub async fn clear_session(
    State(state): State<SharedState>,
    Json(body): Json<SessionIdBody>,
) -> Json<Value> {
    let cleared = state.manager.clear(&body.session_id).await;
    Json(json!({ "cleared": cleared }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactBody {
    pub session_id: String,
    #[serde(default)]
    pub model: Option<String>,
}

pub async fn compact(
    State(state): State<SharedState>,
    Json(body): Json<CompactBody>,
) -> Response {
    match state
        .manager
        .compact(&body.session_id, body.model.as_deref())
        .await
    {
        Ok((before, after)) => Json(json!({ "before": before, "after": after })).into_response(),
        Err(e) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchModelBody {
    pub session_id: String,
    pub model: String,
}

pub async fn switch_model(
    State(state): State<SharedState>,
    Json(body): Json<SwitchModelBody>,
) -> Response {
    match state.manager.switch_model(&body.session_id, &body.model).await {
        Ok(()) => Json(json!({ "ok": true, "model": body.model })).into_response(),
        Err(e) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

// ── Persistence inspection ────────────────────────────────────────────────

async fn store_for(state: &SharedState) -> ConversationStore {
    let max_history = state.config.read().await.max_history;
    ConversationStore::new(&state.workspace_root, max_history)
}

pub async fn list_sessions(State(state): State<SharedState>) -> Json<Value> {
    let active = state.manager.list_active().await;
    let saved = store_for(&state).await.list();
    Json(json!({ "active": active, "saved": saved }))
}

pub async fn get_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Response {
    match store_for(&state).await.load(&id) {
        Some(record) => Json(serde_json::to_value(record).unwrap_or(Value::Null)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("No saved conversation '{id}'") })),
        )
            .into_response(),
    }
}

pub async fn delete_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Json<Value> {
    let deleted = store_for(&state).await.delete(&id);
    Json(json!({ "deleted": deleted }))
}

// ── Codebase index ────────────────────────────────────────────────────────

pub async fn codebase(State(state): State<SharedState>) -> Json<Value> {
    let index = state
        .dispatcher
        .index
        .get_or_build(&state.workspace_root)
        .await;
    Json(json!({
        "totalFiles": index.total,
        "dirs": index.dirs.len(),
        "keyFiles": index.key_files.keys().collect::<Vec<_>>(),
    }))
}

pub async fn codebase_reindex(State(state): State<SharedState>) -> Json<Value> {
    state.dispatcher.index.invalidate().await;
    let index = state
        .dispatcher
        .index
        .get_or_build(&state.workspace_root)
        .await;
    Json(json!({ "reindexed": true, "totalFiles": index.total }))
}
