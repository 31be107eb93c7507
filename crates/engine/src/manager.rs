//! The session manager: a process-wide registry of active sessions.
//!
//! One mutex guards the map; all mutation of a session's fields happens
//! inside its owning run, which holds the per-session mutex. The manager
//! spawns no tasks of its own; concurrency lives in the HTTP handlers and
//! the delegation pool.

use crate::prompt::render_system_prompt;
use crate::runner::{EngineDeps, RunOutcome, run_session};
use crate::session::{Session, SessionHandle};
use isocode_context::{Compactor, smart_truncate};
use isocode_core::{AgentEvent, EventSink, Message, SessionError, ToolContext};
use isocode_session::{CheckpointStore, ProjectContext, SummaryStore, sanitize_session_id};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Cap on resumed checkpoint text injected into the system prompt.
const CHECKPOINT_RESUME_CAP: usize = 1_500;
/// Cap on auto-gathered relevance context appended to the first message.
const AUTO_CONTEXT_CAP: usize = 3_000;
/// Cap per attached context file.
const ATTACHMENT_CAP: usize = 4_000;

/// An explicit context attachment from the editor.
#[derive(Debug, Clone)]
pub struct ContextAttachment {
    pub path: String,
    pub content: String,
}

/// Parameters for `open_or_get`.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub session_id: String,
    pub agent_plus: bool,
    pub model: Option<String>,
    pub workspace_root: PathBuf,
    pub message: String,
    pub context: Vec<ContextAttachment>,
}

/// User decision on a pending diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

pub struct SessionManager {
    sessions: Mutex<HashMap<String, Arc<SessionHandle>>>,
    pub deps: Arc<EngineDeps>,
}

impl SessionManager {
    pub fn new(deps: Arc<EngineDeps>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            deps,
        }
    }

    /// Fetch or create a session and append the incoming user message.
    pub async fn open_or_get(&self, request: OpenRequest) -> Arc<SessionHandle> {
        let id = sanitize_session_id(&request.session_id);
        let mut sessions = self.sessions.lock().await;

        if let Some(handle) = sessions.get(&id) {
            let handle = handle.clone();
            drop(sessions);
            {
                let mut session = handle.state.lock().await;
                if session.model.is_none() {
                    session.model = request.model.clone();
                }
                session.push(Message::user(compose_user_message(&request, None)));
            }
            debug!(session = %id, "resumed existing session");
            return handle;
        }

        let session = self.build_session(&id, &request).await;
        let handle = Arc::new(SessionHandle::new(session));
        sessions.insert(id.clone(), handle.clone());
        info!(session = %id, plus = request.agent_plus, "session created");
        handle
    }

    async fn build_session(&self, id: &str, request: &OpenRequest) -> Session {
        let config = self.deps.config.read().await.clone();
        let mut session = Session::new(
            id,
            request.agent_plus,
            request.model.clone().or_else(|| config.model.clone()),
            request.workspace_root.clone(),
        );

        // ── System prompt: fixed part + injected workspace context ──
        let mut system = render_system_prompt(
            &self.deps.dispatcher,
            request.agent_plus,
            config.system_prompt_override.as_deref(),
        );

        if !request.context.is_empty() {
            let paths: Vec<&str> = request.context.iter().map(|c| c.path.as_str()).collect();
            system.push_str(&format!(
                "\n\nThe user attached these files to the request: {}. Work from their \
                 contents in the user message before reading anything else.",
                paths.join(", ")
            ));
        }

        let project = ProjectContext::new(&request.workspace_root);
        if let Some(summary) = project.summary() {
            system.push_str("\n\nProject context:\n");
            system.push_str(&summary);
        }

        let index = self
            .deps
            .dispatcher
            .index
            .get_or_build(&request.workspace_root)
            .await;
        system.push_str("\n\nProject map:\n");
        system.push_str(&index.project_map(1_500));

        if let Some(rules) = project.rules() {
            system.push_str("\n\nProject rules:\n");
            system.push_str(&rules);
        }

        let summaries = SummaryStore::new(&request.workspace_root);
        if let Some(primer) = summaries.recent_primer() {
            system.push_str("\n\nFrom recent sessions:\n");
            system.push_str(&primer);
        }

        let checkpoints = CheckpointStore::new(&request.workspace_root);
        if let Some(checkpoint) = checkpoints.load(id) {
            system.push_str("\n\nResuming from a prior checkpoint:\n");
            system.push_str(&smart_truncate(&checkpoint, CHECKPOINT_RESUME_CAP));
        }

        session.push(Message::system(system));

        // ── Initial user message, with auto-gathered relevance context when
        // no explicit attachments came along ──
        let auto_context = if request.context.is_empty() {
            index.gather_context(&request.message, AUTO_CONTEXT_CAP)
        } else {
            None
        };
        session.push(Message::user(compose_user_message(
            request,
            auto_context.as_deref(),
        )));

        let _ = checkpoints.write(id, &session.checkpoint());
        session
    }

    /// Run the loop for a session, removing it from the registry when the
    /// run says so.
    pub async fn run(
        &self,
        handle: &Arc<SessionHandle>,
        sink: &EventSink,
        max_steps: usize,
    ) -> RunOutcome {
        let outcome = run_session(&self.deps, handle, sink, max_steps).await;
        if outcome.remove {
            let id = handle.state.lock().await.id.clone();
            self.sessions.lock().await.remove(&id);
        }
        outcome
    }

    /// Approve or reject the pending diff, then resume the loop.
    pub async fn resume_with_decision(
        &self,
        session_id: &str,
        decision: Decision,
        sink: &EventSink,
        max_steps: usize,
    ) -> Result<RunOutcome, SessionError> {
        let id = sanitize_session_id(session_id);
        let handle = self
            .sessions
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.clone()))?;

        {
            let mut session = handle.state.lock().await;
            let pending = session
                .pending_diff
                .take()
                .ok_or_else(|| SessionError::NoPendingDiff(id.clone()))?;

            let observation = match decision {
                Decision::Approve => {
                    let ctx = ToolContext {
                        workspace_root: session.workspace_root.clone(),
                        session_id: session.id.clone(),
                        auto_mode: true,
                    };
                    // Server-side diff authority: apply the stored diff.
                    let outcome = self
                        .deps
                        .dispatcher
                        .run(
                            "apply_diff",
                            json!({ "path": pending.file_path, "diff": pending.diff }),
                            &ctx,
                        )
                        .await;
                    json!({ "content": "User APPROVED.", "result": outcome.payload }).to_string()
                }
                Decision::Reject => json!({
                    "content": "User REJECTED the proposed diff. Propose a different approach.",
                })
                .to_string(),
            };

            session.push(Message::tool(&observation));
            sink.send(AgentEvent::Observation {
                content: observation,
            })
            .await;
        }

        Ok(self.run(&handle, sink, max_steps).await)
    }

    /// Request cooperative termination. The loop observes the flag between
    /// steps.
    pub async fn stop(&self, session_id: &str) -> bool {
        let id = sanitize_session_id(session_id);
        match self.sessions.lock().await.get(&id) {
            Some(handle) => {
                handle.request_stop();
                true
            }
            None => false,
        }
    }

    /// Remove a session from the registry.
    pub async fn clear(&self, session_id: &str) -> bool {
        let id = sanitize_session_id(session_id);
        self.sessions.lock().await.remove(&id).is_some()
    }

    /// Run compaction immediately; returns (before, after) message counts.
    pub async fn compact(
        &self,
        session_id: &str,
        model: Option<&str>,
    ) -> Result<(usize, usize), SessionError> {
        let id = sanitize_session_id(session_id);
        let handle = self
            .sessions
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.clone()))?;

        let mut session = handle.state.lock().await;
        let config_model = self.deps.config.read().await.model.clone();
        let model = model
            .map(str::to_string)
            .or_else(|| session.model.clone())
            .or(config_model)
            .unwrap_or_default();

        let result = Compactor::new()
            .compact(self.deps.provider.as_ref(), &model, &session.messages)
            .await;
        let counts = (result.before, result.after);
        if result.after < result.before {
            session.messages = result.messages;
            session.compactions += 1;
        }
        Ok(counts)
    }

    /// Record a new model; longer conversations are compacted and a switch
    /// observation is appended. Resets the compaction counter.
    pub async fn switch_model(
        &self,
        session_id: &str,
        new_model: &str,
    ) -> Result<(), SessionError> {
        let id = sanitize_session_id(session_id);
        let handle = self
            .sessions
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.clone()))?;

        let mut session = handle.state.lock().await;
        let previous = session.model.replace(new_model.to_string());

        if session.messages.len() > 4 {
            let result = Compactor::new()
                .compact(self.deps.provider.as_ref(), new_model, &session.messages)
                .await;
            if result.after < result.before {
                session.messages = result.messages;
            }
            session.push(Message::assistant(
                json!({
                    "type": "observation",
                    "content": format!(
                        "[model switched from {} to {new_model}]",
                        previous.as_deref().unwrap_or("none")
                    ),
                })
                .to_string(),
            ));
        }
        session.compactions = 0;
        Ok(())
    }

    /// Ids of live sessions with their step counts.
    pub async fn list_active(&self) -> Vec<serde_json::Value> {
        let sessions = self.sessions.lock().await;
        let mut out = Vec::with_capacity(sessions.len());
        for (id, handle) in sessions.iter() {
            // A session mid-run holds its state lock; report it as busy
            // rather than blocking the listing.
            let entry = match handle.state.try_lock() {
                Ok(session) => json!({
                    "id": id,
                    "step": session.step,
                    "agentPlus": session.agent_plus,
                    "messages": session.messages.len(),
                    "pendingDiff": session.pending_diff.is_some(),
                }),
                Err(_) => json!({ "id": id, "busy": true }),
            };
            out.push(entry);
        }
        out.sort_by(|a, b| a["id"].as_str().cmp(&b["id"].as_str()));
        out
    }
}

fn compose_user_message(request: &OpenRequest, auto_context: Option<&str>) -> String {
    let mut message = request.message.clone();

    for attachment in &request.context {
        message.push_str(&format!(
            "\n\n[attached file: {}]\n{}",
            attachment.path,
            smart_truncate(&attachment.content, ATTACHMENT_CAP)
        ));
    }
    if let Some(context) = auto_context {
        message.push_str("\n\n[workspace context]\n");
        message.push_str(context);
    }
    message
}
