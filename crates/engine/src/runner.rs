//! The ReAct step loop.
//!
//! One run advances a session until it produces a final, asks for approval,
//! is stopped, stalls, or hits the step cap. The loop holds the session
//! mutex for the whole run, which is what makes steps strictly sequential
//! per session; the stop flag lives outside the mutex so `/stop-agent` can
//! land mid-run.

use crate::delegate;
use crate::session::{PendingDiff, Session, SessionHandle};
use isocode_config::AppConfig;
use isocode_context::{
    Compactor, REPLY_RESERVE_TOKENS, estimate_messages_tokens, smart_truncate, trim_to_budget,
};
use isocode_core::{
    AgentEvent, ChatOptions, Directive, DirectiveParser, EventSink, Message, ParseOutcome,
    Provider, ToolCallRequest, ToolContext,
};
use isocode_session::{CheckpointStore, ConversationStore, SummaryStore};
use isocode_tools::Dispatcher;
use isocode_tools::diff::{create_unified_diff, try_apply};
use isocode_tools::path::{confine, to_workspace_relative};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Default hard step cap; the gateway raises this for interactive runs.
pub const DEFAULT_MAX_STEPS: usize = 12;
/// Consecutive steps without an action before the loop gives up.
const NO_PROGRESS_LIMIT: u32 = 10;
/// Checkpoint cadence in steps.
const CHECKPOINT_EVERY: usize = 8;
/// Compaction invocations allowed per session.
const MAX_COMPACTIONS: u32 = 3;
/// Engine-level LLM retries after the adapter's own retries.
const LLM_RETRIES: u32 = 2;

const STOPPED_FINAL: &str = "Agent stopped by user.";

/// Shared collaborators for every run.
pub struct EngineDeps {
    pub provider: Arc<dyn Provider>,
    pub dispatcher: Arc<Dispatcher>,
    pub config: Arc<RwLock<AppConfig>>,
}

/// How a run ended.
#[derive(Debug, Default)]
pub struct RunOutcome {
    /// Terminal final text, when the run produced one.
    pub final_text: Option<String>,
    /// Whether the session should leave the registry.
    pub remove: bool,
    /// Set when the run died on a provider failure (used by delegation).
    pub failure: Option<String>,
}

/// Tools that mutate files and are approval-gated in agent mode.
fn is_mutating_tool(name: &str) -> bool {
    matches!(name, "apply_diff" | "write_file" | "replace_in_file")
}

/// Run the loop for one session until it yields.
pub async fn run_session(
    deps: &EngineDeps,
    handle: &SessionHandle,
    sink: &EventSink,
    max_steps: usize,
) -> RunOutcome {
    let mut session = handle.state.lock().await;
    let config = deps.config.read().await.clone();

    let stores = Stores::for_session(&session, &config);
    let parser = DirectiveParser::new();
    let compactor = Compactor::new();

    let budget = config
        .context_tokens
        .saturating_sub(REPLY_RESERVE_TOKENS)
        .max(512);

    // A session waiting on an approval takes no new actions until the
    // decision arrives.
    if let Some(pending) = &session.pending_diff {
        sink.send(AgentEvent::DiffRequest {
            file_path: pending.file_path.clone(),
            diff: pending.diff.clone(),
            session_id: session.id.clone(),
        })
        .await;
        sink.send(AgentEvent::Error {
            content: "This session is waiting for a diff decision; approve or reject first."
                .into(),
        })
        .await;
        return RunOutcome::default();
    }

    let Some(model) = session.model.clone().or_else(|| config.model.clone()) else {
        let text = "No model selected. Pick one from /models and pass it in the request.";
        return finish(&mut session, sink, &stores, deps, text, Some(text.into())).await;
    };

    info!(session = %session.id, model = %model, plus = session.agent_plus, "agent run starting");

    loop {
        // ── Loop guards ──
        if handle.stop_requested() {
            handle.clear_stop();
            return finish(&mut session, sink, &stores, deps, STOPPED_FINAL, None).await;
        }
        if session.steps_without_action >= NO_PROGRESS_LIMIT {
            let text = "Stopping: too many consecutive steps without an action.";
            return finish(&mut session, sink, &stores, deps, text, None).await;
        }
        if session.step >= max_steps {
            let text = format!("Reached the step limit ({max_steps}).");
            return finish(&mut session, sink, &stores, deps, &text, None).await;
        }
        session.step += 1;

        // ── 1. Compaction check ──
        if session.compactions < MAX_COMPACTIONS
            && estimate_messages_tokens(&session.messages) > budget * 3 / 4
        {
            let result = compactor
                .compact(deps.provider.as_ref(), &model, &session.messages)
                .await;
            if result.after < result.before {
                session.messages = result.messages;
                session.compactions += 1;
                let _ = stores.checkpoints.write(&session.id, &session.checkpoint());
                debug!(session = %session.id, before = result.before, after = result.after, "compacted");
            } else {
                session.compactions = MAX_COMPACTIONS;
            }
        }

        // ── 2. Periodic checkpoint ──
        if session.step % CHECKPOINT_EVERY == 0 {
            let _ = stores.checkpoints.write(&session.id, &session.checkpoint());
        }

        // ── 3. Trim to budget ──
        let view = trim_to_budget(&session.messages, budget);

        // ── 4. Invoke the model ──
        let options = ChatOptions {
            temperature: config
                .temperature
                .unwrap_or(if session.agent_plus { 0.5 } else { 0.2 }),
            max_tokens: 4_096,
            timeout: Duration::from_secs(if session.agent_plus { 300 } else { 180 }),
            expect_json: true,
            tools: deps.dispatcher.schemas().await,
            tool_choice: None,
        };

        let outcome = match deps.provider.call(&model, &view, &options).await {
            Ok(outcome) => {
                session.retries = 0;
                outcome
            }
            Err(e) if e.is_model_missing() => {
                let text = e.to_string();
                return finish(&mut session, sink, &stores, deps, &text, Some(text.clone())).await;
            }
            Err(e) if session.retries < LLM_RETRIES => {
                session.retries += 1;
                let note = format!(
                    "LLM call failed ({e}); retrying ({}/{LLM_RETRIES}).",
                    session.retries
                );
                warn!(session = %session.id, error = %e, "llm retry");
                sink.send(AgentEvent::Thought {
                    content: note,
                })
                .await;
                continue;
            }
            Err(e) => {
                let text = format!("The model backend is unavailable: {e}");
                return finish(&mut session, sink, &stores, deps, &text, Some(e.to_string()))
                    .await;
            }
        };

        // ── 5/6. Interpret and dispatch ──
        let step_result = if outcome.tool_calls.is_empty() {
            let directive = match parser.parse(&outcome.content) {
                ParseOutcome::Directive(d) => d,
                ParseOutcome::Unparsed => {
                    session.push(Message::assistant(&outcome.content));
                    session.push(Message::user(
                        "[format reminder] Reply with exactly one JSON directive object: \
                         thought, action, diff_request, or final.",
                    ));
                    session.steps_without_action += 1;
                    continue;
                }
            };
            handle_directive(deps, &mut session, sink, &model, directive).await
        } else {
            handle_native_calls(deps, &mut session, sink, &model, outcome.tool_calls).await
        };

        match step_result {
            StepResult::Continue => {}
            StepResult::AwaitApproval => {
                // Leave the session registered and waiting.
                stores.save(&session);
                let _ = stores.checkpoints.write(&session.id, &session.checkpoint());
                return RunOutcome::default();
            }
            StepResult::Finished(text) => {
                return finish(&mut session, sink, &stores, deps, &text, None).await;
            }
        }
    }
}

enum StepResult {
    Continue,
    AwaitApproval,
    Finished(String),
}

async fn handle_native_calls(
    deps: &EngineDeps,
    session: &mut Session,
    sink: &EventSink,
    model: &str,
    calls: Vec<ToolCallRequest>,
) -> StepResult {
    for call in calls {
        let directive = Directive::Action {
            tool: call.name,
            args: call.args,
        };
        match handle_directive(deps, session, sink, model, directive).await {
            StepResult::Continue => {}
            other => return other,
        }
    }
    StepResult::Continue
}

async fn handle_directive(
    deps: &EngineDeps,
    session: &mut Session,
    sink: &EventSink,
    model: &str,
    directive: Directive,
) -> StepResult {
    match directive {
        Directive::Thought { content } => {
            session.push(Message::assistant(
                Directive::Thought {
                    content: content.clone(),
                }
                .to_json(),
            ));
            sink.send(AgentEvent::Thought {
                content: content.clone(),
            })
            .await;

            session.note_thought(&content);
            session.consecutive_finals = 0;
            session.steps_without_action += 1;
            session.thought_streak += 1;
            if session.thought_streak >= 2 {
                session.push(Message::user(
                    "[nudge] You have been thinking without acting. Emit an action directive next.",
                ));
                session.thought_streak = 0;
            }
            StepResult::Continue
        }

        Directive::Action { tool, args } => {
            session.consecutive_finals = 0;
            session.thought_streak = 0;

            if !session.agent_plus && is_mutating_tool(&tool) {
                return propose_diff(session, sink, &tool, &args).await;
            }

            session.steps_without_action = 0;
            session.push(Message::assistant(
                Directive::Action {
                    tool: tool.clone(),
                    args: args.clone(),
                }
                .to_json(),
            ));
            sink.send(AgentEvent::Action {
                tool: tool.clone(),
                args: args.clone(),
            })
            .await;

            let ctx = ToolContext {
                workspace_root: session.workspace_root.clone(),
                session_id: session.id.clone(),
                auto_mode: true,
            };
            let outcome = deps.dispatcher.run(&tool, args.clone(), &ctx).await;
            let observation = annotate_observation(outcome.payload);
            let observation_text = observation.to_string();

            session.push(Message::tool(&observation_text));
            sink.send(AgentEvent::Observation {
                content: observation_text,
            })
            .await;

            if outcome.success && session.agent_plus && is_mutating_tool(&tool)
                && let Some(path) = args["path"].as_str()
            {
                sink.send(AgentEvent::OpenFile {
                    path: path.replace('\\', "/"),
                })
                .await;
            }
            StepResult::Continue
        }

        Directive::DiffRequest { file_path, diff } => {
            session.consecutive_finals = 0;
            session.thought_streak = 0;
            session.steps_without_action = 0;
            session.push(Message::assistant(
                Directive::DiffRequest {
                    file_path: file_path.clone(),
                    diff: diff.clone(),
                }
                .to_json(),
            ));

            if session.agent_plus {
                // Synthetic auto-approval: apply immediately.
                let ctx = ToolContext {
                    workspace_root: session.workspace_root.clone(),
                    session_id: session.id.clone(),
                    auto_mode: true,
                };
                let outcome = deps
                    .dispatcher
                    .run(
                        "apply_diff",
                        json!({ "path": file_path, "diff": diff }),
                        &ctx,
                    )
                    .await;
                let observation = annotate_observation(outcome.payload).to_string();
                session.push(Message::tool(&observation));
                sink.send(AgentEvent::Observation {
                    content: observation,
                })
                .await;
                return StepResult::Continue;
            }

            let normalized = file_path.replace('\\', "/");
            session.pending_diff = Some(PendingDiff {
                file_path: normalized.clone(),
                diff: diff.clone(),
            });
            sink.send(AgentEvent::DiffRequest {
                file_path: normalized,
                diff,
                session_id: session.id.clone(),
            })
            .await;
            StepResult::AwaitApproval
        }

        Directive::Delegate { tasks } => {
            if !session.agent_plus {
                // Not a directive in agent mode; fall through to the format
                // reminder.
                session.push(Message::assistant(
                    Directive::Delegate { tasks }.to_json(),
                ));
                session.push(Message::user(
                    "[format reminder] Reply with exactly one JSON directive object: \
                     thought, action, diff_request, or final.",
                ));
                session.steps_without_action += 1;
                return StepResult::Continue;
            }
            if session.delegation_disabled {
                session.push(Message::user(
                    "[nudge] Delegation is unavailable. Continue in single-agent mode.",
                ));
                session.steps_without_action += 1;
                return StepResult::Continue;
            }

            session.consecutive_finals = 0;
            session.thought_streak = 0;
            session.push(Message::assistant(
                Directive::Delegate {
                    tasks: tasks.clone(),
                }
                .to_json(),
            ));

            match delegate::run_delegation(deps, session, model, &tasks).await {
                Ok(combined) => {
                    session.steps_without_action = 0;
                    let observation = json!({
                        "swarm": true,
                        "results": tasks.len(),
                        "content": combined,
                    })
                    .to_string();
                    session.push(Message::tool(&observation));
                    sink.send(AgentEvent::Observation {
                        content: observation,
                    })
                    .await;
                }
                Err(e) => {
                    warn!(session = %session.id, error = %e, "delegation failed");
                    session.delegation_disabled = true;
                    session.push(Message::user(format!(
                        "[nudge] Delegation failed ({e}). Continue in single-agent mode.",
                    )));
                    session.steps_without_action += 1;
                }
            }
            StepResult::Continue
        }

        Directive::Final { content } => {
            // Up to two continuation nudges before a premature final is
            // accepted anyway.
            if !session.plan_satisfied() && session.consecutive_finals < 2 {
                session.consecutive_finals += 1;
                session.push(Message::assistant(
                    Directive::Final {
                        content: content.clone(),
                    }
                    .to_json(),
                ));
                session.push(Message::user(format!(
                    "[nudge] Only {}/{} planned tasks are complete. Continue with the next task.",
                    session.completed_tasks, session.total_tasks
                )));
                session.steps_without_action += 1;
                return StepResult::Continue;
            }
            session.push(Message::assistant(
                Directive::Final {
                    content: content.clone(),
                }
                .to_json(),
            ));
            StepResult::Finished(content)
        }
    }
}

/// Agent-mode interception of mutating tools: synthesise a unified diff from
/// the current and proposed contents, record it as pending, and end the run.
async fn propose_diff(
    session: &mut Session,
    sink: &EventSink,
    tool: &str,
    args: &Value,
) -> StepResult {
    let Some(path) = args["path"].as_str() else {
        session.push(Message::tool(
            json!({ "error": format!("{tool} requires a 'path' argument") }).to_string(),
        ));
        return StepResult::Continue;
    };

    let current = match confine(&session.workspace_root, path) {
        Ok(absolute) => tokio::fs::read_to_string(&absolute).await.unwrap_or_default(),
        Err(e) => {
            let observation = json!({
                "error": format!("Security: {e}"),
            })
            .to_string();
            session.push(Message::tool(&observation));
            sink.send(AgentEvent::Observation {
                content: observation,
            })
            .await;
            return StepResult::Continue;
        }
    };

    let relative = match confine(&session.workspace_root, path) {
        Ok(absolute) => to_workspace_relative(&session.workspace_root, &absolute),
        Err(_) => path.replace('\\', "/"),
    };

    let diff = match tool {
        "write_file" => {
            let proposed = args["content"].as_str().unwrap_or_default();
            create_unified_diff(&relative, &current, proposed)
        }
        "replace_in_file" => {
            let find = args["find"].as_str().unwrap_or_default();
            let replace = args["replace"].as_str().unwrap_or_default();
            if find.is_empty() || !current.contains(find) {
                let observation = json!({
                    "error": "'find' text not present in file",
                    "hint": "Read the file first and copy the exact snippet.",
                })
                .to_string();
                session.push(Message::tool(&observation));
                sink.send(AgentEvent::Observation {
                    content: observation,
                })
                .await;
                return StepResult::Continue;
            }
            let proposed = if args["all"].as_bool().unwrap_or(false) {
                current.replace(find, replace)
            } else {
                current.replacen(find, replace, 1)
            };
            create_unified_diff(&relative, &current, &proposed)
        }
        _ => {
            // apply_diff carries the diff itself.
            let diff = args["diff"].as_str().unwrap_or_default().to_string();
            if try_apply(&current, &diff).is_none() {
                let observation = json!({
                    "error": "diff does not apply to the current file contents",
                    "hint": "Re-read the file and regenerate the diff.",
                })
                .to_string();
                session.push(Message::tool(&observation));
                sink.send(AgentEvent::Observation {
                    content: observation,
                })
                .await;
                return StepResult::Continue;
            }
            diff
        }
    };

    if diff.is_empty() {
        let observation = json!({ "content": "No changes: proposed content is identical." }).to_string();
        session.push(Message::tool(&observation));
        sink.send(AgentEvent::Observation {
            content: observation,
        })
        .await;
        return StepResult::Continue;
    }

    session.steps_without_action = 0;
    session.push(Message::assistant(
        Directive::DiffRequest {
            file_path: relative.clone(),
            diff: diff.clone(),
        }
        .to_json(),
    ));
    session.pending_diff = Some(PendingDiff {
        file_path: relative.clone(),
        diff: diff.clone(),
    });
    sink.send(AgentEvent::DiffRequest {
        file_path: relative,
        diff,
        session_id: session.id.clone(),
    })
    .await;
    StepResult::AwaitApproval
}

/// Append a probe hint to observations that look like missing-file errors.
fn annotate_observation(mut payload: Value) -> Value {
    let text = payload.to_string();
    let lower = text.to_lowercase();
    if (lower.contains("enoent") || lower.contains("no such file"))
        && let Some(map) = payload.as_object_mut()
        && !map.contains_key("hint")
    {
        map.insert(
            "hint".into(),
            Value::String("The file may not exist. Probe the directory with list_files.".into()),
        );
    }
    payload
}

struct Stores {
    conversations: ConversationStore,
    checkpoints: CheckpointStore,
    summaries: SummaryStore,
    model: Option<String>,
}

impl Stores {
    fn for_session(session: &Session, config: &AppConfig) -> Self {
        Self {
            conversations: ConversationStore::new(&session.workspace_root, config.max_history),
            checkpoints: CheckpointStore::new(&session.workspace_root),
            summaries: SummaryStore::new(&session.workspace_root),
            model: session.model.clone().or_else(|| config.model.clone()),
        }
    }

    fn save(&self, session: &Session) {
        if let Err(e) = self.conversations.save(
            &session.id,
            self.model.as_deref(),
            session.compactions > 0,
            &session.messages,
        ) {
            warn!(session = %session.id, error = %e, "conversation save failed");
        }
    }
}

/// Every terminating path: emit the final, persist, checkpoint, summarise.
async fn finish(
    session: &mut Session,
    sink: &EventSink,
    stores: &Stores,
    deps: &EngineDeps,
    text: &str,
    failure: Option<String>,
) -> RunOutcome {
    sink.send(AgentEvent::Final {
        content: text.to_string(),
    })
    .await;

    // Record the final in the history when the loop itself produced it
    // (stop, stall, step cap, provider failure).
    let is_recorded = session
        .messages
        .last()
        .is_some_and(|m| m.content.contains(text));
    if !is_recorded {
        session.push(Message::assistant(
            Directive::Final {
                content: text.to_string(),
            }
            .to_json(),
        ));
    }

    stores.save(session);
    let _ = stores.checkpoints.write(&session.id, &session.checkpoint());

    let summary = generate_summary(deps, stores, session, text).await;
    let _ = stores.summaries.save(&session.id, &summary);

    info!(session = %session.id, steps = session.step, "agent run finished");
    RunOutcome {
        final_text: Some(text.to_string()),
        remove: true,
        failure,
    }
}

/// LLM-generated session summary with a deterministic fallback.
async fn generate_summary(
    deps: &EngineDeps,
    stores: &Stores,
    session: &Session,
    final_text: &str,
) -> String {
    let first_request = session
        .messages
        .iter()
        .find(|m| m.role == isocode_core::Role::User)
        .map(|m| smart_truncate(&m.content, 200))
        .unwrap_or_default();
    let fallback = format!(
        "Asked: {first_request}. Outcome: {}",
        smart_truncate(final_text, 300)
    );

    let Some(model) = &stores.model else {
        return fallback;
    };

    let request = vec![
        Message::system(
            "Summarize this coding session in 2-3 sentences: what was asked, what was done, \
             and the current state. Reply with the summary only.",
        ),
        Message::user(
            session
                .messages
                .iter()
                .map(|m| smart_truncate(&m.content, 300))
                .collect::<Vec<_>>()
                .join("\n"),
        ),
    ];
    let options = ChatOptions {
        temperature: 0.2,
        max_tokens: 256,
        timeout: Duration::from_secs(30),
        expect_json: false,
        tools: Vec::new(),
        tool_choice: None,
    };

    match deps.provider.call(model, &request, &options).await {
        Ok(outcome) if !outcome.content.trim().is_empty() => outcome.content.trim().to_string(),
        _ => fallback,
    }
}
