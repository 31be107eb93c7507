//! Delegation pool: bounded concurrent sub-agents with per-subtask model
//! selection and model-fallback on failure.
//!
//! Tasks are classified (vision / coder / general), each class scores the
//! available models to pick a primary, and the remaining models form a
//! fallback chain. Sub-agents are fresh agent-plus sessions with a 15-step
//! cap whose internal events are not forwarded; only final texts reach the
//! outer session, concatenated in input order.

use crate::prompt::render_system_prompt;
use crate::runner::{EngineDeps, run_session};
use crate::session::{Session, SessionHandle};
use futures::future::join_all;
use isocode_core::{EventSink, Message, ModelInfo, TaskSpec};
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Step cap for every sub-agent.
const WORKER_MAX_STEPS: usize = 15;

static FATAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)memory|heap|ENOMEM|out of memory|ECONNRESET|socket hang up|abort")
        .expect("fatal regex")
});

const VISION_TASK_HINTS: [&str; 6] = [
    "screenshot",
    "browser",
    "image",
    "what is on the screen",
    ".png",
    ".jpg",
];
const CODER_TASK_HINTS: [&str; 8] = [
    "implement", "fix", "refactor", "edit", "write", "file", "apply_diff", "code",
];

const VISION_MODEL_PATTERNS: [&str; 5] = ["llava", "vision", "bakllava", "moondream", "minicpm"];
const CODER_MODEL_PATTERNS: [&str; 6] = ["coder", "code", "deepseek", "starcoder", "codellama", "devstral"];
const GENERAL_MODEL_PATTERNS: [&str; 5] = ["llama", "mistral", "qwen", "gemma", "phi"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskClass {
    Vision,
    Coder,
    General,
}

/// Classify a subtask by its wording.
pub fn classify_task(text: &str) -> TaskClass {
    let lower = text.to_lowercase();
    if VISION_TASK_HINTS.iter().any(|h| lower.contains(h)) {
        TaskClass::Vision
    } else if CODER_TASK_HINTS.iter().any(|h| lower.contains(h)) {
        TaskClass::Coder
    } else {
        TaskClass::General
    }
}

fn class_patterns(class: TaskClass) -> &'static [&'static str] {
    match class {
        TaskClass::Vision => &VISION_MODEL_PATTERNS,
        TaskClass::Coder => &CODER_MODEL_PATTERNS,
        TaskClass::General => &GENERAL_MODEL_PATTERNS,
    }
}

fn score_model(id: &str, patterns: &[&str]) -> usize {
    let lower = id.to_lowercase();
    patterns.iter().filter(|p| lower.contains(*p)).count()
}

fn is_coder_model(id: &str) -> bool {
    score_model(id, &CODER_MODEL_PATTERNS) > 0
}

/// Ordered list of models to try for one task.
pub fn plan_models(
    task: &TaskSpec,
    available: &[ModelInfo],
    session_default: &str,
    vision_model: Option<&str>,
) -> Vec<String> {
    // An explicit hint is used exactly.
    if let Some(hint) = task.model_hint() {
        return vec![hint.to_string()];
    }

    let class = classify_task(task.text());
    let patterns = class_patterns(class);

    let mut ordered: Vec<String> = Vec::new();
    let mut push = |model: &str, ordered: &mut Vec<String>| {
        if !model.is_empty() && !ordered.iter().any(|m| m == model) {
            ordered.push(model.to_string());
        }
    };

    let primary = available
        .iter()
        .map(|m| (score_model(&m.id, patterns), &m.id))
        .filter(|(score, _)| *score > 0)
        .max_by_key(|(score, _)| *score)
        .map(|(_, id)| id.clone());

    match primary {
        Some(primary) => push(&primary, &mut ordered),
        None if class == TaskClass::Vision => {
            // No vision-shaped model. When the session default is itself a
            // coder model, prefer any non-coder model before the configured
            // vision model.
            if is_coder_model(session_default)
                && let Some(non_coder) = available.iter().find(|m| !is_coder_model(&m.id))
            {
                push(&non_coder.id.clone(), &mut ordered);
            }
            if let Some(vision) = vision_model {
                push(vision, &mut ordered);
            }
        }
        None => {}
    }

    for model in available {
        push(&model.id, &mut ordered);
    }
    if let Some(vision) = vision_model {
        push(vision, &mut ordered);
    }
    push(session_default, &mut ordered);

    ordered
}

/// Run every task through the pool. Returns the combined `[Subtask i]`
/// texts, or an error when a fatal failure occurs or every task fails.
pub async fn run_delegation(
    deps: &EngineDeps,
    parent: &Session,
    parent_model: &str,
    tasks: &[TaskSpec],
) -> Result<String, String> {
    if tasks.is_empty() {
        return Err("delegate directive carried no tasks".into());
    }

    let config = deps.config.read().await.clone();
    let worker_cap = config.worker_cap();
    let vision_model = config.vision_model.clone();

    // One model listing per delegation.
    let available = deps.provider.list_models().await.unwrap_or_default();

    let mut results: Vec<Option<Result<String, String>>> = vec![None; tasks.len()];

    for (chunk_index, chunk) in tasks.chunks(worker_cap).enumerate() {
        let futures: Vec<_> = chunk
            .iter()
            .enumerate()
            .map(|(offset, task)| {
                let index = chunk_index * worker_cap + offset;
                let models =
                    plan_models(task, &available, parent_model, vision_model.as_deref());
                run_worker(deps, parent, index, task.text().to_string(), models)
            })
            .collect();

        for (offset, result) in join_all(futures).await.into_iter().enumerate() {
            let index = chunk_index * worker_cap + offset;
            if let Err(e) = &result
                && FATAL_RE.is_match(e)
            {
                return Err(format!("fatal worker failure: {e}"));
            }
            results[index] = Some(result);
        }
    }

    let failures = results
        .iter()
        .filter(|r| matches!(r, Some(Err(_))))
        .count();
    if failures == tasks.len() {
        return Err("every delegated subtask failed".into());
    }

    let combined = results
        .into_iter()
        .enumerate()
        .map(|(i, result)| match result {
            Some(Ok(text)) => format!("[Subtask {}] {text}", i + 1),
            Some(Err(e)) => format!("[Subtask {}] (failed: {e})", i + 1),
            None => format!("[Subtask {}] (not run)", i + 1),
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    Ok(combined)
}

/// Run one sub-agent, falling back through its model list on non-fatal
/// failures.
async fn run_worker(
    deps: &EngineDeps,
    parent: &Session,
    index: usize,
    task: String,
    models: Vec<String>,
) -> Result<String, String> {
    let mut last_error = String::from("no models available");

    for model in models {
        debug!(task = %task, model = %model, "delegation worker attempt");

        let mut worker = Session::new(
            format!("{}-sub{}", parent.id, index + 1),
            true,
            Some(model.clone()),
            parent.workspace_root.clone(),
        );
        // Workers never delegate further.
        worker.delegation_disabled = true;
        worker.push(Message::system(render_system_prompt(
            &deps.dispatcher,
            true,
            None,
        )));
        worker.push(Message::user(&task));

        let handle = SessionHandle::new(worker);
        let sink = EventSink::discard();
        let outcome =
            Box::pin(run_session(deps, &handle, &sink, WORKER_MAX_STEPS)).await;

        match outcome.failure {
            None => {
                if let Some(text) = outcome.final_text {
                    return Ok(text);
                }
                last_error = "worker ended without a final".into();
            }
            Some(failure) => {
                if FATAL_RE.is_match(&failure) {
                    return Err(failure);
                }
                warn!(model = %model, error = %failure, "worker failed, trying next model");
                last_error = failure;
            }
        }
    }

    Err(last_error)
}
