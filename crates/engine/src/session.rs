//! Per-session state.
//!
//! A `Session` carries the conversation plus the counters the step loop
//! reads: plan progress, pending approval, retry and nudge bookkeeping.
//! Sessions live in the manager's registry behind a `SessionHandle`; all
//! field mutation happens inside the owning run, stop signalling is the one
//! cross-task flag and is atomic.

use isocode_core::{Message, Role};
use isocode_session::Checkpoint;
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

static PLAN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*PLAN:").expect("plan regex"));
static NUMBERED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*\d+[.)]\s+\S").expect("numbered regex"));
static PROGRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*PROGRESS:|Completed task").expect("progress regex"));

/// A proposed diff awaiting approve/reject. At most one per session; the
/// stored diff is the one applied on approve.
#[derive(Debug, Clone)]
pub struct PendingDiff {
    pub file_path: String,
    pub diff: String,
}

/// Registry entry: session state plus the cooperative stop flag.
pub struct SessionHandle {
    pub state: Mutex<Session>,
    stop: AtomicBool,
}

impl SessionHandle {
    pub fn new(session: Session) -> Self {
        Self {
            state: Mutex::new(session),
            stop: AtomicBool::new(false),
        }
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn clear_stop(&self) {
        self.stop.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub model: Option<String>,
    pub agent_plus: bool,
    pub workspace_root: PathBuf,
    pub messages: Vec<Message>,

    pub pending_diff: Option<PendingDiff>,

    pub plan_text: Option<String>,
    pub total_tasks: usize,
    pub completed_tasks: usize,

    pub retries: u32,
    pub consecutive_finals: u32,
    pub steps_without_action: u32,
    pub thought_streak: u32,
    pub compactions: u32,
    pub delegation_disabled: bool,
    pub step: usize,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        agent_plus: bool,
        model: Option<String>,
        workspace_root: PathBuf,
    ) -> Self {
        Self {
            id: id.into(),
            model,
            agent_plus,
            workspace_root,
            messages: Vec::new(),
            pending_diff: None,
            plan_text: None,
            total_tasks: 0,
            completed_tasks: 0,
            retries: 0,
            consecutive_finals: 0,
            steps_without_action: 0,
            thought_streak: 0,
            compactions: 0,
            delegation_disabled: false,
            step: 0,
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Scan a thought for plan/progress markers and update the counters.
    pub fn note_thought(&mut self, content: &str) {
        if self.plan_text.is_none()
            && (PLAN_RE.is_match(content) || NUMBERED_RE.find_iter(content).count() >= 2)
        {
            self.plan_text = Some(content.to_string());
            self.total_tasks = NUMBERED_RE.find_iter(content).count();
            return;
        }
        if PROGRESS_RE.is_match(content) && self.completed_tasks < self.total_tasks {
            self.completed_tasks += 1;
        }
    }

    /// Final is only allowed once the plan is exhausted.
    pub fn plan_satisfied(&self) -> bool {
        self.total_tasks == 0 || self.completed_tasks >= self.total_tasks
    }

    /// Snapshot for the checkpoint store.
    pub fn checkpoint(&self) -> Checkpoint {
        let mut user_requests = Vec::new();
        let mut recent_thoughts = Vec::new();
        let mut tool_actions = Vec::new();

        for message in &self.messages {
            match message.role {
                Role::User => {
                    // Engine nudges are bracketed; only real requests matter.
                    if !message.content.starts_with('[') && user_requests.len() < 5 {
                        user_requests.push(message.content.clone());
                    }
                }
                Role::Assistant => {
                    if let Ok(value) =
                        serde_json::from_str::<serde_json::Value>(&message.content)
                    {
                        match value["type"].as_str() {
                            Some("thought") => {
                                if let Some(text) = value["content"].as_str() {
                                    recent_thoughts.push(text.to_string());
                                }
                            }
                            Some("action") => {
                                if let Some(tool) = value["tool"].as_str() {
                                    tool_actions.push(format!(
                                        "{tool}({})",
                                        value["args"].to_string()
                                    ));
                                }
                            }
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }

        Checkpoint {
            user_requests,
            recent_thoughts,
            tool_actions,
            plan: self.plan_text.clone(),
            step: self.step,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new("s1", false, None, PathBuf::from("/tmp/ws"))
    }

    #[test]
    fn plan_marker_sets_task_count() {
        let mut s = session();
        s.note_thought("PLAN:\n1. Read src/a.ts\n2. Replace foo with bar\n3. Verify");
        assert_eq!(s.total_tasks, 3);
        assert!(s.plan_text.is_some());
        assert!(!s.plan_satisfied());
    }

    #[test]
    fn numbered_list_without_marker_also_counts() {
        let mut s = session();
        s.note_thought("Here is what I'll do:\n1) look around\n2) edit the file");
        assert_eq!(s.total_tasks, 2);
    }

    #[test]
    fn prose_is_not_a_plan() {
        let mut s = session();
        s.note_thought("I think the bug is in the parser. The plan is unclear so far.");
        assert!(s.plan_text.is_none());
        assert_eq!(s.total_tasks, 0);
        assert!(s.plan_satisfied());
    }

    #[test]
    fn progress_markers_advance_completion() {
        let mut s = session();
        s.note_thought("PLAN:\n1. a\n2. b");
        s.note_thought("PROGRESS: finished reading");
        assert_eq!(s.completed_tasks, 1);
        s.note_thought("Completed task 2: edit done");
        assert_eq!(s.completed_tasks, 2);
        assert!(s.plan_satisfied());
        // Never exceeds the total.
        s.note_thought("PROGRESS: extra");
        assert_eq!(s.completed_tasks, 2);
    }

    #[test]
    fn second_plan_is_not_recounted() {
        let mut s = session();
        s.note_thought("PLAN:\n1. a\n2. b");
        s.note_thought("PLAN:\n1. different\n2. plan\n3. entirely");
        assert_eq!(s.total_tasks, 2);
    }

    #[test]
    fn checkpoint_collects_directive_history() {
        let mut s = session();
        s.push(Message::user("rename foo to bar"));
        s.push(Message::assistant(
            r#"{"type":"thought","content":"PLAN:\n1. read"}"#,
        ));
        s.push(Message::assistant(
            r#"{"type":"action","tool":"read_file","args":{"path":"a.ts"}}"#,
        ));
        s.note_thought("PLAN:\n1. read");

        let checkpoint = s.checkpoint();
        assert_eq!(checkpoint.user_requests, vec!["rename foo to bar"]);
        assert_eq!(checkpoint.recent_thoughts.len(), 1);
        assert!(checkpoint.tool_actions[0].starts_with("read_file("));
        assert!(checkpoint.plan.is_some());
    }

    #[test]
    fn stop_flag_is_cross_task() {
        let handle = SessionHandle::new(session());
        assert!(!handle.stop_requested());
        handle.request_stop();
        assert!(handle.stop_requested());
        handle.clear_stop();
        assert!(!handle.stop_requested());
    }
}
