//! End-to-end engine scenarios against scripted providers.

mod support;

use isocode_config::AppConfig;
use isocode_core::{AgentEvent, EventSink, Message, ProviderError};
use isocode_engine::{Decision, OpenRequest, SessionManager};
use std::path::Path;
use std::sync::Arc;
use support::{ModelRoutedProvider, SequentialMockProvider, deps_with};

fn open_request(dir: &Path, agent_plus: bool, message: &str) -> OpenRequest {
    OpenRequest {
        session_id: "test-session".into(),
        agent_plus,
        model: Some("mock-model".into()),
        workspace_root: dir.to_path_buf(),
        message: message.into(),
        context: vec![],
    }
}

async fn drain(mut rx: tokio::sync::mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Ok(event) =
        tokio::time::timeout(std::time::Duration::from_millis(50), rx.recv()).await
    {
        match event {
            Some(e) => events.push(e),
            None => break,
        }
    }
    events
}

#[tokio::test]
async fn plan_act_approve_continue() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("src/a.ts"), "function foo() {}\nfoo();\n").unwrap();

    let provider = Arc::new(SequentialMockProvider::replies(&[
        r#"{"type":"thought","content":"PLAN:\n1. Read src/a.ts\n2. Replace foo with bar"}"#,
        r#"{"type":"action","tool":"read_file","args":{"path":"src/a.ts"}}"#,
        r#"{"type":"action","tool":"replace_in_file","args":{"path":"src/a.ts","find":"foo","replace":"bar","all":true}}"#,
        // After approval:
        r#"{"type":"thought","content":"PROGRESS: Completed task 1, file read"}"#,
        r#"{"type":"thought","content":"PROGRESS: Completed task 2, rename applied"}"#,
        r#"{"type":"final","content":"Renamed foo to bar in src/a.ts."}"#,
    ]));
    let deps = deps_with(provider, AppConfig::default());
    let manager = SessionManager::new(deps);

    // ── First run: plan, read, propose diff, wait ──
    let (sink, rx) = EventSink::channel();
    let handle = manager
        .open_or_get(open_request(dir.path(), false, "rename foo to bar in src/a.ts"))
        .await;
    let outcome = manager.run(&handle, &sink, 500).await;
    drop(sink);

    assert!(outcome.final_text.is_none());
    assert!(!outcome.remove);

    let events = drain(rx).await;
    let kinds: Vec<&str> = events
        .iter()
        .map(|e| match e {
            AgentEvent::Thought { .. } => "thought",
            AgentEvent::Action { .. } => "action",
            AgentEvent::Observation { .. } => "observation",
            AgentEvent::DiffRequest { .. } => "diff_request",
            AgentEvent::Final { .. } => "final",
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, vec!["thought", "action", "observation", "diff_request"]);

    match events.last().unwrap() {
        AgentEvent::DiffRequest { file_path, diff, session_id } => {
            assert_eq!(file_path, "src/a.ts");
            assert!(diff.contains("-function foo() {}"));
            assert!(diff.contains("+function bar() {}"));
            assert_eq!(session_id, "test-session");
        }
        other => panic!("expected diff_request, got {other:?}"),
    }
    // File untouched until approval.
    assert!(
        std::fs::read_to_string(dir.path().join("src/a.ts"))
            .unwrap()
            .contains("foo")
    );

    // ── Approve: diff applies, loop continues to final ──
    let (sink, rx) = EventSink::channel();
    let outcome = manager
        .resume_with_decision("test-session", Decision::Approve, &sink, 500)
        .await
        .unwrap();
    drop(sink);

    assert_eq!(
        outcome.final_text.as_deref(),
        Some("Renamed foo to bar in src/a.ts.")
    );
    assert!(outcome.remove);

    let content = std::fs::read_to_string(dir.path().join("src/a.ts")).unwrap();
    assert!(content.contains("bar"));
    assert!(!content.contains("foo"));

    let events = drain(rx).await;
    assert!(matches!(
        events.first(),
        Some(AgentEvent::Observation { content }) if content.contains("User APPROVED.")
    ));
    assert!(matches!(events.last(), Some(AgentEvent::Final { .. })));

    // Session left the registry.
    assert!(!manager.clear("test-session").await);

    // Persistence artifacts exist.
    assert!(dir.path().join(".isocode/conversations/test-session.json").exists());
    assert!(dir.path().join(".isocode/checkpoints/test-session.md").exists());
    assert!(dir.path().join(".isocode/memory/test-session.json").exists());
}

#[tokio::test]
async fn reject_keeps_one_pending_diff_and_retries() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "alpha\n").unwrap();

    let provider = Arc::new(SequentialMockProvider::replies(&[
        r#"{"type":"action","tool":"write_file","args":{"path":"a.txt","content":"beta\n"}}"#,
        // After rejection, a different proposal:
        r#"{"type":"action","tool":"write_file","args":{"path":"a.txt","content":"gamma\n"}}"#,
    ]));
    let deps = deps_with(provider, AppConfig::default());
    let manager = SessionManager::new(deps);

    let (sink, _rx) = EventSink::channel();
    let handle = manager
        .open_or_get(open_request(dir.path(), false, "change a.txt"))
        .await;
    manager.run(&handle, &sink, 500).await;

    {
        let session = handle.state.lock().await;
        let pending = session.pending_diff.as_ref().unwrap();
        assert!(pending.diff.contains("+beta"));
    }

    let (sink, rx) = EventSink::channel();
    let outcome = manager
        .resume_with_decision("test-session", Decision::Reject, &sink, 500)
        .await
        .unwrap();
    drop(sink);

    // Second proposal pending; still exactly one.
    assert!(!outcome.remove);
    {
        let session = handle.state.lock().await;
        let pending = session.pending_diff.as_ref().unwrap();
        assert!(pending.diff.contains("+gamma"));
        assert!(!pending.diff.contains("+beta"));
    }
    // Nothing was written.
    assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "alpha\n");

    let events = drain(rx).await;
    assert!(matches!(
        events.first(),
        Some(AgentEvent::Observation { content }) if content.contains("REJECTED")
    ));
}

#[tokio::test]
async fn pending_diff_blocks_new_actions_until_decision() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "alpha\n").unwrap();

    let provider = Arc::new(SequentialMockProvider::replies(&[
        r#"{"type":"action","tool":"write_file","args":{"path":"a.txt","content":"beta\n"}}"#,
        // Must NOT be consumed while the diff is pending.
        r#"{"type":"final","content":"should not run"}"#,
    ]));
    let deps = deps_with(provider, AppConfig::default());
    let manager = SessionManager::new(deps);

    let (sink, _rx) = EventSink::channel();
    let handle = manager
        .open_or_get(open_request(dir.path(), false, "change a.txt"))
        .await;
    manager.run(&handle, &sink, 500).await;
    assert!(handle.state.lock().await.pending_diff.is_some());

    // A second message re-enters the session but takes no action.
    let (sink, rx) = EventSink::channel();
    let handle = manager
        .open_or_get(open_request(dir.path(), false, "also do this"))
        .await;
    let outcome = manager.run(&handle, &sink, 500).await;
    drop(sink);

    assert!(outcome.final_text.is_none());
    assert!(!outcome.remove);
    let events = drain(rx).await;
    assert!(matches!(events.first(), Some(AgentEvent::DiffRequest { .. })));
    assert!(matches!(events.last(), Some(AgentEvent::Error { .. })));

    let session = handle.state.lock().await;
    let pending = session.pending_diff.as_ref().unwrap();
    assert!(pending.diff.contains("+beta"));
}

#[tokio::test]
async fn approve_without_pending_diff_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(SequentialMockProvider::replies(&[]));
    let deps = deps_with(provider, AppConfig::default());
    let manager = SessionManager::new(deps);

    let (sink, _rx) = EventSink::channel();
    let handle = manager
        .open_or_get(open_request(dir.path(), false, "hello"))
        .await;
    let _ = handle; // session exists but no diff is pending

    let err = manager
        .resume_with_decision("test-session", Decision::Approve, &sink, 500)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("No pending diff"));
}

#[tokio::test]
async fn stop_request_emits_single_final_and_removes() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(SequentialMockProvider::replies(&[
        r#"{"type":"thought","content":"PLAN:\n1. do a lot of work"}"#,
    ]));
    let deps = deps_with(provider, AppConfig::default());
    let manager = SessionManager::new(deps);

    let handle = manager
        .open_or_get(open_request(dir.path(), false, "long task"))
        .await;
    assert!(manager.stop("test-session").await);

    let (sink, rx) = EventSink::channel();
    let outcome = manager.run(&handle, &sink, 500).await;
    drop(sink);

    assert_eq!(outcome.final_text.as_deref(), Some("Agent stopped by user."));
    assert!(outcome.remove);

    let events = drain(rx).await;
    let finals = events
        .iter()
        .filter(|e| matches!(e, AgentEvent::Final { .. }))
        .count();
    let actions = events
        .iter()
        .filter(|e| matches!(e, AgentEvent::Action { .. }))
        .count();
    assert_eq!(finals, 1);
    assert_eq!(actions, 0);

    assert!(!manager.stop("test-session").await, "session should be gone");
}

#[tokio::test]
async fn auto_compaction_shrinks_history_and_checkpoints() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(SequentialMockProvider::replies(&[
        // Summary reply for the compaction call, then the directive.
        "- did things\n- more things",
        r#"{"type":"final","content":"done"}"#,
    ]));
    let mut config = AppConfig::default();
    config.context_tokens = 2_048; // budget 1024 tokens, 75% = 768
    let deps = deps_with(provider, config);
    let manager = SessionManager::new(deps);

    let handle = manager
        .open_or_get(open_request(dir.path(), false, "start"))
        .await;
    {
        let mut session = handle.state.lock().await;
        for i in 0..20 {
            session.push(Message::user(format!("filler {i}: {}", "x".repeat(300))));
            session.push(Message::assistant(format!(
                r#"{{"type":"thought","content":"step {i}: {}"}}"#,
                "y".repeat(300)
            )));
        }
    }
    let before = handle.state.lock().await.messages.len();

    let (sink, rx) = EventSink::channel();
    manager.run(&handle, &sink, 500).await;
    drop(sink);

    let events = drain(rx).await;
    // Compaction itself is invisible to the client.
    assert!(
        events
            .iter()
            .all(|e| matches!(e, AgentEvent::Final { .. } | AgentEvent::Thought { .. }))
    );

    let session = handle.state.lock().await;
    assert!(session.messages.len() < before);
    assert_eq!(session.compactions, 1);
    assert!(dir.path().join(".isocode/checkpoints/test-session.md").exists());
}

#[tokio::test]
async fn unparsable_reply_gets_format_reminder() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(SequentialMockProvider::replies(&[
        "utter gibberish with no directive at all",
        r#"{"type":"final","content":"recovered"}"#,
    ]));
    let deps = deps_with(provider, AppConfig::default());
    let manager = SessionManager::new(deps);

    let handle = manager
        .open_or_get(open_request(dir.path(), false, "hi"))
        .await;
    let (sink, _rx) = EventSink::channel();
    let outcome = manager.run(&handle, &sink, 500).await;

    assert_eq!(outcome.final_text.as_deref(), Some("recovered"));
    let session = handle.state.lock().await;
    assert!(
        session
            .messages
            .iter()
            .any(|m| m.content.contains("format reminder"))
    );
    assert!(
        session
            .messages
            .iter()
            .any(|m| m.content.contains("utter gibberish"))
    );
}

#[tokio::test]
async fn delegate_in_agent_mode_falls_through_to_reminder() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(SequentialMockProvider::replies(&[
        r#"{"type":"delegate","tasks":["subtask one"]}"#,
        r#"{"type":"final","content":"ok"}"#,
    ]));
    let deps = deps_with(provider, AppConfig::default());
    let manager = SessionManager::new(deps);

    let handle = manager
        .open_or_get(open_request(dir.path(), false, "hi"))
        .await;
    let (sink, _rx) = EventSink::channel();
    let outcome = manager.run(&handle, &sink, 500).await;

    assert_eq!(outcome.final_text.as_deref(), Some("ok"));
    let session = handle.state.lock().await;
    assert!(
        session
            .messages
            .iter()
            .any(|m| m.content.contains("format reminder"))
    );
}

#[tokio::test]
async fn delegation_with_model_fallback() {
    let dir = tempfile::tempdir().unwrap();

    let provider = Arc::new(ModelRoutedProvider::new(&["flaky-model", "steady-model"]));
    // Outer session (mock-model): delegate, then final.
    provider.script(
        "mock-model",
        vec![
            Ok(r#"{"type":"delegate","tasks":["research part one","research part two"]}"#.into()),
            Ok(r#"{"type":"final","content":"combined"}"#.into()),
            // Session summary call at termination.
            Ok("summary".into()),
        ],
    );
    // flaky-model always fails with a non-fatal error (adapter-level retries
    // included); steady-model answers every worker.
    provider.script("flaky-model", vec![]);
    // Generously padded: workers race for this queue, and each also pops a
    // summary reply at termination.
    provider.script(
        "steady-model",
        (0..8)
            .map(|i| Ok(format!(r#"{{"type":"final","content":"worker {i} done"}}"#)))
            .collect(),
    );

    let mut config = AppConfig::default();
    config.model = Some("mock-model".into());
    config.max_workers = 2;
    let deps = deps_with(provider, config);
    let manager = SessionManager::new(deps);

    let mut request = open_request(dir.path(), true, "do both parts");
    request.model = Some("mock-model".into());
    let handle = manager.open_or_get(request).await;

    let (sink, rx) = EventSink::channel();
    let outcome = manager.run(&handle, &sink, 500).await;
    drop(sink);

    assert_eq!(outcome.final_text.as_deref(), Some("combined"));

    let events = drain(rx).await;
    let observation = events
        .iter()
        .find_map(|e| match e {
            AgentEvent::Observation { content } if content.contains("swarm") => Some(content),
            _ => None,
        })
        .expect("swarm observation");
    let parsed: serde_json::Value = serde_json::from_str(observation).unwrap();
    assert_eq!(parsed["swarm"], true);
    assert_eq!(parsed["results"], 2);
    assert!(parsed["content"].as_str().unwrap().contains("[Subtask 1]"));
    assert!(parsed["content"].as_str().unwrap().contains("[Subtask 2]"));
    assert!(parsed["content"].as_str().unwrap().contains("done"));
}

#[tokio::test]
async fn model_missing_fails_without_retry() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(SequentialMockProvider::new(vec![Err(
        ProviderError::ModelNotFound("model 'ghost' not found, pull it first".into()),
    )]));
    let deps = deps_with(provider, AppConfig::default());
    let manager = SessionManager::new(deps);

    let handle = manager
        .open_or_get(open_request(dir.path(), false, "hi"))
        .await;
    let (sink, _rx) = EventSink::channel();
    let outcome = manager.run(&handle, &sink, 500).await;

    assert!(outcome.remove);
    assert!(outcome.final_text.unwrap().contains("not found"));
}

#[tokio::test]
async fn transient_errors_retry_as_thoughts_then_fail() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(SequentialMockProvider::new(vec![
        Err(ProviderError::Network("connection refused".into())),
        Err(ProviderError::Network("connection refused".into())),
        Err(ProviderError::Network("connection refused".into())),
    ]));
    let deps = deps_with(provider, AppConfig::default());
    let manager = SessionManager::new(deps);

    let handle = manager
        .open_or_get(open_request(dir.path(), false, "hi"))
        .await;
    let (sink, rx) = EventSink::channel();
    let outcome = manager.run(&handle, &sink, 500).await;
    drop(sink);

    assert!(outcome.remove);
    assert!(outcome.failure.is_some());

    let events = drain(rx).await;
    let retry_thoughts = events
        .iter()
        .filter(|e| matches!(e, AgentEvent::Thought { content } if content.contains("retrying")))
        .count();
    assert_eq!(retry_thoughts, 2);
    assert!(matches!(events.last(), Some(AgentEvent::Final { .. })));
}

#[tokio::test]
async fn plan_enforcement_nudges_premature_final() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(SequentialMockProvider::replies(&[
        r#"{"type":"thought","content":"PLAN:\n1. first\n2. second"}"#,
        r#"{"type":"final","content":"premature"}"#,
        r#"{"type":"thought","content":"PROGRESS: Completed task 1"}"#,
        r#"{"type":"thought","content":"PROGRESS: Completed task 2"}"#,
        r#"{"type":"final","content":"actually done"}"#,
    ]));
    let deps = deps_with(provider, AppConfig::default());
    let manager = SessionManager::new(deps);

    let handle = manager
        .open_or_get(open_request(dir.path(), false, "two-step job"))
        .await;
    let (sink, _rx) = EventSink::channel();
    let outcome = manager.run(&handle, &sink, 500).await;

    assert_eq!(outcome.final_text.as_deref(), Some("actually done"));
    let session = handle.state.lock().await;
    assert!(
        session
            .messages
            .iter()
            .any(|m| m.content.contains("0/2 planned tasks"))
    );
}
