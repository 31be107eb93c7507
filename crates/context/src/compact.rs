//! LLM-assisted conversation compaction.
//!
//! Summarises the prefix of a conversation (everything except the system
//! prompt and the last four messages) into a single assistant observation.
//! Falls back to a deterministic digest of the user messages when the model
//! call fails. Capped at three invocations per session by the engine.

use crate::truncate::smart_truncate;
use isocode_core::{ChatOptions, Message, Provider, Role};
use std::time::Duration;
use tracing::{debug, warn};

/// Messages at the end of the conversation that compaction never rewrites.
pub const KEEP_RECENT: usize = 4;

/// Per-message cap when feeding the prefix to the summariser.
const SUMMARY_INPUT_CAP: usize = 1_000;

const SUMMARY_INSTRUCTION: &str = "Summarize the conversation below in 2-4 short bullets \
covering: what was asked, what tools were used, what changes were made, and what the \
current state is. Reply with the bullets only.";

/// Outcome of one compaction pass.
#[derive(Debug, Clone)]
pub struct CompactionResult {
    pub messages: Vec<Message>,
    pub before: usize,
    pub after: usize,
    pub used_fallback: bool,
}

/// Stateless compactor; the per-session invocation cap lives in the engine.
#[derive(Debug, Default, Clone)]
pub struct Compactor;

impl Compactor {
    pub fn new() -> Self {
        Self
    }

    /// Compact `messages` in place semantics: returns the replacement
    /// sequence. A conversation too short to have a compressible prefix is
    /// returned unchanged.
    pub async fn compact(
        &self,
        provider: &dyn Provider,
        model: &str,
        messages: &[Message],
    ) -> CompactionResult {
        let before = messages.len();

        let has_system = messages.first().is_some_and(|m| m.role == Role::System);
        let head = usize::from(has_system);
        // Need at least two prefix messages for compaction to shrink anything.
        if messages.len() < head + KEEP_RECENT + 2 {
            return CompactionResult {
                messages: messages.to_vec(),
                before,
                after: before,
                used_fallback: false,
            };
        }

        let split = messages.len() - KEEP_RECENT;
        let prefix = &messages[head..split];
        let recent = &messages[split..];

        let summary = match self.summarise(provider, model, prefix).await {
            Ok(text) => SummaryText {
                text,
                fallback: false,
            },
            Err(e) => {
                warn!(error = %e, "Compaction summary failed, using deterministic fallback");
                SummaryText {
                    text: fallback_digest(prefix),
                    fallback: true,
                }
            }
        };

        let observation = serde_json::json!({
            "type": "observation",
            "content": format!("[summary of {} messages] {}", prefix.len(), summary.text),
        });

        let mut out = Vec::with_capacity(head + 1 + KEEP_RECENT);
        if has_system {
            out.push(messages[0].clone());
        }
        out.push(Message::assistant(observation.to_string()));
        out.extend(recent.iter().cloned());

        debug!(before, after = out.len(), fallback = summary.fallback, "Compacted conversation");

        CompactionResult {
            after: out.len(),
            before,
            used_fallback: summary.fallback,
            messages: out,
        }
    }

    async fn summarise(
        &self,
        provider: &dyn Provider,
        model: &str,
        prefix: &[Message],
    ) -> Result<String, isocode_core::ProviderError> {
        let transcript: String = prefix
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                };
                format!("[{role}] {}\n", smart_truncate(&m.content, SUMMARY_INPUT_CAP))
            })
            .collect();

        let request = vec![
            Message::system(SUMMARY_INSTRUCTION),
            Message::user(transcript),
        ];

        let options = ChatOptions {
            temperature: 0.2,
            max_tokens: 512,
            timeout: Duration::from_secs(60),
            expect_json: false,
            tools: Vec::new(),
            tool_choice: None,
        };

        let outcome = provider.call(model, &request, &options).await?;
        if outcome.content.trim().is_empty() {
            return Err(isocode_core::ProviderError::EmptyResponse);
        }
        Ok(outcome.content.trim().to_string())
    }
}

#[derive(Debug)]
struct SummaryText {
    text: String,
    fallback: bool,
}

/// Deterministic fallback: the first 100 chars of each user message.
fn fallback_digest(prefix: &[Message]) -> String {
    prefix
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| {
            let cut = m
                .content
                .char_indices()
                .nth(100)
                .map(|(i, _)| i)
                .unwrap_or(m.content.len());
            m.content[..cut].to_string()
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use isocode_core::{
        ChatOutcome, HealthReport, ModelInfo, ProviderError,
    };
    use tokio::sync::mpsc;

    struct FixedProvider {
        reply: Option<String>,
    }

    #[async_trait]
    impl Provider for FixedProvider {
        fn name(&self) -> &str {
            "mock"
        }
        async fn call(
            &self,
            _model: &str,
            _messages: &[Message],
            _options: &ChatOptions,
        ) -> Result<ChatOutcome, ProviderError> {
            match &self.reply {
                Some(text) => Ok(ChatOutcome {
                    content: text.clone(),
                    tool_calls: vec![],
                }),
                None => Err(ProviderError::Network("connection refused".into())),
            }
        }
        async fn stream(
            &self,
            _model: &str,
            _messages: &[Message],
            _options: &ChatOptions,
        ) -> Result<mpsc::Receiver<Result<String, ProviderError>>, ProviderError> {
            Err(ProviderError::NotConfigured("mock".into()))
        }
        async fn call_vision(
            &self,
            _model: &str,
            _prompt: &str,
            _image_base64: &str,
            _mime_type: &str,
            _options: &ChatOptions,
        ) -> Result<String, ProviderError> {
            Err(ProviderError::NotConfigured("mock".into()))
        }
        async fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
            Ok(vec![])
        }
        async fn health(&self) -> HealthReport {
            HealthReport {
                ok: true,
                provider: "mock".into(),
                error: None,
            }
        }
    }

    fn long_conversation() -> Vec<Message> {
        let mut msgs = vec![Message::system("sys prompt")];
        for i in 0..10 {
            msgs.push(Message::user(format!("user message number {i}")));
            msgs.push(Message::assistant(format!(
                r#"{{"type":"thought","content":"step {i}"}}"#
            )));
        }
        msgs
    }

    #[tokio::test]
    async fn compaction_shrinks_and_keeps_recent() {
        let msgs = long_conversation();
        let provider = FixedProvider {
            reply: Some("- asked things\n- used tools".into()),
        };
        let result = Compactor::new().compact(&provider, "m", &msgs).await;

        assert!(result.after < result.before);
        assert!(!result.used_fallback);
        // system + summary + last four
        assert_eq!(result.messages.len(), 2 + KEEP_RECENT);
        assert_eq!(result.messages[0].role, Role::System);
        assert!(result.messages[1].content.contains("[summary of"));
        // Last four survive verbatim.
        let tail: Vec<_> = msgs[msgs.len() - KEEP_RECENT..].iter().collect();
        for (kept, original) in result.messages[2..].iter().zip(tail) {
            assert_eq!(kept.content, original.content);
        }
    }

    #[tokio::test]
    async fn llm_failure_uses_user_digest() {
        let msgs = long_conversation();
        let provider = FixedProvider { reply: None };
        let result = Compactor::new().compact(&provider, "m", &msgs).await;

        assert!(result.used_fallback);
        assert!(result.messages[1].content.contains("user message number 0"));
    }

    #[tokio::test]
    async fn short_conversation_unchanged() {
        let msgs: Vec<Message> = long_conversation().into_iter().take(5).collect();
        let provider = FixedProvider {
            reply: Some("summary".into()),
        };
        let result = Compactor::new().compact(&provider, "m", &msgs).await;
        assert_eq!(result.before, result.after);
        assert_eq!(result.messages.len(), msgs.len());
    }

    #[tokio::test]
    async fn length_never_grows() {
        for n in 0..25 {
            let msgs: Vec<Message> = long_conversation().into_iter().take(n).collect();
            let provider = FixedProvider {
                reply: Some("s".into()),
            };
            let result = Compactor::new().compact(&provider, "m", &msgs).await;
            assert!(result.messages.len() <= msgs.len().max(1));
        }
    }
}
