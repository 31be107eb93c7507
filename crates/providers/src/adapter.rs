//! The unified adapter behind `isocode_core::Provider`.
//!
//! Dialect selection: the local provider tries chat-completions first and,
//! on a failed or empty result, falls back to the native endpoint; remote
//! providers use chat-completions only. Three escalating retries on HTTP
//! 400/422 progressively drop `response_format`, then `tools`, and raise
//! temperature and max-tokens. "Model not found" errors are re-raised
//! immediately with a remediation hint.

use crate::chat_completions::ChatCompletionsClient;
use crate::native::NativeClient;
use async_trait::async_trait;
use isocode_config::AppConfig;
use isocode_core::{
    ChatOptions, ChatOutcome, HealthReport, Message, ModelInfo, Provider, ProviderError,
    ToolCallRequest,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const MAX_ATTEMPTS: u32 = 3;
/// Ignore absurd blobs during the last-ditch content scan.
const SCAN_FIELD_CAP: usize = 500_000;

/// Which wire dialect a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    /// Local backend: chat-completions with native fallback.
    Local,
    /// Remote chat-completions endpoint.
    ChatCompletions,
}

/// The adapter the engine talks to.
pub struct LlmAdapter {
    provider_name: String,
    dialect: Dialect,
    chat: ChatCompletionsClient,
    native: NativeClient,
}

impl LlmAdapter {
    pub fn from_config(config: &AppConfig) -> Self {
        let dialect = if config.provider == "local" {
            Dialect::Local
        } else {
            Dialect::ChatCompletions
        };
        Self {
            provider_name: config.provider.clone(),
            dialect,
            chat: ChatCompletionsClient::new(&config.api_base, config.api_key.clone()),
            native: NativeClient::new(&config.api_base),
        }
    }

    /// One primary call in the current dialect, with native fallback for the
    /// local provider.
    async fn primary_call(
        &self,
        model: &str,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<(Value, Vec<ToolCallRequest>), ProviderError> {
        match self.dialect {
            Dialect::ChatCompletions => self.chat.call_raw(model, messages, options).await,
            Dialect::Local => {
                match self.chat.call_raw(model, messages, options).await {
                    Ok((value, tool_calls)) => {
                        let empty = tool_calls.is_empty()
                            && extract_content(&value).is_none_or(|c| c.trim().is_empty());
                        if !empty {
                            return Ok((value, tool_calls));
                        }
                        debug!(model, "compat dialect returned empty content, trying native");
                        self.native.call_raw(model, messages, options).await
                    }
                    Err(e) if e.is_model_missing() => Err(e),
                    Err(e) => {
                        debug!(model, error = %e, "compat dialect failed, trying native");
                        self.native.call_raw(model, messages, options).await
                    }
                }
            }
        }
    }

    fn remediation(&self, model: &str) -> String {
        match self.dialect {
            Dialect::Local => format!(
                "Model '{model}' is not available on the local backend. \
                 Pull it first (e.g. `ollama pull {model}`) or pick another model from /models."
            ),
            Dialect::ChatCompletions => format!(
                "Model '{model}' is not available from provider '{}'. \
                 Check the model identifier against /models.",
                self.provider_name
            ),
        }
    }
}

/// Progressively relax the request shape for a retry attempt.
fn escalate(options: &ChatOptions, attempt: u32) -> ChatOptions {
    let mut relaxed = options.clone();
    if attempt >= 2 {
        relaxed.expect_json = false;
    }
    if attempt >= 3 {
        relaxed.tools.clear();
        relaxed.tool_choice = None;
        relaxed.temperature = (relaxed.temperature + 0.2).min(1.0);
        relaxed.max_tokens = (relaxed.max_tokens.saturating_mul(2)).min(8_192);
    }
    relaxed
}

#[async_trait]
impl Provider for LlmAdapter {
    fn name(&self) -> &str {
        &self.provider_name
    }

    async fn call(
        &self,
        model: &str,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<ChatOutcome, ProviderError> {
        let mut last_error = ProviderError::EmptyResponse;

        for attempt in 1..=MAX_ATTEMPTS {
            let attempt_options = escalate(options, attempt);
            match self.primary_call(model, messages, &attempt_options).await {
                Ok((value, tool_calls)) => {
                    let content = extract_content(&value).unwrap_or_default();
                    if content.trim().is_empty() && tool_calls.is_empty() {
                        warn!(model, attempt, "empty completion, escalating");
                        last_error = ProviderError::EmptyResponse;
                        continue;
                    }
                    return Ok(ChatOutcome {
                        content,
                        tool_calls,
                    });
                }
                Err(e) if e.is_model_missing() => {
                    return Err(ProviderError::ModelNotFound(self.remediation(model)));
                }
                Err(e) if e.is_bad_request() => {
                    warn!(model, attempt, error = %e, "bad request, relaxing shape");
                    last_error = e;
                }
                Err(e @ (ProviderError::Network(_) | ProviderError::Timeout(_))) => {
                    warn!(model, attempt, error = %e, "transient failure, retrying");
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error)
    }

    async fn stream(
        &self,
        model: &str,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<mpsc::Receiver<Result<String, ProviderError>>, ProviderError> {
        match self.dialect {
            Dialect::Local => self.native.stream(model, messages, options).await,
            Dialect::ChatCompletions => self.chat.stream(model, messages, options).await,
        }
    }

    async fn call_vision(
        &self,
        model: &str,
        prompt: &str,
        image_base64: &str,
        mime_type: &str,
        options: &ChatOptions,
    ) -> Result<String, ProviderError> {
        let value = match self.dialect {
            Dialect::Local => {
                self.native
                    .call_vision_raw(model, prompt, image_base64, options)
                    .await?
            }
            Dialect::ChatCompletions => {
                self.chat
                    .call_vision_raw(model, prompt, image_base64, mime_type, options)
                    .await?
            }
        };
        extract_content(&value).ok_or(ProviderError::EmptyResponse)
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        match self.dialect {
            Dialect::Local => match self.native.list_models().await {
                Ok(models) if !models.is_empty() => Ok(models),
                Ok(_) | Err(_) => self.chat.list_models().await,
            },
            Dialect::ChatCompletions => self.chat.list_models().await,
        }
    }

    async fn health(&self) -> HealthReport {
        let result = match self.dialect {
            Dialect::Local => self.native.probe().await,
            Dialect::ChatCompletions => self.chat.list_models().await.map(|_| ()),
        };
        match result {
            Ok(()) => HealthReport {
                ok: true,
                provider: self.provider_name.clone(),
                error: None,
            },
            Err(e) => HealthReport {
                ok: false,
                provider: self.provider_name.clone(),
                error: Some(e.to_string()),
            },
        }
    }
}

/// Exhaustive content extraction across response dialects.
///
/// Order: `choices[0].message.content` (string or joined parts),
/// `reasoning_content`, `choices[0].text`, top-level `output`/`text`, the
/// native `message.content`, then a last-ditch scan for the longest
/// non-empty string field in the body.
pub fn extract_content(body: &Value) -> Option<String> {
    let message = &body["choices"][0]["message"];

    if let Some(content) = message["content"].as_str()
        && !content.is_empty()
    {
        return Some(content.to_string());
    }

    if let Some(parts) = message["content"].as_array() {
        let joined: String = parts
            .iter()
            .filter_map(|p| p["text"].as_str())
            .collect::<Vec<_>>()
            .join("");
        if !joined.is_empty() {
            return Some(joined);
        }
    }

    if let Some(reasoning) = message["reasoning_content"].as_str()
        && !reasoning.is_empty()
    {
        return Some(reasoning.to_string());
    }

    if let Some(text) = body["choices"][0]["text"].as_str()
        && !text.is_empty()
    {
        return Some(text.to_string());
    }

    for key in ["output", "text"] {
        if let Some(text) = body[key].as_str()
            && !text.is_empty()
        {
            return Some(text.to_string());
        }
    }

    if let Some(content) = body["message"]["content"].as_str()
        && !content.is_empty()
    {
        return Some(content.to_string());
    }

    scan_longest_string(body)
}

/// Last-ditch: the longest non-empty string value anywhere in the body,
/// skipping metadata-shaped fields.
fn scan_longest_string(value: &Value) -> Option<String> {
    const SKIP_KEYS: [&str; 7] = [
        "id", "model", "object", "role", "finish_reason", "system_fingerprint", "created",
    ];

    fn walk(value: &Value, best: &mut Option<String>) {
        match value {
            Value::String(s) => {
                if !s.trim().is_empty()
                    && s.len() < SCAN_FIELD_CAP
                    && best.as_ref().is_none_or(|b| b.len() < s.len())
                {
                    *best = Some(s.clone());
                }
            }
            Value::Array(items) => items.iter().for_each(|v| walk(v, best)),
            Value::Object(map) => {
                for (key, v) in map {
                    if !SKIP_KEYS.contains(&key.as_str()) {
                        walk(v, best);
                    }
                }
            }
            _ => {}
        }
    }

    let mut best = None;
    walk(value, &mut best);
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_plain_chat_completions_content() {
        let body = json!({ "choices": [{ "message": { "content": "hello" } }] });
        assert_eq!(extract_content(&body).as_deref(), Some("hello"));
    }

    #[test]
    fn extract_joined_content_parts() {
        let body = json!({
            "choices": [{ "message": { "content": [
                { "type": "text", "text": "hel" },
                { "type": "text", "text": "lo" },
            ]}}]
        });
        assert_eq!(extract_content(&body).as_deref(), Some("hello"));
    }

    #[test]
    fn extract_reasoning_content_when_content_empty() {
        let body = json!({
            "choices": [{ "message": { "content": "", "reasoning_content": "thinking" } }]
        });
        assert_eq!(extract_content(&body).as_deref(), Some("thinking"));
    }

    #[test]
    fn extract_legacy_choice_text() {
        let body = json!({ "choices": [{ "text": "legacy" }] });
        assert_eq!(extract_content(&body).as_deref(), Some("legacy"));
    }

    #[test]
    fn extract_top_level_output() {
        let body = json!({ "output": "top" });
        assert_eq!(extract_content(&body).as_deref(), Some("top"));
    }

    #[test]
    fn extract_native_message_content() {
        let body = json!({ "message": { "role": "assistant", "content": "native" } });
        assert_eq!(extract_content(&body).as_deref(), Some("native"));
    }

    #[test]
    fn last_ditch_scan_skips_metadata() {
        let body = json!({
            "id": "chatcmpl-very-long-identifier-string",
            "nested": { "deep": { "payload": "the actual answer text" } }
        });
        assert_eq!(
            extract_content(&body).as_deref(),
            Some("the actual answer text")
        );
    }

    #[test]
    fn empty_body_yields_none() {
        assert!(extract_content(&json!({})).is_none());
        assert!(extract_content(&json!({ "choices": [] })).is_none());
    }

    #[test]
    fn escalation_drops_shape_progressively() {
        let options = ChatOptions {
            expect_json: true,
            tools: vec![isocode_core::ToolSchema {
                name: "t".into(),
                description: String::new(),
                parameters: json!({}),
            }],
            temperature: 0.2,
            max_tokens: 4096,
            ..ChatOptions::default()
        };

        let first = escalate(&options, 1);
        assert!(first.expect_json);
        assert_eq!(first.tools.len(), 1);

        let second = escalate(&options, 2);
        assert!(!second.expect_json);
        assert_eq!(second.tools.len(), 1);

        let third = escalate(&options, 3);
        assert!(!third.expect_json);
        assert!(third.tools.is_empty());
        assert!((third.temperature - 0.4).abs() < 1e-6);
        assert_eq!(third.max_tokens, 8_192);
    }

    #[test]
    fn adapter_dialect_follows_config() {
        let mut config = AppConfig::default();
        let adapter = LlmAdapter::from_config(&config);
        assert_eq!(adapter.dialect, Dialect::Local);

        config.provider = "openrouter".into();
        config.api_base = "https://openrouter.ai/api/v1".into();
        let adapter = LlmAdapter::from_config(&config);
        assert_eq!(adapter.dialect, Dialect::ChatCompletions);
    }
}
