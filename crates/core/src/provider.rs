//! Provider trait — the unified interface over LLM backend dialects.
//!
//! The adapter in `isocode-providers` implements this once over the
//! chat-completions and native local dialects; the engine and the delegation
//! pool only ever see `Arc<dyn Provider>`.

use crate::error::ProviderError;
use crate::message::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;

/// Per-call options.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
    /// Request JSON-object output mode where the dialect supports it.
    pub expect_json: bool,
    /// Native tool schemas to expose; empty disables tool calling.
    pub tools: Vec<ToolSchema>,
    /// Optional tool-choice hint ("auto", "none", or a tool name).
    pub tool_choice: Option<String>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 4096,
            timeout: Duration::from_secs(180),
            expect_json: false,
            tools: Vec::new(),
            tool_choice: None,
        }
    }
}

/// A tool schema in provider-neutral form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A native tool invocation returned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    pub args: Value,
}

/// The outcome of a non-streaming call: plain content, native tool calls,
/// or both.
#[derive(Debug, Clone, Default)]
pub struct ChatOutcome {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
}

/// One entry from the backend's model listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
}

/// Backend health probe result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub ok: bool,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The unified LLM interface.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name for diagnostics ("local", "openai", ...).
    fn name(&self) -> &str;

    /// One-shot chat call.
    async fn call(
        &self,
        model: &str,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<ChatOutcome, ProviderError>;

    /// Streaming chat; yields text deltas.
    async fn stream(
        &self,
        model: &str,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<mpsc::Receiver<Result<String, ProviderError>>, ProviderError>;

    /// Multimodal call with a single base64 image.
    async fn call_vision(
        &self,
        model: &str,
        prompt: &str,
        image_base64: &str,
        mime_type: &str,
        options: &ChatOptions,
    ) -> Result<String, ProviderError>;

    /// List available models.
    async fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError>;

    /// Health probe; never errors, failure is carried in the report.
    async fn health(&self) -> HealthReport;
}
