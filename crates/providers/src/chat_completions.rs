//! OpenAI-compatible dialect.
//!
//! Works with OpenAI, OpenRouter, vLLM, Together, and Ollama's
//! `/v1/chat/completions` compatibility layer. Supports JSON-object response
//! mode, native tool calling, SSE streaming, model listing, and the
//! `image_url` content-part vision format.

use futures::StreamExt;
use isocode_core::{ChatOptions, Message, ModelInfo, ProviderError, Role, ToolCallRequest};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Client for one OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct ChatCompletionsClient {
    base_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl ChatCompletionsClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            http: reqwest::Client::new(),
        }
    }

    /// `{base}/v1/chat/completions`, tolerating bases that already end in
    /// `/v1`.
    fn endpoint(&self, path: &str) -> String {
        if self.base_url.ends_with("/v1") {
            format!("{}/{path}", self.base_url)
        } else {
            format!("{}/v1/{path}", self.base_url)
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {key}")),
            None => request,
        }
    }

    fn build_body(model: &str, messages: &[Message], options: &ChatOptions, stream: bool) -> Value {
        let mut body = json!({
            "model": model,
            "messages": to_api_messages(messages),
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
            "stream": stream,
        });
        if options.expect_json {
            body["response_format"] = json!({ "type": "json_object" });
        }
        if !options.tools.is_empty() {
            body["tools"] = json!(options
                .tools
                .iter()
                .map(|t| json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                }))
                .collect::<Vec<_>>());
            if let Some(choice) = &options.tool_choice {
                body["tool_choice"] = json!(choice);
            }
        }
        body
    }

    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        timeout: std::time::Duration,
    ) -> Result<Value, ProviderError> {
        let response = self
            .authorize(self.http.post(url))
            .header("Content-Type", "application/json")
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status().as_u16();
        if status != 200 {
            let message = response.text().await.unwrap_or_default();
            warn!(status, body = %message, "chat-completions error response");
            return Err(ProviderError::ApiError {
                status_code: status,
                message,
            });
        }

        response.json().await.map_err(|e| ProviderError::ApiError {
            status_code: 200,
            message: format!("Failed to parse response: {e}"),
        })
    }

    /// Non-streaming call. Returns the raw response body plus the parsed
    /// tool-call list; content extraction is the adapter's job.
    pub async fn call_raw(
        &self,
        model: &str,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<(Value, Vec<ToolCallRequest>), ProviderError> {
        let url = self.endpoint("chat/completions");
        let body = Self::build_body(model, messages, options, false);
        debug!(model, url = %url, "chat-completions request");

        let value = self.post_json(&url, &body, options.timeout).await?;
        let tool_calls = parse_tool_calls(&value);
        Ok((value, tool_calls))
    }

    /// Streaming call; yields text deltas parsed from SSE `data:` frames,
    /// terminated by `[DONE]` or a `finish_reason`.
    pub async fn stream(
        &self,
        model: &str,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<mpsc::Receiver<Result<String, ProviderError>>, ProviderError> {
        let url = self.endpoint("chat/completions");
        let body = Self::build_body(model, messages, options, true);
        debug!(model, url = %url, "chat-completions streaming request");

        let response = self
            .authorize(self.http.post(&url))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .timeout(options.timeout)
            .json(&body)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status().as_u16();
        if status != 200 {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError {
                status_code: status,
                message,
            });
        }

        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = byte_stream.next().await {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim_end_matches('\r').to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }
                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        return;
                    }

                    match serde_json::from_str::<StreamFrame>(data) {
                        Ok(frame) => {
                            if let Some(choice) = frame.choices.first() {
                                if let Some(content) = &choice.delta.content
                                    && !content.is_empty()
                                    && tx.send(Ok(content.clone())).await.is_err()
                                {
                                    return;
                                }
                                if choice.finish_reason.as_deref() == Some("stop") {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            trace!(data = %data, error = %e, "Ignoring unparseable SSE chunk");
                        }
                    }
                }
            }
        });

        Ok(rx)
    }

    /// `GET /v1/models`.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        let url = self.endpoint("models");
        let response = self
            .authorize(self.http.get(&url))
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        if !response.status().is_success() {
            return Err(ProviderError::ApiError {
                status_code: response.status().as_u16(),
                message: "model listing failed".into(),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(body["data"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| {
                        let id = m["id"].as_str()?.to_string();
                        Some(ModelInfo {
                            display_name: id.clone(),
                            id,
                            size: None,
                            family: m["owned_by"].as_str().map(str::to_string),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Vision call using the `image_url` content-part shape.
    pub async fn call_vision_raw(
        &self,
        model: &str,
        prompt: &str,
        image_base64: &str,
        mime_type: &str,
        options: &ChatOptions,
    ) -> Result<Value, ProviderError> {
        let url = self.endpoint("chat/completions");
        let body = json!({
            "model": model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url",
                      "image_url": { "url": format!("data:{mime_type};base64,{image_base64}") } },
                ],
            }],
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
            "stream": false,
        });

        self.post_json(&url, &body, options.timeout).await
    }
}

fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
    messages
        .iter()
        .map(|m| ApiMessage {
            role: match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                // Observations travel as user turns; directive-format
                // conversations do not use the native tool-result protocol.
                Role::Tool => "user",
            },
            content: m.content.clone(),
        })
        .collect()
}

fn parse_tool_calls(body: &Value) -> Vec<ToolCallRequest> {
    body["choices"][0]["message"]["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .filter_map(|tc| {
                    let name = tc["function"]["name"].as_str()?.to_string();
                    let args = match &tc["function"]["arguments"] {
                        Value::String(s) => serde_json::from_str(s).unwrap_or(Value::Null),
                        other => other.clone(),
                    };
                    Some(ToolCallRequest { name, args })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn classify_reqwest_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(0)
    } else {
        ProviderError::Network(e.to_string())
    }
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct StreamFrame {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}
