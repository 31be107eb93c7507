//! Native local dialect.
//!
//! The local backend's own endpoints: `POST /api/chat` (newline-delimited
//! JSON when streaming), `GET /api/tags` for model listing, and multimodal
//! messages with an `images` array. Used as the fallback dialect when the
//! compat layer returns nothing, and as the primary for streaming and model
//! listing against a local backend.

use futures::StreamExt;
use isocode_core::{ChatOptions, Message, ModelInfo, ProviderError, Role, ToolCallRequest};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Client for the native local endpoints.
#[derive(Debug, Clone)]
pub struct NativeClient {
    base_url: String,
    http: reqwest::Client,
}

impl NativeClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn build_body(model: &str, messages: &[Message], options: &ChatOptions, stream: bool) -> Value {
        let mut body = json!({
            "model": model,
            "messages": to_native_messages(messages),
            "stream": stream,
            "options": {
                "temperature": options.temperature,
                "num_predict": options.max_tokens,
            },
        });
        if options.expect_json {
            body["format"] = json!("json");
        }
        body
    }

    /// Non-streaming chat. Returns the raw body and any native tool calls.
    pub async fn call_raw(
        &self,
        model: &str,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<(Value, Vec<ToolCallRequest>), ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = Self::build_body(model, messages, options, false);
        debug!(model, url = %url, "native chat request");

        let response = self
            .http
            .post(&url)
            .timeout(options.timeout)
            .json(&body)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status().as_u16();
        if status != 200 {
            let message = response.text().await.unwrap_or_default();
            warn!(status, body = %message, "native chat error response");
            return Err(ProviderError::ApiError {
                status_code: status,
                message,
            });
        }

        let value: Value = response.json().await.map_err(|e| ProviderError::ApiError {
            status_code: 200,
            message: format!("Failed to parse response: {e}"),
        })?;

        let tool_calls = parse_tool_calls(&value);
        Ok((value, tool_calls))
    }

    /// Streaming chat; one JSON object per line, `done: true` terminates.
    pub async fn stream(
        &self,
        model: &str,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<mpsc::Receiver<Result<String, ProviderError>>, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = Self::build_body(model, messages, options, true);
        debug!(model, url = %url, "native streaming request");

        let response = self
            .http
            .post(&url)
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
                    let line = buffer[..line_end].trim().to_string();
                    buffer = buffer[line_end + 1..].to_string();
                    if line.is_empty() {
                        continue;
                    }

                    match serde_json::from_str::<Value>(&line) {
                        Ok(frame) => {
                            if let Some(content) = frame["message"]["content"].as_str()
                                && !content.is_empty()
                                && tx.send(Ok(content.to_string())).await.is_err()
                            {
                                return;
                            }
                            if frame["done"].as_bool() == Some(true) {
                                return;
                            }
                        }
                        Err(e) => {
                            trace!(line = %line, error = %e, "Ignoring unparseable NDJSON line");
                        }
                    }
                }
            }
        });

        Ok(rx)
    }

    /// `GET /api/tags`.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        if !response.status().is_success() {
            return Err(ProviderError::ApiError {
                status_code: response.status().as_u16(),
                message: "tag listing failed".into(),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(parse_tags(&body))
    }

    /// Multimodal call: the prompt plus one base64 image.
    pub async fn call_vision_raw(
        &self,
        model: &str,
        prompt: &str,
        image_base64: &str,
        options: &ChatOptions,
    ) -> Result<Value, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = json!({
            "model": model,
            "messages": [{
                "role": "user",
                "content": prompt,
                "images": [image_base64],
            }],
            "stream": false,
        });

        let response = self
            .http
            .post(&url)
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

        response.json().await.map_err(|e| ProviderError::ApiError {
            status_code: 200,
            message: format!("Failed to parse response: {e}"),
        })
    }

    /// Probe the backend root.
    pub async fn probe(&self) -> Result<(), ProviderError> {
        let response = self
            .http
            .get(&self.base_url)
            .timeout(std::time::Duration::from_secs(5))
            .send()
            .await
            .map_err(classify_reqwest_error)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProviderError::ApiError {
                status_code: response.status().as_u16(),
                message: "backend probe failed".into(),
            })
        }
    }
}

fn to_native_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::System => "system",
                Role::User | Role::Tool => "user",
                Role::Assistant => "assistant",
            };
            json!({ "role": role, "content": m.content })
        })
        .collect()
}

fn parse_tool_calls(body: &Value) -> Vec<ToolCallRequest> {
    body["message"]["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .filter_map(|tc| {
                    let name = tc["function"]["name"].as_str()?.to_string();
                    let args = tc["function"]["arguments"].clone();
                    Some(ToolCallRequest { name, args })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_tags(body: &Value) -> Vec<ModelInfo> {
    body["models"]
        .as_array()
        .map(|models| {
            models
                .iter()
                .filter_map(|m| {
                    let id = m["name"].as_str()?.to_string();
                    Some(ModelInfo {
                        display_name: id.clone(),
                        id,
                        size: m["size"].as_u64(),
                        family: m["details"]["family"].as_str().map(str::to_string),
                    })
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
