//! Vision tool: load a workspace image and describe it through the adapter.

use crate::path::confine;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use isocode_core::{ChatOptions, Provider, Tool, ToolCategory, ToolContext, ToolError};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Refuse to inline images past this size.
const MAX_IMAGE_BYTES: u64 = 10_000_000;

pub struct VisionTool {
    provider: Arc<dyn Provider>,
    /// Configured vision model; falls back to the session model when unset.
    vision_model: Option<String>,
}

impl VisionTool {
    pub fn new(provider: Arc<dyn Provider>, vision_model: Option<String>) -> Self {
        Self {
            provider,
            vision_model,
        }
    }
}

fn mime_for(extension: &str) -> &'static str {
    match extension {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl Tool for VisionTool {
    fn name(&self) -> &str {
        "describe_image"
    }

    fn description(&self) -> &str {
        "Load an image from the workspace and answer a question about it with a vision-capable model."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Vision
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Workspace-relative image path" },
                "prompt": { "type": "string", "description": "What to look for (default: describe the image)" },
                "model": { "type": "string", "description": "Vision model override" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let path = args["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path'".into()))?;
        let prompt = args["prompt"].as_str().unwrap_or("Describe this image.");

        let absolute = confine(&ctx.workspace_root, path)?;
        let metadata = tokio::fs::metadata(&absolute)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "describe_image".into(),
                reason: e.to_string(),
            })?;
        if metadata.len() > MAX_IMAGE_BYTES {
            return Err(ToolError::InvalidArguments(format!(
                "Image is {} bytes; limit is {MAX_IMAGE_BYTES}",
                metadata.len()
            )));
        }

        let bytes = tokio::fs::read(&absolute)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "describe_image".into(),
                reason: e.to_string(),
            })?;
        let encoded = BASE64.encode(&bytes);
        let extension = absolute
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        let model = args["model"]
            .as_str()
            .map(str::to_string)
            .or_else(|| self.vision_model.clone())
            .ok_or_else(|| {
                ToolError::InvalidArguments(
                    "No vision model configured; pass 'model' or set visionModel in /config".into(),
                )
            })?;

        let options = ChatOptions {
            timeout: Duration::from_secs(120),
            ..ChatOptions::default()
        };

        let answer = self
            .provider
            .call_vision(&model, prompt, &encoded, mime_for(&extension), &options)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "describe_image".into(),
                reason: e.to_string(),
            })?;

        Ok(json!({ "content": answer, "model": model, "path": path }))
    }
}
