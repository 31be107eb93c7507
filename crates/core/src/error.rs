//! Error types for the isocode domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum.

use thiserror::Error;

/// The top-level error type for all isocode operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider returned empty content")]
    EmptyResponse,

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// True for "model not found"-class failures, which must never be retried.
    pub fn is_model_missing(&self) -> bool {
        match self {
            Self::ModelNotFound(_) => true,
            Self::ApiError { message, .. } | Self::Network(message) => {
                let m = message.to_lowercase();
                m.contains("not found") || m.contains("does not exist")
            }
            _ => false,
        }
    }

    /// True for HTTP 400/422 responses, which trigger escalating
    /// request-shape retries inside the adapter.
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            Self::ApiError {
                status_code: 400 | 422,
                ..
            }
        )
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    Unknown(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Permission denied: {tool_name} — {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Path escapes workspace: {0}")]
    PathEscape(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("No pending diff for session {0}")]
    NoPendingDiff(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_status() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 422,
            message: "bad schema".into(),
        });
        assert!(err.to_string().contains("422"));
        assert!(err.to_string().contains("bad schema"));
    }

    #[test]
    fn model_missing_detected_in_message() {
        let err = ProviderError::ApiError {
            status_code: 404,
            message: "model 'qwen3' not found, try pulling it first".into(),
        };
        assert!(err.is_model_missing());

        let err = ProviderError::Network("connection refused".into());
        assert!(!err.is_model_missing());
    }

    #[test]
    fn bad_request_matches_400_and_422() {
        for code in [400u16, 422] {
            let err = ProviderError::ApiError {
                status_code: code,
                message: String::new(),
            };
            assert!(err.is_bad_request());
        }
        let err = ProviderError::ApiError {
            status_code: 500,
            message: String::new(),
        };
        assert!(!err.is_bad_request());
    }

    #[test]
    fn tool_error_displays_reason() {
        let err = Error::Tool(ToolError::PermissionDenied {
            tool_name: "run_command".into(),
            reason: "policy is 'never'".into(),
        });
        assert!(err.to_string().contains("run_command"));
        assert!(err.to_string().contains("never"));
    }
}
