//! LLM backend adapters.
//!
//! Two wire dialects cover every supported backend: the OpenAI-compatible
//! `/v1/chat/completions` shape (OpenAI, OpenRouter, vLLM, Ollama's compat
//! layer, ...) and the native local shape (`/api/chat`, `/api/tags`,
//! newline-delimited JSON streaming). `LlmAdapter` unifies them behind the
//! `isocode_core::Provider` trait: the local provider tries chat-completions
//! first and falls back to the native endpoint, remote providers use
//! chat-completions only.

pub mod adapter;
pub mod chat_completions;
pub mod native;

pub use adapter::LlmAdapter;
pub use chat_completions::ChatCompletionsClient;
pub use native::NativeClient;
