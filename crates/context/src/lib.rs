//! Context window management.
//!
//! Token accounting uses a character heuristic; truncation and trimming keep
//! every LLM request inside the configured budget, and compaction summarises
//! the conversation prefix through the model itself when a session grows past
//! 75% of its window.

pub mod compact;
pub mod token;
pub mod trim;
pub mod truncate;

pub use compact::{CompactionResult, Compactor, KEEP_RECENT};
pub use token::{
    estimate_message_tokens, estimate_messages_tokens, estimate_tokens, tokens_to_chars,
    MESSAGE_OVERHEAD_TOKENS,
};
pub use trim::{trim_to_budget, DEFAULT_BUDGET_TOKENS, REPLY_RESERVE_TOKENS};
pub use truncate::{smart_truncate, truncate_tool_result};
