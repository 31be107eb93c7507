//! Trim a conversation to a token budget.
//!
//! Walks non-system messages newest to oldest, keeping whole messages while
//! they fit. The oldest message that only partially fits is included as a
//! smart-truncated prefix when enough budget remains to be useful.

use crate::token::{
    estimate_message_tokens, estimate_tokens, tokens_to_chars, MESSAGE_OVERHEAD_TOKENS,
};
use crate::truncate::smart_truncate;
use isocode_core::{Message, Role};

/// Default window size in tokens.
pub const DEFAULT_BUDGET_TOKENS: usize = 16_384;
/// Tokens reserved for the model's reply.
pub const REPLY_RESERVE_TOKENS: usize = 1_024;

/// Minimum characters of leftover budget worth spending on a partial message.
const MIN_PARTIAL_CHARS: usize = 200;

/// Produce a view of `messages` whose estimated token count fits `budget`.
///
/// The first message is expected to be the system prompt and is always kept
/// (truncated itself only when it alone exceeds the budget, in which case it
/// is paired with just the most recent message).
pub fn trim_to_budget(messages: &[Message], budget: usize) -> Vec<Message> {
    if messages.is_empty() {
        return Vec::new();
    }

    let (system, rest): (Option<&Message>, &[Message]) = if messages[0].role == Role::System {
        (Some(&messages[0]), &messages[1..])
    } else {
        (None, messages)
    };

    if let Some(system) = system {
        let system_tokens = estimate_message_tokens(system);
        if system_tokens > budget {
            // Degenerate case: shrink the prompt and keep only the latest
            // message.
            let reserve = rest
                .last()
                .map(estimate_message_tokens)
                .unwrap_or(0)
                .min(budget / 2);
            let allowed_chars =
                tokens_to_chars(budget.saturating_sub(reserve + MESSAGE_OVERHEAD_TOKENS));
            let mut out = vec![Message {
                content: smart_truncate(&system.content, allowed_chars.max(MIN_PARTIAL_CHARS)),
                ..system.clone()
            }];
            if let Some(last) = rest.last() {
                out.push(last.clone());
            }
            return out;
        }
    }

    let mut remaining = budget;
    if let Some(system) = system {
        remaining -= estimate_message_tokens(system);
    }

    let mut kept: Vec<Message> = Vec::new();
    for message in rest.iter().rev() {
        let tokens = estimate_message_tokens(message);
        if tokens <= remaining {
            kept.push(message.clone());
            remaining -= tokens;
            continue;
        }

        // Oldest partially-fitting message: include a truncated prefix when
        // at least MIN_PARTIAL_CHARS of budget remain.
        let chars = tokens_to_chars(remaining.saturating_sub(MESSAGE_OVERHEAD_TOKENS));
        if chars >= MIN_PARTIAL_CHARS {
            let content = smart_truncate(&message.content, chars);
            // smart_truncate adds a marker; re-check the estimate so the
            // budget invariant holds.
            if estimate_tokens(&content) + MESSAGE_OVERHEAD_TOKENS <= remaining {
                kept.push(Message {
                    content,
                    ..message.clone()
                });
            }
        }
        break;
    }

    kept.reverse();
    let mut out = Vec::with_capacity(kept.len() + 1);
    if let Some(system) = system {
        out.push(system.clone());
    }
    out.extend(kept);
    out
}
