//! Message domain types.
//!
//! These are the value objects that flow through the entire system: the
//! gateway receives a user message, the engine appends assistant directives
//! and tool observations, the provider adapter serialises them onto the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of a message sender in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions (prompt, rules, injected context)
    System,
    /// The end user (also carries engine nudges)
    User,
    /// The model; content is the directive recorded verbatim as JSON text
    Assistant,
    /// A truncated tool observation
    Tool,
}

/// A single message in a session's conversation.
///
/// Messages are append-only; compaction rewrites the prefix but never the
/// last four messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a tool observation message.
    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_message() {
        let msg = Message::user("Rename foo to bar");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Rename foo to bar");
    }

    #[test]
    fn roles_serialize_lowercase() {
        let msg = Message::tool("{\"ok\":true}");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""role":"tool""#));
    }

    #[test]
    fn message_serialization_roundtrip() {
        let msg = Message::assistant(r#"{"type":"final","content":"done"}"#);
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role, Role::Assistant);
        assert_eq!(back.content, msg.content);
    }
}
