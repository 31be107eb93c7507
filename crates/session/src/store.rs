//! Conversation persistence.
//!
//! Each session persists to `<workspace>/.isocode/conversations/<id>.json`:
//! at most the last 100 messages with contents truncated to 4,000 characters
//! each. The in-memory history is never truncated by a save.

use crate::paths::{sanitize_session_id, state_dir};
use chrono::{DateTime, Utc};
use isocode_core::Message;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const MESSAGE_CHAR_CAP: usize = 4_000;

/// The on-disk record for one conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
    pub metadata: ConversationMetadata,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub compacted: bool,
}

/// Listing entry for `/sessions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Owner of one workspace's `conversations/` directory.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    dir: PathBuf,
    max_messages: usize,
}

impl ConversationStore {
    pub fn new(workspace: &Path, max_messages: usize) -> Self {
        Self {
            dir: state_dir(workspace).join("conversations"),
            max_messages,
        }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_session_id(session_id)))
    }

    /// Persist the tail of a conversation. The caller's message vector is
    /// untouched.
    pub fn save(
        &self,
        session_id: &str,
        model: Option<&str>,
        compacted: bool,
        messages: &[Message],
    ) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        let start = messages.len().saturating_sub(self.max_messages);
        let tail: Vec<Message> = messages[start..]
            .iter()
            .map(|m| {
                let mut m = m.clone();
                if m.content.len() > MESSAGE_CHAR_CAP {
                    let cut = m
                        .content
                        .char_indices()
                        .map(|(i, _)| i)
                        .take_while(|&i| i <= MESSAGE_CHAR_CAP)
                        .last()
                        .unwrap_or(0);
                    m.content.truncate(cut);
                }
                m
            })
            .collect();

        let record = ConversationRecord {
            updated_at: Utc::now(),
            message_count: messages.len(),
            metadata: ConversationMetadata {
                model: model.map(str::to_string),
                compacted,
            },
            messages: tail,
        };

        let text = serde_json::to_string_pretty(&record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(self.path_for(session_id), text)?;
        debug!(session = %session_id, count = record.message_count, "Saved conversation");
        Ok(())
    }

    pub fn load(&self, session_id: &str) -> Option<ConversationRecord> {
        let text = std::fs::read_to_string(self.path_for(session_id)).ok()?;
        match serde_json::from_str(&text) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(session = %session_id, error = %e, "Corrupted conversation record");
                None
            }
        }
    }

    pub fn delete(&self, session_id: &str) -> bool {
        std::fs::remove_file(self.path_for(session_id)).is_ok()
    }

    /// List persisted conversations, newest first.
    pub fn list(&self) -> Vec<ConversationSummary> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };

        let mut out: Vec<ConversationSummary> = entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                let id = path.file_stem()?.to_str()?.to_string();
                let text = std::fs::read_to_string(&path).ok()?;
                let record: ConversationRecord = serde_json::from_str(&text).ok()?;
                Some(ConversationSummary {
                    id,
                    updated_at: record.updated_at,
                    message_count: record.message_count,
                    model: record.metadata.model,
                })
            })
            .collect();

        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        out
    }
}
