//! Cross-session memory: per-session summaries and the recall primer.

use crate::paths::{sanitize_session_id, state_dir};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Sessions considered when building the primer for a new session.
const PRIMER_SESSIONS: usize = 3;
/// Character cap per summary inside the primer.
const PRIMER_ENTRY_CAP: usize = 600;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryRecord {
    summary: String,
    updated_at: DateTime<Utc>,
}

/// Owner of one workspace's `memory/` directory.
#[derive(Debug, Clone)]
pub struct SummaryStore {
    dir: PathBuf,
}

impl SummaryStore {
    pub fn new(workspace: &Path) -> Self {
        Self {
            dir: state_dir(workspace).join("memory"),
        }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_session_id(session_id)))
    }

    pub fn save(&self, session_id: &str, summary: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let record = SummaryRecord {
            summary: summary.to_string(),
            updated_at: Utc::now(),
        };
        let text = serde_json::to_string_pretty(&record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(self.path_for(session_id), text)
    }

    pub fn load(&self, session_id: &str) -> Option<String> {
        let text = std::fs::read_to_string(self.path_for(session_id)).ok()?;
        serde_json::from_str::<SummaryRecord>(&text)
            .ok()
            .map(|r| r.summary)
    }

    /// Concatenate the most recent summaries (top 3 by file mtime) into a
    /// short primer appended to new sessions' system prompts.
    pub fn recent_primer(&self) -> Option<String> {
        let entries = std::fs::read_dir(&self.dir).ok()?;

        let mut files: Vec<(std::time::SystemTime, PathBuf)> = entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().is_some_and(|e| e == "json") {
                    let mtime = entry.metadata().ok()?.modified().ok()?;
                    Some((mtime, path))
                } else {
                    None
                }
            })
            .collect();

        files.sort_by(|a, b| b.0.cmp(&a.0));

        let primer: Vec<String> = files
            .into_iter()
            .take(PRIMER_SESSIONS)
            .filter_map(|(_, path)| {
                let text = std::fs::read_to_string(&path).ok()?;
                let record: SummaryRecord = serde_json::from_str(&text).ok()?;
                let mut s = record.summary;
                if s.len() > PRIMER_ENTRY_CAP {
                    let cut = s
                        .char_indices()
                        .map(|(i, _)| i)
                        .take_while(|&i| i <= PRIMER_ENTRY_CAP)
                        .last()
                        .unwrap_or(0);
                    s.truncate(cut);
                }
                Some(format!("- {s}"))
            })
            .collect();

        if primer.is_empty() {
            None
        } else {
            Some(primer.join("\n"))
        }
    }
}
