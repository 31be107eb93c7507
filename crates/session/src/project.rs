//! Project-level context: a small key-value file and user-authored rules.

use crate::paths::state_dir;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Maximum keys kept; the oldest entry is evicted on overflow.
const MAX_KEYS: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextEntry {
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

/// Owner of `<workspace>/.isocode/project-context.json`.
#[derive(Debug, Clone)]
pub struct ProjectContext {
    path: PathBuf,
    rules_path: PathBuf,
}

impl ProjectContext {
    pub fn new(workspace: &Path) -> Self {
        let dir = state_dir(workspace);
        Self {
            path: dir.join("project-context.json"),
            rules_path: dir.join("rules.md"),
        }
    }

    fn read_all(&self) -> BTreeMap<String, ContextEntry> {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default()
    }

    fn write_all(&self, entries: &BTreeMap<String, ContextEntry>) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(entries)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&self.path, text)
    }

    pub fn set(&self, key: &str, value: &str) -> std::io::Result<()> {
        let mut entries = self.read_all();
        entries.insert(
            key.to_string(),
            ContextEntry {
                value: value.to_string(),
                updated_at: Utc::now(),
            },
        );

        while entries.len() > MAX_KEYS {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.updated_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => entries.remove(&key),
                None => break,
            };
        }

        self.write_all(&entries)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.read_all().get(key).map(|e| e.value.clone())
    }

    /// One-line-per-key digest for the system prompt.
    pub fn summary(&self) -> Option<String> {
        let entries = self.read_all();
        if entries.is_empty() {
            return None;
        }
        let lines: Vec<String> = entries
            .iter()
            .map(|(k, e)| {
                let value: String = e.value.chars().take(200).collect();
                format!("- {k}: {value}")
            })
            .collect();
        Some(lines.join("\n"))
    }

    /// User-authored rules, included verbatim in the system prompt.
    pub fn rules(&self) -> Option<String> {
        std::fs::read_to_string(&self.rules_path).ok()
    }
}
