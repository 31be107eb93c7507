//! Markdown checkpoints.
//!
//! A checkpoint is a human-readable snapshot of session state written at
//! session start, every eighth step, after each compaction, and on every
//! termination path. New sessions with a matching id resume from the latest
//! checkpoint (capped by the engine at 1,500 characters).

use crate::paths::{sanitize_session_id, state_dir};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Data captured into one checkpoint.
#[derive(Debug, Clone, Default)]
pub struct Checkpoint {
    pub user_requests: Vec<String>,
    pub recent_thoughts: Vec<String>,
    pub tool_actions: Vec<String>,
    pub plan: Option<String>,
    pub step: usize,
}

/// Owner of one workspace's `checkpoints/` directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(workspace: &Path) -> Self {
        Self {
            dir: state_dir(workspace).join("checkpoints"),
        }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.md", sanitize_session_id(session_id)))
    }

    pub fn write(&self, session_id: &str, checkpoint: &Checkpoint) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        let mut md = String::new();
        md.push_str(&format!(
            "# Session checkpoint\n\nUpdated: {}\nStep: {}\n",
            Utc::now().to_rfc3339(),
            checkpoint.step
        ));

        md.push_str("\n## User requests\n");
        for request in &checkpoint.user_requests {
            md.push_str(&format!("- {}\n", single_line(request, 300)));
        }

        if let Some(plan) = &checkpoint.plan {
            md.push_str("\n## Current plan\n");
            md.push_str(plan);
            md.push('\n');
        }

        md.push_str("\n## Recent thoughts\n");
        for thought in checkpoint.recent_thoughts.iter().rev().take(5).rev() {
            md.push_str(&format!("- {}\n", single_line(thought, 300)));
        }

        md.push_str("\n## Tool actions\n");
        for action in checkpoint.tool_actions.iter().rev().take(10).rev() {
            md.push_str(&format!("- {}\n", single_line(action, 200)));
        }

        std::fs::write(self.path_for(session_id), md)?;
        debug!(session = %session_id, step = checkpoint.step, "Checkpoint written");
        Ok(())
    }

    /// Raw markdown of the latest checkpoint, if any.
    pub fn load(&self, session_id: &str) -> Option<String> {
        std::fs::read_to_string(self.path_for(session_id)).ok()
    }

    pub fn exists(&self, session_id: &str) -> bool {
        self.path_for(session_id).exists()
    }
}

fn single_line(text: &str, cap: usize) -> String {
    let mut line: String = text
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .take(cap)
        .collect();
    if text.chars().count() > cap {
        line.push('…');
    }
    line
}
