//! State directory layout and session-id sanitisation.

use std::path::{Path, PathBuf};

/// Name of the per-workspace state directory.
pub const STATE_DIR: &str = ".isocode";

/// `<workspace>/.isocode`
pub fn state_dir(workspace: &Path) -> PathBuf {
    workspace.join(STATE_DIR)
}

/// Reduce a client-supplied session id to a filesystem-safe name.
///
/// Keeps `[A-Za-z0-9._-]`, replaces everything else with `_`, and caps the
/// length. Idempotent: sanitising a sanitised id is a no-op.
pub fn sanitize_session_id(id: &str) -> String {
    let mut out: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    out.truncate(128);
    if out.is_empty() {
        out.push_str("session");
    }
    out
}
