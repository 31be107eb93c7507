//! Workspace path confinement.
//!
//! Every path argument a tool accepts is resolved against the workspace root
//! and rejected when the resolved absolute path escapes it. Resolution is
//! lexical (no filesystem access) so paths that do not exist yet, such as
//! write targets, are confined the same way as existing files.

use isocode_core::ToolError;
use std::path::{Component, Path, PathBuf};

/// Resolve `candidate` against `root` and verify containment.
///
/// Accepts workspace-relative paths (forward or backslashes) and absolute
/// paths that already sit inside the root. Idempotent: confining an already
/// confined path returns it unchanged.
pub fn confine(root: &Path, candidate: &str) -> Result<PathBuf, ToolError> {
    let normalized = candidate.replace('\\', "/");
    let candidate_path = Path::new(&normalized);

    let joined = if candidate_path.is_absolute() {
        candidate_path.to_path_buf()
    } else {
        root.join(candidate_path)
    };

    let resolved = normalize(&joined);
    if resolved.starts_with(normalize(root)) {
        Ok(resolved)
    } else {
        Err(ToolError::PathEscape(candidate.to_string()))
    }
}

/// Workspace-relative form with forward slashes, for client-facing events.
pub fn to_workspace_relative(root: &Path, absolute: &Path) -> String {
    absolute
        .strip_prefix(normalize(root))
        .unwrap_or(absolute)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Lexical normalisation: resolves `.` and `..` without touching the
/// filesystem. `..` above the root of the path is dropped.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> PathBuf {
        PathBuf::from("/home/dev/project")
    }

    #[test]
    fn relative_path_resolves_inside_root() {
        let p = confine(&root(), "src/main.rs").unwrap();
        assert_eq!(p, PathBuf::from("/home/dev/project/src/main.rs"));
    }

    #[test]
    fn dot_segments_are_collapsed() {
        let p = confine(&root(), "src/./sub/../main.rs").unwrap();
        assert_eq!(p, PathBuf::from("/home/dev/project/src/main.rs"));
    }

    #[test]
    fn traversal_out_of_root_rejected() {
        for escape in ["../../etc/passwd", "src/../../outside", "..\\..\\etc\\passwd"] {
            let err = confine(&root(), escape).unwrap_err();
            assert!(matches!(err, ToolError::PathEscape(_)), "{escape}");
        }
    }

    #[test]
    fn absolute_path_inside_root_accepted() {
        let p = confine(&root(), "/home/dev/project/Cargo.toml").unwrap();
        assert_eq!(p, PathBuf::from("/home/dev/project/Cargo.toml"));
    }

    #[test]
    fn absolute_path_outside_root_rejected() {
        assert!(confine(&root(), "/etc/passwd").is_err());
    }

    #[test]
    fn confinement_is_idempotent() {
        let once = confine(&root(), "a/b/c.txt").unwrap();
        let twice = confine(&root(), once.to_str().unwrap()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn backslash_paths_normalised() {
        let p = confine(&root(), "src\\lib.rs").unwrap();
        assert_eq!(p, PathBuf::from("/home/dev/project/src/lib.rs"));
    }

    #[test]
    fn relative_form_uses_forward_slashes() {
        let abs = confine(&root(), "src/deep/file.ts").unwrap();
        assert_eq!(to_workspace_relative(&root(), &abs), "src/deep/file.ts");
    }
}
