//! Workspace file index.
//!
//! Built on demand, cached with a 60-second TTL, shared process-wide behind
//! one owner object. Excludes dot-prefixed and build-output directories and
//! binary extensions. Key build/readme files keep a short content snippet for
//! relevance gathering and the project map.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Cache lifetime.
pub const INDEX_TTL: Duration = Duration::from_secs(60);

/// Safety cap on indexed files.
const MAX_FILES: usize = 10_000;
/// Snippet length kept for key files.
const KEY_FILE_SNIPPET: usize = 2_000;

const IGNORED_DIRS: [&str; 8] = [
    "node_modules",
    "dist",
    "out",
    "build",
    "target",
    "vendor",
    "coverage",
    "__pycache__",
];

const BINARY_EXTENSIONS: [&str; 20] = [
    "png", "jpg", "jpeg", "gif", "ico", "pdf", "zip", "tar", "gz", "exe", "dll", "so", "dylib",
    "woff", "woff2", "ttf", "mp3", "mp4", "wasm", "bin",
];

const KEY_FILE_NAMES: [&str; 8] = [
    "README.md",
    "Cargo.toml",
    "package.json",
    "pyproject.toml",
    "go.mod",
    "Makefile",
    "tsconfig.json",
    "composer.json",
];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub relative_path: String,
    pub extension: String,
    pub size: u64,
    pub dir: String,
}

/// One built index.
#[derive(Debug, Clone)]
pub struct FileIndex {
    pub files: Vec<FileEntry>,
    pub dirs: BTreeSet<String>,
    pub key_files: HashMap<String, String>,
    pub total: usize,
    built_at: Instant,
}

impl FileIndex {
    pub fn build(workspace: &Path) -> Self {
        let mut files = Vec::new();
        let mut dirs = BTreeSet::new();
        let mut key_files = HashMap::new();

        walk(workspace, workspace, &mut files, &mut dirs, &mut key_files);

        debug!(files = files.len(), dirs = dirs.len(), "File index built");
        Self {
            total: files.len(),
            files,
            dirs,
            key_files,
            built_at: Instant::now(),
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.built_at.elapsed() < INDEX_TTL
    }

    /// Compact directory/file overview for new sessions' system prompts.
    pub fn project_map(&self, max_chars: usize) -> String {
        let mut map = format!("{} files indexed.\nDirectories:\n", self.total);
        for dir in self.dirs.iter().take(40) {
            map.push_str(&format!("  {dir}/\n"));
        }
        map.push_str("Key files: ");
        map.push_str(
            &self
                .key_files
                .keys()
                .cloned()
                .collect::<Vec<_>>()
                .join(", "),
        );
        if map.len() > max_chars {
            let mut cut = max_chars;
            while !map.is_char_boundary(cut) {
                cut -= 1;
            }
            map.truncate(cut);
        }
        map
    }

    /// Gather up to `max_chars` of context relevant to `query`: matching
    /// file paths plus key-file snippets sharing terms with the query.
    pub fn gather_context(&self, query: &str, max_chars: usize) -> Option<String> {
        let terms: Vec<String> = query
            .split(|c: char| !c.is_alphanumeric() && c != '_' && c != '.')
            .filter(|w| w.len() >= 3)
            .map(str::to_lowercase)
            .collect();
        if terms.is_empty() {
            return None;
        }

        let mut scored: Vec<(usize, &FileEntry)> = self
            .files
            .iter()
            .filter_map(|f| {
                let path_lower = f.relative_path.to_lowercase();
                let score = terms.iter().filter(|t| path_lower.contains(*t)).count();
                (score > 0).then_some((score, f))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        let mut out = String::from("Possibly relevant files:\n");
        for (_, entry) in scored.iter().take(15) {
            out.push_str(&format!("  {}\n", entry.relative_path));
        }

        for (name, snippet) in &self.key_files {
            if out.len() >= max_chars {
                break;
            }
            let snippet_lower = snippet.to_lowercase();
            if terms.iter().any(|t| snippet_lower.contains(t)) {
                let room = max_chars.saturating_sub(out.len()).min(800);
                if room > 50 {
                    let clipped: String = snippet.chars().take(room).collect();
                    out.push_str(&format!("\n--- {name} ---\n{clipped}\n"));
                }
            }
        }

        if scored.is_empty() {
            return None;
        }
        out.truncate(max_chars);
        Some(out)
    }
}

fn walk(
    root: &Path,
    dir: &Path,
    files: &mut Vec<FileEntry>,
    dirs: &mut BTreeSet<String>,
    key_files: &mut HashMap<String, String>,
) {
    if files.len() >= MAX_FILES {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        if path.is_dir() {
            if name.starts_with('.') || IGNORED_DIRS.contains(&name) {
                continue;
            }
            if let Ok(rel) = path.strip_prefix(root) {
                dirs.insert(rel.to_string_lossy().replace('\\', "/"));
            }
            walk(root, &path, files, dirs, key_files);
            continue;
        }

        if name.starts_with('.') {
            continue;
        }
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        if BINARY_EXTENSIONS.contains(&extension.as_str()) {
            continue;
        }

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        let relative = path
            .strip_prefix(root)
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_else(|_| name.to_string());
        let parent = relative
            .rsplit_once('/')
            .map(|(d, _)| d.to_string())
            .unwrap_or_default();

        if KEY_FILE_NAMES.contains(&name)
            && let Ok(content) = std::fs::read_to_string(&path)
        {
            let snippet: String = content.chars().take(KEY_FILE_SNIPPET).collect();
            key_files.insert(relative.clone(), snippet);
        }

        files.push(FileEntry {
            relative_path: relative,
            extension,
            size,
            dir: parent,
        });
        if files.len() >= MAX_FILES {
            return;
        }
    }
}

/// Process-wide index cache: one workspace at a time, 60 s TTL.
#[derive(Debug, Default)]
pub struct IndexOwner {
    cache: Mutex<Option<(PathBuf, FileIndex)>>,
}

impl IndexOwner {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_build(&self, workspace: &Path) -> FileIndex {
        let mut cache = self.cache.lock().await;
        if let Some((cached_root, index)) = cache.as_ref()
            && cached_root == workspace
            && index.is_fresh()
        {
            return index.clone();
        }
        let index = FileIndex::build(workspace);
        *cache = Some((workspace.to_path_buf(), index.clone()));
        index
    }

    pub async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }
}
