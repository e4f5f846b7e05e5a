//! Repository access for the workflow: structure mapping, bounded file
//! reads/writes, and text search.
//!
//! Every relative path is resolved through [`resolve_within`] before any I/O,
//! so a model-generated traversal cannot touch anything outside the target
//! repository.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Instant;

use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::io::paths::resolve_within;
use crate::io::result::{ToolErrorCode, ToolResult};

/// Maximum file size the gateway will read or index (1 MiB).
pub const MAX_FILE_SIZE: u64 = 1024 * 1024;

/// Cap on key files reported by a repository map.
const MAX_KEY_FILES: usize = 50;

/// Cap on extracted signatures per file.
const MAX_SIGNATURES_PER_FILE: usize = 20;

const IGNORED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "__pycache__",
    ".venv",
    "venv",
    ".next",
    "dist",
    "build",
    ".pytest_cache",
    ".mypy_cache",
];

const CODE_EXTENSIONS: &[&str] = &[
    "rs", "py", "js", "ts", "tsx", "jsx", "go", "java", "c", "cpp", "h", "hpp", "rb", "php",
    "swift", "kt", "scala", "vue", "svelte",
];

/// One node of the mapped repository tree.
#[derive(Debug, Clone, Serialize)]
pub struct TreeEntry {
    pub name: String,
    pub path: String,
    pub kind: EntryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Directory,
    File,
}

/// Code file surfaced by a repository map.
#[derive(Debug, Clone, Serialize)]
pub struct KeyFile {
    pub path: String,
    pub size: u64,
}

/// Result payload of [`Repo::map`].
#[derive(Debug, Clone, Serialize)]
pub struct RepoMap {
    pub tree: TreeEntry,
    pub key_files: Vec<KeyFile>,
    /// Regex-extracted declaration summaries keyed by relative file path.
    pub signatures: BTreeMap<String, Vec<String>>,
    pub total_files: usize,
}

/// Result payload of [`Repo::read_file`].
#[derive(Debug, Clone, Serialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
    pub total_lines: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub size: u64,
}

/// Result payload of [`Repo::write_file`].
#[derive(Debug, Clone, Serialize)]
pub struct WriteOutcome {
    pub path: String,
    pub size: usize,
    /// First 16 hex chars of the sha256 of the written content.
    pub content_hash: String,
    pub created: bool,
}

/// One match from [`Repo::search`].
#[derive(Debug, Clone, Serialize)]
pub struct SearchMatch {
    pub path: String,
    pub line_number: usize,
    pub line_text: String,
}

/// Gateway for file operations inside one target repository.
#[derive(Debug, Clone)]
pub struct Repo {
    root: PathBuf,
}

impl Repo {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map the repository structure up to `max_depth` directory levels.
    #[instrument(skip_all, fields(root = %self.root.display(), max_depth))]
    pub async fn map(&self, max_depth: usize) -> ToolResult<RepoMap> {
        let started = Instant::now();
        if !self.root.is_dir() {
            return ToolResult::err(
                ToolErrorCode::InvalidPath,
                format!("repository path does not exist: {}", self.root.display()),
                started,
            );
        }
        let root = self.root.clone();
        match tokio::task::spawn_blocking(move || build_map(&root, max_depth)).await {
            Ok(map) => {
                debug!(key_files = map.key_files.len(), "mapped repository");
                ToolResult::ok(map, started)
            }
            Err(err) => ToolResult::err(
                ToolErrorCode::ExecutionError,
                format!("repository walk failed: {err}"),
                started,
            ),
        }
    }

    /// Read a file, optionally restricted to a 1-indexed inclusive line range.
    #[instrument(skip_all, fields(relative))]
    pub async fn read_file(
        &self,
        relative: &str,
        start_line: Option<usize>,
        end_line: Option<usize>,
    ) -> ToolResult<FileContent> {
        let started = Instant::now();
        let Some(full) = resolve_within(&self.root, relative) else {
            return ToolResult::err(
                ToolErrorCode::PathEscape,
                "file path attempts to escape repository",
                started,
            );
        };
        let meta = match tokio::fs::metadata(&full).await {
            Ok(meta) => meta,
            Err(_) => {
                return ToolResult::err(
                    ToolErrorCode::FileNotFound,
                    format!("file not found: {relative}"),
                    started,
                );
            }
        };
        if !meta.is_file() {
            return ToolResult::err(
                ToolErrorCode::NotAFile,
                format!("path is not a file: {relative}"),
                started,
            );
        }
        if meta.len() > MAX_FILE_SIZE {
            return ToolResult::err(
                ToolErrorCode::FileTooLarge,
                format!("file too large ({} bytes, max {MAX_FILE_SIZE})", meta.len()),
                started,
            );
        }
        let bytes = match tokio::fs::read(&full).await {
            Ok(bytes) => bytes,
            Err(err) => {
                return ToolResult::err(ToolErrorCode::ReadError, err.to_string(), started);
            }
        };
        let text = String::from_utf8_lossy(&bytes);
        let total_lines = text.lines().count();

        let start_idx = start_line.map_or(0, |s| s.saturating_sub(1));
        let end_idx = end_line.map_or(total_lines, |e| e.min(total_lines));
        // Full reads return the bytes untouched; only ranged reads re-slice
        // by line.
        let selected = if start_line.is_none() && end_line.is_none() {
            text.into_owned()
        } else if start_idx >= end_idx {
            String::new()
        } else {
            let lines: Vec<&str> = text.lines().collect();
            let mut joined = lines[start_idx..end_idx].join("\n");
            joined.push('\n');
            joined
        };

        ToolResult::ok(
            FileContent {
                path: relative.to_string(),
                content: selected,
                total_lines,
                start_line: start_idx + 1,
                end_line: end_idx,
                size: meta.len(),
            },
            started,
        )
    }

    /// Write a file inside the repository, creating parent directories.
    #[instrument(skip_all, fields(relative))]
    pub async fn write_file(&self, relative: &str, content: &str) -> ToolResult<WriteOutcome> {
        let started = Instant::now();
        let Some(full) = resolve_within(&self.root, relative) else {
            return ToolResult::err(
                ToolErrorCode::PathEscape,
                "file path attempts to escape repository",
                started,
            );
        };
        let created = !full.exists();
        if let Some(parent) = full.parent()
            && let Err(err) = tokio::fs::create_dir_all(parent).await
        {
            return ToolResult::err(
                ToolErrorCode::WriteError,
                format!("create directory {}: {err}", parent.display()),
                started,
            );
        }
        if let Err(err) = tokio::fs::write(&full, content).await {
            return ToolResult::err(ToolErrorCode::WriteError, err.to_string(), started);
        }
        let digest = Sha256::digest(content.as_bytes());
        let content_hash = hex::encode(digest)[..16].to_string();
        debug!(path = relative, created, "wrote file");
        ToolResult::ok(
            WriteOutcome {
                path: relative.to_string(),
                size: content.len(),
                content_hash,
                created,
            },
            started,
        )
    }

    /// Search file contents for a regex, returning up to `max_results` matches.
    ///
    /// `file_pattern` supports the `*.ext` form (suffix match) or an exact
    /// file name.
    #[instrument(skip_all, fields(query))]
    pub async fn search(
        &self,
        query: &str,
        file_pattern: Option<&str>,
        max_results: usize,
    ) -> ToolResult<Vec<SearchMatch>> {
        let started = Instant::now();
        if !self.root.is_dir() {
            return ToolResult::err(
                ToolErrorCode::InvalidPath,
                format!("repository path does not exist: {}", self.root.display()),
                started,
            );
        }
        let pattern = match Regex::new(query) {
            Ok(pattern) => pattern,
            Err(err) => {
                return ToolResult::err(
                    ToolErrorCode::SearchError,
                    format!("invalid search pattern: {err}"),
                    started,
                );
            }
        };
        let root = self.root.clone();
        let file_pattern = file_pattern.map(str::to_string);
        let result = tokio::task::spawn_blocking(move || {
            search_files(&root, &pattern, file_pattern.as_deref(), max_results)
        })
        .await;
        match result {
            Ok(matches) => ToolResult::ok(matches, started),
            Err(err) => ToolResult::err(
                ToolErrorCode::ExecutionError,
                format!("search walk failed: {err}"),
                started,
            ),
        }
    }
}

fn is_ignored(name: &str) -> bool {
    IGNORED_DIRS.contains(&name) || name.ends_with(".pyc") || name == ".DS_Store"
}

fn is_code_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| CODE_EXTENSIONS.contains(&ext))
}

fn matches_file_pattern(name: &str, pattern: &str) -> bool {
    match pattern.strip_prefix('*') {
        Some(suffix) => name.ends_with(suffix),
        None => name == pattern,
    }
}

fn build_map(root: &Path, max_depth: usize) -> RepoMap {
    let mut key_files = Vec::new();
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let children = walk_dir(root, root, 0, max_depth, &mut key_files);
    let total_files = key_files.len();
    key_files.truncate(MAX_KEY_FILES);

    let mut signatures = BTreeMap::new();
    for key_file in &key_files {
        let summary = extract_signatures(&root.join(&key_file.path));
        if !summary.is_empty() {
            signatures.insert(key_file.path.clone(), summary);
        }
    }

    RepoMap {
        tree: TreeEntry {
            name,
            path: String::new(),
            kind: EntryKind::Directory,
            size: None,
            children,
        },
        key_files,
        signatures,
        total_files,
    }
}

fn walk_dir(
    root: &Path,
    dir: &Path,
    depth: usize,
    max_depth: usize,
    key_files: &mut Vec<KeyFile>,
) -> Vec<TreeEntry> {
    if depth > max_depth {
        return Vec::new();
    }
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<PathBuf> = read_dir.filter_map(|e| e.ok().map(|e| e.path())).collect();
    names.sort();

    let mut entries = Vec::new();
    for path in names {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            continue;
        };
        if is_ignored(&name) {
            continue;
        }
        let rel = path
            .strip_prefix(root)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| name.clone());
        if path.is_dir() {
            let children = walk_dir(root, &path, depth + 1, max_depth, key_files);
            // Always surface top-level directories even when depth-pruned empty.
            if !children.is_empty() || depth < 2 {
                entries.push(TreeEntry {
                    name,
                    path: rel,
                    kind: EntryKind::Directory,
                    size: None,
                    children,
                });
            }
        } else {
            let size = path.metadata().map(|m| m.len()).unwrap_or(0);
            if is_code_file(&name) && size < MAX_FILE_SIZE {
                key_files.push(KeyFile {
                    path: rel.clone(),
                    size,
                });
            }
            entries.push(TreeEntry {
                name,
                path: rel,
                kind: EntryKind::File,
                size: Some(size),
                children: Vec::new(),
            });
        }
    }
    entries
}

static SIGNATURE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Rust
        r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?fn\s+\w+",
        r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?(?:struct|enum|trait)\s+\w+",
        // Python
        r"(?m)^\s*(?:async\s+)?def\s+\w+\s*\([^)]*\)",
        r"(?m)^\s*class\s+\w+",
        // JavaScript / TypeScript
        r"(?m)^\s*(?:export\s+)?(?:async\s+)?function\s+\w+",
        r"(?m)^\s*(?:export\s+)?class\s+\w+",
        // Go
        r"(?m)^func\s+(?:\([^)]*\)\s*)?\w+",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("signature pattern should be valid"))
    .collect()
});

/// Extract declaration-like lines from a source file.
///
/// Regex-based across languages; precision is not a goal, the summaries only
/// seed the planning prompt.
fn extract_signatures(path: &Path) -> Vec<String> {
    let Ok(bytes) = std::fs::read(path) else {
        return Vec::new();
    };
    let text = String::from_utf8_lossy(&bytes);
    let mut signatures = Vec::new();
    for pattern in SIGNATURE_PATTERNS.iter() {
        for found in pattern.find_iter(&text) {
            signatures.push(found.as_str().trim().to_string());
            if signatures.len() >= MAX_SIGNATURES_PER_FILE {
                return signatures;
            }
        }
    }
    signatures
}

fn search_files(
    root: &Path,
    pattern: &Regex,
    file_pattern: Option<&str>,
    max_results: usize,
) -> Vec<SearchMatch> {
    let mut matches = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(read_dir) = std::fs::read_dir(&dir) else {
            continue;
        };
        let mut paths: Vec<PathBuf> = read_dir.filter_map(|e| e.ok().map(|e| e.path())).collect();
        paths.sort();
        for path in paths {
            if matches.len() >= max_results {
                return matches;
            }
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
                continue;
            };
            if is_ignored(&name) {
                continue;
            }
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            if let Some(fp) = file_pattern
                && !matches_file_pattern(&name, fp)
            {
                continue;
            }
            if path.metadata().map(|m| m.len()).unwrap_or(0) > MAX_FILE_SIZE {
                continue;
            }
            let Ok(bytes) = std::fs::read(&path) else {
                continue;
            };
            let text = String::from_utf8_lossy(&bytes);
            let rel = path
                .strip_prefix(root)
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_else(|_| name.clone());
            for (idx, line) in text.lines().enumerate() {
                if pattern.is_match(line) {
                    matches.push(SearchMatch {
                        path: rel.clone(),
                        line_number: idx + 1,
                        line_text: line.trim().to_string(),
                    });
                    if matches.len() >= max_results {
                        return matches;
                    }
                }
            }
        }
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo_with(files: &[(&str, &str)]) -> (tempfile::TempDir, Repo) {
        let temp = tempfile::tempdir().expect("tempdir");
        for (rel, content) in files {
            let path = temp.path().join(rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).expect("mkdir");
            }
            std::fs::write(path, content).expect("write");
        }
        let repo = Repo::new(temp.path());
        (temp, repo)
    }

    /// Writing through the gateway then reading back yields byte-identical
    /// content and a stable content hash.
    #[tokio::test]
    async fn write_then_read_round_trips() {
        let (_temp, repo) = repo_with(&[]);
        let content = "fn main() {\n    println!(\"hi\");\n}\n";

        let write1 = repo.write_file("src/main.rs", content).await;
        assert!(write1.ok);
        let outcome1 = write1.into_data().expect("data");
        assert!(outcome1.created);

        let read = repo.read_file("src/main.rs", None, None).await;
        assert!(read.ok);
        assert_eq!(read.into_data().expect("data").content, content);

        let write2 = repo.write_file("src/main.rs", content).await;
        let outcome2 = write2.into_data().expect("data");
        assert!(!outcome2.created);
        assert_eq!(outcome1.content_hash, outcome2.content_hash);
        assert_eq!(outcome1.content_hash.len(), 16);
    }

    /// A traversal path is rejected before any I/O happens.
    #[tokio::test]
    async fn path_escape_is_rejected_without_io() {
        let (temp, repo) = repo_with(&[]);

        let read = repo.read_file("../../etc/passwd", None, None).await;
        assert_eq!(read.error_code(), Some(ToolErrorCode::PathEscape));

        let write = repo.write_file("../escaped_by_forge.txt", "nope").await;
        assert_eq!(write.error_code(), Some(ToolErrorCode::PathEscape));
        let sibling = temp
            .path()
            .parent()
            .expect("parent")
            .join("escaped_by_forge.txt");
        assert!(!sibling.exists());
    }

    #[tokio::test]
    async fn read_missing_file_reports_not_found() {
        let (_temp, repo) = repo_with(&[]);
        let read = repo.read_file("nope.rs", None, None).await;
        assert_eq!(read.error_code(), Some(ToolErrorCode::FileNotFound));
    }

    /// Full reads are byte-identical even without a trailing newline.
    #[tokio::test]
    async fn full_read_preserves_missing_trailing_newline() {
        let (_temp, repo) = repo_with(&[("raw.txt", "no newline at end")]);
        let read = repo.read_file("raw.txt", None, None).await;
        assert_eq!(read.into_data().expect("data").content, "no newline at end");
    }

    #[tokio::test]
    async fn read_with_line_range_selects_lines() {
        let (_temp, repo) = repo_with(&[("a.txt", "one\ntwo\nthree\nfour\n")]);
        let read = repo.read_file("a.txt", Some(2), Some(3)).await;
        let content = read.into_data().expect("data");
        assert_eq!(content.content, "two\nthree\n");
        assert_eq!(content.total_lines, 4);
    }

    #[tokio::test]
    async fn map_surfaces_key_files_and_signatures() {
        let (_temp, repo) = repo_with(&[
            ("src/lib.rs", "pub fn alpha() {}\npub struct Beta;\n"),
            ("README.md", "# readme\n"),
            (".git/config", "[core]\n"),
        ]);
        let map = repo.map(3).await.into_data().expect("data");
        assert_eq!(map.key_files.len(), 1);
        assert_eq!(map.key_files[0].path, "src/lib.rs");
        let sigs = map.signatures.get("src/lib.rs").expect("signatures");
        assert!(sigs.iter().any(|s| s.contains("fn alpha")));
        assert!(sigs.iter().any(|s| s.contains("struct Beta")));
        // .git contents never appear in the tree.
        assert!(map.tree.children.iter().all(|c| c.name != ".git"));
    }

    #[tokio::test]
    async fn search_finds_matches_with_pattern_filter() {
        let (_temp, repo) = repo_with(&[
            ("src/a.rs", "let needle = 1;\n"),
            ("src/b.py", "needle = 2\n"),
        ]);
        let matches = repo
            .search("needle", Some("*.rs"), 10)
            .await
            .into_data()
            .expect("data");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].path, "src/a.rs");
        assert_eq!(matches[0].line_number, 1);
    }

    #[tokio::test]
    async fn search_rejects_invalid_regex() {
        let (_temp, repo) = repo_with(&[]);
        let result = repo.search("([", None, 10).await;
        assert_eq!(result.error_code(), Some(ToolErrorCode::SearchError));
    }
}
