//! Project file discovery.
//!
//! Walks a project root and returns the files worth indexing. Excluded
//! directory names are pruned anywhere in the tree (their contents are
//! never visited); files are skipped by extension, size, extra exclude
//! globs, or a NUL byte in their first 8 KiB. Results are sorted by their
//! `/`-separated path relative to the root.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use project_context_core::models::{IndexStage, IndexingError};

use crate::config::IndexingConfig;

const SNIFF_BYTES: usize = 8 * 1024;

/// A file selected for indexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    /// Relative to the project root, `/`-separated.
    pub relative_path: String,
    pub size: u64,
}

/// Outcome of a discovery walk.
#[derive(Debug, Default)]
pub struct Discovery {
    pub files: Vec<DiscoveredFile>,
    /// Entries that could not be inspected (permissions, broken links).
    pub errors: Vec<IndexingError>,
    /// Files passed over by a filter.
    pub skipped: usize,
}

/// Compiled discovery filters.
pub struct DiscoveryFilter {
    exclude_dirs: Vec<String>,
    binary_extensions: Vec<String>,
    exclude_set: GlobSet,
    max_file_bytes: u64,
    follow_symlinks: bool,
}

impl DiscoveryFilter {
    pub fn from_config(config: &IndexingConfig) -> Result<Self> {
        Ok(Self {
            exclude_dirs: config.exclude_dirs.clone(),
            binary_extensions: config
                .binary_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            exclude_set: build_globset(&config.exclude_globs)?,
            max_file_bytes: config.max_file_bytes,
            follow_symlinks: config.follow_symlinks,
        })
    }

    fn is_excluded_dir(&self, entry: &DirEntry) -> bool {
        entry.depth() > 0
            && entry.file_type().is_dir()
            && self
                .exclude_dirs
                .iter()
                .any(|d| entry.file_name().to_string_lossy() == d.as_str())
    }

    fn has_binary_extension(&self, path: &Path) -> bool {
        path.extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .is_some_and(|ext| self.binary_extensions.iter().any(|b| *b == ext))
    }
}

/// Walk `root` and collect indexable files.
pub fn discover(root: &Path, filter: &DiscoveryFilter) -> Discovery {
    let mut discovery = Discovery::default();

    let walker = WalkDir::new(root)
        .follow_links(filter.follow_symlinks)
        .into_iter()
        .filter_entry(|e| !filter.is_excluded_dir(e));

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                let file_path = e
                    .path()
                    .map(|p| relative_path(root, p))
                    .unwrap_or_default();
                discovery.errors.push(IndexingError {
                    file_path,
                    stage: IndexStage::Discover,
                    message: e.to_string(),
                });
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let rel = relative_path(root, path);

        if filter.exclude_set.is_match(&rel) || filter.has_binary_extension(path) {
            discovery.skipped += 1;
            continue;
        }

        let size = match entry.metadata() {
            Ok(m) => m.len(),
            Err(e) => {
                discovery.errors.push(IndexingError {
                    file_path: rel,
                    stage: IndexStage::Discover,
                    message: e.to_string(),
                });
                continue;
            }
        };
        if size > filter.max_file_bytes {
            debug!(file = %rel, size, "skipping oversized file");
            discovery.skipped += 1;
            continue;
        }
        if looks_binary(path) {
            debug!(file = %rel, "skipping binary file");
            discovery.skipped += 1;
            continue;
        }

        discovery.files.push(DiscoveredFile {
            path: path.to_path_buf(),
            relative_path: rel,
            size,
        });
    }

    // Sort for deterministic ordering
    discovery
        .files
        .sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    discovery
}

/// `/`-separated path of `path` relative to `root`.
fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// NUL byte in the first 8 KiB. Unreadable files are left to the chunk
/// stage, which records the read failure.
fn looks_binary(path: &Path) -> bool {
    let mut buf = [0u8; SNIFF_BYTES];
    let Ok(mut file) = std::fs::File::open(path) else {
        return false;
    };
    match file.read(&mut buf) {
        Ok(n) => buf[..n].contains(&0),
        Err(_) => false,
    }
}

/// Language label for a file, from its extension.
///
/// Used for logging and capability tuning only; chunking ignores it.
pub fn content_type_hint(path: &str) -> &'static str {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    match file_name {
        "Dockerfile" => return "dockerfile",
        "Makefile" => return "makefile",
        _ => {}
    }
    let ext = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_lowercase(),
        _ => return "text",
    };
    match ext.as_str() {
        "rs" => "rust",
        "ts" | "tsx" | "mts" | "cts" => "typescript",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "py" | "pyi" => "python",
        "go" => "go",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "rb" => "ruby",
        "php" => "php",
        "cs" => "csharp",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" | "hh" => "cpp",
        "swift" => "swift",
        "scala" => "scala",
        "sh" | "bash" | "zsh" => "shell",
        "sql" => "sql",
        "html" | "htm" => "html",
        "css" | "scss" | "sass" | "less" => "css",
        "vue" => "vue",
        "svelte" => "svelte",
        "md" | "mdx" | "markdown" => "markdown",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "xml" => "xml",
        _ => "text",
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
