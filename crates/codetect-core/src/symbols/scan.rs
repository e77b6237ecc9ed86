//! Project file discovery.
//!
//! Walks the repository root, honouring the project's own ignore rules
//! (`.gitignore` and friends) plus a fixed directory blacklist, and
//! keeps only files whose extension maps to a known language.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use ignore::WalkBuilder;

use crate::error::CodetectResult;
use crate::types::Language;

/// Directories that are never descended into, on top of the project's
/// ignore rules. Hidden dot-directories are excluded by the walker
/// itself.
pub const IGNORED_DIRS: [&str; 8] = [
    ".git",
    "node_modules",
    "vendor",
    ".codetect",
    "dist",
    "build",
    "target",
    "__pycache__",
];

/// One candidate file produced by the walk.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    /// Path relative to the repository root, `/`-separated.
    pub path: String,
    /// Absolute path on disk.
    pub abs_path: PathBuf,
    /// Language detected from the extension.
    pub language: Language,
    /// Modification time in nanoseconds since the epoch.
    pub mtime_ns: i64,
    /// Size in bytes.
    pub size: i64,
}

/// Walk the project root and return all indexable files.
///
/// A transient error from the walker aborts the whole scan; the next
/// scheduled pass retries.
pub fn scan_project(repo_root: &Path) -> CodetectResult<Vec<ScannedFile>> {
    let walker = WalkBuilder::new(repo_root)
        .follow_links(false)
        .filter_entry(|entry| {
            // The root itself is exempt; a repo may be named `build`.
            if entry.depth() == 0 {
                return true;
            }
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            if !is_dir {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            !IGNORED_DIRS.contains(&name.as_ref())
        })
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }

        let language = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map(Language::from_extension)
            .unwrap_or(Language::Unknown);
        if language == Language::Unknown {
            continue;
        }

        let metadata = entry.metadata().map_err(|e| std::io::Error::other(e.to_string()))?;
        let mtime_ns = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos().min(i64::MAX as u128) as i64)
            .unwrap_or(0);

        let relative = entry
            .path()
            .strip_prefix(repo_root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");

        files.push(ScannedFile {
            path: relative,
            abs_path: entry.path().to_path_buf(),
            language,
            mtime_ns,
            size: metadata.len() as i64,
        });
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("mkdir");
        }
        std::fs::write(path, content).expect("write");
    }

    #[test]
    fn test_scan_finds_known_languages_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "main.rs", "fn main() {}");
        write(dir.path(), "lib.py", "def f(): pass");
        write(dir.path(), "notes.txt", "not code");
        write(dir.path(), "data.bin", "xx");

        let files = scan_project(dir.path()).expect("scan");
        let mut paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        paths.sort_unstable();
        assert_eq!(paths, vec!["lib.py", "main.rs"]);
    }

    #[test]
    fn test_scan_skips_ignored_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "src/ok.rs", "fn ok() {}");
        write(dir.path(), "node_modules/dep/index.js", "x");
        write(dir.path(), "target/debug/gen.rs", "x");
        write(dir.path(), ".codetect/cache.rs", "x");

        let files = scan_project(dir.path()).expect("scan");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "src/ok.rs");
    }

    #[test]
    fn test_scan_skips_hidden_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "visible.rs", "fn v() {}");
        write(dir.path(), ".hidden/secret.rs", "fn s() {}");

        let files = scan_project(dir.path()).expect("scan");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "visible.rs");
    }

    #[test]
    fn test_scan_records_size_and_mtime() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "a.go", "package main\n");

        let files = scan_project(dir.path()).expect("scan");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size, "package main\n".len() as i64);
        assert!(files[0].mtime_ns > 0);
        assert_eq!(files[0].language, Language::Go);
    }
}
