//! Regex keyword scan over the project tree.
//!
//! A thin wrapper over the ripgrep library crates: walk the project
//! with the same ignore rules as the indexer and collect matching
//! lines. Queries that fail to parse as a regex are retried as an
//! escaped literal.

use std::path::Path;

use grep::regex::RegexMatcher;
use grep::searcher::sinks::UTF8;
use grep::searcher::{BinaryDetection, SearcherBuilder};
use ignore::WalkBuilder;

use crate::error::CodetectResult;
use crate::symbols::scan::IGNORED_DIRS;
use crate::types::KeywordHit;

/// Scan `repo_root` for lines matching `query`, stopping after
/// `limit` hits.
pub fn scan(repo_root: &Path, query: &str, limit: usize) -> CodetectResult<Vec<KeywordHit>> {
    if limit == 0 || query.is_empty() {
        return Ok(Vec::new());
    }

    let matcher = match RegexMatcher::new(query) {
        Ok(m) => m,
        Err(_) => {
            let escaped = escape_regex(query);
            RegexMatcher::new(&escaped)
                .map_err(|e| crate::error::CodetectError::Internal(format!(
                    "keyword matcher build failed: {e}"
                )))?
        }
    };

    let mut searcher = SearcherBuilder::new()
        .binary_detection(BinaryDetection::quit(b'\x00'))
        .line_number(true)
        .build();

    let walker = WalkBuilder::new(repo_root)
        .follow_links(false)
        .filter_entry(|entry| {
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            if !is_dir {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            !IGNORED_DIRS.contains(&name.as_ref())
        })
        .build();

    let mut hits = Vec::new();
    for entry in walker {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(repo_root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");

        let remaining = limit - hits.len();
        let mut file_hits = Vec::new();
        let result = searcher.search_path(
            &matcher,
            entry.path(),
            UTF8(|line_number, line| {
                file_hits.push(KeywordHit {
                    path: relative.clone(),
                    line: line_number as u32,
                    snippet: line.trim_end().to_string(),
                });
                Ok(file_hits.len() < remaining)
            }),
        );
        if let Err(e) = result {
            tracing::debug!(path = %relative, error = %e, "keyword scan skipped file");
            continue;
        }

        hits.append(&mut file_hits);
        if hits.len() >= limit {
            break;
        }
    }

    Ok(hits)
}

/// Escape regex metacharacters so a query can match literally.
fn escape_regex(query: &str) -> String {
    let mut out = String::with_capacity(query.len() * 2);
    for ch in query.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == ' ' {
            out.push(ch);
        } else {
            out.push('\\');
            out.push(ch);
        }
    }
    out
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
    fn test_scan_finds_matching_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "a.rs", "fn validate_token() {}\nfn other() {}\n");
        write(dir.path(), "b.rs", "// validate_token is called here\n");

        let mut hits = scan(dir.path(), "validate_token", 10).expect("scan");
        hits.sort_by(|a, b| a.path.cmp(&b.path));
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].path, "a.rs");
        assert_eq!(hits[0].line, 1);
        assert!(hits[0].snippet.contains("validate_token"));
    }

    #[test]
    fn test_scan_respects_limit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let many = "match_me\n".repeat(50);
        write(dir.path(), "a.rs", &many);

        let hits = scan(dir.path(), "match_me", 5).expect("scan");
        assert_eq!(hits.len(), 5);
    }

    #[test]
    fn test_scan_skips_ignored_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "src/a.rs", "needle\n");
        write(dir.path(), "node_modules/b.js", "needle\n");

        let hits = scan(dir.path(), "needle", 10).expect("scan");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "src/a.rs");
    }

    #[test]
    fn test_scan_supports_regex_queries() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "a.rs", "fn handle_get() {}\nfn handle_post() {}\n");

        let hits = scan(dir.path(), r"handle_(get|post)", 10).expect("scan");
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_invalid_regex_falls_back_to_literal() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "a.rs", "let x = vec[(1]; // weird\n");

        let hits = scan(dir.path(), "vec[(1]", 10).expect("scan");
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_empty_query_returns_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "a.rs", "anything\n");
        assert!(scan(dir.path(), "", 10).expect("scan").is_empty());
    }
}
