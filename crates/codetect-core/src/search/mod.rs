//! Semantic search over stored embeddings.
//!
//! The searcher embeds the query, asks the embedding store for
//! candidates (2x the requested limit, to survive deduplication),
//! drops non-positive scores, and attaches snippets through an
//! injected callback. When the embedder is off or unreachable the
//! response is `{available: false}` -- never an error across the tool
//! boundary.

pub mod keyword;

use std::collections::HashSet;
use std::sync::Arc;

use crate::embedder::Embedder;
use crate::embeddings::EmbeddingStore;
use crate::error::{CodetectError, CodetectResult};
use crate::types::{SemanticHit, SemanticSearchResponse};

/// Maximum snippet length in bytes before newline truncation applies.
pub const SNIPPET_MAX_CHARS: usize = 500;

/// Injected code-excerpt provider: `(path, start_line, end_line)` to
/// raw snippet text.
pub type SnippetFn = dyn Fn(&str, u32, u32) -> Option<String> + Send + Sync;

/// Query-time semantic searcher.
pub struct SemanticSearcher {
    embedder: Arc<dyn Embedder>,
    store: Arc<EmbeddingStore>,
}

impl SemanticSearcher {
    /// Build a searcher over the given provider and store.
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<EmbeddingStore>) -> Self {
        Self { embedder, store }
    }

    /// Search the given repos for chunks similar to `query`.
    pub async fn search(
        &self,
        repo_roots: &[String],
        query: &str,
        limit: usize,
        snippet: &SnippetFn,
    ) -> CodetectResult<SemanticSearchResponse> {
        if !self.embedder.is_available() || limit == 0 {
            return Ok(SemanticSearchResponse {
                available: self.embedder.is_available(),
                results: Vec::new(),
            });
        }

        let query_vector = match self.embedder.embed(&[query.to_string()]).await {
            Ok(mut vectors) if !vectors.is_empty() => vectors.remove(0),
            Ok(_) => {
                return Ok(SemanticSearchResponse {
                    available: false,
                    results: Vec::new(),
                });
            }
            // A configured-but-unreachable provider degrades the tool,
            // it does not error across the protocol boundary.
            Err(CodetectError::EmbedderUnavailable { reason }) => {
                tracing::debug!(reason = %reason, "semantic search unavailable");
                return Ok(SemanticSearchResponse {
                    available: false,
                    results: Vec::new(),
                });
            }
            Err(CodetectError::Http(e)) => {
                tracing::warn!(error = %e, "embedding provider unreachable");
                return Ok(SemanticSearchResponse {
                    available: false,
                    results: Vec::new(),
                });
            }
            Err(e) => return Err(e),
        };

        // Over-fetch to allow for deduplication of overlapping rows.
        let candidates = self
            .store
            .knn(repo_roots, &query_vector, limit * 2)
            .await?;

        let mut seen: HashSet<(String, u32, u32)> = HashSet::new();
        let mut results = Vec::with_capacity(limit);
        for (record, score) in candidates {
            if score <= 0.0 {
                continue;
            }
            if !seen.insert((record.path.clone(), record.start_line, record.end_line)) {
                continue;
            }
            let raw = snippet(&record.path, record.start_line, record.end_line)
                .unwrap_or_default();
            results.push(SemanticHit {
                path: record.path,
                start_line: record.start_line,
                end_line: record.end_line,
                score,
                snippet: truncate_snippet(&raw),
            });
            if results.len() >= limit {
                break;
            }
        }

        Ok(SemanticSearchResponse {
            available: true,
            results,
        })
    }
}

/// Truncate a snippet at the last newline at or before
/// [`SNIPPET_MAX_CHARS`], appending `"..."`.
///
/// Short snippets pass through unchanged; a snippet with no usable
/// newline is cut at the limit itself.
pub fn truncate_snippet(text: &str) -> String {
    if text.len() <= SNIPPET_MAX_CHARS {
        return text.to_string();
    }
    let mut cut = SNIPPET_MAX_CHARS;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let head = &text[..cut];
    let truncated = match head.rfind('\n') {
        Some(idx) if idx > 0 => &head[..idx],
        _ => head,
    };
    format!("{truncated}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::{NullEmbedder, StaticEmbedder};
    use crate::storage::Database;
    use crate::types::Chunk;

    fn chunk(path: &str, start: u32, end: u32, content: &str) -> Chunk {
        Chunk {
            path: path.into(),
            start_line: start,
            end_line: end,
            content: content.into(),
            kind: "function".into(),
        }
    }

    fn no_snippet() -> Box<SnippetFn> {
        Box::new(|_, _, _| None)
    }

    async fn store_with(
        dir: &tempfile::TempDir,
        embedder: &dyn Embedder,
        texts: &[(&str, &str)],
    ) -> Arc<EmbeddingStore> {
        let db = Database::open_sqlite(&dir.path().join("e.db")).expect("db");
        let store = Arc::new(EmbeddingStore::open(Arc::new(db)).await.expect("store"));
        let mut items = Vec::new();
        for (i, (path, text)) in texts.iter().enumerate() {
            let vector = embedder
                .embed(&[(*text).to_string()])
                .await
                .expect("embed")
                .remove(0);
            items.push((chunk(path, (i as u32) * 10 + 1, (i as u32) * 10 + 9, text), vector));
        }
        store
            .save_batch("/repo", &items, &embedder.provider_id())
            .await
            .expect("save");
        store
    }

    #[tokio::test]
    async fn test_unavailable_embedder_reports_not_available() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::open_sqlite(&dir.path().join("e.db")).expect("db");
        let store = Arc::new(EmbeddingStore::open(Arc::new(db)).await.expect("store"));
        let searcher = SemanticSearcher::new(Arc::new(NullEmbedder::new(8)), store);

        let response = searcher
            .search(&["/repo".to_string()], "anything", 5, &no_snippet())
            .await
            .expect("search");
        assert!(!response.available);
        assert!(response.results.is_empty());
    }

    #[tokio::test]
    async fn test_search_ranks_similar_chunks_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        let embedder = StaticEmbedder::new(64);
        let store = store_with(
            &dir,
            &embedder,
            &[
                ("auth.rs", "validate auth token expiry"),
                ("render.rs", "render html template page"),
            ],
        )
        .await;

        let searcher = SemanticSearcher::new(Arc::new(StaticEmbedder::new(64)), store);
        let response = searcher
            .search(&["/repo".to_string()], "validate auth token", 5, &no_snippet())
            .await
            .expect("search");

        assert!(response.available);
        assert!(!response.results.is_empty());
        assert_eq!(response.results[0].path, "auth.rs");
        for pair in response.results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_search_respects_limit_and_dedups() {
        let dir = tempfile::tempdir().expect("tempdir");
        let embedder = StaticEmbedder::new(64);
        let store = store_with(
            &dir,
            &embedder,
            &[
                ("a.rs", "token parser one"),
                ("b.rs", "token parser two"),
                ("c.rs", "token parser three"),
            ],
        )
        .await;

        let searcher = SemanticSearcher::new(Arc::new(StaticEmbedder::new(64)), store);
        let response = searcher
            .search(&["/repo".to_string()], "token parser", 2, &no_snippet())
            .await
            .expect("search");
        assert!(response.results.len() <= 2);

        let mut keys: Vec<_> = response
            .results
            .iter()
            .map(|r| (r.path.clone(), r.start_line, r.end_line))
            .collect();
        keys.dedup();
        assert_eq!(keys.len(), response.results.len());
    }

    #[tokio::test]
    async fn test_snippet_is_attached_and_truncated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let embedder = StaticEmbedder::new(64);
        let store = store_with(&dir, &embedder, &[("a.rs", "needle in haystack")]).await;

        let long_snippet: String = (0..100)
            .map(|i| format!("line number {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let snippet_fn: Box<SnippetFn> = Box::new(move |_, _, _| Some(long_snippet.clone()));

        let searcher = SemanticSearcher::new(Arc::new(StaticEmbedder::new(64)), store);
        let response = searcher
            .search(&["/repo".to_string()], "needle in haystack", 5, &snippet_fn)
            .await
            .expect("search");

        let hit = &response.results[0];
        assert!(hit.snippet.ends_with("..."));
        assert!(hit.snippet.len() <= SNIPPET_MAX_CHARS + 3);
    }

    #[test]
    fn test_truncate_snippet_short_passthrough() {
        assert_eq!(truncate_snippet("short"), "short");
    }

    #[test]
    fn test_truncate_snippet_cuts_at_last_newline_before_limit() {
        // 2000 characters of 10-char lines; the last newline at or
        // before 500 is at byte 494.
        let text: String = (0..200)
            .map(|i| format!("l{i:07}x"))
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(text.len(), 200 * 9 + 199);

        let result = truncate_snippet(&text);
        assert!(result.ends_with("..."));
        let body = &result[..result.len() - 3];
        assert!(body.len() <= SNIPPET_MAX_CHARS);
        assert!(!body.ends_with('\n'));
        // The cut lands exactly on a line boundary.
        assert!(text.as_bytes()[body.len()] == b'\n');
    }

    #[test]
    fn test_truncate_snippet_without_newline_cuts_at_limit() {
        let text = "x".repeat(2000);
        let result = truncate_snippet(&text);
        assert_eq!(result.len(), SNIPPET_MAX_CHARS + 3);
    }
}
