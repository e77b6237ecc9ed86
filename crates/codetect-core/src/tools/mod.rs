//! Tool facades consumed by the external dispatcher.
//!
//! Thin adapters over the engine: semantic search passes through, and
//! hybrid search fuses the keyword scan, symbol lookup, and semantic
//! results. Facades never error across the protocol boundary for a
//! disabled component; they report `available: false` instead.
//!
//! ## Hybrid fusion
//!
//! Each source's scores are normalised to `[0, 1]` by its maximum,
//! then weighted (keyword 0.4, symbol 0.3, semantic 0.3). Results on
//! the same path with overlapping line ranges merge: the union of
//! sources, the summed weighted score, and the widened range.

use std::sync::Arc;

use crate::error::CodetectResult;
use crate::pipeline::Engine;
use crate::types::{HybridHit, SemanticSearchResponse};

/// Weight of the keyword source in hybrid fusion.
pub const WEIGHT_KEYWORD: f32 = 0.4;
/// Weight of the symbol source in hybrid fusion.
pub const WEIGHT_SYMBOL: f32 = 0.3;
/// Weight of the semantic source in hybrid fusion.
pub const WEIGHT_SEMANTIC: f32 = 0.3;

/// Facade over one engine's search operations.
pub struct SemanticTools {
    engine: Arc<Engine>,
}

/// One pre-fusion candidate from a single source.
struct Candidate {
    path: String,
    line_start: u32,
    line_end: u32,
    snippet: String,
    score: f32,
    source: &'static str,
}

impl SemanticTools {
    /// Build the facade.
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    /// Semantic search: `{available, results[]}`.
    pub async fn search_semantic(
        &self,
        query: &str,
        top_k: usize,
    ) -> CodetectResult<SemanticSearchResponse> {
        self.engine.search_semantic(query, top_k).await
    }

    /// Hybrid search across the keyword, symbol, and semantic sources.
    pub async fn hybrid_search(
        &self,
        query: &str,
        top_k: usize,
    ) -> CodetectResult<Vec<HybridHit>> {
        let fetch = top_k.max(1) * 2;
        let mut candidates: Vec<Candidate> = Vec::new();

        // Keyword scan: every line hit scores 1.0 pre-normalisation.
        match self.engine.search_keyword(query, fetch) {
            Ok(hits) => {
                for hit in hits {
                    candidates.push(Candidate {
                        path: hit.path,
                        line_start: hit.line,
                        line_end: hit.line,
                        snippet: hit.snippet,
                        score: WEIGHT_KEYWORD,
                        source: "keyword",
                    });
                }
            }
            Err(e) => tracing::warn!(error = %e, "keyword source failed, fusing without it"),
        }

        // Symbol lookup: tiered by match quality, normalised by the
        // best tier present.
        match self.engine.find_symbol(query, None, fetch).await {
            Ok(symbols) => {
                let raw: Vec<f32> = symbols
                    .iter()
                    .map(|s| {
                        if s.name == query {
                            1.0
                        } else if s.name.starts_with(query) {
                            0.66
                        } else {
                            0.33
                        }
                    })
                    .collect();
                let max = raw.iter().cloned().fold(0.0f32, f32::max).max(f32::EPSILON);
                for (symbol, raw_score) in symbols.into_iter().zip(raw) {
                    candidates.push(Candidate {
                        snippet: symbol.pattern.unwrap_or_else(|| symbol.name.clone()),
                        path: symbol.path,
                        line_start: symbol.line,
                        line_end: symbol.line,
                        score: WEIGHT_SYMBOL * (raw_score / max),
                        source: "symbol",
                    });
                }
            }
            Err(e) => tracing::warn!(error = %e, "symbol source failed, fusing without it"),
        }

        // Semantic search: cosine scores normalised by the best hit.
        let semantic = self.engine.search_semantic(query, fetch).await?;
        if semantic.available {
            let max = semantic
                .results
                .iter()
                .map(|r| r.score)
                .fold(0.0f32, f32::max)
                .max(f32::EPSILON);
            for hit in semantic.results {
                candidates.push(Candidate {
                    path: hit.path,
                    line_start: hit.start_line,
                    line_end: hit.end_line,
                    snippet: hit.snippet,
                    score: WEIGHT_SEMANTIC * (hit.score / max),
                    source: "semantic",
                });
            }
        }

        Ok(fuse(candidates, top_k))
    }
}

/// Merge candidates on the same path with overlapping line ranges.
fn fuse(mut candidates: Vec<Candidate>, top_k: usize) -> Vec<HybridHit> {
    // Fold best-first so the strongest hit anchors each merged range.
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut fused: Vec<HybridHit> = Vec::new();
    for candidate in candidates {
        let existing = fused.iter_mut().find(|hit| {
            hit.path == candidate.path
                && ranges_overlap(
                    (hit.line_start, hit.line_end),
                    (candidate.line_start, candidate.line_end),
                )
        });
        match existing {
            Some(hit) => {
                hit.score += candidate.score;
                hit.line_start = hit.line_start.min(candidate.line_start);
                hit.line_end = hit.line_end.max(candidate.line_end);
                if !hit.sources.iter().any(|s| s == candidate.source) {
                    hit.sources.push(candidate.source.to_string());
                }
                if hit.snippet.is_empty() {
                    hit.snippet = candidate.snippet;
                }
            }
            None => {
                fused.push(HybridHit {
                    path: candidate.path,
                    line_start: candidate.line_start,
                    line_end: candidate.line_end,
                    snippet: candidate.snippet,
                    score: candidate.score,
                    sources: vec![candidate.source.to_string()],
                });
            }
        }
    }

    fused.sort_by(|a, b| b.score.total_cmp(&a.score));
    fused.truncate(top_k);
    fused
}

fn ranges_overlap(a: (u32, u32), b: (u32, u32)) -> bool {
    a.0 <= b.1 && b.0 <= a.1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::embedder::StaticEmbedder;
    use crate::storage::Database;
    use crate::symbols::extract::TreeSitterExtractor;
    use std::path::Path;

    fn candidate(
        path: &str,
        start: u32,
        end: u32,
        score: f32,
        source: &'static str,
    ) -> Candidate {
        Candidate {
            path: path.into(),
            line_start: start,
            line_end: end,
            snippet: format!("{source} snippet"),
            score,
            source,
        }
    }

    #[test]
    fn test_ranges_overlap() {
        assert!(ranges_overlap((1, 10), (10, 20)));
        assert!(ranges_overlap((5, 8), (1, 20)));
        assert!(!ranges_overlap((1, 9), (10, 20)));
    }

    #[test]
    fn test_fuse_merges_overlapping_ranges_on_same_path() {
        let fused = fuse(
            vec![
                candidate("a.rs", 1, 20, 0.3, "semantic"),
                candidate("a.rs", 5, 5, 0.4, "keyword"),
                candidate("b.rs", 5, 5, 0.4, "keyword"),
            ],
            10,
        );
        assert_eq!(fused.len(), 2);

        let merged = fused.iter().find(|h| h.path == "a.rs").expect("merged");
        assert!((merged.score - 0.7).abs() < 1e-6);
        assert_eq!(merged.line_start, 1);
        assert_eq!(merged.line_end, 20);
        let mut sources = merged.sources.clone();
        sources.sort();
        assert_eq!(sources, vec!["keyword", "semantic"]);
    }

    #[test]
    fn test_fuse_keeps_disjoint_ranges_apart() {
        let fused = fuse(
            vec![
                candidate("a.rs", 1, 9, 0.4, "keyword"),
                candidate("a.rs", 10, 20, 0.3, "semantic"),
            ],
            10,
        );
        assert_eq!(fused.len(), 2);
    }

    #[test]
    fn test_fuse_sorts_and_truncates() {
        let fused = fuse(
            vec![
                candidate("a.rs", 1, 1, 0.1, "keyword"),
                candidate("b.rs", 1, 1, 0.9, "keyword"),
                candidate("c.rs", 1, 1, 0.5, "keyword"),
            ],
            2,
        );
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].path, "b.rs");
        assert_eq!(fused[1].path, "c.rs");
    }

    #[test]
    fn test_fuse_does_not_duplicate_sources() {
        let fused = fuse(
            vec![
                candidate("a.rs", 1, 1, 0.4, "keyword"),
                candidate("a.rs", 1, 1, 0.4, "keyword"),
            ],
            10,
        );
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].sources, vec!["keyword"]);
    }

    async fn tools_over_repo(repo: &Path, state: &Path) -> SemanticTools {
        let mut config = Config::defaults(repo);
        config.database.path = Some(state.join("symbols.db"));
        let db = Arc::new(Database::open_sqlite(&state.join("symbols.db")).expect("db"));
        let engine = Engine::with_components(
            config,
            db,
            Arc::new(StaticEmbedder::new(32)),
            Box::new(TreeSitterExtractor::new()),
        )
        .await
        .expect("engine");
        let engine = Arc::new(engine);
        engine.index().await.expect("index");
        SemanticTools::new(engine)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_hybrid_search_combines_sources() {
        let repo = tempfile::tempdir().expect("repo");
        let state = tempfile::tempdir().expect("state");
        std::fs::write(
            repo.path().join("auth.rs"),
            "pub fn validate_token(token: &str) -> bool {\n    let trimmed = token.trim();\n    let ok = !trimmed.is_empty();\n    let fresh = trimmed.len() > 8;\n    ok && fresh\n}\n",
        )
        .expect("write");

        let tools = tools_over_repo(repo.path(), state.path()).await;
        let hits = tools.hybrid_search("validate_token", 5).await.expect("hybrid");

        assert!(!hits.is_empty());
        let top = &hits[0];
        assert_eq!(top.path, "auth.rs");
        assert!(top.sources.len() >= 2, "expected multi-source hit: {top:?}");
        assert!(!top.snippet.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_hybrid_search_respects_top_k() {
        let repo = tempfile::tempdir().expect("repo");
        let state = tempfile::tempdir().expect("state");
        for i in 0..5 {
            std::fs::write(
                repo.path().join(format!("f{i}.rs")),
                format!("pub fn handler_{i}() {{\n    let a = {i};\n    let b = a + 1;\n    let c = b + 2;\n    drop(c);\n}}\n"),
            )
            .expect("write");
        }

        let tools = tools_over_repo(repo.path(), state.path()).await;
        let hits = tools.hybrid_search("handler", 3).await.expect("hybrid");
        assert!(hits.len() <= 3);
    }
}
