//! Multi-repo isolation over one shared database.
//!
//! Two repositories with identical relative paths and contents index
//! into the same database handle, the deployment shape of the
//! networked engine. Every operation must stay scoped to its
//! `repo_root`: equal stats on both sides, and no query ever returning
//! the other repo's rows.

use std::path::Path;
use std::sync::Arc;

use codetect_core::config::Config;
use codetect_core::embedder::{Embedder, NullEmbedder};
use codetect_core::storage::Database;
use codetect_core::symbols::extract::TreeSitterExtractor;
use codetect_core::Engine;

const SHARED_SOURCE: &str = "package m\n\nfunc hello() {\n\tx := 1\n\ty := x + 1\n\t_ = y\n}\n";

async fn engine_on(db: Arc<Database>, repo: &Path, embedder: Arc<dyn Embedder>) -> Engine {
    let mut config = Config::defaults(repo);
    config.embedding.workers = 1;
    Engine::with_components(config, db, embedder, Box::new(TreeSitterExtractor::new()))
        .await
        .expect("engine")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_identical_repos_stay_isolated() {
    let state = tempfile::tempdir().expect("state");
    let r1 = tempfile::tempdir().expect("r1");
    let r2 = tempfile::tempdir().expect("r2");
    std::fs::write(r1.path().join("main.go"), SHARED_SOURCE).expect("write r1");
    std::fs::write(r2.path().join("main.go"), SHARED_SOURCE).expect("write r2");

    let db = Arc::new(Database::open_sqlite(&state.path().join("shared.db")).expect("db"));
    let embedder: Arc<dyn Embedder> = Arc::new(NullEmbedder::new(8));

    let engine1 = engine_on(db.clone(), r1.path(), embedder.clone()).await;
    let engine2 = engine_on(db.clone(), r2.path(), embedder.clone()).await;

    engine1.index().await.expect("index r1");
    engine2.index().await.expect("index r2");

    // Identical content yields identical per-repo stats.
    let stats1 = engine1.stats().await.expect("stats r1");
    let stats2 = engine2.stats().await.expect("stats r2");
    assert_eq!(stats1, stats2);
    assert_eq!(stats1.file_count, 1);
    assert!(stats1.symbol_count >= 1, "func hello must be extracted");

    // A lookup scoped to r1 returns exactly r1's row.
    let hits = engine1.find_symbol("hello", None, 10).await.expect("find");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].repo_root, engine1.repo_key());

    let hits = engine2.find_symbol("hello", None, 10).await.expect("find");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].repo_root, engine2.repo_key());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reindexing_one_repo_leaves_the_other_untouched() {
    let state = tempfile::tempdir().expect("state");
    let r1 = tempfile::tempdir().expect("r1");
    let r2 = tempfile::tempdir().expect("r2");
    std::fs::write(r1.path().join("main.go"), SHARED_SOURCE).expect("write r1");
    std::fs::write(r2.path().join("main.go"), SHARED_SOURCE).expect("write r2");

    let db = Arc::new(Database::open_sqlite(&state.path().join("shared.db")).expect("db"));
    let embedder: Arc<dyn Embedder> = Arc::new(NullEmbedder::new(8));

    let engine1 = engine_on(db.clone(), r1.path(), embedder.clone()).await;
    let engine2 = engine_on(db.clone(), r2.path(), embedder.clone()).await;
    engine1.index().await.expect("index r1");
    engine2.index().await.expect("index r2");

    // r1 shrinks to nothing; r2 must not move.
    std::fs::remove_file(r1.path().join("main.go")).expect("rm");
    engine1.index().await.expect("reindex r1");

    let stats1 = engine1.stats().await.expect("stats r1");
    let stats2 = engine2.stats().await.expect("stats r2");
    assert_eq!(stats1.file_count, 0);
    assert_eq!(stats1.symbol_count, 0);
    assert_eq!(stats2.file_count, 1);
    assert!(stats2.symbol_count >= 1);

    // Full reindex of r2 is likewise invisible to r1.
    engine2.full_reindex().await.expect("full reindex r2");
    assert_eq!(engine1.stats().await.expect("stats r1").file_count, 0);
    assert_eq!(engine2.stats().await.expect("stats r2").file_count, 1);
}
