//! Tag-generator extraction backend.
//!
//! Spawns Universal Ctags in JSON output mode over the file list and
//! parses one tag record per stdout line. The generator only reads
//! the files; nothing is executed.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;

use super::SymbolExtractor;
use crate::error::CodetectResult;
use crate::symbols::scan::ScannedFile;
use crate::types::Symbol;

/// Files per generator invocation; keeps argv well under platform
/// limits while still amortising process startup.
const BATCH_SIZE: usize = 200;

/// Extractor that shells out to a ctags binary.
pub struct CtagsExtractor {
    binary: String,
}

impl CtagsExtractor {
    /// Probe for a usable ctags binary on PATH.
    pub fn detect() -> Option<Self> {
        Self::with_binary("ctags")
    }

    /// Probe a specific binary.
    pub fn with_binary(binary: &str) -> Option<Self> {
        let works = std::process::Command::new(binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false);
        works.then(|| Self {
            binary: binary.to_string(),
        })
    }

    /// The binary this extractor spawns.
    pub fn binary(&self) -> &str {
        &self.binary
    }

    async fn run_batch(
        &self,
        repo_root: &Path,
        files: &[ScannedFile],
        out: &mut HashMap<String, Vec<Symbol>>,
    ) -> CodetectResult<()> {
        let output = Command::new(&self.binary)
            .arg("--output-format=json")
            .arg("--fields=+nKlzZsS")
            .arg("-f")
            .arg("-")
            .args(files.iter().map(|f| f.path.as_str()))
            .current_dir(repo_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        let repo_key = repo_root.to_string_lossy().to_string();
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            let Ok(record) = serde_json::from_str::<TagRecord>(line) else {
                continue;
            };
            if record.record_type != "tag" {
                continue;
            }
            let Some(line_no) = record.line else {
                continue;
            };
            let path = record.path.replace('\\', "/");
            out.entry(path.clone()).or_default().push(Symbol {
                repo_root: repo_key.clone(),
                name: record.name,
                kind: record
                    .kind
                    .map(|k| k.to_lowercase())
                    .unwrap_or_else(|| "unknown".into()),
                path,
                line: line_no,
                language: record.language.map(|l| l.to_lowercase()),
                pattern: record.pattern,
                scope: record.scope,
                signature: record.signature,
            });
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl SymbolExtractor for CtagsExtractor {
    fn name(&self) -> &'static str {
        "ctags"
    }

    async fn extract(
        &self,
        repo_root: &Path,
        files: &[ScannedFile],
    ) -> CodetectResult<HashMap<String, Vec<Symbol>>> {
        // Every file handed to the generator counts as processed: it
        // silently skips what it can't parse, which is exactly the
        // zero-symbols case.
        let mut out: HashMap<String, Vec<Symbol>> = files
            .iter()
            .map(|f| (f.path.clone(), Vec::new()))
            .collect();

        for batch in files.chunks(BATCH_SIZE) {
            if let Err(e) = self.run_batch(repo_root, batch, &mut out).await {
                tracing::warn!(error = %e, files = batch.len(), "tag generator batch failed");
            }
        }

        Ok(out)
    }
}

/// One line of `ctags --output-format=json`.
#[derive(Debug, Deserialize)]
struct TagRecord {
    #[serde(rename = "_type")]
    record_type: String,
    name: String,
    path: String,
    line: Option<u32>,
    kind: Option<String>,
    language: Option<String>,
    pattern: Option<String>,
    scope: Option<String>,
    signature: Option<String>,
}
