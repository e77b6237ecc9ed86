//! Incremental symbol index.
//!
//! Three cooperating pieces:
//!
//! - **`scan`** walks the project root and produces the candidate file
//!   set with `(mtime_ns, size)` for change detection.
//! - **`extract`** turns changed files into symbols, via an external
//!   tag generator or tree-sitter structural patterns.
//! - **`store`** owns the `files`/`symbols` tables and applies each
//!   batch in one transaction.

pub mod extract;
pub mod scan;
pub mod store;

pub use extract::{AutoExtractor, SymbolExtractor};
pub use scan::{scan_project, ScannedFile};
pub use store::{ChangeSet, SymbolStore, UpdateSummary};
