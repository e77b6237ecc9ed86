//! # codetect-core
//!
//! Core engine for the codetect code-intelligence service.
//!
//! codetect indexes a repository three ways -- regex keyword scan,
//! structural symbol lookup, and vector semantic search -- and serves
//! the results to AI coding agents. This crate is the library that the
//! daemon, the MCP server, and the CLI are built on.
//!
//! ## Architecture
//!
//! The engine is split into decoupled subsystems:
//!
//! - **`config`** -- Environment-driven configuration and host paths
//! - **`storage`** -- One relational interface over SQLite and Postgres
//! - **`symbols`** -- Incremental symbol index (discovery, extraction, store)
//! - **`chunker`** -- Symbol-aware chunking for the embedding pipeline
//! - **`embedder`** -- Pluggable text-to-vector providers (Ollama, OpenAI-style)
//! - **`embeddings`** -- Dimension-grouped vector storage with content-hash dedup
//! - **`vector`** -- Cosine math and brute-force nearest-neighbour selection
//! - **`search`** -- Semantic searcher and the keyword scanner
//! - **`registry`** -- Host-wide record of registered projects
//! - **`pipeline`** -- Orchestrates index passes; the `Engine` entry point
//! - **`tools`** -- Facades consumed by the external tool dispatcher
//!
//! Each subsystem exposes a small public surface; they communicate via
//! the types in the `types` module and never touch each other's tables
//! directly.

// Workspace lints are inherited from Cargo.toml

pub mod config;
pub mod error;
pub mod types;

// Core subsystems
pub mod storage;
pub mod symbols;
pub mod chunker;
pub mod embedder;
pub mod embeddings;
pub mod vector;
pub mod search;
pub mod registry;
pub mod pipeline;
pub mod tools;

/// Re-export the primary engine interface.
pub use pipeline::Engine;
pub use config::Config;
pub use error::CodetectError;
