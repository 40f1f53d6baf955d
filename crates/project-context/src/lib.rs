//! # Project Context
//!
//! **Project-aware retrieval for AI chat assistants.**
//!
//! Project Context indexes a codebase into embedded chunks, keeps a
//! versioned analysis of each project, and composes chat prompts that pull
//! in project evidence only when a question is actually about the project.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Discover   │──▶│ Chunk+Embed  │──▶│    SQLite    │
//! │ walk + skip │   │   gateway    │   │ vectors+ctx  │
//! └─────────────┘   └──────────────┘   └──────┬───────┘
//!                                             │
//!                                             ▼
//!                                     ┌───────────────┐
//!                                     │ Relevance gate│
//!                                     │ score+compose │
//!                                     └───────────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. [`discover`] walks the project root, pruning excluded directories and
//!    skipping binary or oversized files.
//! 2. [`index`] splits files with the sliding-window chunker, embeds chunks
//!    in batches through the [`gateway`], and writes [`sqlite_store`] rows
//!    scoped by project and user.
//! 3. [`context_cmd`] imports analyzer output as a new context version.
//! 4. [`relevance`] retrieves top-k evidence for a question, asks the
//!    [`generation`] backend for a 0-10 relevance score, and composes the
//!    prompt with or without project details.
//!
//! ## Quick Start
//!
//! ```bash
//! pctx init
//! pctx index .
//! pctx context store . --file analysis.json
//! pctx ask . "how is the config loaded?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | SQLite pool setup (WAL) |
//! | [`migrate`] | Idempotent schema creation |
//! | [`discover`] | File discovery with directory pruning and binary sniffing |
//! | [`embedding`] | OpenAI, Ollama, and local fastembed backends |
//! | [`gateway`] | Lazy shared model handle and fault-tolerant batch embedding |
//! | [`index`] | Indexing pipeline with cancellation and per-item errors |
//! | [`progress`] | Indexing progress reporters |
//! | [`sqlite_store`] | SQLite vector and context stores |
//! | [`generation`] | Chat completion backends |
//! | [`relevance`] | Relevance gate and prompt assembly |
//! | [`context_cmd`] | `pctx context` subcommands |
//! | [`stats`] | Database statistics |
//! | [`http`] | Shared JSON POST with retry |

pub mod config;
pub mod context_cmd;
pub mod db;
pub mod discover;
pub mod embedding;
pub mod gateway;
pub mod generation;
pub mod http;
pub mod index;
pub mod migrate;
pub mod progress;
pub mod relevance;
pub mod sqlite_store;
pub mod stats;

pub use project_context_core as core;

/// Owner used when no `--user` is given.
pub const DEFAULT_USER: &str = "local";
