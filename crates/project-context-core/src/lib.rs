//! # Project Context Core
//!
//! Shared, runtime-free logic for Project Context: data models, the
//! sliding-window chunker, project identity hashing, the embedding backend
//! trait and similarity metrics, store abstractions with in-memory
//! implementations, analysis confidence scoring, and the sectioned prompt
//! composer used by the relevance gate.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies.

pub mod chunk;
pub mod confidence;
pub mod embedding;
pub mod error;
pub mod identity;
pub mod models;
pub mod prompt;
pub mod store;
