//! # Arxiu Core
//!
//! Runtime-free logic for Arxiu: record models, text normalization, date
//! and name parsers, the import template language, the CSV ingestion
//! engine, denormalized roll-ups, indexing progress, search documents,
//! achievements, and the storage abstraction.
//!
//! This crate contains no sqlx, filesystem I/O, or async runtime. Every
//! persistent effect goes through the [`store::Store`] trait; tests use
//! [`store::memory::InMemoryStore`].

pub mod achievements;
pub mod date;
pub mod export;
pub mod ingest;
pub mod lifecycle;
pub mod models;
pub mod names;
pub mod normalize;
pub mod progress;
pub mod rollup;
pub mod search;
pub mod similarity;
pub mod store;
pub mod template;
pub mod territory;
