//! # Arxiu
//!
//! Bulk ingestion of genealogical transcriptions from parish and civil
//! registers, driven by user-defined import templates.
//!
//! A CSV export of a transcribed book goes through a template that maps
//! its columns onto records, persons and attributes. Publishing a record
//! feeds the demography and surname/given-name frequency counters of its
//! municipality and every ancestor level, writes a search document, and
//! updates the book's indexing percentage.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌───────────────┐
//! │   CSV    │──▶│  Template +  │──▶│    SQLite     │
//! │  upload  │   │  ingestion   │   │ records/index │
//! └──────────┘   └──────┬───────┘   └───────┬───────┘
//!                       │                   │
//!                       ▼                   ▼
//!              ┌────────────────┐   ┌───────────────┐
//!              │ roll-ups, index│   │ search/export │
//!              │ progress, ach. │   │  CLI (arxiu)  │
//!              └────────────────┘   └───────────────┘
//! ```
//!
//! The runtime-free logic lives in the `arxiu-core` crate; this crate adds
//! the SQLite store, configuration, and the command-line front end.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`sqlite_store`] | `Store` implementation over SQLite |
//! | [`import`] | CSV ingestion command |
//! | [`templates`] | Template registry, similarity and samples |
//! | [`xlsx`] | XLSX sample writer |
//! | [`books`] | Book registration and listing |
//! | [`records`] | Moderation transitions |
//! | [`rebuild`] | Counter, search and progress rebuilds |
//! | [`search`] | Weighted name search |
//! | [`export`] | Record CSV export |
//! | [`territory`] | Territory JSON import/export |
//! | [`achievements`] | Achievement definitions and awards |
//! | [`dictionary`] | Surname dictionary |
//! | [`stats`] | Database overview |

pub mod achievements;
pub mod books;
pub mod config;
pub mod db;
pub mod dictionary;
pub mod export;
pub mod import;
pub mod migrate;
pub mod rebuild;
pub mod records;
pub mod search;
pub mod sqlite_store;
pub mod stats;
pub mod templates;
pub mod territory;
pub mod xlsx;
