//! # Pyrite core — file/index storage engine
//!
//! A multi-knowledge-base storage engine: entries live as Markdown files
//! with YAML frontmatter, and every write is mirrored into a derived
//! SQLite index that powers search, listing, and cross-references. This
//! crate is the storage core only — no CLI, REST, or MCP surface lives
//! here; those are separate consumers built on top of it.
//!
//! ## Modules
//!
//! - [`entry`] / [`frontmatter`]: the in-memory entry model and its
//!   on-disk Markdown+YAML representation
//! - [`repository`]: file-level CRUD for one KB's entries
//! - [`db`]: the derived SQLite index (entries, tags, links, refs, blocks,
//!   full-text search, version history)
//! - [`schema`]: per-KB type schemas and validation
//! - [`blocks`] / [`wikilink`]: Markdown block extraction and `[[wikilink]]`
//!   parsing/resolution
//! - [`hooks`]: the plugin hook registry invoked around every write
//! - [`document_manager`] / [`service`]: write-path orchestration — file
//!   write, index upsert, validation, and hook dispatch
//! - [`reconciler`]: full/incremental reindexing, health checks, and
//!   git-attribution indexing
//! - [`task`]: task-specific atomic operations (claim, decompose,
//!   checkpoint, rollup) built on top of [`service`]
//! - [`config`]: global and per-KB configuration
//! - [`error`]: the structured error taxonomy and `Result` alias

pub mod blocks;
pub mod config;
pub mod db;
pub mod document_manager;
pub mod entry;
pub mod error;
pub mod frontmatter;
pub mod hooks;
pub mod reconciler;
pub mod repository;
pub mod schema;
pub mod service;
pub mod task;
pub mod wikilink;

pub use db::IndexStore;
pub use entry::Entry;
pub use error::{PyriteError, Result};
pub use repository::KbRepository;
