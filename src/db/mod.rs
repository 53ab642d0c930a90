//! The derived SQLite index: a single connection wrapper plus one module
//! per concern, mirroring the one-struct-per-table style of the teacher
//! database layer rather than a trait-mixin facade.
//!
//! ## Modules
//!
//! - **Core Infrastructure**: connection management and migrations
//! - **Entries**: upsert/read access to the `entry` table, the index's
//!   source of truth for search and listing
//! - **Derived Tables**: tag/link/ref/block rows recomputed from entry
//!   content on every write
//! - **Full-Text Search**: the `entry_fts` virtual table and its query
//!   helpers
//! - **Versions**: `entry_version` rows populated by attribution indexing
//! - **Settings/Accounts**: `setting`, `starred_entry`, `local_user`,
//!   `session`, `user`, `repo`, `workspace_repo` — tables owned by the core
//!   schema but whose behavior (auth, session expiry, workspace semantics)
//!   belongs to the server layer; these modules are storage only
//!
//! ## Usage
//!
//! ```rust
//! use pyrite_core::db::IndexStore;
//!
//! let store = IndexStore::open_in_memory()?;
//! ```

/// Core connection management and migration orchestration.
pub mod migrations;

/// The `kb` table: registration and indexing housekeeping columns.
pub mod kb;

/// Entry table CRUD: upsert, fetch, remove, and listing/filtering queries.
pub mod entries;

/// Derived tag/link/ref/block/source tables kept in sync with entry writes.
pub mod derived;

/// The `entry_fts` full-text-search virtual table.
pub mod fts;

/// Per-entry version history populated from git attribution.
pub mod versions;

/// The `setting` and `starred_entry` tables: ambient key-value settings
/// and per-user bookmarks. Storage only — no interpretation of values.
pub mod settings;

/// The `local_user`/`session`/`user`/`repo`/`workspace_repo` tables:
/// account, session, and repo-association bookkeeping. Storage only —
/// authentication and session-expiry enforcement are transport concerns.
pub mod accounts;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;

use crate::error::Result;

/// The derived SQLite index for one Pyrite installation. Wraps a single
/// connection behind a mutex — Pyrite's index is meant to be opened by one
/// process at a time, the same single-connection assumption the teacher's
/// `Db` makes for its desktop SQLite file.
pub struct IndexStore {
    conn: Mutex<Connection>,
}

impl IndexStore {
    /// Opens (creating if necessary) the index database at `path`, enables
    /// foreign key enforcement and WAL mode, and runs any pending
    /// migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut conn = Connection::open(path)?;
        configure(&mut conn)?;
        migrations::run_migrations(&mut conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Opens an in-memory index, used by unit tests and by ephemeral KBs
    /// that never persist to disk.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        configure(&mut conn)?;
        migrations::run_migrations(&mut conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Runs `f` with exclusive access to the underlying connection. Every
    /// index mutation goes through this so writers compose into a single
    /// transaction when needed (see `document_manager::DocumentManager`).
    pub fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard = self.conn.lock().expect("index connection mutex poisoned");
        f(&mut guard)
    }
}

fn configure(conn: &mut Connection) -> Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    conn.execute_batch("PRAGMA journal_mode = WAL")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(())
}
