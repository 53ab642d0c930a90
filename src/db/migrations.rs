//! Schema creation and forward-only migration tracking for the index.
//!
//! Grounded on kasl's `db::migrations` for the overall shape — a
//! `Migration { version, name, up }` registry applied inside one
//! transaction per migration, tracked in a `migrations` table — adapted to
//! the tables spec.md §4.5 names instead of kasl's task/tag/event schema.
//! `rusqlite::Transaction` errors convert directly into [`crate::error::PyriteError`]
//! via its `#[from]` impl, so migration bodies use `?` without an explicit map.

use rusqlite::{Connection, Transaction};

use crate::error::Result;

/// Schema version this crate expects at minimum (spec.md §6: "the current
/// version must match or exceed the code-declared minimum").
pub const MIN_SCHEMA_VERSION: u32 = 1;

const MIGRATIONS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS migrations (
    id INTEGER PRIMARY KEY,
    version INTEGER NOT NULL UNIQUE,
    name TEXT NOT NULL,
    applied_at TEXT DEFAULT CURRENT_TIMESTAMP
)";

struct Migration {
    version: u32,
    name: &'static str,
    up: fn(&Transaction) -> Result<()>,
}

fn migrations() -> Vec<Migration> {
    vec![Migration { version: 1, name: "initial_schema", up: migration_001_initial_schema }]
}

/// Applies every migration whose version isn't yet recorded, in order, each
/// inside its own transaction. Called by [`crate::db::IndexStore::open`] and
/// `open_in_memory` on every connection open.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    conn.execute(MIGRATIONS_TABLE, [])?;
    let applied = current_version(conn)?;

    for migration in migrations() {
        if migration.version <= applied {
            continue;
        }
        let tx = conn.transaction()?;
        (migration.up)(&tx)?;
        tx.execute(
            "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.name],
        )?;
        tx.commit()?;
    }
    Ok(())
}

/// The highest applied migration version, or 0 on a fresh database.
pub fn current_version(conn: &Connection) -> Result<u32> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM migrations", [], |row| row.get(0))
        .map_err(Into::into)
}

/// Schema creation for the full standard table set (spec.md §4.5): `kb`,
/// `entry`, `tag`, `entry_tag`, `source`, `link`, `entry_ref`, `block`,
/// `entry_version`, `starred_entry`, `setting`, `local_user`, `session`,
/// `user`, `repo`, `workspace_repo`, plus the `entry_fts` virtual table
/// (created via raw SQL outside any ORM, per spec.md §4.5).
fn migration_001_initial_schema(tx: &Transaction) -> Result<()> {
    tx.execute_batch(
        "
        CREATE TABLE kb (
            name TEXT PRIMARY KEY,
            kb_type TEXT NOT NULL DEFAULT 'general',
            path TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            read_only INTEGER NOT NULL DEFAULT 0,
            shortname TEXT,
            entry_count INTEGER NOT NULL DEFAULT 0,
            indexed_at TEXT
        );

        CREATE TABLE entry (
            id TEXT NOT NULL,
            kb_name TEXT NOT NULL,
            entry_type TEXT NOT NULL,
            title TEXT NOT NULL,
            body TEXT NOT NULL DEFAULT '',
            summary TEXT,
            file_path TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            indexed_at TEXT NOT NULL,
            created_by TEXT,
            modified_by TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            PRIMARY KEY (id, kb_name),
            FOREIGN KEY (kb_name) REFERENCES kb(name) ON DELETE CASCADE
        );
        CREATE INDEX idx_entry_kb_name ON entry(kb_name);
        CREATE INDEX idx_entry_type ON entry(entry_type);
        CREATE INDEX idx_entry_updated_at ON entry(updated_at);

        CREATE TABLE tag (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        );
        CREATE INDEX idx_tag_name ON tag(name);

        CREATE TABLE entry_tag (
            entry_id TEXT NOT NULL,
            kb_name TEXT NOT NULL,
            tag_id INTEGER NOT NULL,
            PRIMARY KEY (entry_id, kb_name, tag_id),
            FOREIGN KEY (entry_id, kb_name) REFERENCES entry(id, kb_name) ON DELETE CASCADE,
            FOREIGN KEY (tag_id) REFERENCES tag(id) ON DELETE CASCADE
        );

        CREATE TABLE source (
            id INTEGER PRIMARY KEY,
            entry_id TEXT NOT NULL,
            kb_name TEXT NOT NULL,
            position INTEGER NOT NULL,
            title TEXT NOT NULL DEFAULT '',
            url TEXT,
            verified INTEGER NOT NULL DEFAULT 0,
            note TEXT,
            FOREIGN KEY (entry_id, kb_name) REFERENCES entry(id, kb_name) ON DELETE CASCADE
        );
        CREATE INDEX idx_source_entry ON source(entry_id, kb_name);

        CREATE TABLE link (
            id INTEGER PRIMARY KEY,
            source_id TEXT NOT NULL,
            source_kb TEXT NOT NULL,
            target_id TEXT NOT NULL,
            target_kb TEXT NOT NULL,
            relation TEXT NOT NULL DEFAULT 'link',
            note TEXT,
            FOREIGN KEY (source_id, source_kb) REFERENCES entry(id, kb_name) ON DELETE CASCADE
        );
        CREATE INDEX idx_link_source ON link(source_id, source_kb);
        CREATE INDEX idx_link_target ON link(target_id, target_kb);

        CREATE TABLE entry_ref (
            id INTEGER PRIMARY KEY,
            entry_id TEXT NOT NULL,
            kb_name TEXT NOT NULL,
            field_name TEXT NOT NULL,
            target_id TEXT NOT NULL,
            target_type TEXT,
            FOREIGN KEY (entry_id, kb_name) REFERENCES entry(id, kb_name) ON DELETE CASCADE
        );
        CREATE INDEX idx_entry_ref_entry ON entry_ref(entry_id, kb_name);

        CREATE TABLE block (
            id INTEGER PRIMARY KEY,
            entry_id TEXT NOT NULL,
            kb_name TEXT NOT NULL,
            position INTEGER NOT NULL,
            block_type TEXT NOT NULL,
            heading TEXT,
            content TEXT NOT NULL DEFAULT '',
            block_id TEXT,
            FOREIGN KEY (entry_id, kb_name) REFERENCES entry(id, kb_name) ON DELETE CASCADE
        );
        CREATE INDEX idx_block_entry ON block(entry_id, kb_name);
        CREATE INDEX idx_block_id ON block(entry_id, kb_name, block_id);

        CREATE TABLE entry_version (
            id INTEGER PRIMARY KEY,
            entry_id TEXT NOT NULL,
            kb_name TEXT NOT NULL,
            commit_hash TEXT NOT NULL,
            author_name TEXT,
            author_email TEXT,
            commit_date TEXT NOT NULL,
            message TEXT,
            change_type TEXT NOT NULL,
            UNIQUE (entry_id, kb_name, commit_hash),
            FOREIGN KEY (entry_id, kb_name) REFERENCES entry(id, kb_name) ON DELETE CASCADE
        );
        CREATE INDEX idx_entry_version_entry ON entry_version(entry_id, kb_name, commit_date);

        CREATE TABLE starred_entry (
            id INTEGER PRIMARY KEY,
            user_id TEXT NOT NULL,
            entry_id TEXT NOT NULL,
            kb_name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (user_id, entry_id, kb_name)
        );

        CREATE TABLE setting (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE local_user (
            id INTEGER PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE session (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        );

        CREATE TABLE user (
            id TEXT PRIMARY KEY,
            email TEXT,
            display_name TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE repo (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            url TEXT,
            local_path TEXT
        );

        CREATE TABLE workspace_repo (
            id INTEGER PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            repo_id INTEGER NOT NULL,
            FOREIGN KEY (repo_id) REFERENCES repo(id) ON DELETE CASCADE
        );

        CREATE VIRTUAL TABLE entry_fts USING fts5(
            id UNINDEXED,
            kb_name UNINDEXED,
            title,
            summary,
            tags,
            body
        );
        ",
    )?;
    Ok(())
}
