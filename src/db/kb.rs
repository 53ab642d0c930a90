//! The `kb` table: registration plus the small housekeeping columns
//! (`entry_count`, `indexed_at`) the reconciler updates after a sweep.
//!
//! Grounded on the original's `PyriteDB.register_kb`/`kb_ops` mixin,
//! collapsed into free functions over a `Transaction` like the rest of
//! `db/`.

use rusqlite::{params, OptionalExtension, Transaction};

use crate::error::Result;

/// Registers (or updates) the KB row. Called at the start of every
/// document-manager save and full reindex, per spec.md §4.9 ("full reindex
/// of a KB: registers the KB row...").
pub fn register_kb(
    tx: &Transaction,
    name: &str,
    kb_type: &str,
    path: &str,
    description: &str,
    read_only: bool,
    shortname: Option<&str>,
) -> Result<()> {
    tx.execute(
        "INSERT INTO kb (name, kb_type, path, description, read_only, shortname)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(name) DO UPDATE SET
            kb_type = excluded.kb_type,
            path = excluded.path,
            description = excluded.description,
            read_only = excluded.read_only,
            shortname = excluded.shortname",
        params![name, kb_type, path, description, read_only, shortname],
    )?;
    Ok(())
}

/// Updates the KB's cached entry count and indexed-at timestamp after a
/// full or incremental sync.
pub fn mark_indexed(tx: &Transaction, name: &str, entry_count: usize, indexed_at: chrono::DateTime<chrono::Utc>) -> Result<()> {
    tx.execute(
        "UPDATE kb SET entry_count = ?1, indexed_at = ?2 WHERE name = ?3",
        params![entry_count as i64, indexed_at, name],
    )?;
    Ok(())
}

pub struct KbRow {
    pub name: String,
    pub entry_count: i64,
    pub indexed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Removes a KB's row and, via the `entry.kb_name` foreign key's `ON DELETE
/// CASCADE`, every entry (and its tag/source/link/ref/block/version rows)
/// registered under it. Used by ephemeral-KB garbage collection
/// (spec.md §3 "Lifecycles"); the KB's files on disk are left untouched —
/// GC only deregisters the index side.
pub fn deregister_kb(tx: &Transaction, name: &str) -> Result<()> {
    tx.execute("DELETE FROM kb WHERE name = ?1", params![name])?;
    Ok(())
}

pub fn get_kb(tx: &Transaction, name: &str) -> Result<Option<KbRow>> {
    tx.query_row(
        "SELECT name, entry_count, indexed_at FROM kb WHERE name = ?1",
        params![name],
        |row| Ok(KbRow { name: row.get(0)?, entry_count: row.get(1)?, indexed_at: row.get(2)? }),
    )
    .optional()
    .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::run_migrations;
    use rusqlite::Connection;

    #[test]
    fn register_then_reregister_updates_fields() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();

        let tx = conn.transaction().unwrap();
        register_kb(&tx, "kb1", "general", "/a", "first", false, None).unwrap();
        tx.commit().unwrap();

        let tx = conn.transaction().unwrap();
        register_kb(&tx, "kb1", "general", "/b", "second", true, Some("k1")).unwrap();
        tx.commit().unwrap();

        let tx = conn.transaction().unwrap();
        let path: String = tx.query_row("SELECT path FROM kb WHERE name = 'kb1'", [], |r| r.get(0)).unwrap();
        assert_eq!(path, "/b");
    }

    #[test]
    fn mark_indexed_updates_count() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        let tx = conn.transaction().unwrap();
        register_kb(&tx, "kb1", "general", "/a", "", false, None).unwrap();
        mark_indexed(&tx, "kb1", 5, chrono::Utc::now()).unwrap();
        tx.commit().unwrap();

        let tx = conn.transaction().unwrap();
        let row = get_kb(&tx, "kb1").unwrap().unwrap();
        assert_eq!(row.entry_count, 5);
        assert!(row.indexed_at.is_some());
    }
}
