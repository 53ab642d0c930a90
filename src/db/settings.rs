//! The `setting` and `starred_entry` tables: small ambient key-value and
//! per-user bookmark state that rides along with the index (spec.md §4.5,
//! SPEC_FULL.md's note that these "server-layer" tables are still core
//! responsibility for "the tables and simple CRUD").
//!
//! No behavior beyond storage lives here — interpreting a setting's value
//! or deciding which user is "current" is a transport/server concern.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Transaction};

use crate::error::Result;

/// Reads one setting's raw string value.
pub fn get_setting(tx: &Transaction, key: &str) -> Result<Option<String>> {
    tx.query_row("SELECT value FROM setting WHERE key = ?1", params![key], |row| row.get(0))
        .optional()
        .map_err(Into::into)
}

/// Inserts or replaces one setting.
pub fn set_setting(tx: &Transaction, key: &str, value: &str) -> Result<()> {
    tx.execute(
        "INSERT INTO setting (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

pub fn delete_setting(tx: &Transaction, key: &str) -> Result<bool> {
    Ok(tx.execute("DELETE FROM setting WHERE key = ?1", params![key])? > 0)
}

/// Stars an entry for a user. Idempotent — starring an already-starred
/// entry is a no-op rather than an error, matching the table's
/// `UNIQUE(user_id, entry_id, kb_name)` constraint.
pub fn star_entry(tx: &Transaction, user_id: &str, entry_id: &str, kb_name: &str, now: DateTime<Utc>) -> Result<()> {
    tx.execute(
        "INSERT OR IGNORE INTO starred_entry (user_id, entry_id, kb_name, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![user_id, entry_id, kb_name, now],
    )?;
    Ok(())
}

pub fn unstar_entry(tx: &Transaction, user_id: &str, entry_id: &str, kb_name: &str) -> Result<bool> {
    Ok(tx.execute(
        "DELETE FROM starred_entry WHERE user_id = ?1 AND entry_id = ?2 AND kb_name = ?3",
        params![user_id, entry_id, kb_name],
    )? > 0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct StarredEntry {
    pub entry_id: String,
    pub kb_name: String,
    pub created_at: DateTime<Utc>,
}

/// All entries a user has starred, most recently starred first.
pub fn list_starred(tx: &Transaction, user_id: &str) -> Result<Vec<StarredEntry>> {
    let mut stmt = tx.prepare(
        "SELECT entry_id, kb_name, created_at FROM starred_entry
         WHERE user_id = ?1 ORDER BY created_at DESC",
    )?;
    let rows = stmt
        .query_map(params![user_id], |row| {
            Ok(StarredEntry { entry_id: row.get(0)?, kb_name: row.get(1)?, created_at: row.get(2)? })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::run_migrations;
    use rusqlite::Connection;

    fn conn() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        conn
    }

    #[test]
    fn setting_round_trips_and_updates() {
        let mut conn = conn();
        let tx = conn.transaction().unwrap();
        assert_eq!(get_setting(&tx, "theme").unwrap(), None);
        set_setting(&tx, "theme", "dark").unwrap();
        assert_eq!(get_setting(&tx, "theme").unwrap(), Some("dark".to_string()));
        set_setting(&tx, "theme", "light").unwrap();
        assert_eq!(get_setting(&tx, "theme").unwrap(), Some("light".to_string()));
        tx.commit().unwrap();
    }

    #[test]
    fn deleting_unknown_setting_returns_false() {
        let mut conn = conn();
        let tx = conn.transaction().unwrap();
        assert!(!delete_setting(&tx, "nope").unwrap());
    }

    #[test]
    fn starring_is_idempotent_and_listable() {
        let mut conn = conn();
        let tx = conn.transaction().unwrap();
        let now = Utc::now();
        star_entry(&tx, "alice", "e1", "kb1", now).unwrap();
        star_entry(&tx, "alice", "e1", "kb1", now).unwrap();
        star_entry(&tx, "alice", "e2", "kb1", now).unwrap();

        let starred = list_starred(&tx, "alice").unwrap();
        assert_eq!(starred.len(), 2);

        assert!(unstar_entry(&tx, "alice", "e1", "kb1").unwrap());
        assert!(!unstar_entry(&tx, "alice", "e1", "kb1").unwrap());
        assert_eq!(list_starred(&tx, "alice").unwrap().len(), 1);
    }
}
