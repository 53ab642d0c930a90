//! Per-entry version history (`entry_version`), populated by the
//! reconciler's attribution indexing pass (spec.md §4.9).
//!
//! `entry_version` is append-only per commit-hash (spec.md §3 invariants);
//! the `UNIQUE(entry_id, kb_name, commit_hash)` constraint on the table
//! makes a re-run of attribution indexing idempotent via `INSERT OR IGNORE`
//! rather than needing a separate existence check.

use chrono::{DateTime, Utc};
use rusqlite::{params, Transaction};

use crate::error::Result;

/// One commit that touched an entry, as recorded by the git-attribution
/// source (spec.md §3's `EntryVersion`).
#[derive(Debug, Clone, PartialEq)]
pub struct CommitInfo {
    pub hash: String,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub date: DateTime<Utc>,
    pub message: Option<String>,
}

/// Inserts one version row. A duplicate `(entry_id, kb_name, commit_hash)`
/// is silently ignored, preserving append-only semantics on re-index.
pub fn insert_version(
    tx: &Transaction,
    entry_id: &str,
    kb_name: &str,
    commit: &CommitInfo,
    change_type: &str,
) -> Result<()> {
    tx.execute(
        "INSERT OR IGNORE INTO entry_version
            (entry_id, kb_name, commit_hash, author_name, author_email, commit_date, message, change_type)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![entry_id, kb_name, commit.hash, commit.author_name, commit.author_email, commit.date, commit.message, change_type],
    )?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct VersionRow {
    pub commit_hash: String,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub commit_date: DateTime<Utc>,
    pub message: Option<String>,
    pub change_type: String,
}

/// All versions for an entry, newest commit first (spec.md §6: "ordered by
/// `commit_date DESC`").
pub fn list_versions(tx: &Transaction, entry_id: &str, kb_name: &str) -> Result<Vec<VersionRow>> {
    let mut stmt = tx.prepare(
        "SELECT commit_hash, author_name, author_email, commit_date, message, change_type
         FROM entry_version WHERE entry_id = ?1 AND kb_name = ?2 ORDER BY commit_date DESC",
    )?;
    let rows = stmt
        .query_map(params![entry_id, kb_name], |row| {
            Ok(VersionRow {
                commit_hash: row.get(0)?,
                author_name: row.get(1)?,
                author_email: row.get(2)?,
                commit_date: row.get(3)?,
                message: row.get(4)?,
                change_type: row.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}
