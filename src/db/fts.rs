//! The `entry_fts` full-text-search virtual table (spec.md §4.5).
//!
//! Content is title + summary + tags + body joined for indexing, but
//! [`search`] projects only `id`/`kb_name`/`entry_type`/`title`/`summary` —
//! never the raw body — matching spec.md §4.5's "excluding body from
//! result projections."

use rusqlite::{params, Transaction};

use crate::entry::Entry;
use crate::error::Result;

/// Replaces the `entry_fts` row for `entry`. Must run inside the same
/// transaction as the `entry` row write so readers never observe a row
/// without matching FTS content (spec.md §5).
pub fn upsert(tx: &Transaction, entry: &Entry) -> Result<()> {
    delete(tx, &entry.id, &entry.kb_name)?;
    let summary = entry.metadata.get("summary").and_then(serde_json::Value::as_str).unwrap_or("");
    let tags = entry.tags.join(" ");
    tx.execute(
        "INSERT INTO entry_fts (id, kb_name, title, summary, tags, body) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![entry.id, entry.kb_name, entry.title, summary, tags, entry.body],
    )?;
    Ok(())
}

pub fn delete(tx: &Transaction, id: &str, kb_name: &str) -> Result<()> {
    tx.execute("DELETE FROM entry_fts WHERE id = ?1 AND kb_name = ?2", params![id, kb_name])?;
    Ok(())
}

/// A single full-text match, excluding the entry body per spec.md §4.5.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub kb_name: String,
    pub entry_type: String,
    pub title: String,
    pub summary: Option<String>,
}

/// Runs an FTS5 `MATCH` query, optionally scoped to one KB. Malformed FTS
/// syntax surfaces as a plain [`crate::error::PyriteError::Database`] —
/// spec.md §7 classifies that as a client-facing 400-class failure at the
/// transport boundary, which this core doesn't own.
pub fn search(tx: &Transaction, query: &str, kb_name: Option<&str>, limit: u32) -> Result<Vec<SearchHit>> {
    let sql = "
        SELECT f.id, f.kb_name, e.entry_type, f.title, e.summary
        FROM entry_fts f
        JOIN entry e ON e.id = f.id AND e.kb_name = f.kb_name
        WHERE entry_fts MATCH ?1 AND (?2 IS NULL OR f.kb_name = ?2)
        ORDER BY rank
        LIMIT ?3";
    let mut stmt = tx.prepare(sql)?;
    let rows = stmt
        .query_map(params![query, kb_name, limit], |row| {
            Ok(SearchHit {
                id: row.get(0)?,
                kb_name: row.get(1)?,
                entry_type: row.get(2)?,
                title: row.get(3)?,
                summary: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}
