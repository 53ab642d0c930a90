//! Entry table CRUD: the `upsert_entry` contract from spec.md §4.5 and the
//! read-side queries the service/reconciler/wikilink layers build on.
//!
//! Grounded on kasl's `db::tasks::Tasks` for the "struct of free functions
//! over a `Connection`/`Transaction`, one per concern" shape. The upsert
//! itself uses SQLite's `ON CONFLICT ... DO UPDATE` so attribution
//! preservation (`created_at` immutable, `created_by` set-once) is a single
//! statement rather than a read-then-write race.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row, Transaction};
use serde_json::Value;

use crate::config::GlobalConfig;
use crate::entry::Entry;
use crate::error::Result;
use crate::schema::KbSchema;

use super::derived;
use super::fts;

/// One row of the `entry` table, as read back from the index.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryRow {
    pub id: String,
    pub kb_name: String,
    pub entry_type: String,
    pub title: String,
    pub body: String,
    pub summary: Option<String>,
    pub file_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub indexed_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub modified_by: Option<String>,
    pub metadata: Value,
}

fn row_to_entry(row: &Row) -> rusqlite::Result<EntryRow> {
    let metadata_text: String = row.get("metadata")?;
    Ok(EntryRow {
        id: row.get("id")?,
        kb_name: row.get("kb_name")?,
        entry_type: row.get("entry_type")?,
        title: row.get("title")?,
        body: row.get("body")?,
        summary: row.get("summary")?,
        file_path: row.get("file_path")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        indexed_at: row.get("indexed_at")?,
        created_by: row.get("created_by")?,
        modified_by: row.get("modified_by")?,
        metadata: serde_json::from_str(&metadata_text).unwrap_or(Value::Null),
    })
}

/// Replaces the row identified by `(entry.id, entry.kb_name)`, preserving
/// `created_by`/`created_at` when a prior row exists, then re-syncs every
/// derived table (tags, sources, links, refs, blocks) and the FTS index —
/// all within the caller's transaction, so the whole update is atomic.
///
/// `file_path` is the on-disk location recorded by the repository; `schema`
/// is the KB's schema (if any), needed to extract `object-ref` fields;
/// `config` resolves cross-KB wikilink shortname prefixes to full KB names
/// (pass `None` when no multi-KB config is available).
pub fn upsert_entry(
    tx: &Transaction,
    entry: &Entry,
    file_path: Option<&str>,
    schema: Option<&KbSchema>,
    config: Option<&GlobalConfig>,
) -> Result<()> {
    let now = Utc::now();
    let metadata_text = serde_json::to_string(&Value::Object(entry.metadata.clone()))?;
    let created_by = entry.attribution.created_by.clone();
    let modified_by = entry.attribution.modified_by.clone();

    tx.execute(
        "INSERT INTO entry (
            id, kb_name, entry_type, title, body, summary, file_path,
            created_at, updated_at, indexed_at, created_by, modified_by, metadata
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        ON CONFLICT(id, kb_name) DO UPDATE SET
            entry_type = excluded.entry_type,
            title = excluded.title,
            body = excluded.body,
            summary = excluded.summary,
            file_path = excluded.file_path,
            updated_at = excluded.updated_at,
            indexed_at = excluded.indexed_at,
            created_by = COALESCE(created_by, excluded.created_by),
            modified_by = excluded.modified_by,
            metadata = excluded.metadata",
        params![
            entry.id,
            entry.kb_name,
            entry.kind.type_name(),
            entry.title,
            entry.body,
            summary_of(entry),
            file_path,
            entry.created_at,
            entry.updated_at,
            now,
            created_by,
            modified_by,
            metadata_text,
        ],
    )?;

    derived::sync_tags(tx, &entry.id, &entry.kb_name, &entry.tags)?;
    derived::sync_sources(tx, &entry.id, &entry.kb_name, &entry.sources)?;
    derived::sync_links(tx, entry, config)?;
    derived::sync_refs(tx, entry, schema)?;
    derived::sync_blocks(tx, &entry.id, &entry.kb_name, &entry.body)?;
    fts::upsert(tx, entry)?;

    Ok(())
}

fn summary_of(entry: &Entry) -> Option<String> {
    entry.metadata.get("summary").and_then(Value::as_str).map(str::to_string)
}

/// Fetches one entry row by `(id, kb_name)`.
pub fn get_entry(tx: &Transaction, id: &str, kb_name: &str) -> Result<Option<EntryRow>> {
    tx.query_row("SELECT * FROM entry WHERE id = ?1 AND kb_name = ?2", params![id, kb_name], row_to_entry)
        .optional()
        .map_err(Into::into)
}

/// Deletes the entry row; `ON DELETE CASCADE` foreign keys remove
/// dependent tag/source/link/ref/block/version rows. Returns whether a row
/// was actually present.
pub fn delete_entry(tx: &Transaction, id: &str, kb_name: &str) -> Result<bool> {
    fts::delete(tx, id, kb_name)?;
    let changed = tx.execute("DELETE FROM entry WHERE id = ?1 AND kb_name = ?2", params![id, kb_name])?;
    Ok(changed > 0)
}

/// Lists entries, optionally filtered by KB and/or type, newest-updated
/// first.
pub fn list_entries(tx: &Transaction, kb_name: Option<&str>, entry_type: Option<&str>) -> Result<Vec<EntryRow>> {
    let mut sql = String::from("SELECT * FROM entry WHERE 1=1");
    if kb_name.is_some() {
        sql.push_str(" AND kb_name = ?1");
    }
    if entry_type.is_some() {
        sql.push_str(if kb_name.is_some() { " AND entry_type = ?2" } else { " AND entry_type = ?1" });
    }
    sql.push_str(" ORDER BY updated_at DESC");

    let mut stmt = tx.prepare(&sql)?;
    let rows = match (kb_name, entry_type) {
        (Some(k), Some(t)) => stmt.query_map(params![k, t], row_to_entry)?.collect::<rusqlite::Result<Vec<_>>>()?,
        (Some(k), None) => stmt.query_map(params![k], row_to_entry)?.collect::<rusqlite::Result<Vec<_>>>()?,
        (None, Some(t)) => stmt.query_map(params![t], row_to_entry)?.collect::<rusqlite::Result<Vec<_>>>()?,
        (None, None) => stmt.query_map([], row_to_entry)?.collect::<rusqlite::Result<Vec<_>>>()?,
    };
    Ok(rows)
}

/// A lightweight `(id, file_path, indexed_at)` projection the reconciler
/// uses to diff index state against the filesystem without loading full
/// entry bodies.
pub struct IndexedEntryRef {
    pub id: String,
    pub file_path: Option<String>,
    pub indexed_at: DateTime<Utc>,
}

pub fn entries_for_indexing(tx: &Transaction, kb_name: &str) -> Result<Vec<IndexedEntryRef>> {
    let mut stmt = tx.prepare("SELECT id, file_path, indexed_at FROM entry WHERE kb_name = ?1")?;
    let rows = stmt
        .query_map(params![kb_name], |row| {
            Ok(IndexedEntryRef { id: row.get(0)?, file_path: row.get(1)?, indexed_at: row.get(2)? })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn count_entries(tx: &Transaction, kb_name: &str) -> Result<usize> {
    let count: i64 = tx.query_row("SELECT COUNT(*) FROM entry WHERE kb_name = ?1", params![kb_name], |r| r.get(0))?;
    Ok(count as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::run_migrations;
    use crate::entry::{Attribution, EntryKind};
    use rusqlite::Connection;
    use serde_json::Map;

    fn sample_entry(id: &str) -> Entry {
        Entry {
            id: id.to_string(),
            kb_name: "kb1".to_string(),
            title: "Title".to_string(),
            kind: EntryKind::Note,
            tags: vec!["a".to_string()],
            aliases: vec![],
            sources: vec![],
            links: vec![],
            attribution: Attribution::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            metadata: Map::new(),
            body: "Hello world".to_string(),
        }
    }

    fn conn() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        conn.execute("INSERT INTO kb (name, path) VALUES ('kb1', '/tmp/kb1')", []).unwrap();
        conn
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let mut conn = conn();
        let tx = conn.transaction().unwrap();
        let entry = sample_entry("e1");
        upsert_entry(&tx, &entry, Some("/tmp/kb1/notes/e1.md"), None, None).unwrap();
        tx.commit().unwrap();

        let tx = conn.transaction().unwrap();
        let row = get_entry(&tx, "e1", "kb1").unwrap().unwrap();
        assert_eq!(row.title, "Title");
        assert_eq!(row.body, "Hello world");
    }

    #[test]
    fn upsert_preserves_created_at_and_created_by() {
        let mut conn = conn();
        let mut entry = sample_entry("e1");
        entry.attribution.created_by = Some("alice".to_string());
        let original_created_at = entry.created_at;

        let tx = conn.transaction().unwrap();
        upsert_entry(&tx, &entry, None, None, None).unwrap();
        tx.commit().unwrap();

        entry.created_at = Utc::now() + chrono::Duration::seconds(60);
        entry.attribution.created_by = Some("bob".to_string());
        entry.attribution.modified_by = Some("bob".to_string());
        entry.title = "Updated".to_string();

        let tx = conn.transaction().unwrap();
        upsert_entry(&tx, &entry, None, None, None).unwrap();
        tx.commit().unwrap();

        let tx = conn.transaction().unwrap();
        let row = get_entry(&tx, "e1", "kb1").unwrap().unwrap();
        assert_eq!(row.title, "Updated");
        assert_eq!(row.created_by, Some("alice".to_string()));
        assert_eq!(row.modified_by, Some("bob".to_string()));
        assert_eq!(row.created_at.timestamp(), original_created_at.timestamp());
    }

    #[test]
    fn delete_removes_row() {
        let mut conn = conn();
        let tx = conn.transaction().unwrap();
        upsert_entry(&tx, &sample_entry("e1"), None, None, None).unwrap();
        tx.commit().unwrap();

        let tx = conn.transaction().unwrap();
        assert!(delete_entry(&tx, "e1", "kb1").unwrap());
        tx.commit().unwrap();

        let tx = conn.transaction().unwrap();
        assert!(get_entry(&tx, "e1", "kb1").unwrap().is_none());
    }
}
