//! Derived-table synchronizer (spec.md §4.6): given an entry's current
//! state, replace its tag, source, link, ref, and block rows so no partial
//! state is ever observable to a reader.
//!
//! Grounded on the original's `IndexManager._entry_to_dict` (body wikilink
//! extraction merged into `links`, `_refs` built from schema `object-ref`
//! fields) with the replace-wholesale behavior spec.md §4.6 calls for, one
//! function per derived table rather than one big dict-building pass.

use std::collections::HashSet;

use rusqlite::{params, Transaction};
use serde_json::Value;

use crate::blocks::extract_blocks;
use crate::config::GlobalConfig;
use crate::entry::{Entry, Source};
use crate::error::Result;
use crate::schema::KbSchema;
use crate::wikilink::{parse_wikilinks, resolve_kb_context};

/// Diffs `new_tags` against the entry's current `entry_tag` rows: removes
/// edges for tags no longer present, creates any `tag` rows that don't yet
/// exist, and inserts the missing edges. Null/empty tag values are
/// filtered, per spec.md §4.6 step 1.
pub fn sync_tags(tx: &Transaction, entry_id: &str, kb_name: &str, new_tags: &[String]) -> Result<()> {
    let wanted: HashSet<&str> = new_tags.iter().map(String::as_str).filter(|t| !t.trim().is_empty()).collect();

    let mut stmt = tx.prepare(
        "SELECT t.id, t.name FROM tag t
         JOIN entry_tag et ON et.tag_id = t.id
         WHERE et.entry_id = ?1 AND et.kb_name = ?2",
    )?;
    let current: Vec<(i64, String)> =
        stmt.query_map(params![entry_id, kb_name], |r| Ok((r.get(0)?, r.get(1)?)))?.collect::<rusqlite::Result<_>>()?;
    drop(stmt);

    for (tag_id, name) in &current {
        if !wanted.contains(name.as_str()) {
            tx.execute(
                "DELETE FROM entry_tag WHERE entry_id = ?1 AND kb_name = ?2 AND tag_id = ?3",
                params![entry_id, kb_name, tag_id],
            )?;
        }
    }

    let already_linked: HashSet<&str> = current.iter().map(|(_, n)| n.as_str()).collect();
    for name in wanted {
        if already_linked.contains(name) {
            continue;
        }
        tx.execute("INSERT OR IGNORE INTO tag (name) VALUES (?1)", params![name])?;
        let tag_id: i64 = tx.query_row("SELECT id FROM tag WHERE name = ?1", params![name], |r| r.get(0))?;
        tx.execute(
            "INSERT OR IGNORE INTO entry_tag (entry_id, kb_name, tag_id) VALUES (?1, ?2, ?3)",
            params![entry_id, kb_name, tag_id],
        )?;
    }
    Ok(())
}

/// Replaces every `source` row for an entry wholesale (spec.md §4.6 step 2).
pub fn sync_sources(tx: &Transaction, entry_id: &str, kb_name: &str, sources: &[Source]) -> Result<()> {
    tx.execute("DELETE FROM source WHERE entry_id = ?1 AND kb_name = ?2", params![entry_id, kb_name])?;
    for (position, source) in sources.iter().enumerate() {
        tx.execute(
            "INSERT INTO source (entry_id, kb_name, position, title, url, verified, note)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![entry_id, kb_name, position as i64, source.title, source.url, source.verified, source.note],
        )?;
    }
    Ok(())
}

/// Resolves a wikilink's raw `kb:` prefix (a shortname or full KB name, or
/// none at all) to the full KB name the `link.target_kb` column stores.
/// Without a [`GlobalConfig`] to resolve against — the reconciler's
/// single-KB reindex paths don't carry one — the raw prefix is kept as-is,
/// which is correct whenever the prefix already is the full KB name.
fn resolve_link_target_kb(config: Option<&GlobalConfig>, prefix: Option<&str>, context_kb: &str) -> String {
    match (config, prefix) {
        (Some(config), Some(prefix)) => resolve_kb_context(config, prefix, context_kb).to_string(),
        (None, Some(prefix)) => prefix.to_string(),
        (_, None) => context_kb.to_string(),
    }
}

/// Replaces every `link` row for an entry: frontmatter-declared links plus
/// one link per body wikilink, deduplicated by target (spec.md §4.6 step 3).
/// A wikilink whose target equals the source id is excluded, per spec.md
/// §8's boundary behavior. `config` resolves a `kb:` prefix's shortname to
/// its full KB name (spec.md §4.7 step 1, "shortname wins on collision");
/// pass `None` when no multi-KB config is available.
pub fn sync_links(tx: &Transaction, entry: &Entry, config: Option<&GlobalConfig>) -> Result<()> {
    tx.execute(
        "DELETE FROM link WHERE source_id = ?1 AND source_kb = ?2",
        params![entry.id, entry.kb_name],
    )?;

    let mut seen_targets: HashSet<String> = HashSet::new();
    for link in &entry.links {
        if link.target == entry.id {
            continue;
        }
        let target_kb = resolve_link_target_kb(config, link.target_kb.as_deref(), &entry.kb_name);
        let key = format!("{target_kb}:{}", link.target);
        if seen_targets.contains(&key) {
            continue;
        }
        seen_targets.insert(key);
        tx.execute(
            "INSERT INTO link (source_id, source_kb, target_id, target_kb, relation, note)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.id,
                entry.kb_name,
                link.target,
                target_kb,
                link.relation.clone().unwrap_or_else(|| "link".to_string()),
                link.note,
            ],
        )?;
    }

    for wikilink in parse_wikilinks(&entry.body) {
        if wikilink.target.is_empty() || wikilink.target == entry.id {
            continue;
        }
        let target_kb = resolve_link_target_kb(config, wikilink.kb_prefix.as_deref(), &entry.kb_name);
        let key = format!("{target_kb}:{}", wikilink.target);
        if seen_targets.contains(&key) {
            continue;
        }
        seen_targets.insert(key);
        tx.execute(
            "INSERT INTO link (source_id, source_kb, target_id, target_kb, relation, note)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![entry.id, entry.kb_name, wikilink.target, target_kb, wikilink.relation(), wikilink.fragment_note()],
        )?;
    }
    Ok(())
}

/// Replaces `entry_ref` rows for every schema-declared `object-ref` field
/// on the entry's type (spec.md §4.6 step 4). A no-op when no schema is
/// attached to the KB.
pub fn sync_refs(tx: &Transaction, entry: &Entry, schema: Option<&KbSchema>) -> Result<()> {
    tx.execute("DELETE FROM entry_ref WHERE entry_id = ?1 AND kb_name = ?2", params![entry.id, entry.kb_name])?;

    let Some(schema) = schema else { return Ok(()) };
    let Some(type_def) = schema.type_def(entry.kind.type_name()) else { return Ok(()) };

    for field in &type_def.fields {
        if field.field_type != "object-ref" {
            continue;
        }
        let Some(value) = entry.metadata.get(&field.name) else { continue };
        let targets: Vec<String> = match value {
            Value::String(s) => vec![s.clone()],
            Value::Array(arr) => arr.iter().filter_map(Value::as_str).map(str::to_string).collect(),
            _ => Vec::new(),
        };
        for target_id in targets {
            tx.execute(
                "INSERT INTO entry_ref (entry_id, kb_name, field_name, target_id, target_type)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![entry.id, entry.kb_name, field.name, target_id, field.target_type],
            )?;
        }
    }
    Ok(())
}

/// Replaces `block` rows by re-extracting blocks from the body (spec.md
/// §4.6 step 5).
pub fn sync_blocks(tx: &Transaction, entry_id: &str, kb_name: &str, body: &str) -> Result<()> {
    tx.execute("DELETE FROM block WHERE entry_id = ?1 AND kb_name = ?2", params![entry_id, kb_name])?;
    for block in extract_blocks(body) {
        tx.execute(
            "INSERT INTO block (entry_id, kb_name, position, block_type, heading, content, block_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry_id,
                kb_name,
                block.position as i64,
                block.block_type.as_str(),
                block.heading,
                block.content,
                block.block_id,
            ],
        )?;
    }
    Ok(())
}
