//! Wikilink grammar, resolution, batch queries, and the wanted-pages/
//! autocomplete read paths (spec.md §4.7).
//!
//! Grounded on the original's `_WIKILINK_RE` in `storage/index.py` (a
//! simpler 2-group `kb:`/`target` pattern) and `services/wikilink_service.py`
//! (`resolve_entry`, `resolve_batch`, `get_wanted_pages`,
//! `list_entry_titles`). SPEC_FULL.md §4 directs implementing the unified
//! 5-group grammar spec.md §4.7 describes (kb-prefix, target, heading,
//! block-id, display) rather than the original's simpler pattern — the
//! regex here is a superset that the original's extraction would also
//! match. Lazily-compiled pattern style grounded in `spacedriveapp-spacedrive`'s
//! use of `once_cell::sync::Lazy` with `regex`.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, OptionalExtension, Transaction};

use crate::config::GlobalConfig;
use crate::error::Result;
use crate::IndexStore;

/// One `[[…]]` occurrence parsed out of a body.
#[derive(Debug, Clone, PartialEq)]
pub struct WikilinkMatch {
    pub transclusion: bool,
    pub kb_prefix: Option<String>,
    pub target: String,
    pub heading: Option<String>,
    pub block_id: Option<String>,
    pub display: Option<String>,
}

impl WikilinkMatch {
    /// The `note` value stored on the derived `link` row: `#heading` or
    /// `^block-id` when a fragment is present, empty otherwise.
    pub fn fragment_note(&self) -> Option<String> {
        if let Some(h) = &self.heading {
            Some(format!("#{h}"))
        } else {
            self.block_id.as_ref().map(|b| format!("^{b}"))
        }
    }

    pub fn relation(&self) -> &'static str {
        if self.transclusion {
            "transclusion"
        } else {
            "wikilink"
        }
    }
}

static WIKILINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<bang>!)?\[\[(?:(?P<kb>[a-zA-Z0-9_-]+):)?(?P<target>[^\]|#^]+?)(?:#(?P<heading>[^\]|^]+?))?(?:\^(?P<block>[a-zA-Z0-9_-]+))?(?:\|(?P<display>[^\]]+?))?\]\]")
        .unwrap()
});

/// Parses every `[[…]]`/`![[…]]` occurrence out of a Markdown body, in
/// order of appearance.
pub fn parse_wikilinks(body: &str) -> Vec<WikilinkMatch> {
    WIKILINK_RE
        .captures_iter(body)
        .map(|caps| WikilinkMatch {
            transclusion: caps.name("bang").is_some(),
            kb_prefix: caps.name("kb").map(|m| m.as_str().to_string()),
            target: caps.name("target").map(|m| m.as_str().trim().to_string()).unwrap_or_default(),
            heading: caps.name("heading").map(|m| m.as_str().trim().to_string()),
            block_id: caps.name("block").map(|m| m.as_str().to_string()),
            display: caps.name("display").map(|m| m.as_str().trim().to_string()),
        })
        .collect()
}

/// Resolves the `(kb-prefix, rest)` split per spec.md §4.7 step 1: a
/// shortname is tried first, then a full KB name — the original's
/// `resolve_entry` prefers shortname on a collision and this replicates
/// that (documented in DESIGN.md).
pub fn resolve_kb_context<'a>(config: &'a GlobalConfig, prefix: &str, context: &'a str) -> &'a str {
    if config.get_kb_by_shortname(prefix).is_some() {
        return config.get_kb_by_shortname(prefix).map(|kb| kb.name.as_str()).unwrap_or(context);
    }
    if config.get_kb(prefix).is_some() {
        return prefix;
    }
    context
}

/// Splits a raw target like `dev:other` into `(kb_context, rest)` using
/// `resolve_kb_context`, or `(context, target)` if there's no prefix.
pub fn split_target<'a>(config: &'a GlobalConfig, target: &'a str, context: &'a str) -> (&'a str, &'a str) {
    match target.split_once(':') {
        Some((prefix, rest)) => (resolve_kb_context(config, prefix, context), rest),
        None => (context, target),
    }
}

/// One resolved (or dangling) wikilink target.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEntry {
    pub id: String,
    pub kb_name: String,
    pub entry_type: String,
    pub title: String,
}

/// Resolves a single target per spec.md §4.7 steps 2–5: exact id match,
/// then case-insensitive title match, then alias match, all scoped to
/// `kb_context`, returning `None` if nothing matches.
pub fn resolve_one(tx: &Transaction, target: &str, kb_context: &str) -> Result<Option<ResolvedEntry>> {
    let exact = tx
        .query_row(
            "SELECT id, kb_name, entry_type, title FROM entry WHERE id = ?1 AND kb_name = ?2",
            params![target, kb_context],
            row_to_resolved,
        )
        .optional()?;
    if exact.is_some() {
        return Ok(exact);
    }

    let by_title = tx
        .query_row(
            "SELECT id, kb_name, entry_type, title FROM entry WHERE kb_name = ?1 AND title = ?2 COLLATE NOCASE",
            params![kb_context, target],
            row_to_resolved,
        )
        .optional()?;
    if by_title.is_some() {
        return Ok(by_title);
    }

    let by_alias = tx
        .query_row(
            "SELECT id, kb_name, entry_type, title FROM entry
             WHERE kb_name = ?1 AND json_extract(metadata, '$.aliases') LIKE ?2",
            params![kb_context, format!("%{target}%")],
            row_to_resolved,
        )
        .optional()?;
    Ok(by_alias)
}

fn row_to_resolved(row: &rusqlite::Row) -> rusqlite::Result<ResolvedEntry> {
    Ok(ResolvedEntry { id: row.get(0)?, kb_name: row.get(1)?, entry_type: row.get(2)?, title: row.get(3)? })
}

/// Batch-resolves targets that all share the same KB context in a single
/// query (spec.md §4.7: "batch resolution must execute all same-context
/// targets in a single query"), returning `target -> exists`.
///
/// Mirrors the original's `resolve_batch` (`services/wikilink_service.py`):
/// targets containing a `:` that aren't a URL are cross-KB references and
/// must be split and resolved individually via [`resolve_one`] (which does
/// the shortname/full-name split and the id/title/alias fallback chain) —
/// batching the literal `"kb:target"` string against `id` would never match
/// the real row `(id = target, kb_name = resolved kb)`. Only the unprefixed
/// remainder is resolved in the single batched query.
pub fn resolve_batch(
    tx: &Transaction,
    config: &GlobalConfig,
    targets: &[String],
    kb_context: &str,
) -> Result<HashMap<String, bool>> {
    let mut result = HashMap::new();
    if targets.is_empty() {
        return Ok(result);
    }

    let mut simple_targets = Vec::new();
    for t in targets {
        if t.contains(':') && !t.starts_with("http") {
            let (ctx, rest) = split_target(config, t, kb_context);
            let resolved = resolve_one(tx, rest, ctx)?;
            result.insert(t.clone(), resolved.is_some());
        } else {
            simple_targets.push(t.clone());
        }
    }

    if !simple_targets.is_empty() {
        let placeholders: Vec<String> = (0..simple_targets.len()).map(|i| format!("?{}", i + 2)).collect();
        let sql = format!("SELECT id FROM entry WHERE kb_name = ?1 AND id IN ({})", placeholders.join(","));
        let mut stmt = tx.prepare(&sql)?;
        let mut rusqlite_params: Vec<&dyn rusqlite::ToSql> = vec![&kb_context];
        for t in &simple_targets {
            rusqlite_params.push(t);
        }
        let existing: std::collections::HashSet<String> =
            stmt.query_map(rusqlite_params.as_slice(), |row| row.get::<_, String>(0))?.collect::<rusqlite::Result<_>>()?;

        for t in &simple_targets {
            result.insert(t.clone(), existing.contains(t));
        }
    }
    Ok(result)
}

/// One link target that has no backing entry, aggregated across referrers
/// (spec.md §4.7 "wanted pages").
#[derive(Debug, Clone, PartialEq)]
pub struct WantedPage {
    pub target_id: String,
    pub target_kb: String,
    pub ref_count: i64,
    pub referenced_by: Vec<String>,
}

const WANTED_PAGE_REF_LIMIT: usize = 50;

/// Projects link rows whose target has no entry row, grouped by
/// `(target_id, target_kb)` with up to [`WANTED_PAGE_REF_LIMIT`] referrers.
pub fn wanted_pages(tx: &Transaction, kb_name: Option<&str>, limit: u32) -> Result<Vec<WantedPage>> {
    let sql = "
        SELECT l.target_id, l.target_kb, COUNT(*) as ref_count, GROUP_CONCAT(DISTINCT l.source_id) as referenced_by
        FROM link l
        LEFT JOIN entry e ON l.target_id = e.id AND l.target_kb = e.kb_name
        WHERE e.id IS NULL AND (?1 IS NULL OR l.target_kb = ?1)
        GROUP BY l.target_id, l.target_kb
        ORDER BY ref_count DESC
        LIMIT ?2";
    let mut stmt = tx.prepare(sql)?;
    let rows = stmt
        .query_map(params![kb_name, limit], |row| {
            let referenced_by_raw: Option<String> = row.get(3)?;
            let mut referenced_by: Vec<String> =
                referenced_by_raw.map(|s| s.split(',').map(str::to_string).collect()).unwrap_or_default();
            referenced_by.truncate(WANTED_PAGE_REF_LIMIT);
            Ok(WantedPage {
                target_id: row.get(0)?,
                target_kb: row.get(1)?,
                ref_count: row.get(2)?,
                referenced_by,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Lightweight `(id, kb_name, entry_type, title)` listing for wikilink
/// autocomplete, optionally filtered by KB and a substring query over
/// title/aliases.
pub fn list_entry_titles(tx: &Transaction, kb_name: Option<&str>, query: Option<&str>, limit: u32) -> Result<Vec<ResolvedEntry>> {
    let sql = "
        SELECT id, kb_name, entry_type, title FROM entry
        WHERE (?1 IS NULL OR kb_name = ?1)
          AND (?2 IS NULL OR title LIKE ?2 OR json_extract(metadata, '$.aliases') LIKE ?2)
        ORDER BY title COLLATE NOCASE
        LIMIT ?3";
    let like_query = query.map(|q| format!("%{q}%"));
    let mut stmt = tx.prepare(sql)?;
    let rows = stmt.query_map(params![kb_name, like_query, limit], row_to_resolved)?.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Read-only facade over [`resolve_one`], [`resolve_batch`], [`wanted_pages`],
/// and [`list_entry_titles`] — the public surface an external transport/CLI
/// (out of scope for this crate, per spec.md §1 Non-goals) calls into.
/// Grounded on the original's standalone `WikilinkService`
/// (`services/wikilink_service.py`), which SPEC_FULL.md §4.8 documents this
/// crate as keeping split out from [`crate::service::KbService`]'s write
/// path.
pub struct WikilinkService<'a> {
    config: &'a GlobalConfig,
    store: &'a IndexStore,
}

impl<'a> WikilinkService<'a> {
    pub fn new(config: &'a GlobalConfig, store: &'a IndexStore) -> Self {
        Self { config, store }
    }

    /// Resolves a single target, splitting a `kb:target` cross-KB prefix
    /// first via [`split_target`].
    pub fn resolve(&self, target: &str, kb_context: &str) -> Result<Option<ResolvedEntry>> {
        self.store.with_conn(|conn| {
            let tx = conn.transaction()?;
            let (ctx, rest) = split_target(self.config, target, kb_context);
            let resolved = resolve_one(&tx, rest, ctx)?;
            tx.commit()?;
            Ok(resolved)
        })
    }

    /// Batch-resolves `targets -> exists`, delegating the cross-KB split to
    /// [`resolve_batch`].
    pub fn resolve_many(&self, targets: &[String], kb_context: &str) -> Result<HashMap<String, bool>> {
        self.store.with_conn(|conn| {
            let tx = conn.transaction()?;
            let resolved = resolve_batch(&tx, self.config, targets, kb_context)?;
            tx.commit()?;
            Ok(resolved)
        })
    }

    /// Link targets with no backing entry, optionally scoped to one KB.
    pub fn wanted_pages(&self, kb_name: Option<&str>, limit: u32) -> Result<Vec<WantedPage>> {
        self.store.with_conn(|conn| {
            let tx = conn.transaction()?;
            let pages = wanted_pages(&tx, kb_name, limit)?;
            tx.commit()?;
            Ok(pages)
        })
    }

    /// Autocomplete listing of entry titles, optionally filtered by KB and
    /// a substring query.
    pub fn list_entry_titles(&self, kb_name: Option<&str>, query: Option<&str>, limit: u32) -> Result<Vec<ResolvedEntry>> {
        self.store.with_conn(|conn| {
            let tx = conn.transaction()?;
            let titles = list_entry_titles(&tx, kb_name, query, limit)?;
            tx.commit()?;
            Ok(titles)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_target() {
        let matches = parse_wikilinks("see [[other-entry]]");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].target, "other-entry");
        assert!(!matches[0].transclusion);
    }

    #[test]
    fn parses_full_grammar() {
        let matches = parse_wikilinks("see [[dev:other#intro^block-1|Display Text]]");
        let m = &matches[0];
        assert_eq!(m.kb_prefix.as_deref(), Some("dev"));
        assert_eq!(m.target, "other");
        assert_eq!(m.heading.as_deref(), Some("intro"));
        assert_eq!(m.block_id.as_deref(), Some("block-1"));
        assert_eq!(m.display.as_deref(), Some("Display Text"));
    }

    #[test]
    fn parses_transclusion() {
        let matches = parse_wikilinks("![[embedded-note]]");
        assert!(matches[0].transclusion);
        assert_eq!(matches[0].relation(), "transclusion");
    }

    #[test]
    fn fragment_note_prefers_heading_over_block() {
        let matches = parse_wikilinks("[[x#heading]]");
        assert_eq!(matches[0].fragment_note(), Some("#heading".to_string()));
    }

    #[test]
    fn multiple_wikilinks_in_one_body() {
        let matches = parse_wikilinks("[[a]] and [[b|B]] and ![[c]]");
        assert_eq!(matches.len(), 3);
        assert_eq!(matches[1].display.as_deref(), Some("B"));
    }

    use crate::config::{AuthSettings, KbConfig, Settings};
    use crate::IndexStore;

    fn config_with_shortname(shortname: &str, kb_name: &str) -> GlobalConfig {
        GlobalConfig {
            version: 1,
            knowledge_bases: vec![KbConfig {
                name: kb_name.to_string(),
                path: std::path::PathBuf::from("/tmp/does-not-matter"),
                kb_type: "general".to_string(),
                description: String::new(),
                read_only: false,
                remote: None,
                repo: None,
                repo_subpath: None,
                shortname: Some(shortname.to_string()),
                ephemeral: false,
                ttl: None,
                created_at_ts: None,
            }],
            repositories: vec![],
            subscriptions: vec![],
            settings: Settings {
                index_path: std::path::PathBuf::from("/tmp/index.db"),
                workspace_path: None,
                host: None,
                port: None,
                api_key: None,
                cors_origins: vec![],
                rate_limit_per_minute: None,
                embedding_model: None,
                embedding_dimensions: None,
                search_mode: None,
                search_backend: None,
                database_url: None,
                auth: AuthSettings::default(),
            },
        }
    }

    fn seed_entry(store: &IndexStore, kb_name: &str, id: &str, title: &str) {
        store
            .with_conn(|conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT OR IGNORE INTO kb (name, path) VALUES (?1, '/tmp')",
                    params![kb_name],
                )?;
                tx.execute(
                    "INSERT INTO entry (id, kb_name, entry_type, title, created_at, updated_at, indexed_at)
                     VALUES (?1, ?2, 'note', ?3, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
                    params![id, kb_name, title],
                )?;
                tx.commit()?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn resolve_batch_splits_cross_kb_targets_from_same_context_targets() {
        let store = IndexStore::open_in_memory().unwrap();
        seed_entry(&store, "A", "local", "Local");
        seed_entry(&store, "A", "other", "Other");
        let config = config_with_shortname("dev", "A");

        let resolved = store
            .with_conn(|conn| {
                let tx = conn.transaction()?;
                let result =
                    resolve_batch(&tx, &config, &["dev:other".to_string(), "local".to_string(), "missing".to_string()], "A")?;
                tx.commit()?;
                Ok(result)
            })
            .unwrap();

        assert_eq!(resolved.get("dev:other"), Some(&true));
        assert_eq!(resolved.get("local"), Some(&true));
        assert_eq!(resolved.get("missing"), Some(&false));
    }

    #[test]
    fn resolve_batch_cross_kb_target_with_no_match_is_false() {
        let store = IndexStore::open_in_memory().unwrap();
        seed_entry(&store, "A", "local", "Local");
        let config = config_with_shortname("dev", "A");

        let resolved = store
            .with_conn(|conn| {
                let tx = conn.transaction()?;
                let result = resolve_batch(&tx, &config, &["dev:nonexistent".to_string()], "A")?;
                tx.commit()?;
                Ok(result)
            })
            .unwrap();

        assert_eq!(resolved.get("dev:nonexistent"), Some(&false));
    }

    #[test]
    fn wikilink_service_resolve_follows_shortname_prefix() {
        let store = IndexStore::open_in_memory().unwrap();
        seed_entry(&store, "A", "other", "Other");
        let config = config_with_shortname("dev", "A");
        let service = WikilinkService::new(&config, &store);

        let resolved = service.resolve("dev:other", "B").unwrap();
        assert_eq!(resolved.map(|e| e.kb_name), Some("A".to_string()));
    }

    #[test]
    fn wikilink_service_wanted_pages_and_autocomplete() {
        let store = IndexStore::open_in_memory().unwrap();
        seed_entry(&store, "A", "existing", "Existing Note");
        store
            .with_conn(|conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO link (source_id, source_kb, target_id, target_kb, relation, note)
                     VALUES ('existing', 'A', 'ghost', 'A', 'wikilink', '')",
                    [],
                )?;
                tx.commit()?;
                Ok(())
            })
            .unwrap();
        let config = config_with_shortname("dev", "A");
        let service = WikilinkService::new(&config, &store);

        let wanted = service.wanted_pages(Some("A"), 10).unwrap();
        assert_eq!(wanted.len(), 1);
        assert_eq!(wanted[0].target_id, "ghost");
        assert_eq!(wanted[0].referenced_by, vec!["existing".to_string()]);

        let titles = service.list_entry_titles(Some("A"), Some("exist"), 10).unwrap();
        assert_eq!(titles.len(), 1);
        assert_eq!(titles[0].id, "existing");
    }
}
