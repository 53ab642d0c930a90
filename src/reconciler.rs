//! Full/incremental index reconciliation, health checks, and
//! git-attribution indexing (spec.md §4.9).
//!
//! Grounded on the original's `IndexManager`: `index_kb`/`index_all` (full
//! reindex), `sync_incremental` (added/updated/removed classification),
//! `check_health` (missing/unindexed/stale), and `index_with_attribution`
//! (per-commit `entry_version` population with first/last-commit
//! created_by/modified_by). The original takes a duck-typed `git_service`;
//! this crate models that seam as [`GitLogSource`], per SPEC_FULL.md §4.9.

use std::collections::HashMap;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tracing::{error, warn};

use crate::config::GlobalConfig;
use crate::db::versions::CommitInfo;
use crate::db::{entries, kb as kb_table, versions};
use crate::document_manager::DocumentManager;
use crate::error::Result;
use crate::repository::KbRepository;
use crate::IndexStore;

/// Outcome of [`reindex_kb`]: count of entries successfully indexed and how
/// many individual files failed (logged, not propagated, per spec.md §4.9).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReindexStats {
    pub indexed: usize,
    pub errors: usize,
}

/// Fully reindexes one KB: registers the KB row, walks every file, upserts
/// each, then records the resulting entry count (spec.md §4.9 "full
/// reindex"). `config` resolves cross-KB wikilink shortname prefixes when
/// given; pass `None` for a single-KB reindex.
pub fn reindex_kb(store: &IndexStore, repo: &KbRepository, config: Option<&GlobalConfig>) -> Result<ReindexStats> {
    let manager = document_manager(store, config);
    let mut stats = ReindexStats::default();

    store.with_conn(|conn| {
        let tx = conn.transaction()?;
        kb_table::register_kb(
            &tx,
            &repo.config.name,
            &repo.config.kb_type,
            &repo.config.path.to_string_lossy(),
            &repo.config.description,
            repo.config.read_only,
            repo.config.shortname.as_deref(),
        )?;
        tx.commit()?;
        Ok(())
    })?;

    for path in repo.list_files() {
        match load_entry(repo, &path) {
            Ok(entry) => match manager.index_entry(repo, &entry, &path) {
                Ok(()) => stats.indexed += 1,
                Err(err) => {
                    error!(path = %path.display(), error = %err, "failed to index entry");
                    stats.errors += 1;
                }
            },
            Err(err) => {
                error!(path = %path.display(), error = %err, "failed to parse entry");
                stats.errors += 1;
            }
        }
    }

    store.with_conn(|conn| {
        let tx = conn.transaction()?;
        kb_table::mark_indexed(&tx, &repo.config.name, stats.indexed, Utc::now())?;
        tx.commit()?;
        Ok(())
    })?;

    Ok(stats)
}

/// Result of [`sync_incremental`]: spec.md §4.9's added/updated/removed
/// counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

/// Walks `repo`'s files, classifying each against the current index state
/// as added/updated/unchanged, then removes index rows for ids no longer
/// present on disk (spec.md §4.9 "incremental sync").
///
/// Staleness is judged in UTC (spec.md: "a naive comparison is forbidden");
/// `file_mtime_utc` converts `SystemTime` to `DateTime<Utc>` for the
/// comparison against the stored `indexed_at`.
pub fn sync_incremental(store: &IndexStore, repo: &KbRepository, config: Option<&GlobalConfig>) -> Result<SyncStats> {
    let manager = document_manager(store, config);
    let mut stats = SyncStats::default();

    store.with_conn(|conn| {
        let tx = conn.transaction()?;
        kb_table::register_kb(
            &tx,
            &repo.config.name,
            &repo.config.kb_type,
            &repo.config.path.to_string_lossy(),
            &repo.config.description,
            repo.config.read_only,
            repo.config.shortname.as_deref(),
        )?;
        tx.commit()?;
        Ok(())
    })?;

    let indexed: HashMap<String, DateTime<Utc>> = store.with_conn(|conn| {
        let tx = conn.transaction()?;
        let rows = entries::entries_for_indexing(&tx, &repo.config.name)?;
        tx.commit()?;
        Ok(rows.into_iter().map(|r| (r.id, r.indexed_at)).collect())
    })?;

    let mut seen_ids = std::collections::HashSet::new();

    for path in repo.list_files() {
        let entry = match load_entry(repo, &path) {
            Ok(e) => e,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unparseable file during sync");
                continue;
            }
        };
        seen_ids.insert(entry.id.clone());

        match indexed.get(&entry.id) {
            None => {
                manager.index_entry(repo, &entry, &path)?;
                stats.added += 1;
            }
            Some(indexed_at) => {
                if let Some(mtime) = file_mtime_utc(&path) {
                    if mtime > *indexed_at {
                        manager.index_entry(repo, &entry, &path)?;
                        stats.updated += 1;
                    }
                }
            }
        }
    }

    for id in indexed.keys() {
        if !seen_ids.contains(id) {
            store.with_conn(|conn| {
                let tx = conn.transaction()?;
                entries::delete_entry(&tx, id, &repo.config.name)?;
                tx.commit()?;
                Ok(())
            })?;
            stats.removed += 1;
        }
    }

    store.with_conn(|conn| {
        let tx = conn.transaction()?;
        kb_table::mark_indexed(&tx, &repo.config.name, seen_ids.len(), Utc::now())?;
        tx.commit()?;
        Ok(())
    })?;

    Ok(stats)
}

fn document_manager<'a>(store: &'a IndexStore, config: Option<&'a GlobalConfig>) -> DocumentManager<'a> {
    match config {
        Some(config) => DocumentManager::with_config(store, config),
        None => DocumentManager::new(store),
    }
}

fn file_mtime_utc(path: &std::path::Path) -> Option<DateTime<Utc>> {
    let mtime: SystemTime = path.metadata().ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(mtime))
}

fn load_entry(repo: &KbRepository, path: &std::path::Path) -> Result<crate::entry::Entry> {
    let text = std::fs::read_to_string(path)?;
    let doc = crate::frontmatter::FrontmatterDocument::parse(&text)?;
    let id_fallback = path.file_stem().and_then(|s| s.to_str()).unwrap_or("unknown");
    crate::entry::Entry::from_document(&repo.config.name, id_fallback, doc)
}

/// One entry reported by [`check_health`] as missing its backing file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingFile {
    pub id: String,
    pub file_path: Option<String>,
}

/// One file on disk with no matching index row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnindexedFile {
    pub id: String,
    pub path: String,
}

/// One entry whose file is newer than its index row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleEntry {
    pub id: String,
    pub file_mtime: DateTime<Utc>,
    pub indexed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    pub missing_files: Vec<MissingFile>,
    pub unindexed_files: Vec<UnindexedFile>,
    pub stale_entries: Vec<StaleEntry>,
}

/// Compares the index against the filesystem without mutating either
/// (spec.md §4.9 "health check").
pub fn check_health(store: &IndexStore, repo: &KbRepository) -> Result<HealthReport> {
    let mut report = HealthReport::default();

    let indexed: HashMap<String, (Option<String>, DateTime<Utc>)> = store.with_conn(|conn| {
        let tx = conn.transaction()?;
        let rows = entries::entries_for_indexing(&tx, &repo.config.name)?;
        tx.commit()?;
        Ok(rows.into_iter().map(|r| (r.id, (r.file_path, r.indexed_at))).collect())
    })?;

    let mut seen_ids = std::collections::HashSet::new();

    for path in repo.list_files() {
        let entry = match load_entry(repo, &path) {
            Ok(e) => e,
            Err(_) => continue,
        };
        seen_ids.insert(entry.id.clone());

        match indexed.get(&entry.id) {
            None => {
                report.unindexed_files.push(UnindexedFile { id: entry.id, path: path.to_string_lossy().to_string() });
            }
            Some((_, indexed_at)) => {
                if let Some(mtime) = file_mtime_utc(&path) {
                    if mtime > *indexed_at {
                        report.stale_entries.push(StaleEntry { id: entry.id, file_mtime: mtime, indexed_at: *indexed_at });
                    }
                }
            }
        }
    }

    for (id, (file_path, _)) in &indexed {
        if !seen_ids.contains(id) {
            report.missing_files.push(MissingFile { id: id.clone(), file_path: file_path.clone() });
        }
    }

    Ok(report)
}

/// Deregisters every KB in `config` whose TTL has expired as of `now_ts`
/// (spec.md §3 "Lifecycles": "Ephemeral KBs expire after `ttl` seconds past
/// `created_at_ts`; garbage collection deregisters them and removes their
/// index rows."). Each KB's `kb` row is deleted, cascading via foreign keys
/// to every entry (and its tag/source/link/ref/block/version rows)
/// registered under it; the KB's files on disk are untouched. Returns the
/// names of the KBs that were collected.
pub fn gc_expired_kbs(store: &IndexStore, config: &GlobalConfig, now_ts: i64) -> Result<Vec<String>> {
    let expired: Vec<String> = config.expired_kbs(now_ts).into_iter().map(|kb| kb.name.clone()).collect();

    store.with_conn(|conn| {
        let tx = conn.transaction()?;
        for name in &expired {
            kb_table::deregister_kb(&tx, name)?;
        }
        tx.commit()?;
        Ok(())
    })?;

    Ok(expired)
}

/// Seam for the external git-attribution fetcher (spec.md §1 Non-goals,
/// §4.9: "the reconciler only needs the seam"). Implemented by an external
/// collaborator; the reconciler never shells out to git itself.
pub trait GitLogSource {
    fn is_git_repo(&self, kb_root: &std::path::Path) -> bool;
    fn file_log(&self, kb_root: &std::path::Path, rel_path: &std::path::Path) -> Vec<CommitInfo>;
}

/// Reindexes `repo` and, for each file, records its commit history via
/// `git_log` — first commit (oldest) sets `created_by`, last commit
/// (newest) sets `modified_by` (spec.md §4.9 "attribution indexing").
pub fn index_with_attribution(
    store: &IndexStore,
    repo: &KbRepository,
    git_log: &dyn GitLogSource,
    config: Option<&GlobalConfig>,
) -> Result<ReindexStats> {
    let manager = document_manager(store, config);
    let mut stats = ReindexStats::default();

    store.with_conn(|conn| {
        let tx = conn.transaction()?;
        kb_table::register_kb(
            &tx,
            &repo.config.name,
            &repo.config.kb_type,
            &repo.config.path.to_string_lossy(),
            &repo.config.description,
            repo.config.read_only,
            repo.config.shortname.as_deref(),
        )?;
        tx.commit()?;
        Ok(())
    })?;

    let is_git = git_log.is_git_repo(&repo.config.path);

    for path in repo.list_files() {
        let mut entry = match load_entry(repo, &path) {
            Ok(e) => e,
            Err(err) => {
                error!(path = %path.display(), error = %err, "failed to parse entry");
                stats.errors += 1;
                continue;
            }
        };

        let commits = if is_git {
            let rel_path = path.strip_prefix(&repo.config.path).unwrap_or(&path);
            git_log.file_log(&repo.config.path, rel_path)
        } else {
            Vec::new()
        };

        if let Some(first) = commits.first() {
            entry.attribution.modified_by = first.author_name.clone();
        }
        if let Some(last) = commits.last() {
            entry.attribution.created_by = last.author_name.clone();
        }

        if let Err(err) = manager.index_entry(repo, &entry, &path) {
            error!(path = %path.display(), error = %err, "failed to index entry");
            stats.errors += 1;
            continue;
        }
        stats.indexed += 1;

        store.with_conn(|conn| {
            let tx = conn.transaction()?;
            for (i, commit) in commits.iter().enumerate() {
                let change_type = if i == commits.len() - 1 { "created" } else { "modified" };
                versions::insert_version(&tx, &entry.id, &entry.kb_name, commit, change_type)?;
            }
            tx.commit()?;
            Ok(())
        })?;
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KbConfig;
    use tempfile::TempDir;

    fn repo(dir: &TempDir) -> KbRepository {
        KbRepository::new(
            KbConfig {
                name: "kb1".to_string(),
                path: dir.path().to_path_buf(),
                kb_type: "general".to_string(),
                description: String::new(),
                read_only: false,
                remote: None,
                repo: None,
                repo_subpath: None,
                shortname: None,
                ephemeral: false,
                ttl: None,
                created_at_ts: None,
            },
            None,
        )
    }

    fn write_file(dir: &TempDir, rel: &str, contents: &str) {
        let path = dir.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn reindex_kb_indexes_every_file() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "notes/a.md", "---\nentry_type: note\ntitle: A\n---\n\nBody A.\n");
        write_file(&dir, "notes/b.md", "---\nentry_type: note\ntitle: B\n---\n\nBody B.\n");
        let repository = repo(&dir);
        let store = IndexStore::open_in_memory().unwrap();

        let stats = reindex_kb(&store, &repository, None).unwrap();
        assert_eq!(stats.indexed, 2);
        assert_eq!(stats.errors, 0);
    }

    #[test]
    fn sync_incremental_reports_external_edit() {
        let dir = TempDir::new().unwrap();
        let repository = repo(&dir);
        let store = IndexStore::open_in_memory().unwrap();
        reindex_kb(&store, &repository, None).unwrap();

        write_file(&dir, "notes/manual-entry.md", "---\nentry_type: note\nid: manual-entry\ntitle: Manual\n---\n\nEdited manually.\n");
        let stats = sync_incremental(&store, &repository, None).unwrap();
        assert_eq!(stats.added, 1);
    }

    #[test]
    fn sync_incremental_removes_deleted_files() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "notes/a.md", "---\nentry_type: note\nid: a\ntitle: A\n---\n\nBody.\n");
        let repository = repo(&dir);
        let store = IndexStore::open_in_memory().unwrap();
        sync_incremental(&store, &repository, None).unwrap();

        std::fs::remove_file(dir.path().join("notes/a.md")).unwrap();
        let stats = sync_incremental(&store, &repository, None).unwrap();
        assert_eq!(stats.removed, 1);
    }

    #[test]
    fn health_check_flags_unindexed_file() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "notes/a.md", "---\nentry_type: note\nid: a\ntitle: A\n---\n\nBody.\n");
        let repository = repo(&dir);
        let store = IndexStore::open_in_memory().unwrap();

        let report = check_health(&store, &repository).unwrap();
        assert_eq!(report.unindexed_files.len(), 1);
        assert_eq!(report.unindexed_files[0].id, "a");
    }

    #[test]
    fn health_check_flags_missing_file() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "notes/a.md", "---\nentry_type: note\nid: a\ntitle: A\n---\n\nBody.\n");
        let repository = repo(&dir);
        let store = IndexStore::open_in_memory().unwrap();
        reindex_kb(&store, &repository, None).unwrap();
        std::fs::remove_file(dir.path().join("notes/a.md")).unwrap();

        let report = check_health(&store, &repository).unwrap();
        assert_eq!(report.missing_files.len(), 1);
        assert_eq!(report.missing_files[0].id, "a");
    }

    struct FakeGitLog {
        commits: Vec<CommitInfo>,
    }

    impl GitLogSource for FakeGitLog {
        fn is_git_repo(&self, _kb_root: &std::path::Path) -> bool {
            true
        }
        fn file_log(&self, _kb_root: &std::path::Path, _rel_path: &std::path::Path) -> Vec<CommitInfo> {
            self.commits.clone()
        }
    }

    #[test]
    fn attribution_indexing_sets_created_and_modified_by() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "notes/a.md", "---\nentry_type: note\nid: a\ntitle: A\n---\n\nBody.\n");
        let repository = repo(&dir);
        let store = IndexStore::open_in_memory().unwrap();

        let git_log = FakeGitLog {
            commits: vec![
                CommitInfo { hash: "c2".to_string(), author_name: Some("bob".to_string()), author_email: None, date: Utc::now(), message: None },
                CommitInfo { hash: "c1".to_string(), author_name: Some("alice".to_string()), author_email: None, date: Utc::now() - chrono::Duration::days(1), message: None },
            ],
        };

        index_with_attribution(&store, &repository, &git_log, None).unwrap();

        store
            .with_conn(|conn| {
                let tx = conn.transaction().unwrap();
                let row = entries::get_entry(&tx, "a", "kb1").unwrap().unwrap();
                assert_eq!(row.created_by.as_deref(), Some("alice"));
                assert_eq!(row.modified_by.as_deref(), Some("bob"));
                Ok(())
            })
            .unwrap();
    }

    fn kb_config(name: &str, ephemeral: bool, ttl: Option<i64>, created_at_ts: Option<i64>) -> KbConfig {
        KbConfig {
            name: name.to_string(),
            path: std::path::PathBuf::from("/tmp/does-not-matter"),
            kb_type: "general".to_string(),
            description: String::new(),
            read_only: false,
            remote: None,
            repo: None,
            repo_subpath: None,
            shortname: None,
            ephemeral,
            ttl,
            created_at_ts,
        }
    }

    fn global_config(kbs: Vec<KbConfig>) -> crate::config::GlobalConfig {
        use crate::config::{AuthSettings, Settings};
        crate::config::GlobalConfig {
            version: 1,
            knowledge_bases: kbs,
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

    #[test]
    fn gc_expired_kbs_removes_only_expired_kb_and_its_entries() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "notes/a.md", "---\nentry_type: note\nid: a\ntitle: A\n---\n\nBody.\n");
        let mut repository = repo(&dir);
        repository.config.name = "expiring".to_string();
        let store = IndexStore::open_in_memory().unwrap();
        reindex_kb(&store, &repository, None).unwrap();

        store
            .with_conn(|conn| {
                let tx = conn.transaction().unwrap();
                kb_table::register_kb(&tx, "keeper", "general", "/tmp/keeper", "", false, None).unwrap();
                tx.commit().unwrap();
                Ok(())
            })
            .unwrap();

        let config = global_config(vec![
            kb_config("expiring", true, Some(60), Some(1_000)),
            kb_config("keeper", true, Some(60), Some(10_000_000)),
        ]);

        let collected = gc_expired_kbs(&store, &config, 2_000).unwrap();
        assert_eq!(collected, vec!["expiring".to_string()]);

        store
            .with_conn(|conn| {
                let tx = conn.transaction().unwrap();
                assert!(kb_table::get_kb(&tx, "expiring").unwrap().is_none());
                assert!(kb_table::get_kb(&tx, "keeper").unwrap().is_some());
                let count: i64 = tx.query_row("SELECT COUNT(*) FROM entry WHERE kb_name = 'expiring'", [], |r| r.get(0)).unwrap();
                assert_eq!(count, 0);
                Ok(())
            })
            .unwrap();

        assert!(dir.path().join("notes/a.md").exists());
    }
}
