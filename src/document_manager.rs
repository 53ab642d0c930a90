//! Write-path orchestration: save file → register KB → upsert index
//! (spec.md §4.8 step 5, §2's "Document manager" component).
//!
//! Grounded on the original's `DocumentManager`, which consolidates the
//! repeated save-register-index pattern out of `KBService`. This crate
//! keeps that split for the same reason: `service.rs` owns validation and
//! hooks, `document_manager.rs` owns the mechanical file+index choreography
//! underneath it.

use std::path::PathBuf;

use tracing::{instrument, warn};

use crate::config::GlobalConfig;
use crate::db::{entries, kb as kb_table};
use crate::entry::Entry;
use crate::error::Result;
use crate::repository::KbRepository;
use crate::IndexStore;

/// Coordinates one KB's file storage with the shared index.
pub struct DocumentManager<'a> {
    store: &'a IndexStore,
    config: Option<&'a GlobalConfig>,
}

impl<'a> DocumentManager<'a> {
    pub fn new(store: &'a IndexStore) -> Self {
        Self { store, config: None }
    }

    /// Attaches the installation's [`GlobalConfig`] so cross-KB wikilink
    /// `kb:` prefixes resolve shortnames to full KB names on write
    /// (spec.md §4.7 step 1).
    pub fn with_config(store: &'a IndexStore, config: &'a GlobalConfig) -> Self {
        Self { store, config: Some(config) }
    }

    /// Writes `entry` to disk via `repo`, registers the KB row, and upserts
    /// the index — all as described in spec.md §5's ordering guarantee
    /// (`file-write → index-upsert → derived-sync`). If the index step
    /// fails, the just-written file is removed so the filesystem and index
    /// never disagree (spec.md §4.8 step 5: "on index failure, delete the
    /// file").
    #[instrument(skip(self, repo, entry))]
    pub fn save_entry(&self, repo: &KbRepository, entry: &mut Entry) -> Result<PathBuf> {
        let path = repo.save(entry)?;

        let index_result = self.store.with_conn(|conn| {
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
            entries::upsert_entry(&tx, entry, Some(&path.to_string_lossy()), repo.schema.as_ref(), self.config)?;
            tx.commit()?;
            Ok(())
        });

        if let Err(err) = index_result {
            warn!(id = %entry.id, kb = %entry.kb_name, error = %err, "index upsert failed, removing written file");
            let _ = std::fs::remove_file(&path);
            return Err(err);
        }

        Ok(path)
    }

    /// Indexes an already-written file without touching disk, used by the
    /// reconciler when reindexing files it didn't just create.
    #[instrument(skip(self, repo, entry))]
    pub fn index_entry(&self, repo: &KbRepository, entry: &Entry, file_path: &std::path::Path) -> Result<()> {
        self.store.with_conn(|conn| {
            let tx = conn.transaction()?;
            entries::upsert_entry(&tx, entry, Some(&file_path.to_string_lossy()), repo.schema.as_ref(), self.config)?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Deletes `id`'s file (if present) and its index row, in that order.
    /// Returns whether the file existed.
    #[instrument(skip(self, repo))]
    pub fn delete_entry(&self, repo: &KbRepository, id: &str, kb_name: &str) -> Result<bool> {
        let file_existed = repo.find_file(id).is_some();
        if file_existed {
            repo.delete(id)?;
        }
        self.store.with_conn(|conn| {
            let tx = conn.transaction()?;
            entries::delete_entry(&tx, id, kb_name)?;
            tx.commit()?;
            Ok(())
        })?;
        Ok(file_existed)
    }
}
