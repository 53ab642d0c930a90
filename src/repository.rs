//! File-level storage for a single KB: load, save, delete, and list entries
//! on disk, independent of the SQLite index.
//!
//! Grounded on kasl's `db::tasks::Tasks` as the shape of a thin struct
//! wrapping a resource handle with CRUD methods, generalized from SQL rows
//! to files on disk. Directory walking is grounded on the `walkdir` usage
//! pattern seen across the example pack's filesystem-facing crates.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::config::KbConfig;
use crate::entry::Entry;
use crate::error::{PyriteError, Result};
use crate::frontmatter::FrontmatterDocument;
use crate::schema::KbSchema;

/// File-backed storage for one KB. Holds the KB's config and an optional
/// schema (absent when the KB has no `kb.yaml`).
pub struct KbRepository {
    pub config: KbConfig,
    pub schema: Option<KbSchema>,
}

impl KbRepository {
    pub fn new(config: KbConfig, schema: Option<KbSchema>) -> Self {
        Self { config, schema }
    }

    pub fn open(config: KbConfig) -> Result<Self> {
        let schema = config.load_schema()?;
        Ok(Self::new(config, schema))
    }

    fn root(&self) -> &Path {
        &self.config.path
    }

    fn infer_subdir(&self, entry_type: &str) -> String {
        self.schema
            .as_ref()
            .map(|s| s.subdir_for(entry_type))
            .unwrap_or_else(|| format!("{entry_type}s"))
    }

    /// Resolves the on-disk path for `id` of kind `entry_type`, even if the
    /// file doesn't exist yet (used by `save` for brand-new entries).
    fn file_path(&self, entry_type: &str, id: &str) -> PathBuf {
        self.root().join(self.infer_subdir(entry_type)).join(format!("{id}.md"))
    }

    /// Finds the actual path for an existing entry `id`, searching every
    /// subdirectory if the type-inferred location doesn't contain it (an
    /// entry may have been moved manually between subdirs on disk).
    #[instrument(skip(self))]
    pub fn find_file(&self, id: &str) -> Option<PathBuf> {
        for entry in WalkDir::new(self.root()).into_iter().filter_map(|e| e.ok()) {
            if is_hidden_or_template(entry.path()) {
                continue;
            }
            if entry.file_type().is_file()
                && entry.path().extension().and_then(|e| e.to_str()) == Some("md")
                && entry.path().file_stem().and_then(|s| s.to_str()) == Some(id)
            {
                return Some(entry.path().to_path_buf());
            }
        }
        None
    }

    pub fn exists(&self, id: &str) -> bool {
        self.find_file(id).is_some()
    }

    #[instrument(skip(self))]
    pub fn load(&self, id: &str) -> Result<Entry> {
        let path = self.find_file(id).ok_or_else(|| PyriteError::EntryNotFound {
            id: id.to_string(),
            kb_name: self.config.name.clone(),
        })?;
        self.load_path(&path)
    }

    fn load_path(&self, path: &Path) -> Result<Entry> {
        let text = std::fs::read_to_string(path)?;
        let doc = FrontmatterDocument::parse(&text)?;
        let id_fallback = path.file_stem().and_then(|s| s.to_str()).unwrap_or("unknown");
        Entry::from_document(&self.config.name, id_fallback, doc)
    }

    /// Writes `entry` to disk, creating parent directories as needed and
    /// refreshing `updated_at` to the current time. Returns
    /// [`PyriteError::KbReadonly`] if the KB is configured read-only.
    #[instrument(skip(self, entry))]
    pub fn save(&self, entry: &mut Entry) -> Result<PathBuf> {
        if self.config.read_only {
            return Err(PyriteError::KbReadonly(self.config.name.clone()));
        }

        let path = self.find_file(&entry.id).unwrap_or_else(|| self.file_path(entry.kind.type_name(), &entry.id));
        entry.updated_at = Utc::now();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let rendered = entry.to_document().render()?;
        std::fs::write(&path, rendered)?;
        debug!(id = %entry.id, kb = %self.config.name, path = %path.display(), "saved entry");
        Ok(path)
    }

    #[instrument(skip(self))]
    pub fn delete(&self, id: &str) -> Result<()> {
        if self.config.read_only {
            return Err(PyriteError::KbReadonly(self.config.name.clone()));
        }
        let path = self.find_file(id).ok_or_else(|| PyriteError::EntryNotFound {
            id: id.to_string(),
            kb_name: self.config.name.clone(),
        })?;
        std::fs::remove_file(&path)?;
        debug!(id, kb = %self.config.name, "deleted entry");
        Ok(())
    }

    /// Every Markdown file in the KB, skipping hidden paths and anything
    /// with "template" in its name — mirrors `list_files` in the original
    /// Python repository.
    pub fn list_files(&self) -> Vec<PathBuf> {
        WalkDir::new(self.root())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("md"))
            .filter(|e| !is_hidden_or_template(e.path()))
            .map(|e| e.path().to_path_buf())
            .collect()
    }

    pub fn list_entries(&self) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        for path in self.list_files() {
            match self.load_path(&path) {
                Ok(entry) => entries.push(entry),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unparseable entry"),
            }
        }
        Ok(entries)
    }

    pub fn count(&self) -> usize {
        self.list_files().len()
    }
}

fn is_hidden_or_template(path: &Path) -> bool {
    path.components().any(|c| {
        let name = c.as_os_str().to_string_lossy();
        name.starts_with('.') || name.to_lowercase().contains("template")
    })
}

/// Read-only view over several KBs at once, used by cross-KB operations
/// like wikilink resolution and the global reconciler sweep.
pub struct MultiKbRepository {
    pub repositories: Vec<KbRepository>,
}

impl MultiKbRepository {
    pub fn new(repositories: Vec<KbRepository>) -> Self {
        Self { repositories }
    }

    pub fn get(&self, kb_name: &str) -> Option<&KbRepository> {
        self.repositories.iter().find(|r| r.config.name == kb_name)
    }
}
