//! Configuration types for KBs and the global Pyrite installation.
//!
//! Kasl's [`crate::config`]-equivalent (`libs::config::Config`) is loaded as
//! a process-wide singleton from a platform data directory. The design notes
//! for this rewrite explicitly reject that shape for the core: constructors
//! take a config value or handle explicitly instead. What survives from the
//! teacher is the serde-derived struct shape and JSON-on-disk convention;
//! only the plugin hook registry and the migration-version sentinel remain
//! process-wide state (see `hooks.rs` and `db::migrations`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::Result;
use crate::schema::KbSchema;

/// One entry in the global `knowledge_bases` list (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbConfig {
    pub name: String,
    pub path: PathBuf,
    pub kb_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub remote: Option<String>,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub repo_subpath: Option<String>,
    #[serde(default)]
    pub shortname: Option<String>,
    #[serde(default)]
    pub ephemeral: bool,
    /// Seconds the KB is valid for past `created_at_ts`, when `ephemeral`.
    #[serde(default)]
    pub ttl: Option<i64>,
    /// Unix timestamp the KB was registered at, when `ephemeral`.
    #[serde(default)]
    pub created_at_ts: Option<i64>,
}

impl KbConfig {
    /// Whether an ephemeral KB has outlived its TTL relative to `now`.
    pub fn is_expired(&self, now_ts: i64) -> bool {
        match (self.ephemeral, self.ttl, self.created_at_ts) {
            (true, Some(ttl), Some(created)) => now_ts >= created + ttl,
            _ => false,
        }
    }

    /// In-memory schema attached to this KB, loaded from `kb.yaml` at the
    /// KB root via [`KbSchema::load`]. Returns `None` if no schema file
    /// exists (a KB may have no declared types; everything falls through
    /// to the generic entry variant).
    pub fn load_schema(&self) -> Result<Option<KbSchema>> {
        let schema_path = self.path.join("kb.yaml");
        if !schema_path.exists() {
            return Ok(None);
        }
        Ok(Some(KbSchema::load(&schema_path)?))
    }
}

/// Sub-object of [`Settings`] mirroring spec.md §6's `auth` key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub provider: Option<String>,
}

/// Global installation settings (spec.md §6 `settings` key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub index_path: PathBuf,
    #[serde(default)]
    pub workspace_path: Option<PathBuf>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    #[serde(default)]
    pub rate_limit_per_minute: Option<u32>,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub embedding_dimensions: Option<u32>,
    #[serde(default)]
    pub search_mode: Option<String>,
    #[serde(default)]
    pub search_backend: Option<String>,
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default)]
    pub auth: AuthSettings,
}

/// The full global configuration (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub version: u32,
    pub knowledge_bases: Vec<KbConfig>,
    #[serde(default)]
    pub repositories: Vec<serde_json::Value>,
    #[serde(default)]
    pub subscriptions: Vec<serde_json::Value>,
    pub settings: Settings,
}

impl GlobalConfig {
    /// Loads configuration from a JSON file at `path`.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Serializes configuration to `path` as pretty-printed JSON.
    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Looks up a KB by its exact `name`.
    pub fn get_kb(&self, name: &str) -> Option<&KbConfig> {
        self.knowledge_bases.iter().find(|kb| kb.name == name)
    }

    /// Looks up a KB by `shortname`, used for cross-KB wikilink prefixes.
    pub fn get_kb_by_shortname(&self, shortname: &str) -> Option<&KbConfig> {
        self.knowledge_bases
            .iter()
            .find(|kb| kb.shortname.as_deref() == Some(shortname))
    }

    /// KBs whose TTL has expired as of `now_ts`, for garbage collection.
    pub fn expired_kbs(&self, now_ts: i64) -> Vec<&KbConfig> {
        self.knowledge_bases.iter().filter(|kb| kb.is_expired(now_ts)).collect()
    }
}

/// `github_auth` is stored in a sibling file with `0600` permissions per
/// spec.md §6, kept separate from the main config so it's never serialized
/// alongside it by accident.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GithubAuth {
    pub token: Option<String>,
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl GithubAuth {
    #[cfg(unix)]
    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn load(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}
