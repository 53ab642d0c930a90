//! KB service: the public write-path facade (spec.md §4.8). Owns
//! validation, hook dispatch, and delegates the mechanical save/delete
//! choreography to [`crate::document_manager::DocumentManager`].
//!
//! Grounded on the original's `KBService.create_entry`/`update_entry`/
//! `delete_entry`/`bulk_create_entries`. The original keeps a separate
//! `WikilinkService` for read-only resolution (kept here too, in
//! `wikilink.rs`) so this module stays focused on the write path, matching
//! SPEC_FULL.md §4's documented split.

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{instrument, warn};

use crate::config::GlobalConfig;
use crate::document_manager::DocumentManager;
use crate::entry::Entry;
use crate::error::{PyriteError, Result};
use crate::frontmatter::FrontmatterDocument;
use crate::hooks::{HookContext, HookRegistry, Operation};
use crate::repository::KbRepository;
use crate::schema::{IssueSeverity, ValidationIssue};
use crate::IndexStore;

/// Result of a successful write, mirroring spec.md §6's
/// `{ok, id, warnings?, qa_issues?}` contract. `warnings` carries
/// non-fatal validation issues (unknown fields under `allow_other`) plus
/// any `after_save` hook failures; `qa_issues` carries informational
/// validation findings computed against the entry's saved state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOutcome {
    pub id: String,
    pub warnings: Vec<ValidationIssue>,
    pub qa_issues: Vec<ValidationIssue>,
}

/// One child spec for [`KbService::bulk_create`] / [`KbService::decompose`]-style
/// batch creation.
#[derive(Debug, Clone)]
pub struct CreateSpec {
    pub id: String,
    pub title: String,
    pub entry_type: String,
    pub body: String,
    pub fields: Map<String, Value>,
}

/// Outcome of one item in a bulk create, isolated from its siblings'
/// failures per spec.md §4.8 ("each item's hook failures are isolated").
#[derive(Debug, Clone)]
pub struct BulkCreateItem {
    pub id: String,
    pub result: std::result::Result<WriteOutcome, String>,
}

/// The write-path facade for one KB.
pub struct KbService<'a> {
    repo: &'a KbRepository,
    store: &'a IndexStore,
    hooks: &'a HookRegistry,
    config: Option<&'a GlobalConfig>,
}

impl<'a> KbService<'a> {
    pub fn new(repo: &'a KbRepository, store: &'a IndexStore, hooks: &'a HookRegistry) -> Self {
        Self { repo, store, hooks, config: None }
    }

    /// Attaches the installation's [`GlobalConfig`] so writes through this
    /// service resolve cross-KB wikilink shortname prefixes (spec.md §4.7
    /// step 1) instead of storing them verbatim.
    pub fn with_config(repo: &'a KbRepository, store: &'a IndexStore, hooks: &'a HookRegistry, config: &'a GlobalConfig) -> Self {
        Self { repo, store, hooks, config: Some(config) }
    }

    fn document_manager(&self) -> DocumentManager<'a> {
        match self.config {
            Some(config) => DocumentManager::with_config(self.store, config),
            None => DocumentManager::new(self.store),
        }
    }

    /// Partitions schema validation issues into hard errors (must abort the
    /// write) and warnings (attached to the success result), per the
    /// severity the schema assigned each issue — `allow_other` downgrades
    /// unknown enum values and undeclared fields to warnings; required and
    /// type-mismatch violations are always errors (spec.md §4.2). When the
    /// KB's `validation.enforce` policy is off, every issue degrades to a
    /// warning instead of aborting the write (spec.md §7: "writes aborted
    /// unless the KB is in non-enforcing mode, in which case they degrade to
    /// warnings").
    fn validate(&self, entry_type: &str, metadata: &Map<String, Value>) -> (Vec<ValidationIssue>, Vec<ValidationIssue>) {
        let Some(schema) = self.repo.schema.as_ref() else { return (Vec::new(), Vec::new()) };
        let issues = schema.validate(entry_type, metadata);
        if !schema.validation.enforce {
            return (Vec::new(), issues);
        }
        issues.into_iter().partition(|issue| issue.severity == IssueSeverity::Error)
    }

    /// Whether this write should attach post-save QA issues to the result:
    /// either the KB's schema declares `qa_on_write`, or the caller asked
    /// for it explicitly (spec.md §4.8 step 7).
    fn qa_issues_for(&self, entry_type: &str, metadata: &Map<String, Value>, requested: bool) -> Vec<ValidationIssue> {
        let Some(schema) = self.repo.schema.as_ref() else { return Vec::new() };
        if requested || schema.validation.qa_on_write {
            schema.validate(entry_type, metadata)
        } else {
            Vec::new()
        }
    }

    /// Creates a new entry (spec.md §4.8 steps 1–7).
    pub fn create_entry(&self, spec: CreateSpec) -> Result<WriteOutcome> {
        self.create_entry_inner(spec, false)
    }

    /// Like [`Self::create_entry`], but always attaches post-save QA issues
    /// regardless of the KB's `qa_on_write` policy — the "caller requested
    /// validation" half of spec.md §4.8 step 7.
    pub fn create_entry_with_qa(&self, spec: CreateSpec) -> Result<WriteOutcome> {
        self.create_entry_inner(spec, true)
    }

    #[instrument(skip(self, spec))]
    fn create_entry_inner(&self, spec: CreateSpec, request_qa: bool) -> Result<WriteOutcome> {
        if self.repo.config.read_only {
            return Err(PyriteError::KbReadonly(self.repo.config.name.clone()));
        }

        let mut metadata = spec.fields;
        metadata.insert("id".to_string(), Value::String(spec.id.clone()));
        metadata.insert("entry_type".to_string(), Value::String(spec.entry_type.clone()));
        metadata.insert("title".to_string(), Value::String(spec.title.clone()));

        let (errors, warnings) = self.validate(&spec.entry_type, &metadata);
        if !errors.is_empty() {
            return Err(PyriteError::ValidationFailed(errors));
        }

        let doc = FrontmatterDocument::new(metadata, spec.body);
        let mut entry = Entry::from_document(&self.repo.config.name, &spec.id, doc)?;
        let now = Utc::now();
        entry.created_at = now;
        entry.updated_at = now;

        self.hooks.run_before_save(&mut entry, &HookContext::new(Operation::Create))?;
        self.document_manager().save_entry(self.repo, &mut entry)?;

        let mut warnings = warnings;
        warnings.extend(self.after_save_warnings(&entry, Operation::Create, None));

        let qa_issues = self.qa_issues_for(entry.kind.type_name(), &entry.metadata, request_qa);

        Ok(WriteOutcome { id: entry.id, warnings, qa_issues })
    }

    /// Updates an existing entry. Loads the prior state, merges `updates`
    /// over its metadata, preserves `created_at`/`created_by`, and bumps
    /// `updated_at` (spec.md §4.8: "update_entry is analogous...preserves
    /// created_*, bumps updated_at").
    pub fn update_entry(&self, id: &str, updates: Map<String, Value>) -> Result<WriteOutcome> {
        self.update_entry_inner(id, updates, false)
    }

    /// Like [`Self::update_entry`], but always attaches post-save QA issues
    /// regardless of the KB's `qa_on_write` policy.
    pub fn update_entry_with_qa(&self, id: &str, updates: Map<String, Value>) -> Result<WriteOutcome> {
        self.update_entry_inner(id, updates, true)
    }

    #[instrument(skip(self, updates))]
    fn update_entry_inner(&self, id: &str, updates: Map<String, Value>, request_qa: bool) -> Result<WriteOutcome> {
        if self.repo.config.read_only {
            return Err(PyriteError::KbReadonly(self.repo.config.name.clone()));
        }

        let old_entry = self.repo.load(id)?;
        let old_status = old_entry.metadata.get("status").and_then(Value::as_str).map(str::to_string);

        let mut metadata = old_entry.metadata.clone();
        for (key, value) in updates {
            metadata.insert(key, value);
        }
        let entry_type = metadata
            .get("entry_type")
            .and_then(Value::as_str)
            .unwrap_or_else(|| old_entry.kind.type_name())
            .to_string();

        let (errors, warnings) = self.validate(&entry_type, &metadata);
        if !errors.is_empty() {
            return Err(PyriteError::ValidationFailed(errors));
        }

        let body = metadata.get("body").and_then(Value::as_str).map(str::to_string).unwrap_or(old_entry.body.clone());
        let doc = FrontmatterDocument::new(metadata, body);
        let mut entry = Entry::from_document(&self.repo.config.name, id, doc)?;
        entry.created_at = old_entry.created_at;
        entry.attribution.created_by = old_entry.attribution.created_by.clone();
        entry.updated_at = Utc::now();

        let ctx = match &old_status {
            Some(status) => HookContext::new(Operation::Update).with_old_status(status.clone()),
            None => HookContext::new(Operation::Update),
        };
        self.hooks.run_before_save(&mut entry, &ctx)?;
        self.document_manager().save_entry(self.repo, &mut entry)?;

        let mut warnings = warnings;
        warnings.extend(self.after_save_warnings(&entry, Operation::Update, old_status.as_deref()));

        let qa_issues = self.qa_issues_for(entry.kind.type_name(), &entry.metadata, request_qa);

        Ok(WriteOutcome { id: entry.id, warnings, qa_issues })
    }

    /// Deletes an entry: repository delete, index delete, then
    /// `after_delete` hooks (spec.md §4.8).
    #[instrument(skip(self))]
    pub fn delete_entry(&self, id: &str) -> Result<bool> {
        if self.repo.config.read_only {
            return Err(PyriteError::KbReadonly(self.repo.config.name.clone()));
        }
        let existed = self.document_manager().delete_entry(self.repo, id, &self.repo.config.name)?;
        for err in self.hooks.run_after_delete(id, &self.repo.config.name, &HookContext::new(Operation::Delete)) {
            warn!(id, kb = %self.repo.config.name, error = %err, "after_delete hook failed");
        }
        Ok(existed)
    }

    /// Creates many entries, isolating each item's failure from the rest
    /// (spec.md §4.8: "per-item success/failure... hook failures are
    /// isolated"). Each item gets its own transaction via `create_entry`
    /// rather than one shared transaction for the whole batch, so a failure
    /// partway through never rolls back siblings that already committed.
    pub fn bulk_create(&self, specs: Vec<CreateSpec>) -> Vec<BulkCreateItem> {
        specs
            .into_iter()
            .map(|spec| {
                let id = spec.id.clone();
                let result = self.create_entry(spec).map_err(|err| err.to_string());
                BulkCreateItem { id, result }
            })
            .collect()
    }

    fn after_save_warnings(&self, entry: &Entry, operation: Operation, old_status: Option<&str>) -> Vec<ValidationIssue> {
        let ctx = match old_status {
            Some(status) => HookContext { operation: Some(operation), old_status: Some(status.to_string()) },
            None => HookContext::new(operation),
        };
        self.hooks
            .run_after_save(entry, &ctx)
            .into_iter()
            .map(|err| ValidationIssue {
                field: "after_save".to_string(),
                rule: "hook_error".to_string(),
                expected: "success".to_string(),
                got: err.to_string(),
                severity: IssueSeverity::Warning,
            })
            .collect()
    }
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

    fn spec(id: &str) -> CreateSpec {
        CreateSpec {
            id: id.to_string(),
            title: "Title".to_string(),
            entry_type: "note".to_string(),
            body: "Body.".to_string(),
            fields: Map::new(),
        }
    }

    #[test]
    fn create_entry_writes_file_and_index() {
        let dir = TempDir::new().unwrap();
        let repository = repo(&dir);
        let store = IndexStore::open_in_memory().unwrap();
        let hooks = HookRegistry::new();
        let service = KbService::new(&repository, &store, &hooks);

        let outcome = service.create_entry(spec("n1")).unwrap();
        assert_eq!(outcome.id, "n1");
        assert!(repository.exists("n1"));
    }

    #[test]
    fn readonly_kb_rejects_create() {
        let dir = TempDir::new().unwrap();
        let mut repository = repo(&dir);
        repository.config.read_only = true;
        let store = IndexStore::open_in_memory().unwrap();
        let hooks = HookRegistry::new();
        let service = KbService::new(&repository, &store, &hooks);

        let result = service.create_entry(spec("n1"));
        assert!(matches!(result, Err(PyriteError::KbReadonly(_))));
    }

    #[test]
    fn update_entry_preserves_created_at() {
        let dir = TempDir::new().unwrap();
        let repository = repo(&dir);
        let store = IndexStore::open_in_memory().unwrap();
        let hooks = HookRegistry::new();
        let service = KbService::new(&repository, &store, &hooks);
        service.create_entry(spec("n1")).unwrap();

        let original = repository.load("n1").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));

        let mut updates = Map::new();
        updates.insert("title".to_string(), Value::String("Updated".to_string()));
        service.update_entry("n1", updates).unwrap();

        let updated = repository.load("n1").unwrap();
        assert_eq!(updated.title, "Updated");
        assert_eq!(updated.created_at.timestamp(), original.created_at.timestamp());
    }

    #[test]
    fn before_save_hook_can_abort_create() {
        let dir = TempDir::new().unwrap();
        let repository = repo(&dir);
        let store = IndexStore::open_in_memory().unwrap();
        let mut hooks = HookRegistry::new();
        hooks.on_before_save(|_entry, _ctx| Err(PyriteError::Other("rejected by policy".to_string())));
        let service = KbService::new(&repository, &store, &hooks);

        let result = service.create_entry(spec("n1"));
        assert!(result.is_err());
        assert!(!repository.exists("n1"));
    }

    #[test]
    fn bulk_create_isolates_failures() {
        let dir = TempDir::new().unwrap();
        let repository = repo(&dir);
        let store = IndexStore::open_in_memory().unwrap();
        let hooks = HookRegistry::new();
        let service = KbService::new(&repository, &store, &hooks);

        let mut bad_fields = Map::new();
        bad_fields.insert("status".to_string(), Value::String("bogus".to_string()));
        let specs = vec![spec("good"), CreateSpec { entry_type: "note".to_string(), ..spec("also-good") }];
        let results = service.bulk_create(specs);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|item| item.result.is_ok()));
    }

    #[test]
    fn delete_entry_removes_file() {
        let dir = TempDir::new().unwrap();
        let repository = repo(&dir);
        let store = IndexStore::open_in_memory().unwrap();
        let hooks = HookRegistry::new();
        let service = KbService::new(&repository, &store, &hooks);
        service.create_entry(spec("n1")).unwrap();

        assert!(service.delete_entry("n1").unwrap());
        assert!(!repository.exists("n1"));
    }

    #[test]
    fn create_entry_with_config_resolves_cross_kb_shortname() {
        use crate::config::{AuthSettings, GlobalConfig, Settings};
        use crate::IndexStore as Store;

        let dir = TempDir::new().unwrap();
        let repository = repo(&dir);
        let store = Store::open_in_memory().unwrap();
        let hooks = HookRegistry::new();
        let config = GlobalConfig {
            version: 1,
            knowledge_bases: vec![crate::config::KbConfig {
                name: "A".to_string(),
                path: dir.path().to_path_buf(),
                kb_type: "general".to_string(),
                description: String::new(),
                read_only: false,
                remote: None,
                repo: None,
                repo_subpath: None,
                shortname: Some("dev".to_string()),
                ephemeral: false,
                ttl: None,
                created_at_ts: None,
            }],
            repositories: vec![],
            subscriptions: vec![],
            settings: Settings {
                index_path: dir.path().join("index.db"),
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
        };
        let service = KbService::with_config(&repository, &store, &hooks, &config);

        let mut s = spec("n1");
        s.body = "see [[dev:other]]".to_string();
        service.create_entry(s).unwrap();

        store
            .with_conn(|conn| {
                let tx = conn.transaction().unwrap();
                let target_kb: String =
                    tx.query_row("SELECT target_kb FROM link WHERE source_id = 'n1'", [], |r| r.get(0)).unwrap();
                assert_eq!(target_kb, "A");
                Ok(())
            })
            .unwrap();
    }

    fn schema_with(qa_on_write: bool, enforce: bool) -> crate::schema::KbSchema {
        use crate::schema::{FieldDef, TypeDef, ValidationPolicy};
        crate::schema::KbSchema {
            name: Some("kb1".to_string()),
            description: String::new(),
            policies: std::collections::HashMap::new(),
            validation: ValidationPolicy { enforce, qa_on_write, rules: vec![] },
            types: vec![TypeDef {
                name: "note".to_string(),
                subdir: None,
                allow_other: true,
                fields: vec![FieldDef {
                    name: "status".to_string(),
                    field_type: "string".to_string(),
                    required: true,
                    default: None,
                    enum_values: None,
                    range: None,
                    pattern: None,
                    target_type: None,
                    description: String::new(),
                }],
            }],
        }
    }

    #[test]
    fn qa_on_write_attaches_qa_issues() {
        let dir = TempDir::new().unwrap();
        let repository = KbRepository::new(
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
            Some(schema_with(true, false)),
        );
        let store = IndexStore::open_in_memory().unwrap();
        let hooks = HookRegistry::new();
        let service = KbService::new(&repository, &store, &hooks);

        let outcome = service.create_entry(spec("n1")).unwrap();
        assert!(!outcome.qa_issues.is_empty(), "missing required `status` field should surface as a QA issue");
    }

    #[test]
    fn qa_on_write_off_leaves_qa_issues_empty_unless_requested() {
        let dir = TempDir::new().unwrap();
        let repository = KbRepository::new(
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
            Some(schema_with(false, false)),
        );
        let store = IndexStore::open_in_memory().unwrap();
        let hooks = HookRegistry::new();
        let service = KbService::new(&repository, &store, &hooks);

        let outcome = service.create_entry(spec("n1")).unwrap();
        assert!(outcome.qa_issues.is_empty());

        let outcome = service.create_entry_with_qa(spec("n2")).unwrap();
        assert!(!outcome.qa_issues.is_empty());
    }

    #[test]
    fn non_enforcing_kb_degrades_validation_errors_to_warnings() {
        let dir = TempDir::new().unwrap();
        let repository = KbRepository::new(
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
            Some(schema_with(false, false)),
        );
        let store = IndexStore::open_in_memory().unwrap();
        let hooks = HookRegistry::new();
        let service = KbService::new(&repository, &store, &hooks);

        // `status` is required but `spec("n1")` never sets it; a non-enforcing
        // KB accepts the write anyway and reports the violation as a warning.
        let outcome = service.create_entry(spec("n1")).unwrap();
        assert!(outcome.warnings.iter().any(|w| w.field == "status" && w.rule == "required"));
    }
}
