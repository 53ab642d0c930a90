//! The in-memory entry model: one Markdown+frontmatter file, typed by kind.
//!
//! Grounded on kasl's `libs::task::Task` as the shape of "plain data struct
//! plus a filter enum for queries" but generalized from a single concrete
//! struct to a tagged union over the entry kinds spec.md §5 names, since a
//! KB can hold more than one type of thing in the same index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{PyriteError, Result};
use crate::frontmatter::FrontmatterDocument;

/// A reference to a source document backing a claim (spec.md §5).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub note: Option<String>,
}

/// A typed link from one entry to another, distinct from inline wikilinks
/// (spec.md §5's `links` metadata array, e.g. `{target, relation}`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Link {
    pub target: String,
    #[serde(default)]
    pub target_kb: Option<String>,
    #[serde(default)]
    pub relation: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// Created-by/modified-by attribution, populated from git history by the
/// reconciler's attribution pass (spec.md §7).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Attribution {
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub modified_by: Option<String>,
}

/// Per-kind fields that don't fit the common entry envelope. Every variant
/// still has its raw fields mirrored in `Entry::metadata` so lookups that go
/// through the generic JSON map (wikilink resolution, derived-table sync)
/// don't need to match on kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "entry_type", rename_all = "snake_case")]
pub enum EntryKind {
    Note,
    Event {
        #[serde(default)]
        date: Option<String>,
        #[serde(default)]
        importance: Option<i64>,
    },
    Person,
    Org,
    Task {
        #[serde(default)]
        status: String,
        #[serde(default)]
        assignee: Option<String>,
        #[serde(default)]
        parent_task: Option<String>,
        #[serde(default)]
        dependencies: Vec<String>,
        #[serde(default)]
        evidence: Vec<String>,
        #[serde(default)]
        priority: Option<i64>,
        #[serde(default)]
        due_date: Option<String>,
        #[serde(default)]
        agent_context: Map<String, Value>,
    },
    Collection,
    QaAssessment,
    /// Any `entry_type` not in the built-in set. The KB schema may still
    /// declare fields for it; everything lives in `Entry::metadata`.
    Generic { entry_type: String },
}

impl EntryKind {
    pub fn type_name(&self) -> &str {
        match self {
            EntryKind::Note => "note",
            EntryKind::Event { .. } => "event",
            EntryKind::Person => "person",
            EntryKind::Org => "org",
            EntryKind::Task { .. } => "task",
            EntryKind::Collection => "collection",
            EntryKind::QaAssessment => "qa_assessment",
            EntryKind::Generic { entry_type } => entry_type,
        }
    }

    /// Builds the kind-specific fields from a generic metadata map, used
    /// when materializing an [`Entry`] from a parsed frontmatter document.
    fn from_metadata(entry_type: &str, metadata: &Map<String, Value>) -> Self {
        match entry_type {
            "note" => EntryKind::Note,
            "person" => EntryKind::Person,
            "org" => EntryKind::Org,
            "collection" => EntryKind::Collection,
            "qa_assessment" => EntryKind::QaAssessment,
            "event" => EntryKind::Event {
                date: str_field(metadata, "date"),
                importance: metadata.get("importance").and_then(Value::as_i64),
            },
            "task" => EntryKind::Task {
                status: str_field(metadata, "status").unwrap_or_else(|| "open".to_string()),
                assignee: str_field(metadata, "assignee"),
                parent_task: str_field(metadata, "parent_task"),
                dependencies: str_array_field(metadata, "dependencies"),
                evidence: str_array_field(metadata, "evidence"),
                priority: metadata.get("priority").and_then(Value::as_i64),
                due_date: str_field(metadata, "due_date"),
                agent_context: metadata
                    .get("agent_context")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default(),
            },
            other => EntryKind::Generic { entry_type: other.to_string() },
        }
    }
}

fn str_field(metadata: &Map<String, Value>, key: &str) -> Option<String> {
    metadata.get(key).and_then(Value::as_str).map(str::to_string)
}

fn str_array_field(metadata: &Map<String, Value>, key: &str) -> Vec<String> {
    metadata
        .get(key)
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

/// A single KB entry: the common envelope plus whatever kind-specific
/// fields apply, the raw metadata map (source of truth for round-tripping
/// unknown fields back to disk), and the Markdown body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entry {
    pub id: String,
    pub kb_name: String,
    pub title: String,
    pub kind: EntryKind,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub attribution: Attribution,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Full metadata map as read from/written to frontmatter, including
    /// any fields the schema doesn't know about (`allow_other`).
    pub metadata: Map<String, Value>,
    pub body: String,
}

impl Entry {
    /// Builds an `Entry` from a parsed frontmatter document plus the
    /// `kb_name` it was loaded from. `id` falls back to the filename stem
    /// if the frontmatter has no explicit `id` field.
    pub fn from_document(kb_name: &str, id_fallback: &str, doc: FrontmatterDocument) -> Result<Self> {
        let metadata = doc.metadata;
        let id = str_field(&metadata, "id").unwrap_or_else(|| id_fallback.to_string());
        let entry_type = str_field(&metadata, "entry_type").unwrap_or_else(|| "note".to_string());
        let title = str_field(&metadata, "title")
            .or_else(|| first_heading(&doc.body))
            .unwrap_or_else(|| id.clone());

        let created_at = metadata
            .get("created_at")
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now);
        let updated_at = metadata
            .get("updated_at")
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
            .unwrap_or(created_at);

        let sources = metadata
            .get("sources")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(PyriteError::Json)?
            .unwrap_or_default();
        let links = metadata
            .get("links")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(PyriteError::Json)?
            .unwrap_or_default();
        let attribution = metadata
            .get("attribution")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(PyriteError::Json)?
            .unwrap_or_default();

        Ok(Entry {
            id,
            kb_name: kb_name.to_string(),
            title,
            kind: EntryKind::from_metadata(&entry_type, &metadata),
            tags: str_array_field(&metadata, "tags"),
            aliases: str_array_field(&metadata, "aliases"),
            sources,
            links,
            attribution,
            created_at,
            updated_at,
            metadata,
            body: doc.body,
        })
    }

    /// Serializes this entry back into a frontmatter document, merging the
    /// typed fields into `metadata` so round-tripped writes stay consistent
    /// even if a caller mutated `kind` without touching the raw map.
    pub fn to_document(&self) -> FrontmatterDocument {
        let mut metadata = self.metadata.clone();
        metadata.insert("id".to_string(), Value::String(self.id.clone()));
        metadata.insert("entry_type".to_string(), Value::String(self.kind.type_name().to_string()));
        metadata.insert("title".to_string(), Value::String(self.title.clone()));
        if !self.tags.is_empty() {
            metadata.insert("tags".to_string(), Value::from(self.tags.clone()));
        }
        if !self.aliases.is_empty() {
            metadata.insert("aliases".to_string(), Value::from(self.aliases.clone()));
        }
        metadata.insert("created_at".to_string(), Value::String(self.created_at.to_rfc3339()));
        metadata.insert("updated_at".to_string(), Value::String(self.updated_at.to_rfc3339()));

        match &self.kind {
            EntryKind::Task { status, assignee, parent_task, dependencies, evidence, priority, due_date, agent_context } => {
                metadata.insert("status".to_string(), Value::String(status.clone()));
                insert_opt_str(&mut metadata, "assignee", assignee);
                insert_opt_str(&mut metadata, "parent_task", parent_task);
                if !dependencies.is_empty() {
                    metadata.insert("dependencies".to_string(), Value::from(dependencies.clone()));
                }
                if !evidence.is_empty() {
                    metadata.insert("evidence".to_string(), Value::from(evidence.clone()));
                }
                if let Some(p) = priority {
                    metadata.insert("priority".to_string(), Value::from(*p));
                }
                insert_opt_str(&mut metadata, "due_date", due_date);
                if !agent_context.is_empty() {
                    metadata.insert("agent_context".to_string(), Value::Object(agent_context.clone()));
                }
            }
            EntryKind::Event { date, importance } => {
                if let Some(d) = date {
                    metadata.insert("date".to_string(), Value::String(d.clone()));
                }
                if let Some(i) = importance {
                    metadata.insert("importance".to_string(), Value::from(*i));
                }
            }
            _ => {}
        }

        FrontmatterDocument::new(metadata, self.body.clone())
    }
}

fn insert_opt_str(metadata: &mut Map<String, Value>, key: &str, value: &Option<String>) {
    match value {
        Some(v) => {
            metadata.insert(key.to_string(), Value::String(v.clone()));
        }
        None => {
            metadata.remove(key);
        }
    }
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text).ok().map(|dt| dt.with_timezone(&Utc))
}

/// Extracts the first `# Heading` ATX line from a body, for entries with no
/// explicit `title` frontmatter key (spec.md §4.1).
fn first_heading(body: &str) -> Option<String> {
    for line in body.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("# ") {
            let heading = rest.trim();
            if !heading.is_empty() {
                return Some(heading.to_string());
            }
        }
    }
    None
}
