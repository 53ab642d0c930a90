//! Task-specific atomic operations layered over [`crate::service::KbService`]:
//! CAS-based claiming, decomposition into child tasks, checkpoint logging,
//! and parent rollup.
//!
//! Grounded on the original's `TaskService`: `claim_task` (a single
//! conditional `UPDATE` against the index, using SQLite's JSON1
//! `json_set`/`json_extract` the same way the original uses SQLAlchemy's),
//! `decompose_task`, `checkpoint_task`, and `rollup_parent`.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde_json::{Map, Value};
use tracing::{instrument, warn};

use crate::entry::{Entry, EntryKind};
use crate::error::{PyriteError, Result};
use crate::hooks::{HookContext, HookRegistry};
use crate::repository::KbRepository;
use crate::service::{BulkCreateItem, CreateSpec, KbService};
use crate::IndexStore;

/// Result of a successful [`claim`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimOutcome {
    pub task_id: String,
    pub assignee: String,
}

/// One child task to create via [`decompose`]. Unlike [`CreateSpec`], the
/// id is still caller-supplied — this crate has no entry-id generator of
/// its own, so a caller that wants slugified ids derives them before
/// building specs.
#[derive(Debug, Clone)]
pub struct ChildSpec {
    pub id: String,
    pub title: String,
    pub body: String,
    pub fields: Map<String, Value>,
}

/// Result of a successful [`checkpoint`].
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointOutcome {
    pub task_id: String,
    pub timestamp: String,
    pub message: String,
    pub confidence: f64,
    pub evidence: Vec<String>,
}

/// Result of a [`rollup_parent`] call that actually completed the parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollupOutcome {
    pub parent_id: String,
    pub children_count: usize,
}

/// Atomically claims an open task for `assignee`.
///
/// The claim is a single conditional `UPDATE` against the index's
/// `metadata` JSON column — only a row whose `status` is `'open'` or unset
/// is touched, so two concurrent callers can't both win. On CAS success the
/// markdown file is updated to match; if that update fails, the CAS is
/// rolled back so the index and file never disagree.
#[instrument(skip(store, repo, hooks))]
pub fn claim(store: &IndexStore, repo: &KbRepository, hooks: &crate::hooks::HookRegistry, task_id: &str, assignee: &str) -> Result<ClaimOutcome> {
    let kb_name = repo.config.name.clone();

    let rows_changed = store.with_conn(|conn| {
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE entry
               SET metadata = json_set(
                   COALESCE(metadata, '{}'),
                   '$.status', 'claimed',
                   '$.assignee', ?1
               )
             WHERE id = ?2 AND kb_name = ?3
               AND (json_extract(metadata, '$.status') = 'open'
                    OR json_extract(metadata, '$.status') IS NULL)",
            params![assignee, task_id, kb_name],
        )?;
        tx.commit()?;
        Ok(changed)
    })?;

    if rows_changed == 0 {
        let current_status: Option<Option<String>> = store.with_conn(|conn| {
            let tx = conn.transaction()?;
            let status = tx
                .query_row(
                    "SELECT json_extract(metadata, '$.status') FROM entry WHERE id = ?1 AND kb_name = ?2",
                    params![task_id, kb_name],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()?;
            tx.commit()?;
            Ok(status)
        })?;

        return match current_status {
            None => Err(PyriteError::EntryNotFound { id: task_id.to_string(), kb_name }),
            Some(status) => Err(PyriteError::InvalidTransition {
                task_id: task_id.to_string(),
                from: status.unwrap_or_else(|| "open".to_string()),
                to: "claimed".to_string(),
            }),
        };
    }

    let service = KbService::new(repo, store, hooks);
    let mut updates = Map::new();
    updates.insert("status".to_string(), Value::String("claimed".to_string()));
    updates.insert("assignee".to_string(), Value::String(assignee.to_string()));

    if let Err(err) = service.update_entry(task_id, updates) {
        warn!(task_id, kb = %kb_name, error = %err, "file update failed for claim, rolling back index CAS");
        let _ = store.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE entry
                   SET metadata = json_remove(json_set(metadata, '$.status', 'open'), '$.assignee')
                 WHERE id = ?1 AND kb_name = ?2",
                params![task_id, kb_name],
            )?;
            tx.commit()?;
            Ok(())
        });
        return Err(err);
    }

    Ok(ClaimOutcome { task_id: task_id.to_string(), assignee: assignee.to_string() })
}

/// Splits `parent_id` into child tasks, each carrying `parent_task` and
/// `status: open`. Per-child failures are isolated, same as any other
/// [`KbService::bulk_create`] call.
#[instrument(skip(store, repo, hooks, children))]
pub fn decompose(
    store: &IndexStore,
    repo: &KbRepository,
    hooks: &crate::hooks::HookRegistry,
    parent_id: &str,
    children: Vec<ChildSpec>,
) -> Result<Vec<BulkCreateItem>> {
    if !repo.exists(parent_id) {
        return Err(PyriteError::EntryNotFound { id: parent_id.to_string(), kb_name: repo.config.name.clone() });
    }

    let specs = children
        .into_iter()
        .map(|child| {
            let mut fields = child.fields;
            fields.insert("parent_task".to_string(), Value::String(parent_id.to_string()));
            fields.insert("status".to_string(), Value::String("open".to_string()));
            fields.entry("priority".to_string()).or_insert_with(|| Value::from(5));
            CreateSpec { id: child.id, title: child.title, entry_type: "task".to_string(), body: child.body, fields }
        })
        .collect();

    let service = KbService::new(repo, store, hooks);
    Ok(service.bulk_create(specs))
}

/// Appends a timestamped `## Checkpoint <timestamp>` section to the task's
/// body and records the latest checkpoint state in `agent_context`.
/// `partial_evidence` is merged (deduplicated) into both `agent_context`
/// and the task's top-level `evidence` field.
#[instrument(skip(store, repo, hooks, message, evidence))]
pub fn checkpoint(
    store: &IndexStore,
    repo: &KbRepository,
    hooks: &crate::hooks::HookRegistry,
    task_id: &str,
    message: &str,
    confidence: f64,
    evidence: &[String],
) -> Result<CheckpointOutcome> {
    let entry = repo.load(task_id)?;
    let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

    let mut section = format!("\n\n## Checkpoint {timestamp}\n\n{message}");
    if confidence > 0.0 {
        section.push_str(&format!("\n\n**Confidence**: {}%", (confidence * 100.0) as i64));
    }
    if !evidence.is_empty() {
        let evidence_str = evidence.iter().map(|e| format!("`{e}`")).collect::<Vec<_>>().join(", ");
        section.push_str(&format!("\n\n**Evidence**: {evidence_str}"));
    }
    let new_body = format!("{}{}", entry.body, section);

    let mut agent_context = match &entry.kind {
        EntryKind::Task { agent_context, .. } => agent_context.clone(),
        _ => Map::new(),
    };
    agent_context.insert("last_checkpoint".to_string(), Value::String(timestamp.clone()));
    agent_context.insert("last_message".to_string(), Value::String(message.to_string()));
    if confidence > 0.0 {
        agent_context.insert("confidence".to_string(), serde_json::json!(confidence));
    }
    if !evidence.is_empty() {
        agent_context.insert("evidence".to_string(), Value::from(merge_unique(agent_context_evidence(&agent_context), evidence)));
    }

    let mut updates = Map::new();
    updates.insert("body".to_string(), Value::String(new_body));
    updates.insert("agent_context".to_string(), Value::Object(agent_context));

    if !evidence.is_empty() {
        let existing_evidence = match &entry.kind {
            EntryKind::Task { evidence: e, .. } => e.clone(),
            _ => Vec::new(),
        };
        updates.insert("evidence".to_string(), Value::from(merge_unique(existing_evidence, evidence)));
    }

    let service = KbService::new(repo, store, hooks);
    service.update_entry(task_id, updates)?;

    Ok(CheckpointOutcome {
        task_id: task_id.to_string(),
        timestamp,
        message: message.to_string(),
        confidence,
        evidence: evidence.to_vec(),
    })
}

fn agent_context_evidence(agent_context: &Map<String, Value>) -> Vec<String> {
    agent_context
        .get("evidence")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

fn merge_unique(existing: Vec<String>, additional: &[String]) -> Vec<String> {
    let mut merged = existing;
    for item in additional {
        if !merged.contains(item) {
            merged.push(item.clone());
        }
    }
    merged
}

/// Completes `parent_id` if every task whose `parent_task` points to it has
/// `status: done`, then cascades to its own parent. A sibling-status query
/// and a parent-status check each run as one index query; the recursive
/// cascade call's errors are logged, not propagated, so a failure deep in
/// the chain never fails the rollup that triggered it.
///
/// Called directly by a caller that wants to force a rollup, and also the
/// engine behind the `after_save` hook [`install_task_hooks`] installs —
/// see that function for why it needs `Arc` rather than this function's
/// plain borrows.
#[instrument(skip(store, repo, hooks))]
pub fn rollup_parent(store: &IndexStore, repo: &KbRepository, hooks: &crate::hooks::HookRegistry, parent_id: &str) -> Result<Option<RollupOutcome>> {
    let kb_name = repo.config.name.clone();

    let sibling_statuses: Vec<Option<String>> = store.with_conn(|conn| {
        let tx = conn.transaction()?;
        let mut stmt = tx.prepare(
            "SELECT json_extract(metadata, '$.status') FROM entry
             WHERE kb_name = ?1 AND json_extract(metadata, '$.parent_task') = ?2",
        )?;
        let rows = stmt
            .query_map(params![kb_name, parent_id], |row| row.get::<_, Option<String>>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        tx.commit()?;
        Ok(rows)
    })?;

    if sibling_statuses.is_empty() {
        return Ok(None);
    }

    let all_done = sibling_statuses.iter().all(|status| status.as_deref() == Some("done"));
    if !all_done {
        return Ok(None);
    }

    let parent_status: Option<Option<String>> = store.with_conn(|conn| {
        let tx = conn.transaction()?;
        let status = tx
            .query_row(
                "SELECT json_extract(metadata, '$.status') FROM entry WHERE id = ?1 AND kb_name = ?2",
                params![parent_id, kb_name],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        tx.commit()?;
        Ok(status)
    })?;

    let Some(parent_status) = parent_status else { return Ok(None) };
    if matches!(parent_status.as_deref(), Some("done") | Some("failed")) {
        return Ok(None);
    }

    let service = KbService::new(repo, store, hooks);
    let mut updates = Map::new();
    updates.insert("status".to_string(), Value::String("done".to_string()));
    service.update_entry(parent_id, updates)?;

    let children_count = sibling_statuses.len();
    let grandparent_id = repo.load(parent_id).ok().and_then(|entry| match entry.kind {
        EntryKind::Task { parent_task, .. } => parent_task,
        _ => None,
    });

    if let Some(grandparent_id) = grandparent_id {
        if let Err(err) = rollup_parent(store, repo, hooks, &grandparent_id) {
            warn!(parent_id = %grandparent_id, error = %err, "cascading rollup failed");
        }
    }

    Ok(Some(RollupOutcome { parent_id: parent_id.to_string(), children_count }))
}

/// Wires the default task-lifecycle hooks onto `hooks`: [`validate_task_transition`]
/// as a `before_save` guard, and a `rollup_parent` call (fired when a task's
/// `status` becomes `done`) as an `after_save` side effect — spec.md §4.10's
/// "driven by `after_save` hooks alone" rollup behavior.
///
/// [`crate::hooks::HookRegistry`] only stores `'static` closures, but
/// `rollup_parent` needs a live index/repository handle; `store` and `repo`
/// are taken as `Arc` (rather than the plain borrows every other function in
/// this crate uses) purely so the closure installed here can own a clone
/// instead of a borrow. Nothing else in the crate needs to switch to `Arc` —
/// callers that don't want automatic rollup keep using bare references and
/// invoke `rollup_parent` themselves.
pub fn install_task_hooks(hooks: &mut HookRegistry, store: Arc<IndexStore>, repo: Arc<KbRepository>) {
    hooks.on_before_save(validate_task_transition);
    hooks.on_after_save(move |entry, ctx| {
        let EntryKind::Task { status, parent_task: Some(parent_id), .. } = &entry.kind else { return Ok(()) };
        if status != "done" || ctx.old_status.as_deref() == Some("done") {
            return Ok(());
        }
        let inert_hooks = HookRegistry::new();
        rollup_parent(&store, &repo, &inert_hooks, parent_id).map(|_| ())
    });
}

/// The task status workflow: `open -> claimed -> in_progress ->
/// {blocked, review, done, failed}`, `blocked -> in_progress`,
/// `review -> {done, in_progress}`, `failed -> open` (only with a `reason`
/// field set). Registered as a `before_save` hook; ignores non-task entries
/// and updates with no status change.
pub fn validate_task_transition(entry: &mut Entry, ctx: &HookContext) -> Result<()> {
    const TRANSITIONS: &[(&str, &[&str])] = &[
        ("open", &["claimed"]),
        ("claimed", &["in_progress"]),
        ("in_progress", &["blocked", "review", "done", "failed"]),
        ("blocked", &["in_progress"]),
        ("review", &["done", "in_progress"]),
        ("failed", &["open"]),
    ];

    let EntryKind::Task { status: new_status, .. } = &entry.kind else { return Ok(()) };
    let Some(old_status) = ctx.old_status.as_deref() else { return Ok(()) };
    if old_status == new_status {
        return Ok(());
    }

    if old_status == "failed" && new_status == "open" {
        let has_reason = entry.metadata.get("reason").and_then(Value::as_str).map(|s| !s.is_empty()).unwrap_or(false);
        if has_reason {
            return Ok(());
        }
        return Err(PyriteError::InvalidTransition {
            task_id: entry.id.clone(),
            from: old_status.to_string(),
            to: new_status.clone(),
        });
    }

    let allowed = TRANSITIONS.iter().find(|(from, _)| *from == old_status).map(|(_, tos)| *tos).unwrap_or(&[]);
    if allowed.contains(&new_status.as_str()) {
        Ok(())
    } else {
        Err(PyriteError::InvalidTransition { task_id: entry.id.clone(), from: old_status.to_string(), to: new_status.clone() })
    }
}
