//! Plugin hook registry (spec.md §4.8, §9): a process-wide, write-once set of
//! `before_save` / `after_save` / `after_delete` callbacks invoked in
//! registration order around every write-path operation.
//!
//! Grounded on kasl's use of `once_cell`-style process-wide statics for its
//! migration-version sentinel, generalized to a registry of boxed closures
//! since the hooks themselves are data, not a fixed set of named functions.

use crate::entry::Entry;
use crate::error::Result;

/// What triggered a hook invocation, mirrored from the original's
/// `{operation, old_status}` context dict (spec.md §4.8 step 4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

/// Context passed to every hook alongside the entry. `old_status` is only
/// populated for task updates, where workflow-transition validation needs it.
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    pub operation: Option<Operation>,
    pub old_status: Option<String>,
}

impl HookContext {
    pub fn new(operation: Operation) -> Self {
        Self { operation: Some(operation), old_status: None }
    }

    pub fn with_old_status(mut self, status: impl Into<String>) -> Self {
        self.old_status = Some(status.into());
        self
    }
}

type BeforeSaveHook = Box<dyn Fn(&mut Entry, &HookContext) -> Result<()> + Send + Sync>;
type AfterSaveHook = Box<dyn Fn(&Entry, &HookContext) -> Result<()> + Send + Sync>;
type AfterDeleteHook = Box<dyn Fn(&str, &str, &HookContext) -> Result<()> + Send + Sync>;

/// Registry of plugin hooks. Hooks are added at startup (write-once, per
/// spec.md §5's "plugin registries are process-wide, write-once at startup")
/// and invoked in registration order; lookups afterward take no lock beyond
/// the borrow needed to iterate the vectors.
#[derive(Default)]
pub struct HookRegistry {
    before_save: Vec<BeforeSaveHook>,
    after_save: Vec<AfterSaveHook>,
    after_delete: Vec<AfterDeleteHook>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a `before_save` hook. May mutate the entry or return an
    /// error to abort the write (spec.md §4.8 step 4).
    pub fn on_before_save<F>(&mut self, hook: F)
    where
        F: Fn(&mut Entry, &HookContext) -> Result<()> + Send + Sync + 'static,
    {
        self.before_save.push(Box::new(hook));
    }

    /// Registers an `after_save` hook. Errors here are logged by the caller
    /// and surfaced as warnings, never rolled back (spec.md §7).
    pub fn on_after_save<F>(&mut self, hook: F)
    where
        F: Fn(&Entry, &HookContext) -> Result<()> + Send + Sync + 'static,
    {
        self.after_save.push(Box::new(hook));
    }

    pub fn on_after_delete<F>(&mut self, hook: F)
    where
        F: Fn(&str, &str, &HookContext) -> Result<()> + Send + Sync + 'static,
    {
        self.after_delete.push(Box::new(hook));
    }

    /// Runs every `before_save` hook in order, stopping at the first error.
    pub fn run_before_save(&self, entry: &mut Entry, ctx: &HookContext) -> Result<()> {
        for hook in &self.before_save {
            hook(entry, ctx)?;
        }
        Ok(())
    }

    /// Runs every `after_save` hook, collecting rather than propagating
    /// errors — the write already committed by the time these run.
    pub fn run_after_save(&self, entry: &Entry, ctx: &HookContext) -> Vec<crate::error::PyriteError> {
        let mut errors = Vec::new();
        for hook in &self.after_save {
            if let Err(err) = hook(entry, ctx) {
                errors.push(err);
            }
        }
        errors
    }

    pub fn run_after_delete(&self, id: &str, kb_name: &str, ctx: &HookContext) -> Vec<crate::error::PyriteError> {
        let mut errors = Vec::new();
        for hook in &self.after_delete {
            if let Err(err) = hook(id, kb_name, ctx) {
                errors.push(err);
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Attribution, EntryKind};
    use chrono::Utc;
    use serde_json::Map;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn sample_entry() -> Entry {
        Entry {
            id: "e1".to_string(),
            kb_name: "kb1".to_string(),
            title: "T".to_string(),
            kind: EntryKind::Note,
            tags: vec![],
            aliases: vec![],
            sources: vec![],
            links: vec![],
            attribution: Attribution::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            metadata: Map::new(),
            body: String::new(),
        }
    }

    #[test]
    fn before_save_hooks_run_in_order() {
        let mut registry = HookRegistry::new();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let log1 = log.clone();
        registry.on_before_save(move |_entry, _ctx| {
            log1.lock().unwrap().push(1);
            Ok(())
        });
        let log2 = log.clone();
        registry.on_before_save(move |_entry, _ctx| {
            log2.lock().unwrap().push(2);
            Ok(())
        });

        let mut entry = sample_entry();
        registry.run_before_save(&mut entry, &HookContext::new(Operation::Create)).unwrap();
        assert_eq!(*log.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn before_save_error_aborts_remaining_hooks() {
        let mut registry = HookRegistry::new();
        let ran_second = Arc::new(AtomicUsize::new(0));
        registry.on_before_save(|_entry, _ctx| Err(crate::error::PyriteError::Other("nope".to_string())));
        let ran_second_clone = ran_second.clone();
        registry.on_before_save(move |_entry, _ctx| {
            ran_second_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let mut entry = sample_entry();
        let result = registry.run_before_save(&mut entry, &HookContext::new(Operation::Create));
        assert!(result.is_err());
        assert_eq!(ran_second.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn after_save_errors_are_collected_not_propagated() {
        let mut registry = HookRegistry::new();
        registry.on_after_save(|_entry, _ctx| Err(crate::error::PyriteError::Other("warn".to_string())));
        registry.on_after_save(|_entry, _ctx| Ok(()));

        let entry = sample_entry();
        let errors = registry.run_after_save(&entry, &HookContext::new(Operation::Create));
        assert_eq!(errors.len(), 1);
    }
}
