//! The engine: one store, one document, and the registries that tie them together.
//!
//! Every public entry point ends by draining pending mutation records, so delegates
//! observing structural changes have run by the time the call returns.
//!
//! ## Key Invariants
//!
//! 1. Every mutation reports the paths it changed; only handlers at exactly those
//!    paths (and triggers registered there) re-run.
//! 2. `get` is total: a path that holds nothing yields the configured default.
//! 3. No record outlives the node it is bound to by more than one sweep.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::delegation::{DelegateSummary, DelegationRegistry};
use crate::dom::{Document, Namespace};
use crate::error::BindingError;
use crate::evaluator::EvaluatorRegistry;
use crate::imports::{ImportResolver, ModuleLoader};
use crate::path::BindingPath;
use crate::registry::{BindingRegistry, HandlerSummary};
use crate::scheduler::{Scheduler, TimerKey};
use crate::store::Store;
use crate::sync::SyncState;

#[derive(Debug)]
pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) store: Store,
    pub(crate) doc: Document,
    pub(crate) bindings: BindingRegistry,
    pub(crate) delegation: DelegationRegistry,
    pub(crate) imports: ImportResolver,
    pub(crate) evaluators: EvaluatorRegistry,
    pub(crate) scheduler: Scheduler,
    pub(crate) sync: SyncState,
    /// Next opaque id suffix (`zr<n>`).
    pub(crate) next_ref: usize,
    /// Set once `fire_load` has run.
    pub(crate) loaded: bool,
    /// Namespace inherited by elements whose tag does not pick one.
    pub(crate) namespace: Namespace,
}

/// Read-only snapshot of the store and every registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Review {
    pub data: Value,
    pub handlers: IndexMap<String, Vec<HandlerSummary>>,
    pub triggers: IndexMap<String, Vec<String>>,
    pub delegates: IndexMap<String, Vec<DelegateSummary>>,
}

impl Engine {
    pub fn new(config: EngineConfig, evaluators: EvaluatorRegistry) -> Self {
        Self {
            store: Store::new(config.default_value.clone(), config.change_policy),
            doc: Document::new(),
            bindings: BindingRegistry::new(),
            delegation: DelegationRegistry::new(),
            imports: ImportResolver::new(),
            evaluators,
            scheduler: Scheduler::new(),
            sync: SyncState::default(),
            next_ref: 0,
            loaded: false,
            namespace: Namespace::Html,
            config,
        }
    }

    pub fn with_module_loader(mut self, loader: impl ModuleLoader + 'static) -> Self {
        self.imports.set_loader(Box::new(loader));
        self
    }

    /// Replace the store contents. `data` must be an object keyed by hook.
    pub fn with_store(mut self, data: Value) -> Result<Self, BindingError> {
        self.store = Store::from_snapshot(
            data,
            self.config.default_value.clone(),
            self.config.change_policy,
        )?;
        Ok(self)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// Direct access to the document. Structural changes made here are observed
    /// at the next entry point, or immediately through [`Engine::settle`].
    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    pub fn evaluators(&self) -> &EvaluatorRegistry {
        &self.evaluators
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn now(&self) -> Duration {
        self.scheduler.now()
    }

    pub(crate) fn parse_path(&self, raw: &str) -> Result<BindingPath, BindingError> {
        BindingPath::parse(raw).map_err(|e| {
            tracing::error!(code = e.code(), path = raw, error = %e, "rejected path");
            e
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DATA API
    // ═══════════════════════════════════════════════════════════════════════════

    /// The value at `path`, or the configured default when nothing is there.
    pub fn get(&self, path: &str) -> Value {
        match self.parse_path(path) {
            Ok(path) => self.store.get(&path),
            Err(_) => self.store.default_value().clone(),
        }
    }

    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> Result<(), BindingError> {
        let path = self.parse_path(path)?;
        let changed = self.store.set(&path, value.into()).map_err(|e| failed(e, &path, "set"))?;
        self.commit(changed);
        Ok(())
    }

    /// Merge `partial` into the object at `path`. Keys that fail are logged and
    /// skipped; the first such failure is returned once the rest have been applied.
    pub fn update(&mut self, path: &str, partial: Value) -> Result<(), BindingError> {
        let path = self.parse_path(path)?;
        let (changed, errors) = self.store.update(&path, partial);
        self.commit(changed);
        let errors: Vec<BindingError> = errors.into_iter().map(|e| failed(e, &path, "update")).collect();
        errors.into_iter().next().map_or(Ok(()), Err)
    }

    pub fn push(&mut self, path: &str, value: impl Into<Value>) -> Result<(), BindingError> {
        self.push_many(path, vec![value.into()])
    }

    pub fn push_many(&mut self, path: &str, values: Vec<Value>) -> Result<(), BindingError> {
        let path = self.parse_path(path)?;
        let changed = self
            .store
            .push_many(&path, values)
            .map_err(|e| failed(e, &path, "push"))?;
        self.commit(changed);
        Ok(())
    }

    /// Replace the first element of the array at `path` matching `query`, or
    /// append `value` if none does.
    pub fn set_in_array(&mut self, path: &str, query: Value, value: Value) -> Result<(), BindingError> {
        let path = self.parse_path(path)?;
        let changed = self
            .store
            .set_in_array(&path, &query, value)
            .map_err(|e| failed(e, &path, "setInArray"))?;
        self.commit(changed);
        Ok(())
    }

    /// Remove and return the first element matching `query`. A miss is only a
    /// warning.
    pub fn pull(&mut self, path: &str, query: Value) -> Result<Value, BindingError> {
        let path = self.parse_path(path)?;
        match self.store.pull(&path, &query) {
            Ok((removed, changed)) => {
                self.commit(changed);
                Ok(removed)
            }
            Err(e @ BindingError::NoMatch { .. }) => {
                tracing::warn!(code = e.code(), path = %path, error = %e, "pull matched nothing");
                Err(e)
            }
            Err(e) => Err(failed(e, &path, "pull")),
        }
    }

    /// Tracked view of the array at `path`.
    pub fn array(&mut self, path: &str) -> Result<TrackedArray<'_>, BindingError> {
        let path = self.parse_path(path)?;
        Ok(TrackedArray { engine: self, path })
    }

    pub fn review(&self) -> Review {
        Review {
            data: self.store.snapshot().clone(),
            handlers: self.bindings.summary(),
            triggers: self.bindings.trigger_summary(),
            delegates: self.delegation.summary(),
        }
    }

    /// Feed changed paths to sync and to the registries.
    pub(crate) fn commit(&mut self, changed: Vec<BindingPath>) {
        for path in &changed {
            self.schedule_sync(path);
            self.notify(path);
        }
        self.settle();
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TIME
    // ═══════════════════════════════════════════════════════════════════════════

    /// Move the logical clock forward, firing every timer that falls due.
    pub fn advance(&mut self, by: Duration) {
        let until = self.scheduler.now() + by;
        while let Some(key) = self.scheduler.pop_due(until) {
            match key {
                TimerKey::Sweep => {
                    self.sweep();
                }
                TimerKey::Sync(hook) => self.flush_sync(&hook),
                TimerKey::LoadPoll => self.poll_late_loads(),
            }
            self.settle();
        }
        self.scheduler.set_now(until);
    }

    /// Drain pending mutation records: deliver them to mutation delegates and arm
    /// the sweep when nodes were removed. Delegates may mutate again, so this runs
    /// until quiet or `maxSettleRounds` is reached.
    pub fn settle(&mut self) {
        for _ in 0..self.config.max_settle_rounds {
            if !self.doc.has_records() {
                return;
            }
            let records = self.doc.take_records();
            if records.iter().any(|r| !r.removed.is_empty()) {
                self.schedule_sweep();
            }
            self.deliver_mutations(&records);
        }
        if self.doc.has_records() {
            let dropped = self.doc.take_records().len();
            tracing::warn!(dropped, rounds = self.config.max_settle_rounds, "mutation delegates did not settle");
        }
    }
}

fn failed(e: BindingError, path: &BindingPath, op: &'static str) -> BindingError {
    tracing::error!(code = e.code(), path = %path, op, error = %e, "store operation failed");
    e
}

/// An array in the store whose index writes notify `path[i]`.
pub struct TrackedArray<'a> {
    engine: &'a mut Engine,
    path: BindingPath,
}

impl TrackedArray<'_> {
    fn items(&self) -> Option<&Vec<Value>> {
        self.engine.store.lookup(&self.path).and_then(Value::as_array)
    }

    pub fn len(&self) -> usize {
        self.items().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Value {
        self.engine.store.get(&self.path.child_index(index))
    }

    pub fn values(&self) -> Vec<Value> {
        self.items().cloned().unwrap_or_default()
    }

    pub fn set(&mut self, index: usize, value: impl Into<Value>) -> Result<(), BindingError> {
        let changed = self
            .engine
            .store
            .set_index(&self.path, index, value.into())
            .map_err(|e| failed(e, &self.path, "array set"))?;
        self.engine.commit(changed);
        Ok(())
    }

    /// Delete the element at `index`, leaving a `null` hole.
    pub fn remove(&mut self, index: usize) -> Result<(), BindingError> {
        let changed = self
            .engine
            .store
            .delete_index(&self.path, index)
            .map_err(|e| failed(e, &self.path, "array delete"))?;
        self.engine.commit(changed);
        Ok(())
    }

    pub fn push(&mut self, value: impl Into<Value>) -> Result<(), BindingError> {
        let changed = self
            .engine
            .store
            .push_many(&self.path, vec![value.into()])
            .map_err(|e| failed(e, &self.path, "push"))?;
        self.engine.commit(changed);
        Ok(())
    }
}
