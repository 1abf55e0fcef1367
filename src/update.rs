//! Update propagation.
//!
//! A changed path re-runs exactly the handlers registered at that canonical path,
//! then every handler a trigger at that path points to. Each handler is evaluated
//! against its own binding path, never the trigger's.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::config::UpdateScope;
use crate::dom::NodeId;
use crate::engine::Engine;
use crate::error::BindingError;
use crate::path::BindingPath;
use crate::registry::{HandlerKey, NodeHandle};
use crate::view::Elements;
use crate::REF_ATTRIBUTE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Invocation {
    /// Synchronous paint while the node is still being built and may be detached.
    FirstPaint,
    /// Re-run after a change; the node must be in the live tree.
    Update,
}

impl Engine {
    pub(crate) fn notify(&mut self, path: &BindingPath) {
        let canonical = path.to_string();
        let mut handlers = self.bindings.handlers_at(&canonical);
        let triggered: Vec<HandlerKey> = self
            .bindings
            .triggers_at(&canonical)
            .into_iter()
            .map(|t| t.handler)
            .collect();

        if handlers.is_empty() && triggered.is_empty() && self.config.update_scope == UpdateScope::AncestorFallback {
            if let Some((ancestor, keys)) = path
                .ancestors()
                .map(|a| {
                    let keys = self.bindings.handlers_at(&a.to_string());
                    (a, keys)
                })
                .find(|(_, keys)| !keys.is_empty())
            {
                tracing::trace!(path = %path, %ancestor, "falling back to ancestor handlers");
                handlers = keys;
            }
        }

        tracing::trace!(path = %path, handlers = handlers.len(), triggers = triggered.len(), "notify");
        for key in handlers.into_iter().chain(triggered) {
            self.invoke_handler(key, Invocation::Update);
        }
    }

    /// Run one handler and apply its result. Returns whether the evaluator ran.
    pub(crate) fn invoke_handler(&mut self, key: HandlerKey, mode: Invocation) -> bool {
        let Some(record) = self.bindings.get(key).cloned() else {
            return false;
        };
        let Some(node) = self.resolve_handler_node(key, &record.element, mode) else {
            tracing::debug!(path = %record.binding_path, node = %record.element, "pruning stale handler");
            self.bindings.remove(key);
            return false;
        };
        let evaluator = match self.evaluators.get_handler(&record.evaluator) {
            Ok(f) => f,
            Err(e) => {
                tracing::error!(code = e.code(), path = %record.binding_path, error = %e, "handler skipped");
                return false;
            }
        };
        let server = self.config.is_server();
        let pipe = self.imports.resolve(&record.pipe, &self.evaluators, server);
        let value = self.store.get(&record.binding_path);
        let elements = Elements;

        tracing::trace!(path = %record.binding_path, evaluator = %record.evaluator, "invoking handler");
        let output = match catch_unwind(AssertUnwindSafe(|| evaluator(&value, &elements, &pipe))) {
            Ok(output) => output,
            Err(_) => {
                tracing::error!(path = %record.binding_path, evaluator = %record.evaluator, "handler panicked");
                return false;
            }
        };
        if let Some(output) = output {
            self.apply_property(node, &record.target_property, output, 1);
        }
        true
    }

    fn resolve_handler_node(&mut self, key: HandlerKey, handle: &NodeHandle, mode: Invocation) -> Option<NodeId> {
        let node = match handle {
            NodeHandle::Resolved(node) => *node,
            NodeHandle::Pending(id) => {
                let node = self.doc.find_by_attribute(REF_ATTRIBUTE, id)?;
                self.bindings.mark_resolved(key, node);
                node
            }
        };
        if !self.doc.exists(node) {
            return None;
        }
        let live = mode == Invocation::FirstPaint || node == self.doc.root() || self.doc.is_attached(node);
        live.then_some(node)
    }

    /// Re-run the handlers and triggers at `path` without changing any value.
    pub fn run(&mut self, path: &str) -> Result<(), BindingError> {
        let path = self.parse_path(path)?;
        self.notify(&path);
        self.settle();
        Ok(())
    }
}
