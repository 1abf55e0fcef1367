//! Record lifecycle.
//!
//! Records are dropped eagerly when a node or path is destroyed, and lazily by a
//! debounced sweep that runs after bursts of structural mutation. Pruning stale
//! records is routine and only logged at debug level.

use std::collections::HashSet;

use crate::dom::NodeId;
use crate::engine::Engine;
use crate::error::BindingError;
use crate::path::BindingPath;
use crate::delegation::DelegateKey;
use crate::registry::{HandlerKey, NodeHandle};
use crate::scheduler::TimerKey;
use crate::update::Invocation;
use crate::REF_ATTRIBUTE;

/// What `destroy` removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestroyTarget {
    Path(String),
    Node(NodeId),
}

impl From<&str> for DestroyTarget {
    fn from(path: &str) -> Self {
        DestroyTarget::Path(path.to_string())
    }
}

impl From<String> for DestroyTarget {
    fn from(path: String) -> Self {
        DestroyTarget::Path(path)
    }
}

impl From<NodeId> for DestroyTarget {
    fn from(node: NodeId) -> Self {
        DestroyTarget::Node(node)
    }
}

impl Engine {
    /// Destroy a store path or a node.
    ///
    /// A path loses its store subtree and the handlers registered exactly at it, and
    /// the nodes those handlers rendered into are detached. Triggers at the path
    /// still fire. A node is detached and freed together with every handler and
    /// delegate bound to it or to any descendant.
    pub fn destroy(&mut self, target: impl Into<DestroyTarget>) -> Result<(), BindingError> {
        match target.into() {
            DestroyTarget::Path(raw) => {
                let path = self.parse_path(&raw)?;
                self.destroy_path(&path);
            }
            DestroyTarget::Node(node) => self.release(node),
        }
        self.settle();
        Ok(())
    }

    fn destroy_path(&mut self, path: &BindingPath) {
        self.store.remove(path);
        let canonical = path.to_string();
        let root = self.doc.root();
        for record in self.bindings.remove_path(&canonical) {
            let node = match &record.element {
                NodeHandle::Resolved(node) => Some(*node),
                NodeHandle::Pending(id) => self.doc.find_by_attribute(REF_ATTRIBUTE, id),
            };
            if let Some(node) = node.filter(|n| *n != root) {
                self.doc.remove(node);
            }
        }
        for trigger in self.bindings.triggers_at(&canonical) {
            self.invoke_handler(trigger.handler, Invocation::Update);
        }
        self.schedule_sync(path);
    }

    /// Drop every record bound to `node` or a descendant, then free the subtree.
    pub(crate) fn release(&mut self, node: NodeId) {
        if node == self.doc.root() {
            return;
        }
        let subtree = self.doc.descendants(node);
        let refs: HashSet<String> = subtree
            .iter()
            .filter_map(|n| self.doc.attribute(*n, REF_ATTRIBUTE).map(str::to_string))
            .collect();

        let mut handlers: Vec<HandlerKey> = subtree
            .iter()
            .flat_map(|n| self.bindings.keys_for_node(*n))
            .collect();
        handlers.extend(
            self.bindings
                .iter()
                .filter(|(_, r)| matches!(&r.element, NodeHandle::Pending(id) if refs.contains(id)))
                .map(|(k, _)| k),
        );
        for key in handlers {
            self.bindings.remove(key);
        }

        let mut delegates: Vec<DelegateKey> = subtree
            .iter()
            .flat_map(|n| self.delegation.keys_for_node(*n))
            .collect();
        delegates.extend(
            self.delegation
                .iter()
                .filter(|(_, r)| matches!(&r.target, NodeHandle::Pending(id) if refs.contains(id)))
                .map(|(k, _)| k),
        );
        for key in delegates {
            self.delegation.remove(key);
        }

        self.doc.free(node);
    }

    pub(crate) fn release_children(&mut self, node: NodeId) {
        for child in self.doc.children(node).to_vec() {
            self.release(child);
        }
    }

    pub(crate) fn schedule_sweep(&mut self) {
        self.scheduler
            .debounce(TimerKey::Sweep, self.config.gc_debounce());
    }

    /// Prune every record whose node is gone or detached. Delegates still waiting
    /// for their opaque id to appear are kept, as are late `load` delegates that
    /// are being polled. Returns the number of records removed.
    pub fn sweep(&mut self) -> usize {
        let root = self.doc.root();
        let stale = |doc: &crate::dom::Document, node: NodeId| {
            node != root && (!doc.exists(node) || !doc.is_attached(node))
        };

        let handlers: Vec<HandlerKey> = self
            .bindings
            .iter()
            .filter(|(_, r)| match &r.element {
                NodeHandle::Resolved(node) => stale(&self.doc, *node),
                NodeHandle::Pending(id) => self.doc.find_by_attribute(REF_ATTRIBUTE, id).is_none(),
            })
            .map(|(k, _)| k)
            .collect();
        let delegates: Vec<DelegateKey> = self
            .delegation
            .iter()
            .filter(|(k, r)| !self.delegation.is_late_load(*k) && matches!(&r.target, NodeHandle::Resolved(node) if stale(&self.doc, *node)))
            .map(|(k, _)| k)
            .collect();

        let removed = handlers.len() + delegates.len();
        for key in handlers {
            self.bindings.remove(key);
        }
        for key in delegates {
            self.delegation.remove(key);
        }
        if removed > 0 {
            tracing::debug!(removed, "swept stale records");
        }
        removed
    }
}
