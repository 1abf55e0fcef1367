//! Handler and trigger records.
//!
//! Records live in a slab. Two indexes point into it: the canonical binding path a
//! handler is registered at, and the node it renders into. Triggers are stored under
//! their absolute path and refer back to a handler key.
//!
//! Slab slots are reused, so every key also carries the generation it was issued
//! under. A key whose record was removed never resolves again, even after its slot
//! holds a newer record.

use indexmap::IndexMap;
use serde::Serialize;
use slab::Slab;
use std::collections::HashMap;
use std::fmt;

use crate::dom::NodeId;
use crate::imports::Pipe;
use crate::path::BindingPath;

/// Slot plus the generation the record was inserted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    slot: usize,
    generation: u64,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.slot, self.generation)
    }
}

pub type HandlerKey = RecordKey;

/// A slab whose keys go stale when their record is removed.
#[derive(Debug)]
pub(crate) struct Records<T> {
    slab: Slab<(u64, T)>,
    generation: u64,
}

impl<T> Default for Records<T> {
    fn default() -> Self {
        Self {
            slab: Slab::new(),
            generation: 0,
        }
    }
}

impl<T> Records<T> {
    pub(crate) fn insert(&mut self, record: T) -> RecordKey {
        self.generation += 1;
        let generation = self.generation;
        let slot = self.slab.insert((generation, record));
        RecordKey { slot, generation }
    }

    pub(crate) fn get(&self, key: RecordKey) -> Option<&T> {
        match self.slab.get(key.slot) {
            Some((generation, record)) if *generation == key.generation => Some(record),
            _ => None,
        }
    }

    pub(crate) fn get_mut(&mut self, key: RecordKey) -> Option<&mut T> {
        match self.slab.get_mut(key.slot) {
            Some((generation, record)) if *generation == key.generation => Some(record),
            _ => None,
        }
    }

    pub(crate) fn try_remove(&mut self, key: RecordKey) -> Option<T> {
        self.get(key)?;
        self.slab.try_remove(key.slot).map(|(_, record)| record)
    }

    pub(crate) fn contains(&self, key: RecordKey) -> bool {
        self.get(key).is_some()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (RecordKey, &T)> {
        self.slab.iter().map(|(slot, (generation, record))| {
            (
                RecordKey {
                    slot,
                    generation: *generation,
                },
                record,
            )
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.slab.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slab.is_empty()
    }
}

/// Identity of the node a record is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeHandle {
    Resolved(NodeId),
    /// Opaque id carried by the node's `data-zen-ref` attribute.
    Pending(String),
}

impl NodeHandle {
    pub fn resolved(&self) -> Option<NodeId> {
        match self {
            NodeHandle::Resolved(id) => Some(*id),
            NodeHandle::Pending(_) => None,
        }
    }
}

impl From<NodeId> for NodeHandle {
    fn from(id: NodeId) -> Self {
        NodeHandle::Resolved(id)
    }
}

impl From<&str> for NodeHandle {
    fn from(id: &str) -> Self {
        NodeHandle::Pending(id.to_string())
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeHandle::Resolved(id) => write!(f, "#{}", id.index()),
            NodeHandle::Pending(id) => f.write_str(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HandlerRecord {
    pub element: NodeHandle,
    pub evaluator: String,
    pub target_property: String,
    pub pipe: Pipe,
    pub binding_path: BindingPath,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerRecord {
    /// The handler's own binding path, which is what it is evaluated against.
    pub binding_path: BindingPath,
    pub handler: HandlerKey,
}

/// Read-only view of one handler for `review()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerSummary {
    pub node: String,
    pub evaluator: String,
    pub property: String,
}

#[derive(Debug, Default)]
pub struct BindingRegistry {
    records: Records<HandlerRecord>,
    by_path: IndexMap<String, Vec<HandlerKey>>,
    triggers: IndexMap<String, Vec<TriggerRecord>>,
    by_node: HashMap<NodeId, Vec<HandlerKey>>,
}

impl BindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, record: HandlerRecord) -> HandlerKey {
        let path = record.binding_path.to_string();
        let node = record.element.resolved();
        let key = self.records.insert(record);
        self.by_path.entry(path).or_default().push(key);
        if let Some(node) = node {
            self.by_node.entry(node).or_default().push(key);
        }
        key
    }

    /// Re-run `handler` whenever `path + "." + subpath` changes.
    pub fn register_trigger(&mut self, path: &BindingPath, subpath: &BindingPath, handler: HandlerKey) {
        self.register_trigger_at(&path.join(subpath), path.clone(), handler);
    }

    /// Register a trigger whose absolute path is already known.
    pub fn register_trigger_at(&mut self, absolute: &BindingPath, binding_path: BindingPath, handler: HandlerKey) {
        self.triggers
            .entry(absolute.to_string())
            .or_default()
            .push(TriggerRecord {
                binding_path,
                handler,
            });
    }

    pub fn get(&self, key: HandlerKey) -> Option<&HandlerRecord> {
        self.records.get(key)
    }

    pub fn contains(&self, key: HandlerKey) -> bool {
        self.records.contains(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn handlers_at(&self, path: &str) -> Vec<HandlerKey> {
        self.by_path.get(path).cloned().unwrap_or_default()
    }

    pub fn triggers_at(&self, path: &str) -> Vec<TriggerRecord> {
        self.triggers.get(path).cloned().unwrap_or_default()
    }

    pub fn keys_for_node(&self, node: NodeId) -> Vec<HandlerKey> {
        self.by_node.get(&node).cloned().unwrap_or_default()
    }

    pub fn keys(&self) -> Vec<HandlerKey> {
        self.records.iter().map(|(key, _)| key).collect()
    }

    /// Swap a pending handle for the node it resolved to.
    pub fn mark_resolved(&mut self, key: HandlerKey, node: NodeId) {
        if let Some(record) = self.records.get_mut(key) {
            record.element = NodeHandle::Resolved(node);
            self.by_node.entry(node).or_default().push(key);
        }
    }

    /// Drop a handler together with its index entries and the triggers that
    /// point at it.
    pub fn remove(&mut self, key: HandlerKey) -> Option<HandlerRecord> {
        let record = self.records.try_remove(key)?;
        let path = record.binding_path.to_string();
        if let Some(keys) = self.by_path.get_mut(&path) {
            keys.retain(|k| *k != key);
            if keys.is_empty() {
                self.by_path.shift_remove(&path);
            }
        }
        self.triggers.retain(|_, list| {
            list.retain(|t| t.handler != key);
            !list.is_empty()
        });
        if let Some(node) = record.element.resolved() {
            if let Some(keys) = self.by_node.get_mut(&node) {
                keys.retain(|k| *k != key);
                if keys.is_empty() {
                    self.by_node.remove(&node);
                }
            }
        }
        Some(record)
    }

    pub fn remove_path(&mut self, path: &str) -> Vec<HandlerRecord> {
        self.handlers_at(path)
            .into_iter()
            .filter_map(|key| self.remove(key))
            .collect()
    }

    /// Handlers grouped by canonical path, in registration order.
    pub fn summary(&self) -> IndexMap<String, Vec<HandlerSummary>> {
        self.by_path
            .iter()
            .map(|(path, keys)| {
                let handlers = keys
                    .iter()
                    .filter_map(|k| self.records.get(*k))
                    .map(|r| HandlerSummary {
                        node: r.element.to_string(),
                        evaluator: r.evaluator.clone(),
                        property: r.target_property.clone(),
                    })
                    .collect();
                (path.clone(), handlers)
            })
            .collect()
    }

    /// Trigger path to the binding paths it re-runs.
    pub fn trigger_summary(&self) -> IndexMap<String, Vec<String>> {
        self.triggers
            .iter()
            .map(|(path, list)| {
                (
                    path.clone(),
                    list.iter().map(|t| t.binding_path.to_string()).collect(),
                )
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (HandlerKey, &HandlerRecord)> {
        self.records.iter()
    }

    pub fn triggers(&self) -> impl Iterator<Item = (&String, &Vec<TriggerRecord>)> {
        self.triggers.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, node: &str) -> HandlerRecord {
        HandlerRecord {
            element: NodeHandle::Pending(node.to_string()),
            evaluator: "show".to_string(),
            target_property: "textContent".to_string(),
            pipe: Pipe::new(),
            binding_path: BindingPath::parse(path).unwrap(),
        }
    }

    #[test]
    fn test_paths_are_canonical_keys() {
        let mut registry = BindingRegistry::new();
        let key = registry.register(record("list.0.name", "zr0"));
        assert_eq!(registry.handlers_at("list[0].name"), vec![key]);
        assert!(registry.handlers_at("list").is_empty());
    }

    #[test]
    fn test_trigger_is_absolute_and_removed_with_handler() {
        let mut registry = BindingRegistry::new();
        let user = BindingPath::parse("user").unwrap();
        let key = registry.register(record("user", "zr0"));
        registry.register_trigger(&user, &BindingPath::parse("profile.name").unwrap(), key);

        let triggers = registry.triggers_at("user.profile.name");
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].binding_path, user);

        registry.remove(key);
        assert!(registry.triggers_at("user.profile.name").is_empty());
        assert!(registry.summary().is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_removed_key_stays_stale_after_slot_reuse() {
        let mut registry = BindingRegistry::new();
        let old = registry.register(record("mode", "zr0"));
        registry.remove(old);
        let new = registry.register(record("other", "zr1"));

        assert_ne!(old, new);
        assert!(registry.get(old).is_none());
        assert!(!registry.contains(old));
        assert!(registry.remove(old).is_none());
        assert_eq!(registry.handlers_at("other"), vec![new]);
    }

    #[test]
    fn test_node_index_follows_resolution() {
        let mut registry = BindingRegistry::new();
        let key = registry.register(record("count", "zr3"));
        let node = crate::dom::Document::new().body();
        assert!(registry.keys_for_node(node).is_empty());

        registry.mark_resolved(key, node);
        assert_eq!(registry.keys_for_node(node), vec![key]);
        assert_eq!(registry.get(key).map(|r| r.element.clone()), Some(NodeHandle::Resolved(node)));

        assert_eq!(registry.remove_path("count").len(), 1);
        assert!(registry.keys_for_node(node).is_empty());
    }
}
