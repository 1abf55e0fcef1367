//! Event delegation and mutation observation.
//!
//! One listener is installed per event kind, the first time any delegate asks for it.
//! A dispatched event walks from its target up through the ancestors and runs every
//! delegate whose declared target is on that chain. Mutation delegates are matched
//! against the exact node a mutation record names.

use indexmap::{IndexMap, IndexSet};
use lazy_static::lazy_static;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use crate::dom::{MutationKind, MutationRecord, NodeId};
use crate::engine::Engine;
use crate::error::BindingError;
use crate::evaluator::DelegateContext;
use crate::imports::Pipe;
use crate::registry::{NodeHandle, RecordKey, Records};
use crate::scheduler::TimerKey;
use crate::view::Elements;

pub type DelegateKey = RecordKey;

/// Key code that makes a `keypress` also count as a click.
const ENTER_KEY_CODE: u32 = 13;

lazy_static! {
    static ref NATIVE_EVENTS: HashSet<&'static str> = [
        "abort", "blur", "change", "click", "contextmenu", "copy", "cut", "dblclick", "drag",
        "dragend", "dragenter", "dragleave", "dragover", "dragstart", "drop", "error", "focus",
        "focusin", "focusout", "input", "invalid", "keydown", "keypress", "keyup", "load",
        "mousedown", "mouseenter", "mouseleave", "mousemove", "mouseout", "mouseover", "mouseup",
        "paste", "pointercancel", "pointerdown", "pointerenter", "pointerleave", "pointermove",
        "pointerout", "pointerover", "pointerup", "reset", "resize", "scroll", "select", "submit",
        "touchcancel", "touchend", "touchmove", "touchstart", "wheel",
    ]
    .into_iter()
    .collect();
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Native(String),
    /// `keydown:<Key>`, served by the shared `keydown` listener.
    KeyDown(String),
    /// A click whose target lies outside the declared element.
    ClickOutside,
    ChildList,
    /// `attributes` or `attributes:<name>`.
    Attributes(Option<String>),
    CharacterData,
}

impl EventKind {
    /// Recognize a view key as an event or mutation kind.
    pub fn parse(key: &str) -> Option<EventKind> {
        match key {
            "clickOutside" => Some(EventKind::ClickOutside),
            "childList" => Some(EventKind::ChildList),
            "attributes" => Some(EventKind::Attributes(None)),
            "characterData" => Some(EventKind::CharacterData),
            _ => {
                if let Some(name) = key.strip_prefix("attributes:").filter(|n| !n.is_empty()) {
                    Some(EventKind::Attributes(Some(name.to_string())))
                } else if let Some(k) = key.strip_prefix("keydown:").filter(|k| !k.is_empty()) {
                    Some(EventKind::KeyDown(k.to_string()))
                } else if NATIVE_EVENTS.contains(key) {
                    Some(EventKind::Native(key.to_string()))
                } else {
                    None
                }
            }
        }
    }

    /// Native listener serving this kind. Mutation kinds have none.
    pub fn listener(&self) -> Option<&str> {
        match self {
            EventKind::Native(kind) => Some(kind),
            EventKind::KeyDown(_) => Some("keydown"),
            EventKind::ClickOutside => Some("click"),
            _ => None,
        }
    }

    /// Registry slot. `clickOutside` shares the `click` list.
    fn slot(&self) -> String {
        match self {
            EventKind::ClickOutside => "click".to_string(),
            other => other.to_string(),
        }
    }

    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            EventKind::ChildList | EventKind::Attributes(_) | EventKind::CharacterData
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Native(kind) => f.write_str(kind),
            EventKind::KeyDown(key) => write!(f, "keydown:{}", key),
            EventKind::ClickOutside => f.write_str("clickOutside"),
            EventKind::ChildList => f.write_str("childList"),
            EventKind::Attributes(None) => f.write_str("attributes"),
            EventKind::Attributes(Some(name)) => write!(f, "attributes:{}", name),
            EventKind::CharacterData => f.write_str("characterData"),
        }
    }
}

/// A dispatched event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: String,
    pub target: NodeId,
    pub key: Option<String>,
    pub key_code: Option<u32>,
    /// Attribute name for `attributes` mutations.
    pub attribute: Option<String>,
    default_prevented: bool,
}

impl Event {
    pub fn new(kind: &str, target: NodeId) -> Self {
        Self {
            kind: kind.to_string(),
            target,
            key: None,
            key_code: None,
            attribute: None,
            default_prevented: false,
        }
    }

    pub fn with_key(mut self, key: &str, key_code: u32) -> Self {
        self.key = Some(key.to_string());
        self.key_code = Some(key_code);
        self
    }

    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DelegateRecord {
    pub target: NodeHandle,
    pub evaluator: String,
    pub pipe: Pipe,
    pub prevent_default: bool,
    pub kind: EventKind,
}

/// Read-only view of one delegate for `review()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegateSummary {
    pub kind: String,
    pub node: String,
    pub evaluator: String,
    pub prevent_default: bool,
}

#[derive(Debug, Default)]
pub struct DelegationRegistry {
    records: Records<DelegateRecord>,
    by_kind: IndexMap<String, Vec<DelegateKey>>,
    by_node: HashMap<NodeId, Vec<DelegateKey>>,
    listeners: IndexSet<String>,
    observing: bool,
    /// `load` delegates registered after the document loaded, with their deadline.
    late_loads: IndexMap<DelegateKey, Duration>,
}

impl DelegationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, record: DelegateRecord) -> DelegateKey {
        if let Some(listener) = record.kind.listener() {
            self.install(listener);
        }
        if record.kind.is_mutation() && !self.observing {
            tracing::trace!("starting mutation observer");
            self.observing = true;
        }
        let slot = record.kind.slot();
        let node = record.target.resolved();
        let key = self.records.insert(record);
        self.by_kind.entry(slot).or_default().push(key);
        if let Some(node) = node {
            self.by_node.entry(node).or_default().push(key);
        }
        key
    }

    /// Install the native listener for `kind` unless one exists. Clicks also get a
    /// `keypress` listener so Enter can activate them.
    pub fn install(&mut self, kind: &str) {
        if self.listeners.insert(kind.to_string()) {
            tracing::trace!(kind, "installed listener");
        }
        if kind == "click" {
            self.install("keypress");
        }
    }

    pub fn has_listener(&self, kind: &str) -> bool {
        self.listeners.contains(kind)
    }

    pub fn listeners(&self) -> impl Iterator<Item = &String> {
        self.listeners.iter()
    }

    pub fn is_observing(&self) -> bool {
        self.observing
    }

    pub fn list(&self, slot: &str) -> Vec<DelegateKey> {
        self.by_kind.get(slot).cloned().unwrap_or_default()
    }

    pub fn get(&self, key: DelegateKey) -> Option<&DelegateRecord> {
        self.records.get(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn keys(&self) -> Vec<DelegateKey> {
        self.records.iter().map(|(key, _)| key).collect()
    }

    pub fn keys_for_node(&self, node: NodeId) -> Vec<DelegateKey> {
        self.by_node.get(&node).cloned().unwrap_or_default()
    }

    pub fn mark_resolved(&mut self, key: DelegateKey, node: NodeId) {
        if let Some(record) = self.records.get_mut(key) {
            record.target = NodeHandle::Resolved(node);
            self.by_node.entry(node).or_default().push(key);
        }
    }

    pub fn remove(&mut self, key: DelegateKey) -> Option<DelegateRecord> {
        let record = self.records.try_remove(key)?;
        let slot = record.kind.slot();
        if let Some(keys) = self.by_kind.get_mut(&slot) {
            keys.retain(|k| *k != key);
            if keys.is_empty() {
                self.by_kind.shift_remove(&slot);
            }
        }
        if let Some(node) = record.target.resolved() {
            if let Some(keys) = self.by_node.get_mut(&node) {
                keys.retain(|k| *k != key);
                if keys.is_empty() {
                    self.by_node.remove(&node);
                }
            }
        }
        self.late_loads.shift_remove(&key);
        Some(record)
    }

    pub(crate) fn watch_late_load(&mut self, key: DelegateKey, deadline: Duration) {
        self.late_loads.insert(key, deadline);
    }

    pub(crate) fn late_loads(&self) -> Vec<(DelegateKey, Duration)> {
        self.late_loads.iter().map(|(k, d)| (*k, *d)).collect()
    }

    pub(crate) fn is_late_load(&self, key: DelegateKey) -> bool {
        self.late_loads.contains_key(&key)
    }

    pub(crate) fn finish_late_load(&mut self, key: DelegateKey) {
        self.late_loads.shift_remove(&key);
    }

    pub fn summary(&self) -> IndexMap<String, Vec<DelegateSummary>> {
        self.by_kind
            .iter()
            .map(|(slot, keys)| {
                let delegates = keys
                    .iter()
                    .filter_map(|k| self.records.get(*k))
                    .map(|r| DelegateSummary {
                        kind: r.kind.to_string(),
                        node: r.target.to_string(),
                        evaluator: r.evaluator.clone(),
                        prevent_default: r.prevent_default,
                    })
                    .collect();
                (slot.clone(), delegates)
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DelegateKey, &DelegateRecord)> {
        self.records.iter()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DISPATCH
// ═══════════════════════════════════════════════════════════════════════════════

impl Engine {
    /// Register a delegate against a node or an opaque id. The element behind an
    /// opaque id does not need to exist yet.
    pub fn delegate(
        &mut self,
        kind: &str,
        target: impl Into<NodeHandle>,
        evaluator: &str,
        pipe: Pipe,
        prevent_default: bool,
    ) -> Result<DelegateKey, BindingError> {
        let target = target.into();
        let Some(kind) = EventKind::parse(kind) else {
            let e = BindingError::InvalidView {
                node: target.to_string(),
                reason: format!("{:?} is not an event or mutation kind", kind),
            };
            tracing::error!(code = e.code(), error = %e, "delegate rejected");
            return Err(e);
        };
        let key = self.register_delegate(DelegateRecord {
            target,
            evaluator: evaluator.to_string(),
            pipe,
            prevent_default,
            kind,
        });
        self.settle();
        Ok(key)
    }

    pub(crate) fn register_delegate(&mut self, record: DelegateRecord) -> DelegateKey {
        let is_load = record.kind == EventKind::Native("load".to_string());
        let key = self.delegation.register(record);
        if is_load && self.loaded {
            let deadline = self.scheduler.now() + self.config.load_timeout();
            self.delegation.watch_late_load(key, deadline);
            self.scheduler
                .schedule(TimerKey::LoadPoll, self.config.load_poll_interval());
        }
        key
    }

    /// Deliver `event` to every matching delegate. Returns how many ran.
    pub fn dispatch_event(&mut self, event: &mut Event) -> usize {
        if !self.delegation.has_listener(&event.kind) {
            return 0;
        }
        let mut candidates = self.delegation.list(&event.kind);
        if event.kind == "keypress" && event.key_code == Some(ENTER_KEY_CODE) {
            candidates.extend(self.delegation.list("click"));
        }
        if event.kind == "keydown" {
            if let Some(key) = &event.key {
                candidates.extend(self.delegation.list(&format!("keydown:{}", key)));
            }
        }

        let chain = self.doc.ancestors(event.target);
        let mut delivered = 0;
        for key in candidates {
            let Some(outside) = self
                .delegation
                .get(key)
                .map(|r| r.kind == EventKind::ClickOutside)
            else {
                continue;
            };
            let Some(node) = self.resolve_delegate_target(key) else {
                continue;
            };
            if !self.doc.is_attached(node) || chain.contains(&node) == outside {
                continue;
            }
            if self.doc.is_disabled(node) {
                continue;
            }
            if self.delegation.get(key).is_some_and(|r| r.prevent_default) {
                event.prevent_default();
            }
            self.run_delegate(key, node, event);
            delivered += 1;
        }
        self.settle();
        delivered
    }

    /// Mark the document loaded and fire every `load` delegate whose target is
    /// attached. Later `load` registrations are polled instead.
    pub fn fire_load(&mut self) -> usize {
        self.loaded = true;
        let mut fired = 0;
        for key in self.delegation.list("load") {
            let Some(node) = self.resolve_delegate_target(key) else {
                continue;
            };
            if !self.doc.is_attached(node) {
                continue;
            }
            let event = Event::new("load", node);
            self.run_delegate(key, node, &event);
            fired += 1;
        }
        self.settle();
        fired
    }

    pub(crate) fn poll_late_loads(&mut self) {
        let now = self.scheduler.now();
        for (key, deadline) in self.delegation.late_loads() {
            match self.resolve_delegate_target(key) {
                Some(node) if self.doc.is_attached(node) => {
                    self.delegation.finish_late_load(key);
                    let event = Event::new("load", node);
                    self.run_delegate(key, node, &event);
                }
                _ if now >= deadline => {
                    self.delegation.finish_late_load(key);
                    let target = self
                        .delegation
                        .get(key)
                        .map(|r| r.target.to_string())
                        .unwrap_or_default();
                    tracing::warn!(%target, "load target never attached, abandoning");
                }
                _ => {}
            }
        }
        if !self.delegation.late_loads().is_empty() {
            self.scheduler
                .schedule(TimerKey::LoadPoll, self.config.load_poll_interval());
        }
    }

    /// Match a batch of mutation records against mutation delegates.
    pub(crate) fn deliver_mutations(&mut self, records: &[MutationRecord]) {
        if !self.delegation.is_observing() {
            return;
        }
        for record in records {
            let (base, slots) = match (&record.kind, &record.attribute) {
                (MutationKind::ChildList, _) => ("childList", vec!["childList".to_string()]),
                (MutationKind::CharacterData, _) => ("characterData", vec!["characterData".to_string()]),
                (MutationKind::Attributes, name) => {
                    let mut slots = vec!["attributes".to_string()];
                    if let Some(name) = name {
                        slots.push(format!("attributes:{}", name));
                    }
                    ("attributes", slots)
                }
            };
            for slot in slots {
                for key in self.delegation.list(&slot) {
                    if self.resolve_delegate_target(key) != Some(record.target) {
                        continue;
                    }
                    let mut event = Event::new(base, record.target);
                    event.attribute = record.attribute.clone();
                    self.run_delegate(key, record.target, &event);
                }
            }
        }
    }

    /// Resolve a delegate's target. Pending ids that do not resolve yet are kept;
    /// resolved targets whose node was freed are pruned.
    pub(crate) fn resolve_delegate_target(&mut self, key: DelegateKey) -> Option<NodeId> {
        let handle = self.delegation.get(key)?.target.clone();
        match handle {
            NodeHandle::Resolved(node) if self.doc.exists(node) => Some(node),
            NodeHandle::Resolved(node) => {
                tracing::debug!(node = node.index(), "pruning delegate for a freed node");
                self.delegation.remove(key);
                None
            }
            NodeHandle::Pending(id) => {
                let node = self.doc.find_by_attribute(crate::REF_ATTRIBUTE, &id)?;
                self.delegation.mark_resolved(key, node);
                Some(node)
            }
        }
    }

    fn run_delegate(&mut self, key: DelegateKey, node: NodeId, event: &Event) {
        let Some(record) = self.delegation.get(key).cloned() else {
            return;
        };
        let evaluator = match self.evaluators.get_delegate(&record.evaluator) {
            Ok(f) => f,
            Err(e) => {
                tracing::error!(code = e.code(), kind = %record.kind, error = %e, "delegate skipped");
                return;
            }
        };
        let server = self.config.is_server();
        let pipe = self.imports.resolve(&record.pipe, &self.evaluators, server);
        let elements = Elements;
        tracing::trace!(kind = %record.kind, evaluator = %record.evaluator, "running delegate");
        let mut ctx = DelegateContext {
            engine: self,
            node,
            pipe: &pipe,
            elements: &elements,
            event,
        };
        if catch_unwind(AssertUnwindSafe(|| evaluator(&mut ctx))).is_err() {
            tracing::error!(kind = %record.kind, evaluator = %record.evaluator, "delegate panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kinds() {
        assert_eq!(EventKind::parse("click"), Some(EventKind::Native("click".to_string())));
        assert_eq!(EventKind::parse("keydown:Escape"), Some(EventKind::KeyDown("Escape".to_string())));
        assert_eq!(EventKind::parse("attributes:class"), Some(EventKind::Attributes(Some("class".to_string()))));
        assert_eq!(EventKind::parse("clickOutside").and_then(|k| k.listener().map(str::to_string)), Some("click".to_string()));
        assert_eq!(EventKind::parse("class"), None);
        assert_eq!(EventKind::parse("keydown:"), None);
        assert_eq!(EventKind::KeyDown("Enter".to_string()).to_string(), "keydown:Enter");
    }

    #[test]
    fn test_one_listener_per_kind() {
        let mut registry = DelegationRegistry::new();
        for kind in ["click", "clickOutside", "keydown:Enter", "keydown:Escape"] {
            registry.register(DelegateRecord {
                target: NodeHandle::Pending("zr0".to_string()),
                evaluator: "noop".to_string(),
                pipe: Pipe::new(),
                prevent_default: false,
                kind: EventKind::parse(kind).unwrap(),
            });
        }
        let listeners: Vec<&String> = registry.listeners().collect();
        assert_eq!(listeners, vec!["click", "keypress", "keydown"]);
        assert_eq!(registry.list("click").len(), 2);
        assert!(!registry.is_observing());
    }

    #[test]
    fn test_removed_delegate_key_stays_stale() {
        let mut registry = DelegationRegistry::new();
        let record = |target: &str| DelegateRecord {
            target: NodeHandle::Pending(target.to_string()),
            evaluator: "noop".to_string(),
            pipe: Pipe::new(),
            prevent_default: false,
            kind: EventKind::Native("click".to_string()),
        };
        let old = registry.register(record("zr0"));
        registry.remove(old);
        let new = registry.register(record("zr1"));

        assert!(registry.get(old).is_none());
        assert_eq!(registry.list("click"), vec![new]);
        assert_eq!(registry.get(new).map(|r| r.target.to_string()), Some("zr1".to_string()));
    }
}
