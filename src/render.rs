//! Rendering views into the document.
//!
//! Each element key is routed one of three ways: event and mutation kinds become
//! delegates, evaluator-valued keys on a bound node become handlers (painted once
//! immediately), and everything else goes through `PROPERTY_APPLIERS`, falling back to
//! attribute assignment. Handler results are applied through the same table.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

use crate::delegation::{DelegateRecord, EventKind};
use crate::dom::{attribute_namespace, Namespace, NodeId, NodeKind};
use crate::engine::Engine;
use crate::error::BindingError;
use crate::html::parse_fragment_into;
use crate::imports::Pipe;
use crate::path::BindingPath;
use crate::registry::{HandlerRecord, NodeHandle};
use crate::update::Invocation;
use crate::view::{ElementView, Output, Prop, View, RESERVED_KEYS};
use crate::REF_ATTRIBUTE;

type Applier = fn(&mut Engine, NodeId, Output, usize);

lazy_static! {
    static ref PROPERTY_APPLIERS: HashMap<&'static str, Applier> = {
        let mut appliers: HashMap<&'static str, Applier> = HashMap::new();
        appliers.insert("style", apply_style);
        appliers.insert("innerHTML", apply_inner_html);
        appliers.insert("textContent", apply_text_content);
        appliers.insert("children", apply_children);
        appliers.insert("child", apply_children);
        appliers.insert("append", apply_append);
        appliers.insert("prepend", apply_prepend);
        appliers
    };
    static ref CAMEL_BOUNDARY_RE: Regex = Regex::new(r"([a-z0-9])([A-Z])").unwrap();
}

impl Engine {
    /// Render `view` without inserting it. Lists render into a fragment.
    pub fn render(&mut self, view: &View) -> Option<NodeId> {
        let node = self.render_view(view, 0);
        self.settle();
        node
    }

    /// Render `view` and append it to `parent`.
    pub fn render_into(&mut self, view: &View, parent: NodeId) -> Option<NodeId> {
        let namespace = self.doc.child_namespace(parent);
        let node = self.render_in(namespace, |engine| engine.render_view(view, 0));
        if let Some(node) = node {
            self.doc.append_child(parent, node);
        }
        self.settle();
        node
    }

    /// Render `view` into the document body and serialize it. In server mode the
    /// markup carries the bootstrap script that resumes this engine on the client.
    pub fn render_to_string(&mut self, view: &View) -> Result<String, BindingError> {
        let root = self.render_view(view, 0);
        let is_document = root.is_some_and(|r| self.doc.tag(r) == Some("html"));
        let top = match root {
            None => Vec::new(),
            Some(root) if is_document || !self.doc.is_fragment(root) => vec![root],
            Some(root) => self.doc.children(root).to_vec(),
        };
        if let Some(root) = root.filter(|_| !is_document) {
            let body = self.doc.body();
            self.doc.append_child(body, root);
        }
        self.settle();

        // Refs are assigned while building the payload, so it must exist before
        // the markup is serialized.
        let script = if self.config.is_server() {
            Some(self.bootstrap_script()?)
        } else {
            None
        };
        let mut markup: String = if is_document {
            format!("<!DOCTYPE html>{}", self.doc.outer_html(top[0]))
        } else {
            top.iter().map(|n| self.doc.outer_html(*n)).collect()
        };
        if let Some(script) = script {
            match markup.rfind("</body>").filter(|_| is_document) {
                Some(at) => markup.insert_str(at, &script),
                None => markup.push_str(&script),
            }
        }
        Ok(markup)
    }

    pub(crate) fn render_view(&mut self, view: &View, depth: usize) -> Option<NodeId> {
        match view {
            View::Empty => None,
            View::Text(text) => Some(self.doc.create_text(text)),
            View::List(items) => {
                let fragment = self.doc.create_fragment();
                for item in items {
                    if let Some(node) = self.render_view(item, depth + 1) {
                        self.doc.append_child(fragment, node);
                    }
                }
                Some(fragment)
            }
            View::Element(el) => self.render_element(el, depth),
        }
    }

    fn render_element(&mut self, el: &ElementView, depth: usize) -> Option<NodeId> {
        if let Some(Prop::Literal(condition)) = el.get("if") {
            if !truthy(condition) {
                return None;
            }
        }
        let namespace = Namespace::for_child(el.tag(), self.namespace);
        let node = self.doc.create_element_ns(el.tag(), namespace);
        let binding = el.binding().and_then(|raw| match BindingPath::parse(raw) {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::error!(code = e.code(), tag = el.tag(), error = %e, "ignoring binding");
                None
            }
        });
        let pipe = match el.get("pipe") {
            Some(Prop::Pipe(pipe)) => pipe.clone(),
            _ => Pipe::new(),
        };
        let prevent_default = matches!(el.get("preventDefault"), Some(Prop::Literal(v)) if truthy(v));
        let triggers = trigger_paths(el.get("triggers"));

        for (key, prop) in &el.props {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            match prop {
                Prop::Evaluator(evaluator) => {
                    if let Some(kind) = EventKind::parse(key) {
                        let target = self.handle_for(node);
                        self.register_delegate(DelegateRecord {
                            target,
                            evaluator: evaluator.clone(),
                            pipe: pipe.clone(),
                            prevent_default,
                            kind,
                        });
                        continue;
                    }
                    match &binding {
                        Some(path) => self.bind_handler(node, key, evaluator, &pipe, path, &triggers),
                        None => {
                            let e = BindingError::MissingBinding {
                                tag: el.tag().to_string(),
                                property: key.clone(),
                            };
                            tracing::error!(code = e.code(), error = %e, "skipping property");
                        }
                    }
                }
                Prop::Literal(value) => self.apply_property(node, key, Output::Value(value.clone()), depth),
                Prop::Views(views) => self.apply_property(node, key, Output::Views(views.clone()), depth),
                Prop::Pipe(_) => {
                    let e = BindingError::InvalidView {
                        node: format!("<{}>", el.tag()),
                        reason: format!("a pipe is only valid under `pipe`, found one under `{}`", key),
                    };
                    tracing::error!(code = e.code(), error = %e, "skipping property");
                }
            }
        }
        Some(node)
    }

    fn bind_handler(
        &mut self,
        node: NodeId,
        property: &str,
        evaluator: &str,
        pipe: &Pipe,
        path: &BindingPath,
        triggers: &[BindingPath],
    ) {
        let element = self.handle_for(node);
        let key = self.bindings.register(HandlerRecord {
            element,
            evaluator: evaluator.to_string(),
            target_property: property.to_string(),
            pipe: pipe.clone(),
            binding_path: path.clone(),
        });
        for subpath in triggers {
            self.bindings.register_trigger(path, subpath, key);
        }
        self.invoke_handler(key, Invocation::FirstPaint);
    }

    /// Records always hold the live node. On the server the node is also tagged
    /// with an opaque id so the record survives serialization.
    fn handle_for(&mut self, node: NodeId) -> NodeHandle {
        if self.config.is_server() {
            self.ensure_ref(node);
        }
        NodeHandle::Resolved(node)
    }

    pub(crate) fn ensure_ref(&mut self, node: NodeId) -> String {
        if let Some(id) = self.doc.attribute(node, REF_ATTRIBUTE) {
            return id.to_string();
        }
        let id = format!("zr{}", self.next_ref);
        self.next_ref += 1;
        self.doc.set_attribute(node, REF_ATTRIBUTE, &id);
        id
    }

    pub(crate) fn apply_property(&mut self, node: NodeId, key: &str, output: Output, depth: usize) {
        match PROPERTY_APPLIERS.get(key) {
            Some(apply) => apply(self, node, output, depth),
            None => apply_attribute(self, node, key, output),
        }
    }

    /// Run `render` with `namespace` inherited by the elements it creates.
    fn render_in<T>(&mut self, namespace: Namespace, render: impl FnOnce(&mut Engine) -> T) -> T {
        let outer = std::mem::replace(&mut self.namespace, namespace);
        let out = render(self);
        self.namespace = outer;
        out
    }

    /// Render `output` as views for children of `parent`, whatever shape an
    /// evaluator returned.
    fn render_output(&mut self, parent: NodeId, output: Output, depth: usize) -> Vec<NodeId> {
        let views = match output {
            Output::Views(views) => views,
            Output::Value(Value::Array(items)) => items.iter().map(View::from_json).collect(),
            Output::Value(value) => vec![View::from_json(&value)],
        };
        let namespace = self.doc.child_namespace(parent);
        self.render_in(namespace, |engine| {
            views
                .iter()
                .filter_map(|view| engine.render_view(view, depth + 1))
                .collect()
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROPERTY APPLIERS
// ═══════════════════════════════════════════════════════════════════════════════

fn apply_style(engine: &mut Engine, node: NodeId, output: Output, _depth: usize) {
    match output {
        Output::Value(Value::Object(rules)) => {
            let css = flatten_style(&rules);
            engine.doc.set_attribute(node, "style", &css);
        }
        other => apply_attribute(engine, node, "style", other),
    }
}

fn apply_inner_html(engine: &mut Engine, node: NodeId, output: Output, _depth: usize) {
    let Output::Value(value) = output else {
        return invalid(engine, node, "innerHTML", "expected markup, found views");
    };
    engine.release_children(node);
    if let Err(e) = parse_fragment_into(&mut engine.doc, node, &value_to_text(&value)) {
        tracing::error!(code = e.code(), error = %e, "innerHTML not applied");
    }
}

fn apply_text_content(engine: &mut Engine, node: NodeId, output: Output, _depth: usize) {
    let Output::Value(value) = output else {
        return invalid(engine, node, "textContent", "expected text, found views");
    };
    let text = value_to_text(&value);
    if let [only] = engine.doc.children(node) {
        let only = *only;
        if !text.is_empty() && matches!(engine.doc.kind(only), Some(NodeKind::Text(_))) {
            engine.doc.set_text_content(only, &text);
            return;
        }
    }
    engine.release_children(node);
    engine.doc.set_text_content(node, &text);
}

fn apply_children(engine: &mut Engine, node: NodeId, output: Output, depth: usize) {
    engine.release_children(node);
    for child in engine.render_output(node, output, depth) {
        engine.doc.append_child(node, child);
    }
}

fn apply_append(engine: &mut Engine, node: NodeId, output: Output, depth: usize) {
    for child in engine.render_output(node, output, depth) {
        engine.doc.append_child(node, child);
    }
}

fn apply_prepend(engine: &mut Engine, node: NodeId, output: Output, depth: usize) {
    let first = engine.doc.children(node).first().copied();
    for child in engine.render_output(node, output, depth) {
        engine.doc.insert_before(node, child, first);
    }
}

/// Attribute fallback. `false` and `null` remove the attribute; names with uppercase
/// characters keep their case through the namespaced path.
fn apply_attribute(engine: &mut Engine, node: NodeId, key: &str, output: Output) {
    let value = match output {
        Output::Value(value) => value,
        Output::Views(_) => return invalid(engine, node, key, "views cannot be an attribute value"),
    };
    let namespaced = key.chars().any(|c| c.is_ascii_uppercase());
    match value {
        Value::Null | Value::Bool(false) => {
            let name = if namespaced {
                key.to_string()
            } else {
                key.to_ascii_lowercase()
            };
            engine.doc.remove_attribute(node, &name);
        }
        value => {
            let text = match value {
                Value::Bool(true) => String::new(),
                other => value_to_text(&other),
            };
            if namespaced {
                engine
                    .doc
                    .set_attribute_ns(node, attribute_namespace(key), key, &text);
            } else {
                engine.doc.set_attribute(node, key, &text);
            }
        }
    }
}

fn invalid(engine: &Engine, node: NodeId, key: &str, reason: &str) {
    let e = BindingError::InvalidView {
        node: format!("<{}> #{}", engine.doc.tag(node).unwrap_or("?"), node.index()),
        reason: format!("{}: {}", key, reason),
    };
    tracing::error!(code = e.code(), error = %e, "property not applied");
}

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// `{ fontSize: "12px", "margin-top": 0 }` -> `font-size: 12px; margin-top: 0`.
pub(crate) fn flatten_style(rules: &serde_json::Map<String, Value>) -> String {
    rules
        .iter()
        .filter(|(_, v)| !matches!(v, Value::Null | Value::Bool(false)))
        .map(|(k, v)| {
            let property = if k.contains('-') {
                k.clone()
            } else {
                CAMEL_BOUNDARY_RE.replace_all(k, "$1-$2").to_ascii_lowercase()
            };
            format!("{}: {}", property, value_to_text(v))
        })
        .collect::<Vec<_>>()
        .join("; ")
}

pub(crate) fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// JavaScript truthiness of a JSON value.
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn trigger_paths(prop: Option<&Prop>) -> Vec<BindingPath> {
    let raw: Vec<&str> = match prop {
        Some(Prop::Literal(Value::Array(items))) => items.iter().filter_map(Value::as_str).collect(),
        Some(Prop::Literal(Value::String(single))) => vec![single.as_str()],
        _ => Vec::new(),
    };
    raw.into_iter()
        .filter_map(|t| match BindingPath::parse(t) {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::error!(code = e.code(), error = %e, "ignoring trigger");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_style() {
        let Value::Object(rules) = json!({
            "fontSize": "12px",
            "margin-top": 0,
            "backgroundColor": "red",
            "display": null,
        }) else {
            unreachable!()
        };
        assert_eq!(
            flatten_style(&rules),
            "font-size: 12px; margin-top: 0; background-color: red"
        );
    }

    #[test]
    fn test_truthy() {
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!(null)));
        assert!(truthy(&json!("0")));
        assert!(truthy(&json!([])));
    }
}
