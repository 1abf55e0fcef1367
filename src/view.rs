//! Declarative view trees.
//!
//! A [`View`] is the input contract of the renderer: text, an element described by an
//! ordered property map, a list, or nothing. Element properties are literals, nested
//! views, evaluator references or a pipe. Trees are built in Rust with
//! [`ElementView`]'s builder methods or decoded from JSON, where `"$fn:<key>"` marks
//! an evaluator reference.

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::BindingError;
use crate::imports::Pipe;

/// Marker prefix for evaluator references in JSON trees.
pub const FN_MARKER: &str = "$fn:";

/// Keys consumed by the renderer itself and never written as attributes.
pub const RESERVED_KEYS: &[&str] = &["tagName", "binding", "triggers", "pipe", "preventDefault", "if"];

#[derive(Debug, Clone, PartialEq, Default)]
pub enum View {
    #[default]
    Empty,
    Text(String),
    Element(ElementView),
    List(Vec<View>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Prop {
    Literal(Value),
    Views(Vec<View>),
    /// Name of a registered evaluator.
    Evaluator(String),
    Pipe(Pipe),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ElementView {
    pub props: IndexMap<String, Prop>,
}

impl View {
    pub fn el(tag: &str) -> ElementView {
        ElementView::new(tag)
    }

    pub fn text(text: impl Into<String>) -> View {
        View::Text(text.into())
    }

    pub fn list(items: impl IntoIterator<Item = View>) -> View {
        View::List(items.into_iter().collect())
    }

    /// Decode a JSON tree. Strings become text, arrays become lists, objects become
    /// elements. Malformed `children` are logged and replaced by an empty list.
    pub fn from_json(value: &Value) -> View {
        decode(value, "$")
    }
}

impl From<ElementView> for View {
    fn from(el: ElementView) -> Self {
        View::Element(el)
    }
}

impl From<&str> for View {
    fn from(text: &str) -> Self {
        View::Text(text.to_string())
    }
}

impl From<String> for View {
    fn from(text: String) -> Self {
        View::Text(text)
    }
}

impl ElementView {
    pub fn new(tag: &str) -> Self {
        let mut props = IndexMap::new();
        props.insert("tagName".to_string(), Prop::Literal(Value::String(tag.to_string())));
        Self { props }
    }

    pub fn tag(&self) -> &str {
        match self.props.get("tagName") {
            Some(Prop::Literal(Value::String(tag))) if !tag.is_empty() => tag,
            _ => "div",
        }
    }

    pub fn binding(&self) -> Option<&str> {
        match self.props.get("binding") {
            Some(Prop::Literal(Value::String(path))) => Some(path),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Prop> {
        self.props.get(key)
    }

    pub fn prop(mut self, key: &str, prop: Prop) -> Self {
        self.props.insert(key.to_string(), prop);
        self
    }

    pub fn attr(self, key: &str, value: impl Into<Value>) -> Self {
        self.prop(key, Prop::Literal(value.into()))
    }

    pub fn bind(self, path: &str) -> Self {
        self.attr("binding", path)
    }

    /// Compute `key` from the bound value with the named evaluator.
    pub fn eval(self, key: &str, evaluator: &str) -> Self {
        self.prop(key, Prop::Evaluator(evaluator.to_string()))
    }

    /// Delegate an event or mutation kind to the named evaluator.
    pub fn on(self, kind: &str, evaluator: &str) -> Self {
        self.eval(kind, evaluator)
    }

    /// Re-run this node's handlers when `binding + "." + subpath` changes.
    pub fn trigger(mut self, subpath: &str) -> Self {
        let entry = self
            .props
            .entry("triggers".to_string())
            .or_insert_with(|| Prop::Literal(Value::Array(Vec::new())));
        if let Prop::Literal(Value::Array(items)) = entry {
            items.push(Value::String(subpath.to_string()));
        }
        self
    }

    pub fn pipe(self, pipe: Pipe) -> Self {
        self.prop("pipe", Prop::Pipe(pipe))
    }

    pub fn prevent_default(self) -> Self {
        self.attr("preventDefault", true)
    }

    pub fn when(self, condition: bool) -> Self {
        self.attr("if", condition)
    }

    pub fn text(self, text: &str) -> Self {
        self.attr("textContent", text)
    }

    pub fn style(self, style: Value) -> Self {
        self.attr("style", style)
    }

    pub fn inner_html(self, markup: &str) -> Self {
        self.attr("innerHTML", markup)
    }

    pub fn child(self, child: impl Into<View>) -> Self {
        self.push_view("children", child.into())
    }

    pub fn children(mut self, children: impl IntoIterator<Item = View>) -> Self {
        for child in children {
            self = self.push_view("children", child);
        }
        self
    }

    pub fn append(self, view: impl Into<View>) -> Self {
        self.push_view("append", view.into())
    }

    pub fn prepend(self, view: impl Into<View>) -> Self {
        self.push_view("prepend", view.into())
    }

    fn push_view(mut self, key: &str, view: View) -> Self {
        let entry = self
            .props
            .entry(key.to_string())
            .or_insert_with(|| Prop::Views(Vec::new()));
        match entry {
            Prop::Views(views) => views.push(view),
            other => *other = Prop::Views(vec![view]),
        }
        self
    }
}

/// Element-building capability handed to evaluators.
#[derive(Debug, Clone, Copy, Default)]
pub struct Elements;

impl Elements {
    pub fn el(&self, tag: &str) -> ElementView {
        ElementView::new(tag)
    }

    pub fn text(&self, text: impl Into<String>) -> View {
        View::text(text)
    }
}

/// What an evaluator hands back to be applied at its target property.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Value(Value),
    Views(Vec<View>),
}

impl From<Value> for Output {
    fn from(value: Value) -> Self {
        Output::Value(value)
    }
}

impl From<&str> for Output {
    fn from(text: &str) -> Self {
        Output::Value(Value::String(text.to_string()))
    }
}

impl From<String> for Output {
    fn from(text: String) -> Self {
        Output::Value(Value::String(text))
    }
}

impl From<View> for Output {
    fn from(view: View) -> Self {
        Output::Views(vec![view])
    }
}

impl From<ElementView> for Output {
    fn from(el: ElementView) -> Self {
        Output::Views(vec![View::Element(el)])
    }
}

impl From<Vec<View>> for Output {
    fn from(views: Vec<View>) -> Self {
        Output::Views(views)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// JSON DECODING
// ═══════════════════════════════════════════════════════════════════════════════

fn decode(value: &Value, location: &str) -> View {
    match value {
        Value::Null => View::Empty,
        Value::String(s) => View::Text(s.clone()),
        Value::Bool(_) | Value::Number(_) => View::Text(value.to_string()),
        Value::Array(items) => View::List(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| decode(item, &format!("{}[{}]", location, i)))
                .collect(),
        ),
        Value::Object(fields) => {
            let tag = fields
                .get("tagName")
                .and_then(Value::as_str)
                .unwrap_or("div");
            let mut el = ElementView::default();
            for (key, raw) in fields {
                let prop = match key.as_str() {
                    "pipe" => Prop::Pipe(Pipe::from_json(raw)),
                    "children" | "child" => match raw {
                        Value::Array(items) => Prop::Views(decode_views(items, location, key)),
                        other => {
                            let e = BindingError::InvalidView {
                                node: format!("<{}> at {}", tag, location),
                                reason: format!("`{}` must be an array, found {}", key, other),
                            };
                            tracing::error!(code = e.code(), error = %e, "replacing with an empty list");
                            Prop::Views(Vec::new())
                        }
                    },
                    "append" | "prepend" => match raw {
                        Value::Array(items) => Prop::Views(decode_views(items, location, key)),
                        other => Prop::Views(vec![decode(other, &format!("{}.{}", location, key))]),
                    },
                    _ => match raw.as_str().and_then(|s| s.strip_prefix(FN_MARKER)) {
                        Some(evaluator) => Prop::Evaluator(evaluator.to_string()),
                        None => Prop::Literal(raw.clone()),
                    },
                };
                el.props.insert(key.clone(), prop);
            }
            View::Element(el)
        }
    }
}

fn decode_views(items: &[Value], location: &str, key: &str) -> Vec<View> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| decode(item, &format!("{}.{}[{}]", location, key, i)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_builder_and_json_agree() {
        let built: View = View::el("p")
            .bind("count")
            .eval("textContent", "show_count")
            .trigger("total")
            .child("tail")
            .into();
        let decoded = View::from_json(&json!({
            "tagName": "p",
            "binding": "count",
            "textContent": "$fn:show_count",
            "triggers": ["total"],
            "children": ["tail"],
        }));
        assert_eq!(built, decoded);
    }

    #[test]
    fn test_non_array_children_become_empty() {
        let view = View::from_json(&json!({ "tagName": "ul", "children": { "tagName": "li" } }));
        let View::Element(el) = view else {
            panic!("expected element");
        };
        assert_eq!(el.get("children"), Some(&Prop::Views(Vec::new())));
        assert_eq!(el.tag(), "ul");
    }

    #[test]
    fn test_scalars_and_defaults() {
        assert_eq!(View::from_json(&json!(null)), View::Empty);
        assert_eq!(View::from_json(&json!(3)), View::text("3"));
        let View::Element(el) = View::from_json(&json!({ "class": "x" })) else {
            panic!("expected element");
        };
        assert_eq!(el.tag(), "div");
        assert_eq!(el.binding(), None);
    }
}
