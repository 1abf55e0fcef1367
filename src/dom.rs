//! Arena document.
//!
//! The engine renders into this tree on both runtimes. On the server it is serialized
//! to markup; on the client it stands in for the live document and is rebuilt from the
//! server markup during hydration.
//!
//! ## Key Invariants
//!
//! 1. **Stable ids**: a freed slot is recycled under a new generation. A `NodeId` taken
//!    before the free never resolves again, so stale handler/delegate records can always
//!    be detected.
//! 2. **Detached is not freed**: removing a node from its parent keeps it alive so it
//!    can be reinserted. Only `free` releases the slots.
//! 3. **Mutation log**: every structural, attribute and text change is appended to a
//!    record queue that the engine drains like a mutation observer.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    index: usize,
    generation: u32,
}

impl NodeId {
    pub fn index(self) -> usize {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Html,
    Svg,
    MathMl,
}

impl Namespace {
    pub fn uri(self) -> &'static str {
        match self {
            Namespace::Html => "http://www.w3.org/1999/xhtml",
            Namespace::Svg => "http://www.w3.org/2000/svg",
            Namespace::MathMl => "http://www.w3.org/1998/Math/MathML",
        }
    }

    /// Namespace opened by a root tag. Everything else is HTML unless it inherits.
    pub fn for_tag(tag: &str) -> Namespace {
        match tag {
            "svg" => Namespace::Svg,
            "math" => Namespace::MathMl,
            _ => Namespace::Html,
        }
    }

    /// Namespace of `tag` created under a parent whose children live in `inherited`.
    pub fn for_child(tag: &str, inherited: Namespace) -> Namespace {
        match Namespace::for_tag(tag) {
            Namespace::Html => inherited,
            opened => opened,
        }
    }
}

/// Namespace URI for prefixed attribute names (`xlink:href`, `xml:lang`, `xmlns:x`).
pub fn attribute_namespace(name: &str) -> Option<&'static str> {
    match name.split_once(':').map(|(prefix, _)| prefix) {
        Some("xlink") => Some("http://www.w3.org/1999/xlink"),
        Some("xml") => Some("http://www.w3.org/XML/1998/namespace"),
        Some("xmlns") => Some("http://www.w3.org/2000/xmlns/"),
        _ if name == "xmlns" => Some("http://www.w3.org/2000/xmlns/"),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct ElementData {
    pub tag: String,
    pub namespace: Namespace,
    pub attributes: IndexMap<String, String>,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Document,
    Fragment,
    Element(ElementData),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    ChildList,
    Attributes,
    CharacterData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MutationRecord {
    pub kind: MutationKind,
    pub target: NodeId,
    pub attribute: Option<String>,
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
}

impl MutationRecord {
    fn child_list(target: NodeId, added: Vec<NodeId>, removed: Vec<NodeId>) -> Self {
        Self {
            kind: MutationKind::ChildList,
            target,
            attribute: None,
            added,
            removed,
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    data: Option<NodeData>,
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Slot>,
    vacant: Vec<usize>,
    root: NodeId,
    html: NodeId,
    head: NodeId,
    body: NodeId,
    doctype: Option<String>,
    records: Vec<MutationRecord>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// A document holding an empty `<html><head></head><body></body></html>`.
    pub fn new() -> Self {
        let mut doc = Self::empty();
        doc.doctype = Some("html".to_string());
        let html = doc.create_element("html");
        let head = doc.create_element("head");
        let body = doc.create_element("body");
        doc.append_child(doc.root, html);
        doc.append_child(html, head);
        doc.append_child(html, body);
        doc.html = html;
        doc.head = head;
        doc.body = body;
        doc.records.clear();
        doc
    }

    /// A bare document node. The landmark ids point at the root until
    /// `locate_landmarks` finds real elements.
    pub(crate) fn empty() -> Self {
        let root = NodeId {
            index: 0,
            generation: 0,
        };
        Self {
            nodes: vec![Slot {
                generation: 0,
                data: Some(NodeData {
                    kind: NodeKind::Document,
                    parent: None,
                    children: Vec::new(),
                }),
            }],
            vacant: Vec::new(),
            root,
            html: root,
            head: root,
            body: root,
            doctype: None,
            records: Vec::new(),
        }
    }

    pub(crate) fn set_doctype(&mut self, name: Option<String>) {
        self.doctype = name;
    }

    pub(crate) fn locate_landmarks(&mut self) {
        let find = |doc: &Document, parent: NodeId, tag: &str| {
            doc.children(parent)
                .iter()
                .copied()
                .find(|c| doc.tag(*c).is_some_and(|t| t.eq_ignore_ascii_case(tag)))
        };
        if let Some(html) = find(self, self.root, "html") {
            self.html = html;
            self.head = find(self, html, "head").unwrap_or(html);
            self.body = find(self, html, "body").unwrap_or(html);
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn html(&self) -> NodeId {
        self.html
    }

    pub fn head(&self) -> NodeId {
        self.head
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    fn data(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes
            .get(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.data.as_ref())
    }

    fn data_mut(&mut self, id: NodeId) -> Option<&mut NodeData> {
        self.nodes
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.data.as_mut())
    }

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let data = Some(NodeData {
            kind,
            parent: None,
            children: Vec::new(),
        });
        if let Some(index) = self.vacant.pop() {
            let slot = &mut self.nodes[index];
            slot.data = data;
            return NodeId {
                index,
                generation: slot.generation,
            };
        }
        self.nodes.push(Slot { generation: 0, data });
        NodeId {
            index: self.nodes.len() - 1,
            generation: 0,
        }
    }

    /// Number of arena slots, live or vacant.
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CREATION
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.create_element_ns(tag, Namespace::for_tag(tag))
    }

    pub fn create_element_ns(&mut self, tag: &str, namespace: Namespace) -> NodeId {
        let tag = match namespace {
            Namespace::Html => tag.to_ascii_lowercase(),
            _ => tag.to_string(),
        };
        self.alloc(NodeKind::Element(ElementData {
            tag,
            namespace,
            attributes: IndexMap::new(),
        }))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.alloc(NodeKind::Text(text.to_string()))
    }

    pub fn create_comment(&mut self, text: &str) -> NodeId {
        self.alloc(NodeKind::Comment(text.to_string()))
    }

    pub fn create_fragment(&mut self) -> NodeId {
        self.alloc(NodeKind::Fragment)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // INSPECTION
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn exists(&self, id: NodeId) -> bool {
        self.data(id).is_some()
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.data(id).map(|d| &d.kind)
    }

    pub fn element(&self, id: NodeId) -> Option<&ElementData> {
        match self.kind(id) {
            Some(NodeKind::Element(el)) => Some(el),
            _ => None,
        }
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|el| el.tag.as_str())
    }

    /// Namespace children of `id` are created in. `foreignObject` switches back to HTML.
    pub fn child_namespace(&self, id: NodeId) -> Namespace {
        match self.element(id) {
            Some(el) if el.namespace == Namespace::Svg && el.tag == "foreignObject" => Namespace::Html,
            Some(el) => el.namespace,
            None => Namespace::Html,
        }
    }

    pub fn is_fragment(&self, id: NodeId) -> bool {
        matches!(self.kind(id), Some(NodeKind::Fragment))
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.data(id).and_then(|d| d.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.data(id).map(|d| d.children.as_slice()).unwrap_or(&[])
    }

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)
            .and_then(|el| el.attributes.get(name))
            .map(String::as_str)
    }

    pub fn has_attribute(&self, id: NodeId, name: &str) -> bool {
        self.attribute(id, name).is_some()
    }

    pub fn is_disabled(&self, id: NodeId) -> bool {
        self.has_attribute(id, "disabled")
    }

    /// `node` and every ancestor up to the topmost one, nearest first.
    pub fn ancestors(&self, node: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut current = Some(node).filter(|n| self.exists(*n));
        while let Some(id) = current {
            chain.push(id);
            current = self.parent(id);
        }
        chain
    }

    /// Inclusive containment: a node contains itself.
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.ancestors(node).contains(&ancestor)
    }

    pub fn is_attached(&self, node: NodeId) -> bool {
        self.contains(self.root, node)
    }

    /// `node` and all of its descendants in document order.
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            if !self.exists(id) {
                continue;
            }
            out.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        out
    }

    /// First attached element carrying `name="value"`.
    pub fn find_by_attribute(&self, name: &str, value: &str) -> Option<NodeId> {
        self.descendants(self.root)
            .into_iter()
            .find(|id| self.attribute(*id, name) == Some(value))
    }

    pub fn text_content(&self, node: NodeId) -> String {
        match self.kind(node) {
            Some(NodeKind::Text(t)) => t.clone(),
            Some(NodeKind::Comment(_)) | None => String::new(),
            Some(_) => self
                .children(node)
                .iter()
                .map(|c| self.text_content(*c))
                .collect(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TREE MUTATION
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        let index = self.children(parent).len();
        self.insert_at(parent, index, child);
    }

    pub fn prepend_child(&mut self, parent: NodeId, child: NodeId) {
        self.insert_at(parent, 0, child);
    }

    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) {
        let index = reference
            .and_then(|r| self.children(parent).iter().position(|c| *c == r))
            .unwrap_or_else(|| self.children(parent).len());
        self.insert_at(parent, index, child);
    }

    /// Insert `child` at `index`. A fragment is spliced in by moving its children.
    fn insert_at(&mut self, parent: NodeId, index: usize, child: NodeId) {
        if !self.exists(parent) || !self.exists(child) || self.contains(child, parent) {
            return;
        }
        let moved = if self.is_fragment(child) {
            let kids = self.children(child).to_vec();
            if let Some(frag) = self.data_mut(child) {
                frag.children.clear();
            }
            kids
        } else {
            self.detach(child);
            vec![child]
        };
        if moved.is_empty() {
            return;
        }
        let index = index.min(self.children(parent).len());
        for kid in &moved {
            if let Some(data) = self.data_mut(*kid) {
                data.parent = Some(parent);
            }
        }
        if let Some(data) = self.data_mut(parent) {
            data.children.splice(index..index, moved.iter().copied());
        }
        self.record(MutationRecord::child_list(parent, moved, Vec::new()));
    }

    /// Detach `node` from its parent without freeing it.
    pub fn remove(&mut self, node: NodeId) {
        self.detach(node);
    }

    fn detach(&mut self, node: NodeId) {
        let Some(parent) = self.parent(node) else {
            return;
        };
        if let Some(data) = self.data_mut(parent) {
            data.children.retain(|c| *c != node);
        }
        if let Some(data) = self.data_mut(node) {
            data.parent = None;
        }
        self.record(MutationRecord::child_list(parent, Vec::new(), vec![node]));
    }

    pub fn clear_children(&mut self, node: NodeId) {
        let removed = match self.data_mut(node) {
            Some(data) => std::mem::take(&mut data.children),
            None => return,
        };
        if removed.is_empty() {
            return;
        }
        for kid in &removed {
            if let Some(data) = self.data_mut(*kid) {
                data.parent = None;
            }
        }
        self.record(MutationRecord::child_list(node, Vec::new(), removed));
    }

    /// Detach and release `node` and its subtree. Returns the released ids.
    pub fn free(&mut self, node: NodeId) -> Vec<NodeId> {
        self.detach(node);
        let released = self.descendants(node);
        for id in &released {
            if *id == self.root {
                continue;
            }
            if let Some(slot) = self.nodes.get_mut(id.index) {
                slot.data = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.vacant.push(id.index);
            }
        }
        released
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ATTRIBUTES & TEXT
    // ═══════════════════════════════════════════════════════════════════════════

    /// HTML attribute names are case-insensitive and stored lowercased.
    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) {
        let lowered = match self.element(node).map(|el| el.namespace) {
            Some(Namespace::Html) => name.to_ascii_lowercase(),
            Some(_) => name.to_string(),
            None => return,
        };
        self.write_attribute(node, lowered, value);
    }

    /// Namespaced assignment preserves the name's case (`viewBox`, `xlink:href`).
    pub fn set_attribute_ns(&mut self, node: NodeId, _namespace: Option<&str>, name: &str, value: &str) {
        self.write_attribute(node, name.to_string(), value);
    }

    fn write_attribute(&mut self, node: NodeId, name: String, value: &str) {
        let Some(NodeData {
            kind: NodeKind::Element(el),
            ..
        }) = self.data_mut(node)
        else {
            return;
        };
        if el.attributes.get(&name).map(String::as_str) == Some(value) {
            return;
        }
        el.attributes.insert(name.clone(), value.to_string());
        self.record(MutationRecord {
            kind: MutationKind::Attributes,
            target: node,
            attribute: Some(name),
            added: Vec::new(),
            removed: Vec::new(),
        });
    }

    pub fn remove_attribute(&mut self, node: NodeId, name: &str) {
        let Some(NodeData {
            kind: NodeKind::Element(el),
            ..
        }) = self.data_mut(node)
        else {
            return;
        };
        if el.attributes.shift_remove(name).is_some() {
            self.record(MutationRecord {
                kind: MutationKind::Attributes,
                target: node,
                attribute: Some(name.to_string()),
                added: Vec::new(),
                removed: Vec::new(),
            });
        }
    }

    /// Replace the content of `node` with a single text node, or rewrite the data of
    /// a text node in place.
    pub fn set_text_content(&mut self, node: NodeId, text: &str) {
        match self.data_mut(node) {
            Some(NodeData {
                kind: NodeKind::Text(data),
                ..
            }) => {
                if data != text {
                    *data = text.to_string();
                    self.record(MutationRecord {
                        kind: MutationKind::CharacterData,
                        target: node,
                        attribute: None,
                        added: Vec::new(),
                        removed: Vec::new(),
                    });
                }
            }
            Some(_) => {
                self.clear_children(node);
                if !text.is_empty() {
                    let t = self.create_text(text);
                    self.append_child(node, t);
                }
            }
            None => {}
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // MUTATION RECORDS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Only mutations inside the live tree are observable.
    fn record(&mut self, record: MutationRecord) {
        if self.is_attached(record.target) {
            self.records.push(record);
        }
    }

    pub fn take_records(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.records)
    }

    pub fn has_records(&self) -> bool {
        !self.records.is_empty()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SERIALIZATION
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn outer_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.write_node(node, false, &mut out);
        out
    }

    pub fn inner_html(&self, node: NodeId) -> String {
        let raw = self
            .tag(node)
            .is_some_and(|t| RAW_TEXT_ELEMENTS.contains(&t));
        let mut out = String::new();
        for child in self.children(node) {
            self.write_node(*child, raw, &mut out);
        }
        out
    }

    fn write_node(&self, node: NodeId, raw_text: bool, out: &mut String) {
        match self.kind(node) {
            Some(NodeKind::Document) => {
                if let Some(name) = &self.doctype {
                    out.push_str(&format!("<!DOCTYPE {}>", name));
                }
                out.push_str(&self.inner_html(node));
            }
            Some(NodeKind::Fragment) => out.push_str(&self.inner_html(node)),
            Some(NodeKind::Text(t)) => {
                if raw_text {
                    out.push_str(t);
                } else {
                    out.push_str(&escape_html(t));
                }
            }
            Some(NodeKind::Comment(c)) => out.push_str(&format!("<!--{}-->", c)),
            Some(NodeKind::Element(el)) => {
                out.push('<');
                out.push_str(&el.tag);
                for (name, value) in &el.attributes {
                    out.push_str(&format!(" {}=\"{}\"", name, escape_html(value)));
                }
                out.push('>');
                if el.namespace == Namespace::Html && VOID_ELEMENTS.contains(&el.tag.as_str()) {
                    return;
                }
                out.push_str(&self.inner_html(node));
                out.push_str(&format!("</{}>", el.tag));
            }
            None => {}
        }
    }
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

pub(crate) fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_document_landmarks() {
        let doc = Document::new();
        assert_eq!(doc.tag(doc.html()), Some("html"));
        assert_eq!(doc.tag(doc.head()), Some("head"));
        assert_eq!(doc.tag(doc.body()), Some("body"));
        assert!(doc.is_attached(doc.body()));
        assert!(!doc.has_records());
    }

    #[test]
    fn test_fragment_is_spliced() {
        let mut doc = Document::new();
        let frag = doc.create_fragment();
        let a = doc.create_element("a");
        let b = doc.create_element("b");
        doc.append_child(frag, a);
        doc.append_child(frag, b);
        doc.append_child(doc.body(), frag);
        assert_eq!(doc.children(doc.body()), &[a, b]);
        assert!(doc.children(frag).is_empty());
        assert_eq!(doc.parent(a), Some(doc.body()));
    }

    #[test]
    fn test_detach_keeps_node_alive_free_releases() {
        let mut doc = Document::new();
        let div = doc.create_element("div");
        let span = doc.create_element("span");
        doc.append_child(div, span);
        doc.append_child(doc.body(), div);
        assert!(doc.is_attached(span));

        doc.remove(div);
        assert!(!doc.is_attached(span));
        assert!(doc.exists(span));

        let released = doc.free(div);
        assert_eq!(released, vec![div, span]);
        assert!(!doc.exists(span));
        assert_eq!(doc.tag(span), None);
    }

    #[test]
    fn test_attribute_case_rules() {
        let mut doc = Document::new();
        let div = doc.create_element("DIV");
        doc.set_attribute(div, "DATA-X", "1");
        assert_eq!(doc.tag(div), Some("div"));
        assert_eq!(doc.attribute(div, "data-x"), Some("1"));

        let svg = doc.create_element("svg");
        doc.set_attribute_ns(svg, None, "viewBox", "0 0 10 10");
        assert_eq!(doc.attribute(svg, "viewBox"), Some("0 0 10 10"));
        assert_eq!(
            attribute_namespace("xlink:href"),
            Some("http://www.w3.org/1999/xlink")
        );
    }

    #[test]
    fn test_records_and_serialization() {
        let mut doc = Document::new();
        let p = doc.create_element("p");
        doc.append_child(doc.body(), p);
        doc.set_attribute(p, "class", "a\"b");
        doc.set_text_content(p, "1 < 2");
        let br = doc.create_element("br");
        doc.append_child(p, br);

        let kinds: Vec<MutationKind> = doc.take_records().iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                MutationKind::ChildList,
                MutationKind::Attributes,
                MutationKind::ChildList,
                MutationKind::ChildList,
            ]
        );
        assert_eq!(doc.outer_html(p), "<p class=\"a&quot;b\">1 &lt; 2<br></p>");
        assert_eq!(doc.text_content(p), "1 < 2");
    }

    #[test]
    fn test_freed_slot_is_recycled_under_new_generation() {
        let mut doc = Document::new();
        let before = doc.capacity();
        let old = doc.create_text("a");
        doc.free(old);

        let new = doc.create_text("b");
        assert_eq!(new.index(), old.index());
        assert_ne!(new, old);
        assert!(!doc.exists(old));
        assert_eq!(doc.text_content(old), "");
        assert_eq!(doc.text_content(new), "b");
        assert_eq!(doc.capacity(), before + 1);
    }

    #[test]
    fn test_cannot_insert_ancestor_into_descendant() {
        let mut doc = Document::new();
        let outer = doc.create_element("div");
        let inner = doc.create_element("div");
        doc.append_child(outer, inner);
        doc.append_child(inner, outer);
        assert_eq!(doc.parent(outer), None);
    }
}
