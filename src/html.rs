//! Markup parsing into the arena document.
//!
//! html5ever builds an `RcDom`, which is then copied node by node into a
//! [`Document`]. Whole documents are parsed for hydration; fragments are parsed in a
//! `<body>` context for `innerHTML` substitution.

use html5ever::tendril::TendrilSink;
use html5ever::{local_name, namespace_url, ns, parse_document, parse_fragment, QualName};
use markup5ever_rcdom::{Handle, NodeData, RcDom};

use crate::dom::{Document, Namespace, NodeId};
use crate::error::BindingError;

/// Parse a full HTML document. html5ever always synthesizes `<html>`, `<head>` and
/// `<body>`, so the landmarks of the result are real elements.
pub fn parse_html(markup: &str) -> Result<Document, BindingError> {
    let dom = parse_document(RcDom::default(), Default::default())
        .from_utf8()
        .read_from(&mut markup.as_bytes())
        .map_err(|e| BindingError::Payload {
            reason: format!("failed to parse markup: {}", e),
        })?;

    let mut doc = Document::empty();
    let root = doc.root();
    for child in dom.document.children.borrow().iter() {
        if let NodeData::Doctype { name, .. } = &child.data {
            doc.set_doctype(Some(name.to_string()));
            continue;
        }
        import_node(&mut doc, root, child);
    }
    doc.locate_landmarks();
    doc.take_records();
    Ok(doc)
}

/// Parse `markup` as body content and append the resulting nodes under `parent`.
/// Returns the top-level nodes that were inserted.
pub fn parse_fragment_into(
    doc: &mut Document,
    parent: NodeId,
    markup: &str,
) -> Result<Vec<NodeId>, BindingError> {
    let context = QualName::new(None, ns!(html), local_name!("body"));
    let dom = parse_fragment(RcDom::default(), Default::default(), context, Vec::new())
        .from_utf8()
        .read_from(&mut markup.as_bytes())
        .map_err(|e| BindingError::InvalidView {
            node: "innerHTML".to_string(),
            reason: e.to_string(),
        })?;

    // The fragment parser wraps its output in a synthetic <html> element.
    let document = dom.document.children.borrow();
    let Some(wrapper) = document.first() else {
        return Ok(Vec::new());
    };
    let before = doc.children(parent).len();
    for child in wrapper.children.borrow().iter() {
        import_node(doc, parent, child);
    }
    Ok(doc.children(parent)[before..].to_vec())
}

fn import_node(doc: &mut Document, parent: NodeId, handle: &Handle) {
    let id = match &handle.data {
        NodeData::Element {
            name,
            attrs,
            template_contents,
            ..
        } => {
            let namespace = if name.ns == ns!(svg) {
                Namespace::Svg
            } else if name.ns == ns!(mathml) {
                Namespace::MathMl
            } else {
                Namespace::Html
            };
            let id = doc.create_element_ns(&name.local, namespace);
            for attr in attrs.borrow().iter() {
                let attr_name = match &attr.name.prefix {
                    Some(prefix) => format!("{}:{}", prefix, attr.name.local),
                    None => attr.name.local.to_string(),
                };
                doc.set_attribute_ns(id, None, &attr_name, &attr.value);
            }
            if let Some(contents) = template_contents.borrow().as_ref() {
                for child in contents.children.borrow().iter() {
                    import_node(doc, id, child);
                }
            }
            id
        }
        NodeData::Text { contents } => doc.create_text(&contents.borrow()),
        NodeData::Comment { contents } => doc.create_comment(contents),
        NodeData::Document | NodeData::Doctype { .. } | NodeData::ProcessingInstruction { .. } => {
            return
        }
    };
    doc.append_child(parent, id);
    for child in handle.children.borrow().iter() {
        import_node(doc, id, child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_document_landmarks() {
        let doc = parse_html(
            "<!DOCTYPE html><html><head><title>t</title></head><body><p id=\"a\">hi</p></body></html>",
        )
        .unwrap();
        assert_eq!(doc.tag(doc.body()), Some("body"));
        let p = doc.find_by_attribute("id", "a").unwrap();
        assert_eq!(doc.text_content(p), "hi");
        assert_eq!(doc.parent(p), Some(doc.body()));
        assert!(doc.outer_html(doc.root()).starts_with("<!DOCTYPE html><html>"));
    }

    #[test]
    fn test_svg_attributes_keep_case() {
        let doc = parse_html("<body><svg viewBox=\"0 0 4 4\"><circle r=\"1\"/></svg></body>").unwrap();
        let svg = doc.children(doc.body())[0];
        assert_eq!(doc.element(svg).map(|e| e.namespace), Some(Namespace::Svg));
        assert_eq!(doc.attribute(svg, "viewBox"), Some("0 0 4 4"));
    }

    #[test]
    fn test_fragment_into_parent() {
        let mut doc = Document::new();
        let div = doc.create_element("div");
        let inserted = parse_fragment_into(&mut doc, div, "<b>x</b> tail").unwrap();
        assert_eq!(inserted.len(), 2);
        assert_eq!(doc.inner_html(div), "<b>x</b> tail");
    }
}
