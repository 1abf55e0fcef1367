use crate::delegation::EventKind;
use crate::engine::Engine;
use crate::error::BindingError;
use crate::evaluator::EvaluatorRegistry;
use crate::imports::PipeEntry;
use crate::path::BindingPath;
use crate::view::{ElementView, Prop, View};

/// The ViewVisitor trait is the one traversal mechanism for view trees.
///
/// Rules:
/// 1. Traversal order is document order and fixed.
/// 2. Implementers override `visit_*` methods to add behavior.
/// 3. Implementers call the matching `walk_*` function to continue, unless pruning is intended.
pub trait ViewVisitor {
    fn visit_view(&mut self, view: &View) {
        walk_view(self, view);
    }

    fn visit_element(&mut self, element: &ElementView) {
        walk_element(self, element);
    }

    fn visit_prop(&mut self, _element: &ElementView, _key: &str, prop: &Prop) {
        walk_prop(self, prop);
    }

    fn visit_text(&mut self, _text: &str) {
        // Leaf node, nothing to walk
    }

    fn visit_list(&mut self, items: &[View]) {
        walk_list(self, items);
    }
}

pub fn walk_view<V: ViewVisitor + ?Sized>(visitor: &mut V, view: &View) {
    match view {
        View::Empty => {}
        View::Text(text) => visitor.visit_text(text),
        View::Element(element) => visitor.visit_element(element),
        View::List(items) => visitor.visit_list(items),
    }
}

pub fn walk_list<V: ViewVisitor + ?Sized>(visitor: &mut V, items: &[View]) {
    for item in items {
        visitor.visit_view(item);
    }
}

pub fn walk_element<V: ViewVisitor + ?Sized>(visitor: &mut V, element: &ElementView) {
    for (key, prop) in &element.props {
        visitor.visit_prop(element, key, prop);
    }
}

pub fn walk_prop<V: ViewVisitor + ?Sized>(visitor: &mut V, prop: &Prop) {
    if let Prop::Views(views) = prop {
        walk_list(visitor, views);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATIC CHECKS
// ═══════════════════════════════════════════════════════════════════════════════

/// Finds the problems `render` would log, without rendering anything.
struct BindingChecker<'a> {
    evaluators: &'a EvaluatorRegistry,
    errors: Vec<BindingError>,
}

impl ViewVisitor for BindingChecker<'_> {
    fn visit_element(&mut self, element: &ElementView) {
        if let Some(raw) = element.binding() {
            if let Err(e) = BindingPath::parse(raw) {
                self.errors.push(e);
            }
        }
        walk_element(self, element);
    }

    fn visit_prop(&mut self, element: &ElementView, key: &str, prop: &Prop) {
        match prop {
            Prop::Evaluator(evaluator) if EventKind::parse(key).is_some() => {
                if let Err(e) = self.evaluators.get_delegate(evaluator) {
                    self.errors.push(e);
                }
            }
            Prop::Evaluator(evaluator) => {
                if element.binding().is_none() {
                    self.errors.push(BindingError::MissingBinding {
                        tag: element.tag().to_string(),
                        property: key.to_string(),
                    });
                }
                if let Err(e) = self.evaluators.get_handler(evaluator) {
                    self.errors.push(e);
                }
            }
            Prop::Pipe(pipe) if key == "pipe" => {
                for (_, entry) in pipe.entries() {
                    if let PipeEntry::Function(f) = entry {
                        if let Err(e) = self.evaluators.get_function(f) {
                            self.errors.push(e);
                        }
                    }
                }
            }
            Prop::Pipe(_) => self.errors.push(BindingError::InvalidView {
                node: format!("<{}>", element.tag()),
                reason: format!("a pipe is only valid under `pipe`, found one under `{}`", key),
            }),
            _ => walk_prop(self, prop),
        }
    }
}

impl Engine {
    /// Check `view` against this engine's evaluators. Returns every problem found,
    /// in document order.
    pub fn validate(&self, view: &View) -> Vec<BindingError> {
        let mut checker = BindingChecker {
            evaluators: &self.evaluators,
            errors: Vec::new(),
        };
        checker.visit_view(view);
        checker.errors
    }
}
