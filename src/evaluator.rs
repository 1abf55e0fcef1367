//! Named evaluator registry.
//!
//! Evaluators are registered ahead of time under stable string keys. Views, handler
//! records and the resume payload only ever carry those keys, so the same tree can be
//! rendered on the server and re-bound on the client without shipping code.

use indexmap::IndexMap;
use serde_json::Value;
use std::fmt;
use std::rc::Rc;

use crate::delegation::Event;
use crate::dom::NodeId;
use crate::engine::Engine;
use crate::error::BindingError;
use crate::imports::ResolvedPipe;
use crate::view::{Elements, Output};

/// Computes a property from the current value at the handler's binding path.
pub type HandlerFn = Rc<dyn Fn(&Value, &Elements, &ResolvedPipe) -> Option<Output>>;

/// Reacts to a dispatched event or mutation.
pub type DelegateFn = Rc<dyn Fn(&mut DelegateContext<'_>)>;

/// A plain function exposed to evaluators through a pipe (`$fn:<key>`).
pub type PipeFn = Rc<dyn Fn(&[Value]) -> Value>;

/// Everything a delegate sees when it runs.
pub struct DelegateContext<'a> {
    pub engine: &'a mut Engine,
    /// The declared target that matched the event.
    pub node: NodeId,
    pub pipe: &'a ResolvedPipe,
    pub elements: &'a Elements,
    pub event: &'a Event,
}

#[derive(Clone, Default)]
pub struct EvaluatorRegistry {
    handlers: IndexMap<String, HandlerFn>,
    delegates: IndexMap<String, DelegateFn>,
    functions: IndexMap<String, PipeFn>,
}

impl fmt::Debug for EvaluatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluatorRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("delegates", &self.delegates.keys().collect::<Vec<_>>())
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl EvaluatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler<F>(mut self, key: &str, f: F) -> Self
    where
        F: Fn(&Value, &Elements, &ResolvedPipe) -> Option<Output> + 'static,
    {
        self.handlers.insert(key.to_string(), Rc::new(f));
        self
    }

    pub fn delegate<F>(mut self, key: &str, f: F) -> Self
    where
        F: Fn(&mut DelegateContext<'_>) + 'static,
    {
        self.delegates.insert(key.to_string(), Rc::new(f));
        self
    }

    pub fn function<F>(mut self, key: &str, f: F) -> Self
    where
        F: Fn(&[Value]) -> Value + 'static,
    {
        self.functions.insert(key.to_string(), Rc::new(f));
        self
    }

    pub fn get_handler(&self, key: &str) -> Result<HandlerFn, BindingError> {
        self.handlers.get(key).cloned().ok_or_else(|| unknown(key))
    }

    pub fn get_delegate(&self, key: &str) -> Result<DelegateFn, BindingError> {
        self.delegates.get(key).cloned().ok_or_else(|| unknown(key))
    }

    pub fn get_function(&self, key: &str) -> Result<PipeFn, BindingError> {
        self.functions.get(key).cloned().ok_or_else(|| unknown(key))
    }

    /// True when `key` names a handler or a delegate.
    pub fn contains(&self, key: &str) -> bool {
        self.handlers.contains_key(key) || self.delegates.contains_key(key)
    }
}

fn unknown(key: &str) -> BindingError {
    BindingError::UnknownEvaluator {
        key: key.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_by_kind() {
        let registry = EvaluatorRegistry::new()
            .handler("show", |v, _, _| Some(Output::Value(v.clone())))
            .function("double", |args| json!(args[0].as_i64().unwrap_or(0) * 2));

        assert!(registry.contains("show"));
        assert!(registry.get_handler("show").is_ok());
        assert_eq!(registry.get_function("double").unwrap()(&[json!(4)]), json!(8));
        assert_eq!(
            registry.get_delegate("show").err().map(|e| e.code()),
            Some("Z-BIND-EVAL-001")
        );
    }
}
