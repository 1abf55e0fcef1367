//! Server to client resumption.
//!
//! A server render ends with a module script:
//!
//! ```html
//! <script type="module" data-zen-bootstrap>import { hydrate } from "/zenith/binding.js";
//! hydrate("<store>", "<handlers>", "<delegates>", "<triggers>", "<sha256>");</script>
//! ```
//!
//! Each payload is JSON embedded in a JS string literal. Nodes are referenced by the
//! opaque id in their `data-zen-ref` attribute, evaluators by registry key. On the
//! client, [`Engine::hydrate`] reads the literals back with oxc, checks the digest,
//! rebuilds the registries with pending handles and resolves them against the parsed
//! markup.

use oxc_allocator::Allocator;
use oxc_ast::ast::{Argument, CallExpression, Expression};
use oxc_ast_visit::Visit;
use oxc_parser::Parser;
use oxc_span::SourceType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::config::{EngineConfig, Mode};
use crate::delegation::{DelegateRecord, EventKind};
use crate::dom::Document;
use crate::engine::Engine;
use crate::error::BindingError;
use crate::evaluator::EvaluatorRegistry;
use crate::html::parse_html;
use crate::imports::Pipe;
use crate::path::BindingPath;
use crate::registry::{HandlerKey, HandlerRecord, NodeHandle};
use crate::store::Store;
use crate::REF_ATTRIBUTE;

pub const BOOTSTRAP_ATTRIBUTE: &str = "data-zen-bootstrap";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerEntry {
    #[serde(rename = "ref")]
    pub node_ref: String,
    pub path: BindingPath,
    pub evaluator: String,
    pub property: String,
    #[serde(default, skip_serializing_if = "Pipe::is_empty")]
    pub pipe: Pipe,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegateEntry {
    #[serde(rename = "ref")]
    pub node_ref: String,
    pub kind: String,
    pub evaluator: String,
    #[serde(default, skip_serializing_if = "Pipe::is_empty")]
    pub pipe: Pipe,
    #[serde(default)]
    pub prevent_default: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEntry {
    /// Absolute trigger path.
    pub path: BindingPath,
    /// The handler's own binding path.
    pub binding: BindingPath,
    /// Index into the handler table.
    pub handler: usize,
}

/// Everything a client needs to pick up where the server left off.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResumeState {
    pub store: Value,
    pub handlers: Vec<HandlerEntry>,
    pub delegates: Vec<DelegateEntry>,
    pub triggers: Vec<TriggerEntry>,
}

impl ResumeState {
    /// The four JSON payloads in bootstrap argument order.
    pub fn payloads(&self) -> Result<[String; 4], BindingError> {
        let encode = |value: Result<String, serde_json::Error>| {
            value.map_err(|e| BindingError::Payload {
                reason: e.to_string(),
            })
        };
        Ok([
            encode(serde_json::to_string(&self.store))?,
            encode(serde_json::to_string(&self.handlers))?,
            encode(serde_json::to_string(&self.delegates))?,
            encode(serde_json::to_string(&self.triggers))?,
        ])
    }

    fn from_payloads(payloads: &[String]) -> Result<Self, BindingError> {
        fn decode<T: serde::de::DeserializeOwned>(what: &str, raw: &str) -> Result<T, BindingError> {
            serde_json::from_str(raw).map_err(|e| BindingError::Payload {
                reason: format!("{} payload: {}", what, e),
            })
        }
        Ok(Self {
            store: decode("store", &payloads[0])?,
            handlers: decode("handler", &payloads[1])?,
            delegates: decode("delegate", &payloads[2])?,
            triggers: decode("trigger", &payloads[3])?,
        })
    }
}

/// SHA-256 over the payloads, each terminated by a NUL byte.
pub fn payload_digest(payloads: &[String]) -> String {
    let mut hasher = Sha256::new();
    for payload in payloads {
        hasher.update(payload.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// Make `s` safe inside a double-quoted JS string inside a `<script>` element.
/// Every `<` is escaped, so neither `</script` nor `<!--` reaches the tokenizer.
pub(crate) fn escape_js_string(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('\"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('<', "\\u003c")
}

pub fn bootstrap_script(state: &ResumeState, runtime_module: &str) -> Result<String, BindingError> {
    let payloads = state.payloads()?;
    let digest = payload_digest(&payloads);
    let args: Vec<String> = payloads
        .iter()
        .chain(std::iter::once(&digest))
        .map(|p| format!("\"{}\"", escape_js_string(p)))
        .collect();
    Ok(format!(
        "<script type=\"module\" {}>import {{ hydrate }} from \"{}\";\nhydrate({});</script>",
        BOOTSTRAP_ATTRIBUTE,
        escape_js_string(runtime_module),
        args.join(", ")
    ))
}

// ═══════════════════════════════════════════════════════════════════════════════
// CLIENT SIDE
// ═══════════════════════════════════════════════════════════════════════════════

/// Collects the string arguments of the first `hydrate(...)` call.
struct HydrateCall {
    args: Option<Result<Vec<String>, String>>,
}

impl<'a> Visit<'a> for HydrateCall {
    fn visit_call_expression(&mut self, expr: &CallExpression<'a>) {
        if self.args.is_none() {
            if let Expression::Identifier(ident) = &expr.callee {
                if ident.name == "hydrate" {
                    self.args = Some(
                        expr.arguments
                            .iter()
                            .enumerate()
                            .map(|(i, arg)| match arg {
                                Argument::StringLiteral(lit) => Ok(lit.value.to_string()),
                                _ => Err(format!("argument {} is not a string literal", i)),
                            })
                            .collect(),
                    );
                    return;
                }
            }
        }
        oxc_ast_visit::walk::walk_call_expression(self, expr);
    }
}

fn hydrate_arguments(source: &str) -> Result<Vec<String>, BindingError> {
    let allocator = Allocator::default();
    let source_type = SourceType::default().with_module(true);
    let ret = Parser::new(&allocator, source, source_type).parse();
    if !ret.errors.is_empty() {
        return Err(BindingError::Payload {
            reason: format!("bootstrap script does not parse ({} errors)", ret.errors.len()),
        });
    }
    let mut call = HydrateCall { args: None };
    call.visit_program(&ret.program);
    match call.args {
        Some(Ok(args)) => Ok(args),
        Some(Err(reason)) => Err(BindingError::Payload { reason }),
        None => Err(BindingError::Payload {
            reason: "bootstrap script has no hydrate(...) call".to_string(),
        }),
    }
}

/// Parse server markup and decode its bootstrap payload.
pub fn extract(markup: &str) -> Result<(Document, ResumeState), BindingError> {
    let doc = parse_html(markup)?;
    let script = doc
        .descendants(doc.root())
        .into_iter()
        .find(|n| doc.tag(*n) == Some("script") && doc.has_attribute(*n, BOOTSTRAP_ATTRIBUTE))
        .ok_or_else(|| BindingError::Payload {
            reason: "markup has no bootstrap script".to_string(),
        })?;
    let args = hydrate_arguments(&doc.text_content(script))?;
    if args.len() != 5 {
        return Err(BindingError::Payload {
            reason: format!("hydrate takes 5 arguments, found {}", args.len()),
        });
    }
    if payload_digest(&args[..4]) != args[4] {
        return Err(BindingError::Payload {
            reason: "payload digest mismatch".to_string(),
        });
    }
    let state = ResumeState::from_payloads(&args[..4])?;
    Ok((doc, state))
}

impl Engine {
    /// Snapshot of this engine for the bootstrap script. Nodes without an opaque id
    /// are given one.
    pub fn resume_state(&mut self) -> ResumeState {
        let mut index: HashMap<HandlerKey, usize> = HashMap::new();
        let mut handlers = Vec::new();
        for key in self.bindings.keys() {
            let Some(record) = self.bindings.get(key).cloned() else {
                continue;
            };
            let node_ref = self.ref_for(&record.element);
            index.insert(key, handlers.len());
            handlers.push(HandlerEntry {
                node_ref,
                path: record.binding_path,
                evaluator: record.evaluator,
                property: record.target_property,
                pipe: record.pipe,
            });
        }

        let mut delegates = Vec::new();
        for key in self.delegation.keys() {
            let Some(record) = self.delegation.get(key).cloned() else {
                continue;
            };
            delegates.push(DelegateEntry {
                node_ref: self.ref_for(&record.target),
                kind: record.kind.to_string(),
                evaluator: record.evaluator,
                pipe: record.pipe,
                prevent_default: record.prevent_default,
            });
        }

        let mut triggers = Vec::new();
        for (absolute, list) in self.bindings.triggers() {
            let Ok(path) = BindingPath::parse(absolute) else {
                continue;
            };
            for trigger in list {
                if let Some(handler) = index.get(&trigger.handler) {
                    triggers.push(TriggerEntry {
                        path: path.clone(),
                        binding: trigger.binding_path.clone(),
                        handler: *handler,
                    });
                }
            }
        }

        ResumeState {
            store: self.store.snapshot().clone(),
            handlers,
            delegates,
            triggers,
        }
    }

    fn ref_for(&mut self, handle: &NodeHandle) -> String {
        match handle {
            NodeHandle::Resolved(node) => self.ensure_ref(*node),
            NodeHandle::Pending(id) => id.clone(),
        }
    }

    pub(crate) fn bootstrap_script(&mut self) -> Result<String, BindingError> {
        let state = self.resume_state();
        bootstrap_script(&state, &self.config.runtime_module)
    }

    /// Rebuild a client engine from server markup: re-register every record with a
    /// pending handle, resolve the handles against the parsed document, install
    /// listeners, and fire `load` delegates once.
    pub fn hydrate(
        markup: &str,
        evaluators: EvaluatorRegistry,
        mut config: EngineConfig,
    ) -> Result<Engine, BindingError> {
        let (doc, state) = extract(markup).map_err(|e| {
            tracing::error!(code = e.code(), error = %e, "hydration aborted");
            e
        })?;
        config.mode = Mode::Client;
        let store = Store::from_snapshot(state.store, config.default_value.clone(), config.change_policy)?;

        let mut engine = Engine::new(config, evaluators);
        engine.next_ref = next_free_ref(&doc);
        engine.store = store;
        engine.doc = doc;

        let mut keys = Vec::with_capacity(state.handlers.len());
        for entry in state.handlers {
            keys.push(engine.bindings.register(HandlerRecord {
                element: NodeHandle::Pending(entry.node_ref),
                evaluator: entry.evaluator,
                target_property: entry.property,
                pipe: entry.pipe,
                binding_path: entry.path,
            }));
        }
        for trigger in state.triggers {
            match keys.get(trigger.handler) {
                Some(key) => engine
                    .bindings
                    .register_trigger_at(&trigger.path, trigger.binding, *key),
                None => tracing::error!(path = %trigger.path, handler = trigger.handler, "trigger refers to a missing handler"),
            }
        }
        for key in keys {
            let Some(NodeHandle::Pending(id)) = engine.bindings.get(key).map(|r| r.element.clone()) else {
                continue;
            };
            match engine.doc.find_by_attribute(REF_ATTRIBUTE, &id) {
                Some(node) => engine.bindings.mark_resolved(key, node),
                None => {
                    let e = BindingError::UnresolvedRef { id };
                    tracing::error!(code = e.code(), error = %e, "dropping handler");
                    engine.bindings.remove(key);
                }
            }
        }

        for entry in state.delegates {
            let Some(kind) = EventKind::parse(&entry.kind) else {
                let e = BindingError::Payload {
                    reason: format!("unknown delegate kind {:?}", entry.kind),
                };
                tracing::error!(code = e.code(), error = %e, "skipping delegate");
                continue;
            };
            let node_ref = entry.node_ref.clone();
            let key = engine.register_delegate(DelegateRecord {
                target: NodeHandle::Pending(entry.node_ref),
                evaluator: entry.evaluator,
                pipe: entry.pipe,
                prevent_default: entry.prevent_default,
                kind,
            });
            if engine.resolve_delegate_target(key).is_none() {
                tracing::debug!(%node_ref, "delegate target not in markup yet");
            }
        }

        engine.doc.take_records();
        engine.fire_load();
        Ok(engine)
    }
}

/// One past the highest `zrN` id present in `doc`.
fn next_free_ref(doc: &Document) -> usize {
    doc.descendants(doc.root())
        .into_iter()
        .filter_map(|n| doc.attribute(n, REF_ATTRIBUTE))
        .filter_map(|id| id.strip_prefix("zr").and_then(|n| n.parse::<usize>().ok()))
        .max()
        .map_or(0, |n| n.saturating_add(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_escape_js_string() {
        assert_eq!(escape_js_string("a\"b"), "a\\\"b");
        assert_eq!(escape_js_string("l1\nl2\r"), "l1\\nl2\\r");
        assert_eq!(escape_js_string("</script>"), "\\u003c/script>");
        assert_eq!(escape_js_string("<!--<script>"), "\\u003c!--\\u003cscript>");
        assert_eq!(escape_js_string("c:\\x"), "c:\\\\x");
    }

    #[test]
    fn test_script_arguments_decode_back() {
        let state = ResumeState {
            store: json!({ "note": "say \"hi\"\n</script>" }),
            ..ResumeState::default()
        };
        let script = bootstrap_script(&state, "/zenith/binding.js").unwrap();
        assert!(!script[..script.len() - "</script>".len()].contains("</script>"));

        let markup = format!("<!DOCTYPE html><html><body>{}</body></html>", script);
        let (_, decoded) = extract(&markup).unwrap();
        assert_eq!(decoded.store, state.store);
        assert!(decoded.handlers.is_empty());
    }

    #[test]
    fn test_comment_opener_in_payload_keeps_script_intact() {
        let state = ResumeState {
            store: json!({ "note": "<!--<script>" }),
            ..ResumeState::default()
        };
        let script = bootstrap_script(&state, "/zenith/binding.js").unwrap();
        assert!(!script.contains("<!--"));

        let markup = format!("<!DOCTYPE html><html><body>{}<p>after</p></body></html>", script);
        let (doc, decoded) = extract(&markup).unwrap();
        assert_eq!(decoded.store, state.store);
        assert!(doc.descendants(doc.root()).into_iter().any(|n| doc.tag(n) == Some("p")));
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let state = ResumeState {
            store: json!({ "count": 1 }),
            ..ResumeState::default()
        };
        let script = bootstrap_script(&state, "/rt.js")
            .unwrap()
            .replace("\\\"count\\\":1", "\\\"count\\\":9");
        let err = extract(&script).unwrap_err();
        assert_eq!(err.code(), "Z-BIND-HYDRATE-001");
        assert!(err.to_string().contains("digest"));
    }

    #[test]
    fn test_missing_script_is_rejected() {
        assert!(extract("<p>no bootstrap</p>").is_err());
    }
}
