//! # Zenith Binding Engine
//!
//! Reactive data binding and DOM reconciliation over an arena document.
//!
//! ## Binding Invariants
//!
//! 1. **Exact Paths**: a change at `list[0].name` re-runs only the handlers registered at
//!    `list[0].name` and the handlers whose triggers are registered there. Parents and
//!    children of a changed path are never notified unless the opt-in ancestor
//!    fallback is configured.
//!
//! 2. **Own Value**: a handler is always evaluated against its own binding path, even
//!    when it runs because of a trigger.
//!
//! 3. **Total Reads**: `get` never fails. A path that holds nothing yields the configured
//!    default (empty string unless overridden).
//!
//! 4. **Lifecycle Coupling**: no record is invoked against a node that has left the live
//!    tree. Such records are pruned, never reported to the caller.
//!
//! 5. **Opaque Identity**: only evaluator keys, literal pipe values and `data-zen-ref`
//!    ids cross the server/client boundary. Code never does.
//!
//! ## Modes
//!
//! A server engine renders once with [`Engine::render_to_string`], which appends a
//! bootstrap script carrying the store and every registry. A client engine is built
//! from that markup with [`Engine::hydrate`] and updates incrementally from there.

#[cfg(feature = "napi")]
use napi_derive::napi;

mod config;
mod delegation;
mod dom;
mod engine;
mod error;
mod evaluator;
mod gc;
mod html;
mod hydrate;
mod imports;
mod path;
mod registry;
mod render;
mod scheduler;
mod store;
mod sync;
mod update;
mod view;
mod visitor;

#[cfg(test)]
mod delegation_tests;
#[cfg(test)]
mod render_tests;

/// Attribute carrying a node's opaque id.
pub const REF_ATTRIBUTE: &str = "data-zen-ref";

pub use config::{ChangePolicy, EngineConfig, Mode, UpdateScope};
pub use delegation::{DelegateKey, DelegateRecord, DelegateSummary, DelegationRegistry, Event, EventKind};
pub use dom::{Document, MutationKind, MutationRecord, Namespace, NodeId, NodeKind};
pub use engine::{Engine, Review, TrackedArray};
pub use error::{BindingError, ErrorClass};
pub use evaluator::{DelegateContext, DelegateFn, EvaluatorRegistry, HandlerFn, PipeFn};
pub use gc::DestroyTarget;
pub use html::{parse_fragment_into, parse_html};
pub use hydrate::{
    bootstrap_script, extract, payload_digest, DelegateEntry, HandlerEntry, ResumeState, TriggerEntry,
    BOOTSTRAP_ATTRIBUTE,
};
pub use imports::{
    Capability, ImportResolver, JsonModuleLoader, Module, ModuleLoader, Pipe, PipeEntry, ResolvedPipe,
    StaticModules,
};
pub use path::{BindingPath, Segment};
pub use registry::{
    BindingRegistry, HandlerKey, HandlerRecord, HandlerSummary, NodeHandle, RecordKey, TriggerRecord,
};
pub use scheduler::{Scheduler, TimerKey};
pub use store::Store;
pub use sync::SyncTransport;
pub use view::{ElementView, Elements, Output, Prop, View};
pub use visitor::{walk_element, walk_list, walk_prop, walk_view, ViewVisitor};

/// Render a JSON view tree against a JSON store in server mode. Evaluator references
/// cannot be resolved across the bridge, so only literal trees render meaningfully.
#[cfg(feature = "napi")]
#[napi]
pub fn render_static_native(view_json: String, store_json: String) -> napi::Result<String> {
    let view: serde_json::Value =
        serde_json::from_str(&view_json).map_err(|e| napi::Error::from_reason(e.to_string()))?;
    let store: serde_json::Value =
        serde_json::from_str(&store_json).map_err(|e| napi::Error::from_reason(e.to_string()))?;
    let mut engine = Engine::new(EngineConfig::server(), EvaluatorRegistry::new())
        .with_store(store)
        .map_err(|e| napi::Error::from_reason(e.to_string()))?;
    engine
        .render_to_string(&View::from_json(&view))
        .map_err(|e| napi::Error::from_reason(e.to_string()))
}
