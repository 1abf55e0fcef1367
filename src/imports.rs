//! Pipes and import resolution.
//!
//! A pipe is the capability bundle passed to an evaluator next to its value. Its
//! entries are literals, references to registered functions (`$fn:<key>`) or pending
//! imports (`$import:<locator>`). The resolver loads each locator at most once per
//! engine, caches the module, and gives a failing locator exactly one more attempt
//! before dropping it for good.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::error::BindingError;
use crate::evaluator::{EvaluatorRegistry, PipeFn};
use crate::view::FN_MARKER;

pub const IMPORT_MARKER: &str = "$import:";

/// Load attempts per locator before it is dropped.
const MAX_LOAD_ATTEMPTS: u8 = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum PipeEntry {
    Literal(Value),
    Function(String),
    Import {
        locator: String,
        /// Value known at render time, used on the server instead of loading.
        server_value: Option<Value>,
    },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pipe {
    entries: IndexMap<String, PipeEntry>,
}

impl Pipe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn literal(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.entries
            .insert(name.to_string(), PipeEntry::Literal(value.into()));
        self
    }

    pub fn function(mut self, name: &str, key: &str) -> Self {
        self.entries
            .insert(name.to_string(), PipeEntry::Function(key.to_string()));
        self
    }

    pub fn import(mut self, name: &str, locator: &str, server_value: Option<Value>) -> Self {
        self.entries.insert(
            name.to_string(),
            PipeEntry::Import {
                locator: locator.to_string(),
                server_value,
            },
        );
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &PipeEntry)> {
        self.entries.iter()
    }

    /// Decode the wire form: `"$fn:key"`, `"$import:loc"`,
    /// `{ "$import": "loc", "server": value }`, or any literal.
    pub fn from_json(value: &Value) -> Pipe {
        let mut pipe = Pipe::new();
        let Value::Object(fields) = value else {
            if !value.is_null() {
                tracing::warn!(pipe = %value, "pipe is not an object, ignoring");
            }
            return pipe;
        };
        for (name, raw) in fields {
            let entry = match raw {
                Value::String(s) if s.starts_with(FN_MARKER) => {
                    PipeEntry::Function(s[FN_MARKER.len()..].to_string())
                }
                Value::String(s) if s.starts_with(IMPORT_MARKER) => PipeEntry::Import {
                    locator: s[IMPORT_MARKER.len()..].to_string(),
                    server_value: None,
                },
                Value::Object(obj) if obj.get("$import").is_some_and(Value::is_string) => {
                    PipeEntry::Import {
                        locator: obj["$import"].as_str().unwrap_or_default().to_string(),
                        server_value: obj.get("server").cloned(),
                    }
                }
                other => PipeEntry::Literal(other.clone()),
            };
            pipe.entries.insert(name.clone(), entry);
        }
        pipe
    }

    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        for (name, entry) in &self.entries {
            let raw = match entry {
                PipeEntry::Literal(v) => v.clone(),
                PipeEntry::Function(key) => Value::String(format!("{}{}", FN_MARKER, key)),
                PipeEntry::Import {
                    locator,
                    server_value: None,
                } => Value::String(format!("{}{}", IMPORT_MARKER, locator)),
                PipeEntry::Import {
                    locator,
                    server_value: Some(server),
                } => json!({ "$import": locator, "server": server }),
            };
            out.insert(name.clone(), raw);
        }
        Value::Object(out)
    }
}

impl Serialize for Pipe {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Pipe {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Pipe::from_json(&Value::deserialize(deserializer)?))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESOLVED CAPABILITIES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub enum Capability {
    Value(Value),
    Function(PipeFn),
    Null,
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Capability::Function(_) => f.write_str("Function(..)"),
            Capability::Null => f.write_str("Null"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResolvedPipe {
    capabilities: IndexMap<String, Capability>,
}

impl ResolvedPipe {
    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.capabilities.get(name)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        match self.capabilities.get(name) {
            Some(Capability::Value(v)) => Some(v),
            _ => None,
        }
    }

    /// Call a function capability. `None` when `name` is missing or not callable.
    pub fn call(&self, name: &str, args: &[Value]) -> Option<Value> {
        match self.capabilities.get(name) {
            Some(Capability::Function(f)) => Some(f(args)),
            _ => None,
        }
    }

    pub fn is_null(&self, name: &str) -> bool {
        matches!(self.capabilities.get(name), Some(Capability::Null))
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MODULE LOADING
// ═══════════════════════════════════════════════════════════════════════════════

/// A loaded module: named exports, with `default` as the fallback export.
#[derive(Debug, Clone, Default)]
pub struct Module {
    exports: IndexMap<String, Capability>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn export_value(mut self, name: &str, value: Value) -> Self {
        self.exports.insert(name.to_string(), Capability::Value(value));
        self
    }

    pub fn export_fn<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&[Value]) -> Value + 'static,
    {
        self.exports
            .insert(name.to_string(), Capability::Function(std::rc::Rc::new(f)));
        self
    }

    /// The export named `name`, else `default`.
    pub fn export(&self, name: &str) -> Option<&Capability> {
        self.exports.get(name).or_else(|| self.exports.get("default"))
    }
}

pub trait ModuleLoader {
    fn load(&self, locator: &str) -> Result<Module, String>;
}

/// In-memory modules keyed by locator.
#[derive(Debug, Clone, Default)]
pub struct StaticModules {
    modules: HashMap<String, Module>,
}

impl StaticModules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, locator: &str, module: Module) -> Self {
        self.modules.insert(locator.to_string(), module);
        self
    }
}

impl ModuleLoader for StaticModules {
    fn load(&self, locator: &str) -> Result<Module, String> {
        self.modules
            .get(locator)
            .cloned()
            .ok_or_else(|| format!("no module registered at {}", locator))
    }
}

/// Reads `<root>/<locator>` as JSON. Top-level object keys become exports and the
/// whole document is the `default` export. Locators never leave `root`.
#[derive(Debug, Clone)]
pub struct JsonModuleLoader {
    root: PathBuf,
}

impl JsonModuleLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ModuleLoader for JsonModuleLoader {
    fn load(&self, locator: &str) -> Result<Module, String> {
        let relative = Path::new(locator.trim_start_matches('/'));
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(format!("{} escapes the module root", locator));
        }
        let file = self.root.join(relative);
        let raw = std::fs::read_to_string(&file)
            .map_err(|e| format!("{}: {}", file.display(), e))?;
        let doc: Value = serde_json::from_str(&raw).map_err(|e| format!("{}: {}", file.display(), e))?;
        let mut module = Module::new();
        if let Value::Object(fields) = &doc {
            for (name, value) in fields {
                module = module.export_value(name, value.clone());
            }
        }
        if !module.exports.contains_key("default") {
            module = module.export_value("default", doc);
        }
        Ok(module)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESOLVER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct ImportResolver {
    loader: Option<Box<dyn ModuleLoader>>,
    cache: HashMap<String, Module>,
    attempts: HashMap<String, u8>,
    dropped: HashSet<String>,
}

impl fmt::Debug for ImportResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportResolver")
            .field("cached", &self.cache.keys().collect::<Vec<_>>())
            .field("dropped", &self.dropped)
            .finish()
    }
}

impl ImportResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_loader(&mut self, loader: Box<dyn ModuleLoader>) {
        self.loader = Some(loader);
    }

    pub fn is_cached(&self, locator: &str) -> bool {
        self.cache.contains_key(locator)
    }

    pub fn is_dropped(&self, locator: &str) -> bool {
        self.dropped.contains(locator)
    }

    /// Resolve every entry of `pipe`. Never fails: anything unresolvable becomes
    /// [`Capability::Null`] after being logged.
    pub fn resolve(&mut self, pipe: &Pipe, evaluators: &EvaluatorRegistry, server: bool) -> ResolvedPipe {
        let mut resolved = ResolvedPipe::default();
        for (name, entry) in pipe.entries() {
            let capability = match entry {
                PipeEntry::Literal(v) => Capability::Value(v.clone()),
                PipeEntry::Function(key) => match evaluators.get_function(key) {
                    Ok(f) => Capability::Function(f),
                    Err(e) => {
                        tracing::error!(code = e.code(), capability = %name, error = %e, "unresolved pipe function");
                        Capability::Null
                    }
                },
                PipeEntry::Import {
                    server_value: Some(value),
                    ..
                } if server => Capability::Value(value.clone()),
                PipeEntry::Import { locator, .. } => self
                    .module(locator)
                    .and_then(|m| m.export(name).cloned())
                    .unwrap_or(Capability::Null),
            };
            resolved.capabilities.insert(name.clone(), capability);
        }
        resolved
    }

    fn module(&mut self, locator: &str) -> Option<&Module> {
        if self.dropped.contains(locator) {
            return None;
        }
        if !self.cache.contains_key(locator) {
            let loaded = match &self.loader {
                Some(loader) => loader.load(locator),
                None => Err("no module loader configured".to_string()),
            };
            match loaded {
                Ok(module) => {
                    self.attempts.remove(locator);
                    self.cache.insert(locator.to_string(), module);
                }
                Err(reason) => {
                    let e = BindingError::ImportFailed {
                        locator: locator.to_string(),
                        reason,
                    };
                    let attempts = self.attempts.entry(locator.to_string()).or_insert(0);
                    *attempts += 1;
                    if *attempts >= MAX_LOAD_ATTEMPTS {
                        tracing::error!(code = e.code(), error = %e, "dropping import after retry");
                        self.attempts.remove(locator);
                        self.dropped.insert(locator.to_string());
                    } else {
                        tracing::warn!(code = e.code(), error = %e, "import failed, will retry once");
                    }
                    return None;
                }
            }
        }
        self.cache.get(locator)
    }
}
