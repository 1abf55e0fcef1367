//! Engine configuration.
//!
//! Every field has a default so a config file only needs to name what it changes:
//!
//! ```json
//! { "mode": "server", "changePolicy": "deepDiff", "syncEndpoints": { "cart": "/api/cart" } }
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::BindingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Incremental rendering against a live document.
    #[default]
    Client,
    /// One-pass rendering to markup plus a resume payload.
    Server,
}

/// How `set` computes the paths it reports as changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ChangePolicy {
    /// Report the assigned path, whatever changed beneath it.
    #[default]
    Shallow,
    /// Recurse into nested objects and report only the leaves that differ.
    DeepDiff,
}

/// Which handlers `notify` considers for a changed path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum UpdateScope {
    /// Handlers and triggers registered at exactly the changed path.
    #[default]
    Exact,
    /// As `Exact`, but when nothing is registered there the nearest ancestor
    /// with handlers is re-run instead.
    AncestorFallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub mode: Mode,
    /// Returned by `get` for any path that holds nothing.
    pub default_value: Value,
    pub change_policy: ChangePolicy,
    pub update_scope: UpdateScope,
    pub gc_debounce_ms: u64,
    pub load_poll_interval_ms: u64,
    pub load_timeout_ms: u64,
    pub sync_debounce_ms: u64,
    /// Hook name to endpoint URL for outbound sync.
    pub sync_endpoints: IndexMap<String, String>,
    /// Module specifier the bootstrap script imports `hydrate` from.
    pub runtime_module: String,
    /// Upper bound on mutation-observer rounds drained per entry point.
    pub max_settle_rounds: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Client,
            default_value: Value::String(String::new()),
            change_policy: ChangePolicy::Shallow,
            update_scope: UpdateScope::Exact,
            gc_debounce_ms: 250,
            load_poll_interval_ms: 50,
            load_timeout_ms: 5000,
            sync_debounce_ms: 300,
            sync_endpoints: IndexMap::new(),
            runtime_module: "/zenith/binding.js".to_string(),
            max_settle_rounds: 32,
        }
    }
}

impl EngineConfig {
    pub fn server() -> Self {
        Self {
            mode: Mode::Server,
            ..Self::default()
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, BindingError> {
        serde_json::from_str(raw).map_err(|e| BindingError::Config {
            reason: e.to_string(),
        })
    }

    pub fn is_server(&self) -> bool {
        self.mode == Mode::Server
    }

    pub(crate) fn gc_debounce(&self) -> Duration {
        Duration::from_millis(self.gc_debounce_ms)
    }

    pub(crate) fn load_poll_interval(&self) -> Duration {
        Duration::from_millis(self.load_poll_interval_ms.max(1))
    }

    pub(crate) fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub(crate) fn sync_debounce(&self) -> Duration {
        Duration::from_millis(self.sync_debounce_ms)
    }
}
