//! Outbound sync.
//!
//! Hooks listed in `syncEndpoints` are posted to their endpoint a debounce window
//! after they last changed. A response that differs from the local value is applied
//! through `set` with re-sync suppressed.

use serde_json::Value;
use std::fmt;

use crate::engine::Engine;
use crate::error::BindingError;
use crate::path::BindingPath;
use crate::scheduler::TimerKey;

/// Host-supplied transport, typically an HTTP client.
pub trait SyncTransport {
    /// Send `body` to `endpoint`. `Ok(Some(v))` is the server's view of the hook.
    fn send(&mut self, endpoint: &str, body: &Value) -> Result<Option<Value>, String>;
}

#[derive(Default)]
pub(crate) struct SyncState {
    pub(crate) transport: Option<Box<dyn SyncTransport>>,
    /// Set while a server response is being applied.
    pub(crate) applying_remote: bool,
}

impl fmt::Debug for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncState")
            .field("transport", &self.transport.is_some())
            .field("applying_remote", &self.applying_remote)
            .finish()
    }
}

impl Engine {
    pub fn with_transport(mut self, transport: impl SyncTransport + 'static) -> Self {
        self.sync.transport = Some(Box::new(transport));
        self
    }

    pub(crate) fn schedule_sync(&mut self, path: &BindingPath) {
        if self.sync.applying_remote || self.config.is_server() {
            return;
        }
        let Some(hook) = path.hook() else {
            return;
        };
        if self.config.sync_endpoints.contains_key(&hook) {
            self.scheduler
                .debounce(TimerKey::Sync(hook), self.config.sync_debounce());
        }
    }

    pub(crate) fn flush_sync(&mut self, hook: &str) {
        let Some(endpoint) = self.config.sync_endpoints.get(hook).cloned() else {
            return;
        };
        let path = BindingPath::from_segments(vec![crate::path::Segment::Key(hook.to_string())]);
        let body = self.store.get(&path);
        let result = match self.sync.transport.as_mut() {
            Some(transport) => transport.send(&endpoint, &body),
            None => return,
        };
        match result {
            Ok(Some(remote)) if remote != body => {
                tracing::trace!(hook, %endpoint, "applying server response");
                self.sync.applying_remote = true;
                match self.store.set(&path, remote) {
                    Ok(changed) => self.commit(changed),
                    Err(e) => tracing::error!(code = e.code(), hook, error = %e, "server response not applied"),
                }
                self.sync.applying_remote = false;
            }
            Ok(_) => {}
            Err(reason) => {
                let e = BindingError::Transport { endpoint, reason };
                tracing::error!(code = e.code(), hook, error = %e, "sync failed");
            }
        }
    }
}
