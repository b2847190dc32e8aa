//! Application state for the API server.

use understudy_proxy::ProxyEngine;

/// Shared application state.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Engine shared with the proxy listener.
    pub engine: ProxyEngine,
}

impl AppState {
    /// Creates state over the running engine.
    pub fn new(engine: ProxyEngine) -> Self {
        Self { engine }
    }
}
