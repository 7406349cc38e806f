//! Configuration for adapters and the dispatch engine.

use serde::{Deserialize, Serialize};

/// Configuration for the dispatch engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    warn_dispatch: u8,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { warn_dispatch: 1 }
    }
}

impl DispatchConfig {
    /// Sets the dispatch warning verbosity.
    ///
    /// Failures caught during dispatch are logged when this is greater than `1`.
    pub fn with_warn_dispatch(mut self, level: u8) -> Self {
        self.warn_dispatch = level;
        self
    }

    /// The dispatch warning verbosity.
    pub fn warn_dispatch(&self) -> u8 {
        self.warn_dispatch
    }

    /// Returns `true` if caught dispatch failures should be logged.
    pub fn logs_dispatch_failures(&self) -> bool {
        self.warn_dispatch > 1
    }
}

/// Configuration for an [`Adapter`](crate::adapter::Adapter).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    adapter_id: Option<String>,
    print_adapter_ready: bool,
    dispatch: DispatchConfig,
}

impl AdapterConfig {
    /// Sets the adapter id published to the locator registry.
    ///
    /// Adapters with an id create indirect proxies naming the id instead of listing endpoints.
    pub fn with_adapter_id(mut self, id: impl Into<String>) -> Self {
        self.adapter_id = Some(id.into());
        self
    }

    /// Logs that the adapter is ready the first time it is activated.
    pub fn with_print_adapter_ready(mut self, enabled: bool) -> Self {
        self.print_adapter_ready = enabled;
        self
    }

    /// Sets the configuration used for requests dispatched through this adapter.
    pub fn with_dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// The adapter id, if any.
    pub fn adapter_id(&self) -> Option<&str> {
        self.adapter_id.as_deref()
    }

    /// Whether readiness is logged on first activation.
    pub fn print_adapter_ready(&self) -> bool {
        self.print_adapter_ready
    }

    /// The dispatch configuration.
    pub fn dispatch(&self) -> DispatchConfig {
        self.dispatch
    }
}
