//! Proxies: addressable references to remote objects.

use std::{fmt, sync::Arc};

use crate::{connection::Connection, connection::Endpoint, identity::Identity};

/// How a proxy reaches the adapter hosting its object.
#[derive(Clone)]
pub enum ProxyTarget {
    /// Direct addressing through the listed endpoints.
    Endpoints(Vec<Endpoint>),
    /// Indirect addressing through a locator registry, by adapter id.
    Indirect {
        /// The adapter id registered with the locator registry.
        adapter_id: String,
    },
    /// In-process only, dispatched directly to the named adapter.
    Collocated {
        /// The adapter name.
        adapter: String,
    },
    /// Requests are sent back over connections the caller opened to us.
    Reverse(Vec<Arc<dyn Connection>>),
}

impl fmt::Debug for ProxyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyTarget::Endpoints(endpoints) => {
                f.debug_tuple("Endpoints").field(endpoints).finish()
            }
            ProxyTarget::Indirect { adapter_id } => f
                .debug_struct("Indirect")
                .field("adapter_id", adapter_id)
                .finish(),
            ProxyTarget::Collocated { adapter } => f
                .debug_struct("Collocated")
                .field("adapter", adapter)
                .finish(),
            ProxyTarget::Reverse(connections) => f
                .debug_struct("Reverse")
                .field("connections", &connections.len())
                .finish(),
        }
    }
}

/// A reference to a remote object.
#[derive(Clone, Debug)]
pub struct ObjectPrx {
    identity: Identity,
    facet: Vec<String>,
    target: ProxyTarget,
}

impl ObjectPrx {
    /// Creates a proxy for `identity` reached through `target`.
    pub fn new(identity: Identity, target: ProxyTarget) -> Self {
        ObjectPrx {
            identity,
            facet: Vec::new(),
            target,
        }
    }

    /// Returns a proxy for the given facet of the same object.
    pub fn with_facet(mut self, facet: Vec<String>) -> Self {
        self.facet = facet;
        self
    }

    /// The identity of the target object.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The facet path of the target.
    pub fn facet(&self) -> &[String] {
        &self.facet
    }

    /// How the proxy reaches its adapter.
    pub fn target(&self) -> &ProxyTarget {
        &self.target
    }

    /// The endpoints, if the proxy is directly addressed.
    pub fn endpoints(&self) -> &[Endpoint] {
        match &self.target {
            ProxyTarget::Endpoints(endpoints) => endpoints,
            _ => &[],
        }
    }

    /// The adapter id, if the proxy is indirect.
    pub fn adapter_id(&self) -> Option<&str> {
        match &self.target {
            ProxyTarget::Indirect { adapter_id } => Some(adapter_id),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectPrx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identity)?;
        if !self.facet.is_empty() {
            write!(
                f,
                " -f {}",
                crate::current::facet_path_to_string(&self.facet)
            )?;
        }
        match &self.target {
            ProxyTarget::Endpoints(endpoints) => {
                for endpoint in endpoints {
                    write!(f, ":{endpoint}")?;
                }
                Ok(())
            }
            ProxyTarget::Indirect { adapter_id } => write!(f, " @ {adapter_id}"),
            ProxyTarget::Collocated { adapter } => write!(f, " @@ {adapter}"),
            ProxyTarget::Reverse(_) => write!(f, " (reverse)"),
        }
    }
}
