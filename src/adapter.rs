//! Object adapters host servants and route requests to them.
//!
//! An [`Adapter`] owns the identity to servant registry, the servant locators keyed by identity
//! category, the connection factories requests arrive through, and a lifecycle state machine:
//!
//! ```text
//! Inactive --activate--> Active --hold--> Holding --activate--> Active
//! Inactive | Active | Holding --deactivate--> Deactivating --wait_for_deactivate--> Deactivated
//! ```
//!
//! `Adapter` is a cheap handle; clones refer to the same adapter. Registry and locator lookups
//! are shared by every in-flight dispatch, while mutations go through the adapter's methods.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use futures::future::{BoxFuture, FutureExt};
//! use servant::prelude::*;
//!
//! struct Ping;
//!
//! impl Servant for Ping {
//!     fn dispatch<'a>(
//!         &'a self,
//!         _request: &'a mut Request,
//!     ) -> BoxFuture<'a, Result<DispatchOutcome, DispatchError>> {
//!         async { Ok(DispatchStatus::Ok.into()) }.boxed()
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let adapter = Adapter::new("Hello", AdapterConfig::default());
//! adapter.add(Arc::new(Ping), Identity::named("ping"))?;
//! adapter.activate()?;
//!
//! let reply = adapter
//!     .invoke_collocated(&RequestFrame::new(1, Identity::named("ping"), "ping"))
//!     .await?
//!     .expect("two-way requests are answered");
//! assert_eq!(reply.status, DispatchStatus::Ok);
//!
//! adapter.deactivate();
//! adapter.wait_for_deactivate().await;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

mod direct;
mod lifecycle;

use std::{
    collections::{hash_map::Entry, HashMap},
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::sync::watch;
use tracing::trace;
use uuid::Uuid;

pub use direct::DirectDispatch;
pub use lifecycle::AdapterState;

use crate::{
    config::{AdapterConfig, DispatchConfig},
    connection::{Connection, Endpoint, IncomingConnectionFactory, Router},
    error::AdapterError,
    identity::Identity,
    locator::{LocatorRegistry, ServantLocator},
    proxy::{ObjectPrx, ProxyTarget},
    servant::{find_facet_path, Servant},
};

use lifecycle::Lifecycle;

/// A handle to an object adapter.
#[derive(Clone)]
pub struct Adapter {
    inner: Arc<AdapterInner>,
}

struct AdapterInner {
    name: String,
    config: AdapterConfig,
    factories: Vec<Arc<dyn IncomingConnectionFactory>>,
    shared: Mutex<Shared>,
    lifecycle: watch::Sender<Lifecycle>,
}

struct Shared {
    state: AdapterState,
    activated: bool,
    direct_count: usize,
    servants: HashMap<Identity, Arc<dyn Servant>>,
    locators: HashMap<String, Arc<dyn ServantLocator>>,
    router_endpoints: Vec<Endpoint>,
    locator_registry: Option<Arc<dyn LocatorRegistry>>,
}

impl Adapter {
    /// Creates an adapter without connection factories.
    ///
    /// Such an adapter is only reachable through collocated invocations and the connections
    /// handed to [`Incoming`](crate::incoming::Incoming) directly.
    pub fn new(name: impl Into<String>, config: AdapterConfig) -> Self {
        Adapter::with_factories(name, config, Vec::new())
    }

    /// Creates an adapter that accepts requests through the given connection factories.
    pub fn with_factories(
        name: impl Into<String>,
        config: AdapterConfig,
        factories: Vec<Arc<dyn IncomingConnectionFactory>>,
    ) -> Self {
        let name = name.into();
        let (lifecycle, _) = watch::channel(Lifecycle::default());
        trace!(adapter = %name, factories = factories.len(), "adapter created");
        Adapter {
            inner: Arc::new(AdapterInner {
                name,
                config,
                factories,
                shared: Mutex::new(Shared {
                    state: AdapterState::Inactive,
                    activated: false,
                    direct_count: 0,
                    servants: HashMap::new(),
                    locators: HashMap::new(),
                    router_endpoints: Vec::new(),
                    locator_registry: None,
                }),
                lifecycle,
            }),
        }
    }

    /// The adapter name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The adapter configuration.
    pub fn config(&self) -> &AdapterConfig {
        &self.inner.config
    }

    /// The configuration used when dispatching requests through this adapter.
    pub fn dispatch_config(&self) -> DispatchConfig {
        self.inner.config.dispatch()
    }

    /// Registers a servant under `id`, returning a proxy for it.
    pub fn add(&self, servant: Arc<dyn Servant>, id: Identity) -> Result<ObjectPrx, AdapterError> {
        let mut shared = self.lock();
        self.check_for_deactivation(&shared)?;
        check_identity(&id)?;
        let proxy = self.new_proxy(&shared, id.clone());
        match shared.servants.entry(id) {
            Entry::Occupied(entry) => Err(AdapterError::AlreadyRegistered {
                kind: "servant",
                id: entry.key().to_string(),
            }),
            Entry::Vacant(entry) => {
                trace!(adapter = %self.inner.name, identity = %entry.key(), "servant added");
                entry.insert(servant);
                Ok(proxy)
            }
        }
    }

    /// Registers a servant under a fresh UUID identity, returning a proxy for it.
    pub fn add_with_uuid(&self, servant: Arc<dyn Servant>) -> Result<ObjectPrx, AdapterError> {
        self.add(servant, Identity::named(Uuid::new_v4().to_string()))
    }

    /// Unregisters the servant for `id`, returning it.
    ///
    /// Requests already dispatched to the servant are unaffected.
    pub fn remove(&self, id: &Identity) -> Result<Arc<dyn Servant>, AdapterError> {
        let mut shared = self.lock();
        self.check_for_deactivation(&shared)?;
        check_identity(id)?;
        let servant = shared
            .servants
            .remove(id)
            .ok_or_else(|| AdapterError::NotRegistered {
                kind: "servant",
                id: id.to_string(),
            })?;
        trace!(adapter = %self.inner.name, identity = %id, "servant removed");
        Ok(servant)
    }

    /// Registers a servant locator for identities of the given category.
    ///
    /// The empty category registers the default locator, consulted for every identity no other
    /// locator resolved.
    pub fn add_servant_locator(
        &self,
        locator: Arc<dyn ServantLocator>,
        category: impl Into<String>,
    ) -> Result<(), AdapterError> {
        let mut shared = self.lock();
        self.check_for_deactivation(&shared)?;
        match shared.locators.entry(category.into()) {
            Entry::Occupied(entry) => Err(AdapterError::AlreadyRegistered {
                kind: "servant locator",
                id: entry.key().clone(),
            }),
            Entry::Vacant(entry) => {
                trace!(adapter = %self.inner.name, category = %entry.key(), "servant locator added");
                entry.insert(locator);
                Ok(())
            }
        }
    }

    /// Unregisters and deactivates the servant locator for the given category, returning it.
    pub fn remove_servant_locator(
        &self,
        category: &str,
    ) -> Result<Arc<dyn ServantLocator>, AdapterError> {
        let locator = {
            let mut shared = self.lock();
            self.check_for_deactivation(&shared)?;
            shared
                .locators
                .remove(category)
                .ok_or_else(|| AdapterError::NotRegistered {
                    kind: "servant locator",
                    id: category.to_string(),
                })?
        };
        trace!(adapter = %self.inner.name, %category, "servant locator removed");
        locator.deactivate(category);
        Ok(locator)
    }

    /// The servant locator registered for the given category, if any.
    pub fn find_servant_locator(&self, category: &str) -> Option<Arc<dyn ServantLocator>> {
        self.lock().locators.get(category).cloned()
    }

    /// The servant registered for `id`, if any. Servant locators are not consulted.
    pub fn identity_to_servant(&self, id: &Identity) -> Option<Arc<dyn Servant>> {
        self.lock().servants.get(id).cloned()
    }

    /// The registered servant a proxy refers to, if the proxy is local to this adapter.
    pub fn proxy_to_servant(&self, proxy: &ObjectPrx) -> Option<Arc<dyn Servant>> {
        if !self.is_local(proxy) {
            return None;
        }
        let servant = self.identity_to_servant(proxy.identity())?;
        find_facet_path(&servant, proxy.facet())
    }

    /// Returns `true` if requests sent through `proxy` would arrive at this adapter.
    pub fn is_local(&self, proxy: &ObjectPrx) -> bool {
        match proxy.target() {
            ProxyTarget::Collocated { adapter } => *adapter == self.inner.name,
            ProxyTarget::Indirect { adapter_id } => {
                self.inner.config.adapter_id() == Some(adapter_id.as_str())
            }
            ProxyTarget::Endpoints(endpoints) => {
                let shared = self.lock();
                !endpoints.is_empty()
                    && endpoints.iter().all(|endpoint| {
                        self.inner
                            .factories
                            .iter()
                            .any(|factory| factory.equivalent(endpoint))
                            || shared.router_endpoints.contains(endpoint)
                    })
            }
            ProxyTarget::Reverse(_) => false,
        }
    }

    /// Creates a proxy for `id` using the adapter id or published endpoints.
    pub fn create_proxy(&self, id: Identity) -> Result<ObjectPrx, AdapterError> {
        let shared = self.lock();
        self.check_for_deactivation(&shared)?;
        check_identity(&id)?;
        Ok(self.new_proxy(&shared, id))
    }

    /// Creates a proxy for `id` that is only reachable in-process, through this adapter.
    pub fn create_direct_proxy(&self, id: Identity) -> Result<ObjectPrx, AdapterError> {
        let shared = self.lock();
        self.check_for_deactivation(&shared)?;
        check_identity(&id)?;
        Ok(ObjectPrx::new(
            id,
            ProxyTarget::Collocated {
                adapter: self.inner.name.clone(),
            },
        ))
    }

    /// Creates a proxy for `id` that sends requests back over this adapter's incoming connections.
    pub fn create_reverse_proxy(&self, id: Identity) -> Result<ObjectPrx, AdapterError> {
        {
            let shared = self.lock();
            self.check_for_deactivation(&shared)?;
            check_identity(&id)?;
        }
        Ok(ObjectPrx::new(
            id,
            ProxyTarget::Reverse(self.incoming_connections()),
        ))
    }

    /// Publishes the router's server endpoints in proxies created from now on.
    pub fn add_router(&self, router: &dyn Router) -> Result<(), AdapterError> {
        let mut shared = self.lock();
        self.check_for_deactivation(&shared)?;
        shared.router_endpoints.extend(router.server_endpoints());
        shared.router_endpoints.sort();
        shared.router_endpoints.dedup();
        trace!(
            adapter = %self.inner.name,
            endpoints = shared.router_endpoints.len(),
            "router added"
        );
        Ok(())
    }

    /// Sets the locator registry the adapter publishes its endpoints to.
    ///
    /// Endpoints are only published when an adapter id is configured.
    pub fn set_locator(
        &self,
        registry: Option<Arc<dyn LocatorRegistry>>,
    ) -> Result<(), AdapterError> {
        let mut shared = self.lock();
        self.check_for_deactivation(&shared)?;
        shared.locator_registry = registry;
        Ok(())
    }

    /// The connections currently open on all of this adapter's factories.
    pub fn incoming_connections(&self) -> Vec<Arc<dyn Connection>> {
        self.inner
            .factories
            .iter()
            .flat_map(|factory| factory.connections())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.inner
            .shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn check_for_deactivation(&self, shared: &Shared) -> Result<(), AdapterError> {
        if shared.state.is_deactivated() {
            return Err(AdapterError::Deactivated {
                adapter: self.inner.name.clone(),
            });
        }
        Ok(())
    }

    fn published_endpoints(&self, shared: &Shared) -> Vec<Endpoint> {
        self.inner
            .factories
            .iter()
            .map(|factory| factory.endpoint())
            .chain(shared.router_endpoints.iter().cloned())
            .collect()
    }

    fn new_proxy(&self, shared: &Shared, id: Identity) -> ObjectPrx {
        match self.inner.config.adapter_id() {
            Some(adapter_id) => ObjectPrx::new(
                id,
                ProxyTarget::Indirect {
                    adapter_id: adapter_id.to_string(),
                },
            ),
            None => ObjectPrx::new(
                id,
                ProxyTarget::Endpoints(self.published_endpoints(shared)),
            ),
        }
    }
}

impl fmt::Debug for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn check_identity(id: &Identity) -> Result<(), AdapterError> {
    if id.is_valid() {
        Ok(())
    } else {
        Err(AdapterError::IllegalIdentity(id.clone()))
    }
}
