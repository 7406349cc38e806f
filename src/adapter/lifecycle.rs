use tracing::{info, trace};

use super::{Adapter, Shared};
use crate::error::AdapterError;

/// The lifecycle state of an [`Adapter`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AdapterState {
    /// Created but never activated. Requests are not read from connections.
    #[default]
    Inactive,
    /// Connections are read and requests dispatched.
    Active,
    /// Connections stay open but no new requests are read.
    Holding,
    /// Deactivation has started; requests already in flight are draining.
    Deactivating,
    /// Terminal. Every registration and proxy creation fails.
    Deactivated,
}

impl AdapterState {
    /// Returns `true` once deactivation has started.
    pub fn is_deactivated(self) -> bool {
        matches!(self, AdapterState::Deactivating | AdapterState::Deactivated)
    }
}

/// Snapshot published to lifecycle waiters whenever the state or direct count changes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(super) struct Lifecycle {
    pub(super) state: AdapterState,
    pub(super) direct_count: usize,
}

impl Adapter {
    /// The current lifecycle state.
    pub fn state(&self) -> AdapterState {
        self.lock().state
    }

    /// Starts dispatching requests from this adapter's connection factories.
    ///
    /// The first activation publishes the adapter's endpoints to the locator registry, if an
    /// adapter id and a registry are configured, and announces the adapter as ready when
    /// configured to.
    pub fn activate(&self) -> Result<(), AdapterError> {
        let (first, registry, endpoints) = {
            let mut shared = self.lock();
            self.check_for_deactivation(&shared)?;
            let first = !shared.activated;
            shared.activated = true;
            for factory in &self.inner.factories {
                factory.activate();
            }
            self.set_state(&mut shared, AdapterState::Active);
            (
                first,
                shared.locator_registry.clone(),
                self.published_endpoints(&shared),
            )
        };

        if first {
            if let (Some(registry), Some(adapter_id)) = (registry, self.inner.config.adapter_id())
            {
                trace!(adapter = %self.inner.name, %adapter_id, "publishing endpoints");
                registry.set_adapter_endpoints(adapter_id, Some(endpoints));
            }
            if self.inner.config.print_adapter_ready() {
                info!(adapter = %self.inner.name, "{} ready", self.inner.name);
            }
        }

        Ok(())
    }

    /// Stops reading new requests from this adapter's connections.
    ///
    /// Requests already read continue to dispatch. An adapter that was never activated stays
    /// [`Inactive`](AdapterState::Inactive).
    pub fn hold(&self) -> Result<(), AdapterError> {
        let mut shared = self.lock();
        self.check_for_deactivation(&shared)?;
        for factory in &self.inner.factories {
            factory.hold();
        }
        if shared.state == AdapterState::Active {
            self.set_state(&mut shared, AdapterState::Holding);
        }
        Ok(())
    }

    /// Waits until the adapter is no longer active and every factory has stopped reading.
    pub async fn wait_for_hold(&self) -> Result<(), AdapterError> {
        let lifecycle = self
            .wait_for_lifecycle(|lifecycle| lifecycle.state != AdapterState::Active)
            .await;
        if lifecycle.state.is_deactivated() {
            return Err(AdapterError::Deactivated {
                adapter: self.inner.name.clone(),
            });
        }
        for factory in &self.inner.factories {
            factory.wait_until_holding().await;
        }
        Ok(())
    }

    /// Starts deactivating the adapter.
    ///
    /// Factories stop accepting connections and the adapter's endpoints are withdrawn from the
    /// locator registry. Calling this again, or on a deactivated adapter, does nothing.
    pub fn deactivate(&self) {
        let registry = {
            let mut shared = self.lock();
            if shared.state.is_deactivated() {
                return;
            }
            for factory in &self.inner.factories {
                factory.destroy();
            }
            self.set_state(&mut shared, AdapterState::Deactivating);
            shared.locator_registry.clone()
        };

        if let (Some(registry), Some(adapter_id)) = (registry, self.inner.config.adapter_id()) {
            trace!(adapter = %self.inner.name, %adapter_id, "withdrawing endpoints");
            registry.set_adapter_endpoints(adapter_id, None);
        }
    }

    /// Waits until deactivation completes.
    ///
    /// Completion requires that [`deactivate`](Self::deactivate) was called, that every direct
    /// dispatch has finished and that every factory has closed its connections. The registry is
    /// then cleared and every servant locator deactivated.
    pub async fn wait_for_deactivate(&self) {
        self.wait_for_lifecycle(|lifecycle| {
            lifecycle.state.is_deactivated() && lifecycle.direct_count == 0
        })
        .await;
        for factory in &self.inner.factories {
            factory.wait_until_finished().await;
        }

        let (servants, locators) = {
            let mut shared = self.lock();
            if shared.state != AdapterState::Deactivated {
                self.set_state(&mut shared, AdapterState::Deactivated);
            }
            (
                std::mem::take(&mut shared.servants),
                std::mem::take(&mut shared.locators),
            )
        };
        drop(servants);
        for (category, locator) in locators {
            locator.deactivate(&category);
        }
    }

    /// Returns `true` once deactivation has started.
    pub fn is_deactivated(&self) -> bool {
        self.state().is_deactivated()
    }

    pub(super) fn set_state(&self, shared: &mut Shared, state: AdapterState) {
        if shared.state != state {
            trace!(adapter = %self.inner.name, from = ?shared.state, to = ?state, "adapter state changed");
        }
        shared.state = state;
        self.publish(shared);
    }

    pub(super) fn publish(&self, shared: &Shared) {
        self.inner.lifecycle.send_replace(Lifecycle {
            state: shared.state,
            direct_count: shared.direct_count,
        });
    }

    async fn wait_for_lifecycle(&self, mut ready: impl FnMut(&Lifecycle) -> bool) -> Lifecycle {
        let mut rx = self.inner.lifecycle.subscribe();
        let result = rx.wait_for(|lifecycle| ready(lifecycle)).await.map(|lifecycle| *lifecycle);
        // The sender lives as long as the adapter, so waiting can only end with a match.
        result.unwrap_or_else(|_| *self.inner.lifecycle.borrow())
    }
}
