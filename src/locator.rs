//! Servant locators resolve identities that are not registered with an adapter.
//!
//! Locators are registered per identity category with
//! [`Adapter::add_servant_locator`](crate::adapter::Adapter::add_servant_locator). When the
//! registry has no servant for a request, the locator for the identity's category is consulted
//! first, then the locator registered for the empty category.
//!
//! Every successful [`locate`](ServantLocator::locate) is paired with exactly one
//! [`finished`](ServantLocator::finished) call once the dispatch completes, whatever its outcome.
//! The [`Cookie`] returned by `locate` is handed back to `finished` unchanged, so per-request state
//! such as a checked-out object can be released there.

use std::{any::Any, sync::Arc};

use futures::future::BoxFuture;

use crate::{
    connection::Endpoint, current::Current, error::DispatchError, servant::Servant,
};

/// Opaque per-request state threaded from `locate` to `finished`.
pub type Cookie = Box<dyn Any + Send>;

/// A servant located for a single request, with the cookie to release it.
pub type Located = (Arc<dyn Servant>, Cookie);

/// Supplies servants on demand for a category of identities.
pub trait ServantLocator: Send + Sync + 'static {
    /// Locates a servant for the request.
    ///
    /// Returns `Ok(None)` if this locator has no servant for the identity. Returning an error
    /// fails the request with that error, and `finished` is not called.
    fn locate<'a>(
        &'a self,
        current: &'a Current,
    ) -> BoxFuture<'a, Result<Option<Located>, DispatchError>>;

    /// Called once the request dispatched to a located servant has completed.
    fn finished<'a>(
        &'a self,
        current: &'a Current,
        servant: &'a Arc<dyn Servant>,
        cookie: Cookie,
    ) -> BoxFuture<'a, ()>;

    /// Called when the locator is removed from its adapter, or the adapter finishes deactivating.
    fn deactivate(&self, category: &str) {
        let _ = category;
    }
}

/// A registry mapping adapter ids to endpoints, used to resolve indirect proxies.
pub trait LocatorRegistry: Send + Sync + 'static {
    /// Publishes the endpoints of the adapter with the given id, or withdraws them when `None`.
    fn set_adapter_endpoints(&self, adapter_id: &str, endpoints: Option<Vec<Endpoint>>);
}
