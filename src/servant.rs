//! Servants: the handlers that implement remote objects.
//!
//! A [`Servant`] receives a [`Request`] and either completes it with a [`DispatchStatus`] or
//! defers completion to an [`AsyncResponse`](crate::reply::AsyncResponse) token. Servants may
//! expose named sub-objects, called facets, which are resolved by path before dispatch.
//!
//! # Example
//!
//! ```
//! use futures::future::{BoxFuture, FutureExt};
//! use servant::error::DispatchError;
//! use servant::incoming::Request;
//! use servant::protocol::DispatchStatus;
//! use servant::servant::{DispatchOutcome, Servant};
//!
//! struct Hello;
//!
//! impl Servant for Hello {
//!     fn dispatch<'a>(
//!         &'a self,
//!         request: &'a mut Request,
//!     ) -> BoxFuture<'a, Result<DispatchOutcome, DispatchError>> {
//!         async move {
//!             match request.current().operation.as_str() {
//!                 "sayHello" => {
//!                     request.output().write_string("hello");
//!                     Ok(DispatchStatus::Ok.into())
//!                 }
//!                 _ => Ok(DispatchStatus::OperationNotExist.into()),
//!             }
//!         }
//!         .boxed()
//!     }
//! }
//! ```

use std::{
    collections::{hash_map::Entry, HashMap},
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use futures::future::BoxFuture;

use crate::{
    error::{AdapterError, DispatchError},
    incoming::Request,
    protocol::DispatchStatus,
    reply::Deferred,
};

/// The result of a servant's dispatch.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The request is complete. The status is normally `Ok` or `UserException`; a servant may
    /// also report `OperationNotExist` for operations it does not implement.
    Completed(DispatchStatus),
    /// The servant took an [`AsyncResponse`](crate::reply::AsyncResponse) and will finish the
    /// request later.
    Deferred(Deferred),
}

impl From<DispatchStatus> for DispatchOutcome {
    fn from(status: DispatchStatus) -> Self {
        DispatchOutcome::Completed(status)
    }
}

impl From<Deferred> for DispatchOutcome {
    fn from(deferred: Deferred) -> Self {
        DispatchOutcome::Deferred(deferred)
    }
}

/// A handler implementing the operations of one or more remote objects.
///
/// Servants are shared between the adapter registry and every in-flight dispatch, so they are
/// always held behind an [`Arc`] and must be `Send + Sync`.
pub trait Servant: Send + Sync + 'static {
    /// Dispatches the request.
    ///
    /// Input parameters are read from [`Request::input`] and results written to
    /// [`Request::output`].
    fn dispatch<'a>(
        &'a self,
        request: &'a mut Request,
    ) -> BoxFuture<'a, Result<DispatchOutcome, DispatchError>>;

    /// Returns the facet with the given name, if this servant has one.
    fn find_facet(&self, name: &str) -> Option<Arc<dyn Servant>> {
        let _ = name;
        None
    }
}

/// Follows a facet path from `servant`, returning the servant at the end of it.
///
/// An empty path resolves to `servant` itself.
pub fn find_facet_path(servant: &Arc<dyn Servant>, path: &[String]) -> Option<Arc<dyn Servant>> {
    path.iter()
        .try_fold(Arc::clone(servant), |current, name| current.find_facet(name))
}

/// A servant composed of a default servant and a set of named facets.
///
/// Requests without a facet path are dispatched to the default servant.
pub struct Facets {
    servant: Arc<dyn Servant>,
    facets: RwLock<HashMap<String, Arc<dyn Servant>>>,
}

impl Facets {
    /// Creates a composite with no facets.
    pub fn new(servant: Arc<dyn Servant>) -> Self {
        Facets {
            servant,
            facets: RwLock::new(HashMap::new()),
        }
    }

    /// Adds a facet, returning `self` for chaining.
    ///
    /// A facet already registered under `name` is replaced.
    pub fn with_facet(self, name: impl Into<String>, facet: Arc<dyn Servant>) -> Self {
        self.facets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), facet);
        self
    }

    /// Adds a facet.
    pub fn add_facet(
        &self,
        name: impl Into<String>,
        facet: Arc<dyn Servant>,
    ) -> Result<(), AdapterError> {
        let mut facets = self.facets.write().unwrap_or_else(PoisonError::into_inner);
        match facets.entry(name.into()) {
            Entry::Occupied(entry) => Err(AdapterError::AlreadyRegistered {
                kind: "facet",
                id: entry.key().clone(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(facet);
                Ok(())
            }
        }
    }

    /// Removes a facet, returning it.
    pub fn remove_facet(&self, name: &str) -> Result<Arc<dyn Servant>, AdapterError> {
        self.facets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .ok_or_else(|| AdapterError::NotRegistered {
                kind: "facet",
                id: name.to_string(),
            })
    }

    /// The names of all facets, sorted.
    pub fn facet_names(&self) -> Vec<String> {
        let facets = self.facets.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<_> = facets.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for Facets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Facets")
            .field("facets", &self.facet_names())
            .finish_non_exhaustive()
    }
}

impl Servant for Facets {
    fn dispatch<'a>(
        &'a self,
        request: &'a mut Request,
    ) -> BoxFuture<'a, Result<DispatchOutcome, DispatchError>> {
        self.servant.dispatch(request)
    }

    fn find_facet(&self, name: &str) -> Option<Arc<dyn Servant>> {
        let facet = self
            .facets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned();
        facet.or_else(|| self.servant.find_facet(name))
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;

    use super::*;

    struct Named(&'static str);

    impl Servant for Named {
        fn dispatch<'a>(
            &'a self,
            request: &'a mut Request,
        ) -> BoxFuture<'a, Result<DispatchOutcome, DispatchError>> {
            async move {
                request.output().write_string(self.0);
                Ok(DispatchStatus::Ok.into())
            }
            .boxed()
        }
    }

    #[test]
    fn facet_paths_resolve_through_nested_composites() {
        let inner: Arc<dyn Servant> =
            Arc::new(Facets::new(Arc::new(Named("inner"))).with_facet("leaf", Arc::new(Named("leaf"))));
        let root: Arc<dyn Servant> =
            Arc::new(Facets::new(Arc::new(Named("root"))).with_facet("inner", inner));

        assert!(find_facet_path(&root, &[]).is_some());
        assert!(find_facet_path(&root, &["inner".to_string()]).is_some());
        assert!(find_facet_path(&root, &["inner".to_string(), "leaf".to_string()]).is_some());
        assert!(find_facet_path(&root, &["leaf".to_string()]).is_none());
        assert!(find_facet_path(&root, &["inner".to_string(), "missing".to_string()]).is_none());
    }

    #[test]
    fn duplicate_facets_are_rejected() {
        let facets = Facets::new(Arc::new(Named("root")));
        facets.add_facet("a", Arc::new(Named("a"))).unwrap();
        assert!(matches!(
            facets.add_facet("a", Arc::new(Named("b"))),
            Err(AdapterError::AlreadyRegistered { kind: "facet", .. })
        ));
        assert_eq!(facets.facet_names(), vec!["a".to_string()]);
        facets.remove_facet("a").unwrap();
        assert!(matches!(
            facets.remove_facet("a"),
            Err(AdapterError::NotRegistered { kind: "facet", .. })
        ));
    }
}
