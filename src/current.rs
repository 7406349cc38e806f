//! The per-request context handed to servants and locators.

use std::collections::HashMap;

use itertools::Itertools;

use crate::{adapter::Adapter, identity::escape, identity::Identity, protocol::OperationMode};

/// Key/value pairs sent along with a request.
pub type Context = HashMap<String, String>;

/// Information about the request currently being dispatched.
///
/// Decoded from the request header before resolution starts and read-only for the rest of the
/// dispatch.
#[derive(Clone, Debug, Default)]
pub struct Current {
    /// The adapter the request arrived on, if any.
    pub adapter: Option<Adapter>,
    /// The target identity.
    pub id: Identity,
    /// The target facet path. Empty addresses the servant itself.
    pub facet: Vec<String>,
    /// The operation name.
    pub operation: String,
    /// The operation mode.
    pub mode: OperationMode,
    /// The request context.
    pub ctx: Context,
}

impl Current {
    /// The facet path as a single `/` separated string.
    pub fn facet_path(&self) -> String {
        facet_path_to_string(&self.facet)
    }
}

/// Joins a facet path with `/`, escaping slashes inside components.
pub fn facet_path_to_string(facet: &[String]) -> String {
    facet.iter().map(|component| escape(component, '/')).join("/")
}
