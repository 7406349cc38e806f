#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]
#![deny(unused_must_use)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod adapter;
pub mod config;
pub mod connection;
pub mod current;
pub mod error;
pub mod identity;
pub mod incoming;
pub mod locator;
pub mod protocol;
pub mod proxy;
pub mod reply;
pub mod servant;
pub mod stream;

pub use adapter::Adapter;
pub use identity::Identity;
pub use incoming::Incoming;
pub use servant::Servant;

/// Commonly used types for implementing and hosting servants.
pub mod prelude {
    pub use crate::adapter::{Adapter, AdapterState};
    pub use crate::config::{AdapterConfig, DispatchConfig};
    pub use crate::connection::{Connection, Endpoint, IncomingConnectionFactory};
    pub use crate::current::{Context, Current};
    pub use crate::error::{AdapterError, DispatchError};
    pub use crate::identity::Identity;
    pub use crate::incoming::{Incoming, Request};
    pub use crate::locator::{Cookie, Located, ServantLocator};
    pub use crate::protocol::{DispatchStatus, ReplyBody, ReplyFrame, RequestFrame};
    pub use crate::proxy::ObjectPrx;
    pub use crate::reply::{AsyncResponse, Deferred};
    pub use crate::servant::{DispatchOutcome, Facets, Servant};
}
