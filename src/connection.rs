//! The transport boundary of the dispatch core.
//!
//! The core never touches sockets. Incoming bytes are delivered to
//! [`Incoming::invoke`](crate::incoming::Incoming::invoke) by a [`Connection`], which receives the
//! encoded reply back once dispatch finishes. Listening sockets are represented by
//! [`IncomingConnectionFactory`], whose lifecycle the adapter drives.

use std::{fmt, str::FromStr, sync::Arc};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::{error::EndpointParseError, stream::OutputStream};

/// A connection that requests arrive on and replies are sent through.
///
/// Exactly one of the two methods is called for every dispatched request.
pub trait Connection: Send + Sync + 'static {
    /// Sends a complete, encoded reply message.
    fn send_response(&self, reply: OutputStream, compress: bool);

    /// Signals that the request was one-way and no reply is owed.
    fn send_no_response(&self);
}

/// A listener accepting connections on one endpoint.
pub trait IncomingConnectionFactory: Send + Sync + 'static {
    /// The endpoint this factory listens on.
    fn endpoint(&self) -> Endpoint;

    /// Starts accepting connections and reading requests.
    fn activate(&self);

    /// Stops reading new requests without closing connections.
    fn hold(&self);

    /// Stops accepting connections and closes existing ones once their requests finish.
    fn destroy(&self);

    /// Resolves once every connection has stopped reading requests.
    fn wait_until_holding(&self) -> BoxFuture<'_, ()>;

    /// Resolves once every connection is closed.
    fn wait_until_finished(&self) -> BoxFuture<'_, ()>;

    /// The currently open connections.
    fn connections(&self) -> Vec<Arc<dyn Connection>>;

    /// Returns `true` if `endpoint` is served by this factory.
    fn equivalent(&self, endpoint: &Endpoint) -> bool {
        self.endpoint() == *endpoint
    }
}

/// A router that forwards requests from clients that cannot reach the adapter directly.
///
/// Its server endpoints are published in proxies created by an adapter the router was added to.
pub trait Router: Send + Sync + 'static {
    /// The endpoints clients use to reach the router.
    fn server_endpoints(&self) -> Vec<Endpoint>;
}

/// A network address a proxy can use to reach an adapter.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// The transport name, eg. `tcp`.
    pub transport: String,
    /// The host name or address.
    pub host: String,
    /// The port.
    pub port: u16,
}

impl Endpoint {
    /// Creates a tcp endpoint.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Endpoint {
            transport: "tcp".to_string(),
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -h {} -p {}", self.transport, self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let transport = words
            .next()
            .ok_or(EndpointParseError::Empty)?
            .to_string();
        let mut host = None;
        let mut port = None;
        while let Some(flag) = words.next() {
            let value = words
                .next()
                .ok_or_else(|| EndpointParseError::MissingArgument(flag.to_string()))?;
            match flag {
                "-h" => host = Some(value.to_string()),
                "-p" => {
                    port = Some(
                        value
                            .parse()
                            .map_err(|_| EndpointParseError::InvalidPort(value.to_string()))?,
                    )
                }
                flag => return Err(EndpointParseError::UnknownOption(flag.to_string())),
            }
        }
        Ok(Endpoint {
            transport,
            host: host.ok_or(EndpointParseError::MissingHost)?,
            port: port.ok_or(EndpointParseError::MissingPort)?,
        })
    }
}
