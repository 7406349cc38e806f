//! Defines error handling constructs for the dispatch core.
//!
//! Errors fall into two groups. [`StreamError`] and [`AdapterError`] are ordinary errors returned
//! to the caller of an API. [`DispatchError`] is the failure taxonomy of a single dispatch: it is
//! never returned past [`Incoming::invoke`](crate::incoming::Incoming::invoke), but classified into
//! a [`DispatchStatus`] and encoded into the reply instead.

use std::{any::Any, error, fmt};

use crate::{current::Current, identity::Identity, protocol::DispatchStatus};

/// A dyn boxed error.
pub type BoxError = Box<dyn error::Error + Send + Sync + 'static>;

/// An error that occurs while decoding or encoding wire data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamError {
    /// The buffer ended before a value could be read.
    UnexpectedEnd {
        /// Bytes required by the value.
        needed: usize,
        /// Bytes left in the buffer.
        remaining: usize,
    },
    /// A size field was negative.
    NegativeSize(i32),
    /// A string was not valid UTF-8.
    InvalidUtf8,
    /// An encapsulation was closed without being opened.
    NoEncapsulation,
    /// An encapsulation size is inconsistent with the surrounding buffer.
    EncapsulationOverrun {
        /// The declared or reached size.
        size: usize,
        /// The bytes actually available.
        available: usize,
    },
    /// The encapsulation uses an encoding this implementation does not understand.
    UnsupportedEncoding {
        /// Major version.
        major: u8,
        /// Minor version.
        minor: u8,
    },
    /// A message did not start with the protocol magic.
    BadMagic([u8; 4]),
    /// A message used an unsupported protocol version.
    UnsupportedProtocol {
        /// Major version.
        major: u8,
        /// Minor version.
        minor: u8,
    },
    /// An enumerator was out of range.
    InvalidEnum {
        /// The enumeration being decoded.
        kind: &'static str,
        /// The value read from the wire.
        value: u8,
    },
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::UnexpectedEnd { needed, remaining } => write!(
                f,
                "unexpected end of buffer: needed {needed} bytes, {remaining} remaining"
            ),
            StreamError::NegativeSize(size) => write!(f, "negative size {size}"),
            StreamError::InvalidUtf8 => write!(f, "string is not valid utf-8"),
            StreamError::NoEncapsulation => write!(f, "no open encapsulation"),
            StreamError::EncapsulationOverrun { size, available } => write!(
                f,
                "encapsulation size {size} exceeds available {available} bytes"
            ),
            StreamError::UnsupportedEncoding { major, minor } => {
                write!(f, "unsupported encoding {major}.{minor}")
            }
            StreamError::BadMagic(magic) => write!(f, "bad message magic {magic:02x?}"),
            StreamError::UnsupportedProtocol { major, minor } => {
                write!(f, "unsupported protocol {major}.{minor}")
            }
            StreamError::InvalidEnum { kind, value } => {
                write!(f, "invalid {kind} value {value}")
            }
        }
    }
}

impl error::Error for StreamError {}

/// An error that occurs when parsing the string form of an [`Identity`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdentityParseError {
    /// More than one unescaped `/` was found.
    UnescapedSlash(String),
    /// The string ended in the middle of an escape sequence.
    TrailingEscape(String),
}

impl fmt::Display for IdentityParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityParseError::UnescapedSlash(s) => {
                write!(f, "unescaped '/' in identity '{s}'")
            }
            IdentityParseError::TrailingEscape(s) => {
                write!(f, "trailing escape character in identity '{s}'")
            }
        }
    }
}

impl error::Error for IdentityParseError {}

/// An error that occurs when parsing the string form of an
/// [`Endpoint`](crate::connection::Endpoint).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EndpointParseError {
    /// The string was blank.
    Empty,
    /// An option was not followed by its value.
    MissingArgument(String),
    /// An option is not recognised.
    UnknownOption(String),
    /// The port is not a valid `u16`.
    InvalidPort(String),
    /// No `-h` option was given.
    MissingHost,
    /// No `-p` option was given.
    MissingPort,
}

impl fmt::Display for EndpointParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointParseError::Empty => write!(f, "empty endpoint"),
            EndpointParseError::MissingArgument(opt) => {
                write!(f, "no argument provided for option '{opt}'")
            }
            EndpointParseError::UnknownOption(opt) => write!(f, "unknown option '{opt}'"),
            EndpointParseError::InvalidPort(port) => write!(f, "invalid port '{port}'"),
            EndpointParseError::MissingHost => write!(f, "endpoint has no host"),
            EndpointParseError::MissingPort => write!(f, "endpoint has no port"),
        }
    }
}

impl error::Error for EndpointParseError {}

/// An error returned by [`Adapter`](crate::adapter::Adapter) operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdapterError {
    /// The adapter has been deactivated.
    Deactivated {
        /// The adapter name.
        adapter: String,
    },
    /// The identity cannot be registered, usually because its name is empty.
    IllegalIdentity(Identity),
    /// Something is already registered under this key.
    AlreadyRegistered {
        /// What kind of registration collided, eg. `"servant"`.
        kind: &'static str,
        /// The key in string form.
        id: String,
    },
    /// Nothing is registered under this key.
    NotRegistered {
        /// What kind of registration was expected, eg. `"servant locator"`.
        kind: &'static str,
        /// The key in string form.
        id: String,
    },
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterError::Deactivated { adapter } => {
                write!(f, "object adapter '{adapter}' is deactivated")
            }
            AdapterError::IllegalIdentity(id) => write!(f, "illegal identity '{id}'"),
            AdapterError::AlreadyRegistered { kind, id } => {
                write!(f, "{kind} '{id}' is already registered")
            }
            AdapterError::NotRegistered { kind, id } => {
                write!(f, "{kind} '{id}' is not registered")
            }
        }
    }
}

impl error::Error for AdapterError {}

/// The kind of a [`RequestFailed`] failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestFailedKind {
    /// No servant exists for the identity.
    ObjectNotExist,
    /// The servant exists but does not have the requested facet.
    FacetNotExist,
    /// The servant does not implement the requested operation.
    OperationNotExist,
}

impl RequestFailedKind {
    /// The dispatch status this kind maps to.
    pub fn status(self) -> DispatchStatus {
        match self {
            RequestFailedKind::ObjectNotExist => DispatchStatus::ObjectNotExist,
            RequestFailedKind::FacetNotExist => DispatchStatus::FacetNotExist,
            RequestFailedKind::OperationNotExist => DispatchStatus::OperationNotExist,
        }
    }
}

impl fmt::Display for RequestFailedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestFailedKind::ObjectNotExist => write!(f, "object does not exist"),
            RequestFailedKind::FacetNotExist => write!(f, "facet does not exist"),
            RequestFailedKind::OperationNotExist => write!(f, "operation does not exist"),
        }
    }
}

/// A request that could not be routed to an object, facet or operation.
///
/// Fields left blank by whoever raised the failure are filled in from the request before the
/// reply is encoded, so the caller can always tell which target was missing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestFailed {
    /// What was missing.
    pub kind: RequestFailedKind,
    /// The identity of the target object.
    pub id: Identity,
    /// The facet path of the target.
    pub facet: Vec<String>,
    /// The operation name.
    pub operation: String,
}

impl RequestFailed {
    /// Creates a failure of the given kind with all target fields blank.
    pub fn new(kind: RequestFailedKind) -> Self {
        RequestFailed {
            kind,
            id: Identity::default(),
            facet: Vec::new(),
            operation: String::new(),
        }
    }

    /// Sets the identity of the missing target.
    pub fn with_identity(mut self, id: Identity) -> Self {
        self.id = id;
        self
    }

    /// Sets the facet path of the missing target.
    pub fn with_facet(mut self, facet: Vec<String>) -> Self {
        self.facet = facet;
        self
    }

    /// Sets the operation of the missing target.
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = operation.into();
        self
    }

    /// Fills in blank fields from the request.
    pub fn backfill(&mut self, current: &Current) {
        if self.id.name.is_empty() {
            self.id = current.id.clone();
        }
        if self.facet.is_empty() && !current.facet.is_empty() {
            self.facet = current.facet.clone();
        }
        if self.operation.is_empty() && !current.operation.is_empty() {
            self.operation = current.operation.clone();
        }
    }
}

impl fmt::Display for RequestFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: identity '{}', facet '{}', operation '{}'",
            self.kind,
            self.id,
            crate::current::facet_path_to_string(&self.facet),
            self.operation
        )
    }
}

impl error::Error for RequestFailed {}

/// A failure raised while resolving or invoking a request.
///
/// The variants are ordered by specificity and each maps to exactly one [`DispatchStatus`].
#[derive(Debug)]
pub enum DispatchError {
    /// The target object, facet or operation does not exist.
    RequestFailed(RequestFailed),
    /// A failure recognised by the runtime, such as a decoding error in the servant.
    Local(BoxError),
    /// An application failure that is not part of the operation's declared exceptions.
    User(BoxError),
    /// Anything else, including panics. Carries whatever description could be extracted.
    Unknown(Option<String>),
}

impl DispatchError {
    /// An object-not-exist failure with blank target fields.
    pub fn object_not_exist() -> Self {
        DispatchError::RequestFailed(RequestFailed::new(RequestFailedKind::ObjectNotExist))
    }

    /// A facet-not-exist failure with blank target fields.
    pub fn facet_not_exist() -> Self {
        DispatchError::RequestFailed(RequestFailed::new(RequestFailedKind::FacetNotExist))
    }

    /// An operation-not-exist failure with blank target fields.
    pub fn operation_not_exist() -> Self {
        DispatchError::RequestFailed(RequestFailed::new(RequestFailedKind::OperationNotExist))
    }

    /// A local failure.
    pub fn local(err: impl Into<BoxError>) -> Self {
        DispatchError::Local(err.into())
    }

    /// An undeclared user failure.
    pub fn user(err: impl Into<BoxError>) -> Self {
        DispatchError::User(err.into())
    }

    /// A failure with no recognised structure.
    pub fn unknown(reason: impl Into<String>) -> Self {
        DispatchError::Unknown(Some(reason.into()))
    }

    /// The dispatch status this failure is reported as.
    pub fn status(&self) -> DispatchStatus {
        match self {
            DispatchError::RequestFailed(failed) => failed.kind.status(),
            DispatchError::Local(_) => DispatchStatus::UnknownLocalException,
            DispatchError::User(_) => DispatchStatus::UnknownUserException,
            DispatchError::Unknown(_) => DispatchStatus::UnknownException,
        }
    }

    /// Converts a caught panic payload into an [`Unknown`](DispatchError::Unknown) failure.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        // Types are strings if panicked with the `std::panic!` macro
        let reason = payload
            .downcast_ref::<&'static str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned());
        DispatchError::Unknown(reason.map(|reason| format!("panicked: {reason}")))
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::RequestFailed(failed) => failed.fmt(f),
            DispatchError::Local(err) => err.fmt(f),
            DispatchError::User(err) => err.fmt(f),
            DispatchError::Unknown(Some(reason)) => f.write_str(reason),
            DispatchError::Unknown(None) => write!(f, "unknown exception"),
        }
    }
}

impl error::Error for DispatchError {}

impl From<RequestFailed> for DispatchError {
    fn from(failed: RequestFailed) -> Self {
        DispatchError::RequestFailed(failed)
    }
}

impl From<StreamError> for DispatchError {
    fn from(err: StreamError) -> Self {
        DispatchError::Local(Box::new(err))
    }
}

/// An error that can occur during a collocated invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CollocatedError {
    /// The adapter refused the direct dispatch.
    Adapter(AdapterError),
    /// The request or reply could not be encoded or decoded.
    Stream(StreamError),
    /// The dispatch finished without handing a reply to the connection.
    ConnectionLost,
}

impl From<AdapterError> for CollocatedError {
    fn from(err: AdapterError) -> Self {
        CollocatedError::Adapter(err)
    }
}

impl From<StreamError> for CollocatedError {
    fn from(err: StreamError) -> Self {
        CollocatedError::Stream(err)
    }
}

impl fmt::Display for CollocatedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollocatedError::Adapter(err) => err.fmt(f),
            CollocatedError::Stream(err) => err.fmt(f),
            CollocatedError::ConnectionLost => write!(f, "connection lost before reply"),
        }
    }
}

impl error::Error for CollocatedError {}
