//! Message framing shared by the dispatch engine and its callers.
//!
//! Every message starts with a fixed [`HEADER_SIZE`] byte header. Requests and replies follow it
//! with an `i32` request id; a reply then carries one [`DispatchStatus`] byte at
//! [`REPLY_STATUS_POS`] followed by a status dependent body:
//!
//! - `Ok` / `UserException`: the servant's payload inside an encapsulation.
//! - `ObjectNotExist` / `FacetNotExist` / `OperationNotExist`: identity, facet path and operation.
//! - `Unknown*`: a single diagnostic string.

use std::collections::HashMap;

use bytes::Bytes;

use crate::{
    current::Context,
    error::StreamError,
    identity::Identity,
    stream::{InputStream, OutputStream, ENCODING_MAJOR, ENCODING_MINOR},
};

/// Magic bytes at the start of every message.
pub const MAGIC: [u8; 4] = *b"SRVT";
/// Protocol major version.
pub const PROTOCOL_MAJOR: u8 = 1;
/// Protocol minor version.
pub const PROTOCOL_MINOR: u8 = 0;

/// Size of the fixed message header.
pub const HEADER_SIZE: usize = 14;
/// Offset of the `i32` message size within the header.
pub const MESSAGE_SIZE_POS: usize = 10;
/// Offset of the dispatch status byte in a reply.
pub const REPLY_STATUS_POS: usize = HEADER_SIZE + 4;

/// The type of a protocol message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// A single request.
    Request = 0,
    /// A batch of one-way requests.
    BatchRequest = 1,
    /// A reply to a request.
    Reply = 2,
    /// Connection validation.
    ValidateConnection = 3,
    /// Graceful connection closure.
    CloseConnection = 4,
}

impl TryFrom<u8> for MessageType {
    type Error = StreamError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageType::Request),
            1 => Ok(MessageType::BatchRequest),
            2 => Ok(MessageType::Reply),
            3 => Ok(MessageType::ValidateConnection),
            4 => Ok(MessageType::CloseConnection),
            value => Err(StreamError::InvalidEnum {
                kind: "message type",
                value,
            }),
        }
    }
}

/// The outcome of one dispatched request, as written into its reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DispatchStatus {
    /// The operation completed and the payload holds its results.
    Ok = 0,
    /// The operation raised one of its declared exceptions, encoded in the payload.
    UserException = 1,
    /// No servant exists for the identity.
    ObjectNotExist = 2,
    /// The servant has no such facet.
    FacetNotExist = 3,
    /// The servant has no such operation.
    OperationNotExist = 4,
    /// A local failure occurred during dispatch.
    UnknownLocalException = 5,
    /// An undeclared user failure occurred during dispatch.
    UnknownUserException = 6,
    /// Any other failure occurred during dispatch.
    UnknownException = 7,
}

impl DispatchStatus {
    /// Returns `true` for the statuses whose reply body is produced by the servant.
    pub fn has_payload(self) -> bool {
        matches!(self, DispatchStatus::Ok | DispatchStatus::UserException)
    }

    /// Returns `true` for the three "does not exist" statuses.
    pub fn is_request_failed(self) -> bool {
        matches!(
            self,
            DispatchStatus::ObjectNotExist
                | DispatchStatus::FacetNotExist
                | DispatchStatus::OperationNotExist
        )
    }

    /// Returns `true` for the three "unknown exception" statuses.
    pub fn is_unknown(self) -> bool {
        matches!(
            self,
            DispatchStatus::UnknownLocalException
                | DispatchStatus::UnknownUserException
                | DispatchStatus::UnknownException
        )
    }
}

impl From<DispatchStatus> for u8 {
    fn from(status: DispatchStatus) -> Self {
        status as u8
    }
}

impl TryFrom<u8> for DispatchStatus {
    type Error = StreamError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DispatchStatus::Ok),
            1 => Ok(DispatchStatus::UserException),
            2 => Ok(DispatchStatus::ObjectNotExist),
            3 => Ok(DispatchStatus::FacetNotExist),
            4 => Ok(DispatchStatus::OperationNotExist),
            5 => Ok(DispatchStatus::UnknownLocalException),
            6 => Ok(DispatchStatus::UnknownUserException),
            7 => Ok(DispatchStatus::UnknownException),
            value => Err(StreamError::InvalidEnum {
                kind: "dispatch status",
                value,
            }),
        }
    }
}

/// How an operation may be retried by the caller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OperationMode {
    /// An ordinary operation.
    #[default]
    Normal = 0,
    /// An operation that does not modify object state.
    Nonmutating = 1,
    /// An operation that may safely be invoked more than once.
    Idempotent = 2,
}

impl TryFrom<u8> for OperationMode {
    type Error = StreamError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(OperationMode::Normal),
            1 => Ok(OperationMode::Nonmutating),
            2 => Ok(OperationMode::Idempotent),
            value => Err(StreamError::InvalidEnum {
                kind: "operation mode",
                value,
            }),
        }
    }
}

/// Writes a message header with a zero size placeholder.
pub fn write_header(output: &mut OutputStream, message_type: MessageType) {
    output.write_blob(&MAGIC);
    output.write_byte(PROTOCOL_MAJOR);
    output.write_byte(PROTOCOL_MINOR);
    output.write_byte(ENCODING_MAJOR);
    output.write_byte(ENCODING_MINOR);
    output.write_byte(message_type as u8);
    output.write_byte(0); // compression status
    output.write_i32(0); // patched by `finish_message`
}

/// Writes the header of a reply to `request_id`, leaving the stream at [`REPLY_STATUS_POS`].
pub fn write_reply_header(output: &mut OutputStream, request_id: i32) {
    write_header(output, MessageType::Reply);
    output.write_i32(request_id);
}

/// Patches the size field of a complete message.
///
/// # Panics
///
/// Panics if the stream is shorter than a message header.
pub fn finish_message(output: &mut OutputStream) {
    let size = i32::try_from(output.len()).unwrap_or(i32::MAX);
    output.set_i32(MESSAGE_SIZE_POS, size);
}

/// Reads and validates a message header, returning the message type.
pub fn read_header(input: &mut InputStream) -> Result<MessageType, StreamError> {
    let mut magic = [0u8; 4];
    for b in &mut magic {
        *b = input.read_byte()?;
    }
    if magic != MAGIC {
        return Err(StreamError::BadMagic(magic));
    }
    let major = input.read_byte()?;
    let minor = input.read_byte()?;
    if major != PROTOCOL_MAJOR || minor > PROTOCOL_MINOR {
        return Err(StreamError::UnsupportedProtocol { major, minor });
    }
    let major = input.read_byte()?;
    let minor = input.read_byte()?;
    if major != ENCODING_MAJOR || minor > ENCODING_MINOR {
        return Err(StreamError::UnsupportedEncoding { major, minor });
    }
    let message_type = MessageType::try_from(input.read_byte()?)?;
    let _compression = input.read_byte()?;
    let _size = input.read_i32()?;
    Ok(message_type)
}

/// A request as seen by whoever issues it.
///
/// Used for collocated invocations and by tests to produce well-formed request bodies.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestFrame {
    /// Request id. Zero marks a one-way request.
    pub request_id: i32,
    /// Target identity.
    pub id: Identity,
    /// Target facet path.
    pub facet: Vec<String>,
    /// Operation name.
    pub operation: String,
    /// Operation mode.
    pub mode: OperationMode,
    /// Request context.
    pub context: Context,
    /// Encoded input parameters, placed inside an encapsulation.
    pub params: Bytes,
}

impl RequestFrame {
    /// Creates a two-way request for `operation` on `id` with no parameters.
    pub fn new(request_id: i32, id: Identity, operation: impl Into<String>) -> Self {
        RequestFrame {
            request_id,
            id,
            operation: operation.into(),
            ..RequestFrame::default()
        }
    }

    /// Sets the facet path.
    pub fn with_facet(mut self, facet: Vec<String>) -> Self {
        self.facet = facet;
        self
    }

    /// Sets the operation mode.
    pub fn with_mode(mut self, mode: OperationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the request context.
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Sets the encoded input parameters.
    pub fn with_params(mut self, params: impl Into<Bytes>) -> Self {
        self.params = params.into();
        self
    }

    /// Returns `true` if the caller expects a reply.
    pub fn response_expected(&self) -> bool {
        self.request_id != 0
    }

    /// Encodes the request body, which is what [`Incoming::invoke`] consumes.
    ///
    /// [`Incoming::invoke`]: crate::incoming::Incoming::invoke
    pub fn encode_body(&self) -> Bytes {
        let mut output = OutputStream::new();
        self.write_body(&mut output);
        output.freeze()
    }

    /// Encodes the complete request message, header included.
    pub fn encode(&self) -> Bytes {
        let mut output = OutputStream::new();
        write_header(&mut output, MessageType::Request);
        output.write_i32(self.request_id);
        self.write_body(&mut output);
        finish_message(&mut output);
        output.freeze()
    }

    fn write_body(&self, output: &mut OutputStream) {
        self.id.write(output);
        output.write_string_seq(&self.facet);
        output.write_string(&self.operation);
        output.write_byte(self.mode as u8);
        output.write_size(self.context.len());
        // Sorted so that identical requests encode identically.
        let mut entries: Vec<_> = self.context.iter().collect();
        entries.sort();
        for (key, value) in entries {
            output.write_string(key);
            output.write_string(value);
        }
        output.write_encaps(&self.params);
    }

    /// Decodes a complete request message.
    pub fn decode(bytes: impl Into<Bytes>) -> Result<Self, StreamError> {
        let mut input = InputStream::new(bytes);
        let message_type = read_header(&mut input)?;
        if message_type != MessageType::Request {
            return Err(StreamError::InvalidEnum {
                kind: "request message type",
                value: message_type as u8,
            });
        }
        let request_id = input.read_i32()?;
        let id = Identity::read(&mut input)?;
        let facet = input.read_string_seq()?;
        let operation = input.read_string()?;
        let mode = OperationMode::try_from(input.read_byte()?)?;
        let len = input.read_size()?;
        let mut context = HashMap::with_capacity(len.min(input.remaining()));
        for _ in 0..len {
            let key = input.read_string()?;
            let value = input.read_string()?;
            context.insert(key, value);
        }
        let params = input.read_encaps_payload()?;
        Ok(RequestFrame {
            request_id,
            id,
            facet,
            operation,
            mode,
            context,
            params,
        })
    }
}

/// The body of a decoded reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplyBody {
    /// The servant's payload, for `Ok` and `UserException`.
    Payload(Bytes),
    /// The missing target, for the three "does not exist" statuses.
    NotExist {
        /// Identity of the target.
        id: Identity,
        /// Facet path of the target.
        facet: Vec<String>,
        /// Operation name.
        operation: String,
    },
    /// A diagnostic message, for the three "unknown exception" statuses.
    Unknown(String),
}

/// A reply as seen by whoever issued the request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyFrame {
    /// The id of the request this reply answers.
    pub request_id: i32,
    /// The dispatch status.
    pub status: DispatchStatus,
    /// The status dependent body.
    pub body: ReplyBody,
}

impl ReplyFrame {
    /// Decodes a complete reply message.
    pub fn decode(bytes: impl Into<Bytes>) -> Result<Self, StreamError> {
        let mut input = InputStream::new(bytes);
        let message_type = read_header(&mut input)?;
        if message_type != MessageType::Reply {
            return Err(StreamError::InvalidEnum {
                kind: "reply message type",
                value: message_type as u8,
            });
        }
        let request_id = input.read_i32()?;
        let status = DispatchStatus::try_from(input.read_byte()?)?;
        let body = if status.has_payload() {
            ReplyBody::Payload(input.read_encaps_payload()?)
        } else if status.is_request_failed() {
            ReplyBody::NotExist {
                id: Identity::read(&mut input)?,
                facet: input.read_string_seq()?,
                operation: input.read_string()?,
            }
        } else {
            ReplyBody::Unknown(input.read_string()?)
        };
        Ok(ReplyFrame {
            request_id,
            status,
            body,
        })
    }

    /// The payload, if the reply carries one.
    pub fn payload(&self) -> Option<&Bytes> {
        match &self.body {
            ReplyBody::Payload(payload) => Some(payload),
            _ => None,
        }
    }
}
