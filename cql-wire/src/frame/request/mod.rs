//! CQL requests sent by the client.

pub mod auth_response;
pub mod batch;
pub mod execute;
pub mod options;
pub mod prepare;
pub mod query;
pub mod register;
pub mod startup;

pub use auth_response::AuthResponse;
pub use batch::Batch;
pub use execute::Execute;
pub use options::Options;
pub use prepare::Prepare;
pub use query::Query;
pub use register::Register;
pub use startup::Startup;

use super::frame_errors::{CqlRequestSerializationError, FrameSerializationError};
use super::writer::FrameWriter;
use super::{Compression, ProtocolVersion, RequestFrame, TryFromPrimitiveError, FLAG_TRACING};

/// Possible requests sent by the client.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CqlRequestKind {
    /// Initialize the connection. The server will respond by either a READY message
    /// (in which case the connection is ready for queries) or an AUTHENTICATE message
    /// (in which case credentials will need to be provided using AUTH_RESPONSE).
    ///
    /// This must be the first message of the connection, except for OPTIONS that can
    /// be sent before to find out the options supported by the server.
    Startup,

    /// Answers a server authentication challenge.
    AuthResponse,

    /// Asks the server to return which STARTUP options are supported. The server
    /// will respond with a SUPPORTED message.
    Options,

    /// Performs a CQL query, i.e., executes an unprepared statement.
    Query,

    /// Prepares a query for later execution (through EXECUTE).
    /// The server will respond with a RESULT::Prepared message.
    Prepare,

    /// Executes a prepared query.
    Execute,

    /// Allows executing a list of queries (prepared or not) as a batch.
    Batch,

    /// Register this connection to receive some types of events.
    Register,
}

impl std::fmt::Display for CqlRequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind_str = match self {
            CqlRequestKind::Startup => "STARTUP",
            CqlRequestKind::AuthResponse => "AUTH_RESPONSE",
            CqlRequestKind::Options => "OPTIONS",
            CqlRequestKind::Query => "QUERY",
            CqlRequestKind::Prepare => "PREPARE",
            CqlRequestKind::Execute => "EXECUTE",
            CqlRequestKind::Batch => "BATCH",
            CqlRequestKind::Register => "REGISTER",
        };

        f.write_str(kind_str)
    }
}

/// Opcode of a request, used to identify the request type in a CQL frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum RequestOpcode {
    /// See [CqlRequestKind::Startup].
    Startup = 0x01,
    /// See [CqlRequestKind::Options].
    Options = 0x05,
    /// See [CqlRequestKind::Query].
    Query = 0x07,
    /// See [CqlRequestKind::Prepare].
    Prepare = 0x09,
    /// See [CqlRequestKind::Execute].
    Execute = 0x0A,
    /// See [CqlRequestKind::Register].
    Register = 0x0B,
    /// See [CqlRequestKind::Batch].
    Batch = 0x0D,
    /// See [CqlRequestKind::AuthResponse].
    AuthResponse = 0x0F,
}

impl RequestOpcode {
    pub fn kind(self) -> CqlRequestKind {
        match self {
            RequestOpcode::Startup => CqlRequestKind::Startup,
            RequestOpcode::Options => CqlRequestKind::Options,
            RequestOpcode::Query => CqlRequestKind::Query,
            RequestOpcode::Prepare => CqlRequestKind::Prepare,
            RequestOpcode::Execute => CqlRequestKind::Execute,
            RequestOpcode::Register => CqlRequestKind::Register,
            RequestOpcode::Batch => CqlRequestKind::Batch,
            RequestOpcode::AuthResponse => CqlRequestKind::AuthResponse,
        }
    }
}

impl TryFrom<u8> for RequestOpcode {
    type Error = TryFromPrimitiveError<u8>;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Startup),
            0x05 => Ok(Self::Options),
            0x07 => Ok(Self::Query),
            0x09 => Ok(Self::Prepare),
            0x0A => Ok(Self::Execute),
            0x0B => Ok(Self::Register),
            0x0D => Ok(Self::Batch),
            0x0F => Ok(Self::AuthResponse),
            _ => Err(TryFromPrimitiveError {
                enum_name: "RequestOpcode",
                primitive: value,
            }),
        }
    }
}

/// Requests that can be serialized into the body of a CQL frame.
pub trait SerializableRequest {
    /// Opcode of the request, used to identify the request type in the CQL frame.
    const OPCODE: RequestOpcode;

    /// Serializes the request body into the provided buffer, using the layout of `version`.
    fn serialize(
        &self,
        version: ProtocolVersion,
        buf: &mut Vec<u8>,
    ) -> Result<(), CqlRequestSerializationError>;

    /// Serializes the request body into a fresh buffer.
    fn to_bytes(&self, version: ProtocolVersion) -> Result<Vec<u8>, CqlRequestSerializationError> {
        let mut v = Vec::new();
        self.serialize(version, &mut v)?;
        Ok(v)
    }
}

/// A CQL request that can be sent to the server.
///
/// The set of requests is fixed by the protocol, so this is a closed sum type:
/// every opcode has exactly one variant.
#[derive(Debug, Clone)]
pub enum Request<'r> {
    /// STARTUP request, finishing connection negotiation.
    Startup(Startup<'r>),
    /// OPTIONS request, asking for the supported STARTUP options.
    Options(Options),
    /// QUERY request, used to execute a single unprepared statement.
    Query(Query<'r>),
    /// PREPARE request, used to prepare a statement for later EXECUTEs.
    Prepare(Prepare<'r>),
    /// EXECUTE request, used to execute a single prepared statement.
    Execute(Execute<'r>),
    /// REGISTER request, subscribing the connection to server events.
    Register(Register),
    /// BATCH request, used to execute a batch of (prepared, unprepared, or mix of both)
    /// statements.
    Batch(Batch<'r>),
    /// AUTH_RESPONSE request, answering an authentication challenge.
    AuthResponse(AuthResponse),
}

impl Request<'_> {
    /// Opcode the frame header will carry for this request.
    pub fn opcode(&self) -> RequestOpcode {
        match self {
            Request::Startup(_) => Startup::OPCODE,
            Request::Options(_) => Options::OPCODE,
            Request::Query(_) => Query::OPCODE,
            Request::Prepare(_) => Prepare::OPCODE,
            Request::Execute(_) => Execute::OPCODE,
            Request::Register(_) => Register::OPCODE,
            Request::Batch(_) => Batch::OPCODE,
            Request::AuthResponse(_) => AuthResponse::OPCODE,
        }
    }

    pub fn kind(&self) -> CqlRequestKind {
        self.opcode().kind()
    }

    /// Serializes the request body into the provided buffer.
    pub fn serialize(
        &self,
        version: ProtocolVersion,
        buf: &mut Vec<u8>,
    ) -> Result<(), CqlRequestSerializationError> {
        match self {
            Request::Startup(r) => r.serialize(version, buf),
            Request::Options(r) => r.serialize(version, buf),
            Request::Query(r) => r.serialize(version, buf),
            Request::Prepare(r) => r.serialize(version, buf),
            Request::Execute(r) => r.serialize(version, buf),
            Request::Register(r) => r.serialize(version, buf),
            Request::Batch(r) => r.serialize(version, buf),
            Request::AuthResponse(r) => r.serialize(version, buf),
        }
    }
}

macro_rules! impl_from_for_request {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl<'r> From<$ty> for Request<'r> {
                fn from(r: $ty) -> Self {
                    Request::$variant(r)
                }
            }
        )*
    };
}

impl_from_for_request! {
    Startup => Startup<'r>,
    Options => Options,
    Query => Query<'r>,
    Prepare => Prepare<'r>,
    Execute => Execute<'r>,
    Register => Register,
    Batch => Batch<'r>,
    AuthResponse => AuthResponse,
}

/// A request bound to the protocol version of the connection it is meant for.
///
/// Building the frame is a pure function of the stored fields and the stream id,
/// so the same `OutboundRequest` can be turned into frames repeatedly (e.g. when
/// it has to be resent on another stream).
#[derive(Debug, Clone)]
pub struct OutboundRequest<'r> {
    version: u8,
    tracing: bool,
    compression: Option<Compression>,
    request: Request<'r>,
}

impl<'r> OutboundRequest<'r> {
    /// Creates a request for protocol `version`.
    ///
    /// The version is only validated when a frame is built.
    pub fn new(version: u8, request: impl Into<Request<'r>>) -> Self {
        Self {
            version,
            tracing: false,
            compression: None,
            request: request.into(),
        }
    }

    /// Asks the server to trace the request.
    pub fn with_tracing(mut self, tracing: bool) -> Self {
        self.tracing = tracing;
        self
    }

    /// Compresses the body with an algorithm already agreed on with the server.
    pub fn with_compression(mut self, compression: Option<Compression>) -> Self {
        self.compression = compression;
        self
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn request(&self) -> &Request<'r> {
        &self.request
    }

    /// Encodes the request into a frame tagged with `stream`.
    pub fn get_frame(&self, stream: i16) -> Result<RequestFrame, FrameSerializationError> {
        let version = ProtocolVersion::try_from(self.version)
            .map_err(|_| FrameSerializationError::UnsupportedVersion(self.version))?;

        let flags = if self.tracing { FLAG_TRACING } else { 0 };

        let mut writer = FrameWriter::new();
        writer.write_frame_header(version, flags, stream, self.request.opcode())?;
        self.request.serialize(version, writer.body_mut())?;
        writer.finish_with_compression(self.compression)
    }
}

/// Rejects request kinds that do not exist before protocol v2.
pub(crate) fn ensure_available_since_v2(
    kind: CqlRequestKind,
    version: ProtocolVersion,
) -> Result<(), CqlRequestSerializationError> {
    if version < ProtocolVersion::V2 {
        return Err(CqlRequestSerializationError::NotSupportedInVersion { kind, version });
    }
    Ok(())
}
