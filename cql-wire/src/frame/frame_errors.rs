//! Errors that can occur while building request frames or reading frame headers.

use std::sync::Arc;

pub use super::request::{
    auth_response::AuthResponseSerializationError,
    batch::BatchSerializationError,
    execute::ExecuteSerializationError,
    prepare::PrepareSerializationError,
    query::{QueryParametersSerializationError, QuerySerializationError},
    register::RegisterSerializationError,
    startup::StartupSerializationError,
};

use super::request::CqlRequestKind;
use super::{ProtocolVersion, TryFromPrimitiveError};
use thiserror::Error;

/// An error returned when a request could not be turned into a [`RequestFrame`](super::RequestFrame).
///
/// All of these are local, synchronous failures. Retrying the same request
/// against the same protocol version will fail the same way.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum FrameSerializationError {
    /// The version byte does not name a protocol revision this crate can encode.
    #[error("Protocol version {0} is not supported")]
    UnsupportedVersion(u8),

    /// The stream id does not fit into the stream field of the frame header.
    #[error("Stream id {stream} is out of range for protocol {version}")]
    StreamIdOutOfRange {
        /// The offending stream id.
        stream: i16,
        /// Protocol version the frame was being built for.
        version: ProtocolVersion,
    },

    /// The frame writer was finalized without a frame header.
    #[error("Frame writer finalized before a frame header was written")]
    InvalidState,

    /// The body does not fit into the 4-byte length field.
    #[error("Frame body of {0} bytes is too large")]
    BodyTooLarge(usize),

    /// Serialization of the request body failed.
    #[error(transparent)]
    RequestSerialization(#[from] CqlRequestSerializationError),

    /// Body compression failed.
    #[error("Frame compression failed")]
    FrameCompression,
}

/// An error type returned when serialization of a request body fails.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum CqlRequestSerializationError {
    /// Failed to serialize STARTUP request.
    #[error("Failed to serialize STARTUP request: {0}")]
    StartupSerialization(#[from] StartupSerializationError),

    /// Failed to serialize REGISTER request.
    #[error("Failed to serialize REGISTER request: {0}")]
    RegisterSerialization(#[from] RegisterSerializationError),

    /// Failed to serialize QUERY request.
    #[error("Failed to serialize QUERY request: {0}")]
    QuerySerialization(#[from] QuerySerializationError),

    /// Failed to serialize PREPARE request.
    #[error("Failed to serialize PREPARE request: {0}")]
    PrepareSerialization(#[from] PrepareSerializationError),

    /// Failed to serialize EXECUTE request.
    #[error("Failed to serialize EXECUTE request: {0}")]
    ExecuteSerialization(#[from] ExecuteSerializationError),

    /// Failed to serialize BATCH request.
    #[error("Failed to serialize BATCH request: {0}")]
    BatchSerialization(#[from] BatchSerializationError),

    /// Failed to serialize AUTH_RESPONSE request.
    #[error("Failed to serialize AUTH_RESPONSE request: {0}")]
    AuthResponseSerialization(#[from] AuthResponseSerializationError),

    /// The request kind does not exist in the protocol version in use.
    #[error("{kind} request is not available in protocol {version}")]
    NotSupportedInVersion {
        /// Kind of the rejected request.
        kind: CqlRequestKind,
        /// Protocol version the request was being serialized for.
        version: ProtocolVersion,
    },
}

/// An error that occurred while reading the header (or the raw body) of an inbound frame.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum FrameHeaderParseError {
    /// I/O error while reading the header.
    #[error("Failed to read the frame header: {0}")]
    HeaderIoError(std::io::Error),

    /// The direction bit says the frame was sent by a client.
    #[error("Received frame marked as coming from a client")]
    FrameFromClient,

    /// The header carries a version we cannot parse.
    #[error("Received a frame from version {0}, which is not supported")]
    VersionNotSupported(u8),

    /// The opcode byte does not name a response.
    #[error("Unrecognized response opcode: {0}")]
    UnknownResponseOpcode(#[from] TryFromPrimitiveError<u8>),

    /// I/O error while reading the body.
    #[error("Failed to read a chunk of response body. Expected {0} more bytes, error: {1}")]
    BodyChunkIoError(usize, std::io::Error),

    /// The peer closed the stream in the middle of a body.
    #[error("Connection was closed before body was read: missing {0} out of {1}")]
    ConnectionClosed(usize, usize),

    /// The header announces a body longer than any frame may be.
    #[error("Frame body of {length} bytes exceeds the maximum of {max} bytes")]
    FrameTooLarge { length: usize, max: usize },
}

/// An error that occurred while stripping the optional prefix (tracing id, warnings,
/// custom payload) from a response body.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum FrameBodyExtensionsParseError {
    /// The compression flag is set but the connection has no compression.
    #[error("Frame is compressed, but no compression was negotiated for the connection")]
    NoCompressionNegotiated,

    /// Decompression of the body failed.
    #[error("Frame decompression failed")]
    FrameDecompression,

    /// The compressed body announces an uncompressed size over the frame limit.
    #[error("Decompressed frame body of {0} bytes would exceed the frame size limit")]
    DecompressedBodyTooLarge(usize),

    /// Failed to read the tracing id.
    #[error("Malformed tracing id: {0}")]
    TraceIdParse(LowLevelDeserializationError),

    /// Failed to read the warnings list.
    #[error("Malformed warnings list: {0}")]
    WarningsListParse(LowLevelDeserializationError),

    /// Failed to read the custom payload map.
    #[error("Malformed custom payload map: {0}")]
    CustomPayloadMapParse(LowLevelDeserializationError),
}

/// A low level deserialization error.
///
/// Returned by the `read_*` primitives in [`types`](super::types).
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum LowLevelDeserializationError {
    /// Not enough bytes were left to read a fixed-size primitive.
    #[error(transparent)]
    IoError(Arc<std::io::Error>),

    /// A length did not fit the target integer type.
    #[error(transparent)]
    TryFromIntError(#[from] std::num::TryFromIntError),

    /// The declared length exceeds the remaining bytes.
    #[error("Not enough bytes! expected: {expected}, received: {received}")]
    TooFewBytesReceived {
        /// Declared length.
        expected: usize,
        /// Bytes that were actually left.
        received: usize,
    },

    /// A `[value]` length below -2.
    #[error("Invalid value length: {0}")]
    InvalidValueLength(i32),

    /// A consistency short that names no consistency level.
    #[error("Unknown consistency: {0}")]
    UnknownConsistency(#[from] TryFromPrimitiveError<u16>),

    /// A string was not valid UTF-8.
    #[error("UTF8 deserialization failed: {0}")]
    UTF8DeserializationError(#[from] std::str::Utf8Error),
}

impl From<std::io::Error> for LowLevelDeserializationError {
    fn from(value: std::io::Error) -> Self {
        Self::IoError(Arc::new(value))
    }
}
