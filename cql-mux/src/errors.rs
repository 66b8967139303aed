//! Errors returned by the stream-id multiplexer, the dispatch table and the connection.

use std::error::Error;
use std::sync::Arc;

use cql_wire::frame::frame_errors::{
    FrameBodyExtensionsParseError, FrameHeaderParseError, FrameSerializationError,
};
use thiserror::Error;

/// An error returned by [`StreamIdMultiplexer`](crate::network::StreamIdMultiplexer).
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamIdError {
    /// Every stream id of the connection is in use.
    #[error("Unable to allocate stream id: all stream ids are in use")]
    Exhausted,

    /// The stream id was released although it was not in use.
    #[error("Stream id {0} released twice")]
    DoubleRelease(i16),

    /// The stream id cannot be used by requests in the connection's protocol version.
    #[error("Stream id {0} is out of range")]
    OutOfRange(i16),
}

/// An error returned by [`DispatchTable`](crate::network::DispatchTable).
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    /// A request is already awaiting a response on this stream.
    #[error("Stream id {0} already has a pending request")]
    DuplicateStream(i16),

    /// The stream id was not handed out by the multiplexer.
    #[error("Stream id {0} was registered without being allocated")]
    NotAllocated(i16),

    /// No request is awaiting a response on this stream.
    #[error("Received response with unexpected stream id {0}")]
    UnknownStream(i16),

    /// Releasing the stream id of a completed request failed.
    #[error(transparent)]
    StreamId(#[from] StreamIdError),
}

/// Error that breaks a connection. Every request pending on the connection
/// is completed with a clone of it.
#[derive(Error, Debug, Clone)]
#[error("Connection broken, reason: {0}")]
pub struct BrokenConnectionError(Arc<dyn Error + Sync + Send>);

impl BrokenConnectionError {
    /// Retrieve an error reason by downcasting to specific type.
    pub fn downcast_ref<T: Error + 'static>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl From<BrokenConnectionErrorKind> for BrokenConnectionError {
    fn from(value: BrokenConnectionErrorKind) -> Self {
        BrokenConnectionError(Arc::new(value))
    }
}

/// A reason why the connection was broken.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BrokenConnectionErrorKind {
    /// Failed to read an inbound frame.
    #[error("Failed to deserialize frame: {0}")]
    FrameHeaderParseError(FrameHeaderParseError),

    /// Failed to write a request frame to the transport.
    #[error("Failed to write data: {0}")]
    WriteError(std::io::Error),

    /// The stream-id bookkeeping of the connection is corrupted.
    #[error("Stream id bookkeeping violated: {0}")]
    DispatchInvariant(#[from] DispatchError),

    /// The receiver of server events was dropped.
    #[error("Event receiver was dropped")]
    EventChannelClosed,

    /// Channel between the connection handle and its router was closed.
    #[error("The channel between the connection and its router was closed")]
    ChannelError,
}

/// An error returned by [`Connection::send_request`](crate::network::Connection::send_request).
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum RequestError {
    /// No stream id was available and the connection is configured to fail fast.
    #[error(transparent)]
    StreamId(#[from] StreamIdError),

    /// The request could not be encoded into a frame.
    #[error("Failed to serialize request: {0}")]
    FrameSerialization(#[from] FrameSerializationError),

    /// The response body prefix could not be parsed.
    #[error("Failed to parse response body extensions: {0}")]
    BodyExtensions(#[from] FrameBodyExtensionsParseError),

    /// The connection broke before the response arrived.
    #[error(transparent)]
    BrokenConnection(#[from] BrokenConnectionError),
}

impl From<BrokenConnectionErrorKind> for RequestError {
    fn from(value: BrokenConnectionErrorKind) -> Self {
        RequestError::BrokenConnection(value.into())
    }
}
