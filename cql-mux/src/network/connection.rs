//! A multiplexed connection over any async byte stream.

use std::cmp::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use cql_wire::frame::request::{self, OutboundRequest, Request};
use cql_wire::frame::response::{ResponseFrame, ResponseOpcode};
use cql_wire::frame::server_event_type::EventType;
use cql_wire::frame::{self, Compression, FrameParams, RequestFrame};
use cql_wire::ProtocolVersion;
use futures::future::RemoteHandle;
use futures::FutureExt;
use tokio::io::{split, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use super::dispatch::{DispatchTable, ResponseSender};
use super::stream_id::StreamIdMultiplexer;
use crate::errors::{BrokenConnectionError, BrokenConnectionErrorKind, DispatchError, RequestError};

/// What [`Connection::send_request`] does when every stream id is in use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExhaustionPolicy {
    /// Fail the request with [`StreamIdError::Exhausted`](crate::errors::StreamIdError::Exhausted).
    #[default]
    FailFast,
    /// Wait until a response frees an id.
    Wait,
}

/// Configuration of a [`Connection`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Protocol version frames are encoded with. It also sizes the stream id range.
    pub protocol_version: ProtocolVersion,
    /// Body compression already agreed on with the server, if any.
    pub compression: Option<Compression>,
    /// Whether to ask the server to trace every request.
    pub tracing: bool,
    /// Behaviour when no stream id is free.
    pub exhaustion_policy: ExhaustionPolicy,
    /// Receives frames the server sends on the event stream (-1).
    pub event_sender: Option<mpsc::Sender<ResponseFrame>>,
    /// Capacity of the buffer frames are written through.
    pub write_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            protocol_version: ProtocolVersion::LATEST,
            compression: None,
            tracing: false,
            exhaustion_policy: ExhaustionPolicy::default(),
            event_sender: None,
            write_buffer_size: 8192,
        }
    }
}

/// Receives the error that broke the connection, if it ever breaks.
pub type ErrorReceiver = oneshot::Receiver<BrokenConnectionError>;

/// A response, with the optional body prefix split off.
#[derive(Debug)]
pub struct QueryResponse {
    /// Header fields of the response frame.
    pub params: FrameParams,
    /// Kind of the response.
    pub opcode: ResponseOpcode,
    /// Tracing session id, present if tracing was requested.
    pub tracing_id: Option<Uuid>,
    /// Warnings sent by the server.
    pub warnings: Vec<String>,
    /// Response body, still encoded.
    pub body: Bytes,
}

struct Task {
    stream_id: i16,
    frame: RequestFrame,
    response_sender: ResponseSender,
}

// Releases an allocated stream id unless the request made it to the router.
struct StreamIdGuard<'a> {
    multiplexer: &'a StreamIdMultiplexer,
    stream_id: i16,
    armed: bool,
}

impl StreamIdGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StreamIdGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(err) = self.multiplexer.release(self.stream_id) {
                error!(stream_id = self.stream_id, "Failed to release stream id: {}", err);
            }
        }
    }
}

/// A connection multiplexing many requests over one byte stream.
///
/// A router task spawned on the tokio runtime owns the stream: it writes
/// request frames and hands every response frame to the request waiting for
/// it. Dropping the connection stops the router.
pub struct Connection {
    protocol_version: ProtocolVersion,
    compression: Option<Compression>,
    tracing: bool,
    exhaustion_policy: ExhaustionPolicy,
    dispatch: Arc<DispatchTable>,
    submit_channel: mpsc::Sender<Task>,
    _worker_handle: RemoteHandle<()>,
}

impl Connection {
    /// Spawns the router over `stream`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        stream: impl AsyncRead + AsyncWrite + Send + 'static,
        mut config: ConnectionConfig,
    ) -> (Self, ErrorReceiver) {
        let multiplexer = Arc::new(StreamIdMultiplexer::new(config.protocol_version));
        let dispatch = Arc::new(DispatchTable::new(multiplexer));

        let (sender, receiver) = mpsc::channel(1024);
        let (error_sender, error_receiver) = oneshot::channel();

        let (task, handle) = Self::router(
            stream,
            receiver,
            error_sender,
            Arc::clone(&dispatch),
            config.event_sender.take(),
            config.write_buffer_size,
        )
        .remote_handle();
        tokio::task::spawn(task);

        let connection = Connection {
            protocol_version: config.protocol_version,
            compression: config.compression,
            tracing: config.tracing,
            exhaustion_policy: config.exhaustion_policy,
            dispatch,
            submit_channel: sender,
            _worker_handle: handle,
        };

        (connection, error_receiver)
    }

    /// Protocol version requests are encoded with.
    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }

    /// The stream ids of this connection.
    pub fn multiplexer(&self) -> &StreamIdMultiplexer {
        self.dispatch.multiplexer()
    }

    /// Number of requests sent and still awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.dispatch.pending_count()
    }

    /// Sends a request and waits for the response frame answering it.
    pub async fn send_request(
        &self,
        request: impl Into<Request<'_>>,
    ) -> Result<ResponseFrame, RequestError> {
        let request = OutboundRequest::new(self.protocol_version.as_byte(), request)
            .with_tracing(self.tracing)
            .with_compression(self.compression);

        let multiplexer: &StreamIdMultiplexer = self.dispatch.multiplexer();
        let stream_id = match self.exhaustion_policy {
            ExhaustionPolicy::FailFast => multiplexer.allocate()?,
            ExhaustionPolicy::Wait => multiplexer.allocate_wait().await,
        };
        let guard = StreamIdGuard {
            multiplexer,
            stream_id,
            armed: true,
        };

        let frame = request.get_frame(stream_id)?;
        trace!(
            stream_id,
            kind = %request.request().kind(),
            "Encoded request frame of {} bytes",
            frame.get_data().len()
        );

        let (response_sender, receiver) = oneshot::channel();
        self.submit_channel
            .send(Task {
                stream_id,
                frame,
                response_sender,
            })
            .await
            .map_err(|_| BrokenConnectionErrorKind::ChannelError)?;
        // From now on the id is released by the dispatch table.
        guard.disarm();

        receiver
            .await
            .map_err(|_| RequestError::from(BrokenConnectionErrorKind::ChannelError))?
    }

    /// Sends a request and splits the tracing id and warnings off the response body.
    pub async fn send_request_and_parse(
        &self,
        request: impl Into<Request<'_>>,
    ) -> Result<QueryResponse, RequestError> {
        let frame = self.send_request(request).await?;
        self.parse_response(frame)
    }

    fn parse_response(&self, frame: ResponseFrame) -> Result<QueryResponse, RequestError> {
        let params = frame.params;
        let opcode = frame.opcode;
        let body_with_ext = frame.into_body_with_extensions(self.compression)?;

        for warn_description in &body_with_ext.warnings {
            warn!(
                warning = warn_description.as_str(),
                "Response from the database contains a warning",
            );
        }

        Ok(QueryResponse {
            params,
            opcode,
            tracing_id: body_with_ext.trace_id,
            warnings: body_with_ext.warnings,
            body: body_with_ext.body,
        })
    }

    /// Prepares `query`. The server answers with RESULT::Prepared or ERROR.
    pub async fn prepare(&self, query: &str) -> Result<QueryResponse, RequestError> {
        self.send_request_and_parse(request::Prepare::new(query))
            .await
    }

    /// Executes an unprepared statement with default parameters.
    pub async fn query(&self, query: &str) -> Result<QueryResponse, RequestError> {
        self.send_request_and_parse(request::Query::new(query)).await
    }

    /// Asks the server for its supported STARTUP options.
    pub async fn options(&self) -> Result<QueryResponse, RequestError> {
        self.send_request_and_parse(request::Options).await
    }

    /// Subscribes the connection to server events, delivered to the configured event sender.
    pub async fn register(
        &self,
        event_types_to_register_for: Vec<EventType>,
    ) -> Result<QueryResponse, RequestError> {
        self.send_request_and_parse(request::Register {
            event_types_to_register_for,
        })
        .await
    }

    async fn router(
        stream: impl AsyncRead + AsyncWrite,
        receiver: mpsc::Receiver<Task>,
        error_sender: oneshot::Sender<BrokenConnectionError>,
        dispatch: Arc<DispatchTable>,
        event_sender: Option<mpsc::Sender<ResponseFrame>>,
        write_buffer_size: usize,
    ) {
        let (read_half, write_half) = split(stream);

        let r = Self::reader(BufReader::new(read_half), &dispatch, event_sender);
        let w = Self::writer(
            BufWriter::with_capacity(write_buffer_size, write_half),
            &dispatch,
            receiver,
        );

        let result = futures::try_join!(r, w);

        let error: BrokenConnectionError = match result {
            Ok(_) => return, // Connection was dropped, we can return
            Err(err) => err,
        };
        debug!("Connection broken: {}", error);

        // Respond to all pending requests with the error
        dispatch.fail_all(error.clone());

        // If someone is listening for connection errors notify them
        let _ = error_sender.send(error);
    }

    async fn reader(
        mut read_half: impl AsyncRead + Unpin,
        dispatch: &DispatchTable,
        event_sender: Option<mpsc::Sender<ResponseFrame>>,
    ) -> Result<(), BrokenConnectionError> {
        loop {
            let response = frame::read_response_frame(&mut read_half)
                .await
                .map_err(BrokenConnectionErrorKind::FrameHeaderParseError)?;
            let stream_id = response.stream();

            match stream_id.cmp(&-1) {
                Ordering::Less => {
                    // Negative streams are reserved for server-initiated frames,
                    // and only -1 is in use.
                    debug!(stream_id, "Ignoring frame on a reserved stream");
                    continue;
                }
                Ordering::Equal => {
                    if let Some(event_sender) = event_sender.as_ref() {
                        event_sender
                            .send(response)
                            .await
                            .map_err(|_| BrokenConnectionErrorKind::EventChannelClosed)?;
                    }
                    continue;
                }
                _ => {}
            }

            match dispatch.resolve(stream_id, response) {
                Ok(()) => {}
                Err(DispatchError::UnknownStream(_)) => {
                    // Unsolicited frame. This should not happen and indicates
                    // a bug either in this crate, or in the database
                    warn!(stream_id, "Received response with unexpected stream id");
                }
                Err(err) => {
                    error!(stream_id, "Failed to dispatch response: {}", err);
                    return Err(BrokenConnectionErrorKind::DispatchInvariant(err).into());
                }
            }
        }
    }

    async fn writer(
        mut write_half: impl AsyncWrite + Unpin,
        dispatch: &DispatchTable,
        mut task_receiver: mpsc::Receiver<Task>,
    ) -> Result<(), BrokenConnectionError> {
        // When the Connection object is dropped, the sender half
        // of the channel will be dropped, this task will return
        // and the whole worker will be stopped
        while let Some(mut task) = task_receiver.recv().await {
            let mut num_requests = 0;
            let mut total_sent = 0;
            loop {
                if let Err(err) = dispatch.register(task.stream_id, task.response_sender) {
                    error!(stream_id = task.stream_id, "Failed to register request: {}", err);
                    return Err(BrokenConnectionErrorKind::DispatchInvariant(err).into());
                }

                let req_data = task.frame.get_data();
                total_sent += req_data.len();
                num_requests += 1;
                write_half
                    .write_all(req_data)
                    .await
                    .map_err(BrokenConnectionErrorKind::WriteError)?;

                task = match task_receiver.try_recv() {
                    Ok(t) => t,
                    Err(_) => break,
                };
            }
            trace!("Sending {} requests; {} bytes", num_requests, total_sent);
            write_half
                .flush()
                .await
                .map_err(BrokenConnectionErrorKind::WriteError)?;
        }

        Ok(())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("protocol_version", &self.protocol_version)
            .field("compression", &self.compression)
            .field("tracing", &self.tracing)
            .field("exhaustion_policy", &self.exhaustion_policy)
            .field("dispatch", &self.dispatch)
            .finish_non_exhaustive()
    }
}
