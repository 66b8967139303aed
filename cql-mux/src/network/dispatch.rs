//! Correlation of inbound response frames with the requests awaiting them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use cql_wire::frame::response::ResponseFrame;
use tokio::sync::oneshot;
use tracing::debug;

use super::stream_id::StreamIdMultiplexer;
use crate::errors::{BrokenConnectionError, BrokenConnectionErrorKind, DispatchError, RequestError};

/// Completion handle of a request awaiting its response.
pub type ResponseSender = oneshot::Sender<Result<ResponseFrame, RequestError>>;

/// Receiving side of a [`ResponseSender`].
pub type ResponseReceiver = oneshot::Receiver<Result<ResponseFrame, RequestError>>;

/// Maps stream ids to the requests awaiting a response on them.
///
/// Every pending entry is completed exactly once, either with the response
/// frame or with an error, and its stream id is then returned to the
/// multiplexer. If the requester has gone away in the meantime, the completion
/// is dropped but the id is still released.
///
/// The table takes its own lock before the multiplexer's, never the other way round.
pub struct DispatchTable {
    multiplexer: Arc<StreamIdMultiplexer>,
    pending: StdMutex<HashMap<i16, ResponseSender>>,
}

impl DispatchTable {
    /// Creates an empty table releasing ids to `multiplexer`.
    pub fn new(multiplexer: Arc<StreamIdMultiplexer>) -> Self {
        Self {
            multiplexer,
            pending: StdMutex::new(HashMap::new()),
        }
    }

    /// The multiplexer ids are released to.
    pub fn multiplexer(&self) -> &Arc<StreamIdMultiplexer> {
        &self.multiplexer
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<i16, ResponseSender>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records that the request sent on `stream_id` awaits a response.
    ///
    /// The id must have been allocated from the multiplexer. On error, `completion`
    /// is completed with the error.
    pub fn register(
        &self,
        stream_id: i16,
        completion: ResponseSender,
    ) -> Result<(), DispatchError> {
        let mut pending = self.lock();
        let err = if pending.contains_key(&stream_id) {
            DispatchError::DuplicateStream(stream_id)
        } else if !self.multiplexer.is_in_use(stream_id) {
            DispatchError::NotAllocated(stream_id)
        } else {
            pending.insert(stream_id, completion);
            return Ok(());
        };
        // A rejected completion is still completed, with the error.
        let _ = completion.send(Err(BrokenConnectionErrorKind::DispatchInvariant(err).into()));
        Err(err)
    }

    fn take(&self, stream_id: i16) -> Result<ResponseSender, DispatchError> {
        let mut pending = self.lock();
        let completion = pending
            .remove(&stream_id)
            .ok_or(DispatchError::UnknownStream(stream_id))?;
        if let Err(err) = self.multiplexer.release(stream_id) {
            let err = DispatchError::from(err);
            // The entry is gone, so its requester learns about the failure here.
            let _ = completion.send(Err(BrokenConnectionErrorKind::DispatchInvariant(err).into()));
            return Err(err);
        }
        Ok(completion)
    }

    /// Completes the request pending on `stream_id` with `frame` and frees the id.
    pub fn resolve(&self, stream_id: i16, frame: ResponseFrame) -> Result<(), DispatchError> {
        let completion = self.take(stream_id)?;
        if completion.send(Ok(frame)).is_err() {
            // Don't care if sending of the response fails. This must
            // mean that the receiver side was impatient and is not
            // waiting for the result anymore.
            debug!(stream_id, "Dropping response to an abandoned request");
        }
        Ok(())
    }

    /// Completes the request pending on `stream_id` with `error` and frees the id.
    pub fn fail(&self, stream_id: i16, error: RequestError) -> Result<(), DispatchError> {
        let completion = self.take(stream_id)?;
        let _ = completion.send(Err(error));
        Ok(())
    }

    /// Completes every pending request with `error` and frees every id.
    pub fn fail_all(&self, error: BrokenConnectionError) {
        let response_handlers: HashMap<i16, ResponseSender> = {
            let mut pending = self.lock();
            let handlers = std::mem::take(&mut *pending);
            self.multiplexer.reset();
            handlers
        };

        debug!(
            pending = response_handlers.len(),
            "Failing all pending requests: {}", error
        );
        for (_, handler) in response_handlers {
            // Ignore sending error, request was dropped
            let _ = handler.send(Err(error.clone().into()));
        }
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    /// Whether a request awaits a response on `stream_id`.
    pub fn is_pending(&self, stream_id: i16) -> bool {
        self.lock().contains_key(&stream_id)
    }
}

impl std::fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchTable")
            .field("multiplexer", &self.multiplexer)
            .field("pending", &self.pending_count())
            .finish()
    }
}
