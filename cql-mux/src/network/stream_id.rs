//! Allocation of stream ids on a single connection.

use std::sync::{Mutex as StdMutex, MutexGuard, PoisonError};

use cql_wire::ProtocolVersion;
use tokio::sync::Notify;
use tracing::trace;

use crate::errors::StreamIdError;

// Free/in-use bitmap of the stream ids of one connection.
struct StreamIdSet {
    used_bitmap: Box<[u64]>,
    capacity: usize,
    in_use: usize,
}

impl StreamIdSet {
    fn new(capacity: usize) -> Self {
        let bitmap_size = capacity.div_ceil(64);
        Self {
            used_bitmap: vec![0; bitmap_size].into_boxed_slice(),
            capacity,
            in_use: 0,
        }
    }

    fn allocate(&mut self) -> Option<i16> {
        for (block_id, block) in self.used_bitmap.iter_mut().enumerate() {
            if *block != !0 {
                let off = block.trailing_ones() as usize;
                let stream_id = off + block_id * 64;
                if stream_id >= self.capacity {
                    return None;
                }
                *block |= 1u64 << off;
                self.in_use += 1;
                return Some(stream_id as i16);
            }
        }
        None
    }

    // Returns whether the id was in use.
    fn free(&mut self, stream_id: i16) -> bool {
        let block_id = stream_id as usize / 64;
        let mask = 1u64 << (stream_id as usize % 64);
        let was_used = self.used_bitmap[block_id] & mask != 0;
        self.used_bitmap[block_id] &= !mask;
        if was_used {
            self.in_use -= 1;
        }
        was_used
    }

    fn contains(&self, stream_id: i16) -> bool {
        let block_id = stream_id as usize / 64;
        self.used_bitmap[block_id] & (1u64 << (stream_id as usize % 64)) != 0
    }

    fn clear(&mut self) {
        self.used_bitmap.fill(0);
        self.in_use = 0;
    }
}

/// Hands out the stream ids of one connection, so that many requests can be
/// in flight at once and every response can be matched with its request.
///
/// The id range is `0..version.max_stream_count()`, i.e. 128 ids for protocol
/// v1/v2 and 32768 ids for v3/v4. The lowest free id is always allocated first.
/// All state sits behind a single mutex, which is never held across an `.await`.
pub struct StreamIdMultiplexer {
    version: ProtocolVersion,
    ids: StdMutex<StreamIdSet>,
    released: Notify,
}

impl StreamIdMultiplexer {
    /// Creates a multiplexer with every id of `version` free.
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            version,
            ids: StdMutex::new(StreamIdSet::new(version.max_stream_count())),
            released: Notify::new(),
        }
    }

    /// Protocol version the id range was sized for.
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Number of ids that can be in use at the same time.
    pub fn capacity(&self) -> usize {
        self.version.max_stream_count()
    }

    fn lock(&self) -> MutexGuard<'_, StreamIdSet> {
        // The set is consistent after every operation, so a poisoned lock is still usable.
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserves the lowest free id.
    pub fn allocate(&self) -> Result<i16, StreamIdError> {
        let stream_id = self.lock().allocate().ok_or(StreamIdError::Exhausted)?;
        trace!(stream_id, "Allocated stream id");
        Ok(stream_id)
    }

    /// Reserves the lowest free id, waiting for a release if all ids are in use.
    pub async fn allocate_wait(&self) -> i16 {
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            // Register interest before checking, so a release in between is not missed.
            notified.as_mut().enable();

            match self.allocate() {
                Ok(stream_id) => return stream_id,
                Err(_) => notified.await,
            }
        }
    }

    /// Makes `stream_id` available again.
    pub fn release(&self, stream_id: i16) -> Result<(), StreamIdError> {
        if !self.version.is_valid_request_stream(stream_id) {
            return Err(StreamIdError::OutOfRange(stream_id));
        }
        if !self.lock().free(stream_id) {
            return Err(StreamIdError::DoubleRelease(stream_id));
        }
        trace!(stream_id, "Released stream id");
        self.released.notify_one();
        Ok(())
    }

    /// Frees every id at once.
    pub fn reset(&self) {
        self.lock().clear();
        self.released.notify_waiters();
    }

    /// Whether `stream_id` is currently reserved.
    pub fn is_in_use(&self, stream_id: i16) -> bool {
        self.version.is_valid_request_stream(stream_id) && self.lock().contains(stream_id)
    }

    /// Number of ids currently reserved.
    pub fn in_use_count(&self) -> usize {
        self.lock().in_use
    }
}

impl std::fmt::Debug for StreamIdMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamIdMultiplexer")
            .field("version", &self.version)
            .field("in_use", &self.in_use_count())
            .finish()
    }
}
