use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::mplex::core::MuxCore;
use crate::types::MplexError;
use super::record::{Direction, StreamRecord, StreamState};
use super::StreamId;

/// Caller-facing façade over one logical stream.
///
/// All handles of a connection share the same transport and stream table.
/// Reads come from this stream's inbound queue; writes go straight to the
/// transport as Message frames tagged with this stream's id.
pub struct StreamHandle {
    record: Arc<StreamRecord>,
    core: Arc<MuxCore>,
    protocol_id: Option<String>,
}

impl StreamHandle {
    pub(crate) fn new(record: Arc<StreamRecord>, core: Arc<MuxCore>, protocol_id: Option<String>) -> Self {
        Self {
            record,
            core,
            protocol_id,
        }
    }

    pub fn id(&self) -> StreamId {
        self.record.id()
    }

    pub fn direction(&self) -> Direction {
        self.record.direction()
    }

    /// Sub-protocol label given to `open_stream`. `None` on accepted streams.
    pub fn protocol_id(&self) -> Option<&str> {
        self.protocol_id.as_deref()
    }

    pub fn state(&self) -> StreamState {
        self.record.state()
    }

    /// Block until the next inbound chunk arrives.
    ///
    /// - `Ok(Some(chunk))`: next chunk, in arrival order
    /// - `Ok(None)`: the stream was closed and everything was read
    /// - `Err(StreamReset)`: the stream was reset
    /// - `Err(Connection(Closed))`: the connection went away
    pub fn read(&self) -> Result<Option<Bytes>, MplexError> {
        self.core.read_record(&self.record)
    }

    /// Like [`read`](Self::read) but never blocks; `Ok(None)` when nothing is queued.
    pub fn read_nonblocking(&self) -> Result<Option<Bytes>, MplexError> {
        self.core.try_read_record(&self.record)
    }

    /// Send `data` as one Message frame. Returns the bytes put on the wire.
    pub fn write(&self, data: &[u8]) -> Result<usize, MplexError> {
        self.core.write_record(&self.record, data)
    }

    /// Close the stream in both directions. Idempotent.
    pub fn close(&self) -> Result<(), MplexError> {
        self.core.close_record(&self.record)
    }

    /// Abort the stream. Idempotent.
    pub fn reset(&self) -> Result<(), MplexError> {
        self.core.reset_record(&self.record)
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.core.release_record(&self.record);
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.id())
            .field("direction", &self.direction())
            .field("protocol_id", &self.protocol_id)
            .field("state", &self.state())
            .finish()
    }
}
