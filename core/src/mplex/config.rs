use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_MAX_BUFFERED_CHUNKS, DEFAULT_MAX_FRAME_LEN, DEFAULT_MAX_PENDING_STREAMS, DEFAULT_READ_CHUNK_SIZE,
    DEFAULT_READ_TIMEOUT, MAX_FRAME_LEN_CAP, MAX_READ_TIMEOUT, MIN_READ_CHUNK_SIZE,
    MIN_READ_TIMEOUT,
};
use crate::types::MplexError;

/// Per-connection multiplexer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MplexConfig {
    /// Bounded wait of one demux read. Keeps the loop responsive to shutdown;
    /// not a protocol deadline.
    pub read_timeout: Duration,

    /// Largest payload accepted from the peer. Longer frames are a decode error.
    pub max_frame_len: usize,

    /// Inbound chunks buffered per stream before the stream is reset.
    pub max_buffered_chunks: usize,

    /// Bytes requested from the transport per read.
    pub read_chunk_size: usize,

    /// Peer streams that carried data before any new-stream frame. Data for
    /// a further unannounced id is refused with a reset.
    pub max_pending_streams: usize,
}

impl Default for MplexConfig {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            max_buffered_chunks: DEFAULT_MAX_BUFFERED_CHUNKS,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            max_pending_streams: DEFAULT_MAX_PENDING_STREAMS,
        }
    }
}

impl MplexConfig {
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    pub fn with_max_buffered_chunks(mut self, chunks: usize) -> Self {
        self.max_buffered_chunks = chunks;
        self
    }

    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }

    pub fn with_max_pending_streams(mut self, streams: usize) -> Self {
        self.max_pending_streams = streams;
        self
    }

    pub fn validate(&self) -> Result<(), MplexError> {
        if self.read_timeout < MIN_READ_TIMEOUT || self.read_timeout > MAX_READ_TIMEOUT {
            return Err(MplexError::Config(format!(
                "read_timeout {:?} outside [{:?}, {:?}]",
                self.read_timeout, MIN_READ_TIMEOUT, MAX_READ_TIMEOUT
            )));
        }
        if self.max_frame_len == 0 || self.max_frame_len > MAX_FRAME_LEN_CAP {
            return Err(MplexError::Config(format!(
                "max_frame_len {} outside [1, {}]",
                self.max_frame_len, MAX_FRAME_LEN_CAP
            )));
        }
        if self.max_buffered_chunks == 0 {
            return Err(MplexError::Config("max_buffered_chunks must be > 0".into()));
        }
        if self.max_pending_streams == 0 {
            return Err(MplexError::Config("max_pending_streams must be > 0".into()));
        }
        if self.read_chunk_size < MIN_READ_CHUNK_SIZE {
            return Err(MplexError::Config(format!(
                "read_chunk_size {} below {}",
                self.read_chunk_size, MIN_READ_CHUNK_SIZE
            )));
        }
        Ok(())
    }
}
