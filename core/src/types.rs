use std::io;
use thiserror::Error;

use crate::mplex::framing::FrameError;
use crate::mplex::stream::StreamId;

/// Failure of the underlying transport.
///
/// `Reset` and `Closed` are kept distinct from a generic I/O failure so callers
/// can tell a peer reset apart from an orderly shutdown.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection closed")]
    Closed,

    #[error("connection reset by peer")]
    Reset,

    #[error("connection I/O error: {0}")]
    Io(#[source] io::Error),
}

impl From<io::Error> for ConnectionError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => ConnectionError::Reset,
            io::ErrorKind::UnexpectedEof | io::ErrorKind::NotConnected => ConnectionError::Closed,
            _ => ConnectionError::Io(e),
        }
    }
}

/// Unified multiplexer error.
/// - `From<T>` impls enable `?` from the transport and the codec.
/// - Stream-scoped variants never affect other streams.
#[derive(Debug, Error)]
pub enum MplexError {
    /// Transport reset or failure; fatal for the connection.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Malformed bytes from the peer; terminates the demultiplex loop.
    #[error("frame decode error: {0}")]
    FrameDecode(#[from] FrameError),

    #[error("stream {0} is not found")]
    StreamNotFound(StreamId),

    #[error("stream {0} is closed")]
    StreamClosed(StreamId),

    #[error("stream {0} was reset")]
    StreamReset(StreamId),

    #[error("stream id space exhausted")]
    StreamIdsExhausted,

    #[error("invalid config: {0}")]
    Config(String),

    /// Thread spawn or other local I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl MplexError {
    /// True when the error means the whole connection is gone.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, MplexError::Connection(_))
    }
}
