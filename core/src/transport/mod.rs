//! Raw connection abstraction consumed by the multiplexer.
//!
//! The multiplexer never owns the socket logic; it only needs an ordered,
//! reliable byte stream with read/write/close. Two implementations ship:
//! - [`TcpConnection`]: socket-backed
//! - [`MemoryConnection`]: in-memory pair, used by tests

use std::time::Duration;

use bytes::Bytes;

use crate::types::ConnectionError;

pub mod memory;
pub mod tcp;

pub use memory::MemoryConnection;
pub use tcp::TcpConnection;

/// Canonical transport capability.
///
/// Implementations must be safe to share between the demultiplex thread
/// (the only reader) and any number of writer threads. Each `write` call
/// must land on the wire as one contiguous range.
pub trait RawConnection: Send + Sync {
    /// Whether this side dialed the connection. Picks the stream id parity.
    fn is_initiator(&self) -> bool;

    /// Read up to `max_bytes`, waiting at most `timeout`.
    ///
    /// - `Ok(Some(bytes))`: non-empty data
    /// - `Ok(None)`: nothing arrived before the timeout
    /// - `Err(Closed)`: orderly end of stream
    /// - `Err(Reset)`: the peer reset the connection
    fn read(&self, max_bytes: usize, timeout: Duration) -> Result<Option<Bytes>, ConnectionError>;

    /// Write all of `data` and flush it.
    fn write(&self, data: &[u8]) -> Result<(), ConnectionError>;

    /// Close the connection. Idempotent.
    fn close(&self) -> Result<(), ConnectionError>;

    fn is_closed(&self) -> bool;
}
