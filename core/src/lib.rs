//! mplex-core
//!
//! Pure Rust mplex stream multiplexer.
//! Many logical streams over one ordered, reliable connection.

#![forbid(unsafe_code)]

// Shared and top level
pub mod constants;
pub mod types;

// Transport capability + implementations
pub mod transport;

// Multiplexer
pub mod mplex;
pub mod telemetry;

// -----------------------------------------------------------------------------
// Prelude (Rust users)
// -----------------------------------------------------------------------------
pub mod prelude {
    pub use crate::constants::MPLEX_PROTOCOL_ID;
    pub use crate::mplex::{Direction, Flag, Mplex, MplexConfig, StreamHandle, StreamId, StreamState};
    pub use crate::telemetry::TelemetrySnapshot;
    pub use crate::transport::{MemoryConnection, RawConnection, TcpConnection};
    pub use crate::types::{ConnectionError, MplexError};
}
