//! Per-stream state for one multiplexed connection.
//!
//! - `id`: connection-wide id allocation
//! - `record`: identity, direction, inbound queue, lifecycle
//! - `table`: id -> record map plus the pending-acceptance queue
//! - `handle`: the caller-facing read/write façade

pub mod id;
pub mod record;
pub mod table;
pub mod handle;

/// Stream identifier, unique within one connection.
pub type StreamId = u64;

pub use id::StreamIdAllocator;
pub use record::{Direction, PushOutcome, StreamRecord, StreamState, TryRead};
pub use table::StreamTable;
pub use handle::StreamHandle;
