//! telemetry/mod.rs
//! Connection telemetry: live counters and immutable snapshots.
//!
//! - Counters are updated by the demux loop and by writers, behind one lock.
//! - Snapshots are plain serde values, safe to log or ship as JSON.

pub mod counters;
pub mod snapshot;

pub use counters::*;
pub use snapshot::*;
