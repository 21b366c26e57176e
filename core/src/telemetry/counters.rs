//! telemetry/counters.rs
//! Mutable counters collected over a connection's lifetime.
//!
//! Converted into an immutable `TelemetrySnapshot` on demand.
use std::ops::AddAssign;

use serde::{Deserialize, Serialize};

/// Deterministic counters for one multiplexed connection.
#[derive(Default, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuxCounters {
    pub frames_in: u64,
    pub frames_out: u64,
    /// Payload bytes only.
    pub bytes_in: u64,
    pub bytes_out: u64,
    /// Header + length varints, both directions.
    pub bytes_overhead: u64,
    pub streams_opened: u64,
    pub streams_accepted: u64,
    pub streams_closed: u64,
    pub streams_reset: u64,
    /// Frames with a reserved flag or for an unknown/terminal stream.
    pub frames_ignored: u64,
}

impl MuxCounters {
    /// Record one frame read off the transport.
    ///
    /// - `payload_len`: payload bytes
    /// - `frame_len`: total encoded length of the frame
    pub fn add_inbound(&mut self, payload_len: usize, frame_len: usize) {
        self.frames_in += 1;
        self.bytes_in += payload_len as u64;
        self.bytes_overhead += frame_len.saturating_sub(payload_len) as u64;
    }

    /// Record one frame written to the transport.
    pub fn add_outbound(&mut self, payload_len: usize, frame_len: usize) {
        self.frames_out += 1;
        self.bytes_out += payload_len as u64;
        self.bytes_overhead += frame_len.saturating_sub(payload_len) as u64;
    }

    pub fn add_opened(&mut self) {
        self.streams_opened += 1;
    }

    pub fn add_accepted(&mut self) {
        self.streams_accepted += 1;
    }

    pub fn add_closed(&mut self) {
        self.streams_closed += 1;
    }

    pub fn add_reset(&mut self) {
        self.streams_reset += 1;
    }

    pub fn add_ignored(&mut self) {
        self.frames_ignored += 1;
    }

    /// Return total framing overhead bytes counted so far.
    pub fn framing_overhead_bytes(&self) -> u64 {
        self.bytes_overhead
    }

    pub fn merge(&mut self, other: &MuxCounters) {
        self.frames_in += other.frames_in;
        self.frames_out += other.frames_out;
        self.bytes_in += other.bytes_in;
        self.bytes_out += other.bytes_out;
        self.bytes_overhead += other.bytes_overhead;
        self.streams_opened += other.streams_opened;
        self.streams_accepted += other.streams_accepted;
        self.streams_closed += other.streams_closed;
        self.streams_reset += other.streams_reset;
        self.frames_ignored += other.frames_ignored;
    }
}

impl AddAssign for MuxCounters {
    fn add_assign(&mut self, rhs: Self) {
        self.merge(&rhs);
    }
}
