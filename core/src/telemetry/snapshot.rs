use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::telemetry::counters::MuxCounters;

/// Smallest possible frame overhead: one header byte + one length byte.
const MIN_FRAME_OVERHEAD: u64 = 2;

/// Core telemetry snapshot.
/// Captures counters, open streams, throughput and uptime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub frames_in: u64,
    pub frames_out: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub bytes_overhead: u64,
    pub streams_opened: u64,
    pub streams_accepted: u64,
    pub streams_closed: u64,
    pub streams_reset: u64,
    pub frames_ignored: u64,
    pub open_streams: usize,
    pub throughput_in_bytes_per_sec: f64,
    pub throughput_out_bytes_per_sec: f64,
    pub uptime: Duration,
}

impl TelemetrySnapshot {
    pub fn from(counters: &MuxCounters, uptime: Duration, open_streams: usize) -> Self {
        let secs = uptime.as_secs_f64();
        let per_sec = |bytes: u64| if secs > 0.0 { bytes as f64 / secs } else { 0.0 };

        Self {
            frames_in: counters.frames_in,
            frames_out: counters.frames_out,
            bytes_in: counters.bytes_in,
            bytes_out: counters.bytes_out,
            bytes_overhead: counters.bytes_overhead,
            streams_opened: counters.streams_opened,
            streams_accepted: counters.streams_accepted,
            streams_closed: counters.streams_closed,
            streams_reset: counters.streams_reset,
            frames_ignored: counters.frames_ignored,
            open_streams,
            throughput_in_bytes_per_sec: per_sec(counters.bytes_in),
            throughput_out_bytes_per_sec: per_sec(counters.bytes_out),
            uptime,
        }
    }

    pub fn total_frames(&self) -> u64 {
        self.frames_in + self.frames_out
    }

    pub fn total_payload_bytes(&self) -> u64 {
        self.bytes_in + self.bytes_out
    }

    /// Internal invariants:
    /// - every frame costs at least two overhead bytes
    /// - no more streams end than were ever opened or accepted
    pub fn sanity_check(&self) -> bool {
        self.bytes_overhead >= MIN_FRAME_OVERHEAD * self.total_frames()
            && self.streams_closed + self.streams_reset <= self.streams_opened + self.streams_accepted
    }
}
