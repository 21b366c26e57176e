use std::time::Duration;

/// Protocol id announced during multistream negotiation.
pub const MPLEX_PROTOCOL_ID: &str = "/mplex/6.7.0";

/// Frame header geometry: `header = (stream_id << FLAG_BITS) | flag`.
pub const FLAG_BITS: u32 = 3;
pub const FLAG_MASK: u64 = (1 << FLAG_BITS) - 1;

/// Largest stream id that still fits the header next to the 3-bit flag.
pub const MAX_STREAM_ID: u64 = (1 << (64 - FLAG_BITS)) - 1;

/// A u64 needs at most 10 LEB128 groups.
pub const MAX_VARINT_LEN: usize = 10;

/// Defaults when the caller does not override `MplexConfig`
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024; // 1 MiB
pub const DEFAULT_MAX_BUFFERED_CHUNKS: usize = 1024;
pub const DEFAULT_READ_CHUNK_SIZE: usize = 64 * 1024; // 64 KiB
pub const DEFAULT_MAX_PENDING_STREAMS: usize = 256;

/// Sanity bounds enforced by `MplexConfig::validate`.
pub const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);
pub const MAX_READ_TIMEOUT: Duration = Duration::from_secs(5);
pub const MAX_FRAME_LEN_CAP: usize = 32 * 1024 * 1024; // 32 MiB
pub const MIN_READ_CHUNK_SIZE: usize = 512;

/// Target for every `log` record emitted by this crate.
pub const LOG_TARGET: &str = "mplex";
