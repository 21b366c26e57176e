use bytes::Bytes;
use num_enum::TryFromPrimitive;
use thiserror::Error;

use crate::constants::{FLAG_BITS, FLAG_MASK, MAX_STREAM_ID};
use super::varint::uvarint_len;

/// Frame kinds carried in the low 3 bits of the header.
///
/// `*Initiator` flags are sent by the peer that opened the stream,
/// `*Receiver` flags by the peer that accepted it. Value 7 is reserved.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
pub enum Flag {
    NewStream        = 0,
    MessageReceiver  = 1,
    MessageInitiator = 2,
    CloseReceiver    = 3,
    CloseInitiator   = 4,
    ResetReceiver    = 5,
    ResetInitiator   = 6,
}

impl Flag {
    #[inline(always)]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Convenience: human-readable name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Flag::NewStream => "new-stream",
            Flag::MessageReceiver => "message-receiver",
            Flag::MessageInitiator => "message-initiator",
            Flag::CloseReceiver => "close-receiver",
            Flag::CloseInitiator => "close-initiator",
            Flag::ResetReceiver => "reset-receiver",
            Flag::ResetInitiator => "reset-initiator",
        }
    }
}

/// One decoded (or to-be-encoded) frame.
///
/// `flag` is kept as the raw 3-bit value so the codec round-trips every
/// header, including the reserved value; use [`Frame::kind`] to interpret it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub stream_id: u64,
    pub flag: u8,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(stream_id: u64, flag: Flag, payload: Bytes) -> Self {
        Self {
            stream_id,
            flag: flag.to_u8(),
            payload,
        }
    }

    /// Control frame with an empty payload.
    pub fn control(stream_id: u64, flag: Flag) -> Self {
        Self::new(stream_id, flag, Bytes::new())
    }

    /// Interpret the raw flag; `None` for the reserved value.
    pub fn kind(&self) -> Option<Flag> {
        Flag::try_from(self.flag).ok()
    }

    /// Combined header integer, validated.
    pub fn header(&self) -> Result<u64, FrameError> {
        pack_header(self.stream_id, self.flag)
    }

    /// Encoded size of this frame on the wire.
    pub fn wire_len(&self) -> usize {
        let header = (self.stream_id << FLAG_BITS) | (u64::from(self.flag) & FLAG_MASK);
        let len = self.payload.len();
        uvarint_len(header) + uvarint_len(len as u64) + len
    }
}

#[inline]
pub fn pack_header(stream_id: u64, flag: u8) -> Result<u64, FrameError> {
    if stream_id > MAX_STREAM_ID {
        return Err(FrameError::StreamIdOutOfRange(stream_id));
    }
    if u64::from(flag) > FLAG_MASK {
        return Err(FrameError::InvalidFlag(flag));
    }
    Ok((stream_id << FLAG_BITS) | u64::from(flag))
}

#[inline]
pub fn unpack_header(header: u64) -> (u64, u8) {
    (header >> FLAG_BITS, (header & FLAG_MASK) as u8)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("varint exceeds 64 bits")]
    VarintOverflow,

    #[error("frame length {len} exceeds limit {max}")]
    FrameTooLarge { len: u64, max: usize },

    #[error("stream id {0} does not fit the frame header")]
    StreamIdOutOfRange(u64),

    #[error("invalid flag: {0}")]
    InvalidFlag(u8),

    #[error("truncated frame")]
    Truncated,

    #[error("length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}
