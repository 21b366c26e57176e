//! Wire framing for mplex.
//!
//! Layout of one frame:
//!
//! ```text
//! [ varint(header) ]   header = (stream_id << 3) | flag
//! [ varint(length) ]
//! [ payload (length) ]
//! ```
//!
//! Responsibilities:
//! - Define flags, frames and codec errors
//! - Encode frames into the canonical byte layout
//! - Decode frames with strict validation, buffered over a transport
//!
//! Non-responsibilities:
//! - Stream state
//! - Threading

pub mod types;
pub mod varint;
pub mod encode;
pub mod decode;

pub use types::{
    Flag,
    Frame,
    FrameError,
};
pub use encode::{encode_frame, encode_frame_into};
pub use decode::{decode_frame, parse_frame_header, FrameReader, ParsedHeader};
