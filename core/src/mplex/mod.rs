//! mplex: stream multiplexing over one ordered byte-stream connection.
//!
//! Responsibilities:
//! - Frame codec (`framing`)
//! - Stream records, table, ids and handles (`stream`)
//! - Background demultiplexing (`demux`)
//! - Open/accept/close orchestration (`core`)
//!
//! Non-responsibilities:
//! - Security handshake, peer identity, protocol negotiation
//! - Interpreting sub-protocol payloads

pub mod config;
pub mod core;
pub mod framing;
pub mod stream;

mod demux;

pub use self::config::MplexConfig;
pub use self::core::{Mplex, MuxCore, StreamHandler};
pub use self::framing::{Flag, Frame, FrameError};
pub use self::stream::{Direction, StreamHandle, StreamId, StreamState};
