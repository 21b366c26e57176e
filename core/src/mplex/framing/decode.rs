use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};

use crate::transport::RawConnection;
use crate::types::MplexError;
use super::types::{unpack_header, Frame, FrameError};
use super::varint::decode_uvarint;

/// Header fields parsed from the front of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedHeader {
    pub stream_id: u64,
    pub flag: u8,
    pub payload_len: usize,
    /// Bytes taken by the two varints.
    pub header_len: usize,
}

impl ParsedHeader {
    pub fn frame_len(&self) -> usize {
        self.header_len + self.payload_len
    }
}

/// Parse header and length varints.
///
/// Returns `Ok(None)` while either varint is incomplete. The payload itself
/// is not required to be present.
#[inline]
pub fn parse_frame_header(buf: &[u8], max_frame_len: usize) -> Result<Option<ParsedHeader>, FrameError> {
    let (header, header_varint) = match decode_uvarint(buf)? {
        Some(v) => v,
        None => return Ok(None),
    };
    let (len, len_varint) = match decode_uvarint(&buf[header_varint..])? {
        Some(v) => v,
        None => return Ok(None),
    };

    if len > max_frame_len as u64 {
        return Err(FrameError::FrameTooLarge {
            len,
            max: max_frame_len,
        });
    }

    let (stream_id, flag) = unpack_header(header);
    Ok(Some(ParsedHeader {
        stream_id,
        flag,
        payload_len: len as usize,
        header_len: header_varint + len_varint,
    }))
}

/// Decode exactly one frame from `wire`.
///
/// Caller guarantees the full frame is provided; short input is
/// `Truncated`, trailing bytes are a `LengthMismatch`.
pub fn decode_frame(wire: &[u8]) -> Result<Frame, FrameError> {
    let parsed = parse_frame_header(wire, usize::MAX)?.ok_or(FrameError::Truncated)?;

    let expected = parsed.frame_len();
    if wire.len() < expected {
        return Err(FrameError::Truncated);
    }
    if wire.len() != expected {
        return Err(FrameError::LengthMismatch {
            expected,
            actual: wire.len(),
        });
    }

    Ok(Frame {
        stream_id: parsed.stream_id,
        flag: parsed.flag,
        payload: Bytes::copy_from_slice(&wire[parsed.header_len..]),
    })
}

// ============================================================
// Buffered reader over a transport
// ============================================================

/// Pulls frames off a transport with a bounded wait.
///
/// Partially received frames stay in the buffer across calls, so a timeout
/// never loses bytes. Payloads are split out of the buffer without copying.
pub struct FrameReader {
    conn: Arc<dyn RawConnection>,
    buf: BytesMut,
    max_frame_len: usize,
    read_chunk_size: usize,
}

impl FrameReader {
    pub fn new(conn: Arc<dyn RawConnection>, max_frame_len: usize, read_chunk_size: usize) -> Self {
        Self {
            conn,
            buf: BytesMut::with_capacity(read_chunk_size),
            max_frame_len,
            read_chunk_size,
        }
    }

    /// Bytes received but not yet consumed as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Decode the next frame, reading from the transport at most once.
    ///
    /// - `Ok(Some(frame))`: a complete frame
    /// - `Ok(None)`: no frame yet (the bounded wait elapsed, or a partial read)
    /// - `Err(FrameDecode)`: malformed bytes from the peer
    /// - `Err(Connection)`: the transport failed or closed
    pub fn next_frame(&mut self, timeout: Duration) -> Result<Option<Frame>, MplexError> {
        if let Some(frame) = self.try_decode()? {
            return Ok(Some(frame));
        }

        match self.conn.read(self.read_chunk_size, timeout)? {
            Some(chunk) => self.buf.extend_from_slice(&chunk),
            None => return Ok(None),
        }

        self.try_decode()
    }

    fn try_decode(&mut self) -> Result<Option<Frame>, MplexError> {
        let parsed = match parse_frame_header(&self.buf, self.max_frame_len)? {
            Some(p) => p,
            None => return Ok(None),
        };
        if self.buf.len() < parsed.frame_len() {
            return Ok(None);
        }

        self.buf.advance(parsed.header_len);
        let payload = self.buf.split_to(parsed.payload_len).freeze();

        Ok(Some(Frame {
            stream_id: parsed.stream_id,
            flag: parsed.flag,
            payload,
        }))
    }
}
