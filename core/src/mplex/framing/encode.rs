use bytes::{BufMut, Bytes, BytesMut};

use super::types::{pack_header, Frame, FrameError};
use super::varint::{encode_uvarint, uvarint_len};

/// Encode one frame into canonical wire format.
///
/// Layout:
///
/// ```text
/// [ varint((stream_id << 3) | flag) ]
/// [ varint(payload.len()) ]
/// [ payload ]
/// ```
///
/// An empty payload still carries an explicit zero length.
pub fn encode_frame(stream_id: u64, flag: u8, payload: &[u8]) -> Result<Bytes, FrameError> {
    let header = pack_header(stream_id, flag)?;
    let len = payload.len() as u64;

    let expected = uvarint_len(header) + uvarint_len(len) + payload.len();
    let mut out = BytesMut::with_capacity(expected);

    encode_uvarint(header, &mut out);
    encode_uvarint(len, &mut out);
    out.put_slice(payload);

    if out.len() != expected {
        return Err(FrameError::LengthMismatch {
            expected,
            actual: out.len(),
        });
    }

    Ok(out.freeze())
}

/// Append an already-built frame to `out`.
pub fn encode_frame_into(frame: &Frame, out: &mut BytesMut) -> Result<usize, FrameError> {
    let header = frame.header()?;
    let start = out.len();

    encode_uvarint(header, out);
    encode_uvarint(frame.payload.len() as u64, out);
    out.put_slice(&frame.payload);

    Ok(out.len() - start)
}
