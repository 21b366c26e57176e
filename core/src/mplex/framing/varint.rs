//! Unsigned LEB128 varints (multiformats `unsigned-varint` layout).

use bytes::BufMut;

use crate::constants::MAX_VARINT_LEN;
use super::types::FrameError;

/// Append `value` to `out`, 7 bits per byte, low groups first.
pub fn encode_uvarint<B: BufMut>(mut value: u64, out: &mut B) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.put_u8(byte);
            return;
        }
        out.put_u8(byte | 0x80);
    }
}

/// Number of bytes `encode_uvarint` writes for `value`.
pub fn uvarint_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

/// Decode a varint from the front of `buf`.
///
/// - `Ok(Some((value, consumed)))` on success
/// - `Ok(None)` when `buf` ends inside the varint (need more bytes)
/// - `Err(VarintOverflow)` when the value cannot fit a u64
pub fn decode_uvarint(buf: &[u8]) -> Result<Option<(u64, usize)>, FrameError> {
    let mut value: u64 = 0;

    for (i, &byte) in buf.iter().enumerate() {
        if i >= MAX_VARINT_LEN {
            return Err(FrameError::VarintOverflow);
        }
        let group = u64::from(byte & 0x7f);
        // The 10th byte only has room for the top bit.
        if i == MAX_VARINT_LEN - 1 && group > 1 {
            return Err(FrameError::VarintOverflow);
        }
        value |= group << (7 * i);

        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }

    if buf.len() >= MAX_VARINT_LEN {
        return Err(FrameError::VarintOverflow);
    }
    Ok(None)
}
