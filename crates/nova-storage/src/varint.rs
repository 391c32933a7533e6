//! LEB128 variable-length integers and zigzag signed encoding.

use crate::StorageError;

/// Encode an unsigned 64-bit integer as LEB128 into `buf`.
pub fn encode_varint(mut value: u64, buf: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode a LEB128 unsigned 64-bit integer from `buf` starting at `*pos`.
/// Advances `*pos` past the consumed bytes.
pub fn decode_varint(buf: &[u8], pos: &mut usize) -> Result<u64, StorageError> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;
    loop {
        let Some(&byte) = buf.get(*pos) else {
            return Err(StorageError::InvalidVarint("unexpected end of input"));
        };
        *pos += 1;

        let payload = (byte & 0x7F) as u64;
        if shift > 63 || (shift == 63 && payload > 1) {
            return Err(StorageError::InvalidVarint("varint overflows u64"));
        }
        result |= payload << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
}

/// Decode a varint that must fit into a `u32`.
pub fn decode_varint_u32(buf: &[u8], pos: &mut usize) -> Result<u32, StorageError> {
    let value = decode_varint(buf, pos)?;
    u32::try_from(value).map_err(|_| StorageError::InvalidVarint("varint overflows u32"))
}

/// Zigzag-encode a signed value so small magnitudes of either sign stay short.
/// Maps: 0 -> 0, -1 -> 1, 1 -> 2, -2 -> 3, ...
#[inline]
pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

#[inline]
pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ (-((value & 1) as i64))
}

pub fn encode_signed_varint(value: i64, buf: &mut Vec<u8>) {
    encode_varint(zigzag_encode(value), buf);
}

pub fn decode_signed_varint(buf: &[u8], pos: &mut usize) -> Result<i64, StorageError> {
    decode_varint(buf, pos).map(zigzag_decode)
}
