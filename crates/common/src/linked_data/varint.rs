//! Unsigned LEB128 varints, as used by multiformats and CAR framing.

use tokio::io::{AsyncRead, AsyncReadExt};

/// Longest encoding of a u64.
pub const MAX_VARINT_LEN: usize = 10;

/// Append the varint encoding of `value` to `buf`.
pub fn encode_into(mut value: u64, buf: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

/// Encode `value` as a varint.
pub fn encode(value: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAX_VARINT_LEN);
    encode_into(value, &mut buf);
    buf
}

/// Number of bytes `value` takes once encoded.
pub fn encoded_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

/// Decode a varint from the front of `buf`, returning the value and
///  the number of bytes consumed.
pub fn decode(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for (i, byte) in buf.iter().take(MAX_VARINT_LEN).enumerate() {
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

/// Read a varint from an async reader.
///
/// Returns `Ok(None)` on a clean end of stream (no bytes read).
pub async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Option<u64>> {
    let mut value = 0u64;
    for i in 0..MAX_VARINT_LEN {
        let mut byte = [0u8; 1];
        let n = reader.read(&mut byte).await?;
        if n == 0 {
            if i == 0 {
                return Ok(None);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "truncated varint",
            ));
        }
        value |= u64::from(byte[0] & 0x7f) << (7 * i);
        if byte[0] & 0x80 == 0 {
            return Ok(Some(value));
        }
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        "varint overflow",
    ))
}
