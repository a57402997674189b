//! Fixed-offset field reads and string decoders.
//!
//! `ByteBuffer` pulls little-endian words out of a block read from the target
//! in one go, such as an object header or a collection body.

use encoding_rs::{UTF_16LE, WINDOWS_1252};
use tracing::trace;

use crate::error::{Error, Result};

/// A block of target memory read at fixed field offsets.
///
/// ```
/// use objscan_core::process::ByteBuffer;
///
/// let data = [0; 8].into_iter().chain(0x1234_5678u64.to_le_bytes()).collect::<Vec<u8>>();
/// let buf = ByteBuffer::new(&data);
/// assert_eq!(buf.read_u64_at(8).unwrap(), 0x1234_5678);
/// assert!(buf.read_u64_at(12).is_err());
/// ```
pub struct ByteBuffer<'a> {
    data: &'a [u8],
}

impl<'a> ByteBuffer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn read_u64_at(&self, offset: usize) -> Result<u64> {
        self.word_at(offset).map(u64::from_le_bytes)
    }

    pub fn read_i64_at(&self, offset: usize) -> Result<i64> {
        self.word_at(offset).map(i64::from_le_bytes)
    }

    fn word_at(&self, offset: usize) -> Result<[u8; 8]> {
        offset
            .checked_add(8)
            .and_then(|end| self.data.get(offset..end))
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| {
                Error::unreadable(
                    offset as u64,
                    8,
                    format!("word at {} exceeds buffer length {}", offset, self.data.len()),
                )
            })
    }
}

/// Decodes a length-prefixed byte string.
///
/// UTF-8 is tried first; anything else is read as Windows-1252 so every byte
/// maps to some character.
pub fn decode_byte_string(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            trace!(
                "Byte string is not UTF-8, decoding as Windows-1252: {:?}",
                &bytes[..bytes.len().min(20)]
            );
            let (decoded, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
            decoded.into_owned()
        }
    }
}

/// Strictly decodes 2-byte code units. Returns `None` on unpaired surrogates
/// or embedded NULs, which is how a 4-byte-wide string read as 2-byte looks.
pub fn decode_ucs2(bytes: &[u8]) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let decoded = UTF_16LE.decode_without_bom_handling_and_without_replacement(bytes)?;
    if decoded.contains('\0') {
        return None;
    }
    Some(decoded.into_owned())
}

/// Strictly decodes 4-byte code units. Returns `None` on invalid scalar values
/// or embedded NULs.
pub fn decode_ucs4(bytes: &[u8]) -> Option<String> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    bytes
        .chunks_exact(4)
        .map(|unit| {
            let code = u32::from_le_bytes([unit[0], unit[1], unit[2], unit[3]]);
            char::from_u32(code).filter(|&c| c != '\0')
        })
        .collect()
}
