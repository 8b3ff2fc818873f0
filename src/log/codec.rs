//! # Record codec
//!
//! Wire layout of one physical record, repeated contiguously in a page
//! region:
//!
//! ```text
//! [version:1][attributes:1][id:16][key_len:1][key][value_len:2 BE][value][crc32:4 BE]
//! ```
//!
//! The checksum covers the attributes byte, the key and the value. A version
//! byte of zero at a record boundary means the bytes have not been written
//! yet; any other unknown version is corruption.

use bytes::{Buf, BufMut, Bytes};
use crc32fast::Hasher;

use super::errors::{LogError, LogResult};
use super::message_id::MessageId;
use super::record::{Attributes, LogRecord};
use super::{MAX_KEY_SIZE, MAX_VALUE_SIZE};

pub const RECORD_VERSION: u8 = 1;

/// version + attributes + id + key length
pub const HEADER_LEN: usize = 1 + 1 + MessageId::LEN + 1;

/// Fixed bytes around key and value
pub const RECORD_OVERHEAD: usize = HEADER_LEN + 2 + 4;

/// Encoded size of a record with the given key and value lengths.
pub fn encoded_len(key_len: usize, value_len: usize) -> usize {
    RECORD_OVERHEAD + key_len + value_len
}

/// CRC32 over attributes, key and value.
pub fn compute_checksum(attributes: Attributes, key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[attributes.bits()]);
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

/// Appends one record to `buf`.
///
/// Lengths are not validated here: callers keep keys within
/// [`MAX_KEY_SIZE`] and values within [`MAX_VALUE_SIZE`].
pub fn encode<B: BufMut>(
    buf: &mut B,
    id: &MessageId,
    attributes: Attributes,
    key: &[u8],
    value: &[u8],
) {
    debug_assert!(key.len() <= MAX_KEY_SIZE && value.len() <= MAX_VALUE_SIZE);
    buf.put_u8(RECORD_VERSION);
    buf.put_u8(attributes.bits());
    buf.put_slice(id.as_bytes());
    buf.put_u8(key.len() as u8);
    buf.put_slice(key);
    buf.put_u16(value.len() as u16);
    buf.put_slice(value);
    buf.put_u32(compute_checksum(attributes, key, value));
}

/// Framing information derived from the first bytes of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    /// Zero version byte: nothing written here yet
    NoData,
    /// At least this many bytes are needed to learn the record length
    NeedMore(usize),
    /// The whole record occupies this many bytes
    Complete(usize),
}

/// Determines how long the record starting at `prefix[0]` is.
pub fn frame(prefix: &[u8], offset: u64) -> LogResult<Frame> {
    let Some(&version) = prefix.first() else {
        return Ok(Frame::NeedMore(1));
    };
    match version {
        0 => return Ok(Frame::NoData),
        RECORD_VERSION => {}
        other => {
            return Err(LogError::corruption_at_offset(
                offset,
                format!("Unsupported record version {}", other),
            ))
        }
    }
    if prefix.len() < HEADER_LEN {
        return Ok(Frame::NeedMore(HEADER_LEN));
    }
    let key_len = prefix[HEADER_LEN - 1] as usize;
    let value_len_at = HEADER_LEN + key_len;
    if prefix.len() < value_len_at + 2 {
        return Ok(Frame::NeedMore(value_len_at + 2));
    }
    let value_len = u16::from_be_bytes([prefix[value_len_at], prefix[value_len_at + 1]]) as usize;
    Ok(Frame::Complete(encoded_len(key_len, value_len)))
}

/// Result of decoding at a record boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Record(LogRecord),
    /// Caught up with the write frontier
    NoData,
}

/// Decodes one record from the front of `cursor`, advancing it past the
/// record. `offset` is the stream offset of the cursor's first byte.
///
/// A cursor that ends inside a record is reported as corruption: readers
/// only decode bytes below a committed checkpoint.
pub fn decode(cursor: &mut Bytes, offset: u64) -> LogResult<Decoded> {
    let len = match frame(&cursor[..], offset)? {
        Frame::NoData => return Ok(Decoded::NoData),
        Frame::NeedMore(_) => {
            return Err(LogError::corruption_at_offset(offset, "Truncated record header"))
        }
        Frame::Complete(len) => len,
    };
    if cursor.len() < len {
        return Err(LogError::corruption_at_offset(
            offset,
            format!("Truncated record: need {} bytes, have {}", len, cursor.len()),
        ));
    }

    let mut record = cursor.split_to(len);
    record.advance(1);
    let attributes = Attributes::from_bits(record.get_u8());
    let mut id = [0u8; MessageId::LEN];
    record.copy_to_slice(&mut id);
    let key_len = record.get_u8() as usize;
    let key = record.split_to(key_len);
    let value_len = record.get_u16() as usize;
    let value = record.split_to(value_len);
    let stored = record.get_u32();

    let computed = compute_checksum(attributes, &key, &value);
    if stored != computed {
        return Err(LogError::corruption_at_offset(
            offset,
            format!(
                "Checksum mismatch: stored {:08x}, computed {:08x}",
                stored, computed
            ),
        ));
    }

    Ok(Decoded::Record(LogRecord {
        id: MessageId::from_bytes(id),
        offset,
        attributes,
        key,
        value,
    }))
}
