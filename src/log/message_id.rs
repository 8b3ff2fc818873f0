//! # Sortable message identifiers
//!
//! A [`MessageId`] is 16 big-endian bytes:
//!
//! ```text
//! [timestamp_ms:48][offset:48][counter:32]
//! ```
//!
//! The timestamp counts milliseconds since 2020-01-01T00:00:00Z, the offset
//! is the stream byte offset where the record begins, and the counter is a
//! per-process value seeded from entropy. Because every field is big-endian
//! and unsigned, comparing the raw bytes orders ids exactly like comparing
//! the `(timestamp, offset, counter)` tuple.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use rand::Rng;

/// 2020-01-01T00:00:00Z in Unix milliseconds
pub const ID_EPOCH_MS: i64 = 1_577_836_800_000;

const MAX_48: u64 = (1 << 48) - 1;

/// 128-bit sortable message id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MessageId([u8; 16]);

impl MessageId {
    pub const LEN: usize = 16;

    /// Builds an id from its fields. Timestamp and offset are truncated to 48 bits.
    pub fn from_parts(timestamp_ms: u64, offset: u64, counter: u32) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..6].copy_from_slice(&(timestamp_ms & MAX_48).to_be_bytes()[2..]);
        bytes[6..12].copy_from_slice(&(offset & MAX_48).to_be_bytes()[2..]);
        bytes[12..16].copy_from_slice(&counter.to_be_bytes());
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Milliseconds since [`ID_EPOCH_MS`]
    pub fn timestamp_ms(&self) -> u64 {
        read_u48(&self.0[0..6])
    }

    pub fn offset(&self) -> u64 {
        read_u48(&self.0[6..12])
    }

    pub fn counter(&self) -> u32 {
        u32::from_be_bytes([self.0[12], self.0[13], self.0[14], self.0[15]])
    }

    /// Wall-clock creation time, if representable
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(ID_EPOCH_MS + self.timestamp_ms() as i64)
            .single()
    }

    pub fn to_u128(&self) -> u128 {
        u128::from_be_bytes(self.0)
    }
}

fn read_u48(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf[2..].copy_from_slice(bytes);
    u64::from_be_bytes(buf)
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Process-scoped id source.
///
/// The counter is seeded once from entropy and only ever incremented; the
/// timestamp never moves backwards even if the wall clock does, so ids from
/// one generator are strictly increasing for increasing offsets.
#[derive(Debug)]
pub struct MessageIdGenerator {
    counter: AtomicU32,
    last_timestamp: AtomicU64,
}

impl MessageIdGenerator {
    pub fn new() -> Self {
        Self::with_seed(rand::thread_rng().gen())
    }

    pub fn with_seed(seed: u32) -> Self {
        Self {
            counter: AtomicU32::new(seed),
            last_timestamp: AtomicU64::new(0),
        }
    }

    /// Next id for a record beginning at `offset`.
    pub fn next(&self, offset: u64) -> MessageId {
        let now = (Utc::now().timestamp_millis() - ID_EPOCH_MS).max(0) as u64;
        let previous = self.last_timestamp.fetch_max(now, Ordering::AcqRel);
        let timestamp = previous.max(now);
        let counter = self.counter.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        MessageId::from_parts(timestamp, offset, counter)
    }
}

impl Default for MessageIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_round_trip() {
        let id = MessageId::from_parts(0x0102_0304_0506, 0x0A0B_0C0D_0E0F, 0xDEAD_BEEF);
        assert_eq!(id.timestamp_ms(), 0x0102_0304_0506);
        assert_eq!(id.offset(), 0x0A0B_0C0D_0E0F);
        assert_eq!(id.counter(), 0xDEAD_BEEF);
        assert_eq!(&id.as_bytes()[0..2], &[0x01, 0x02]);
    }

    #[test]
    fn test_byte_order_matches_field_order() {
        let a = MessageId::from_parts(5, 1_000, u32::MAX);
        let b = MessageId::from_parts(5, 1_001, 0);
        let c = MessageId::from_parts(6, 0, 0);
        assert!(a.as_bytes() < b.as_bytes());
        assert!(b.as_bytes() < c.as_bytes());
        assert!(a.to_u128() < b.to_u128());
        assert!(a < b && b < c);
    }

    #[test]
    fn test_generator_ids_increase_with_offset() {
        let generator = MessageIdGenerator::with_seed(7);
        let mut previous = generator.next(0);
        for offset in (27..2_700).step_by(27) {
            let id = generator.next(offset);
            assert!(id.as_bytes() > previous.as_bytes());
            assert_eq!(id.offset(), offset);
            previous = id;
        }
    }

    #[test]
    fn test_counter_wraps() {
        let generator = MessageIdGenerator::with_seed(u32::MAX - 1);
        assert_eq!(generator.next(0).counter(), u32::MAX);
        assert_eq!(generator.next(27).counter(), 0);
    }

    #[test]
    fn test_created_at_is_after_epoch() {
        let id = MessageIdGenerator::new().next(0);
        let created = id.created_at().unwrap();
        assert!(created.timestamp_millis() >= ID_EPOCH_MS);
        assert_eq!(id.to_string().len(), 32);
    }
}
