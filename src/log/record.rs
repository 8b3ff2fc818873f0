//! Message and record types

use bytes::Bytes;
use serde::Serialize;

use super::message_id::MessageId;

/// Record attribute flags.
///
/// Unknown bits are carried through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Attributes(u8);

impl Attributes {
    /// Value bytes are compressed by the producer; the log does not interpret them
    pub const COMPRESSED: u8 = 0x01;
    /// The logical message continues in the next physical record
    pub const CONTINUATION: u8 = 0x02;

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_compressed(self) -> bool {
        self.0 & Self::COMPRESSED != 0
    }

    pub fn is_continuation(self) -> bool {
        self.0 & Self::CONTINUATION != 0
    }

    pub fn with_compressed(self, on: bool) -> Self {
        self.set(Self::COMPRESSED, on)
    }

    pub fn with_continuation(self, on: bool) -> Self {
        self.set(Self::CONTINUATION, on)
    }

    fn set(self, bit: u8, on: bool) -> Self {
        if on {
            Self(self.0 | bit)
        } else {
            Self(self.0 & !bit)
        }
    }
}

/// A logical message submitted to `append`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub key: Bytes,
    pub value: Bytes,
    pub compressed: bool,
}

impl Message {
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            compressed: false,
        }
    }

    pub fn compressed(mut self) -> Self {
        self.compressed = true;
        self
    }
}

/// One physical record as decoded from a page region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub id: MessageId,
    /// Stream byte offset where the record begins
    pub offset: u64,
    pub attributes: Attributes,
    pub key: Bytes,
    pub value: Bytes,
}

impl LogRecord {
    pub fn is_continuation(&self) -> bool {
        self.attributes.is_continuation()
    }
}

/// Id and offset assigned to one appended logical message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AppendedMessage {
    #[serde(serialize_with = "serialize_id")]
    pub id: MessageId,
    /// Offset of the message's first physical record
    pub offset: u64,
}

/// Outcome of a successful append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppendResult {
    /// Committed stream position after the batch
    pub position: u64,
    pub messages: Vec<AppendedMessage>,
}

fn serialize_id<S: serde::Serializer>(id: &MessageId, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_flags() {
        let attrs = Attributes::default().with_continuation(true);
        assert!(attrs.is_continuation());
        assert!(!attrs.is_compressed());
        assert_eq!(attrs.with_continuation(false).bits(), 0);

        // Unknown bits survive flag changes
        let attrs = Attributes::from_bits(0x80).with_compressed(true);
        assert_eq!(attrs.bits(), 0x81);
    }

    #[test]
    fn test_append_result_serializes_ids_as_hex() {
        let result = AppendResult {
            position: 27,
            messages: vec![AppendedMessage {
                id: MessageId::from_parts(1, 0, 1),
                offset: 0,
            }],
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"position\":27"));
        assert!(json.contains("\"id\":\"00000000000100000000000000000001\""));
    }
}
