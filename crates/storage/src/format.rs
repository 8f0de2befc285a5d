//! Log record format.
//!
//! Both engines persist committed writesets as self-delimiting records with a
//! CRC32 checksum. A record is the unit of atomicity: on replay it is either
//! applied whole or, if torn or corrupt, not at all.
//!
//! # Record Layout
//!
//! ```text
//! ┌─────────────────┬──────────────┬───────────┬───────────┬─────────────┬──────────┐
//! │ Length (4 bytes)│ Format Ver(1)│ Seq (8)   │ Count (4) │ Mutations   │ CRC32 (4)│
//! └─────────────────┴──────────────┴───────────┴───────────┴─────────────┴──────────┘
//!
//! Mutation:
//! ┌──────────┬──────────────┬───────┬──────────────────────────────┐
//! │ Tag (1)  │ KeyLen (4)   │ Key   │ Put only: ValLen (4) + Value │
//! └──────────┴──────────────┴───────┴──────────────────────────────┘
//! ```
//!
//! The length field covers everything after itself (version, payload, CRC).

use crc32fast::Hasher;

/// Current record format version
pub const RECORD_FORMAT_VERSION: u8 = 1;

/// Mutation tag bytes
const MUTATION_PUT: u8 = 0x01;
const MUTATION_DELETE: u8 = 0x02;

/// Bytes before the first mutation: length + version + seq + count
const RECORD_HEADER_SIZE: usize = 4 + 1 + 8 + 4;

/// Upper bound on a record's length field, used to reject garbage lengths
pub const MAX_RECORD_SIZE: usize = 1 << 30;

/// A single change inside a committed writeset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Create or overwrite a value
    Put {
        /// Engine-level key
        key: Vec<u8>,
        /// New value
        value: Vec<u8>,
    },
    /// Remove a key
    Delete {
        /// Engine-level key
        key: Vec<u8>,
    },
}

impl Mutation {
    /// Key touched by this mutation
    pub fn key(&self) -> &[u8] {
        match self {
            Mutation::Put { key, .. } => key,
            Mutation::Delete { key } => key,
        }
    }

    /// Encoded size of this mutation
    pub fn encoded_len(&self) -> usize {
        match self {
            Mutation::Put { key, value } => 1 + 4 + key.len() + 4 + value.len(),
            Mutation::Delete { key } => 1 + 4 + key.len(),
        }
    }
}

/// Location of a value inside an encoded record, relative to the record start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueSpan {
    /// Offset of the first value byte
    pub offset: usize,
    /// Value length in bytes
    pub len: usize,
}

/// One committed writeset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogRecord {
    /// Commit sequence number assigned by the engine
    pub seq: u64,
    /// Mutations in commit order
    pub mutations: Vec<Mutation>,
}

impl LogRecord {
    /// Create a record
    pub fn new(seq: u64, mutations: Vec<Mutation>) -> Self {
        LogRecord { seq, mutations }
    }

    /// Serialize the record.
    ///
    /// Returns the bytes plus, for each mutation, where its value sits
    /// (`None` for deletes).
    pub fn encode(&self) -> (Vec<u8>, Vec<Option<ValueSpan>>) {
        let body: usize = self.mutations.iter().map(Mutation::encoded_len).sum();
        let mut bytes = Vec::with_capacity(RECORD_HEADER_SIZE + body + 4);
        let mut spans = Vec::with_capacity(self.mutations.len());

        // Length placeholder, patched below
        bytes.extend_from_slice(&[0u8; 4]);
        bytes.push(RECORD_FORMAT_VERSION);
        bytes.extend_from_slice(&self.seq.to_le_bytes());
        bytes.extend_from_slice(&(self.mutations.len() as u32).to_le_bytes());

        for mutation in &self.mutations {
            match mutation {
                Mutation::Put { key, value } => {
                    bytes.push(MUTATION_PUT);
                    bytes.extend_from_slice(&(key.len() as u32).to_le_bytes());
                    bytes.extend_from_slice(key);
                    bytes.extend_from_slice(&(value.len() as u32).to_le_bytes());
                    spans.push(Some(ValueSpan {
                        offset: bytes.len(),
                        len: value.len(),
                    }));
                    bytes.extend_from_slice(value);
                }
                Mutation::Delete { key } => {
                    bytes.push(MUTATION_DELETE);
                    bytes.extend_from_slice(&(key.len() as u32).to_le_bytes());
                    bytes.extend_from_slice(key);
                    spans.push(None);
                }
            }
        }

        let crc = compute_crc(&bytes[4..]);
        bytes.extend_from_slice(&crc.to_le_bytes());

        let length = (bytes.len() - 4) as u32;
        bytes[0..4].copy_from_slice(&length.to_le_bytes());

        (bytes, spans)
    }

    /// Serialize the record, discarding value spans
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode().0
    }

    /// Deserialize one record from the front of `bytes`.
    ///
    /// Returns the record, its value spans and the number of bytes consumed.
    pub fn decode(bytes: &[u8]) -> Result<(Self, Vec<Option<ValueSpan>>, usize), RecordError> {
        if bytes.len() < 4 {
            return Err(RecordError::InsufficientData);
        }

        let length = read_u32(bytes, 0) as usize;
        if length < RECORD_HEADER_SIZE - 4 + 4 || length > MAX_RECORD_SIZE {
            return Err(RecordError::InvalidLength(length));
        }
        if bytes.len() < 4 + length {
            return Err(RecordError::InsufficientData);
        }

        let end = 4 + length;
        let stored_crc = read_u32(bytes, end - 4);
        let computed_crc = compute_crc(&bytes[4..end - 4]);
        if stored_crc != computed_crc {
            return Err(RecordError::ChecksumMismatch {
                expected: stored_crc,
                computed: computed_crc,
            });
        }

        let version = bytes[4];
        if version != RECORD_FORMAT_VERSION {
            return Err(RecordError::UnsupportedVersion(version));
        }

        let seq = u64::from_le_bytes(bytes[5..13].try_into().map_err(|_| RecordError::InvalidFormat)?);
        let count = read_u32(bytes, 13) as usize;

        let payload_end = end - 4;
        let mut cursor = RECORD_HEADER_SIZE;
        let mut mutations = Vec::with_capacity(count.min(1024));
        let mut spans = Vec::with_capacity(count.min(1024));

        for _ in 0..count {
            if cursor + 5 > payload_end {
                return Err(RecordError::InvalidFormat);
            }
            let tag = bytes[cursor];
            let key_len = read_u32(bytes, cursor + 1) as usize;
            cursor += 5;
            if cursor + key_len > payload_end {
                return Err(RecordError::InvalidFormat);
            }
            let key = bytes[cursor..cursor + key_len].to_vec();
            cursor += key_len;

            match tag {
                MUTATION_PUT => {
                    if cursor + 4 > payload_end {
                        return Err(RecordError::InvalidFormat);
                    }
                    let value_len = read_u32(bytes, cursor) as usize;
                    cursor += 4;
                    if cursor + value_len > payload_end {
                        return Err(RecordError::InvalidFormat);
                    }
                    spans.push(Some(ValueSpan {
                        offset: cursor,
                        len: value_len,
                    }));
                    let value = bytes[cursor..cursor + value_len].to_vec();
                    cursor += value_len;
                    mutations.push(Mutation::Put { key, value });
                }
                MUTATION_DELETE => {
                    spans.push(None);
                    mutations.push(Mutation::Delete { key });
                }
                other => return Err(RecordError::InvalidTag(other)),
            }
        }

        if cursor != payload_end {
            return Err(RecordError::InvalidFormat);
        }

        Ok((LogRecord { seq, mutations }, spans, end))
    }
}

/// Record parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    /// Not enough data to parse a whole record (torn write)
    #[error("insufficient data to parse record")]
    InsufficientData,

    /// Length prefix is impossible
    #[error("invalid record length {0}")]
    InvalidLength(usize),

    /// Payload does not match its declared structure
    #[error("invalid record format")]
    InvalidFormat,

    /// Unknown mutation tag
    #[error("invalid mutation tag {0:#04x}")]
    InvalidTag(u8),

    /// Checksum verification failed
    #[error("checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// Checksum stored in the record
        expected: u32,
        /// Checksum computed over the payload
        computed: u32,
    },

    /// Unsupported format version
    #[error("unsupported record format version: {0}")]
    UnsupportedVersion(u8),
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(buf)
}

/// CRC32 of `data`
pub fn compute_crc(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LogRecord {
        LogRecord::new(
            7,
            vec![
                Mutation::Put {
                    key: b"a".to_vec(),
                    value: b"hello".to_vec(),
                },
                Mutation::Delete { key: b"b".to_vec() },
                Mutation::Put {
                    key: b"c".to_vec(),
                    value: Vec::new(),
                },
            ],
        )
    }

    #[test]
    fn test_decode_returns_record_and_consumed() {
        let record = sample();
        let (bytes, _) = record.encode();
        let (decoded, _, consumed) = LogRecord::decode(&bytes).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_value_spans_point_at_values() {
        let record = sample();
        let (bytes, spans) = record.encode();
        let span = spans[0].unwrap();
        assert_eq!(&bytes[span.offset..span.offset + span.len], b"hello");
        assert!(spans[1].is_none());
        assert_eq!(spans[2].unwrap().len, 0);

        let (_, decoded_spans, _) = LogRecord::decode(&bytes).unwrap();
        assert_eq!(decoded_spans, spans);
    }

    #[test]
    fn test_torn_record_is_insufficient() {
        let (bytes, _) = sample().encode();
        let torn = &bytes[..bytes.len() - 3];
        assert_eq!(
            LogRecord::decode(torn).unwrap_err(),
            RecordError::InsufficientData
        );
    }

    #[test]
    fn test_flipped_bit_fails_checksum() {
        let (mut bytes, _) = sample().encode();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x40;
        assert!(matches!(
            LogRecord::decode(&bytes),
            Err(RecordError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_garbage_length_rejected() {
        let garbage = [0xFF, 0xFF, 0xFF, 0xFF, 0x00];
        assert!(matches!(
            LogRecord::decode(&garbage),
            Err(RecordError::InvalidLength(_))
        ));
        let zeros = [0u8; 32];
        assert!(matches!(
            LogRecord::decode(&zeros),
            Err(RecordError::InvalidLength(0))
        ));
    }

    #[test]
    fn test_back_to_back_records() {
        let first = sample();
        let second = LogRecord::new(8, vec![Mutation::Delete { key: b"a".to_vec() }]);
        let mut bytes = first.to_bytes();
        bytes.extend_from_slice(&second.to_bytes());

        let (a, _, used) = LogRecord::decode(&bytes).unwrap();
        let (b, _, _) = LogRecord::decode(&bytes[used..]).unwrap();
        assert_eq!(a.seq, 7);
        assert_eq!(b.seq, 8);
    }
}
