//! Chunk wire format: one chunk is the byte string carried by one QR symbol.
//!
//! ```text
//! off size field
//!   0    2 magic "QB"
//!   2    1 format version
//!   3    4 group_id
//!   7    2 index_in_group
//!   9    2 group_data_count   (k)
//!  11    2 group_parity_count (m)
//!  13    4 global_sequence
//!  17    8 stream_length
//!  25    2 payload_length
//!  27    4 CRC-32 over bytes 0..27 and the payload
//!  31    n payload
//! ```

use crate::error::{QrbError, Result};
use crate::rs_codec::MAX_TOTAL_SHARDS;
use crc32fast::Hasher as Crc32;
use serde::{Deserialize, Serialize};

const CHUNK_MAGIC: &[u8; 2] = b"QB";
const CHUNK_VERSION: u8 = 1;
const CRC_OFFSET: usize = 27;
pub const CHUNK_HEADER_LEN: usize = CRC_OFFSET + 4;

/// Identity of a chunk inside a backup.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey {
    pub group_id: u32,
    pub index: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub group_id: u32,
    pub index_in_group: u16,
    pub group_data_count: u16,
    pub group_parity_count: u16,
    pub global_sequence: u32,
    /// Length of the framed stream; data past it in the last chunk is padding.
    pub stream_length: u64,
    pub payload: Vec<u8>,
}

impl Chunk {
    pub fn key(&self) -> ChunkKey {
        ChunkKey { group_id: self.group_id, index: self.index_in_group }
    }

    pub fn is_parity(&self) -> bool {
        self.index_in_group >= self.group_data_count
    }

    pub fn encoded_len(&self) -> usize {
        CHUNK_HEADER_LEN + self.payload.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(CHUNK_MAGIC);
        buf.push(CHUNK_VERSION);
        buf.extend_from_slice(&self.group_id.to_le_bytes());
        buf.extend_from_slice(&self.index_in_group.to_le_bytes());
        buf.extend_from_slice(&self.group_data_count.to_le_bytes());
        buf.extend_from_slice(&self.group_parity_count.to_le_bytes());
        buf.extend_from_slice(&self.global_sequence.to_le_bytes());
        buf.extend_from_slice(&self.stream_length.to_le_bytes());
        buf.extend_from_slice(&(self.payload.len() as u16).to_le_bytes());
        let crc = checksum(&buf, &self.payload);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parses and validates one decoded symbol. Every failure is `MalformedChunk`.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < CHUNK_HEADER_LEN {
            return Err(malformed(format!("{} bytes is shorter than the header", bytes.len())));
        }
        if &bytes[0..2] != CHUNK_MAGIC {
            return Err(malformed("bad magic"));
        }
        if bytes[2] != CHUNK_VERSION {
            return Err(malformed(format!("unsupported format version {}", bytes[2])));
        }
        let group_id = u32::from_le_bytes(read_array(bytes, 3));
        let index_in_group = u16::from_le_bytes(read_array(bytes, 7));
        let group_data_count = u16::from_le_bytes(read_array(bytes, 9));
        let group_parity_count = u16::from_le_bytes(read_array(bytes, 11));
        let global_sequence = u32::from_le_bytes(read_array(bytes, 13));
        let stream_length = u64::from_le_bytes(read_array(bytes, 17));
        let payload_length = u16::from_le_bytes(read_array(bytes, 25)) as usize;
        let crc = u32::from_le_bytes(read_array(bytes, CRC_OFFSET));
        let payload = &bytes[CHUNK_HEADER_LEN..];

        if payload_length == 0 || payload.len() != payload_length {
            return Err(malformed(format!(
                "declared payload length {payload_length}, found {}",
                payload.len()
            )));
        }
        if checksum(&bytes[..CRC_OFFSET], payload) != crc {
            return Err(malformed("checksum mismatch"));
        }
        let total = group_data_count as usize + group_parity_count as usize;
        if group_data_count == 0 || total > MAX_TOTAL_SHARDS {
            return Err(malformed(format!(
                "invalid group shape k={group_data_count} m={group_parity_count}"
            )));
        }
        if index_in_group as usize >= total {
            return Err(malformed(format!("index {index_in_group} outside group of {total}")));
        }
        if stream_length == 0 {
            return Err(malformed("zero stream length"));
        }
        Ok(Chunk {
            group_id,
            index_in_group,
            group_data_count,
            group_parity_count,
            global_sequence,
            stream_length,
            payload: payload.to_vec(),
        })
    }
}

fn checksum(header: &[u8], payload: &[u8]) -> u32 {
    let mut h = Crc32::new();
    h.update(&header[..CRC_OFFSET]);
    h.update(payload);
    h.finalize()
}

fn read_array<const N: usize>(bytes: &[u8], off: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[off..off + N]);
    out
}

fn malformed(reason: impl Into<String>) -> QrbError {
    QrbError::MalformedChunk(reason.into())
}
