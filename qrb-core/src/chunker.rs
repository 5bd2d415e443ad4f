use crate::chunk::CHUNK_HEADER_LEN;
use crate::error::{QrbError, Result};

/// Payload bytes left in a symbol of `capacity` bytes after the chunk header.
pub fn payload_size(capacity: usize) -> Result<usize> {
    if capacity <= CHUNK_HEADER_LEN {
        return Err(QrbError::CapacityTooSmall { capacity, header: CHUNK_HEADER_LEN });
    }
    let size = capacity - CHUNK_HEADER_LEN;
    if size > u16::MAX as usize {
        return Err(QrbError::InvalidConfig(format!(
            "chunk payload of {size} bytes exceeds {}",
            u16::MAX
        )));
    }
    Ok(size)
}

/// Splits the framed stream into equal payloads of `capacity - CHUNK_HEADER_LEN`
/// bytes; the last one is zero padded.
pub fn split(framed: &[u8], capacity: usize) -> Result<Vec<Vec<u8>>> {
    let size = payload_size(capacity)?;
    let mut out = Vec::with_capacity(framed.len().div_ceil(size));
    for piece in framed.chunks(size) {
        let mut buf = vec![0u8; size];
        buf[..piece.len()].copy_from_slice(piece);
        out.push(buf);
    }
    Ok(out)
}
