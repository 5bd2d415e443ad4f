use crate::error::{QrbError, Result};
use std::io::Read;

/// General-purpose compression used by the stream framer.
pub trait Compressor: Send + Sync {
    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>>;

    /// Decompresses `data`, which must expand to exactly `expected_len` bytes.
    fn decompress(&self, data: &[u8], expected_len: u64) -> Result<Vec<u8>>;
}

/// zstd at a fixed level. Output is deterministic for a given level.
#[derive(Clone, Copy, Debug)]
pub struct ZstdCompressor {
    pub level: i32,
}

impl Default for ZstdCompressor {
    fn default() -> Self {
        Self { level: 19 }
    }
}

impl Compressor for ZstdCompressor {
    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>> {
        zstd::stream::encode_all(raw, self.level)
            .map_err(|e| QrbError::Compress(format!("zstd: {e}")))
    }

    fn decompress(&self, data: &[u8], expected_len: u64) -> Result<Vec<u8>> {
        let decoder = zstd::stream::read::Decoder::new(data)
            .map_err(|e| QrbError::DecompressError(format!("zstd init: {e}")))?;
        // Read one byte past the declared size so an oversized stream is caught
        // without inflating it completely.
        let mut out = Vec::new();
        decoder
            .take(expected_len.saturating_add(1))
            .read_to_end(&mut out)
            .map_err(|e| QrbError::DecompressError(format!("zstd: {e}")))?;
        if out.len() as u64 != expected_len {
            return Err(QrbError::DecompressError(format!(
                "expanded to {} bytes, expected {expected_len}",
                out.len()
            )));
        }
        Ok(out)
    }
}
