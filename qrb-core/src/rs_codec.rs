use crate::error::{QrbError, Result};
use reed_solomon_erasure::galois_8::ReedSolomon;

/// Largest `k + m` the GF(256) field allows.
pub const MAX_TOTAL_SHARDS: usize = 256;

/// Thin wrapper over the GF(256) Reed-Solomon codec.
///
/// `m == 0` is accepted and turns every operation into a passthrough; the
/// underlying library refuses zero parity shards.
pub struct RsCodec {
    pub k: usize,
    pub m: usize,
    inner: Option<ReedSolomon>,
}

impl RsCodec {
    pub fn new(k: usize, m: usize) -> Result<Self> {
        if k == 0 {
            return Err(QrbError::InvalidConfig("data shard count must be at least 1".into()));
        }
        if k + m > MAX_TOTAL_SHARDS {
            return Err(QrbError::InvalidConfig(format!(
                "k + m = {} exceeds {MAX_TOTAL_SHARDS}",
                k + m
            )));
        }
        let inner = if m == 0 { None } else { Some(ReedSolomon::new(k, m)?) };
        Ok(Self { k, m, inner })
    }

    /// Fills the trailing `m` shards with parity over the leading `k`.
    pub fn encode(&self, shards: &mut [&mut [u8]]) -> Result<()> {
        if let Some(rs) = &self.inner {
            rs.encode(shards)?;
        }
        Ok(())
    }

    // Note: reconstruct expects Option<Vec<u8>> buffers; restores parity too
    pub fn reconstruct(&self, shards: &mut [Option<Vec<u8>>]) -> Result<()> {
        match &self.inner {
            Some(rs) => rs.reconstruct(shards)?,
            None => {
                if shards.iter().any(Option::is_none) {
                    return Err(QrbError::ErasureCoding(
                        "cannot reconstruct without parity shards".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}
