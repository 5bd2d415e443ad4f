//! Per-group systematic Reed-Solomon over GF(256).
//!
//! Data payloads are grouped `k` at a time; each group gets `m` parity
//! payloads. The last group may hold fewer than `k` data payloads and is coded
//! as RS(`k_active`, m), with `k_active` recorded in its chunks.

use crate::chunk::Chunk;
use crate::error::{QrbError, Result};
use crate::rs_codec::RsCodec;
use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ErasureCoder {
    k: usize,
    m: usize,
}

impl ErasureCoder {
    pub fn new(k: usize, m: usize) -> Result<Self> {
        // Validates the shape once up front.
        RsCodec::new(k, m)?;
        Ok(Self { k, m })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn m(&self) -> usize {
        self.m
    }

    /// Codes equal-length payloads into chunks, group by group, data before parity.
    pub fn encode(&self, payloads: &[Vec<u8>], stream_length: u64) -> Result<Vec<Chunk>> {
        let Some(first) = payloads.first() else {
            return Ok(Vec::new());
        };
        let shard_len = first.len();
        if payloads.iter().any(|p| p.len() != shard_len) {
            return Err(QrbError::InvalidConfig("payloads must have equal length".into()));
        }
        let groups = payloads.len().div_ceil(self.k);
        let total = groups * self.m + payloads.len();
        if total > u32::MAX as usize {
            return Err(QrbError::InvalidConfig(format!("{total} chunks exceed the sequence space")));
        }

        let coded: Vec<Vec<Chunk>> = payloads
            .par_chunks(self.k)
            .enumerate()
            .map(|(g, data)| self.encode_group(g, data, stream_length))
            .collect::<Result<_>>()?;
        debug!(groups, chunks = total, k = self.k, m = self.m, "erasure coded stream");
        Ok(coded.into_iter().flatten().collect())
    }

    fn encode_group(&self, group: usize, data: &[Vec<u8>], stream_length: u64) -> Result<Vec<Chunk>> {
        let k_active = data.len();
        let shard_len = data[0].len();
        let rs = RsCodec::new(k_active, self.m)?;

        let mut shards: Vec<Vec<u8>> = Vec::with_capacity(k_active + self.m);
        shards.extend(data.iter().cloned());
        shards.extend((0..self.m).map(|_| vec![0u8; shard_len]));
        let mut refs: Vec<&mut [u8]> = shards.iter_mut().map(|v| v.as_mut_slice()).collect();
        rs.encode(&mut refs)?;

        // Every group before the last is full, so the base is a plain product.
        let seq_base = group * (self.k + self.m);
        Ok(shards
            .into_iter()
            .enumerate()
            .map(|(i, payload)| Chunk {
                group_id: group as u32,
                index_in_group: i as u16,
                group_data_count: k_active as u16,
                group_parity_count: self.m as u16,
                global_sequence: (seq_base + i) as u32,
                stream_length,
                payload,
            })
            .collect())
    }
}

/// Recovers the `k` data payloads of one group.
///
/// `shares` maps `index_in_group` to every payload variant seen for it. More
/// than one variant at an index is adjudicated against the reconstruction from
/// unambiguous shares; if that is not possible the group is rejected rather
/// than guessed.
pub fn decode_group(
    group_id: u32,
    k: usize,
    m: usize,
    shares: &BTreeMap<u16, Vec<Vec<u8>>>,
) -> Result<Vec<Vec<u8>>> {
    let rs = RsCodec::new(k, m)?;
    let distinct = shares.keys().filter(|&&i| (i as usize) < k + m).count();
    if distinct < k {
        return Err(QrbError::InsufficientShares { group_id, available: distinct, required: k });
    }

    let unrecoverable =
        |reason: String| QrbError::UnrecoverableGroup { group_id, reason };
    let mut unambiguous: Vec<(usize, &Vec<u8>)> = Vec::new();
    let mut conflicting: Vec<(usize, &Vec<Vec<u8>>)> = Vec::new();
    for (&idx, variants) in shares.iter().filter(|&(&i, _)| (i as usize) < k + m) {
        match variants.as_slice() {
            [] => {}
            [only] => unambiguous.push((idx as usize, only)),
            _ => conflicting.push((idx as usize, variants)),
        }
    }

    if m == 0 {
        if let Some((idx, _)) = conflicting.first() {
            return Err(unrecoverable(format!(
                "conflicting copies of chunk {idx} and no parity to decide between them"
            )));
        }
        return Ok(unambiguous.into_iter().map(|(_, p)| p.clone()).collect());
    }
    if unambiguous.len() < k {
        return Err(unrecoverable(format!(
            "only {} unambiguous chunks, {} indices have conflicting copies",
            unambiguous.len(),
            conflicting.len()
        )));
    }

    let mut slots: Vec<Option<Vec<u8>>> = vec![None; k + m];
    for &(idx, payload) in unambiguous.iter().take(k) {
        slots[idx] = Some(payload.clone());
    }
    rs.reconstruct(&mut slots).map_err(|e| unrecoverable(e.to_string()))?;
    let mut full: Vec<Vec<u8>> = slots
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| unrecoverable("reconstruction left gaps".into()))?;

    for &(idx, payload) in unambiguous.iter().skip(k) {
        if &full[idx] != payload {
            return Err(unrecoverable(format!("chunk {idx} disagrees with the other chunks")));
        }
    }
    for (idx, variants) in &conflicting {
        let matching = variants.iter().filter(|v| **v == full[*idx]).count();
        if matching != 1 {
            return Err(unrecoverable(format!(
                "{} of {} copies of chunk {idx} match the reconstruction",
                matching,
                variants.len()
            )));
        }
    }
    if !conflicting.is_empty() {
        debug!(group_id, resolved = conflicting.len(), "adjudicated conflicting chunks");
    }

    full.truncate(k);
    Ok(full)
}
