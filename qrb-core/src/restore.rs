//! Order-independent reassembly of scanned chunks.
//!
//! Scanned symbols arrive in any order, possibly duplicated, damaged or
//! missing, and a scan pile may hold pages from more than one backup. The
//! reconciler buckets chunks by their stream parameters and group shape and
//! only decides which bucket forms the stream once collection is over.

use crate::chunk::{Chunk, ChunkKey};
use crate::erasure::decode_group;
use crate::error::{QrbError, Result};
use crate::frame::{Framer, StreamHeader};
use crate::symbol::ScanResult;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ingested {
    Accepted,
    /// Same key and payload as a chunk already held.
    Duplicate,
}

#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct CollectReport {
    pub accepted: usize,
    pub duplicates: usize,
    pub malformed: usize,
    pub conflicts: usize,
    pub unreadable: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct StreamParams {
    stream_length: u64,
    payload_len: usize,
}

impl StreamParams {
    fn data_chunks(&self) -> u64 {
        self.stream_length.div_ceil(self.payload_len as u64)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct GroupShape {
    k: u16,
    m: u16,
    seq_base: u32,
}

/// Every distinct payload seen per index.
type Shares = BTreeMap<u16, Vec<Vec<u8>>>;

/// Chunks agreeing on one set of stream parameters.
#[derive(Debug, Default)]
struct Candidate {
    groups: BTreeMap<u32, BTreeMap<GroupShape, Shares>>,
}

impl Candidate {
    fn held(&self) -> usize {
        self.groups.values().flat_map(BTreeMap::values).map(BTreeMap::len).sum()
    }

    /// Every `(k, m)` seen in any group. A full group carries the configured
    /// `k`, so the real layout is always among these.
    fn coding_params(&self) -> BTreeSet<(u16, u16)> {
        self.groups.values().flat_map(BTreeMap::keys).map(|s| (s.k, s.m)).collect()
    }
}

/// A candidate read with one `(k, m)`: the groups it selects and the first
/// gap, if any.
struct Layout<'a> {
    params: StreamParams,
    groups: Vec<(u32, GroupShape, &'a Shares)>,
    held: usize,
    gap: Option<QrbError>,
}

impl<'a> Layout<'a> {
    fn new(params: StreamParams, candidate: &'a Candidate, k: u16, m: u16) -> Self {
        let data_chunks = params.data_chunks();
        let k_cfg = k as u64;
        let expected_groups = data_chunks.div_ceil(k_cfg);
        let required = |g: u64| k_cfg.min(data_chunks - g * k_cfg) as usize;
        let missing = |g: u64| QrbError::IncompleteGroup {
            group_id: g as u32,
            available: 0,
            required: required(g),
        };

        let mut layout = Layout { params, groups: Vec::new(), held: 0, gap: None };
        if expected_groups > u32::MAX as u64 {
            layout.gap = Some(QrbError::IntegrityError(format!(
                "{data_chunks} data chunks cannot be addressed"
            )));
            return layout;
        }

        let mut next = 0u64;
        for (&g, shapes) in candidate.groups.range(..expected_groups as u32) {
            let g64 = g as u64;
            let need = required(g64);
            let want = u32::try_from(g64 * (k_cfg + m as u64))
                .ok()
                .map(|seq_base| GroupShape { k: need as u16, m, seq_base });
            let shares = want.and_then(|s| shapes.get(&s).map(|sh| (s, sh)));
            let available = shares.map_or(0, |(_, sh)| sh.len());
            if layout.gap.is_none() {
                if g64 > next {
                    layout.gap = Some(missing(next));
                } else if available < need {
                    layout.gap =
                        Some(QrbError::IncompleteGroup { group_id: g, available, required: need });
                }
            }
            if let Some((shape, sh)) = shares {
                layout.groups.push((g, shape, sh));
            }
            layout.held += available;
            next = g64 + 1;
        }
        if layout.gap.is_none() && next < expected_groups {
            layout.gap = Some(missing(next));
        }
        layout
    }
}

#[derive(Default)]
pub struct Reconciler {
    framer: Framer,
    streams: BTreeMap<StreamParams, Candidate>,
    report: CollectReport,
}

fn conflict(key: ChunkKey, reason: String) -> QrbError {
    QrbError::ConflictingChunk { group_id: key.group_id, index: key.index, reason }
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_framer(framer: Framer) -> Self {
        Self { framer, ..Self::default() }
    }

    pub fn report(&self) -> &CollectReport {
        &self.report
    }

    /// Number of distinct chunks held, across every candidate stream.
    pub fn held(&self) -> usize {
        self.streams.values().map(Candidate::held).sum()
    }

    /// Takes one decoded symbol.
    ///
    /// `MalformedChunk` and `ConflictingChunk` are per-item: the reconciler
    /// stays usable. A payload that conflicts with an earlier copy of the same
    /// chunk is kept for adjudication at reconstruction time. Chunks whose
    /// stream or group parameters differ are bucketed apart, never dropped.
    pub fn ingest(&mut self, raw: &[u8]) -> Result<Ingested> {
        let chunk = match Chunk::parse(raw) {
            Ok(c) => c,
            Err(e) => {
                self.report.malformed += 1;
                return Err(e);
            }
        };
        let res = self.admit(chunk);
        match &res {
            Ok(Ingested::Accepted) => self.report.accepted += 1,
            Ok(Ingested::Duplicate) => self.report.duplicates += 1,
            Err(QrbError::MalformedChunk(_)) => self.report.malformed += 1,
            Err(_) => self.report.conflicts += 1,
        }
        res
    }

    fn admit(&mut self, chunk: Chunk) -> Result<Ingested> {
        let key = chunk.key();
        let params =
            StreamParams { stream_length: chunk.stream_length, payload_len: chunk.payload.len() };
        let seq_base = chunk
            .global_sequence
            .checked_sub(chunk.index_in_group as u32)
            .ok_or_else(|| {
                QrbError::MalformedChunk(format!(
                    "sequence {} precedes its group start",
                    chunk.global_sequence
                ))
            })?;
        let shape =
            GroupShape { k: chunk.group_data_count, m: chunk.group_parity_count, seq_base };

        let variants = self
            .streams
            .entry(params)
            .or_default()
            .groups
            .entry(chunk.group_id)
            .or_default()
            .entry(shape)
            .or_default()
            .entry(chunk.index_in_group)
            .or_default();
        if variants.iter().any(|v| *v == chunk.payload) {
            return Ok(Ingested::Duplicate);
        }
        let first = variants.is_empty();
        variants.push(chunk.payload);
        if first {
            Ok(Ingested::Accepted)
        } else {
            Err(conflict(key, format!("{} different payloads seen", variants.len())))
        }
    }

    /// Feeds decoder output in; per-item failures are counted and logged.
    pub fn ingest_all<I>(&mut self, items: I) -> &CollectReport
    where
        I: IntoIterator<Item = ScanResult>,
    {
        for item in items {
            match item {
                Ok(bytes) => {
                    if let Err(e) = self.ingest(&bytes) {
                        warn!(error = %e, "chunk skipped");
                    }
                }
                Err(e) => {
                    self.report.unreadable += 1;
                    debug!(error = %e, "unreadable symbol");
                }
            }
        }
        info!(
            accepted = self.report.accepted,
            duplicates = self.report.duplicates,
            malformed = self.report.malformed,
            conflicts = self.report.conflicts,
            unreadable = self.report.unreadable,
            "collected chunks"
        );
        &self.report
    }

    /// Recovers the framed stream: every group is erasure-decoded and the data
    /// payloads are joined in global order and truncated to the stream length.
    ///
    /// Exactly one candidate must be complete. None complete reports the gap
    /// of the candidate holding the most chunks; more than one is
    /// `AmbiguousStream`.
    pub fn reconstruct(&self) -> Result<Vec<u8>> {
        let mut complete: Vec<Layout<'_>> = Vec::new();
        let mut closest: Option<Layout<'_>> = None;
        for (params, candidate) in &self.streams {
            for (k, m) in candidate.coding_params() {
                let layout = Layout::new(*params, candidate, k, m);
                if layout.gap.is_none() {
                    complete.push(layout);
                } else if closest.as_ref().map_or(true, |c| layout.held > c.held) {
                    closest = Some(layout);
                }
            }
        }
        let layout = match complete.len() {
            0 => {
                return Err(closest.and_then(|c| c.gap).unwrap_or(QrbError::IncompleteGroup {
                    group_id: 0,
                    available: 0,
                    required: 1,
                }))
            }
            1 => complete.remove(0),
            candidates => return Err(QrbError::AmbiguousStream { candidates }),
        };
        let ignored = self.held() - layout.held;
        if ignored > 0 {
            warn!(ignored, "ignoring chunks outside the restored stream");
        }

        // Group ids ascend with the sequence base, so this is global order.
        let decoded: Vec<Vec<Vec<u8>>> = layout
            .groups
            .par_iter()
            .map(|(g, shape, shares)| decode_group(*g, shape.k as usize, shape.m as usize, shares))
            .collect::<Result<_>>()?;

        let params = layout.params;
        let mut framed =
            Vec::with_capacity(params.data_chunks() as usize * params.payload_len);
        for payload in decoded.into_iter().flatten() {
            framed.extend_from_slice(&payload);
        }
        if (framed.len() as u64) < params.stream_length {
            return Err(QrbError::IntegrityError(format!(
                "reassembled {} bytes, stream declares {}",
                framed.len(),
                params.stream_length
            )));
        }
        framed.truncate(params.stream_length as usize);
        debug!(groups = layout.groups.len(), bytes = framed.len(), "reassembled stream");
        Ok(framed)
    }

    /// Reconstructs and decodes the stream header.
    pub fn reassemble(&self) -> Result<(StreamHeader, Vec<u8>)> {
        let framed = self.reconstruct()?;
        let (header, payload) = StreamHeader::decode(&framed, self.framer.params_len())?;
        Ok((header, payload.to_vec()))
    }

    /// Reassembles, decrypts, decompresses and verifies the original bytes.
    pub fn finish(&self, password: Option<&str>) -> Result<Vec<u8>> {
        let (header, payload) = self.reassemble()?;
        let raw = self.framer.unframe(&header, &payload, password)?;
        info!(bytes = raw.len(), backup = %header.short_id(), "restored stream");
        Ok(raw)
    }
}
