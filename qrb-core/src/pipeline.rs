//! End-to-end backup and restore over the capability traits in [`crate::symbol`].

use crate::chunk::{Chunk, ChunkKey};
use crate::chunker;
use crate::erasure::ErasureCoder;
use crate::error::{QrbError, Result};
use crate::frame::{Framer, StreamHeader};
use crate::placement::{self, PageLayout, Placement, PlacementPlan, DEFAULT_SEED};
use crate::restore::Reconciler;
use crate::rs_codec::MAX_TOTAL_SHARDS;
use crate::sizing::{page_grid, PageGeometry, SymbolSpec};
use crate::symbol::{
    MemoryChannel, MemorySink, PageLabel, PageSink, ScanResult, SymbolDecoder, SymbolEncoder,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BackupConfig {
    pub symbol: SymbolSpec,
    pub page: PageGeometry,
    /// `(k, m)` data and parity chunks per group; `None` prints data only.
    pub erasure: Option<(usize, usize)>,
    pub shuffle: bool,
    pub copies: u16,
    pub compress: bool,
    pub seed: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            symbol: SymbolSpec::default(),
            page: PageGeometry::default(),
            erasure: Some((8, 2)),
            shuffle: true,
            copies: 1,
            compress: true,
            seed: DEFAULT_SEED,
        }
    }
}

impl BackupConfig {
    pub fn validate(&self) -> Result<()> {
        self.symbol.validate()?;
        self.page.validate()?;
        chunker::payload_size(self.symbol.byte_capacity())?;
        self.coder()?;
        self.layout().validate()
    }

    /// Without erasure coding the stream is still grouped, with no parity.
    pub fn coder(&self) -> Result<ErasureCoder> {
        match self.erasure {
            Some((k, m)) => ErasureCoder::new(k, m),
            None => ErasureCoder::new(MAX_TOTAL_SHARDS, 0),
        }
    }

    pub fn layout(&self) -> PageLayout {
        let mut layout = PageLayout::for_symbols(&self.symbol, &self.page, self.shuffle, self.copies);
        layout.seed = self.seed;
        layout
    }

    /// Payload bytes per chunk.
    pub fn payload_size(&self) -> Result<usize> {
        chunker::payload_size(self.symbol.byte_capacity())
    }
}

#[derive(Clone, Debug)]
pub struct Backup {
    pub header: StreamHeader,
    /// In global sequence order.
    pub chunks: Vec<Chunk>,
    pub plan: PlacementPlan,
    /// Encoded wire bytes per chunk.
    pub wire: HashMap<ChunkKey, Vec<u8>>,
    pub symbol: SymbolSpec,
}

impl Backup {
    pub fn short_id(&self) -> String {
        self.header.short_id()
    }

    /// Wire bytes of every printed symbol, in print order.
    pub fn printed(&self) -> impl Iterator<Item = (&Placement, &[u8])> {
        self.plan
            .placements
            .iter()
            .filter_map(|p| self.wire.get(&p.chunk).map(|w| (p, w.as_slice())))
    }
}

/// Text that goes on every page besides the page number.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageMeta {
    pub title: String,
    pub created: String,
}

pub fn encode(raw: &[u8], cfg: &BackupConfig, password: Option<&str>) -> Result<Backup> {
    encode_with(&Framer::default(), raw, cfg, password)
}

pub fn encode_with(
    framer: &Framer,
    raw: &[u8],
    cfg: &BackupConfig,
    password: Option<&str>,
) -> Result<Backup> {
    cfg.validate()?;
    let (header, framed) = framer.frame_stream(raw, cfg.compress, password)?;
    let payloads = chunker::split(&framed, cfg.symbol.byte_capacity())?;
    let chunks = cfg.coder()?.encode(&payloads, framed.len() as u64)?;
    let plan = placement::plan(&chunks, &cfg.layout())?;
    let wire = chunks.iter().map(|c| (c.key(), c.encode())).collect();

    let grid = page_grid(&cfg.symbol, &cfg.page);
    info!(
        bytes = raw.len(),
        framed = framed.len(),
        chunks = chunks.len(),
        symbols = plan.placements.len(),
        pages = plan.pages,
        per_page = grid.per_page(),
        backup = %header.short_id(),
        "encoded backup"
    );
    Ok(Backup { header, chunks, plan, wire, symbol: cfg.symbol })
}

/// Drives `sink` page by page through the placement plan.
pub fn render<E, S>(backup: &Backup, encoder: &E, sink: &mut S, meta: &PageMeta) -> Result<()>
where
    E: SymbolEncoder,
    S: PageSink<Image = E::Image>,
{
    let backup_id = backup.short_id();
    for page in 0..backup.plan.pages {
        let label = PageLabel {
            page: page + 1,
            pages: backup.plan.pages,
            title: meta.title.clone(),
            created: meta.created.clone(),
            backup_id: backup_id.clone(),
        };
        sink.begin_page(&label)?;
        let mut placed = 0usize;
        for p in backup.plan.on_page(page) {
            let bytes = backup.wire.get(&p.chunk).ok_or_else(|| {
                QrbError::InvalidConfig(format!(
                    "plan references unknown chunk {}/{}",
                    p.chunk.group_id, p.chunk.index
                ))
            })?;
            sink.place(encoder.encode(bytes, &backup.symbol)?, &p.slot)?;
            placed += 1;
        }
        sink.end_page()?;
        debug!(page = label.page, symbols = placed, "rendered page");
    }
    Ok(())
}

/// Runs the decoder over every page image.
pub fn scan<D: SymbolDecoder>(images: &[D::Image], decoder: &D) -> Vec<ScanResult> {
    images.iter().flat_map(|img| decoder.decode(img)).collect()
}

/// Restores the original bytes from decoded symbols in any order.
pub fn restore<I>(items: I, password: Option<&str>) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = ScanResult>,
{
    let mut reconciler = Reconciler::new();
    reconciler.ingest_all(items);
    reconciler.finish(password)
}

/// Prints the backup into memory, scans it back and restores it.
pub fn self_check(backup: &Backup, password: Option<&str>, raw: &[u8]) -> Result<()> {
    let channel = MemoryChannel::default();
    let mut sink = MemorySink::default();
    render(backup, &channel, &mut sink, &PageMeta::default())
        .map_err(|e| QrbError::SelfCheckFailed(format!("render: {e}")))?;
    let scanned = scan(&sink.pages, &channel);
    let restored =
        restore(scanned, password).map_err(|e| QrbError::SelfCheckFailed(format!("restore: {e}")))?;
    if restored != raw {
        return Err(QrbError::SelfCheckFailed("restored bytes differ from the input".into()));
    }
    debug!(pages = sink.pages.len(), "self-check passed");
    Ok(())
}
