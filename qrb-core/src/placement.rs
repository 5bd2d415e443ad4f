//! Placement of chunks on printed pages.
//!
//! Two independent steps: an optional deterministic shuffle that spreads the
//! members of each erasure group apart, and a first-fit streaming packer that
//! lays the resulting sequence out row by row, page by page.
//!
//! Shuffle scheme: groups are ranked by `blake3(seed ‖ group_id)` and the
//! members of each group by `blake3(seed ‖ group_id ‖ index)`. The sequence is
//! then built in rounds; round `r` takes the `r`-th ranked member of every
//! group, visiting groups in the same ranked order every round. Two members of
//! one group therefore have at least `G_full - 1` other chunks between them,
//! where `G_full` is the number of groups of maximal size, so a run of `W`
//! adjacent codes holds at most `ceil(W / G_full)` members of any group.

use crate::chunk::{Chunk, ChunkKey};
use crate::error::{QrbError, Result};
use crate::sizing::{PageGeometry, SymbolSpec};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

pub const DEFAULT_SEED: u64 = 0x5152_4241_434b_5550;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PageLayout {
    pub page_width: u32,
    pub page_height: u32,
    pub item_width: u32,
    pub item_height: u32,
    pub padding: u32,
    pub shuffle: bool,
    /// Number of times the whole chunk set is printed.
    pub copies: u16,
    pub seed: u64,
}

impl PageLayout {
    pub fn for_symbols(symbol: &SymbolSpec, page: &PageGeometry, shuffle: bool, copies: u16) -> Self {
        let (page_width, page_height) = page.pixel_size();
        let size = symbol.pixel_size();
        Self {
            page_width,
            page_height,
            item_width: size,
            item_height: size,
            padding: symbol.padding(),
            shuffle,
            copies,
            seed: DEFAULT_SEED,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.copies == 0 {
            return Err(QrbError::InvalidConfig("at least one copy must be printed".into()));
        }
        check_fits(self.item_width, self.item_height, self.page_width, self.page_height, self.padding)
    }
}

fn check_fits(w: u32, h: u32, page_w: u32, page_h: u32, padding: u32) -> Result<()> {
    let need_w = w as u64 + 2 * padding as u64;
    let need_h = h as u64 + 2 * padding as u64;
    if need_w > page_w as u64 || need_h > page_h as u64 {
        return Err(QrbError::InvalidConfig(format!(
            "a {w}x{h} px item with {padding} px padding does not fit a {page_w}x{page_h} px page"
        )));
    }
    Ok(())
}

/// Position of one item on a page; `x`/`y` are the top-left pixel.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Slot {
    pub page: u32,
    pub row: u32,
    pub col: u32,
    pub x: u32,
    pub y: u32,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Placement {
    pub chunk: ChunkKey,
    pub copy: u16,
    #[serde(flatten)]
    pub slot: Slot,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct PlacementPlan {
    pub pages: u32,
    /// In print order.
    pub placements: Vec<Placement>,
}

impl PlacementPlan {
    pub fn on_page(&self, page: u32) -> impl Iterator<Item = &Placement> {
        self.placements.iter().filter(move |p| p.slot.page == page)
    }
}

fn rank(seed: u64, group_id: u32, index: Option<u16>) -> [u8; 32] {
    let mut h = blake3::Hasher::new();
    h.update(&seed.to_le_bytes());
    h.update(&group_id.to_le_bytes());
    if let Some(i) = index {
        h.update(&i.to_le_bytes());
    }
    *h.finalize().as_bytes()
}

/// Deterministic permutation of `keys` that interleaves erasure groups.
pub fn shuffle_order(keys: &[ChunkKey], seed: u64) -> Vec<ChunkKey> {
    let mut groups: BTreeMap<u32, Vec<ChunkKey>> = BTreeMap::new();
    for key in keys {
        groups.entry(key.group_id).or_default().push(*key);
    }
    let mut ranked: Vec<(u32, Vec<ChunkKey>)> = groups.into_iter().collect();
    for (_, members) in ranked.iter_mut() {
        members.sort_by_cached_key(|k| rank(seed, k.group_id, Some(k.index)));
    }
    ranked.sort_by_cached_key(|(g, _)| rank(seed, *g, None));

    let rounds = ranked.iter().map(|(_, m)| m.len()).max().unwrap_or(0);
    let mut out = Vec::with_capacity(keys.len());
    for r in 0..rounds {
        for (_, members) in &ranked {
            if let Some(key) = members.get(r) {
                out.push(*key);
            }
        }
    }
    out
}

/// First-fit streaming pack of `sizes` (width, height) in the given order.
///
/// An item joins the current row when it fits, with padding on both sides,
/// to the right of the row's last item and below the row's top; otherwise a
/// new row starts under the tallest item of the current row, and when that
/// does not fit either, a new page starts.
pub fn pack(sizes: &[(u32, u32)], page_width: u32, page_height: u32, padding: u32) -> Result<Vec<Slot>> {
    let mut slots = Vec::with_capacity(sizes.len());
    let (mut page, mut row, mut col) = (0u32, 0u32, 0u32);
    // Right edge of the last item in the row, top of the row, tallest item in it.
    let (mut row_used, mut row_top, mut row_height) = (0u64, padding as u64, 0u64);
    let fits_x = |used: u64, w: u64| used + padding as u64 + w + padding as u64 <= page_width as u64;
    let fits_y = |top: u64, h: u64| top + h + padding as u64 <= page_height as u64;

    for &(w, h) in sizes {
        check_fits(w, h, page_width, page_height, padding)?;
        let (w64, h64) = (w as u64, h as u64);
        let row_empty = row_used == 0 && col == 0;
        if !row_empty && !(fits_x(row_used, w64) && fits_y(row_top, h64)) {
            // new row
            row += 1;
            col = 0;
            row_top += row_height + padding as u64;
            row_used = 0;
            row_height = 0;
        }
        if !fits_y(row_top, h64) {
            page += 1;
            row = 0;
            col = 0;
            row_top = padding as u64;
            row_used = 0;
            row_height = 0;
        }
        let x = row_used + padding as u64;
        slots.push(Slot { page, row, col, x: x as u32, y: row_top as u32 });
        row_used = x + w64;
        row_height = row_height.max(h64);
        col += 1;
    }
    Ok(slots)
}

/// Orders (and optionally shuffles) the chunks, repeats them `copies` times
/// and packs them onto pages.
pub fn plan(chunks: &[Chunk], layout: &PageLayout) -> Result<PlacementPlan> {
    layout.validate()?;
    let mut seen = HashSet::with_capacity(chunks.len());
    for c in chunks {
        if !seen.insert(c.key()) {
            return Err(QrbError::InvalidConfig(format!(
                "chunk {}/{} appears twice",
                c.group_id, c.index_in_group
            )));
        }
    }

    let mut coded: Vec<&Chunk> = chunks.iter().collect();
    coded.sort_by_key(|c| c.global_sequence);
    let keys: Vec<ChunkKey> = coded.iter().map(|c| c.key()).collect();
    let order = if layout.shuffle { shuffle_order(&keys, layout.seed) } else { keys };

    let sequence: Vec<(ChunkKey, u16)> =
        (0..layout.copies).flat_map(|copy| order.iter().map(move |k| (*k, copy))).collect();
    let sizes = vec![(layout.item_width, layout.item_height); sequence.len()];
    let slots = pack(&sizes, layout.page_width, layout.page_height, layout.padding)?;

    let pages = slots.last().map_or(0, |s| s.page + 1);
    let placements: Vec<Placement> = sequence
        .into_iter()
        .zip(slots)
        .map(|((chunk, copy), slot)| Placement { chunk, copy, slot })
        .collect();
    debug!(items = placements.len(), pages, shuffle = layout.shuffle, "placement planned");
    Ok(PlacementPlan { pages, placements })
}
