use qrb_core::erasure::ErasureCoder;
use qrb_core::placement::{pack, plan, shuffle_order, PageLayout, DEFAULT_SEED};
use qrb_core::sizing::{
    density_table, max_units_with_padding, page_grid, ErrorCorrection, PageGeometry, SymbolSpec,
    MAX_SCALE,
};
use qrb_core::{Chunk, ChunkKey, QrbError};
use proptest::prelude::*;
use std::collections::{BTreeMap, HashSet};

fn chunks(data: usize, k: usize, m: usize) -> Vec<Chunk> {
    let payloads: Vec<Vec<u8>> = (0..data).map(|i| vec![i as u8; 4]).collect();
    ErasureCoder::new(k, m).unwrap().encode(&payloads, (data * 4) as u64).unwrap()
}

fn default_layout(shuffle: bool, copies: u16) -> PageLayout {
    PageLayout::for_symbols(&SymbolSpec::default(), &PageGeometry::default(), shuffle, copies)
}

#[test]
fn default_page_holds_six_by_eight() {
    let symbol = SymbolSpec::default();
    let page = PageGeometry::default();
    assert_eq!(page.pixel_size(), (2083, 2500));
    assert_eq!(symbol.modules(), 57);
    assert_eq!(symbol.pixel_size(), 285);
    assert_eq!(symbol.padding(), 20);
    assert_eq!(symbol.byte_capacity(), 213);
    let grid = page_grid(&symbol, &page);
    assert_eq!((grid.columns, grid.rows), (6, 8));
    assert_eq!(grid.per_page(), 48);
}

#[test]
fn packer_matches_grid_arithmetic() {
    let layout = default_layout(false, 1);
    let sizes = vec![(layout.item_width, layout.item_height); 48];
    let slots = pack(&sizes, layout.page_width, layout.page_height, layout.padding).unwrap();
    assert!(slots.iter().all(|s| s.page == 0));
    for (i, s) in slots.iter().enumerate() {
        assert_eq!((s.row, s.col), ((i / 6) as u32, (i % 6) as u32));
        assert_eq!(s.x, 20 + s.col * 305);
        assert_eq!(s.y, 20 + s.row * 305);
        assert!(s.x + 285 + 20 <= 2083 && s.y + 285 + 20 <= 2500);
    }
}

#[test]
fn every_chunk_once_with_partial_last_page() {
    // 40 data + 10 parity = 50 codes on 48-slot pages.
    let coded = chunks(40, 8, 2);
    assert_eq!(coded.len(), 50);
    let p = plan(&coded, &default_layout(true, 1)).unwrap();
    assert_eq!(p.pages, 2);
    assert_eq!(p.on_page(0).count(), 48);
    assert_eq!(p.on_page(1).count(), 2);

    let keys: HashSet<ChunkKey> = p.placements.iter().map(|pl| pl.chunk).collect();
    let expected: HashSet<ChunkKey> = coded.iter().map(Chunk::key).collect();
    assert_eq!(keys, expected);
    let spots: HashSet<(u32, u32, u32)> =
        p.placements.iter().map(|pl| (pl.slot.page, pl.slot.x, pl.slot.y)).collect();
    assert_eq!(spots.len(), p.placements.len());
}

#[test]
fn copies_repeat_the_whole_sequence() {
    let coded = chunks(10, 5, 1);
    let p = plan(&coded, &default_layout(false, 3)).unwrap();
    assert_eq!(p.placements.len(), 36);
    let n = coded.len();
    for copy in 0..3usize {
        let block = &p.placements[copy * n..(copy + 1) * n];
        assert!(block.iter().all(|pl| pl.copy == copy as u16));
        let order: Vec<ChunkKey> = block.iter().map(|pl| pl.chunk).collect();
        let natural: Vec<ChunkKey> = coded.iter().map(Chunk::key).collect();
        assert_eq!(order, natural);
    }
}

#[test]
fn shuffle_is_deterministic_per_seed() {
    let keys: Vec<ChunkKey> = chunks(80, 8, 2).iter().map(Chunk::key).collect();
    let a = shuffle_order(&keys, DEFAULT_SEED);
    assert_eq!(a, shuffle_order(&keys, DEFAULT_SEED));
    assert_ne!(a, shuffle_order(&keys, 1));
    let mut sorted = a.clone();
    sorted.sort();
    let mut orig = keys.clone();
    orig.sort();
    assert_eq!(sorted, orig);
}

#[test]
fn shuffle_spreads_group_members() {
    // Five full groups and a short one.
    let coded = chunks(42, 8, 2);
    let keys: Vec<ChunkKey> = coded.iter().map(Chunk::key).collect();
    let order = shuffle_order(&keys, 99);
    let mut positions: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for (pos, k) in order.iter().enumerate() {
        positions.entry(k.group_id).or_default().push(pos);
    }
    let full_groups = 5;
    for (g, pos) in positions {
        for w in pos.windows(2) {
            assert!(w[1] - w[0] >= full_groups, "group {g} members at {} and {}", w[0], w[1]);
        }
    }
}

#[test]
fn plan_serializes_with_flat_slots() {
    let p = plan(&chunks(3, 3, 1), &default_layout(false, 1)).unwrap();
    let v = serde_json::to_value(&p).unwrap();
    assert_eq!(v["pages"], 1);
    let first = &v["placements"][0];
    assert_eq!(first["chunk"]["group_id"], 0);
    assert_eq!(first["copy"], 0);
    assert_eq!(first["x"], 20);
    assert_eq!(first["y"], 20);
    assert_eq!(first["page"], 0);
}

#[test]
fn oversized_symbol_and_duplicates_are_rejected() {
    let huge = SymbolSpec { version: 40, ecl: ErrorCorrection::L, scale: 20 };
    let layout = PageLayout::for_symbols(&huge, &PageGeometry::default(), false, 1);
    assert!(matches!(plan(&chunks(2, 2, 0), &layout), Err(QrbError::InvalidConfig(_))));

    let mut coded = chunks(4, 4, 0);
    coded.push(coded[0].clone());
    assert!(matches!(plan(&coded, &default_layout(false, 1)), Err(QrbError::InvalidConfig(_))));

    assert!(matches!(plan(&chunks(2, 2, 0), &default_layout(false, 0)), Err(QrbError::InvalidConfig(_))));
}

#[test]
fn unit_counting_edges() {
    assert_eq!(max_units_with_padding(10, 5, 20), 0);
    assert_eq!(max_units_with_padding(30, 5, 10), 1);
    assert_eq!(max_units_with_padding(39, 5, 10), 1);
    assert_eq!(max_units_with_padding(40, 5, 10), 2);
    assert_eq!(max_units_with_padding(100, 0, 0), 0);
}

#[test]
fn symbol_validation() {
    assert!(SymbolSpec { version: 0, ..SymbolSpec::default() }.validate().is_err());
    assert!(SymbolSpec { version: 41, ..SymbolSpec::default() }.validate().is_err());
    assert!(SymbolSpec { scale: 0, ..SymbolSpec::default() }.validate().is_err());
    assert!(SymbolSpec { scale: MAX_SCALE, ..SymbolSpec::default() }.validate().is_ok());
    assert!(SymbolSpec { scale: MAX_SCALE + 1, ..SymbolSpec::default() }.validate().is_err());
    assert!(PageGeometry { dpi: 0, ..PageGeometry::default() }.validate().is_err());
    assert!(PageGeometry { width_points: -1.0, ..PageGeometry::default() }.validate().is_err());
}

#[test]
fn absurd_scale_saturates_instead_of_wrapping() {
    let huge = SymbolSpec { version: 40, ecl: ErrorCorrection::L, scale: u32::MAX };
    assert!(matches!(huge.validate(), Err(QrbError::InvalidConfig(_))));
    assert_eq!(huge.pixel_size(), u32::MAX);
    assert_eq!(huge.padding(), u32::MAX);
    let grid = page_grid(&huge, &PageGeometry::default());
    assert_eq!(grid.per_page(), 0);

    let table = density_table(&PageGeometry::default(), ErrorCorrection::M, &[10], &[5, u32::MAX], 1);
    assert_eq!(table.len(), 1);
    assert_eq!(table[0].scale, 5);
}

#[test]
fn density_table_is_sorted_and_filtered() {
    let versions: Vec<u8> = (1..=40).collect();
    let table = density_table(&PageGeometry::default(), ErrorCorrection::M, &versions, &[1, 2, 3, 5], 4);
    assert!(!table.is_empty());
    for w in table.windows(2) {
        assert!(w[0].bytes_per_page >= w[1].bytes_per_page);
    }
    assert!(table.iter().all(|s| s.symbols_per_page >= 4));
    let default = table.iter().find(|s| s.version == 10 && s.scale == 5).unwrap();
    assert_eq!(default.symbols_per_page, 48);
    assert_eq!(default.bytes_per_page, 48 * 182);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn packing_never_overlaps_or_overflows(
        count in 1usize..120,
        w in 10u32..400,
        h in 10u32..400,
        padding in 0u32..30,
    ) {
        let (page_w, page_h) = (1000u32, 1200u32);
        let slots = pack(&vec![(w, h); count], page_w, page_h, padding).unwrap();
        prop_assert_eq!(slots.len(), count);
        let mut seen = HashSet::new();
        for s in &slots {
            prop_assert!(s.x >= padding && s.y >= padding);
            prop_assert!(s.x + w + padding <= page_w);
            prop_assert!(s.y + h + padding <= page_h);
            prop_assert!(seen.insert((s.page, s.x, s.y)));
        }
        let per_page = max_units_with_padding(page_w, w, padding) * max_units_with_padding(page_h, h, padding);
        let pages = slots.last().unwrap().page as usize + 1;
        prop_assert_eq!(pages, count.div_ceil(per_page as usize));
    }
}
