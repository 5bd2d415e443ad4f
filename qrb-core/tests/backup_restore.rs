use proptest::prelude::*;
use qrb_core::pipeline::{encode, render, restore, scan, self_check, BackupConfig, PageMeta};
use qrb_core::restore::Reconciler;
use qrb_core::sizing::{ErrorCorrection, SymbolSpec};
use qrb_core::symbol::{peek_key, Damage, MemoryChannel, MemorySink};
use qrb_core::{ChunkKey, QrbError};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::Mutex;

fn raw_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen()).collect()
}

fn small_symbol() -> SymbolSpec {
    SymbolSpec { version: 3, ecl: ErrorCorrection::L, scale: 2 }
}

/// Encode, print into memory, scan back through `channel`, restore.
fn through_paper(
    raw: &[u8],
    cfg: &BackupConfig,
    password: Option<&str>,
    channel: &MemoryChannel,
) -> qrb_core::Result<Vec<u8>> {
    let backup = encode(raw, cfg, password)?;
    let mut sink = MemorySink::default();
    render(&backup, channel, &mut sink, &PageMeta::default())?;
    restore(scan(&sink.pages, channel), password)
}

#[test]
fn config_is_validated_before_work() {
    assert!(BackupConfig::default().validate().is_ok());
    assert_eq!(BackupConfig::default().payload_size().unwrap(), 182);

    let tiny = BackupConfig {
        symbol: SymbolSpec { version: 2, ecl: ErrorCorrection::M, scale: 5 },
        ..BackupConfig::default()
    };
    assert!(matches!(encode(b"data", &tiny, None), Err(QrbError::CapacityTooSmall { capacity: 26, .. })));

    for erasure in [Some((0, 2)), Some((200, 100))] {
        let cfg = BackupConfig { erasure, ..BackupConfig::default() };
        assert!(matches!(encode(b"data", &cfg, None), Err(QrbError::InvalidConfig(_))));
    }
    let cfg = BackupConfig { copies: 0, ..BackupConfig::default() };
    assert!(matches!(cfg.validate(), Err(QrbError::InvalidConfig(_))));
}

#[test]
fn roundtrip_matrix() {
    let channel = MemoryChannel::default();
    for len in [0usize, 1, 181, 182, 183, 3000] {
        let raw = raw_bytes(len, len as u64);
        for compress in [false, true] {
            for shuffle in [false, true] {
                for erasure in [Some((8, 2)), Some((3, 0)), None] {
                    let cfg = BackupConfig { compress, shuffle, erasure, ..BackupConfig::default() };
                    let got = through_paper(&raw, &cfg, None, &channel).unwrap();
                    assert_eq!(got, raw, "len {len} compress {compress} shuffle {shuffle} erasure {erasure:?}");
                }
            }
        }
    }
}

#[test]
fn encrypted_roundtrip_with_self_check() {
    let raw = raw_bytes(1500, 21);
    let cfg = BackupConfig::default();
    let backup = encode(&raw, &cfg, Some("paper tiger")).unwrap();
    self_check(&backup, Some("paper tiger"), &raw).unwrap();
    assert!(matches!(
        self_check(&backup, Some("paper lion"), &raw),
        Err(QrbError::SelfCheckFailed(_))
    ));
}

#[test]
fn self_check_catches_wrong_input() {
    let raw = raw_bytes(400, 22);
    let backup = encode(&raw, &BackupConfig::default(), None).unwrap();
    self_check(&backup, None, &raw).unwrap();
    assert!(matches!(self_check(&backup, None, b"other"), Err(QrbError::SelfCheckFailed(_))));
}

#[test]
fn pages_are_labelled() {
    let raw = raw_bytes(20_000, 23);
    let cfg = BackupConfig { compress: false, ..BackupConfig::default() };
    let backup = encode(&raw, &cfg, None).unwrap();
    assert!(backup.plan.pages > 1);

    let meta = PageMeta { title: "tax records".into(), created: "2024-04-15".into() };
    let mut sink = MemorySink::default();
    render(&backup, &MemoryChannel::default(), &mut sink, &meta).unwrap();
    assert_eq!(sink.pages.len() as u32, backup.plan.pages);
    let printed: usize = sink.pages.iter().map(|p| p.symbols.len()).sum();
    assert_eq!(printed, backup.plan.placements.len());
    for (i, page) in sink.pages.iter().enumerate() {
        assert_eq!(page.label.page, i as u32 + 1);
        assert_eq!(page.label.pages, backup.plan.pages);
        assert_eq!(page.label.backup_id, backup.short_id());
        let caption = page.label.caption();
        assert!(caption.starts_with(&format!("Page {}/{}", i + 1, backup.plan.pages)));
        assert!(caption.contains("tax records") && caption.contains("2024-04-15"));
        assert!(page.symbols.len() <= 48);
    }
    assert_eq!(backup.printed().count(), backup.plan.placements.len());
}

#[test]
fn hundred_zero_bytes_survive_two_losses_per_group() {
    let raw = vec![0u8; 100];
    let cfg = BackupConfig {
        symbol: small_symbol(),
        erasure: Some((3, 2)),
        compress: false,
        shuffle: true,
        ..BackupConfig::default()
    };
    let backup = encode(&raw, &cfg, None).unwrap();
    // 142 framed bytes in 22-byte payloads: 7 data chunks in groups of 3, 3, 1.
    assert_eq!(backup.chunks.len(), 13);

    let lost: HashSet<ChunkKey> = [(0, 0), (0, 4), (1, 1), (1, 2), (2, 0), (2, 1)]
        .into_iter()
        .map(|(group_id, index)| ChunkKey { group_id, index })
        .collect();
    let channel = MemoryChannel::with_damage(move |_, sym| match peek_key(&sym.bytes) {
        Some(k) if lost.contains(&k) => Damage::Lost,
        _ => Damage::Intact,
    });
    assert_eq!(through_paper(&raw, &cfg, None, &channel).unwrap(), raw);

    let channel = MemoryChannel::with_damage(|_, sym| match peek_key(&sym.bytes) {
        Some(k) if k.group_id == 0 && k.index < 3 => Damage::Lost,
        _ => Damage::Intact,
    });
    assert!(matches!(
        through_paper(&raw, &cfg, None, &channel),
        Err(QrbError::IncompleteGroup { group_id: 0, available: 2, required: 3 })
    ));
}

#[test]
fn flipped_bits_are_dropped_and_repaired() {
    let raw = raw_bytes(2500, 24);
    let cfg = BackupConfig { compress: false, ..BackupConfig::default() };
    let backup = encode(&raw, &cfg, None).unwrap();
    let groups = backup.chunks.iter().map(|c| c.group_id).max().unwrap() as usize + 1;

    let channel = MemoryChannel::with_damage(|page, sym| match peek_key(&sym.bytes) {
        Some(k) if k.index == 1 => Damage::FlipBit(page as usize * 131 + 7),
        Some(k) if k.index == 2 => Damage::Unreadable,
        _ => Damage::Intact,
    })
    .reversed();
    let mut sink = MemorySink::default();
    render(&backup, &channel, &mut sink, &PageMeta::default()).unwrap();
    let mut r = Reconciler::new();
    let report = r.ingest_all(scan(&sink.pages, &channel)).clone();
    assert_eq!(report.malformed, groups);
    assert_eq!(report.unreadable, groups);
    assert_eq!(r.finish(None).unwrap(), raw);
}

#[test]
fn second_copy_covers_a_lost_first_copy() {
    let raw = raw_bytes(1000, 25);
    let cfg = BackupConfig { erasure: None, copies: 2, compress: false, ..BackupConfig::default() };
    let seen: Mutex<HashSet<ChunkKey>> = Mutex::new(HashSet::new());
    let channel = MemoryChannel::with_damage(move |_, sym| {
        let key = peek_key(&sym.bytes).unwrap();
        if seen.lock().unwrap().insert(key) {
            Damage::Lost
        } else {
            Damage::Intact
        }
    });
    assert_eq!(through_paper(&raw, &cfg, None, &channel).unwrap(), raw);
}

#[test]
fn encoding_without_password_is_deterministic() {
    let raw = raw_bytes(5000, 26);
    let cfg = BackupConfig::default();
    let a = encode(&raw, &cfg, None).unwrap();
    let b = encode(&raw, &cfg, None).unwrap();
    assert_eq!(a.header, b.header);
    assert_eq!(a.chunks, b.chunks);
    assert_eq!(a.plan, b.plan);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn any_input_any_shape_roundtrips(
        raw in proptest::collection::vec(any::<u8>(), 0..1500),
        k in 1usize..12,
        m in 0usize..4,
        shuffle in any::<bool>(),
        compress in any::<bool>(),
    ) {
        let cfg = BackupConfig {
            symbol: small_symbol(),
            erasure: Some((k, m)),
            shuffle,
            compress,
            ..BackupConfig::default()
        };
        let got = through_paper(&raw, &cfg, None, &MemoryChannel::default()).unwrap();
        prop_assert_eq!(got, raw);
    }
}
