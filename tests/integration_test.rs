use hdiff::archive::{decode, minimal_archive, ArchiveBuilder, GoldenVector, MIN_ARCHIVE_SIZE};
use hdiff::footer::FOOTER_SIZE;
use hdiff::hash::{fast_checksum, to_hex};
use hdiff::header::{read_field, HEADER_SIZE, OFF_INDEX_LENGTH};
use hdiff::index::ENTRY_SIZE;
use hdiff::recovery::{inject, rebuild, scan, scan_file, CorruptionMode, ErrorCode, Hole, Provenance, RebuildResult};
use std::io::Write;
use tempfile::NamedTempFile;

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 253) as u8).collect()
}

#[test]
fn test_roundtrip_index_sizes() {
    // 0, 1 and many index entries.
    for (data, chunk) in [(Vec::new(), 64), (payload(10), 64), (payload(1000), 64)] {
        let bytes = ArchiveBuilder::new().chunk_size(chunk).push(&data).finish();
        let ar = decode(&bytes).unwrap();
        let expected_entries = data.len().div_ceil(chunk) as u64;
        assert_eq!(ar.header.index_length, expected_entries * ENTRY_SIZE as u64);
        assert_eq!(ar.header.index_offset, HEADER_SIZE as u64);
        assert_eq!(ar.header.data_offset, HEADER_SIZE as u64 + ar.header.index_length);
        assert_eq!(ar.data, &data[..]);
        assert_eq!(bytes.len(), MIN_ARCHIVE_SIZE + ar.index.len() + data.len());

        let chunk_sum: u64 = ar.entries().map(|e| e.chunk_length() as u64).sum();
        assert_eq!(chunk_sum, data.len() as u64);
        assert!(ar.entries().all(|e| e.is_plausible()));

        let rep = scan(&bytes);
        assert!(rep.ok, "{}", rep.summary());
        assert_eq!(rep.recoverable_pct, 100.0);
        assert!(rep.lost_regions.is_empty());
    }
}

#[test]
fn test_scan_reports_digests() {
    let bytes = minimal_archive();
    let rep = scan(&bytes);
    assert!(rep.ok);
    assert_eq!(rep.checks.index_ok, Some(true));
    assert_eq!(rep.checks.strong_ok, Some(true));
    assert_eq!(rep.checks.index_xxh64_expected_hex, rep.checks.index_xxh64_actual_hex);

    let pre = &bytes[..bytes.len() - FOOTER_SIZE];
    let oracle = blake3::hash(pre);
    assert_eq!(rep.checks.blake3_expected_hex.as_deref(), Some(oracle.to_hex().as_str()));
}

#[test]
fn test_scan_is_read_only_and_deterministic() {
    let bytes = inject(&minimal_archive(), CorruptionMode::BitFlip, 77);
    let copy = bytes.clone();
    assert_eq!(scan(&bytes), scan(&bytes));
    assert_eq!(bytes, copy);
}

#[test]
fn test_truncated_archive_hole() {
    let bytes = minimal_archive();
    let rep = scan(&bytes[..100]);
    assert!(!rep.ok);
    assert!(!rep.footer_present);
    assert!(rep.has_error(ErrorCode::Bounds));
    assert_eq!(rep.recoverable_bytes, 10);
    assert_eq!(rep.recoverable_pct, 43.48);
    assert_eq!(rep.lost_regions.len(), 1);
    assert_eq!((rep.lost_regions[0].start, rep.lost_regions[0].end), (100, 113));
}

#[test]
fn test_scan_error_codes() {
    let base = minimal_archive();

    let mut bad = base.clone();
    bad[..4].copy_from_slice(b"XXXX");
    let rep = scan(&bad);
    assert!(!rep.magic_ok);
    assert!(rep.header.is_none());
    assert_eq!(rep.errors.len(), 1);
    assert!(rep.has_error(ErrorCode::MagicMismatch));

    let mut bad = base.clone();
    bad[HEADER_SIZE + 3] ^= 0xFF;
    let rep = scan(&bad);
    assert!(rep.has_error(ErrorCode::IndexChecksum));
    assert!(rep.has_error(ErrorCode::StrongHash));
    assert_eq!(rep.checks.index_ok, Some(false));

    let mut bad = base.clone();
    let at = base.len() - FOOTER_SIZE + 5;
    bad[at] ^= 0x01;
    let rep = scan(&bad);
    assert!(rep.has_error(ErrorCode::StrongHash));
    assert!(!rep.has_error(ErrorCode::IndexChecksum));

    let mut bad = base.clone();
    bad[OFF_INDEX_LENGTH..OFF_INDEX_LENGTH + 8].copy_from_slice(&4000u64.to_le_bytes());
    let rep = scan(&bad);
    assert!(rep.has_error(ErrorCode::Bounds));
    assert!(rep.header.as_ref().unwrap().suspect);
    assert_eq!(rep.checks.index_ok, None);
}

#[test]
fn test_report_json_shape() {
    let rep = scan(&minimal_archive()[..100]);
    let v = serde_json::to_value(&rep).unwrap();
    assert_eq!(v["ok"], false);
    assert_eq!(v["errors"][0]["code"], "E1002");
    assert_eq!(v["lost_regions"][0]["reason"], "missing_bytes");
    assert_eq!(v["header"]["index_offset"], 64);
}

#[test]
fn test_scan_file() {
    let mut f = NamedTempFile::new().unwrap();
    f.write_all(&minimal_archive()).unwrap();
    assert!(scan_file(f.path()).unwrap().ok);
}

#[test]
fn test_rebuild_recovers_every_damage_mode() {
    let multi = ArchiveBuilder::new().chunk_size(32).push(&payload(300)).finish();
    for (name, base) in [("minimal", minimal_archive()), ("multi", multi)] {
        for i in 0..100u32 {
            let mode = CorruptionMode::RECOVERABLE[i as usize % CorruptionMode::RECOVERABLE.len()];
            let seed = 1000 + i;
            let bad  = inject(&base, mode, seed);
            let result = rebuild(&bad);
            assert!(result.ok(), "{name} {mode} seed {seed}");
            let recovered = result.recovered_scan().unwrap();
            assert!(recovered.ok, "{name} {mode} seed {seed}: {}", recovered.summary());
            assert!(decode(result.archive().unwrap()).is_ok(), "{name} {mode} seed {seed}");
        }
    }
}

#[test]
fn test_rebuild_refuses_bad_magic() {
    let bad = inject(&minimal_archive(), CorruptionMode::MagicFlip, 1);
    let result = rebuild(&bad);
    assert!(matches!(result, RebuildResult::Refused { reason: ErrorCode::MagicMismatch, .. }));
    assert!(result.archive().is_none());
    assert!(!result.original_scan().magic_ok);
}

#[test]
fn test_rebuild_inferred_header() {
    let base = ArchiveBuilder::new().chunk_size(16).push(&payload(64)).finish();
    let bad  = inject(&base, CorruptionMode::IndexTruncate, 1);
    assert_eq!(read_field(&bad, OFF_INDEX_LENGTH), Some(3 * ENTRY_SIZE as u64));

    let RebuildResult::Rebuilt(r) = rebuild(&bad) else { panic!("refused") };
    assert_eq!(r.actions.header, Provenance::Inferred);
    assert!(r.actions.header_inferred);
    assert_eq!(r.actions.index_len, 4 * ENTRY_SIZE as u64);
    assert_eq!(r.actions.data_len, 64);
    assert_eq!(r.archive, base);
}

#[test]
fn test_rebuild_after_truncation() {
    let base = minimal_archive();
    let RebuildResult::Rebuilt(r) = rebuild(&base[..100]) else { panic!("refused") };
    assert!(!r.actions.footer_present_in_input);
    assert!(r.recovered_scan.ok);
    assert_eq!(r.archive.len(), 100 + FOOTER_SIZE);
    assert_eq!(&r.archive[..4], b"HAJI");
}

#[test]
fn test_golden_vector() {
    let bytes = minimal_archive();
    let g = GoldenVector::of(&bytes).unwrap();
    assert_eq!(g.file_size, 161);
    assert_eq!(g.hash_algo, "blake3-256");
    assert_eq!(g.strong_hash_hex, blake3::hash(&bytes[..113]).to_hex().to_string());
    assert_eq!(g.index_xxh64_hex, to_hex(&fast_checksum(&bytes[64..90])));
    assert_eq!(g.layout.index_count, 1);
    assert_eq!(g.layout.data_length, 23);
}

#[test]
fn test_hole_json_omits_missing_reason() {
    let v = serde_json::to_value(Hole::new(1, 2, None)).unwrap();
    assert!(v.get("reason").is_none());
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn scan_and_decode_never_panic(buf in proptest::collection::vec(any::<u8>(), 0..400)) {
            let rep = scan(&buf);
            prop_assert_eq!(rep.bytes, buf.len() as u64);
            let _ = decode(&buf);
        }

        #[test]
        fn rebuild_of_any_haji_buffer_is_consistent(tail in proptest::collection::vec(any::<u8>(), 0..400)) {
            let mut buf = b"HAJI".to_vec();
            buf.extend_from_slice(&tail);
            let result = rebuild(&buf);
            prop_assert!(result.ok());
            prop_assert!(result.recovered_scan().unwrap().ok);
        }
    }
}
