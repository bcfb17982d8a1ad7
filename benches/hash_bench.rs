use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hdiff::archive::ArchiveBuilder;
use hdiff::hash::{fast_checksum, strong_hash};
use hdiff::perf::hash_chunks;
use hdiff::recovery::{inject, rebuild, scan, CorruptionMode};

fn bench_hashes(c: &mut Criterion) {
    let data = vec![0x5Au8; 1024 * 1024];

    c.bench_function("strong_hash_1mb", |b| b.iter(|| strong_hash(black_box(&data))));
    c.bench_function("fast_checksum_1mb", |b| b.iter(|| fast_checksum(black_box(&data))));

    let chunks: Vec<&[u8]> = data.chunks(64 * 1024).collect();
    c.bench_function("hash_chunks_16x64k", |b| b.iter(|| hash_chunks(black_box(&chunks))));
}

fn bench_recovery(c: &mut Criterion) {
    let data: Vec<u8> = (0..1024 * 1024u32).map(|i| (i % 251) as u8).collect();
    let archive = ArchiveBuilder::new().chunk_size(16 * 1024).push(&data).finish();

    c.bench_function("scan_1mb_archive", |b| b.iter(|| scan(black_box(&archive))));

    let damaged = inject(&archive, CorruptionMode::IndexTruncate, 1);
    c.bench_function("rebuild_1mb_archive", |b| b.iter(|| rebuild(black_box(&damaged))));
}

criterion_group!(benches, bench_hashes, bench_recovery);
criterion_main!(benches);
