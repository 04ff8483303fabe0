//! Benchmarks for tsproj-core: declaration map decoding and lookup.
//!
//! Performance targets:
//! - Decoding a 2,000-line map: < 1ms
//! - Position lookup: < 1μs (hot path for every redirected location)

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::path::Path;
use tower_lsp_server::ls_types::Position;
use tsproj_core::DeclarationMap;
use tsproj_core::declaration_map::encode_vlq;

/// Builds a map with `lines` generated lines of four segments each.
fn generate_map(lines: usize) -> String {
    let mut mappings = String::new();
    for line in 0..lines {
        if line > 0 {
            mappings.push(';');
        }
        // First segment of each line carries the line delta; columns restart.
        encode_vlq(0, &mut mappings);
        encode_vlq(0, &mut mappings);
        encode_vlq(i64::from(line > 0), &mut mappings);
        encode_vlq(if line > 0 { -30 } else { 0 }, &mut mappings);
        for _ in 0..3 {
            mappings.push(',');
            encode_vlq(10, &mut mappings);
            encode_vlq(0, &mut mappings);
            encode_vlq(0, &mut mappings);
            encode_vlq(10, &mut mappings);
        }
    }
    format!(r#"{{"version":3,"sources":["../src/index.ts"],"names":[],"mappings":"{mappings}"}}"#)
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("declaration_map_decode");

    for lines in [100, 2_000] {
        let text = generate_map(lines);
        group.bench_with_input(BenchmarkId::from_parameter(lines), &text, |b, text| {
            b.iter(|| {
                DeclarationMap::parse(
                    Path::new("/repo/a/bin/index.d.ts.map"),
                    Path::new("/repo/a/bin/index.d.ts"),
                    black_box(text),
                )
            })
        });
    }

    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("declaration_map_lookup");

    let text = generate_map(2_000);
    let Ok(map) = DeclarationMap::parse(
        Path::new("/repo/a/bin/index.d.ts.map"),
        Path::new("/repo/a/bin/index.d.ts"),
        &text,
    ) else {
        return;
    };

    group.bench_function("exact_segment", |b| {
        b.iter(|| map.original_position(black_box(Position::new(1_000, 20))))
    });

    group.bench_function("between_segments", |b| {
        b.iter(|| map.original_position(black_box(Position::new(1_500, 25))))
    });

    group.bench_function("missing_line", |b| {
        b.iter(|| map.original_position(black_box(Position::new(10_000, 0))))
    });

    group.finish();
}

criterion_group!(benches, bench_decode, bench_lookup);
criterion_main!(benches);
