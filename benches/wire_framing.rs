//! Wire framing benchmarks.
//!
//! Measures the cost of the hot encode/decode paths that run on every
//! command: the AVC420 metablock, the AVC444v2 header, and command
//! header parsing across a realistic mix of rect-list sizes.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use xrdp_gfx_encoder::rect::Rect;
use xrdp_gfx_encoder::wire::{decode_avc420_metablock, encode_avc420_metablock, Avc420QuantQuality, CmdHeader, LumaChroma};

fn rects(n: usize) -> Vec<Rect> {
    (0..n)
        .map(|i| {
            let x = (i as i16 % 16) * 64;
            let y = (i as i16 / 16) * 64;
            Rect::new(x, y, 64, 64)
        })
        .collect()
}

fn bench_metablock_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("avc420_metablock_encode");
    let quant = Avc420QuantQuality::DEFAULT;

    for n in [1usize, 8, 15] {
        let dirty = rects(n);
        group.bench_function(BenchmarkId::new("rects", n), |b| {
            b.iter(|| {
                let mut out = Vec::new();
                encode_avc420_metablock(black_box(&dirty), quant, &mut out);
                black_box(out)
            })
        });
    }
    group.finish();
}

fn bench_metablock_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("avc420_metablock_decode");
    let quant = Avc420QuantQuality::DEFAULT;

    for n in [1usize, 8, 15] {
        let dirty = rects(n);
        let mut encoded = Vec::new();
        encode_avc420_metablock(&dirty, quant, &mut encoded);
        group.bench_function(BenchmarkId::new("rects", n), |b| {
            b.iter(|| black_box(decode_avc420_metablock(black_box(&encoded)).unwrap()))
        });
    }
    group.finish();
}

fn bench_cmd_header_round_trip(c: &mut Criterion) {
    c.bench_function("cmd_header_encode_decode", |b| {
        let header = CmdHeader {
            cmd_id: 0x0001,
            flags: 0,
            cmd_bytes: 4096,
        };
        b.iter(|| {
            let mut buf = Vec::new();
            header.encode(&mut buf);
            black_box(CmdHeader::decode(black_box(&buf)).unwrap())
        })
    });
}

fn bench_avc444v2_header(c: &mut Criterion) {
    c.bench_function("avc444v2_header_encode_decode", |b| {
        b.iter(|| {
            let word = xrdp_gfx_encoder::wire::encode_avc444v2_header(black_box(65_536), LumaChroma::BothPresent).unwrap();
            black_box(xrdp_gfx_encoder::wire::decode_avc444v2_header(black_box(word)).unwrap())
        })
    });
}

criterion_group!(
    benches,
    bench_metablock_encode,
    bench_metablock_decode,
    bench_cmd_header_round_trip,
    bench_avc444v2_header,
);
criterion_main!(benches);
