//! Benchmarks for blitting and concatenated frame lookup.
//!
//! Run with: cargo bench --bench compose

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use clip_compositor::{
    composition::blit, video::Channel, CompositeVideoClip, Clip, ConcatMethod, Frame,
};

fn bench_blit(c: &mut Criterion) {
    let canvas = Frame::new_black(1280, 720);
    let tile = Frame::new_filled(320, 240, [200, 40, 40]);
    let mask = Frame::new_mask(320, 240, 0.5);

    c.bench_function("blit_opaque_320x240", |bencher| {
        bencher.iter(|| blit(black_box(&tile), black_box(&canvas), (100, 100), None));
    });

    c.bench_function("blit_masked_320x240", |bencher| {
        bencher.iter(|| blit(black_box(&tile), black_box(&canvas), (100, 100), Some(&mask)));
    });

    c.bench_function("blit_clipped_edge", |bencher| {
        bencher.iter(|| blit(black_box(&tile), black_box(&canvas), (1100, -100), Some(&mask)));
    });
}

fn bench_concatenate_lookup(c: &mut Criterion) {
    let clips: Vec<Clip> = (0..200)
        .map(|i| Clip::color((64, 36), [i as u8, 0, 0]).with_duration(0.5))
        .collect();
    let chained = clip_compositor::concatenate(&clips, ConcatMethod::Chain).unwrap();
    let composed = clip_compositor::concatenate(&clips, ConcatMethod::Compose).unwrap();

    c.bench_function("concatenate_chain_get_frame", |bencher| {
        bencher.iter(|| chained.get_frame(black_box(73.25)).unwrap());
    });

    c.bench_function("concatenate_compose_get_frame", |bencher| {
        bencher.iter(|| composed.get_frame(black_box(73.25)).unwrap());
    });
}

fn bench_composite(c: &mut Criterion) {
    let background = Clip::color((640, 360), [0, 0, 80]).with_duration(2.0);
    let mask = Clip::color((160, 90), [128, 0, 0]).to_mask(Channel::Red);
    let overlay = Clip::color((160, 90), [255, 255, 0])
        .with_duration(2.0)
        .with_mask(mask)
        .unwrap()
        .with_position((40, 30), false);
    let composite = CompositeVideoClip::new(vec![background, overlay]).build().unwrap();

    c.bench_function("composite_two_layers", |bencher| {
        bencher.iter(|| composite.get_frame(black_box(1.0)).unwrap());
    });
}

criterion_group!(benches, bench_blit, bench_concatenate_lookup, bench_composite);
criterion_main!(benches);
