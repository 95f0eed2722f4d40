//! Render state cache benchmarks: snapshot diffing and flushing a pass worth
//! of alternating pipeline states.

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};

use myth_device::state::{DirtyStates, RenderStates, StateBits, StateTracker};

fn variants() -> Vec<RenderStates> {
    (0..8)
        .map(|i| {
            let mut s = RenderStates::default();
            s.depth_enabled = i % 2 == 0;
            s.cull_enabled = i % 3 == 0;
            s.blend_enabled = i % 4 == 0;
            s.depth_compare = if i % 2 == 0 {
                wgpu::CompareFunction::Less
            } else {
                wgpu::CompareFunction::Always
            };
            s
        })
        .collect()
}

fn bench_diff(c: &mut Criterion) {
    let a = RenderStates::default();
    let mut b = RenderStates::default();
    b.depth_enabled = true;
    b.blend_color = [0.5; 4];
    b.targets[1].color_mask = wgpu::ColorWrites::RED;

    c.bench_function("render_states_diff", |bench| {
        bench.iter(|| black_box(&a).diff(black_box(&b)));
    });
}

fn bench_flush(c: &mut Criterion) {
    let states = variants();
    let mask = DirtyStates::from_bits(StateBits::PIPELINE_CONTROLLED);

    c.bench_function("tracker_1000_draws", |bench| {
        let mut tracker = StateTracker::new();
        let mut out = Vec::with_capacity(64);
        bench.iter(|| {
            tracker.begin_pass();
            for i in 0..1000 {
                tracker.merge_pipeline(&states[i % states.len()], &mask);
                out.clear();
                tracker.flush_into(&mut out);
                black_box(out.len());
            }
        });
    });
}

criterion_group!(benches, bench_diff, bench_flush);
criterion_main!(benches);
