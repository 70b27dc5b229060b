use corruption_sim::{
    add_progress, build_headless_app, load_region, run_tick, BlockPos, GridWorld,
    ProgressCategory, RegionKey, Viewer,
};
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};

const LATE_GAME_PROGRESS: i64 = 80_000;

fn populated_app(viewers: u32) -> bevy::prelude::App {
    let mut app = build_headless_app();
    run_tick(&mut app);
    let side = (viewers as f64).sqrt().ceil() as i32;
    for index in 0..viewers as i32 {
        let center = RegionKey::new((index % side) * 6, (index / side) * 6);
        for dx in -2..=2 {
            for dz in -2..=2 {
                load_region(&mut app, center.offset(dx, dz));
            }
        }
        app.world.resource_mut::<GridWorld>().add_viewer(Viewer {
            id: index as u64 + 1,
            position: BlockPos::new(center.min_block_x() + 8, 70, center.min_block_z() + 8),
        });
    }
    add_progress(&mut app, ProgressCategory::Construction, LATE_GAME_PROGRESS);
    // let seeding and the first spread settle before measuring
    for _ in 0..40 {
        run_tick(&mut app);
    }
    app
}

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");

    for viewers in [1u32, 4, 16, 64] {
        group.bench_with_input(BenchmarkId::new("viewers", viewers), &viewers, |b, &viewers| {
            b.iter_batched(
                || populated_app(viewers),
                |mut app| {
                    for _ in 0..20 {
                        run_tick(&mut app);
                    }
                },
                BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

criterion_group!(tick_benches, bench_tick);
criterion_main!(tick_benches);
