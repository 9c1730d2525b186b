use bevy_math::ivec2;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use grid_nav::{
    AStarPathfinder, CellState, FlowFieldGenerator, GridBuffer, HpaConfig, HpaPathfinder,
    SearchConfig, ThetaStarPathfinder,
};

/// A 256x256 grid with a deterministic scattering of obstacle blocks.
fn fixture_grid(size: u32) -> GridBuffer {
    let mut buffer = GridBuffer::filled(size, size, CellState::Walkable).unwrap();
    let mut state: u64 = 0x9e3779b97f4a7c15;
    for y in 0..size as i32 {
        for x in 0..size as i32 {
            // Cheap xorshift keeps the fixture reproducible without seeding
            // a global generator.
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            if state % 100 < 18 {
                buffer.set(ivec2(x, y), CellState::Obstacle);
            }
        }
    }
    buffer.set(ivec2(2, 2), CellState::Walkable);
    buffer.set(ivec2(size as i32 - 3, size as i32 - 3), CellState::Walkable);
    buffer
}

fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("pathfinding");
    group.sample_size(50);

    let size = 256;
    let buffer = fixture_grid(size);
    let start = ivec2(2, 2);
    let goal = ivec2(size as i32 - 3, size as i32 - 3);
    let no_cache = SearchConfig {
        enable_caching: false,
        ..SearchConfig::default()
    };

    group.bench_function("astar_find_path", |b| {
        let mut pathfinder = AStarPathfinder::with_config(no_cache.clone()).unwrap();
        b.iter(|| {
            let result =
                pathfinder.find_path(&buffer.view(), black_box(start), black_box(goal));
            black_box(result);
        });
    });

    group.bench_function("theta_star_find_path", |b| {
        let mut pathfinder = ThetaStarPathfinder::with_config(no_cache.clone()).unwrap();
        b.iter(|| {
            let result =
                pathfinder.find_path(&buffer.view(), black_box(start), black_box(goal));
            black_box(result);
        });
    });

    group.bench_function("hpa_find_path_prebuilt", |b| {
        let mut pathfinder = HpaPathfinder::with_config(HpaConfig {
            cluster_size: 16,
            search: no_cache.clone(),
            ..HpaConfig::default()
        })
        .unwrap();
        pathfinder.build(&buffer.view());
        b.iter(|| {
            let result =
                pathfinder.find_path(&buffer.view(), black_box(start), black_box(goal));
            black_box(result);
        });
    });

    group.bench_function("flow_field_generate", |b| {
        let mut generator = FlowFieldGenerator::new();
        b.iter(|| {
            generator.clear_cache();
            let field = generator.generate(&buffer.view(), black_box(&[goal]));
            black_box(field);
        });
    });

    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
