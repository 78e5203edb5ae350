use criterion::{black_box, criterion_group, criterion_main, Criterion};
use linestream::lookup::LookupTable;
use linestream::tiler::{TileLayout, TiledMesh};
use linestream::StreamConfig;

fn bench_mesh(c: &mut Criterion) {
    // Default stream: 8192 wide, one row per tile.
    let layout = TileLayout::solve(8192, 400, 65000);
    c.bench_function("tiled_mesh_8192x1", |b| b.iter(|| TiledMesh::build(black_box(&layout))));

    let wide = TileLayout::solve(256, 4096, 1 << 20);
    c.bench_function("tiled_mesh_256x1024_u32", |b| b.iter(|| TiledMesh::build(black_box(&wide))));
}

fn bench_lookup(c: &mut Criterion) {
    let config = StreamConfig::default();
    c.bench_function("color_lookup_1024", |b| {
        b.iter(|| LookupTable::resample(black_box(1024), |t| config.color_over_life.evaluate(t)))
    });
}

criterion_group!(benches, bench_mesh, bench_lookup);
criterion_main!(benches);
