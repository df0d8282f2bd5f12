//! Benchmarks for the software rasterizer and vertex conversion

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use vh_gpu::regs::{AlphaMode, FbzMode, FogMode, TextureMode};
use vh_gpu::vertex::{convert_batch, MAX_BATCH_TRIANGLES};
use vh_gpu::{GpuVertex, Rasterizer, Triangle, Vertex};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;

/// Grid of small Gouraud triangles covering the frame
fn triangle_grid(count: usize) -> Vec<Triangle> {
    let cols = 32;
    let cell_w = WIDTH as f32 / cols as f32;
    let cell_h = HEIGHT as f32 / (count / cols).max(1) as f32;
    (0..count)
        .map(|i| {
            let x = (i % cols) as f32 * cell_w;
            let y = (i / cols) as f32 * cell_h;
            Triangle::new(
                Vertex::new(x, y, 0.25, [1.0, 0.0, 0.0, 1.0]).with_tex(0.0, 0.0),
                Vertex::new(x + cell_w, y, 0.5, [0.0, 1.0, 0.0, 0.5]).with_tex(1.0, 0.0),
                Vertex::new(x, y + cell_h, 0.75, [0.0, 0.0, 1.0, 1.0]).with_tex(0.0, 1.0),
            )
        })
        .collect()
}

fn checkerboard(size: u32) -> Vec<u8> {
    (0..size * size)
        .flat_map(|i| {
            let on = ((i % size) / 4 + (i / size) / 4) % 2 == 0;
            if on {
                [255, 255, 255, 255]
            } else {
                [32, 32, 32, 255]
            }
        })
        .collect()
}

fn bench_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("flush_triangles");

    for count in [64usize, 512, MAX_BATCH_TRIANGLES] {
        let batch = triangle_grid(count);
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("gouraud", count), &batch, |b, batch| {
            let mut raster = Rasterizer::new();
            raster.init(WIDTH, HEIGHT);
            b.iter(|| {
                raster.clear(0xFF000000);
                raster.flush_triangles(black_box(batch));
            })
        });

        group.bench_with_input(BenchmarkId::new("full_pipeline", count), &batch, |b, batch| {
            let mut raster = Rasterizer::new();
            raster.init(WIDTH, HEIGHT);
            raster.set_texture(&checkerboard(64), 64, 64).unwrap();
            raster.set_texture_mode((TextureMode::ENABLE | TextureMode::MAGNIFY).bits());
            raster.set_fog_mode(FogMode::ENABLE.bits());
            raster.set_fog(0x00808080, 0.2, 0.9);
            raster.update_pipeline_state(
                FbzMode::DEFAULT_BITS | FbzMode::DITHER.bits(),
                AlphaMode::BLEND_ENABLE.bits() | 1 << 8 | 5 << 12,
            );
            b.iter(|| {
                raster.clear(0xFF000000);
                raster.flush_triangles(black_box(batch));
            })
        });
    }

    group.finish();
}

fn bench_clear_swap(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame");
    let mut raster = Rasterizer::new();
    raster.init(WIDTH, HEIGHT);

    group.bench_function("clear", |b| b.iter(|| raster.clear(black_box(0xFF336699))));
    group.bench_function("swap", |b| b.iter(|| raster.swap()));

    group.finish();
}

fn bench_convert_batch(c: &mut Criterion) {
    let batch = triangle_grid(MAX_BATCH_TRIANGLES);
    let mut out: Vec<GpuVertex> = Vec::new();

    let mut group = c.benchmark_group("vertex_conversion");
    group.throughput(Throughput::Elements(batch.len() as u64 * 3));
    group.bench_function("convert_batch", |b| {
        b.iter(|| {
            convert_batch(black_box(&batch), WIDTH, HEIGHT, &mut out);
            black_box(out.len())
        })
    });
    group.finish();
}

criterion_group!(benches, bench_flush, bench_clear_swap, bench_convert_batch);
criterion_main!(benches);
