//! Benchmarks for material mapping, quality analysis and statistics.
//!
//! Run with: cargo bench -p spine-fem
//!
//! To compare against baseline:
//! 1. First run: cargo bench -p spine-fem -- --save-baseline main
//! 2. After changes: cargo bench -p spine-fem -- --baseline main

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use nalgebra::{Affine3, Point3, Vector3};
use spine_fem::{
    Calibration, Interpolation, MaterialParams, Mesh, QualityMetric, QualityParams,
    SamplingParams, StatisticsParams, VoxelVolume, compute_material_fields,
    compute_quality_fields, compute_statistics,
};

// =============================================================================
// Test Data Generation
// =============================================================================

/// Structured grid of `n^3` cubes of side `h`, each split into 6 tetrahedra.
fn create_tet_grid(n: usize, h: f64) -> Mesh {
    let stride = n + 1;
    let node = |x: usize, y: usize, z: usize| (x + y * stride + z * stride * stride) as u32;

    let mut nodes = Vec::with_capacity(stride * stride * stride);
    for z in 0..stride {
        for y in 0..stride {
            for x in 0..stride {
                nodes.push(Point3::new(x as f64 * h, y as f64 * h, z as f64 * h));
            }
        }
    }

    let mut cells = Vec::with_capacity(n * n * n * 6);
    for z in 0..n {
        for y in 0..n {
            for x in 0..n {
                let c = [
                    node(x, y, z),
                    node(x + 1, y, z),
                    node(x + 1, y + 1, z),
                    node(x, y + 1, z),
                    node(x, y, z + 1),
                    node(x + 1, y, z + 1),
                    node(x + 1, y + 1, z + 1),
                    node(x, y + 1, z + 1),
                ];
                for [a, b] in [[1, 2], [2, 3], [3, 7], [7, 4], [4, 5], [5, 1]] {
                    cells.push(vec![c[0], c[a], c[b], c[6]]);
                }
            }
        }
    }

    Mesh::from_connectivity(nodes, &cells).unwrap()
}

/// A 64^3 phantom with a dense spherical core.
fn create_phantom() -> VoxelVolume {
    VoxelVolume::from_fn(
        [64, 64, 64],
        Point3::origin(),
        Vector3::new(0.5, 0.5, 0.5),
        |p| {
            let r = (p - Point3::new(16.0, 16.0, 16.0)).norm();
            if r < 10.0 { 900.0 } else { 150.0 }
        },
    )
    .unwrap()
}

// =============================================================================
// Material Mapping Benchmarks
// =============================================================================

fn bench_material(c: &mut Criterion) {
    let mut group = c.benchmark_group("Material");
    let calibration = Calibration::new(0.7, 5.1).unwrap();
    let phantom = create_phantom();

    let test_cases = [
        ("grid_750tet", create_tet_grid(5, 6.0)),
        ("grid_6000tet", create_tet_grid(10, 3.0)),
        ("grid_48000tet", create_tet_grid(20, 1.5)),
    ];

    let modes = [
        ("nearest", Interpolation::Nearest, SamplingParams::default()),
        ("trilinear", Interpolation::Trilinear, SamplingParams::default()),
        (
            "neighborhood_centroid",
            Interpolation::NeighborhoodMean { radius: 2 },
            SamplingParams::centroid_only(),
        ),
    ];

    for (name, mesh) in &test_cases {
        group.throughput(Throughput::Elements(mesh.element_count() as u64));

        for (mode, interpolation, sampling) in &modes {
            let image = phantom.clone().with_interpolation(*interpolation);
            let params = MaterialParams::default().with_sampling(sampling.clone());
            group.bench_with_input(BenchmarkId::new(*mode, name), mesh, |b, mesh| {
                b.iter(|| {
                    compute_material_fields(
                        black_box(mesh),
                        &image,
                        &Affine3::identity(),
                        &calibration,
                        &params,
                    )
                })
            });
        }
    }

    group.finish();
}

// =============================================================================
// Quality Benchmarks
// =============================================================================

fn bench_quality(c: &mut Criterion) {
    let mut group = c.benchmark_group("Quality");
    let params = QualityParams::default();

    let test_cases = [
        ("grid_750tet", create_tet_grid(5, 1.0)),
        ("grid_48000tet", create_tet_grid(20, 1.0)),
    ];

    for (name, mesh) in &test_cases {
        group.throughput(Throughput::Elements(mesh.element_count() as u64));

        group.bench_with_input(BenchmarkId::new("all_metrics", name), mesh, |b, mesh| {
            b.iter(|| compute_quality_fields(black_box(mesh), &QualityMetric::ALL, &params))
        });

        group.bench_with_input(BenchmarkId::new("aspect_ratio", name), mesh, |b, mesh| {
            b.iter(|| {
                compute_quality_fields(black_box(mesh), &[QualityMetric::AspectRatio], &params)
            })
        });
    }

    group.finish();
}

// =============================================================================
// Statistics Benchmarks
// =============================================================================

fn bench_statistics(c: &mut Criterion) {
    let mut group = c.benchmark_group("Statistics");
    let params = StatisticsParams::default();

    for n in [1_000usize, 100_000, 1_000_000] {
        let values: Vec<f64> = (0..n)
            .map(|i| if i % 97 == 0 { f64::NAN } else { (i as f64).sin() * 500.0 })
            .collect();
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("summary", n), &values, |b, values| {
            b.iter(|| compute_statistics(black_box(values), &params))
        });
    }

    group.finish();
}

// =============================================================================
// Criterion Setup
// =============================================================================

criterion_group!(benches, bench_material, bench_quality, bench_statistics);

criterion_main!(benches);
