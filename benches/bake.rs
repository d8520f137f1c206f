//! Bake Benchmark (Deep Fried Edition)
//!
//! Measures the stages that dominate a bake.
//!
//! # Groups
//! - voxelize: meta extraction + six-axis slice voxelization
//! - bake: every stage on the Cornell box
//! - denoise: separable Gaussian at several radii

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use voxel_tracer::denoise::VolumeDenoiser;
use voxel_tracer::prelude::*;

fn cornell_config(resolution: u32) -> BakeConfig {
    BakeConfig {
        voxel_name: "Bench".into(),
        volume_size: Vec3::splat(2.4),
        resolution_override: Some(UVec3::splat(resolution)),
        direct_surface_samples: 4,
        direct_volumetric_samples: 4,
        environment_surface_samples: 8,
        environment_volumetric_samples: 8,
        bounce_surface_samples: 8,
        bounce_volumetric_samples: 8,
        ..Default::default()
    }
}

fn bench_voxelize(c: &mut Criterion) {
    let mut group = c.benchmark_group("voxelize");
    let scene = cornell_box(2.0);

    for resolution in [16u32, 32] {
        group.throughput(Throughput::Elements(u64::from(resolution.pow(3))));
        group.bench_with_input(BenchmarkId::from_parameter(resolution), &resolution, |b, &res| {
            let store = MemoryVolumeStore::new();
            let kernels = CpuKernels;
            let tracer = VoxelTracer::new(cornell_config(res), &store, &kernels).unwrap();
            b.iter(|| black_box(tracer.generate_voxel_buffers(&scene).unwrap()))
        });
    }
    group.finish();
}

fn bench_bake(c: &mut Criterion) {
    let mut group = c.benchmark_group("bake");
    group.sample_size(10);
    let scene = cornell_box(2.0);

    for resolution in [8u32, 16] {
        group.throughput(Throughput::Elements(u64::from(resolution.pow(3))));
        group.bench_with_input(BenchmarkId::new("cornell", resolution), &resolution, |b, &res| {
            let store = MemoryVolumeStore::new();
            let kernels = CpuKernels;
            let mut tracer = VoxelTracer::new(cornell_config(res), &store, &kernels).unwrap();
            b.iter(|| black_box(tracer.bake(&scene, &scene).unwrap()))
        });
    }
    group.finish();
}

fn bench_denoise(c: &mut Criterion) {
    let mut group = c.benchmark_group("denoise");
    let grid = VoxelGrid::new(Vec3::ZERO, Vec3::splat(32.0), UVec3::splat(32)).unwrap();
    let mut volume = TexelVolume::new(grid);
    for (i, t) in volume.data.iter_mut().enumerate() {
        *t = Vec4::new((i % 7) as f32, (i % 5) as f32, (i % 3) as f32, 1.0);
    }
    let kernels = CpuKernels;
    let dispatcher = Dispatcher::new(&kernels, 32, false);
    let library = KernelLibrary::standard();
    group.throughput(Throughput::Elements(volume.voxel_count() as u64));

    for radius in [1u32, 2, 4] {
        let denoiser = VolumeDenoiser::new(&dispatcher, &library, radius);
        group.bench_with_input(BenchmarkId::from_parameter(radius), &volume, |b, v| {
            b.iter(|| black_box(denoiser.denoise(v).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_voxelize, bench_bake, bench_denoise);
criterion_main!(benches);
