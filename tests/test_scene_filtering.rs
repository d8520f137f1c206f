//! Integration tests: which surfaces reach the voxel buffers
//!
//! LOD exclusion, layer masks and the GI-contributor filter.

mod common;

use std::sync::Arc;

use common::*;
use voxel_tracer::meta::ExtractionStats;
use voxel_tracer::prelude::*;
use voxel_tracer::voxelize::VoxelizeStats;

/// Two unit cubes on the X axis, one at -2 and one at +2
fn two_cubes() -> (StaticScene, SurfaceId, SurfaceId) {
    let mut scene = StaticScene::new("TwoCubes");
    let cube = Arc::new(Mesh::cuboid("cube", Vec3::ONE));
    let grey = Arc::new(Material::diffuse("grey", Vec3::splat(0.5)));
    let left = scene.add_surface("left", cube.clone(), vec![grey.clone()], Mat4::from_translation(Vec3::new(-2.0, 0.0, 0.0)));
    let right = scene.add_surface("right", cube, vec![grey], Mat4::from_translation(Vec3::new(2.0, 0.0, 0.0)));
    (scene, left, right)
}

fn voxelize(config: BakeConfig, scene: &StaticScene) -> (MemoryVolumeStore, ExtractionStats, VoxelizeStats) {
    let store = MemoryVolumeStore::new();
    let kernels = CpuKernels;
    let (extraction, voxelize) = {
        let tracer = VoxelTracer::new(config, &store, &kernels).unwrap();
        tracer.generate_voxel_buffers(scene).unwrap()
    };
    (store, extraction, voxelize)
}

// ============================================================================
// LOD
// ============================================================================

#[test]
fn lower_lod_levels_are_skipped() {
    let (mut scene, left, right) = two_cubes();
    scene.add_lod_group(LodGroup {
        levels: vec![vec![left], vec![right]],
    });
    let (store, stats, _) = voxelize(fast_config("Lod", 8, 8.0), &scene);
    assert_eq!(stats.lod_excluded, 1);
    assert_eq!(stats.records, 1);

    let albedo = volume(&store, "Lod", BufferRole::Albedo);
    let covered = lit_voxels(&albedo);
    assert!(!covered.is_empty());
    assert!(covered.iter().all(|v| v.x < 4), "right cube leaked: {:?}", covered);
}

#[test]
fn without_lod_groups_both_cubes_land() {
    let (scene, _, _) = two_cubes();
    let (store, stats, _) = voxelize(fast_config("Both", 8, 8.0), &scene);
    assert_eq!(stats.records, 2);
    let covered = lit_voxels(&volume(&store, "Both", BufferRole::Albedo));
    assert!(covered.iter().any(|v| v.x < 4));
    assert!(covered.iter().any(|v| v.x >= 4));
}

// ============================================================================
// Filters
// ============================================================================

#[test]
fn layer_mask_removes_surface() {
    let (mut scene, _, right) = two_cubes();
    scene.surface_mut(right).unwrap().layer = 3;
    let config = BakeConfig {
        layer_mask: !(1 << 3),
        ..fast_config("Layer", 8, 8.0)
    };
    let (store, stats, _) = voxelize(config, &scene);
    assert_eq!(stats.filtered, 1);
    let covered = lit_voxels(&volume(&store, "Layer", BufferRole::Albedo));
    assert!(covered.iter().all(|v| v.x < 4));
}

#[test]
fn non_contributors_are_filtered_on_request() {
    let (mut scene, left, _) = two_cubes();
    scene.surface_mut(left).unwrap().gi_contributor = false;

    let (_, strict, strict_voxels) = voxelize(fast_config("Gi", 8, 8.0), &scene);
    assert_eq!(strict.filtered, 1);

    let relaxed = BakeConfig {
        only_gi_contributors: false,
        ..fast_config("Gi", 8, 8.0)
    };
    let (_, stats, voxels) = voxelize(relaxed, &scene);
    assert_eq!(stats.filtered, 0);
    assert!(voxels.covered_voxels > strict_voxels.covered_voxels);
}

#[test]
fn surfaces_outside_the_volume_are_filtered() {
    let mut scene = StaticScene::new("Far");
    scene.add_surface(
        "far",
        Arc::new(Mesh::cuboid("cube", Vec3::ONE)),
        vec![Arc::new(Material::diffuse("grey", Vec3::ONE))],
        Mat4::from_translation(Vec3::new(50.0, 0.0, 0.0)),
    );
    let (store, stats, voxels) = voxelize(fast_config("Far", 4, 4.0), &scene);
    assert_eq!(stats.filtered, 1);
    assert_eq!(voxels.covered_voxels, 0);
    assert!(lit_voxels(&volume(&store, "Far", BufferRole::Albedo)).is_empty());
}

// ============================================================================
// Meta dispatches
// ============================================================================

fn voxelize_dispatches(strategy: MetaStrategyKind, dilation: u32) -> (u64, usize) {
    let (scene, _, _) = two_cubes();
    let store = MemoryVolumeStore::new();
    let kernels = CpuKernels;
    let config = BakeConfig {
        meta_strategy: strategy,
        dilation_pixel_size: dilation,
        ..fast_config("Meta", 8, 8.0)
    };
    let tracer = VoxelTracer::new(config, &store, &kernels).unwrap();
    let (extraction, _) = tracer.generate_voxel_buffers(&scene).unwrap();
    (tracer.dispatch_stats().dispatches, extraction.records)
}

#[test]
fn dilation_and_packing_are_dispatched() {
    let (single0, records) = voxelize_dispatches(MetaStrategyKind::SinglePass, 0);
    let (three0, _) = voxelize_dispatches(MetaStrategyKind::ThreePass, 0);
    let (single1, _) = voxelize_dispatches(MetaStrategyKind::SinglePass, 1);
    let (three1, _) = voxelize_dispatches(MetaStrategyKind::ThreePass, 1);
    assert_eq!(records, 2);

    // one pack per record
    assert_eq!(single0 - three0, records as u64);
    // one dilation per layer and record
    assert_eq!(single1 - single0, 2 * records as u64);
    assert_eq!(three1 - three0, 3 * records as u64);
}

#[test]
fn missing_dilation_kernel_stops_voxelization() {
    let (scene, _, _) = two_cubes();
    let store = MemoryVolumeStore::new();
    let kernels = CpuKernels;
    let tracer = VoxelTracer::new(fast_config("NoDilate", 8, 8.0), &store, &kernels)
        .unwrap()
        .with_library(KernelLibrary::standard().without("DilateMeta"));
    assert!(matches!(
        tracer.generate_voxel_buffers(&scene),
        Err(BakeError::MissingKernel("DilateMeta"))
    ));
    assert!(store.keys().is_empty());
}
