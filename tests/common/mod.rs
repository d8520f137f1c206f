//! Common test helpers for voxel-tracer integration tests

#![allow(dead_code)]

use std::sync::Arc;

use voxel_tracer::prelude::*;

// ============================================================================
// Configurations
// ============================================================================

/// Cheap bake over a cube grid of `resolution³` voxels with edge `size`
pub fn fast_config(name: &str, resolution: u32, size: f32) -> BakeConfig {
    BakeConfig {
        voxel_name: name.to_string(),
        volume_size: Vec3::splat(size),
        resolution_override: Some(UVec3::splat(resolution)),
        direct_surface_samples: 2,
        direct_volumetric_samples: 2,
        environment_surface_samples: 4,
        environment_volumetric_samples: 4,
        environment_resolution: 8,
        bounce_surface_samples: 4,
        bounce_volumetric_samples: 4,
        ..Default::default()
    }
}

// ============================================================================
// Scenes
// ============================================================================

/// Emissive unit cube centred at the origin, no lights
pub fn emissive_cube_scene() -> StaticScene {
    let mut scene = StaticScene::new("EmissiveCube");
    let cube = Arc::new(Mesh::cuboid("cube", Vec3::ONE));
    let glow = Arc::new(Material::emissive("glow", Vec3::splat(0.5), Vec3::splat(5.0)));
    scene.add_surface("cube", cube, vec![glow], Mat4::IDENTITY);
    scene
}

/// `size × size` quad at height `y` facing +Y, lit straight down by one sun
pub fn lit_plane_scene(size: f32, y: f32, color: Vec3, intensity: f32) -> StaticScene {
    let mut scene = StaticScene::new("LitPlane");
    let quad = Arc::new(Mesh::quad("plane", Vec2::splat(size)));
    let grey = Arc::new(Material::diffuse("grey", Vec3::splat(0.5)));
    scene.add_surface("plane", quad, vec![grey], Mat4::from_translation(Vec3::new(0.0, y, 0.0)));
    scene.add_light(SceneLight::Directional {
        direction: Vec3::NEG_Y,
        color,
        intensity,
        shadow_softness: 0.0,
    });
    scene
}

/// Black floor under a black-albedo emissive panel, lit by a sun
pub fn black_room_scene() -> StaticScene {
    let mut scene = StaticScene::new("BlackRoom");
    let black = Arc::new(Material::diffuse("black", Vec3::ZERO));
    let panel_material = Arc::new(Material::emissive("panel", Vec3::ZERO, Vec3::splat(3.0)));
    scene.add_surface(
        "floor",
        Arc::new(Mesh::quad("floor", Vec2::splat(8.0))),
        vec![black],
        Mat4::from_translation(Vec3::new(0.0, -2.3, 0.0)),
    );
    scene.add_surface(
        "panel",
        Arc::new(Mesh::quad("panel", Vec2::splat(4.0))),
        vec![panel_material],
        Mat4::from_translation(Vec3::new(0.0, 1.7, 0.0)) * Mat4::from_quat(Quat::from_rotation_x(std::f32::consts::PI)),
    );
    scene.add_light(SceneLight::Directional {
        direction: Vec3::new(0.3, -1.0, 0.2),
        color: Vec3::ONE,
        intensity: 1.0,
        shadow_softness: 0.05,
    });
    scene
}

// ============================================================================
// Bake helpers
// ============================================================================

/// Route `log` output through the test harness; safe to call repeatedly
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Bake `scene` into a fresh in-memory store
pub fn bake_in_memory(config: BakeConfig, scene: &StaticScene) -> (MemoryVolumeStore, BakeReport) {
    init_logging();
    let store = MemoryVolumeStore::new();
    let kernels = CpuKernels;
    let report = {
        let mut tracer = VoxelTracer::new(config, &store, &kernels).expect("tracer setup failed");
        tracer.bake(scene, scene).expect("bake failed")
    };
    (store, report)
}

/// Load a buffer that must exist
pub fn volume(store: &dyn VolumeStore, name: &str, role: BufferRole) -> TexelVolume {
    store
        .load(&role.key(name))
        .expect("load failed")
        .unwrap_or_else(|| panic!("{} missing", role.key(name)))
}

/// Coordinates of every voxel with non-zero RGB
pub fn lit_voxels(volume: &TexelVolume) -> Vec<UVec3> {
    volume
        .data
        .iter()
        .enumerate()
        .filter(|(_, t)| t.truncate() != Vec3::ZERO)
        .map(|(i, _)| volume.grid.coords(i))
        .collect()
}

// ============================================================================
// Assertion helpers
// ============================================================================

/// Assert two f32 values are close within tolerance
pub fn assert_close(a: f32, b: f32, tol: f32, msg: &str) {
    assert!(
        (a - b).abs() < tol,
        "{}: {} vs {} (diff={}, tol={})",
        msg,
        a,
        b,
        (a - b).abs(),
        tol
    );
}
