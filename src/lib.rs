//! # voxel-tracer
//!
//! Offline voxel lighting baker for runtime volumetric fog and GI.
//!
//! The scene is voxelized into albedo, normal and emissive volumes by
//! six-axis orthographic rasterization. Direct, environment and multi-bounce
//! indirect light are then traced per voxel by ray-marching the voxel
//! volume itself, combined, denoised and graded into the final buffers.
//!
//! ## Features
//!
//! - **Meta extraction**: UV1-space albedo/emissive/normal passes with dilation
//! - **Voxelization**: six-axis slice rasterization with blend or first-writer-wins
//! - **Tracers**: directional, point, spot and area lights; sky cubemap; N bounces
//! - **Denoise**: separable 3D Gaussian
//! - **Persistence**: CRC-checked `.texture3d` volumes in 8/16/32-bit formats
//! - **Backends**: rayon CPU kernels, optional wgpu compute (`gpu` feature)
//!
//! ## Example
//!
//! ```rust,no_run
//! use voxel_tracer::prelude::*;
//!
//! let scene = cornell_box(2.0);
//! let config = BakeConfig {
//!     volume_size: Vec3::splat(2.4),
//!     resolution_override: Some(UVec3::splat(16)),
//!     ..Default::default()
//! };
//!
//! let store = MemoryVolumeStore::new();
//! let kernels = CpuKernels;
//! let mut tracer = VoxelTracer::new(config, &store, &kernels).unwrap();
//! let report = tracer.bake(&scene, &scene).unwrap();
//! println!("{} dispatches", report.dispatch.dispatches);
//!
//! let fog = tracer.load(BufferRole::FinalVolumetric).unwrap();
//! assert_eq!(fog.resolution(), UVec3::splat(16));
//! ```

#![warn(missing_docs)]

pub mod combine;
pub mod config;
pub mod denoise;
pub mod dispatch;
pub mod environment;
pub mod error;
pub mod grid;
pub mod kernels;
pub mod meta;
pub mod observe;
pub mod pipeline;
pub mod post;
pub mod raster;
pub mod scene;
pub mod trace;
pub mod volume;
pub mod voxelize;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude - commonly used types and functions
pub mod prelude {
    pub use crate::config::{BakeConfig, MetaStrategyKind};
    pub use crate::dispatch::{DispatchStats, Dispatcher, KernelLibrary};
    pub use crate::environment::{Cubemap, EnvironmentSource, GradientSky, UniformSky};
    pub use crate::error::{BakeError, BakeResult};
    pub use crate::grid::{Aabb, VoxelGrid};
    pub use crate::kernels::{CpuKernels, VolumeKernels};
    pub use crate::meta::{HdrEncoding, MetaRenderer, SoftwareMetaRenderer};
    pub use crate::observe::{BakeObserver, LogObserver, RecordingObserver, StageTiming};
    pub use crate::pipeline::{BakeReport, VoxelTracer};
    pub use crate::post::{DensityMode, PostSettings};
    pub use crate::scene::demo::cornell_box;
    pub use crate::scene::{
        LodGroup, Material, Mesh, SceneLight, SceneLightProvider, SceneSurfaceProvider, StaticScene, Surface,
        SurfaceId,
    };
    pub use crate::trace::AttenuationModel;
    pub use crate::volume::store::{DirectoryVolumeStore, MemoryVolumeStore, StoreError, VolumeStore};
    pub use crate::volume::{BufferRole, TexelFormat, TexelVolume, Volume3D};
    pub use glam::{Mat4, Quat, UVec3, Vec2, Vec3, Vec4};
}

pub use config::BakeConfig;
pub use error::{BakeError, BakeResult};
pub use pipeline::VoxelTracer;

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_cornell_box_bake_workflow() {
        let scene = cornell_box(2.0);
        let config = BakeConfig {
            voxel_name: "Cornell".into(),
            volume_size: Vec3::splat(2.4),
            resolution_override: Some(UVec3::splat(8)),
            direct_surface_samples: 2,
            direct_volumetric_samples: 2,
            environment_surface_samples: 2,
            environment_volumetric_samples: 2,
            environment_resolution: 4,
            bounce_surface_samples: 2,
            bounce_volumetric_samples: 2,
            ..Default::default()
        };
        let store = MemoryVolumeStore::new();
        let kernels = CpuKernels;
        let observer = RecordingObserver::new();
        let mut tracer = VoxelTracer::new(config, &store, &kernels)
            .unwrap()
            .with_observer(&observer);
        let report = tracer.bake(&scene, &scene).unwrap();

        assert_eq!(report.extraction.records, 7);
        assert!(report.voxelize.covered_voxels > 0);
        assert_eq!(report.timings.len(), 13);
        assert_eq!(observer.started().first(), Some(&"clean_volumes"));
        assert_eq!(observer.started().last(), Some(&"apply_post_adjustments"));

        let surface = tracer.load(BufferRole::FinalSurface).unwrap();
        assert!(surface.total_rgb().max_element() > 0.0);
        // density buffer is off by default
        assert!(!store.contains("Cornell_density"));
    }
}
