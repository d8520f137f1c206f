//! Six-axis scene voxelizer (Deep Fried Edition)
//!
//! Steps an orthographic camera through every slice of the grid from +X, -X,
//! +Y, -Y, +Z and -Z, rasterizes the meta-textured surfaces with their real
//! transforms and accumulates each slice image into the albedo, normal and
//! emissive volumes.
//!
//! # Features
//!
//! - **Per-channel policy**: blend (average with an earlier write) or first-writer-wins
//! - **Double-sided**: optionally keeps back faces so thin geometry is caught from both sides
//! - **Slice culling**: optionally skips records whose bounds miss the slab
//! - **Parallel slices**: slices of one axis render concurrently, then accumulate in order
//!
//! A voxel whose albedo alpha is 0 is empty space for every later stage.

pub mod slice;

use glam::Vec4;
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::dispatch::{kernel_names, Dispatcher, KernelLibrary};
use crate::error::BakeResult;
use crate::grid::VoxelGrid;
use crate::meta::SurfaceMetaRecord;
use crate::volume::{TexelVolume, Volume3D};

pub use slice::{AxisPass, Fragment, SliceImage, SliceOptions};

/// How a slice write combines with a voxel written by an earlier pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccumulatePolicy {
    /// `existing.a > 0 ? (existing + new) / 2 : new`
    Blend,
    /// `existing.a > 0 ? existing : new`
    FirstWriterWins,
}

impl AccumulatePolicy {
    /// Combine an existing voxel with a new write
    #[inline(always)]
    pub fn apply(self, existing: Vec4, new: Vec4) -> Vec4 {
        if existing.w <= 0.0 {
            return new;
        }
        match self {
            AccumulatePolicy::Blend => (existing + new) * 0.5,
            AccumulatePolicy::FirstWriterWins => existing,
        }
    }
}

/// Voxelizer settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelizeSettings {
    /// Disable back-face culling
    pub double_sided: bool,
    /// Skip records whose bounds miss the current slab
    pub cull_per_slice: bool,
    /// Albedo accumulation
    pub albedo_policy: AccumulatePolicy,
    /// Emissive accumulation
    pub emissive_policy: AccumulatePolicy,
    /// Normal accumulation
    pub normal_policy: AccumulatePolicy,
}

impl Default for VoxelizeSettings {
    fn default() -> Self {
        Self {
            double_sided: false,
            cull_per_slice: true,
            albedo_policy: AccumulatePolicy::Blend,
            emissive_policy: AccumulatePolicy::Blend,
            normal_policy: AccumulatePolicy::FirstWriterWins,
        }
    }
}

/// The three voxelized volumes
#[derive(Debug, Clone)]
pub struct VoxelBuffers {
    /// Albedo RGB + coverage alpha
    pub albedo: TexelVolume,
    /// Raw normal RGB + written flag
    pub normal: TexelVolume,
    /// HDR emissive RGB + written flag
    pub emissive: TexelVolume,
}

/// Voxelization counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoxelizeStats {
    /// Triangles considered
    pub triangles: usize,
    /// Slices rendered across all axis passes
    pub slices: usize,
    /// Fragments accumulated
    pub fragments: usize,
    /// Voxels with coverage afterwards
    pub covered_voxels: usize,
}

/// Builds the albedo, normal and emissive volumes
pub struct SceneVoxelizer<'a> {
    dispatcher: &'a Dispatcher<'a>,
    library: &'a KernelLibrary,
    settings: VoxelizeSettings,
}

impl<'a> SceneVoxelizer<'a> {
    /// Create a voxelizer
    pub fn new(dispatcher: &'a Dispatcher<'a>, library: &'a KernelLibrary, settings: VoxelizeSettings) -> Self {
        Self {
            dispatcher,
            library,
            settings,
        }
    }

    /// Voxelize every record into fresh volumes over `grid`
    pub fn voxelize(
        &self,
        grid: &VoxelGrid,
        records: &[SurfaceMetaRecord],
    ) -> BakeResult<(VoxelBuffers, VoxelizeStats)> {
        let accumulate = self.library.require(kernel_names::VOXELIZE_ACCUMULATE)?;
        let triangles = slice::prepare_triangles(records, grid);
        let options = SliceOptions {
            double_sided: self.settings.double_sided,
            cull_per_slice: self.settings.cull_per_slice,
        };

        let mut buffers = VoxelBuffers {
            albedo: Volume3D::new(*grid),
            normal: Volume3D::new(*grid),
            emissive: Volume3D::new(*grid),
        };
        let mut stats = VoxelizeStats {
            triangles: triangles.len(),
            ..Default::default()
        };
        let res = grid.resolution.to_array();

        for pass in AxisPass::ORDER {
            let slices: Vec<SliceImage> = (0..res[pass.axis])
                .into_par_iter()
                .map(|s| slice::render_slice(pass, s, grid, &triangles, records, options))
                .collect();

            let mut pass_fragments = 0;
            for (s, image) in slices.iter().enumerate() {
                self.dispatcher
                    .dispatch_plane(accumulate, [image.width, image.height], |x, y| {
                        let Some(f) = image.get(x, y) else {
                            return;
                        };
                        let [vx, vy, vz] = pass.voxel(s as u32, x, y);
                        let idx = grid.index(vx, vy, vz);
                        let b = &mut buffers;
                        b.albedo.data[idx] = self.settings.albedo_policy.apply(b.albedo.data[idx], f.albedo);
                        b.emissive.data[idx] = self
                            .settings
                            .emissive_policy
                            .apply(b.emissive.data[idx], f.emissive.extend(1.0));
                        b.normal.data[idx] = self
                            .settings
                            .normal_policy
                            .apply(b.normal.data[idx], f.normal.extend(1.0));
                        pass_fragments += 1;
                    })?;
            }
            debug!(
                "voxelize {}: {} slices, {} fragments",
                pass.label(),
                slices.len(),
                pass_fragments
            );
            stats.slices += slices.len();
            stats.fragments += pass_fragments;
        }

        stats.covered_voxels = buffers.albedo.covered_count();
        Ok((buffers, stats))
    }
}
