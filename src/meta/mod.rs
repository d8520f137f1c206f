//! Surface meta extraction (Deep Fried Edition)
//!
//! Renders every eligible submesh in lightmap-UV space ("meta pass"), dilates
//! the result across UV seams and hands the voxelizer one [`MetaTexels`] source
//! per submesh.
//!
//! # Features
//!
//! - **Filters**: GI-contributor, shadow-caster, layer mask, grid overlap, LOD exclusion
//! - **Sizing**: `max(ceil(bounds_diagonal * texel_density), min_resolution)` square
//! - **Strategies**: three separate layers, or one packed 64-bit layer (see [`strategy`])
//! - **Parallel**: submeshes are extracted concurrently with rayon
//!
//! A submesh whose material has no meta pass yields no record; it is counted
//! and skipped, never an error.

pub mod dilate;
pub mod hdr;
pub mod pack;
pub mod strategy;

use std::sync::Arc;

use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};
use log::debug;
use rayon::prelude::*;

use crate::dispatch::{Dispatcher, KernelLibrary};
use crate::error::BakeResult;
use crate::grid::Aabb;
use crate::raster::{rasterize_triangle, Image2D};
use crate::scene::{Mesh, Surface, SurfaceId, VisibilitySet};

pub use hdr::HdrEncoding;
pub use strategy::{MetaExtractionStrategy, MetaKernels, SinglePassStrategy, ThreePassStrategy};

/// Meta render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaPass {
    /// Albedo RGB + coverage alpha
    Albedo,
    /// HDR emission, alpha 1 where covered
    Emissive,
    /// World-space normal encoded as `n * 0.5 + 0.5`, alpha 1 where covered
    Normal,
}

/// Renders one meta pass of one submesh in UV1 space
pub trait MetaRenderer: Send + Sync {
    /// Render `pass` into a `size × size` target; `None` when the material has no meta pass
    fn render(&self, surface: &Surface, submesh: usize, pass: MetaPass, size: u32) -> Option<Image2D>;
}

/// CPU meta renderer: rasterizes UV1 triangles into an orthographic `[0,1]²` target
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftwareMetaRenderer;

impl MetaRenderer for SoftwareMetaRenderer {
    fn render(&self, surface: &Surface, submesh: usize, pass: MetaPass, size: u32) -> Option<Image2D> {
        let material = surface.material(submesh)?;
        if !material.has_meta_pass {
            return None;
        }

        let normal_matrix = Mat3::from_mat4(surface.transform).inverse().transpose();
        let mut image = Image2D::new(size, size);
        let scale = Vec2::splat(image.width as f32);

        for [a, b, c] in surface.mesh.triangles(submesh) {
            let tri = [a.uv1 * scale, b.uv1 * scale, c.uv1 * scale];
            let (w, h) = (image.width, image.height);
            rasterize_triangle(w, h, &tri, |x, y, bary| {
                let value = match pass {
                    MetaPass::Albedo => {
                        let uv = a.uv1 * bary.x + b.uv1 * bary.y + c.uv1 * bary.z;
                        material.albedo_at(uv)
                    }
                    MetaPass::Emissive => material.emission.extend(1.0),
                    MetaPass::Normal => {
                        let n = a.normal * bary.x + b.normal * bary.y + c.normal * bary.z;
                        let n = (normal_matrix * n).normalize_or_zero();
                        (n * 0.5 + 0.5).extend(1.0)
                    }
                };
                image.set(x, y, value);
            });
        }
        Some(image)
    }
}

/// One meta lookup
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetaSample {
    /// Albedo RGB + coverage alpha (alpha 0 = nothing here)
    pub albedo: Vec4,
    /// Linear HDR emission
    pub emissive: Vec3,
    /// World-space normal if the strategy captured one
    pub normal: Option<Vec3>,
}

/// Meta texture source consumed by the voxelizer
pub trait MetaTexels: Send + Sync {
    /// Sample at a UV1 coordinate
    fn sample(&self, uv: Vec2) -> MetaSample;
    /// Edge length of the square texture
    fn size(&self) -> u32;
    /// GPU memory the texture would occupy
    fn byte_size(&self) -> usize;
}

/// Surface eligibility filters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceFilter {
    /// Skip surfaces not flagged as GI contributors
    pub only_gi_contributors: bool,
    /// Skip surfaces that do not cast shadows
    pub only_shadow_casters: bool,
    /// Skip surfaces whose world bounds miss the grid
    pub require_bounds_overlap: bool,
    /// Bit `1 << layer` must be set
    pub layer_mask: u32,
}

impl Default for SurfaceFilter {
    fn default() -> Self {
        Self {
            only_gi_contributors: true,
            only_shadow_casters: false,
            require_bounds_overlap: true,
            layer_mask: u32::MAX,
        }
    }
}

impl SurfaceFilter {
    /// Reason the surface is rejected, `None` if it passes
    pub fn rejection(&self, surface: &Surface, grid_bounds: &Aabb) -> Option<&'static str> {
        if self.only_gi_contributors && !surface.gi_contributor {
            return Some("not a GI contributor");
        }
        if self.only_shadow_casters && !surface.shadow_caster {
            return Some("not a shadow caster");
        }
        let in_mask = surface.layer < 32 && self.layer_mask & (1u32 << surface.layer) != 0;
        if !in_mask {
            return Some("layer masked out");
        }
        if self.require_bounds_overlap && !surface.world_bounds().intersects(grid_bounds) {
            return Some("outside the voxel volume");
        }
        None
    }
}

/// Meta extraction settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetaSettings {
    /// Meta texels per world unit of bounds diagonal
    pub texel_density: f32,
    /// Smallest meta texture edge
    pub min_resolution: u32,
    /// Dilation iterations (texels)
    pub dilation_pixel_size: u32,
    /// Eligibility filters
    pub filter: SurfaceFilter,
}

impl Default for MetaSettings {
    fn default() -> Self {
        Self {
            texel_density: 8.0,
            min_resolution: 16,
            dilation_pixel_size: 2,
            filter: SurfaceFilter::default(),
        }
    }
}

/// Meta texture edge length: `max(ceil(diagonal * density), min_resolution)`, never 0
pub fn meta_resolution(bounds_diagonal: f32, texel_density: f32, min_resolution: u32) -> u32 {
    let wanted = (bounds_diagonal * texel_density).ceil();
    let wanted = if wanted.is_finite() && wanted > 0.0 {
        wanted.min(u32::MAX as f32) as u32
    } else {
        0
    };
    wanted.max(min_resolution).max(1)
}

/// Per-submesh meta data for the voxelizer
pub struct SurfaceMetaRecord {
    /// Source surface
    pub surface: SurfaceId,
    /// Submesh index
    pub submesh: usize,
    /// Geometry
    pub mesh: Arc<Mesh>,
    /// Object-to-world transform
    pub transform: Mat4,
    /// World bounds of the whole surface
    pub bounds: Aabb,
    /// Meta texels in UV1 space
    pub texels: Box<dyn MetaTexels>,
}

impl std::fmt::Debug for SurfaceMetaRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceMetaRecord")
            .field("surface", &self.surface)
            .field("submesh", &self.submesh)
            .field("bounds", &self.bounds)
            .field("texels", &self.texels.size())
            .finish()
    }
}

/// Counters of one extraction run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionStats {
    /// Surfaces offered by the scene
    pub surfaces: usize,
    /// Surfaces rejected by filters
    pub filtered: usize,
    /// Surfaces excluded as lower LOD levels
    pub lod_excluded: usize,
    /// Submeshes without a meta pass
    pub empty_submeshes: usize,
    /// Records produced
    pub records: usize,
    /// Total meta texture memory
    pub texel_bytes: usize,
}

/// Produces [`SurfaceMetaRecord`]s for the voxelizer
pub struct SurfaceMetaExtractor<'a> {
    dispatcher: &'a Dispatcher<'a>,
    library: &'a KernelLibrary,
    renderer: &'a dyn MetaRenderer,
    strategy: &'a dyn MetaExtractionStrategy,
    settings: MetaSettings,
}

impl<'a> SurfaceMetaExtractor<'a> {
    /// Create an extractor
    pub fn new(
        dispatcher: &'a Dispatcher<'a>,
        library: &'a KernelLibrary,
        renderer: &'a dyn MetaRenderer,
        strategy: &'a dyn MetaExtractionStrategy,
        settings: MetaSettings,
    ) -> Self {
        Self {
            dispatcher,
            library,
            renderer,
            strategy,
            settings,
        }
    }

    /// Extract meta records for every eligible submesh
    pub fn extract(
        &self,
        surfaces: &[Surface],
        visibility: &VisibilitySet,
        grid_bounds: &Aabb,
    ) -> BakeResult<(Vec<SurfaceMetaRecord>, ExtractionStats)> {
        let kernels = MetaKernels::new(self.dispatcher, self.library)?;
        let mut stats = ExtractionStats {
            surfaces: surfaces.len(),
            ..Default::default()
        };

        let mut jobs = Vec::new();
        for surface in surfaces {
            if visibility.is_excluded(surface.id) {
                debug!("meta: skipping {} (lower LOD level)", surface.name);
                stats.lod_excluded += 1;
                continue;
            }
            if let Some(reason) = self.settings.filter.rejection(surface, grid_bounds) {
                debug!("meta: skipping {} ({})", surface.name, reason);
                stats.filtered += 1;
                continue;
            }
            let bounds = surface.world_bounds();
            let size = meta_resolution(
                bounds.diagonal(),
                self.settings.texel_density,
                self.settings.min_resolution,
            );
            jobs.extend((0..surface.mesh.submesh_count()).map(|s| (surface, s, bounds, size)));
        }

        let results = jobs
            .par_iter()
            .map(|&(surface, submesh, bounds, size)| {
                let texels = self.strategy.extract(
                    &kernels,
                    self.renderer,
                    surface,
                    submesh,
                    size,
                    self.settings.dilation_pixel_size,
                )?;
                Ok((surface, submesh, bounds, texels))
            })
            .collect::<BakeResult<Vec<_>>>()?;

        let mut records = Vec::with_capacity(results.len());
        for (surface, submesh, bounds, texels) in results {
            let Some(texels) = texels else {
                debug!("meta: {} submesh {} has no meta pass", surface.name, submesh);
                stats.empty_submeshes += 1;
                continue;
            };
            stats.texel_bytes += texels.byte_size();
            records.push(SurfaceMetaRecord {
                surface: surface.id,
                submesh,
                mesh: surface.mesh.clone(),
                transform: surface.transform,
                bounds,
                texels,
            });
        }
        stats.records = records.len();
        Ok((records, stats))
    }
}
