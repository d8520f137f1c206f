//! Post adjustments and density packing
//!
//! Colour grading of the combined buffers and the density channel consumed by
//! the fog renderer. Grading order: exposure, brightness, contrast, saturation.

use glam::{Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::dispatch::{kernel_names, Dispatcher, KernelLibrary};
use crate::error::BakeResult;
use crate::kernels::ensure_same_grid;
use crate::volume::TexelVolume;

/// Rec. 709 luminance weights
pub const REC709_LUMA: Vec3 = Vec3::new(0.2126, 0.7152, 0.0722);

/// Where fog density comes from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DensityMode {
    /// The same density everywhere
    Constant(f32),
    /// Luminance of the graded light times a scale
    Luminance(f32),
    /// Albedo coverage times a factor
    AlbedoCoverage(f32),
}

impl Default for DensityMode {
    fn default() -> Self {
        DensityMode::Constant(1.0)
    }
}

/// Grading and density settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostSettings {
    /// Exposure in stops (`2^exposure`)
    pub exposure: f32,
    /// Linear multiplier
    pub brightness: f32,
    /// Contrast around a 0.5 pivot
    ///
    /// Values below 1 pull every channel toward the pivot, so black lifts:
    /// at 0.5 a black voxel grades to 0.25.
    pub contrast: f32,
    /// 0 = greyscale, 1 = unchanged
    pub saturation: f32,
    /// Density source packed into the volumetric alpha
    pub density: DensityMode,
    /// Also write density as its own buffer
    pub separate_density_texture: bool,
}

impl Default for PostSettings {
    fn default() -> Self {
        Self {
            exposure: 0.0,
            brightness: 1.0,
            contrast: 1.0,
            saturation: 1.0,
            density: DensityMode::default(),
            separate_density_texture: false,
        }
    }
}

impl PostSettings {
    /// Apply the grading chain to one colour
    #[inline]
    pub fn grade(&self, rgb: Vec3) -> Vec3 {
        let mut c = rgb * (self.exposure.exp2() * self.brightness);
        if self.contrast != 1.0 {
            c = ((c - 0.5) * self.contrast + 0.5).max(Vec3::ZERO);
        }
        if self.saturation != 1.0 {
            let luma = Vec3::splat(c.dot(REC709_LUMA));
            c = luma.lerp(c, self.saturation).max(Vec3::ZERO);
        }
        c
    }

    /// Density of a voxel given its graded light and albedo coverage
    #[inline]
    pub fn density(&self, graded: Vec3, coverage: f32) -> f32 {
        match self.density {
            DensityMode::Constant(f) => f,
            DensityMode::Luminance(scale) => graded.dot(REC709_LUMA) * scale,
            DensityMode::AlbedoCoverage(f) => coverage * f,
        }
        .max(0.0)
    }
}

/// Graded outputs
#[derive(Debug, Clone)]
pub struct PostOutput {
    /// Graded surface light, alpha unchanged
    pub final_surface: TexelVolume,
    /// Graded volumetric light with density in alpha
    pub final_volumetric: TexelVolume,
    /// Density buffer when requested
    pub density: Option<TexelVolume>,
}

/// Applies [`PostSettings`] to the combined buffers
pub struct PostProcessor<'a> {
    dispatcher: &'a Dispatcher<'a>,
    library: &'a KernelLibrary,
    settings: PostSettings,
}

impl<'a> PostProcessor<'a> {
    /// Create a processor
    pub fn new(dispatcher: &'a Dispatcher<'a>, library: &'a KernelLibrary, settings: PostSettings) -> Self {
        Self {
            dispatcher,
            library,
            settings,
        }
    }

    /// Grade both buffers and pack density
    pub fn apply(
        &self,
        combined_surface: &TexelVolume,
        combined_volumetric: &TexelVolume,
        albedo: &TexelVolume,
    ) -> BakeResult<PostOutput> {
        ensure_same_grid("combined surface", albedo, combined_surface)?;
        ensure_same_grid("combined volumetric", albedo, combined_volumetric)?;
        let kernel = self.library.require(kernel_names::POST_ADJUST)?;
        let grid = albedo.grid;
        let s = &self.settings;

        let final_surface = self.dispatcher.dispatch_volume(kernel, &grid, |v| {
            let t = combined_surface.data[grid.index(v.x, v.y, v.z)];
            s.grade(t.truncate()).extend(t.w)
        })?;
        let final_volumetric = self.dispatcher.dispatch_volume(kernel, &grid, |v| {
            let idx = grid.index(v.x, v.y, v.z);
            let graded = s.grade(combined_volumetric.data[idx].truncate());
            graded.extend(s.density(graded, albedo.data[idx].w))
        })?;
        let density = if s.separate_density_texture {
            Some(self.dispatcher.dispatch_volume(kernel, &grid, |v| {
                Vec4::splat(final_volumetric.data[grid.index(v.x, v.y, v.z)].w)
            })?)
        } else {
            None
        };

        Ok(PostOutput {
            final_surface,
            final_volumetric,
            density,
        })
    }
}
