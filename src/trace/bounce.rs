//! Bounce light tracer
//!
//! Multi-bounce indirect light. The surface pass keeps a bounce source volume,
//! seeded with the shaded direct and environment light, and gathers it over
//! a cosine hemisphere from every covered voxel. After each iteration other
//! than the first, the source is rebuilt from the gathered light:
//!
//! ```text
//! source = albedo * boost * (surface_light + gathered) + emissive * emissive_intensity
//! ```
//!
//! Iterations 0 and 1 therefore both gather the unrefreshed seed, and a bake
//! with `bounces` iterations performs `bounces - 1` refreshes. The volumetric
//! pass gathers the final source over the full sphere from every voxel.

use glam::Vec3;
use log::debug;

use super::{cosine_hemisphere, uniform_sphere, MarchSettings, Rng, SampleAccumulator, TraceStage, VoxelMarcher};
use crate::combine::BufferCombiner;
use crate::dispatch::{kernel_names, Dispatcher, KernelLibrary};
use crate::error::BakeResult;
use crate::kernels::ensure_same_grid;
use crate::volume::{TexelVolume, Volume3D};

/// Bounce count limits
pub const MAX_BOUNCES: u32 = 8;

/// Bounce tracer settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BounceSettings {
    /// Iterations, clamped to `1..=8`
    pub bounces: u32,
    /// Sample dispatches per surface iteration
    pub surface_samples: u32,
    /// Sample dispatches for the volumetric gather
    pub volumetric_samples: u32,
    /// Multiplier on gathered light
    pub indirect_intensity: f32,
    /// Multiplier on albedo when re-shading the source
    pub albedo_boost: f32,
    /// Multiplier on emission when re-shading the source
    pub emissive_intensity: f32,
    /// Gather march
    pub march: MarchSettings,
}

impl Default for BounceSettings {
    fn default() -> Self {
        Self {
            bounces: 2,
            surface_samples: 16,
            volumetric_samples: 16,
            indirect_intensity: 1.0,
            albedo_boost: 1.0,
            emissive_intensity: 1.0,
            march: MarchSettings::default(),
        }
    }
}

impl BounceSettings {
    /// Bounce count after clamping
    pub fn clamped_bounces(&self) -> u32 {
        self.bounces.clamp(1, MAX_BOUNCES)
    }
}

/// Counters of a surface bounce
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BounceStats {
    /// Iterations run
    pub iterations: u32,
    /// Gather dispatches issued
    pub samples_dispatched: u32,
    /// Times the source was rebuilt
    pub source_refreshes: u32,
}

/// Volumes the surface bounce reads
#[derive(Clone, Copy)]
pub struct BounceInputs<'v> {
    /// Albedo and coverage
    pub albedo: &'v TexelVolume,
    /// Surface normals
    pub normal: &'v TexelVolume,
    /// Emission
    pub emissive: &'v TexelVolume,
    /// Direct plus environment surface light
    pub surface_light: &'v TexelVolume,
    /// Initial source (`combinedDirectSurface`)
    pub seed: &'v TexelVolume,
}

/// Result of the surface bounce
#[derive(Debug, Clone)]
pub struct SurfaceBounce {
    /// Gathered light of the last iteration
    pub light: TexelVolume,
    /// Source after the last refresh, read by the volumetric gather
    pub source: TexelVolume,
    /// Counters
    pub stats: BounceStats,
}

/// Multi-bounce indirect lighting
pub struct BounceLightTracer<'a> {
    dispatcher: &'a Dispatcher<'a>,
    library: &'a KernelLibrary,
    settings: BounceSettings,
}

impl<'a> BounceLightTracer<'a> {
    /// Create a tracer
    pub fn new(dispatcher: &'a Dispatcher<'a>, library: &'a KernelLibrary, settings: BounceSettings) -> Self {
        Self {
            dispatcher,
            library,
            settings,
        }
    }

    /// Surface bounce loop
    pub fn trace_surface(&self, inputs: BounceInputs) -> BakeResult<SurfaceBounce> {
        let BounceInputs {
            albedo,
            normal,
            emissive,
            surface_light,
            seed,
        } = inputs;
        ensure_same_grid("normal", albedo, normal)?;
        ensure_same_grid("emissive", albedo, emissive)?;
        ensure_same_grid("surface light", albedo, surface_light)?;
        ensure_same_grid("bounce seed", albedo, seed)?;

        let kernel = self.library.require(kernel_names::BOUNCE_SURFACE)?;
        let combiner = BufferCombiner::new(self.dispatcher, self.library);
        let marcher = VoxelMarcher::new(albedo, self.settings.march);
        let grid = albedo.grid;
        let samples = self.settings.surface_samples.max(1);
        let intensity = self.settings.indirect_intensity;

        let mut stats = BounceStats::default();
        let mut source = seed.clone();
        let mut light = Volume3D::new(grid);

        for i in 0..self.settings.clamped_bounces() {
            let mut acc = SampleAccumulator::new(&grid);
            for k in 0..samples {
                let noise = TraceStage::BounceSurface.seed(i * samples + k);
                let source = &source;
                acc.add_sample(self.dispatcher, kernel, |v| {
                    let idx = grid.index(v.x, v.y, v.z);
                    let a = albedo.data[idx].w;
                    if a <= 0.0 {
                        return None;
                    }
                    let mut rng = Rng::new(idx as u32, noise);
                    let n = normal.data[idx].truncate().normalize_or_zero();
                    let dir = if n != Vec3::ZERO {
                        cosine_hemisphere(n, rng.next_vec2())
                    } else {
                        uniform_sphere(rng.next_vec2())
                    };
                    let p = grid.voxel_center(v.x, v.y, v.z);
                    let c = marcher.gather(v, p, dir, rng.next_f32(), source);
                    Some((c * intensity).extend(a))
                })?;
                stats.samples_dispatched += 1;
            }
            light = acc.finish(self.dispatcher, self.library)?;
            stats.iterations += 1;

            if i > 0 {
                let incoming = combiner.add(surface_light, &light)?;
                source = combiner.shade(
                    albedo,
                    &incoming,
                    self.settings.albedo_boost,
                    emissive,
                    self.settings.emissive_intensity,
                )?;
                stats.source_refreshes += 1;
            }
            debug!("bounce {}: {} gathered", i, light.total_rgb());
        }

        Ok(SurfaceBounce { light, source, stats })
    }

    /// Full-sphere gather of `source` in every voxel
    pub fn trace_volumetric(&self, albedo: &TexelVolume, source: &TexelVolume) -> BakeResult<TexelVolume> {
        ensure_same_grid("bounce source", albedo, source)?;
        let kernel = self.library.require(kernel_names::BOUNCE_VOLUMETRIC)?;
        let marcher = VoxelMarcher::new(albedo, self.settings.march);
        let grid = albedo.grid;
        let intensity = self.settings.indirect_intensity;

        let samples = self.settings.volumetric_samples.max(1);
        // continue the stream of the iteration that produced `source`
        let first = (self.settings.clamped_bounces() - 1) * samples;

        let mut acc = SampleAccumulator::new(&grid);
        for k in 0..samples {
            let seed = TraceStage::BounceVolumetric.seed(first + k);
            acc.add_sample(self.dispatcher, kernel, |v| {
                let idx = grid.index(v.x, v.y, v.z);
                let mut rng = Rng::new(idx as u32, seed);
                let dir = uniform_sphere(rng.next_vec2());
                let p = grid.voxel_center(v.x, v.y, v.z);
                let c = marcher.gather(v, p, dir, rng.next_f32(), source);
                Some((c * intensity).extend(1.0))
            })?;
        }
        acc.finish(self.dispatcher, self.library)
    }
}
