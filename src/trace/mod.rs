//! Voxel light tracers (Deep Fried Edition)
//!
//! Direct, environment and bounce lighting are all estimated by marching rays
//! through the voxelized albedo volume. Coverage (albedo alpha) is the only
//! occluder: a voxel with alpha 0 is vacuum.
//!
//! # Features
//!
//! - **Stochastic sampling**: cosine hemisphere, uniform sphere, cone and ball samples
//! - **Per-voxel noise**: `pcg(voxel_index ^ seed)` with one seed per sample dispatch
//! - **Commutative accumulation**: every sample dispatch adds into a sum, the mean is
//!   taken once at the end, so sample order never matters
//!
//! # Deep Fried Optimizations
//!
//! - **Z-slab dispatch**: each sample dispatch runs through [`Dispatcher::dispatch_into`]
//! - **Own-voxel skip**: the march ignores the voxel it starts in

pub mod bounce;
pub mod direct;
pub mod environment;
pub mod light;

use glam::{UVec3, Vec2, Vec3, Vec4};

use crate::dispatch::{kernel_names, Dispatcher, KernelDesc, KernelLibrary};
use crate::error::BakeResult;
use crate::grid::VoxelGrid;
use crate::volume::{TexelVolume, Volume3D};

pub use bounce::{BounceLightTracer, BounceSettings, BounceStats};
pub use direct::{DirectLightTracer, DirectSettings};
pub use environment::{EnvironmentLightTracer, EnvironmentSettings};
pub use light::{AttenuationModel, LightBuffers};

/// Transmittance below which a ray counts as fully blocked
pub const OPAQUE_THRESHOLD: f32 = 1e-3;

/// PCG hash (one round of the PCG-RXS-M-XS output function)
#[inline(always)]
pub fn pcg_hash(v: u32) -> u32 {
    let state = v.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    let word = ((state >> ((state >> 28) + 4)) ^ state).wrapping_mul(277_803_737);
    (word >> 22) ^ word
}

/// Tracer stages, each with its own noise stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TraceStage {
    /// Direct light on surface voxels
    DirectSurface = 1,
    /// Direct light in every voxel
    DirectVolumetric = 2,
    /// Environment light on surface voxels
    EnvironmentSurface = 3,
    /// Environment light in every voxel
    EnvironmentVolumetric = 4,
    /// Bounce gather on surface voxels
    BounceSurface = 5,
    /// Bounce gather in every voxel
    BounceVolumetric = 6,
}

impl TraceStage {
    /// Noise seed of sample dispatch `iteration`
    #[inline]
    pub fn seed(self, iteration: u32) -> u32 {
        pcg_hash(iteration.wrapping_mul(0x9E37_79B9) ^ pcg_hash(self as u32))
    }
}

/// Per-voxel random stream
#[derive(Debug, Clone, Copy)]
pub struct Rng(u32);

impl Rng {
    /// Stream for one voxel in one sample dispatch
    #[inline]
    pub fn new(voxel_index: u32, seed: u32) -> Self {
        Rng(pcg_hash(voxel_index ^ seed))
    }

    /// Next raw value
    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        self.0 = pcg_hash(self.0);
        self.0
    }

    /// Uniform in `[0, 1)`
    #[inline]
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u32() >> 8) as f32 * (1.0 / 16_777_216.0)
    }

    /// Two uniforms in `[0, 1)`
    #[inline]
    pub fn next_vec2(&mut self) -> Vec2 {
        Vec2::new(self.next_f32(), self.next_f32())
    }

    /// Three uniforms in `[0, 1)`
    #[inline]
    pub fn next_vec3(&mut self) -> Vec3 {
        Vec3::new(self.next_f32(), self.next_f32(), self.next_f32())
    }
}

/// Orthonormal tangent and bitangent for a unit normal
#[inline]
pub fn make_orthonormal_basis(normal: Vec3) -> (Vec3, Vec3) {
    let up = if normal.y.abs() < 0.9 { Vec3::Y } else { Vec3::X };
    let tangent = normal.cross(up).normalize();
    let bitangent = tangent.cross(normal).normalize();
    (tangent, bitangent)
}

/// Cosine-weighted direction around `normal`
#[inline]
pub fn cosine_hemisphere(normal: Vec3, u: Vec2) -> Vec3 {
    let (t, b) = make_orthonormal_basis(normal);
    let r = u.x.sqrt();
    let phi = std::f32::consts::TAU * u.y;
    (t * (r * phi.cos()) + b * (r * phi.sin()) + normal * (1.0 - u.x).max(0.0).sqrt()).normalize()
}

/// Uniform direction on the unit sphere
#[inline]
pub fn uniform_sphere(u: Vec2) -> Vec3 {
    let z = 1.0 - 2.0 * u.x;
    let r = (1.0 - z * z).max(0.0).sqrt();
    let phi = std::f32::consts::TAU * u.y;
    Vec3::new(r * phi.cos(), r * phi.sin(), z)
}

/// Uniform direction inside the cone of half-angle `acos(cos_max)` around `axis`
#[inline]
pub fn uniform_cone(axis: Vec3, cos_max: f32, u: Vec2) -> Vec3 {
    let cos_theta = 1.0 - u.x * (1.0 - cos_max);
    if cos_theta >= 1.0 {
        return axis;
    }
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
    let phi = std::f32::consts::TAU * u.y;
    let (t, b) = make_orthonormal_basis(axis);
    (t * (sin_theta * phi.cos()) + b * (sin_theta * phi.sin()) + axis * cos_theta).normalize()
}

/// Uniform point inside the unit ball
#[inline]
pub fn uniform_ball(u: Vec3) -> Vec3 {
    uniform_sphere(u.truncate()) * u.z.cbrt()
}

/// Ray-march distances in voxel units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarchSettings {
    /// Distance skipped before the first sample
    pub surface_offset: f32,
    /// Distance between samples
    pub ray_step: f32,
    /// Upper bound on any march
    pub max_distance: f32,
}

impl Default for MarchSettings {
    fn default() -> Self {
        Self {
            surface_offset: 1.0,
            ray_step: 0.5,
            max_distance: 64.0,
        }
    }
}

/// Coverage march through the albedo volume
pub struct VoxelMarcher<'v> {
    coverage: &'v TexelVolume,
    settings: MarchSettings,
    unit: f32,
}

impl<'v> VoxelMarcher<'v> {
    /// Marcher over `albedo` alpha
    pub fn new(albedo: &'v TexelVolume, settings: MarchSettings) -> Self {
        let unit = albedo.grid.min_voxel_size();
        Self {
            coverage: albedo,
            settings: MarchSettings {
                ray_step: settings.ray_step.max(0.05),
                ..settings
            },
            unit,
        }
    }

    /// Grid being marched
    pub fn grid(&self) -> &VoxelGrid {
        &self.coverage.grid
    }

    /// Transmittance from `origin` (inside voxel `from`) along `dir` for up to
    /// `distance` world units; `jitter ∈ [0, 1)` shifts the first sample by a
    /// fraction of a step
    pub fn transmittance(&self, from: UVec3, origin: Vec3, dir: Vec3, distance: f32, jitter: f32) -> f32 {
        let mut t_total = 1.0;
        self.walk(from, origin, dir, distance, jitter, |alpha, _| {
            t_total *= 1.0 - alpha;
            t_total >= OPAQUE_THRESHOLD
        });
        if t_total < OPAQUE_THRESHOLD {
            0.0
        } else {
            t_total
        }
    }

    /// Front-to-back composite of `source` along the ray:
    /// `sum += T * alpha * source(hit)`, `T *= 1 - alpha`
    pub fn gather(&self, from: UVec3, origin: Vec3, dir: Vec3, jitter: f32, source: &TexelVolume) -> Vec3 {
        let mut t_total = 1.0f32;
        let mut sum = Vec3::ZERO;
        let distance = self.settings.max_distance * self.unit;
        self.walk(from, origin, dir, distance, jitter, |alpha, idx| {
            sum += source.data[idx].truncate() * alpha * t_total;
            t_total *= 1.0 - alpha;
            t_total >= OPAQUE_THRESHOLD
        });
        sum
    }

    /// Visit covered voxels along the ray; `visit(alpha, index)` returns false to stop
    fn walk<F>(&self, from: UVec3, origin: Vec3, dir: Vec3, distance: f32, jitter: f32, mut visit: F)
    where
        F: FnMut(f32, usize) -> bool,
    {
        let grid = &self.coverage.grid;
        let step = self.settings.ray_step * self.unit;
        let limit = distance.min(self.settings.max_distance * self.unit);
        let mut t = self.settings.surface_offset * self.unit + jitter * step;
        let mut last = None;
        while t < limit {
            let Some(v) = grid.world_to_voxel(origin + dir * t) else {
                return;
            };
            t += step;
            if v == from || last == Some(v) {
                continue;
            }
            last = Some(v);
            let idx = grid.index(v.x, v.y, v.z);
            let alpha = self.coverage.data[idx].w.clamp(0.0, 1.0);
            if alpha <= 0.0 {
                continue;
            }
            if !visit(alpha, idx) {
                return;
            }
        }
    }
}

/// Running per-voxel sum of sample dispatches
///
/// RGB accumulates; alpha is overwritten by each dispatch. The mean is
/// `sum / samples`, independent of the order samples were added in.
pub struct SampleAccumulator {
    sum: TexelVolume,
    samples: u32,
}

impl SampleAccumulator {
    /// Empty accumulator over `grid`
    pub fn new(grid: &VoxelGrid) -> Self {
        Self {
            sum: Volume3D::new(*grid),
            samples: 0,
        }
    }

    /// Sample dispatches added so far
    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// One sample dispatch; `f` returns `rgb` to add and the alpha to store,
    /// or `None` to leave the voxel untouched
    pub fn add_sample<F>(&mut self, dispatcher: &Dispatcher, kernel: &KernelDesc, f: F) -> BakeResult<()>
    where
        F: Fn(UVec3) -> Option<Vec4> + Sync,
    {
        dispatcher.dispatch_into(kernel, &mut self.sum, |v, t| {
            if let Some(c) = f(v) {
                *t = (t.truncate() + c.truncate()).extend(c.w);
            }
        })?;
        self.samples += 1;
        Ok(())
    }

    /// `sum / samples` through the scale kernel
    pub fn finish(self, dispatcher: &Dispatcher, library: &KernelLibrary) -> BakeResult<TexelVolume> {
        if self.samples <= 1 {
            return Ok(self.sum);
        }
        let scale = library.require(kernel_names::SCALE)?;
        let mean = dispatcher.kernels().scale(&self.sum, 1.0 / self.samples as f32)?;
        dispatcher.record(scale)?;
        Ok(mean)
    }
}

/// Hermite smoothstep
#[inline]
pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    if edge1 <= edge0 {
        return if x >= edge1 { 1.0 } else { 0.0 };
    }
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::CpuKernels;

    fn grid(res: u32) -> VoxelGrid {
        VoxelGrid::new(Vec3::ZERO, Vec3::splat(res as f32), UVec3::splat(res)).unwrap()
    }

    #[test]
    fn test_rng_range_and_determinism() {
        let mut a = Rng::new(17, TraceStage::DirectSurface.seed(3));
        let mut b = Rng::new(17, TraceStage::DirectSurface.seed(3));
        for _ in 0..1000 {
            let x = a.next_f32();
            assert!((0.0..1.0).contains(&x));
            assert_eq!(x, b.next_f32());
        }
        assert_ne!(TraceStage::DirectSurface.seed(0), TraceStage::DirectSurface.seed(1));
        assert_ne!(TraceStage::DirectSurface.seed(0), TraceStage::BounceSurface.seed(0));
    }

    #[test]
    fn test_sampling_domains() {
        let mut rng = Rng::new(5, 99);
        let n = Vec3::new(0.3, 0.8, -0.2).normalize();
        let axis = Vec3::NEG_Y;
        let cos_max = 0.2f32.cos();
        for _ in 0..500 {
            let h = cosine_hemisphere(n, rng.next_vec2());
            assert!((h.length() - 1.0).abs() < 1e-4);
            assert!(h.dot(n) >= -1e-4);
            let s = uniform_sphere(rng.next_vec2());
            assert!((s.length() - 1.0).abs() < 1e-4);
            let c = uniform_cone(axis, cos_max, rng.next_vec2());
            assert!(c.dot(axis) >= cos_max - 1e-4);
            assert!(uniform_ball(rng.next_vec3()).length() <= 1.0 + 1e-4);
        }
        assert_eq!(uniform_cone(axis, 1.0, Vec2::new(0.7, 0.3)), axis);
    }

    #[test]
    fn test_empty_voxels_never_occlude() {
        let g = grid(8);
        let mut albedo = Volume3D::new(g);
        // colour without coverage
        for t in &mut albedo.data {
            *t = Vec4::new(1.0, 1.0, 1.0, 0.0);
        }
        let m = VoxelMarcher::new(&albedo, MarchSettings::default());
        let from = UVec3::new(0, 4, 4);
        let t = m.transmittance(from, g.voxel_center(0, 4, 4), Vec3::X, 100.0, 0.3);
        assert_eq!(t, 1.0);
    }

    #[test]
    fn test_covered_voxel_blocks() {
        let g = grid(8);
        let mut albedo = Volume3D::new(g);
        albedo.set(4, 4, 4, Vec4::ONE);
        let m = VoxelMarcher::new(&albedo, MarchSettings::default());
        let from = UVec3::new(0, 4, 4);
        let origin = g.voxel_center(0, 4, 4);
        assert_eq!(m.transmittance(from, origin, Vec3::X, 100.0, 0.0), 0.0);
        // stops short of the blocker
        assert_eq!(m.transmittance(from, origin, Vec3::X, 2.0, 0.0), 1.0);
        // own voxel is skipped
        let own = UVec3::new(4, 4, 4);
        assert_eq!(m.transmittance(own, g.voxel_center(4, 4, 4), Vec3::X, 100.0, 0.0), 1.0);
    }

    #[test]
    fn test_half_covered_voxel_halves() {
        let g = grid(8);
        let mut albedo = Volume3D::new(g);
        albedo.set(3, 4, 4, Vec4::new(1.0, 1.0, 1.0, 0.5));
        let m = VoxelMarcher::new(&albedo, MarchSettings::default());
        let t = m.transmittance(UVec3::new(0, 4, 4), g.voxel_center(0, 4, 4), Vec3::X, 100.0, 0.5);
        assert!((t - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_gather_first_hit() {
        let g = grid(8);
        let mut albedo = Volume3D::new(g);
        albedo.set(5, 4, 4, Vec4::ONE);
        albedo.set(6, 4, 4, Vec4::ONE);
        let mut source = Volume3D::new(g);
        source.set(5, 4, 4, Vec4::new(2.0, 0.0, 0.0, 1.0));
        source.set(6, 4, 4, Vec4::new(0.0, 7.0, 0.0, 1.0));
        let m = VoxelMarcher::new(&albedo, MarchSettings::default());
        let c = m.gather(UVec3::new(1, 4, 4), g.voxel_center(1, 4, 4), Vec3::X, 0.0, &source);
        assert_eq!(c, Vec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn test_accumulator_mean_is_order_free() {
        let g = grid(4);
        let cpu = CpuKernels;
        let d = Dispatcher::new(&cpu, 100, false);
        let lib = KernelLibrary::standard();
        let kernel = lib.require(kernel_names::DIRECT_VOLUMETRIC).unwrap();
        let run = |order: &[u32]| {
            let mut acc = SampleAccumulator::new(&g);
            for &k in order {
                acc.add_sample(&d, kernel, |v| {
                    let mut rng = Rng::new(g.index(v.x, v.y, v.z) as u32, TraceStage::DirectVolumetric.seed(k));
                    Some(rng.next_vec3().extend(1.0))
                })
                .unwrap();
            }
            acc.finish(&d, &lib).unwrap()
        };
        let forward = run(&[0, 1, 2, 3, 4, 5]);
        let shuffled = run(&[4, 1, 5, 0, 3, 2]);
        assert!(forward.max_difference(&shuffled) < 1e-5);
        assert!(forward.data.iter().all(|t| t.w == 1.0));
    }

    #[test]
    fn test_smoothstep_edges() {
        assert_eq!(smoothstep(0.0, 1.0, -1.0), 0.0);
        assert_eq!(smoothstep(0.0, 1.0, 2.0), 1.0);
        assert!((smoothstep(0.0, 1.0, 0.5) - 0.5).abs() < 1e-6);
        assert_eq!(smoothstep(0.5, 0.5, 0.6), 1.0);
    }
}
