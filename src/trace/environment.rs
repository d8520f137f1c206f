//! Environment light tracer
//!
//! Samples the captured environment through the coverage volume. Surface
//! voxels gather over a cosine hemisphere around their normal, or over the
//! whole sphere without cosine weighting when normal orientation is off.
//! Volumetric voxels always gather over the whole sphere.

use glam::Vec3;

use super::{cosine_hemisphere, uniform_sphere, MarchSettings, Rng, SampleAccumulator, TraceStage, VoxelMarcher};
use crate::dispatch::{kernel_names, Dispatcher, KernelLibrary};
use crate::environment::EnvironmentSource;
use crate::error::BakeResult;
use crate::volume::TexelVolume;

/// Environment tracer settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvironmentSettings {
    /// Sample dispatches for the surface buffer
    pub surface_samples: u32,
    /// Sample dispatches for the volumetric buffer
    pub volumetric_samples: u32,
    /// Multiplier on environment radiance
    pub intensity: f32,
    /// Orient surface samples by the voxel normal
    pub normal_oriented_hemisphere: bool,
    /// Visibility march
    pub march: MarchSettings,
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            surface_samples: 16,
            volumetric_samples: 16,
            intensity: 1.0,
            normal_oriented_hemisphere: true,
            march: MarchSettings::default(),
        }
    }
}

/// Surface and volumetric environment lighting
pub struct EnvironmentLightTracer<'a> {
    dispatcher: &'a Dispatcher<'a>,
    library: &'a KernelLibrary,
    settings: EnvironmentSettings,
}

impl<'a> EnvironmentLightTracer<'a> {
    /// Create a tracer
    pub fn new(dispatcher: &'a Dispatcher<'a>, library: &'a KernelLibrary, settings: EnvironmentSettings) -> Self {
        Self {
            dispatcher,
            library,
            settings,
        }
    }

    /// Environment light on covered voxels
    pub fn trace_surface(
        &self,
        albedo: &TexelVolume,
        normal: &TexelVolume,
        environment: &dyn EnvironmentSource,
    ) -> BakeResult<TexelVolume> {
        let order: Vec<u32> = (0..self.settings.surface_samples.max(1)).collect();
        self.trace_surface_samples(albedo, normal, environment, &order)
    }

    /// Surface variant over an explicit list of sample iterations
    pub fn trace_surface_samples(
        &self,
        albedo: &TexelVolume,
        normal: &TexelVolume,
        environment: &dyn EnvironmentSource,
        iterations: &[u32],
    ) -> BakeResult<TexelVolume> {
        crate::kernels::ensure_same_grid("normal", albedo, normal)?;
        let kernel = self.library.require(kernel_names::ENVIRONMENT_SURFACE)?;
        let marcher = VoxelMarcher::new(albedo, self.settings.march);
        let oriented = self.settings.normal_oriented_hemisphere;
        let intensity = self.settings.intensity;
        let grid = albedo.grid;

        let mut acc = SampleAccumulator::new(&grid);
        for &k in iterations {
            let seed = TraceStage::EnvironmentSurface.seed(k);
            acc.add_sample(self.dispatcher, kernel, |v| {
                let idx = grid.index(v.x, v.y, v.z);
                let a = albedo.data[idx].w;
                if a <= 0.0 {
                    return None;
                }
                let mut rng = Rng::new(idx as u32, seed);
                let n = normal.data[idx].truncate().normalize_or_zero();
                let dir = if oriented && n != Vec3::ZERO {
                    cosine_hemisphere(n, rng.next_vec2())
                } else {
                    uniform_sphere(rng.next_vec2())
                };
                let t = marcher.transmittance(v, grid.voxel_center(v.x, v.y, v.z), dir, f32::INFINITY, rng.next_f32());
                Some((environment.radiance(dir) * intensity * t).extend(a))
            })?;
        }
        acc.finish(self.dispatcher, self.library)
    }

    /// Environment light in every voxel
    pub fn trace_volumetric(
        &self,
        albedo: &TexelVolume,
        environment: &dyn EnvironmentSource,
    ) -> BakeResult<TexelVolume> {
        let kernel = self.library.require(kernel_names::ENVIRONMENT_VOLUMETRIC)?;
        let marcher = VoxelMarcher::new(albedo, self.settings.march);
        let intensity = self.settings.intensity;
        let grid = albedo.grid;

        let mut acc = SampleAccumulator::new(&grid);
        for k in 0..self.settings.volumetric_samples.max(1) {
            let seed = TraceStage::EnvironmentVolumetric.seed(k);
            acc.add_sample(self.dispatcher, kernel, |v| {
                let idx = grid.index(v.x, v.y, v.z);
                let mut rng = Rng::new(idx as u32, seed);
                let dir = uniform_sphere(rng.next_vec2());
                let t = marcher.transmittance(v, grid.voxel_center(v.x, v.y, v.z), dir, f32::INFINITY, rng.next_f32());
                Some((environment.radiance(dir) * intensity * t).extend(1.0))
            })?;
        }
        acc.finish(self.dispatcher, self.library)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::UniformSky;
    use crate::kernels::CpuKernels;
    use crate::trace::direct::plane_volumes;

    fn with_tracer<R>(settings: EnvironmentSettings, f: impl FnOnce(&EnvironmentLightTracer) -> R) -> R {
        let cpu = CpuKernels;
        let d = Dispatcher::new(&cpu, 1000, false);
        let lib = KernelLibrary::standard();
        f(&EnvironmentLightTracer::new(&d, &lib, settings))
    }

    const SKY: UniformSky = UniformSky {
        color: Vec3::new(1.0, 2.0, 3.0),
    };

    fn lone_voxel() -> (TexelVolume, TexelVolume) {
        let (mut albedo, mut normal) = plane_volumes(6, 0);
        for t in albedo.data.iter_mut().chain(normal.data.iter_mut()) {
            *t = glam::Vec4::ZERO;
        }
        albedo.set(3, 0, 3, glam::Vec4::ONE);
        normal.set(3, 0, 3, glam::Vec4::new(0.0, 1.0, 0.0, 1.0));
        (albedo, normal)
    }

    #[test]
    fn test_open_voxel_sees_full_sky() {
        let (albedo, normal) = lone_voxel();
        let settings = EnvironmentSettings {
            intensity: 0.5,
            ..Default::default()
        };
        let out = with_tracer(settings, |t| t.trace_surface(&albedo, &normal, &SKY).unwrap());
        let c = out.get(3, 0, 3);
        assert!((c.truncate() - Vec3::new(0.5, 1.0, 1.5)).abs().max_element() < 1e-5);
        assert_eq!(out.get(3, 2, 3).w, 0.0);
    }

    #[test]
    fn test_non_oriented_samples_whole_sphere() {
        let (albedo, normal) = lone_voxel();
        let settings = EnvironmentSettings {
            normal_oriented_hemisphere: false,
            surface_samples: 64,
            ..Default::default()
        };
        let out = with_tracer(settings, |t| t.trace_surface(&albedo, &normal, &SKY).unwrap());
        // downward rays leave the grid unoccluded too, with no cosine weight
        assert!((out.get(3, 0, 3).y - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_enclosed_voxel_is_dark() {
        let (mut albedo, _) = plane_volumes(5, 0);
        for z in 0..5 {
            for y in 0..5 {
                for x in 0..5 {
                    albedo.set(x, y, z, glam::Vec4::ONE);
                }
            }
        }
        albedo.set(2, 2, 2, glam::Vec4::ZERO);
        let out = with_tracer(EnvironmentSettings::default(), |t| t.trace_volumetric(&albedo, &SKY).unwrap());
        assert_eq!(out.get(2, 2, 2).truncate(), Vec3::ZERO);
    }

    #[test]
    fn test_sample_order_does_not_matter() {
        let (albedo, normal) = plane_volumes(6, 2);
        let (a, b) = with_tracer(EnvironmentSettings::default(), |t| {
            (
                t.trace_surface_samples(&albedo, &normal, &SKY, &[0, 1, 2, 3, 4]).unwrap(),
                t.trace_surface_samples(&albedo, &normal, &SKY, &[4, 2, 0, 3, 1]).unwrap(),
            )
        });
        assert!(a.max_difference(&b) < 1e-5);
    }
}
