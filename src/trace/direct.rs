//! Direct light tracer
//!
//! Per sample dispatch, every voxel draws one shadow ray per light toward a
//! jittered point on the light and marches it through the coverage volume.
//! The surface variant lights covered voxels only and applies `max(0, n·l)`;
//! the volumetric variant lights every voxel isotropically.

use glam::{UVec3, Vec3, Vec4};

use super::light::{area_bitangent, AttenuationModel, LightBuffers};
use super::{
    smoothstep, uniform_ball, uniform_cone, MarchSettings, Rng, SampleAccumulator, TraceStage, VoxelMarcher,
};
use crate::dispatch::{kernel_names, Dispatcher, KernelLibrary};
use crate::error::BakeResult;
use crate::scene::SceneLight;
use crate::volume::TexelVolume;

/// Direct tracer settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectSettings {
    /// Sample dispatches for the surface buffer
    pub surface_samples: u32,
    /// Sample dispatches for the volumetric buffer
    pub volumetric_samples: u32,
    /// Global multiplier on every light
    pub intensity: f32,
    /// Falloff of local lights
    pub attenuation: AttenuationModel,
    /// Shadow-ray march
    pub march: MarchSettings,
}

impl Default for DirectSettings {
    fn default() -> Self {
        Self {
            surface_samples: 8,
            volumetric_samples: 8,
            intensity: 1.0,
            attenuation: AttenuationModel::EngineDefault,
            march: MarchSettings::default(),
        }
    }
}

/// Surface and volumetric direct lighting
pub struct DirectLightTracer<'a> {
    dispatcher: &'a Dispatcher<'a>,
    library: &'a KernelLibrary,
    settings: DirectSettings,
}

struct Shading<'v> {
    marcher: VoxelMarcher<'v>,
    attenuation: AttenuationModel,
    lights: &'v LightBuffers,
}

impl Shading<'_> {
    /// Sum of all light contributions reaching `p` (in voxel `v`), with optional
    /// cosine weighting by `n`
    fn evaluate(&self, v: UVec3, p: Vec3, n: Option<Vec3>, rng: &mut Rng) -> Vec3 {
        let cosine = |l: Vec3| n.map_or(1.0, |n| n.dot(l).max(0.0));
        let mut sum = Vec3::ZERO;

        for light in &self.lights.directional {
            let axis = light.to_light_softness.truncate();
            let l = uniform_cone(axis, light.to_light_softness.w.cos(), rng.next_vec2());
            let c = cosine(l);
            let jitter = rng.next_f32();
            if c <= 0.0 {
                continue;
            }
            let t = self.marcher.transmittance(v, p, l, f32::INFINITY, jitter);
            sum += light.color.truncate() * c * t;
        }

        for light in &self.lights.point {
            let target = light.position_range.truncate() + uniform_ball(rng.next_vec3()) * light.color_softness.w;
            let jitter = rng.next_f32();
            sum += self.local(v, p, target, light.position_range.w, jitter, &cosine, |_| 1.0)
                * light.color_softness.truncate();
        }

        for light in &self.lights.spot {
            let target = light.position_range.truncate() + uniform_ball(rng.next_vec3()) * light.color_softness.w;
            let jitter = rng.next_f32();
            let axis = light.direction_cos_outer.truncate();
            let (cos_outer, cos_inner) = (light.direction_cos_outer.w, light.params.x);
            sum += self.local(v, p, target, light.position_range.w, jitter, &cosine, |l| {
                smoothstep(cos_outer, cos_inner, (-l).dot(axis))
            }) * light.color_softness.truncate();
        }

        for light in &self.lights.area {
            let u = rng.next_vec2() - 0.5;
            let normal = light.normal_width.truncate();
            let target = light.position_range.truncate()
                + light.tangent_height.truncate() * (u.x * light.normal_width.w)
                + area_bitangent(light) * (u.y * light.tangent_height.w);
            let jitter = rng.next_f32();
            sum += self.local(v, p, target, light.position_range.w, jitter, &cosine, |l| {
                normal.dot(-l).max(0.0)
            }) * light.color.truncate();
        }

        sum
    }

    /// Attenuated, shaped and shadowed contribution of a light sample at `target`
    #[allow(clippy::too_many_arguments)]
    fn local(
        &self,
        v: UVec3,
        p: Vec3,
        target: Vec3,
        range: f32,
        jitter: f32,
        cosine: &dyn Fn(Vec3) -> f32,
        shape: impl Fn(Vec3) -> f32,
    ) -> f32 {
        let to = target - p;
        let d = to.length();
        if d <= 1e-6 {
            return 0.0;
        }
        let l = to / d;
        let weight = self.attenuation.attenuate(d, range) * shape(l) * cosine(l);
        if weight <= 0.0 {
            return 0.0;
        }
        weight * self.marcher.transmittance(v, p, l, d, jitter)
    }
}

impl<'a> DirectLightTracer<'a> {
    /// Create a tracer
    pub fn new(dispatcher: &'a Dispatcher<'a>, library: &'a KernelLibrary, settings: DirectSettings) -> Self {
        Self {
            dispatcher,
            library,
            settings,
        }
    }

    /// Direct light on covered voxels, weighted by `max(0, n·l)`
    pub fn trace_surface(
        &self,
        albedo: &TexelVolume,
        normal: &TexelVolume,
        lights: &[SceneLight],
    ) -> BakeResult<TexelVolume> {
        let order: Vec<u32> = (0..self.settings.surface_samples.max(1)).collect();
        self.trace_surface_samples(albedo, normal, lights, &order)
    }

    /// Surface variant over an explicit list of sample iterations
    pub fn trace_surface_samples(
        &self,
        albedo: &TexelVolume,
        normal: &TexelVolume,
        lights: &[SceneLight],
        iterations: &[u32],
    ) -> BakeResult<TexelVolume> {
        crate::kernels::ensure_same_grid("normal", albedo, normal)?;
        let kernel = self.library.require(kernel_names::DIRECT_SURFACE)?;
        let lights = LightBuffers::build(lights, self.settings.intensity);
        let shading = Shading {
            marcher: VoxelMarcher::new(albedo, self.settings.march),
            attenuation: self.settings.attenuation,
            lights: &lights,
        };
        let grid = albedo.grid;

        let mut acc = SampleAccumulator::new(&grid);
        for &k in iterations {
            let seed = TraceStage::DirectSurface.seed(k);
            acc.add_sample(self.dispatcher, kernel, |v| {
                let idx = grid.index(v.x, v.y, v.z);
                let a = albedo.data[idx].w;
                if a <= 0.0 {
                    return None;
                }
                let n = normal.data[idx].truncate().normalize_or_zero();
                let mut rng = Rng::new(idx as u32, seed);
                let c = shading.evaluate(v, grid.voxel_center(v.x, v.y, v.z), Some(n), &mut rng);
                Some(c.extend(a))
            })?;
        }
        acc.finish(self.dispatcher, self.library)
    }

    /// Isotropic direct light in every voxel
    pub fn trace_volumetric(&self, albedo: &TexelVolume, lights: &[SceneLight]) -> BakeResult<TexelVolume> {
        let order: Vec<u32> = (0..self.settings.volumetric_samples.max(1)).collect();
        self.trace_volumetric_samples(albedo, lights, &order)
    }

    /// Volumetric variant over an explicit list of sample iterations
    pub fn trace_volumetric_samples(
        &self,
        albedo: &TexelVolume,
        lights: &[SceneLight],
        iterations: &[u32],
    ) -> BakeResult<TexelVolume> {
        let kernel = self.library.require(kernel_names::DIRECT_VOLUMETRIC)?;
        let lights = LightBuffers::build(lights, self.settings.intensity);
        let shading = Shading {
            marcher: VoxelMarcher::new(albedo, self.settings.march),
            attenuation: self.settings.attenuation,
            lights: &lights,
        };
        let grid = albedo.grid;

        let mut acc = SampleAccumulator::new(&grid);
        for &k in iterations {
            let seed = TraceStage::DirectVolumetric.seed(k);
            acc.add_sample(self.dispatcher, kernel, |v| {
                let idx = grid.index(v.x, v.y, v.z);
                let mut rng = Rng::new(idx as u32, seed);
                let c = shading.evaluate(v, grid.voxel_center(v.x, v.y, v.z), None, &mut rng);
                Some(c.extend(1.0))
            })?;
        }
        acc.finish(self.dispatcher, self.library)
    }
}

/// Volume whose covered voxels form a horizontal plane at `y = layer`
#[cfg(test)]
pub(crate) fn plane_volumes(res: u32, layer: u32) -> (TexelVolume, TexelVolume) {
    use crate::grid::VoxelGrid;
    use crate::volume::Volume3D;
    let grid = VoxelGrid::new(Vec3::ZERO, Vec3::splat(res as f32), UVec3::splat(res)).unwrap();
    let mut albedo = Volume3D::new(grid);
    let mut normal = Volume3D::new(grid);
    for z in 0..res {
        for x in 0..res {
            albedo.set(x, layer, z, Vec4::new(0.8, 0.8, 0.8, 1.0));
            normal.set(x, layer, z, Vec4::new(0.0, 1.0, 0.0, 1.0));
        }
    }
    (albedo, normal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::CpuKernels;

    fn sun(direction: Vec3, softness: f32) -> SceneLight {
        SceneLight::Directional {
            direction,
            color: Vec3::new(1.0, 0.5, 0.25),
            intensity: 2.0,
            shadow_softness: softness,
        }
    }

    fn with_tracer<R>(settings: DirectSettings, f: impl FnOnce(&DirectLightTracer) -> R) -> R {
        let cpu = CpuKernels;
        let d = Dispatcher::new(&cpu, 1000, false);
        let lib = KernelLibrary::standard();
        let tracer = DirectLightTracer::new(&d, &lib, settings);
        f(&tracer)
    }

    #[test]
    fn test_sun_on_plane_is_exact() {
        let (albedo, normal) = plane_volumes(6, 1);
        let settings = DirectSettings {
            surface_samples: 1,
            ..Default::default()
        };
        let out = with_tracer(settings, |t| t.trace_surface(&albedo, &normal, &[sun(Vec3::NEG_Y, 0.0)]).unwrap());
        let expected = Vec3::new(2.0, 1.0, 0.5);
        for z in 0..6 {
            for x in 0..6 {
                let c = out.get(x, 1, z);
                assert!((c.truncate() - expected).abs().max_element() < 1e-5);
                assert_eq!(c.w, 1.0);
            }
        }
        // empty voxels receive no surface light
        assert_eq!(out.get(0, 3, 0), Vec4::ZERO);
    }

    #[test]
    fn test_oblique_sun_uses_cosine() {
        let (albedo, normal) = plane_volumes(6, 0);
        let dir = Vec3::new(1.0, -1.0, 0.0).normalize();
        let out = with_tracer(DirectSettings::default(), |t| {
            t.trace_surface(&albedo, &normal, &[sun(dir, 0.0)]).unwrap()
        });
        let c = out.get(2, 0, 2).x;
        assert!((c - 2.0 * std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-4);
    }

    #[test]
    fn test_volumetric_shadowed_below_plane() {
        let (albedo, _) = plane_volumes(6, 3);
        let out = with_tracer(DirectSettings::default(), |t| {
            t.trace_volumetric(&albedo, &[sun(Vec3::NEG_Y, 0.0)]).unwrap()
        });
        assert!((out.get(2, 5, 2).x - 2.0).abs() < 1e-5);
        assert_eq!(out.get(2, 1, 2).truncate(), Vec3::ZERO);
        assert_eq!(out.get(2, 1, 2).w, 1.0);
    }

    #[test]
    fn test_sample_order_does_not_matter() {
        let (albedo, normal) = plane_volumes(6, 2);
        let lights = [
            SceneLight::Point {
                position: Vec3::new(0.3, 2.5, -0.2),
                color: Vec3::ONE,
                intensity: 3.0,
                range: 6.0,
                shadow_softness: 0.5,
            },
            sun(Vec3::new(0.2, -1.0, 0.1), 0.2),
        ];
        let (a, b) = with_tracer(DirectSettings::default(), |t| {
            let a = t.trace_surface_samples(&albedo, &normal, &lights, &[0, 1, 2, 3, 4, 5, 6, 7]).unwrap();
            let b = t.trace_surface_samples(&albedo, &normal, &lights, &[7, 3, 5, 1, 0, 6, 2, 4]).unwrap();
            (a, b)
        });
        assert!(a.max_difference(&b) < 1e-5);
        assert!(a.total_rgb().x > 0.0);
    }

    #[test]
    fn test_spot_cone_and_range() {
        let (albedo, normal) = plane_volumes(8, 0);
        let spot = SceneLight::Spot {
            position: Vec3::new(0.5, 0.5, 0.5),
            direction: Vec3::NEG_Y,
            color: Vec3::ONE,
            intensity: 1.0,
            range: 6.0,
            spot_angle: 30.0,
            inner_spot_angle: 20.0,
            shadow_softness: 0.0,
        };
        let out = with_tracer(DirectSettings::default(), |t| {
            t.trace_surface(&albedo, &normal, &[spot]).unwrap()
        });
        // voxel (4, 0, 4) sits right under the light
        assert!(out.get(4, 0, 4).x > 0.0);
        // far outside the cone
        assert_eq!(out.get(0, 0, 0).x, 0.0);
    }

    #[test]
    fn test_area_light_is_one_sided() {
        let (albedo, normal) = plane_volumes(8, 0);
        let area = |direction: Vec3| SceneLight::Area {
            position: Vec3::new(0.0, 0.0, 0.0),
            direction,
            tangent: Vec3::X,
            size: glam::Vec2::splat(1.0),
            color: Vec3::ONE,
            intensity: 1.0,
            range: 10.0,
        };
        let (down, up) = with_tracer(DirectSettings::default(), |t| {
            (
                t.trace_surface(&albedo, &normal, &[area(Vec3::NEG_Y)]).unwrap(),
                t.trace_surface(&albedo, &normal, &[area(Vec3::Y)]).unwrap(),
            )
        });
        assert!(down.get(4, 0, 4).x > 0.0);
        assert_eq!(up.total_rgb(), Vec3::ZERO);
    }

    #[test]
    fn test_no_lights_is_black() {
        let (albedo, normal) = plane_volumes(4, 0);
        let out = with_tracer(DirectSettings::default(), |t| t.trace_surface(&albedo, &normal, &[]).unwrap());
        assert_eq!(out.total_rgb(), Vec3::ZERO);
        assert_eq!(out.covered_count(), 16);
    }
}
