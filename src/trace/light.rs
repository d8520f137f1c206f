//! Flattened light records
//!
//! [`LightBuffers`] turns the host's [`SceneLight`] list into four Pod arrays,
//! one per light type, laid out the way a compute shader would bind them.
//! A fresh set is built for every tracer invocation and released when the
//! scope ends.

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::scene::SceneLight;

/// Distance falloff applied to point, spot and area lights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AttenuationModel {
    /// `1 / (1 + 25 r²) * clamp((1 - r²) * 5, 0, 1)` with `r = d / range`
    #[default]
    EngineDefault,
    /// `1 / max(d², 1e-4)`
    InverseSquare,
    /// `1 - d / range`
    Linear,
}

impl AttenuationModel {
    /// Attenuation at distance `d`; zero at or beyond `range`
    #[inline]
    pub fn attenuate(self, d: f32, range: f32) -> f32 {
        if range <= 0.0 || d >= range {
            return 0.0;
        }
        let r = d / range;
        match self {
            AttenuationModel::EngineDefault => {
                let r2 = r * r;
                1.0 / (1.0 + 25.0 * r2) * ((1.0 - r2) * 5.0).clamp(0.0, 1.0)
            }
            AttenuationModel::InverseSquare => 1.0 / (d * d).max(1e-4),
            AttenuationModel::Linear => 1.0 - r,
        }
    }
}

/// Directional light record
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuDirectionalLight {
    /// xyz: unit direction toward the light, w: cone half-angle (radians)
    pub to_light_softness: Vec4,
    /// rgb: premultiplied radiance
    pub color: Vec4,
}

/// Point light record
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuPointLight {
    /// xyz: position, w: range
    pub position_range: Vec4,
    /// rgb: premultiplied radiance, w: emitter radius
    pub color_softness: Vec4,
}

/// Spot light record
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuSpotLight {
    /// xyz: position, w: range
    pub position_range: Vec4,
    /// xyz: unit cone axis, w: cos of the outer half-angle
    pub direction_cos_outer: Vec4,
    /// rgb: premultiplied radiance, w: emitter radius
    pub color_softness: Vec4,
    /// x: cos of the inner half-angle
    pub params: Vec4,
}

/// Rectangular area light record
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuAreaLight {
    /// xyz: centre, w: range
    pub position_range: Vec4,
    /// xyz: unit emission normal, w: width
    pub normal_width: Vec4,
    /// xyz: unit tangent, w: height
    pub tangent_height: Vec4,
    /// rgb: premultiplied radiance
    pub color: Vec4,
}

/// Light records of one tracer invocation
#[derive(Debug, Default)]
pub struct LightBuffers {
    /// Directional lights
    pub directional: Vec<GpuDirectionalLight>,
    /// Point lights
    pub point: Vec<GpuPointLight>,
    /// Spot lights
    pub spot: Vec<GpuSpotLight>,
    /// Area lights
    pub area: Vec<GpuAreaLight>,
}

impl LightBuffers {
    /// Flatten `lights`; every colour is multiplied by `intensity` on top of the
    /// light's own intensity
    pub fn build(lights: &[SceneLight], intensity: f32) -> Self {
        let mut buffers = LightBuffers::default();
        for light in lights {
            let color = (light.radiance() * intensity).extend(0.0);
            match *light {
                SceneLight::Directional {
                    direction,
                    shadow_softness,
                    ..
                } => {
                    let Some(to_light) = (-direction).try_normalize() else {
                        debug!("skipping directional light without direction");
                        continue;
                    };
                    buffers.directional.push(GpuDirectionalLight {
                        to_light_softness: to_light.extend(shadow_softness.max(0.0)),
                        color,
                    });
                }
                SceneLight::Point {
                    position,
                    range,
                    shadow_softness,
                    ..
                } => buffers.point.push(GpuPointLight {
                    position_range: position.extend(range),
                    color_softness: color.truncate().extend(shadow_softness.max(0.0)),
                }),
                SceneLight::Spot {
                    position,
                    direction,
                    range,
                    spot_angle,
                    inner_spot_angle,
                    shadow_softness,
                    ..
                } => {
                    let Some(axis) = direction.try_normalize() else {
                        debug!("skipping spot light without direction");
                        continue;
                    };
                    let outer = (spot_angle * 0.5).to_radians();
                    let inner = (inner_spot_angle * 0.5).to_radians().min(outer);
                    buffers.spot.push(GpuSpotLight {
                        position_range: position.extend(range),
                        direction_cos_outer: axis.extend(outer.cos()),
                        color_softness: color.truncate().extend(shadow_softness.max(0.0)),
                        params: Vec4::new(inner.cos(), 0.0, 0.0, 0.0),
                    });
                }
                SceneLight::Area {
                    position,
                    direction,
                    tangent,
                    size,
                    range,
                    ..
                } => {
                    let Some(normal) = direction.try_normalize() else {
                        debug!("skipping area light without direction");
                        continue;
                    };
                    // re-orthogonalize the tangent against the normal
                    let tangent = (tangent - normal * tangent.dot(normal))
                        .try_normalize()
                        .unwrap_or_else(|| crate::trace::make_orthonormal_basis(normal).0);
                    buffers.area.push(GpuAreaLight {
                        position_range: position.extend(range),
                        normal_width: normal.extend(size.x.max(0.0)),
                        tangent_height: tangent.extend(size.y.max(0.0)),
                        color,
                    });
                }
            }
        }
        debug!(
            "light buffers: {} directional, {} point, {} spot, {} area ({} bytes)",
            buffers.directional.len(),
            buffers.point.len(),
            buffers.spot.len(),
            buffers.area.len(),
            buffers.byte_size()
        );
        buffers
    }

    /// Total number of records
    pub fn len(&self) -> usize {
        self.directional.len() + self.point.len() + self.spot.len() + self.area.len()
    }

    /// True when no light of any type is present
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the four arrays as uploaded
    pub fn byte_size(&self) -> usize {
        bytemuck::cast_slice::<_, u8>(&self.directional).len()
            + bytemuck::cast_slice::<_, u8>(&self.point).len()
            + bytemuck::cast_slice::<_, u8>(&self.spot).len()
            + bytemuck::cast_slice::<_, u8>(&self.area).len()
    }
}

impl Drop for LightBuffers {
    fn drop(&mut self) {
        if !self.is_empty() {
            debug!("released {} light records ({} bytes)", self.len(), self.byte_size());
        }
    }
}

/// Bitangent of an area light
#[inline]
pub fn area_bitangent(light: &GpuAreaLight) -> Vec3 {
    light.normal_width.truncate().cross(light.tangent_height.truncate())
}
