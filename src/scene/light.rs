//! Scene light descriptions
//!
//! Lights are plain data handed over by the host. Colours are linear; the
//! tracer premultiplies `color * intensity` when it flattens them into GPU
//! light records.

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// A light as enumerated from the host scene
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SceneLight {
    /// Infinitely distant light
    Directional {
        /// Direction the light travels (normalized on use)
        direction: Vec3,
        /// Linear colour
        color: Vec3,
        /// Intensity multiplier
        intensity: f32,
        /// Cone half-angle in radians used to soften shadows
        shadow_softness: f32,
    },
    /// Omnidirectional light with finite range
    Point {
        /// World position
        position: Vec3,
        /// Linear colour
        color: Vec3,
        /// Intensity multiplier
        intensity: f32,
        /// Range beyond which the light contributes nothing
        range: f32,
        /// Emitter radius used to soften shadows
        shadow_softness: f32,
    },
    /// Cone light
    Spot {
        /// World position
        position: Vec3,
        /// Direction the cone points at
        direction: Vec3,
        /// Linear colour
        color: Vec3,
        /// Intensity multiplier
        intensity: f32,
        /// Range beyond which the light contributes nothing
        range: f32,
        /// Full outer cone angle in degrees
        spot_angle: f32,
        /// Full inner (unattenuated) cone angle in degrees
        inner_spot_angle: f32,
        /// Emitter radius used to soften shadows
        shadow_softness: f32,
    },
    /// One-sided rectangular light
    Area {
        /// Centre of the rectangle
        position: Vec3,
        /// Emission direction (rectangle normal)
        direction: Vec3,
        /// In-plane axis along which `size.x` is measured
        tangent: Vec3,
        /// Rectangle width and height
        size: Vec2,
        /// Linear colour
        color: Vec3,
        /// Intensity multiplier
        intensity: f32,
        /// Range beyond which the light contributes nothing
        range: f32,
    },
}

impl SceneLight {
    /// Short type name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            SceneLight::Directional { .. } => "directional",
            SceneLight::Point { .. } => "point",
            SceneLight::Spot { .. } => "spot",
            SceneLight::Area { .. } => "area",
        }
    }

    /// Linear colour premultiplied by intensity
    pub fn radiance(&self) -> Vec3 {
        match *self {
            SceneLight::Directional {
                color, intensity, ..
            }
            | SceneLight::Point {
                color, intensity, ..
            }
            | SceneLight::Spot {
                color, intensity, ..
            }
            | SceneLight::Area {
                color, intensity, ..
            } => color * intensity,
        }
    }
}
