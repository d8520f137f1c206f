//! Environment capture
//!
//! A distant radiance source queried by direction. The bake captures the
//! configured source once into a [`Cubemap`] at `environment_resolution` and
//! the environment tracer samples that cubemap.

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::raster::Image2D;

/// Number of cubemap faces
pub const CUBE_FACE_COUNT: usize = 6;

/// Distant radiance by direction
pub trait EnvironmentSource: Send + Sync {
    /// Linear radiance arriving from `dir` (unit length)
    fn radiance(&self, dir: Vec3) -> Vec3;
}

/// Constant radiance in every direction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UniformSky {
    /// Linear radiance
    pub color: Vec3,
}

impl EnvironmentSource for UniformSky {
    fn radiance(&self, _dir: Vec3) -> Vec3 {
        self.color
    }
}

/// Three-colour sky: ground below the horizon, horizon to zenith above
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradientSky {
    /// Radiance straight up
    pub zenith: Vec3,
    /// Radiance at the horizon
    pub horizon: Vec3,
    /// Radiance below the horizon
    pub ground: Vec3,
}

impl Default for GradientSky {
    fn default() -> Self {
        Self {
            zenith: Vec3::new(0.4, 0.6, 1.0),
            horizon: Vec3::new(0.8, 0.85, 0.9),
            ground: Vec3::new(0.1, 0.08, 0.05),
        }
    }
}

impl EnvironmentSource for GradientSky {
    fn radiance(&self, dir: Vec3) -> Vec3 {
        let y = dir.y.clamp(-1.0, 1.0);
        if y >= 0.0 {
            self.horizon.lerp(self.zenith, y)
        } else {
            self.horizon.lerp(self.ground, (-y * 4.0).min(1.0))
        }
    }
}

/// Six square faces in `+X, -X, +Y, -Y, +Z, -Z` order
#[derive(Debug, Clone)]
pub struct Cubemap {
    faces: Vec<Image2D>,
    resolution: u32,
}

impl Cubemap {
    /// Build from six faces of equal square size
    pub fn from_faces(faces: Vec<Image2D>) -> Option<Self> {
        let resolution = faces.first()?.width;
        let square = faces
            .iter()
            .all(|f| f.width == resolution && f.height == resolution);
        (faces.len() == CUBE_FACE_COUNT && square && resolution > 0).then_some(Self { faces, resolution })
    }

    /// Evaluate `source` at every texel-centre direction
    pub fn capture(source: &dyn EnvironmentSource, resolution: u32) -> Self {
        let resolution = resolution.max(1);
        let faces = (0..CUBE_FACE_COUNT)
            .map(|face| {
                let mut image = Image2D::new(resolution, resolution);
                for y in 0..resolution {
                    for x in 0..resolution {
                        let st = (Vec2::new(x as f32, y as f32) + 0.5) / resolution as f32 * 2.0 - 1.0;
                        let dir = face_direction(face, st).normalize();
                        image.set(x, y, source.radiance(dir).extend(1.0));
                    }
                }
                image
            })
            .collect();
        Self { faces, resolution }
    }

    /// Edge length of one face
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// One face image
    pub fn face(&self, face: usize) -> Option<&Image2D> {
        self.faces.get(face)
    }

    /// Nearest texel in direction `dir`
    pub fn lookup(&self, dir: Vec3) -> Vec3 {
        let (face, st) = direction_to_face(dir);
        let uv = (st * 0.5 + 0.5).clamp(Vec2::ZERO, Vec2::ONE);
        self.faces[face].sample_nearest(uv).truncate()
    }
}

impl EnvironmentSource for Cubemap {
    fn radiance(&self, dir: Vec3) -> Vec3 {
        self.lookup(dir)
    }
}

/// Direction through face coordinates `st ∈ [-1, 1]²` (not normalized)
pub fn face_direction(face: usize, st: Vec2) -> Vec3 {
    let (s, t) = (st.x, st.y);
    match face {
        0 => Vec3::new(1.0, -t, -s),
        1 => Vec3::new(-1.0, -t, s),
        2 => Vec3::new(s, 1.0, t),
        3 => Vec3::new(s, -1.0, -t),
        4 => Vec3::new(s, -t, 1.0),
        _ => Vec3::new(-s, -t, -1.0),
    }
}

/// Face index and face coordinates hit by `dir`
pub fn direction_to_face(dir: Vec3) -> (usize, Vec2) {
    let a = dir.abs();
    if a.x >= a.y && a.x >= a.z {
        let m = a.x.max(1e-20);
        if dir.x >= 0.0 {
            (0, Vec2::new(-dir.z, -dir.y) / m)
        } else {
            (1, Vec2::new(dir.z, -dir.y) / m)
        }
    } else if a.y >= a.z {
        let m = a.y;
        if dir.y >= 0.0 {
            (2, Vec2::new(dir.x, dir.z) / m)
        } else {
            (3, Vec2::new(dir.x, -dir.z) / m)
        }
    } else {
        let m = a.z;
        if dir.z >= 0.0 {
            (4, Vec2::new(dir.x, -dir.y) / m)
        } else {
            (5, Vec2::new(-dir.x, -dir.y) / m)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AxisColor;

    impl EnvironmentSource for AxisColor {
        fn radiance(&self, dir: Vec3) -> Vec3 {
            dir.max(Vec3::ZERO)
        }
    }

    #[test]
    fn test_face_mapping_inverts() {
        for face in 0..CUBE_FACE_COUNT {
            for st in [Vec2::new(0.3, -0.7), Vec2::new(-0.9, 0.1), Vec2::ZERO] {
                let (f, back) = direction_to_face(face_direction(face, st));
                assert_eq!(f, face);
                assert!((back - st).length() < 1e-5, "face {} {:?} -> {:?}", face, st, back);
            }
        }
    }

    #[test]
    fn test_capture_lookup_axes() {
        let cube = Cubemap::capture(&AxisColor, 8);
        assert_eq!(cube.resolution(), 8);
        let up = cube.lookup(Vec3::Y);
        assert!(up.y > 0.9 && up.x < 0.2 && up.z < 0.2);
        let down = cube.lookup(Vec3::NEG_Y);
        assert!(down.length() < 0.2);
        let x = cube.lookup(Vec3::X);
        assert!(x.x > 0.9);
    }

    #[test]
    fn test_uniform_capture_is_flat() {
        let sky = UniformSky { color: Vec3::new(0.5, 1.0, 2.0) };
        let cube = Cubemap::capture(&sky, 2);
        for dir in [Vec3::X, Vec3::NEG_Z, Vec3::new(1.0, 1.0, -1.0).normalize()] {
            assert_eq!(cube.radiance(dir), sky.color);
        }
    }

    #[test]
    fn test_gradient_sky() {
        let sky = GradientSky::default();
        assert_eq!(sky.radiance(Vec3::Y), sky.zenith);
        assert_eq!(sky.radiance(Vec3::X), sky.horizon);
        assert_eq!(sky.radiance(Vec3::NEG_Y), sky.ground);
    }

    #[test]
    fn test_from_faces_rejects_bad_sets() {
        let faces = vec![Image2D::new(4, 4); 5];
        assert!(Cubemap::from_faces(faces).is_none());
        let mut faces = vec![Image2D::new(4, 4); 6];
        faces[3] = Image2D::new(2, 2);
        assert!(Cubemap::from_faces(faces).is_none());
        assert!(Cubemap::from_faces(vec![Image2D::new(4, 4); 6]).is_some());
    }
}
