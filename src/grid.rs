//! Voxel grid geometry
//!
//! A `VoxelGrid` is a regular 3D lattice over a world-space box. Voxel
//! `(i, j, k)` covers `world_min + [i, i+1) * voxel_size` on each axis and its
//! sample point is the cell centre.

use glam::{Mat4, UVec3, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::{BakeError, BakeResult};

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    /// Minimum corner
    pub min: Vec3,
    /// Maximum corner
    pub max: Vec3,
}

impl Aabb {
    /// Create a new AABB
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Aabb { min, max }
    }

    /// Create from center and full size
    pub fn from_center_size(center: Vec3, size: Vec3) -> Self {
        Aabb {
            min: center - size * 0.5,
            max: center + size * 0.5,
        }
    }

    /// Smallest box holding every point (empty input gives a zero box at origin)
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let mut iter = points.into_iter();
        let Some(first) = iter.next() else {
            return Aabb::new(Vec3::ZERO, Vec3::ZERO);
        };
        iter.fold(Aabb::new(first, first), |acc, p| Aabb {
            min: acc.min.min(p),
            max: acc.max.max(p),
        })
    }

    /// Get center point
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get size
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Length of the box diagonal
    pub fn diagonal(&self) -> f32 {
        self.size().length()
    }

    /// Check if point is inside
    pub fn contains(&self, point: Vec3) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }

    /// Check whether two boxes overlap (touching counts)
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Expand to include another AABB
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Bounds of this box after an affine transform
    pub fn transformed(&self, transform: &Mat4) -> Aabb {
        let corners = (0..8).map(|i| {
            let c = Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            transform.transform_point3(c)
        });
        Aabb::from_points(corners)
    }
}

/// Largest voxel count accepted along any axis
pub const MAX_RESOLUTION: u32 = 2048;

/// Regular voxel grid over a world-space box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoxelGrid {
    /// World-space centre of the covered box
    pub center: Vec3,
    /// World-space size of the covered box
    pub size: Vec3,
    /// Voxel count along each axis (every component >= 1)
    pub resolution: UVec3,
}

impl VoxelGrid {
    /// Create a grid with an explicit resolution (components clamped to >= 1)
    ///
    /// Resolutions above [`MAX_RESOLUTION`] on any axis are rejected.
    pub fn new(center: Vec3, size: Vec3, resolution: UVec3) -> BakeResult<Self> {
        if !(size.x > 0.0 && size.y > 0.0 && size.z > 0.0) {
            return Err(BakeError::Config(format!(
                "volume size must be positive, got {:?}",
                size
            )));
        }
        if resolution.max_element() > MAX_RESOLUTION {
            return Err(BakeError::Config(format!(
                "resolution {:?} exceeds {} voxels per axis",
                resolution, MAX_RESOLUTION
            )));
        }
        Ok(VoxelGrid {
            center,
            size,
            resolution: resolution.max(UVec3::ONE),
        })
    }

    /// Create a grid whose resolution is `floor(size / density)` per axis
    pub fn from_density(center: Vec3, size: Vec3, voxel_density_size: f32) -> BakeResult<Self> {
        if !(voxel_density_size > 0.0) {
            return Err(BakeError::Config(format!(
                "voxel density size must be positive, got {}",
                voxel_density_size
            )));
        }
        VoxelGrid::new(center, size, resolution_for_density(size, voxel_density_size))
    }

    /// World-space minimum corner
    #[inline(always)]
    pub fn world_min(&self) -> Vec3 {
        self.center - self.size * 0.5
    }

    /// World-space maximum corner
    #[inline(always)]
    pub fn world_max(&self) -> Vec3 {
        self.center + self.size * 0.5
    }

    /// World bounds of the grid
    pub fn bounds(&self) -> Aabb {
        Aabb::new(self.world_min(), self.world_max())
    }

    /// World-space size of one voxel
    #[inline(always)]
    pub fn voxel_size(&self) -> Vec3 {
        self.size / self.resolution.as_vec3()
    }

    /// Smallest voxel edge, used as the ray-march unit
    #[inline(always)]
    pub fn min_voxel_size(&self) -> f32 {
        self.voxel_size().min_element()
    }

    /// Total number of voxels
    #[inline(always)]
    pub fn voxel_count(&self) -> usize {
        self.resolution.x as usize * self.resolution.y as usize * self.resolution.z as usize
    }

    /// Total number of voxels, `None` on overflow
    pub fn checked_voxel_count(&self) -> Option<usize> {
        (self.resolution.x as usize)
            .checked_mul(self.resolution.y as usize)?
            .checked_mul(self.resolution.z as usize)
    }

    /// Resolution as a plain array
    #[inline(always)]
    pub fn resolution_array(&self) -> [u32; 3] {
        self.resolution.to_array()
    }

    /// Flat Z-major index of a voxel
    #[inline(always)]
    pub fn index(&self, x: u32, y: u32, z: u32) -> usize {
        x as usize
            + y as usize * self.resolution.x as usize
            + z as usize * self.resolution.x as usize * self.resolution.y as usize
    }

    /// Voxel coordinates of a flat index
    #[inline(always)]
    pub fn coords(&self, index: usize) -> UVec3 {
        let rx = self.resolution.x as usize;
        let ry = self.resolution.y as usize;
        UVec3::new(
            (index % rx) as u32,
            ((index / rx) % ry) as u32,
            (index / (rx * ry)) as u32,
        )
    }

    /// World-space centre of a voxel
    #[inline(always)]
    pub fn voxel_center(&self, x: u32, y: u32, z: u32) -> Vec3 {
        self.world_min() + (UVec3::new(x, y, z).as_vec3() + 0.5) * self.voxel_size()
    }

    /// Continuous grid coordinates (voxel units, 0 at `world_min`)
    #[inline(always)]
    pub fn world_to_grid(&self, p: Vec3) -> Vec3 {
        (p - self.world_min()) / self.voxel_size()
    }

    /// World position of continuous grid coordinates
    #[inline(always)]
    pub fn grid_to_world(&self, g: Vec3) -> Vec3 {
        self.world_min() + g * self.voxel_size()
    }

    /// Voxel containing a world-space point, if inside the grid
    #[inline]
    pub fn world_to_voxel(&self, p: Vec3) -> Option<UVec3> {
        let g = self.world_to_grid(p);
        if g.x < 0.0 || g.y < 0.0 || g.z < 0.0 {
            return None;
        }
        let v = g.floor().as_uvec3();
        if v.x < self.resolution.x && v.y < self.resolution.y && v.z < self.resolution.z {
            Some(v)
        } else {
            None
        }
    }

    /// Workgroup counts needed to cover the grid: `ceil(resolution / group)`
    #[inline(always)]
    pub fn dispatch_size(&self, workgroup: [u32; 3]) -> [u32; 3] {
        [
            self.resolution.x.div_ceil(workgroup[0].max(1)),
            self.resolution.y.div_ceil(workgroup[1].max(1)),
            self.resolution.z.div_ceil(workgroup[2].max(1)),
        ]
    }
}

/// Resolution derived from a voxel density: `max(floor(size / density), 1)`
pub fn resolution_for_density(size: Vec3, voxel_density_size: f32) -> UVec3 {
    let r = (size / voxel_density_size).floor();
    UVec3::new(
        r.x.max(1.0) as u32,
        r.y.max(1.0) as u32,
        r.z.max(1.0) as u32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_from_density() {
        let grid = VoxelGrid::from_density(Vec3::ZERO, Vec3::new(10.0, 4.5, 0.3), 1.0).unwrap();
        assert_eq!(grid.resolution, UVec3::new(10, 4, 1));
    }

    #[test]
    fn test_resolution_never_zero() {
        for density in [0.01f32, 0.5, 3.0, 100.0, 1.0e6] {
            for size in [Vec3::splat(0.001), Vec3::new(7.3, 0.2, 11.0), Vec3::splat(50.0)] {
                let res = resolution_for_density(size, density);
                assert!(res.x >= 1 && res.y >= 1 && res.z >= 1);
                let expected = (size / density).floor().max(Vec3::ONE).as_uvec3();
                assert_eq!(res, expected, "size={:?} density={}", size, density);
            }
        }
    }

    #[test]
    fn test_invalid_density_rejected() {
        assert!(VoxelGrid::from_density(Vec3::ZERO, Vec3::ONE, 0.0).is_err());
        assert!(VoxelGrid::from_density(Vec3::ZERO, Vec3::ONE, -1.0).is_err());
        assert!(VoxelGrid::new(Vec3::ZERO, Vec3::new(1.0, 0.0, 1.0), UVec3::ONE).is_err());
    }

    #[test]
    fn test_voxel_center_mapping() {
        let grid = VoxelGrid::new(Vec3::ZERO, Vec3::splat(10.0), UVec3::splat(10)).unwrap();
        assert!((grid.voxel_center(0, 0, 0) - Vec3::splat(-4.5)).length() < 1e-5);
        assert!((grid.voxel_center(9, 9, 9) - Vec3::splat(4.5)).length() < 1e-5);
        assert_eq!(grid.world_to_voxel(Vec3::new(-4.5, 0.2, 4.9)), Some(UVec3::new(0, 5, 9)));
        assert_eq!(grid.world_to_voxel(Vec3::new(5.1, 0.0, 0.0)), None);
    }

    #[test]
    fn test_index_roundtrip() {
        let grid = VoxelGrid::new(Vec3::ZERO, Vec3::ONE, UVec3::new(3, 4, 5)).unwrap();
        let idx = grid.index(2, 3, 4);
        assert_eq!(idx, 2 + 3 * 3 + 4 * 12);
        assert_eq!(grid.coords(idx), UVec3::new(2, 3, 4));
    }

    #[test]
    fn test_dispatch_size_covers_grid() {
        let grid = VoxelGrid::new(Vec3::ZERO, Vec3::ONE, UVec3::new(9, 8, 1)).unwrap();
        assert_eq!(grid.dispatch_size([4, 4, 4]), [3, 2, 1]);
    }

    #[test]
    fn test_aabb_transformed() {
        let b = Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        let t = Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0)) * Mat4::from_scale(Vec3::splat(2.0));
        let w = b.transformed(&t);
        assert!((w.min - Vec3::new(3.0, -2.0, -2.0)).length() < 1e-5);
        assert!((w.max - Vec3::new(7.0, 2.0, 2.0)).length() < 1e-5);
        assert!(w.intersects(&Aabb::new(Vec3::splat(6.5), Vec3::splat(8.0))));
        assert!(!w.intersects(&Aabb::new(Vec3::splat(8.0), Vec3::splat(9.0))));
    }

    #[test]
    fn test_resolution_is_bounded() {
        let over = UVec3::new(4, MAX_RESOLUTION + 1, 4);
        assert!(matches!(VoxelGrid::new(Vec3::ZERO, Vec3::ONE, over), Err(BakeError::Config(_))));
        assert!(VoxelGrid::new(Vec3::ZERO, Vec3::ONE, UVec3::splat(MAX_RESOLUTION)).is_ok());
        // tiny density saturates the division instead of wrapping
        assert!(VoxelGrid::from_density(Vec3::ZERO, Vec3::splat(10.0), 1e-9).is_err());

        let grid = VoxelGrid {
            center: Vec3::ZERO,
            size: Vec3::ONE,
            resolution: UVec3::splat(u32::MAX),
        };
        assert_eq!(grid.checked_voxel_count(), None);
    }
}
