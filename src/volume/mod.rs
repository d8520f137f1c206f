//! 3D Volume Buffers (Deep Fried Edition)
//!
//! Every stage of the bake reads and writes named RGBA volumes bound to the
//! bake's `VoxelGrid`.
//!
//! # Features
//!
//! - **Z-major storage**: `index = x + y * rx + z * rx * ry`, matches GPU 3D textures
//! - **Texel formats**: RGBA8 unorm, RGBA16 half, RGBA32 float (quantized on save)
//! - **Named roles**: `{voxelName}_{role}` keys for every pipeline buffer
//! - **Persistence**: `.texture3d` container with CRC32 body check (see [`texture3d`])

pub mod store;
pub mod texture3d;

use glam::{IVec3, UVec3, Vec3, Vec4};
use half::f16;
use serde::{Deserialize, Serialize};

use crate::grid::VoxelGrid;

/// 3D volume texture
///
/// Stores voxel data in a flat array with Z-major ordering:
/// `index = x + y * resolution.x + z * resolution.x * resolution.y`
#[derive(Debug, Clone, PartialEq)]
pub struct Volume3D<T: Copy + Default> {
    /// Flat voxel data in Z-major order
    pub data: Vec<T>,
    /// Grid this volume covers
    pub grid: VoxelGrid,
}

/// RGBA volume, the in-memory form of every pipeline buffer
pub type TexelVolume = Volume3D<Vec4>;

impl<T: Copy + Default> Volume3D<T> {
    /// Create a new volume filled with default values
    pub fn new(grid: VoxelGrid) -> Self {
        Self {
            data: vec![T::default(); grid.voxel_count()],
            grid,
        }
    }

    /// Create a volume filled with `value`
    pub fn filled(grid: VoxelGrid, value: T) -> Self {
        Self {
            data: vec![value; grid.voxel_count()],
            grid,
        }
    }

    /// Total number of voxels
    #[inline(always)]
    pub fn voxel_count(&self) -> usize {
        self.data.len()
    }

    /// Resolution along each axis
    #[inline(always)]
    pub fn resolution(&self) -> UVec3 {
        self.grid.resolution
    }

    /// Get flat index from 3D coordinates (bounds-unchecked)
    #[inline(always)]
    pub fn index(&self, x: u32, y: u32, z: u32) -> usize {
        self.grid.index(x, y, z)
    }

    /// Get voxel at 3D coordinates
    #[inline(always)]
    pub fn get(&self, x: u32, y: u32, z: u32) -> T {
        self.data[self.index(x, y, z)]
    }

    /// Set voxel at 3D coordinates
    #[inline(always)]
    pub fn set(&mut self, x: u32, y: u32, z: u32, value: T) {
        let idx = self.index(x, y, z);
        self.data[idx] = value;
    }

    /// Get voxel at signed coordinates, `None` outside the grid
    #[inline(always)]
    pub fn get_checked(&self, v: IVec3) -> Option<T> {
        let res = self.grid.resolution.as_ivec3();
        if v.x < 0 || v.y < 0 || v.z < 0 || v.x >= res.x || v.y >= res.y || v.z >= res.z {
            return None;
        }
        Some(self.get(v.x as u32, v.y as u32, v.z as u32))
    }

    /// Get voxel with clamp-to-edge addressing
    #[inline(always)]
    pub fn get_clamped(&self, v: IVec3) -> T {
        let max = self.grid.resolution.as_ivec3() - IVec3::ONE;
        let c = v.clamp(IVec3::ZERO, max);
        self.get(c.x as u32, c.y as u32, c.z as u32)
    }

    /// Get world-space position for voxel coordinates (cell centre)
    #[inline(always)]
    pub fn voxel_to_world(&self, x: u32, y: u32, z: u32) -> Vec3 {
        self.grid.voxel_center(x, y, z)
    }
}

impl Volume3D<Vec4> {
    /// Texel of the voxel containing `p`, zero outside the grid
    #[inline]
    pub fn sample_nearest(&self, p: Vec3) -> Vec4 {
        match self.grid.world_to_voxel(p) {
            Some(v) => self.get(v.x, v.y, v.z),
            None => Vec4::ZERO,
        }
    }

    /// Trilinear sampling at a world-space position
    ///
    /// Texels are cell-centred; points outside the volume are clamped to the
    /// nearest boundary voxel.
    pub fn sample_trilinear(&self, p: Vec3) -> Vec4 {
        let g = self.grid.world_to_grid(p) - 0.5;
        let base = g.floor();
        let t = g - base;
        let b = base.as_ivec3();

        let c000 = self.get_clamped(b);
        let c100 = self.get_clamped(b + IVec3::new(1, 0, 0));
        let c010 = self.get_clamped(b + IVec3::new(0, 1, 0));
        let c110 = self.get_clamped(b + IVec3::new(1, 1, 0));
        let c001 = self.get_clamped(b + IVec3::new(0, 0, 1));
        let c101 = self.get_clamped(b + IVec3::new(1, 0, 1));
        let c011 = self.get_clamped(b + IVec3::new(0, 1, 1));
        let c111 = self.get_clamped(b + IVec3::new(1, 1, 1));

        let c00 = c000.lerp(c100, t.x);
        let c10 = c010.lerp(c110, t.x);
        let c01 = c001.lerp(c101, t.x);
        let c11 = c011.lerp(c111, t.x);

        let c0 = c00.lerp(c10, t.y);
        let c1 = c01.lerp(c11, t.y);

        c0.lerp(c1, t.z)
    }

    /// Largest per-channel absolute difference to another volume
    pub fn max_difference(&self, other: &TexelVolume) -> f32 {
        self.data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| (*a - *b).abs().max_element())
            .fold(0.0, f32::max)
    }

    /// Sum of RGB over all voxels
    pub fn total_rgb(&self) -> Vec3 {
        self.data.iter().map(|t| t.truncate()).sum()
    }

    /// Number of voxels with alpha above zero
    pub fn covered_count(&self) -> usize {
        self.data.iter().filter(|t| t.w > 0.0).count()
    }

    /// Quantize every texel the way `format` would store it
    pub fn quantized(mut self, format: TexelFormat) -> Self {
        for t in &mut self.data {
            *t = format.quantize(*t);
        }
        self
    }
}

/// Storage format of a persisted volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TexelFormat {
    /// 8-bit unsigned normalized per channel, values clamped to [0, 1]
    Rgba8Unorm,
    /// IEEE half float per channel
    Rgba16Float,
    /// 32-bit float per channel
    Rgba32Float,
}

impl TexelFormat {
    /// Bytes per texel
    #[inline]
    pub fn bytes_per_texel(self) -> usize {
        match self {
            TexelFormat::Rgba8Unorm => 4,
            TexelFormat::Rgba16Float => 8,
            TexelFormat::Rgba32Float => 16,
        }
    }

    /// Bits per channel (8, 16 or 32)
    #[inline]
    pub fn bit_depth(self) -> u32 {
        match self {
            TexelFormat::Rgba8Unorm => 8,
            TexelFormat::Rgba16Float => 16,
            TexelFormat::Rgba32Float => 32,
        }
    }

    /// Format for a bit depth; anything other than 8 or 16 gives 32-bit float
    pub fn from_bit_depth(bits: u32) -> Self {
        match bits {
            8 => TexelFormat::Rgba8Unorm,
            16 => TexelFormat::Rgba16Float,
            _ => TexelFormat::Rgba32Float,
        }
    }

    /// Stable on-disk identifier
    #[inline]
    pub fn id(self) -> u16 {
        match self {
            TexelFormat::Rgba8Unorm => 1,
            TexelFormat::Rgba16Float => 2,
            TexelFormat::Rgba32Float => 3,
        }
    }

    /// Inverse of [`TexelFormat::id`]
    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            1 => Some(TexelFormat::Rgba8Unorm),
            2 => Some(TexelFormat::Rgba16Float),
            3 => Some(TexelFormat::Rgba32Float),
            _ => None,
        }
    }

    /// Value a texel reads back as after being stored in this format
    #[inline]
    pub fn quantize(self, v: Vec4) -> Vec4 {
        match self {
            TexelFormat::Rgba8Unorm => {
                (v.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round() / 255.0
            }
            TexelFormat::Rgba16Float => Vec4::from_array(
                v.to_array()
                    .map(|c| f16::from_f32(c).to_f32()),
            ),
            TexelFormat::Rgba32Float => v,
        }
    }
}

/// Named buffers produced by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferRole {
    /// Albedo RGB + coverage alpha
    Albedo,
    /// Surface normal RGB (raw [-1, 1]) + written flag
    Normal,
    /// Emissive RGB (HDR) + written flag
    Emissive,
    /// Direct light at surface voxels
    DirectSurface,
    /// Direct light in every voxel (isotropic)
    DirectVolumetric,
    /// Environment light at surface voxels
    EnvironmentSurface,
    /// Environment light in every voxel
    EnvironmentVolumetric,
    /// Albedo-shaded direct + environment light plus emission (bounce seed)
    CombinedDirectSurface,
    /// Indirect light at surface voxels
    BounceSurface,
    /// Indirect light in every voxel
    BounceVolumetric,
    /// Albedo-shaded direct + environment + bounce light plus emission
    CombinedSurface,
    /// Direct + environment + bounce volumetric light, denoised
    CombinedVolumetric,
    /// Post-adjusted surface variant for the runtime fog
    FinalSurface,
    /// Post-adjusted volumetric variant with packed density
    FinalVolumetric,
    /// Optional separate density texture
    Density,
}

impl BufferRole {
    /// Every role, in pipeline order
    pub const ALL: [BufferRole; 15] = [
        BufferRole::Albedo,
        BufferRole::Normal,
        BufferRole::Emissive,
        BufferRole::DirectSurface,
        BufferRole::DirectVolumetric,
        BufferRole::EnvironmentSurface,
        BufferRole::EnvironmentVolumetric,
        BufferRole::CombinedDirectSurface,
        BufferRole::BounceSurface,
        BufferRole::BounceVolumetric,
        BufferRole::CombinedSurface,
        BufferRole::CombinedVolumetric,
        BufferRole::FinalSurface,
        BufferRole::FinalVolumetric,
        BufferRole::Density,
    ];

    /// Key suffix of this role
    pub fn suffix(self) -> &'static str {
        match self {
            BufferRole::Albedo => "albedo",
            BufferRole::Normal => "normal",
            BufferRole::Emissive => "emissive",
            BufferRole::DirectSurface => "directSurface",
            BufferRole::DirectVolumetric => "directVolumetric",
            BufferRole::EnvironmentSurface => "environmentSurface",
            BufferRole::EnvironmentVolumetric => "environmentVolumetric",
            BufferRole::CombinedDirectSurface => "combinedDirectSurface",
            BufferRole::BounceSurface => "bounceSurface",
            BufferRole::BounceVolumetric => "bounceVolumetric",
            BufferRole::CombinedSurface => "combinedSurface",
            BufferRole::CombinedVolumetric => "combinedVolumetric",
            BufferRole::FinalSurface => "finalSurface",
            BufferRole::FinalVolumetric => "finalVolumetric",
            BufferRole::Density => "density",
        }
    }

    /// Store key: `{voxel_name}_{suffix}`
    pub fn key(self, voxel_name: &str) -> String {
        format!("{}_{}", voxel_name, self.suffix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(res: u32) -> VoxelGrid {
        VoxelGrid::new(Vec3::ZERO, Vec3::splat(res as f32), UVec3::splat(res)).unwrap()
    }

    #[test]
    fn test_volume_creation() {
        let vol: TexelVolume = Volume3D::new(grid(4));
        assert_eq!(vol.voxel_count(), 64);
        assert!(vol.data.iter().all(|t| *t == Vec4::ZERO));
    }

    #[test]
    fn test_volume_indexing() {
        let mut vol: Volume3D<f32> = Volume3D::new(grid(4));
        vol.set(1, 2, 3, 42.0);
        assert_eq!(vol.get(1, 2, 3), 42.0);
        assert_eq!(vol.index(1, 2, 3), 1 + 2 * 4 + 3 * 16);
        assert_eq!(vol.get_checked(IVec3::new(1, 2, 3)), Some(42.0));
        assert_eq!(vol.get_checked(IVec3::new(-1, 2, 3)), None);
        assert_eq!(vol.get_checked(IVec3::new(4, 0, 0)), None);
        assert_eq!(vol.get_clamped(IVec3::new(1, 2, 9)), vol.get(1, 2, 3));
    }

    #[test]
    fn test_trilinear_at_centers_is_exact() {
        let mut vol: TexelVolume = Volume3D::new(grid(2));
        vol.set(0, 0, 0, Vec4::splat(1.0));
        let c = vol.voxel_to_world(0, 0, 0);
        assert!((vol.sample_trilinear(c) - Vec4::splat(1.0)).abs().max_element() < 1e-5);
        let mid = (vol.voxel_to_world(0, 0, 0) + vol.voxel_to_world(1, 0, 0)) * 0.5;
        assert!((vol.sample_trilinear(mid).x - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_trilinear_clamping() {
        let vol: TexelVolume = Volume3D::filled(grid(4), Vec4::ONE);
        assert_eq!(vol.sample_trilinear(Vec3::splat(-10.0)), Vec4::ONE);
        assert_eq!(vol.sample_trilinear(Vec3::splat(10.0)), Vec4::ONE);
        assert_eq!(vol.sample_nearest(Vec3::splat(10.0)), Vec4::ZERO);
    }

    #[test]
    fn test_quantize_formats() {
        let v = Vec4::new(1.5, 0.5, -0.25, 0.1234);
        let q8 = TexelFormat::Rgba8Unorm.quantize(v);
        assert_eq!(q8.x, 1.0);
        assert_eq!(q8.z, 0.0);
        assert!((q8.y - 128.0 / 255.0).abs() < 1e-6);
        let q16 = TexelFormat::Rgba16Float.quantize(v);
        assert!((q16 - v).abs().max_element() < 1e-3);
        assert_eq!(TexelFormat::Rgba32Float.quantize(v), v);
    }

    #[test]
    fn test_role_keys() {
        assert_eq!(BufferRole::Albedo.key("Fog"), "Fog_albedo");
        assert_eq!(BufferRole::CombinedVolumetric.key("Fog"), "Fog_combinedVolumetric");
        let mut suffixes: Vec<_> = BufferRole::ALL.iter().map(|r| r.suffix()).collect();
        suffixes.sort_unstable();
        suffixes.dedup();
        assert_eq!(suffixes.len(), BufferRole::ALL.len());
    }
}
