//! Elementwise and filter kernels
//!
//! [`VolumeKernels`] is the backend seam for the pure buffer kernels (add,
//! albedo combine, scale, blur axis). [`CpuKernels`] runs them with rayon;
//! with the `gpu` feature, `gpu::GpuKernels` runs them as WGSL compute shaders.

#[cfg(feature = "gpu")]
pub mod gpu;

use glam::{IVec3, Vec4};
use rayon::prelude::*;

use crate::error::{BakeError, BakeResult};
use crate::volume::{TexelVolume, Volume3D};

/// Buffer kernels a bake needs from its backend
pub trait VolumeKernels: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// `rgb = a.rgb + b.rgb`, `alpha = max(a.a, b.a)`
    fn add(&self, a: &TexelVolume, b: &TexelVolume) -> BakeResult<TexelVolume>;

    /// `rgb = albedo.rgb * boost * light.rgb`, `alpha = albedo.a`
    fn combine_albedo_with_light(
        &self,
        albedo: &TexelVolume,
        light: &TexelVolume,
        boost: f32,
    ) -> BakeResult<TexelVolume>;

    /// `rgb = a.rgb * s`, alpha unchanged
    fn scale(&self, a: &TexelVolume, s: f32) -> BakeResult<TexelVolume>;

    /// Convolve one axis (0 = X, 1 = Y, 2 = Z) with `weights` (length `2r + 1`),
    /// clamp-to-edge addressing
    fn blur_axis(&self, input: &TexelVolume, axis: usize, weights: &[f32]) -> BakeResult<TexelVolume>;

    /// Block until queued work has completed (readback stall)
    fn synchronize(&self) -> BakeResult<()>;
}

/// Fail with `GridMismatch` unless both volumes share a resolution
pub fn ensure_same_grid(name: &str, a: &TexelVolume, b: &TexelVolume) -> BakeResult<()> {
    if a.grid.resolution != b.grid.resolution {
        return Err(BakeError::GridMismatch {
            name: name.to_string(),
            expected: a.grid.resolution_array(),
            found: b.grid.resolution_array(),
        });
    }
    Ok(())
}

fn zip_map<F>(a: &TexelVolume, b: &TexelVolume, f: F) -> TexelVolume
where
    F: Fn(Vec4, Vec4) -> Vec4 + Sync,
{
    let data = a
        .data
        .par_iter()
        .zip(b.data.par_iter())
        .map(|(&x, &y)| f(x, y))
        .collect();
    Volume3D { data, grid: a.grid }
}

/// CPU backend
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuKernels;

impl VolumeKernels for CpuKernels {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn add(&self, a: &TexelVolume, b: &TexelVolume) -> BakeResult<TexelVolume> {
        ensure_same_grid("add", a, b)?;
        Ok(zip_map(a, b, |x, y| {
            (x.truncate() + y.truncate()).extend(x.w.max(y.w))
        }))
    }

    fn combine_albedo_with_light(
        &self,
        albedo: &TexelVolume,
        light: &TexelVolume,
        boost: f32,
    ) -> BakeResult<TexelVolume> {
        ensure_same_grid("combine_albedo_with_light", albedo, light)?;
        Ok(zip_map(albedo, light, |a, l| {
            (a.truncate() * boost * l.truncate()).extend(a.w)
        }))
    }

    fn scale(&self, a: &TexelVolume, s: f32) -> BakeResult<TexelVolume> {
        let data = a
            .data
            .par_iter()
            .map(|t| (t.truncate() * s).extend(t.w))
            .collect();
        Ok(Volume3D { data, grid: a.grid })
    }

    fn blur_axis(&self, input: &TexelVolume, axis: usize, weights: &[f32]) -> BakeResult<TexelVolume> {
        if axis > 2 {
            return Err(BakeError::Config(format!("blur axis {} out of range", axis)));
        }
        if weights.len() % 2 == 0 {
            return Err(BakeError::Config(format!(
                "blur kernel must have odd length, got {}",
                weights.len()
            )));
        }
        let r = (weights.len() / 2) as i32;
        let res = input.grid.resolution;
        let plane = res.x as usize * res.y as usize;
        let mut step = IVec3::ZERO;
        step[axis] = 1;

        let mut out = Volume3D::new(input.grid);
        out.data.par_chunks_mut(plane).enumerate().for_each(|(z, slab)| {
            for y in 0..res.y {
                for x in 0..res.x {
                    let p = IVec3::new(x as i32, y as i32, z as i32);
                    let mut sum = Vec4::ZERO;
                    for (k, w) in weights.iter().enumerate() {
                        sum += input.get_clamped(p + step * (k as i32 - r)) * *w;
                    }
                    slab[x as usize + y as usize * res.x as usize] = sum;
                }
            }
        });
        Ok(out)
    }

    fn synchronize(&self) -> BakeResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::VoxelGrid;
    use glam::{UVec3, Vec3};

    fn vol(res: u32, value: Vec4) -> TexelVolume {
        let grid = VoxelGrid::new(Vec3::ZERO, Vec3::splat(res as f32), UVec3::splat(res)).unwrap();
        Volume3D::filled(grid, value)
    }

    #[test]
    fn test_add_keeps_max_alpha() {
        let a = vol(2, Vec4::new(1.0, 2.0, 3.0, 0.0));
        let b = vol(2, Vec4::new(0.5, 0.5, 0.5, 1.0));
        let c = CpuKernels.add(&a, &b).unwrap();
        assert!(c.data.iter().all(|t| *t == Vec4::new(1.5, 2.5, 3.5, 1.0)));
    }

    #[test]
    fn test_combine_albedo_with_light() {
        let albedo = vol(2, Vec4::new(0.5, 0.25, 1.0, 0.7));
        let light = vol(2, Vec4::new(2.0, 4.0, 1.0, 1.0));
        let c = CpuKernels.combine_albedo_with_light(&albedo, &light, 2.0).unwrap();
        assert!(c.data.iter().all(|t| *t == Vec4::new(2.0, 2.0, 2.0, 0.7)));
    }

    #[test]
    fn test_scale_keeps_alpha() {
        let a = vol(2, Vec4::new(1.0, 2.0, 4.0, 0.5));
        let c = CpuKernels.scale(&a, 0.25).unwrap();
        assert!(c.data.iter().all(|t| *t == Vec4::new(0.25, 0.5, 1.0, 0.5)));
    }

    #[test]
    fn test_grid_mismatch_rejected() {
        let a = vol(2, Vec4::ONE);
        let b = vol(3, Vec4::ONE);
        assert!(matches!(CpuKernels.add(&a, &b), Err(BakeError::GridMismatch { .. })));
    }

    #[test]
    fn test_blur_axis_clamps_edges() {
        let mut a = vol(3, Vec4::ZERO);
        a.set(0, 1, 1, Vec4::ONE);
        let w = [0.25, 0.5, 0.25];
        let out = CpuKernels.blur_axis(&a, 0, &w).unwrap();
        // clamp-to-edge: the left neighbour of x=0 is x=0 itself
        assert!((out.get(0, 1, 1).x - 0.75).abs() < 1e-6);
        assert!((out.get(1, 1, 1).x - 0.25).abs() < 1e-6);
        assert_eq!(out.get(2, 1, 1), Vec4::ZERO);
        assert_eq!(out.get(0, 0, 1), Vec4::ZERO);
    }
}
