//! Separable Gaussian denoiser for volumetric light buffers
//!
//! Three 1D passes (X, then Y, then Z) with clamp-to-edge addressing. A radius
//! of 0 bypasses the filter entirely.

use crate::dispatch::{kernel_names, Dispatcher, KernelLibrary};
use crate::error::BakeResult;
use crate::volume::TexelVolume;

/// Normalized Gaussian weights over `[-radius, radius]`, `σ = max(radius / 2, 0.5)`
pub fn gaussian_weights(radius: u32) -> Vec<f32> {
    let sigma = (radius as f32 * 0.5).max(0.5);
    let r = radius as i32;
    let raw: Vec<f32> = (-r..=r)
        .map(|k| (-((k * k) as f32) / (2.0 * sigma * sigma)).exp())
        .collect();
    let total: f32 = raw.iter().sum();
    raw.into_iter().map(|w| w / total).collect()
}

/// Volumetric denoiser
pub struct VolumeDenoiser<'a> {
    dispatcher: &'a Dispatcher<'a>,
    library: &'a KernelLibrary,
    radius: u32,
}

impl<'a> VolumeDenoiser<'a> {
    /// Denoiser with a sample radius
    pub fn new(dispatcher: &'a Dispatcher<'a>, library: &'a KernelLibrary, radius: u32) -> Self {
        Self {
            dispatcher,
            library,
            radius,
        }
    }

    /// True when the filter does nothing
    pub fn is_bypassed(&self) -> bool {
        self.radius == 0
    }

    /// Blur along X, Y and Z; returns the input unchanged when bypassed
    pub fn denoise(&self, volume: &TexelVolume) -> BakeResult<TexelVolume> {
        if self.is_bypassed() {
            return Ok(volume.clone());
        }
        let kernel = self.library.require(kernel_names::GAUSSIAN_BLUR)?;
        let weights = gaussian_weights(self.radius);
        let backend = self.dispatcher.kernels();

        let mut out = backend.blur_axis(volume, 0, &weights)?;
        self.dispatcher.record(kernel)?;
        for axis in 1..3 {
            out = backend.blur_axis(&out, axis, &weights)?;
            self.dispatcher.record(kernel)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::VoxelGrid;
    use crate::kernels::CpuKernels;
    use crate::volume::Volume3D;
    use glam::{IVec3, UVec3, Vec3, Vec4};

    #[test]
    fn test_weights_normalized_and_symmetric() {
        for r in 0..5 {
            let w = gaussian_weights(r);
            assert_eq!(w.len(), 2 * r as usize + 1);
            assert!((w.iter().sum::<f32>() - 1.0).abs() < 1e-6);
            for k in 0..w.len() / 2 {
                assert_eq!(w[k], w[w.len() - 1 - k]);
                assert!(w[k] <= w[k + 1]);
            }
        }
        assert_eq!(gaussian_weights(0), vec![1.0]);
    }

    fn hot_voxel(res: u32) -> TexelVolume {
        let grid = VoxelGrid::new(Vec3::ZERO, Vec3::splat(res as f32), UVec3::splat(res)).unwrap();
        let mut v = Volume3D::new(grid);
        let c = res / 2;
        v.set(c, c, c, Vec4::new(1.0, 2.0, 3.0, 1.0));
        v
    }

    #[test]
    fn test_radius_zero_bypasses() {
        let cpu = CpuKernels;
        let d = Dispatcher::new(&cpu, 100, false);
        let lib = KernelLibrary::standard();
        let v = hot_voxel(5);
        let out = VolumeDenoiser::new(&d, &lib, 0).denoise(&v).unwrap();
        assert_eq!(out.data, v.data);
        assert_eq!(d.stats().dispatches, 0);
    }

    #[test]
    fn test_separable_equals_full_convolution() {
        let cpu = CpuKernels;
        let d = Dispatcher::new(&cpu, 100, false);
        let lib = KernelLibrary::standard();
        let res = 9;
        let radius = 2;
        let mut input = hot_voxel(res);
        // second hot voxel near the edge exercises clamping
        input.set(0, 1, 7, Vec4::new(0.5, 0.0, 0.0, 1.0));
        let separable = VolumeDenoiser::new(&d, &lib, radius).denoise(&input).unwrap();
        assert_eq!(d.stats().dispatches, 3);

        let w = gaussian_weights(radius);
        let r = radius as i32;
        for z in 0..res {
            for y in 0..res {
                for x in 0..res {
                    let p = IVec3::new(x as i32, y as i32, z as i32);
                    let mut full = Vec4::ZERO;
                    for k in -r..=r {
                        for j in -r..=r {
                            for i in -r..=r {
                                let weight = w[(i + r) as usize] * w[(j + r) as usize] * w[(k + r) as usize];
                                full += input.get_clamped(p + IVec3::new(i, j, k)) * weight;
                            }
                        }
                    }
                    let got = separable.get(x, y, z);
                    assert!((got - full).abs().max_element() < 1e-5, "{:?}: {:?} vs {:?}", p, got, full);
                }
            }
        }
    }

    #[test]
    fn test_hot_voxel_spreads_like_a_gaussian() {
        let cpu = CpuKernels;
        let d = Dispatcher::new(&cpu, 100, false);
        let lib = KernelLibrary::standard();
        let out = VolumeDenoiser::new(&d, &lib, 2).denoise(&hot_voxel(9)).unwrap();
        let center = out.get(4, 4, 4).x;
        let near = out.get(5, 4, 4).x;
        let far = out.get(6, 4, 4).x;
        assert!(center > near && near > far && far > 0.0);
        assert_eq!(out.get(7, 4, 4).x, 0.0);
        // interior energy is preserved
        assert!((out.total_rgb().x - 1.0).abs() < 1e-4);
    }
}
