//! Compute dispatch contract (Deep Fried Edition)
//!
//! Every kernel declares a fixed 3D workgroup size and the binding slots it
//! reads and writes. A dispatch launches `ceil(extent / workgroup)` groups per
//! axis and every invocation outside the extent returns early, exactly like a
//! WGSL kernel with a bounds check.
//!
//! # Deep Fried Optimizations
//! - **Z-Slab Parallelism**: each Z plane of a volume dispatch runs as one rayon task.
//! - **Readback Stall**: every `readback_interval` dispatches the backend is synchronized
//!   so queued work stays bounded.
//! - **Const Binding Table**: slot → binding index is a `const fn`, no runtime lookup.

use std::sync::atomic::{AtomicU64, Ordering};

use glam::UVec3;
use log::debug;
use rayon::prelude::*;

use crate::error::{BakeError, BakeResult};
use crate::kernels::VolumeKernels;
use crate::volume::Volume3D;

/// Semantic resource slots bound to kernels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum BindingSlot {
    /// Generic uniform parameters (seed, counts, intensities)
    Params = 0,
    /// First input volume
    InputA = 1,
    /// Second input volume
    InputB = 2,
    /// Output volume
    Target = 3,
    /// Albedo volume (RGB + coverage)
    Albedo = 4,
    /// Normal volume
    Normal = 5,
    /// Emissive volume
    Emissive = 6,
    /// Running sum of a stochastic tracer
    Accumulator = 7,
    /// Directional light records
    DirectionalLights = 8,
    /// Point light records
    PointLights = 9,
    /// Spot light records
    SpotLights = 10,
    /// Area light records
    AreaLights = 11,
    /// Environment cubemap
    EnvironmentMap = 12,
    /// Incident light the bounce tracer gathers from
    BounceSource = 13,
    /// Filter weights
    Weights = 14,
    /// Rendered meta albedo
    MetaAlbedo = 15,
    /// Rendered meta emissive
    MetaEmissive = 16,
    /// Packed 64-bit meta texture
    PackedMeta = 17,
    /// Voxelizer slice albedo target
    SliceAlbedo = 18,
    /// Voxelizer slice normal target
    SliceNormal = 19,
    /// Voxelizer slice emissive target
    SliceEmissive = 20,
}

impl BindingSlot {
    /// Backend binding index
    #[inline(always)]
    pub const fn binding(self) -> u32 {
        self as u32
    }

    /// Shader-facing resource name
    pub const fn name(self) -> &'static str {
        match self {
            BindingSlot::Params => "params",
            BindingSlot::InputA => "input_a",
            BindingSlot::InputB => "input_b",
            BindingSlot::Target => "target",
            BindingSlot::Albedo => "albedo",
            BindingSlot::Normal => "normal",
            BindingSlot::Emissive => "emissive",
            BindingSlot::Accumulator => "accumulator",
            BindingSlot::DirectionalLights => "directional_lights",
            BindingSlot::PointLights => "point_lights",
            BindingSlot::SpotLights => "spot_lights",
            BindingSlot::AreaLights => "area_lights",
            BindingSlot::EnvironmentMap => "environment_map",
            BindingSlot::BounceSource => "bounce_source",
            BindingSlot::Weights => "weights",
            BindingSlot::MetaAlbedo => "meta_albedo",
            BindingSlot::MetaEmissive => "meta_emissive",
            BindingSlot::PackedMeta => "packed_meta",
            BindingSlot::SliceAlbedo => "slice_albedo",
            BindingSlot::SliceNormal => "slice_normal",
            BindingSlot::SliceEmissive => "slice_emissive",
        }
    }
}

/// Kernel names used by the pipeline
pub mod kernel_names {
    /// UV-seam dilation of meta textures
    pub const DILATE_META: &str = "DilateMeta";
    /// Albedo + emissive 64-bit packing
    pub const PACK_META: &str = "PackMetaData";
    /// Accumulate one voxelizer slice into the volumes
    pub const VOXELIZE_ACCUMULATE: &str = "VoxelizeAccumulate";
    /// Direct light, surface voxels
    pub const DIRECT_SURFACE: &str = "DirectSurface";
    /// Direct light, every voxel
    pub const DIRECT_VOLUMETRIC: &str = "DirectVolumetric";
    /// Environment light, surface voxels
    pub const ENVIRONMENT_SURFACE: &str = "EnvironmentSurface";
    /// Environment light, every voxel
    pub const ENVIRONMENT_VOLUMETRIC: &str = "EnvironmentVolumetric";
    /// Bounce gather, surface voxels
    pub const BOUNCE_SURFACE: &str = "BounceSurface";
    /// Bounce gather, every voxel
    pub const BOUNCE_VOLUMETRIC: &str = "BounceVolumetric";
    /// `a + b`
    pub const ADD: &str = "AddBuffers";
    /// `albedo * boost * light`
    pub const COMBINE_ALBEDO_LIGHT: &str = "CombineAlbedoWithLight";
    /// `a * s`
    pub const SCALE: &str = "ScaleBuffer";
    /// One axis of the separable Gaussian
    pub const GAUSSIAN_BLUR: &str = "GaussianBlur3D";
    /// Colour grading + density packing
    pub const POST_ADJUST: &str = "PostAdjust";
}

/// Declaration of one compute kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelDesc {
    /// Kernel name
    pub name: &'static str,
    /// Threads per workgroup along x, y, z
    pub workgroup: [u32; 3],
    /// Resources the kernel binds
    pub bindings: &'static [BindingSlot],
}

impl KernelDesc {
    /// Workgroup counts for a 3D extent
    #[inline]
    pub fn groups(&self, extent: [u32; 3]) -> [u32; 3] {
        [
            extent[0].div_ceil(self.workgroup[0].max(1)),
            extent[1].div_ceil(self.workgroup[1].max(1)),
            extent[2].div_ceil(self.workgroup[2].max(1)),
        ]
    }

    /// Whether the kernel declares a binding slot
    pub fn binds(&self, slot: BindingSlot) -> bool {
        self.bindings.contains(&slot)
    }
}

use BindingSlot as B;

const STANDARD_KERNELS: &[KernelDesc] = &[
    KernelDesc {
        name: kernel_names::DILATE_META,
        workgroup: [8, 8, 1],
        bindings: &[B::InputA, B::Target, B::Params],
    },
    KernelDesc {
        name: kernel_names::PACK_META,
        workgroup: [8, 8, 1],
        bindings: &[B::MetaAlbedo, B::MetaEmissive, B::PackedMeta],
    },
    KernelDesc {
        name: kernel_names::VOXELIZE_ACCUMULATE,
        workgroup: [8, 8, 1],
        bindings: &[
            B::SliceAlbedo,
            B::SliceNormal,
            B::SliceEmissive,
            B::Albedo,
            B::Normal,
            B::Emissive,
            B::Params,
        ],
    },
    KernelDesc {
        name: kernel_names::DIRECT_SURFACE,
        workgroup: [4, 4, 4],
        bindings: &[
            B::Albedo,
            B::Normal,
            B::DirectionalLights,
            B::PointLights,
            B::SpotLights,
            B::AreaLights,
            B::Accumulator,
            B::Params,
        ],
    },
    KernelDesc {
        name: kernel_names::DIRECT_VOLUMETRIC,
        workgroup: [4, 4, 4],
        bindings: &[
            B::Albedo,
            B::DirectionalLights,
            B::PointLights,
            B::SpotLights,
            B::AreaLights,
            B::Accumulator,
            B::Params,
        ],
    },
    KernelDesc {
        name: kernel_names::ENVIRONMENT_SURFACE,
        workgroup: [4, 4, 4],
        bindings: &[B::Albedo, B::Normal, B::EnvironmentMap, B::Accumulator, B::Params],
    },
    KernelDesc {
        name: kernel_names::ENVIRONMENT_VOLUMETRIC,
        workgroup: [4, 4, 4],
        bindings: &[B::Albedo, B::EnvironmentMap, B::Accumulator, B::Params],
    },
    KernelDesc {
        name: kernel_names::BOUNCE_SURFACE,
        workgroup: [4, 4, 4],
        bindings: &[B::Albedo, B::Normal, B::BounceSource, B::Accumulator, B::Params],
    },
    KernelDesc {
        name: kernel_names::BOUNCE_VOLUMETRIC,
        workgroup: [4, 4, 4],
        bindings: &[B::Albedo, B::BounceSource, B::Accumulator, B::Params],
    },
    KernelDesc {
        name: kernel_names::ADD,
        workgroup: [4, 4, 4],
        bindings: &[B::InputA, B::InputB, B::Target],
    },
    KernelDesc {
        name: kernel_names::COMBINE_ALBEDO_LIGHT,
        workgroup: [4, 4, 4],
        bindings: &[B::Albedo, B::InputA, B::Target, B::Params],
    },
    KernelDesc {
        name: kernel_names::SCALE,
        workgroup: [4, 4, 4],
        bindings: &[B::InputA, B::Target, B::Params],
    },
    KernelDesc {
        name: kernel_names::GAUSSIAN_BLUR,
        workgroup: [4, 4, 4],
        bindings: &[B::InputA, B::Target, B::Weights, B::Params],
    },
    KernelDesc {
        name: kernel_names::POST_ADJUST,
        workgroup: [4, 4, 4],
        bindings: &[B::InputA, B::Albedo, B::Target, B::Params],
    },
];

/// The set of kernels available to a bake
#[derive(Debug, Clone)]
pub struct KernelLibrary {
    kernels: Vec<KernelDesc>,
}

impl Default for KernelLibrary {
    fn default() -> Self {
        Self::standard()
    }
}

impl KernelLibrary {
    /// Every kernel the pipeline ships with
    pub fn standard() -> Self {
        Self {
            kernels: STANDARD_KERNELS.to_vec(),
        }
    }

    /// Library built from explicit declarations
    pub fn from_kernels(kernels: Vec<KernelDesc>) -> Self {
        Self { kernels }
    }

    /// Copy of this library with one kernel removed
    pub fn without(&self, name: &str) -> Self {
        Self {
            kernels: self.kernels.iter().filter(|k| k.name != name).cloned().collect(),
        }
    }

    /// Look up a kernel
    pub fn get(&self, name: &str) -> Option<&KernelDesc> {
        self.kernels.iter().find(|k| k.name == name)
    }

    /// Look up a kernel the pipeline needs
    pub fn require(&self, name: &'static str) -> BakeResult<&KernelDesc> {
        self.get(name).ok_or(BakeError::MissingKernel(name))
    }

    /// Check that every standard kernel is present with a usable declaration
    pub fn validate(&self) -> BakeResult<()> {
        for desc in STANDARD_KERNELS {
            let k = self.require(desc.name)?;
            if k.workgroup.contains(&0) {
                return Err(BakeError::Config(format!(
                    "kernel {} declares an empty workgroup {:?}",
                    k.name, k.workgroup
                )));
            }
            for (i, slot) in k.bindings.iter().enumerate() {
                if k.bindings[..i].contains(slot) {
                    return Err(BakeError::Config(format!(
                        "kernel {} binds {} twice",
                        k.name,
                        slot.name()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Number of kernels
    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    /// True when the library is empty
    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

/// Dispatch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Dispatches issued
    pub dispatches: u64,
    /// Readback stalls performed
    pub stalls: u64,
}

/// Executes kernels and enforces the readback-stall cadence
pub struct Dispatcher<'k> {
    kernels: &'k dyn VolumeKernels,
    readback_interval: u32,
    stall_enabled: bool,
    dispatches: AtomicU64,
    stalls: AtomicU64,
}

impl<'k> Dispatcher<'k> {
    /// Create a dispatcher; an interval of 0 is treated as 1
    pub fn new(kernels: &'k dyn VolumeKernels, readback_interval: u32, stall_enabled: bool) -> Self {
        Self {
            kernels,
            readback_interval: readback_interval.max(1),
            stall_enabled,
            dispatches: AtomicU64::new(0),
            stalls: AtomicU64::new(0),
        }
    }

    /// Backend running the elementwise kernels
    pub fn kernels(&self) -> &dyn VolumeKernels {
        self.kernels
    }

    /// Counters so far
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            dispatches: self.dispatches.load(Ordering::Relaxed),
            stalls: self.stalls.load(Ordering::Relaxed),
        }
    }

    /// Count one dispatch of `kernel` and stall if the cadence is reached
    pub fn record(&self, kernel: &KernelDesc) -> BakeResult<()> {
        let n = self.dispatches.fetch_add(1, Ordering::Relaxed) + 1;
        if self.stall_enabled && n % self.readback_interval as u64 == 0 {
            debug!("readback stall after {} dispatches ({})", n, kernel.name);
            self.kernels.synchronize()?;
            self.stalls.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Run a per-voxel kernel that updates `volume` in place
    ///
    /// Invocations are enumerated group by group; those outside the grid are
    /// skipped. Z planes run in parallel.
    pub fn dispatch_into<T, F>(&self, kernel: &KernelDesc, volume: &mut Volume3D<T>, f: F) -> BakeResult<()>
    where
        T: Copy + Default + Send,
        F: Fn(UVec3, &mut T) + Sync,
    {
        let res = volume.grid.resolution;
        let [gx, gy, _] = kernel.groups(res.to_array());
        let [wx, wy, _] = kernel.workgroup;
        let plane = res.x as usize * res.y as usize;

        volume
            .data
            .par_chunks_mut(plane)
            .enumerate()
            .for_each(|(z, slab)| {
                for y in (0..gy * wy).filter(|&y| y < res.y) {
                    for x in (0..gx * wx).filter(|&x| x < res.x) {
                        let idx = x as usize + y as usize * res.x as usize;
                        f(UVec3::new(x, y, z as u32), &mut slab[idx]);
                    }
                }
            });

        self.record(kernel)
    }

    /// Run a per-voxel kernel producing a fresh volume
    pub fn dispatch_volume<T, F>(
        &self,
        kernel: &KernelDesc,
        grid: &crate::grid::VoxelGrid,
        f: F,
    ) -> BakeResult<Volume3D<T>>
    where
        T: Copy + Default + Send,
        F: Fn(UVec3) -> T + Sync,
    {
        let mut out = Volume3D::new(*grid);
        self.dispatch_into(kernel, &mut out, |v, t| *t = f(v))?;
        Ok(out)
    }

    /// Run a 2D kernel over `extent` sequentially
    pub fn dispatch_plane<F>(&self, kernel: &KernelDesc, extent: [u32; 2], mut f: F) -> BakeResult<()>
    where
        F: FnMut(u32, u32),
    {
        let [gx, gy, _] = kernel.groups([extent[0], extent[1], 1]);
        let [wx, wy, _] = kernel.workgroup;
        for y in (0..gy * wy).filter(|&y| y < extent[1]) {
            for x in (0..gx * wx).filter(|&x| x < extent[0]) {
                f(x, y);
            }
        }
        self.record(kernel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::VoxelGrid;
    use crate::kernels::CpuKernels;
    use glam::Vec3;

    #[test]
    fn test_binding_table_is_const() {
        const ALBEDO: u32 = BindingSlot::Albedo.binding();
        assert_eq!(ALBEDO, 4);
        assert_eq!(BindingSlot::BounceSource.name(), "bounce_source");
    }

    #[test]
    fn test_standard_library_validates() {
        let lib = KernelLibrary::standard();
        assert!(lib.validate().is_ok());
        let missing = lib.without(kernel_names::BOUNCE_SURFACE);
        assert!(matches!(
            missing.validate(),
            Err(BakeError::MissingKernel("BounceSurface"))
        ));
    }

    #[test]
    fn test_declared_bindings() {
        let lib = KernelLibrary::standard();
        let pack = lib.require(kernel_names::PACK_META).unwrap();
        assert!(pack.binds(BindingSlot::PackedMeta));
        assert!(!pack.binds(BindingSlot::Target));
        let dilate = lib.require(kernel_names::DILATE_META).unwrap();
        assert!(dilate.binds(BindingSlot::InputA) && dilate.binds(BindingSlot::Target));
    }

    #[test]
    fn test_custom_library_validation() {
        let mut kernels = STANDARD_KERNELS.to_vec();
        assert!(KernelLibrary::from_kernels(kernels.clone()).validate().is_ok());

        kernels[0].workgroup = [8, 0, 1];
        assert!(matches!(
            KernelLibrary::from_kernels(kernels.clone()).validate(),
            Err(BakeError::Config(_))
        ));

        kernels[0].workgroup = [8, 8, 1];
        kernels[0].bindings = &[BindingSlot::Target, BindingSlot::Target];
        assert!(matches!(
            KernelLibrary::from_kernels(kernels).validate(),
            Err(BakeError::Config(_))
        ));

        let lone = KernelLibrary::from_kernels(vec![STANDARD_KERNELS[0].clone()]);
        assert_eq!(lone.len(), 1);
        assert!(matches!(lone.validate(), Err(BakeError::MissingKernel(_))));
    }

    #[test]
    fn test_dispatch_covers_every_voxel_once() {
        let cpu = CpuKernels;
        let dispatcher = Dispatcher::new(&cpu, 4, true);
        let lib = KernelLibrary::standard();
        let k = lib.require(kernel_names::ADD).unwrap();
        let grid = VoxelGrid::new(Vec3::ZERO, Vec3::ONE, UVec3::new(5, 7, 3)).unwrap();
        let mut vol: Volume3D<u32> = Volume3D::new(grid);
        dispatcher.dispatch_into(k, &mut vol, |_, t| *t += 1).unwrap();
        assert!(vol.data.iter().all(|&n| n == 1));

        let ids: Volume3D<u32> = dispatcher
            .dispatch_volume(k, &grid, |v| grid.index(v.x, v.y, v.z) as u32)
            .unwrap();
        assert!(ids.data.iter().enumerate().all(|(i, &n)| n == i as u32));
    }

    #[test]
    fn test_readback_stall_cadence() {
        let cpu = CpuKernels;
        let lib = KernelLibrary::standard();
        let k = lib.require(kernel_names::SCALE).unwrap();

        let dispatcher = Dispatcher::new(&cpu, 3, true);
        for _ in 0..10 {
            dispatcher.record(k).unwrap();
        }
        assert_eq!(dispatcher.stats(), DispatchStats { dispatches: 10, stalls: 3 });

        let disabled = Dispatcher::new(&cpu, 3, false);
        for _ in 0..10 {
            disabled.record(k).unwrap();
        }
        assert_eq!(disabled.stats().stalls, 0);
    }

    #[test]
    fn test_plane_dispatch_bounds_check() {
        let cpu = CpuKernels;
        let dispatcher = Dispatcher::new(&cpu, 1, false);
        let lib = KernelLibrary::standard();
        let k = lib.require(kernel_names::VOXELIZE_ACCUMULATE).unwrap();
        let mut hits = vec![0u32; 9 * 10];
        dispatcher
            .dispatch_plane(k, [9, 10], |x, y| hits[(x + y * 9) as usize] += 1)
            .unwrap();
        assert!(hits.iter().all(|&n| n == 1));
        assert_eq!(k.groups([9, 10, 1]), [2, 2, 1]);
    }
}
