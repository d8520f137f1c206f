//! wgpu compute backend (Deep Fried Edition)
//!
//! Runs the buffer kernels as WGSL compute shaders.
//!
//! # GPU Pipeline
//!
//! 1. Upload the input volumes as `array<vec4<f32>>` storage buffers
//! 2. Dispatch `@workgroup_size(4,4,4)` with `ceil(res / 4)` workgroups;
//!    invocations outside the grid return early
//! 3. Copy the output into a staging buffer and read it back
//!
//! Every binding follows one layout: `a` (read), `b` (read), `dst`
//! (read-write) and a `Params` uniform.

use glam::{UVec3, Vec4};
use thiserror::Error;
use wgpu::util::DeviceExt;

use super::{ensure_same_grid, VolumeKernels};
use crate::error::{BakeError, BakeResult};
use crate::volume::{TexelVolume, Volume3D};

/// GPU backend errors
#[derive(Error, Debug)]
pub enum GpuError {
    /// Failed to create GPU adapter
    #[error("Failed to create GPU adapter")]
    NoAdapter,

    /// Failed to create GPU device
    #[error("Failed to create GPU device: {0}")]
    DeviceCreation(String),

    /// Shader compilation error
    #[error("Shader compilation error: {0}")]
    ShaderCompilation(String),

    /// Buffer mapping error
    #[error("Buffer mapping error: {0}")]
    BufferMapping(String),
}

/// Kernel uniforms (48 bytes, 16-byte aligned)
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct KernelParams {
    /// Resolution (xyz) + blur axis
    resolution: [u32; 4],
    /// Blur radius + padding
    options: [u32; 4],
    /// Scalar argument (scale factor, albedo boost) + padding
    args: [f32; 4],
}

const WORKGROUP: u32 = 4;

const SHADER_PRELUDE: &str = r#"
struct Params {
    res: vec4<u32>,
    opts: vec4<u32>,
    args: vec4<f32>,
}

@group(0) @binding(0) var<storage, read> a: array<vec4<f32>>;
@group(0) @binding(1) var<storage, read> b: array<vec4<f32>>;
@group(0) @binding(2) var<storage, read_write> dst: array<vec4<f32>>;
@group(0) @binding(3) var<uniform> params: Params;

fn voxel_index(x: u32, y: u32, z: u32) -> u32 {
    return x + y * params.res.x + z * params.res.x * params.res.y;
}

fn outside(id: vec3<u32>) -> bool {
    return id.x >= params.res.x || id.y >= params.res.y || id.z >= params.res.z;
}
"#;

const ADD_BODY: &str = r#"
@compute @workgroup_size(4, 4, 4)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    if (outside(id)) { return; }
    let i = voxel_index(id.x, id.y, id.z);
    let p = a[i];
    let q = b[i];
    dst[i] = vec4<f32>(p.xyz + q.xyz, max(p.w, q.w));
}
"#;

const COMBINE_BODY: &str = r#"
@compute @workgroup_size(4, 4, 4)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    if (outside(id)) { return; }
    let i = voxel_index(id.x, id.y, id.z);
    let albedo = a[i];
    let light = b[i];
    dst[i] = vec4<f32>(albedo.xyz * params.args.x * light.xyz, albedo.w);
}
"#;

const SCALE_BODY: &str = r#"
@compute @workgroup_size(4, 4, 4)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    if (outside(id)) { return; }
    let i = voxel_index(id.x, id.y, id.z);
    let p = a[i];
    dst[i] = vec4<f32>(p.xyz * params.args.x, p.w);
}
"#;

// b[k].x holds the weight of offset k - radius
const BLUR_BODY: &str = r#"
@compute @workgroup_size(4, 4, 4)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    if (outside(id)) { return; }
    let axis = params.res.w;
    let r = i32(params.opts.x);
    let last = i32(params.res[axis]) - 1;
    var acc = vec4<f32>(0.0);
    for (var k = -r; k <= r; k = k + 1) {
        var c = vec3<i32>(id);
        c[axis] = clamp(c[axis] + k, 0, last);
        acc = acc + a[voxel_index(u32(c.x), u32(c.y), u32(c.z))] * b[u32(k + r)].x;
    }
    dst[voxel_index(id.x, id.y, id.z)] = acc;
}
"#;

/// wgpu implementation of [`VolumeKernels`]
pub struct GpuKernels {
    device: wgpu::Device,
    queue: wgpu::Queue,
    layout: wgpu::BindGroupLayout,
    add: wgpu::ComputePipeline,
    combine: wgpu::ComputePipeline,
    scale: wgpu::ComputePipeline,
    blur: wgpu::ComputePipeline,
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl GpuKernels {
    /// Create a device and compile every kernel
    pub fn new() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or(GpuError::NoAdapter)?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("voxel-tracer Kernel Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|e: wgpu::RequestDeviceError| GpuError::DeviceCreation(e.to_string()))?;

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Volume Kernel Bind Group Layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, true),
                storage_entry(2, false),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let add = Self::pipeline(&device, &layout, "AddBuffers", ADD_BODY)?;
        let combine = Self::pipeline(&device, &layout, "CombineAlbedoWithLight", COMBINE_BODY)?;
        let scale = Self::pipeline(&device, &layout, "ScaleBuffer", SCALE_BODY)?;
        let blur = Self::pipeline(&device, &layout, "GaussianBlur3D", BLUR_BODY)?;
        log::info!("gpu kernels ready on {}", adapter.get_info().name);

        Ok(Self {
            device,
            queue,
            layout,
            add,
            combine,
            scale,
            blur,
        })
    }

    fn pipeline(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        label: &str,
        body: &str,
    ) -> Result<wgpu::ComputePipeline, GpuError> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let source = format!("{}{}", SHADER_PRELUDE, body);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });
        if let Some(e) = pollster::block_on(device.pop_error_scope()) {
            return Err(GpuError::ShaderCompilation(format!("{}: {}", label, e)));
        }
        Ok(pipeline)
    }

    fn run(
        &self,
        pipeline: &wgpu::ComputePipeline,
        a: &[Vec4],
        b: &[Vec4],
        resolution: UVec3,
        params: KernelParams,
    ) -> Result<Vec<Vec4>, GpuError> {
        let usage = wgpu::BufferUsages::STORAGE;
        let a_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Kernel Input A"),
            contents: bytemuck::cast_slice(a),
            usage,
        });
        let b_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Kernel Input B"),
            contents: bytemuck::cast_slice(b),
            usage,
        });
        let size = std::mem::size_of_val(a) as u64;
        let output_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Kernel Output Buffer"),
            size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Kernel Staging Buffer"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let uniform_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Kernel Uniforms Buffer"),
            contents: bytemuck::cast_slice(&[params]),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Kernel Bind Group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: a_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: b_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: output_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: uniform_buffer.as_entire_binding(),
                },
            ],
        });

        let groups = (resolution + UVec3::splat(WORKGROUP - 1)) / WORKGROUP;
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Kernel Encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Kernel Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups.x, groups.y, groups.z);
        }
        encoder.copy_buffer_to_buffer(&output_buffer, 0, &staging_buffer, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        // Readback
        let buffer_slice = staging_buffer.slice(..);
        let (sender, receiver) = futures_channel::oneshot::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        pollster::block_on(receiver)
            .map_err(|e| GpuError::BufferMapping(format!("Channel error: {}", e)))?
            .map_err(|e| GpuError::BufferMapping(format!("Map error: {:?}", e)))?;

        let mapped = buffer_slice.get_mapped_range();
        let floats: &[f32] = bytemuck::cast_slice(&mapped);
        let data = floats.chunks_exact(4).map(Vec4::from_slice).collect();
        drop(mapped);
        staging_buffer.unmap();
        Ok(data)
    }

    fn elementwise(
        &self,
        pipeline: &wgpu::ComputePipeline,
        a: &TexelVolume,
        b: &TexelVolume,
        scalar: f32,
    ) -> BakeResult<TexelVolume> {
        let res = a.grid.resolution;
        let params = KernelParams {
            resolution: [res.x, res.y, res.z, 0],
            options: [0; 4],
            args: [scalar, 0.0, 0.0, 0.0],
        };
        let data = self.run(pipeline, &a.data, &b.data, res, params)?;
        Ok(Volume3D { data, grid: a.grid })
    }
}

impl VolumeKernels for GpuKernels {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn add(&self, a: &TexelVolume, b: &TexelVolume) -> BakeResult<TexelVolume> {
        ensure_same_grid("add", a, b)?;
        self.elementwise(&self.add, a, b, 0.0)
    }

    fn combine_albedo_with_light(
        &self,
        albedo: &TexelVolume,
        light: &TexelVolume,
        boost: f32,
    ) -> BakeResult<TexelVolume> {
        ensure_same_grid("combine_albedo_with_light", albedo, light)?;
        self.elementwise(&self.combine, albedo, light, boost)
    }

    fn scale(&self, a: &TexelVolume, s: f32) -> BakeResult<TexelVolume> {
        self.elementwise(&self.scale, a, a, s)
    }

    fn blur_axis(&self, input: &TexelVolume, axis: usize, weights: &[f32]) -> BakeResult<TexelVolume> {
        if axis > 2 || weights.len() % 2 == 0 {
            return Err(BakeError::Config(format!(
                "blur axis {} with {} weights is not a valid kernel",
                axis,
                weights.len()
            )));
        }
        let res = input.grid.resolution;
        let params = KernelParams {
            resolution: [res.x, res.y, res.z, axis as u32],
            options: [(weights.len() / 2) as u32, 0, 0, 0],
            args: [0.0; 4],
        };
        let packed: Vec<Vec4> = weights.iter().map(|&w| Vec4::new(w, 0.0, 0.0, 0.0)).collect();
        let data = self.run(&self.blur, &input.data, &packed, res, params)?;
        Ok(Volume3D { data, grid: input.grid })
    }

    fn synchronize(&self) -> BakeResult<()> {
        self.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }
}
