//! Orthographic slice rendering for one axis pass
//!
//! Triangles are transformed once into grid coordinates. A slice `s` of an
//! axis pass keeps the fragments whose interpolated depth along the axis lies
//! in `[s, s + 1)`, and of those the one closest to the camera.

use glam::{Mat3, Vec2, Vec3, Vec4};

use crate::grid::VoxelGrid;
use crate::meta::SurfaceMetaRecord;
use crate::raster::{rasterize_triangle, signed_area};

/// One of the six capture directions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisPass {
    /// Axis index (0 = X, 1 = Y, 2 = Z)
    pub axis: usize,
    /// Camera sits on the `+axis` side looking toward `-axis`
    pub positive: bool,
}

impl AxisPass {
    /// Capture order: +X, -X, +Y, -Y, +Z, -Z
    pub const ORDER: [AxisPass; 6] = [
        AxisPass { axis: 0, positive: true },
        AxisPass { axis: 0, positive: false },
        AxisPass { axis: 1, positive: true },
        AxisPass { axis: 1, positive: false },
        AxisPass { axis: 2, positive: true },
        AxisPass { axis: 2, positive: false },
    ];

    /// Image-plane axes `(u, v)`
    #[inline]
    pub fn plane_axes(self) -> (usize, usize) {
        ((self.axis + 1) % 3, (self.axis + 2) % 3)
    }

    /// Label for logging
    pub fn label(self) -> &'static str {
        match (self.axis, self.positive) {
            (0, true) => "+X",
            (0, false) => "-X",
            (1, true) => "+Y",
            (1, false) => "-Y",
            (2, true) => "+Z",
            _ => "-Z",
        }
    }

    /// Voxel coordinates of plane pixel `(pu, pv)` in slice `s`
    #[inline]
    pub fn voxel(self, s: u32, pu: u32, pv: u32) -> [u32; 3] {
        let (u, v) = self.plane_axes();
        let mut c = [0u32; 3];
        c[self.axis] = s;
        c[u] = pu;
        c[v] = pv;
        c
    }
}

/// Triangle prepared for slicing
#[derive(Debug, Clone, Copy)]
pub struct GridTriangle {
    /// Vertex positions in grid coordinates
    pub g: [Vec3; 3],
    /// World-space vertex normals
    pub n: [Vec3; 3],
    /// Lightmap UVs
    pub uv: [Vec2; 3],
    /// Geometric world-space face normal
    pub face_normal: Vec3,
    /// Index of the owning record
    pub record: usize,
}

/// Transform every record's triangles into grid space
pub fn prepare_triangles(records: &[SurfaceMetaRecord], grid: &VoxelGrid) -> Vec<GridTriangle> {
    let mut out = Vec::new();
    for (ri, record) in records.iter().enumerate() {
        let normal_matrix = Mat3::from_mat4(record.transform).inverse().transpose();
        for [a, b, c] in record.mesh.triangles(record.submesh) {
            let w = [a, b, c].map(|v| record.transform.transform_point3(v.position));
            let face_normal = (w[1] - w[0]).cross(w[2] - w[0]).normalize_or_zero();
            out.push(GridTriangle {
                g: w.map(|p| grid.world_to_grid(p)),
                n: [a, b, c].map(|v| (normal_matrix * v.normal).normalize_or_zero()),
                uv: [a.uv1, b.uv1, c.uv1],
                face_normal,
                record: ri,
            });
        }
    }
    out
}

/// Closest fragment of one slice pixel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fragment {
    /// Depth along the pass axis in grid units
    pub depth: f32,
    /// Albedo RGB + coverage
    pub albedo: Vec4,
    /// HDR emission
    pub emissive: Vec3,
    /// World-space normal
    pub normal: Vec3,
}

/// Rendered slice: one optional fragment per plane pixel
#[derive(Debug, Clone)]
pub struct SliceImage {
    /// Plane width (`resolution[u]`)
    pub width: u32,
    /// Plane height (`resolution[v]`)
    pub height: u32,
    /// Row-major fragments
    pub fragments: Vec<Option<Fragment>>,
}

impl SliceImage {
    /// Fragment at a pixel
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> Option<Fragment> {
        self.fragments[x as usize + y as usize * self.width as usize]
    }

    /// Number of covered pixels
    pub fn covered(&self) -> usize {
        self.fragments.iter().filter(|f| f.is_some()).count()
    }
}

/// Slice render options
#[derive(Debug, Clone, Copy)]
pub struct SliceOptions {
    /// Keep back-facing triangles
    pub double_sided: bool,
    /// Skip records whose bounds miss the slab
    pub cull_per_slice: bool,
}

/// Render slice `s` of `pass`
pub fn render_slice(
    pass: AxisPass,
    s: u32,
    grid: &VoxelGrid,
    triangles: &[GridTriangle],
    records: &[SurfaceMetaRecord],
    options: SliceOptions,
) -> SliceImage {
    let (u, v) = pass.plane_axes();
    let res = grid.resolution.to_array();
    let (width, height) = (res[u], res[v]);
    let mut image = SliceImage {
        width,
        height,
        fragments: vec![None; width as usize * height as usize],
    };

    let a = pass.axis;
    let lo = s as f32;
    let hi = lo + 1.0;
    let slab_min = grid.world_min()[a] + lo * grid.voxel_size()[a];
    let slab_max = slab_min + grid.voxel_size()[a];

    for tri in triangles {
        let tmin = tri.g[0][a].min(tri.g[1][a]).min(tri.g[2][a]);
        let tmax = tri.g[0][a].max(tri.g[1][a]).max(tri.g[2][a]);
        if tmax < lo || tmin >= hi {
            continue;
        }
        if options.cull_per_slice {
            let b = records[tri.record].bounds;
            if b.max[a] < slab_min || b.min[a] > slab_max {
                continue;
            }
        }
        let facing = if pass.positive {
            tri.face_normal[a]
        } else {
            -tri.face_normal[a]
        };
        if !options.double_sided && facing <= 0.0 {
            continue;
        }

        let texels = &records[tri.record].texels;
        let proj = tri.g.map(|p| Vec2::new(p[u], p[v]));
        // edge-on to this camera
        if signed_area(&proj).abs() < 1e-6 {
            continue;
        }
        rasterize_triangle(width, height, &proj, |x, y, b| {
            let depth = tri.g[0][a] * b.x + tri.g[1][a] * b.y + tri.g[2][a] * b.z;
            if depth < lo || depth >= hi {
                return;
            }
            let idx = x as usize + y as usize * width as usize;
            if let Some(existing) = image.fragments[idx] {
                let closer = if pass.positive {
                    depth > existing.depth
                } else {
                    depth < existing.depth
                };
                if !closer {
                    return;
                }
            }
            let uv = tri.uv[0] * b.x + tri.uv[1] * b.y + tri.uv[2] * b.z;
            let sample = texels.sample(uv);
            if sample.albedo.w <= 0.0 {
                return;
            }
            let normal = sample.normal.unwrap_or_else(|| {
                (tri.n[0] * b.x + tri.n[1] * b.y + tri.n[2] * b.z).normalize_or_zero()
            });
            image.fragments[idx] = Some(Fragment {
                depth,
                albedo: sample.albedo,
                emissive: sample.emissive,
                normal,
            });
        });
    }
    image
}
