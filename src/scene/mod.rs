//! Host scene interface
//!
//! The baker never walks a live scene. It consumes drawable surfaces and lights
//! through the [`SceneSurfaceProvider`] and [`SceneLightProvider`] traits, so the
//! pipeline can be driven by a real engine or by the in-memory [`StaticScene`].
//!
//! # Contents
//!
//! - **Mesh**: positions, normals and lightmap UVs (UV1) split into submeshes
//! - **Material**: linear albedo, HDR emission, optional albedo map
//! - **Surface**: mesh + per-submesh materials + transform + layer/flags
//! - **VisibilitySet**: surfaces excluded because they belong to LOD levels 1..N

pub mod demo;
pub mod light;

use std::collections::HashSet;
use std::sync::Arc;

use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::grid::Aabb;
use crate::raster::Image2D;

pub use light::SceneLight;

/// Opaque identifier of a drawable surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u64);

/// Vertex with position, normal and lightmap UV
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    /// Position in object space
    pub position: Vec3,
    /// Surface normal in object space
    pub normal: Vec3,
    /// Lightmap UV (UV1), unique per texel in [0, 1]²
    pub uv1: Vec2,
}

impl Vertex {
    /// Create a new vertex
    pub fn new(position: Vec3, normal: Vec3, uv1: Vec2) -> Self {
        Vertex {
            position,
            normal,
            uv1,
        }
    }
}

/// Triangle mesh with submeshes
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    /// Mesh name (diagnostics only)
    pub name: String,
    /// Shared vertex array
    pub vertices: Vec<Vertex>,
    /// Triangle index lists, one per submesh
    pub submeshes: Vec<Vec<u32>>,
}

impl Mesh {
    /// Create a mesh from vertices and submesh index lists
    pub fn new(name: impl Into<String>, vertices: Vec<Vertex>, submeshes: Vec<Vec<u32>>) -> Self {
        Mesh {
            name: name.into(),
            vertices,
            submeshes,
        }
    }

    /// Number of submeshes
    #[inline]
    pub fn submesh_count(&self) -> usize {
        self.submeshes.len()
    }

    /// Total triangle count across submeshes
    pub fn triangle_count(&self) -> usize {
        self.submeshes.iter().map(|s| s.len() / 3).sum()
    }

    /// Object-space bounds
    pub fn local_bounds(&self) -> Aabb {
        Aabb::from_points(self.vertices.iter().map(|v| v.position))
    }

    /// Triangles of one submesh; out-of-range indices are skipped
    pub fn triangles(&self, submesh: usize) -> impl Iterator<Item = [Vertex; 3]> + '_ {
        let indices = self.submeshes.get(submesh).map(Vec::as_slice).unwrap_or(&[]);
        indices.chunks_exact(3).filter_map(move |t| {
            Some([
                *self.vertices.get(t[0] as usize)?,
                *self.vertices.get(t[1] as usize)?,
                *self.vertices.get(t[2] as usize)?,
            ])
        })
    }

    /// Axis-aligned box centred at the origin with outward normals
    pub fn cuboid(name: impl Into<String>, size: Vec3) -> Self {
        let h = size * 0.5;
        // (normal, u axis, v axis) per face
        let faces = [
            (Vec3::X, Vec3::NEG_Z, Vec3::Y),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, Vec3::NEG_Z),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
        ];
        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (n, u, v) in faces {
            let base = vertices.len() as u32;
            let c = n * h;
            let du = u * h;
            let dv = v * h;
            for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                vertices.push(Vertex::new(c + du * su + dv * sv, n, Vec2::ZERO));
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        let mut mesh = Mesh::new(name, vertices, vec![indices]);
        mesh.generate_uv1(64);
        mesh
    }

    /// Quad in the XZ plane facing +Y, centred at the origin
    pub fn quad(name: impl Into<String>, size: Vec2) -> Self {
        let h = size * 0.5;
        let corners = [
            Vec3::new(-h.x, 0.0, h.y),
            Vec3::new(h.x, 0.0, h.y),
            Vec3::new(h.x, 0.0, -h.y),
            Vec3::new(-h.x, 0.0, -h.y),
        ];
        let uvs = [Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(1.0, 1.0), Vec2::new(0.0, 1.0)];
        let vertices = corners
            .iter()
            .zip(uvs)
            .map(|(&p, uv)| Vertex::new(p, Vec3::Y, uv))
            .collect();
        Mesh::new(name, vertices, vec![vec![0, 1, 2, 0, 2, 3]])
    }

    /// Generate non-overlapping UV1 coordinates by dominant-axis projection
    ///
    /// Triangles are grouped by the dominant axis of their face normal
    /// (+X, -X, +Y, -Y, +Z, -Z) and each group is packed into one cell of a
    /// 3×2 atlas with a two-texel border for the given lightmap resolution.
    /// Vertices shared between groups are split.
    pub fn generate_uv1(&mut self, resolution: u32) {
        let padding = 2.0 / resolution.max(1) as f32;
        let mut groups: [Vec<(usize, usize)>; 6] = Default::default();

        for (s, indices) in self.submeshes.iter().enumerate() {
            for t in 0..indices.len() / 3 {
                let p = |k: usize| self.vertices[indices[t * 3 + k] as usize].position;
                let n = (p(1) - p(0)).cross(p(2) - p(0)).normalize_or_zero();
                groups[dominant_axis(n)].push((s, t));
            }
        }

        let mut vertex_group = vec![usize::MAX; self.vertices.len()];
        for (g, tris) in groups.iter().enumerate() {
            for &(s, t) in tris {
                for k in 0..3 {
                    let vi = self.submeshes[s][t * 3 + k] as usize;
                    if vertex_group[vi] == usize::MAX {
                        vertex_group[vi] = g;
                    } else if vertex_group[vi] != g {
                        let new_vi = self.vertices.len();
                        self.vertices.push(self.vertices[vi]);
                        vertex_group.push(g);
                        self.submeshes[s][t * 3 + k] = new_vi as u32;
                    }
                }
            }
        }

        let cell = Vec2::new(1.0 / 3.0, 0.5);
        let usable = cell - Vec2::splat(padding * 2.0);
        for (g, tris) in groups.iter().enumerate() {
            if tris.is_empty() {
                continue;
            }
            let offset = Vec2::new((g % 3) as f32 * cell.x, if g < 3 { 0.5 } else { 0.0 });
            let verts: Vec<usize> = tris
                .iter()
                .flat_map(|&(s, t)| (0..3).map(move |k| (s, t * 3 + k)))
                .map(|(s, i)| self.submeshes[s][i] as usize)
                .collect();
            let (lo, hi) = verts.iter().fold(
                (Vec2::splat(f32::MAX), Vec2::splat(f32::MIN)),
                |(lo, hi), &vi| {
                    let p = project_to_2d(self.vertices[vi].position, g);
                    (lo.min(p), hi.max(p))
                },
            );
            let range = hi - lo;
            let inv = Vec2::new(
                if range.x > 1e-6 { 1.0 / range.x } else { 0.0 },
                if range.y > 1e-6 { 1.0 / range.y } else { 0.0 },
            );
            for vi in verts {
                let p = project_to_2d(self.vertices[vi].position, g);
                self.vertices[vi].uv1 = offset + Vec2::splat(padding) + (p - lo) * inv * usable;
            }
        }
    }
}

#[inline]
fn dominant_axis(n: Vec3) -> usize {
    let a = n.abs();
    if a.x >= a.y && a.x >= a.z {
        if n.x >= 0.0 { 0 } else { 1 }
    } else if a.y >= a.z {
        if n.y >= 0.0 { 2 } else { 3 }
    } else if n.z >= 0.0 {
        4
    } else {
        5
    }
}

#[inline]
fn project_to_2d(p: Vec3, group: usize) -> Vec2 {
    match group {
        0 | 1 => Vec2::new(p.z, p.y),
        2 | 3 => Vec2::new(p.x, p.z),
        _ => Vec2::new(p.x, p.y),
    }
}

/// Surface material as seen by the meta pass
#[derive(Debug, Clone)]
pub struct Material {
    /// Material name (diagnostics only)
    pub name: String,
    /// Linear albedo RGB and coverage alpha
    pub albedo: Vec4,
    /// Linear HDR emission
    pub emission: Vec3,
    /// Optional albedo map sampled with UV1, multiplied with `albedo`
    pub albedo_map: Option<Arc<Image2D>>,
    /// Whether the material has a meta pass; without one it contributes nothing
    pub has_meta_pass: bool,
}

impl Material {
    /// Opaque diffuse material
    pub fn diffuse(name: impl Into<String>, albedo: Vec3) -> Self {
        Material {
            name: name.into(),
            albedo: albedo.extend(1.0),
            emission: Vec3::ZERO,
            albedo_map: None,
            has_meta_pass: true,
        }
    }

    /// Emissive material
    pub fn emissive(name: impl Into<String>, albedo: Vec3, emission: Vec3) -> Self {
        Material {
            emission,
            ..Material::diffuse(name, albedo)
        }
    }

    /// Albedo at a UV1 coordinate
    pub fn albedo_at(&self, uv: Vec2) -> Vec4 {
        match &self.albedo_map {
            Some(map) => self.albedo * map.sample_bilinear(uv),
            None => self.albedo,
        }
    }
}

/// A drawable object
#[derive(Debug, Clone)]
pub struct Surface {
    /// Identifier used for LOD exclusion
    pub id: SurfaceId,
    /// Object name (diagnostics only)
    pub name: String,
    /// Geometry
    pub mesh: Arc<Mesh>,
    /// One material per submesh
    pub materials: Vec<Arc<Material>>,
    /// Object-to-world transform
    pub transform: Mat4,
    /// Layer index (0..32)
    pub layer: u32,
    /// Contributes to global illumination
    pub gi_contributor: bool,
    /// Casts shadows
    pub shadow_caster: bool,
}

impl Surface {
    /// World-space bounds
    pub fn world_bounds(&self) -> Aabb {
        self.mesh.local_bounds().transformed(&self.transform)
    }

    /// Material of a submesh, if assigned
    pub fn material(&self, submesh: usize) -> Option<&Material> {
        self.materials.get(submesh).map(|m| m.as_ref())
    }
}

/// LOD group: `levels[0]` is the most detailed level
#[derive(Debug, Clone, Default)]
pub struct LodGroup {
    /// Surfaces per LOD level
    pub levels: Vec<Vec<SurfaceId>>,
}

/// Surfaces excluded from voxelization
#[derive(Debug, Clone, Default)]
pub struct VisibilitySet {
    excluded: HashSet<SurfaceId>,
}

impl VisibilitySet {
    /// Exclude every surface found in LOD levels 1..N of any group
    pub fn from_lod_groups(groups: &[LodGroup]) -> Self {
        let excluded = groups
            .iter()
            .flat_map(|g| g.levels.iter().skip(1))
            .flatten()
            .copied()
            .collect();
        VisibilitySet { excluded }
    }

    /// Whether a surface is excluded
    #[inline]
    pub fn is_excluded(&self, id: SurfaceId) -> bool {
        self.excluded.contains(&id)
    }

    /// Number of excluded surfaces
    pub fn len(&self) -> usize {
        self.excluded.len()
    }

    /// True when nothing is excluded
    pub fn is_empty(&self) -> bool {
        self.excluded.is_empty()
    }
}

/// Drawable-surface queries against the host scene
pub trait SceneSurfaceProvider {
    /// Scene name; empty means the scene was never named
    fn scene_name(&self) -> &str;
    /// Whether the scene has been saved
    fn is_saved(&self) -> bool;
    /// Every drawable surface
    fn surfaces(&self) -> &[Surface];
    /// LOD groups of the scene
    fn lod_groups(&self) -> &[LodGroup];
}

/// Light queries against the host scene
pub trait SceneLightProvider {
    /// Every enabled light, rebuilt on each call
    fn lights(&self) -> Vec<SceneLight>;
}

/// In-memory scene implementing both providers
#[derive(Debug, Clone)]
pub struct StaticScene {
    name: String,
    saved: bool,
    surfaces: Vec<Surface>,
    lod_groups: Vec<LodGroup>,
    lights: Vec<SceneLight>,
    next_id: u64,
}

impl StaticScene {
    /// Create an empty, saved scene
    pub fn new(name: impl Into<String>) -> Self {
        StaticScene {
            name: name.into(),
            saved: true,
            surfaces: Vec::new(),
            lod_groups: Vec::new(),
            lights: Vec::new(),
            next_id: 1,
        }
    }

    /// Mark the scene saved or unsaved
    pub fn set_saved(&mut self, saved: bool) {
        self.saved = saved;
    }

    /// Add a GI-contributing, shadow-casting surface on layer 0
    pub fn add_surface(
        &mut self,
        name: impl Into<String>,
        mesh: Arc<Mesh>,
        materials: Vec<Arc<Material>>,
        transform: Mat4,
    ) -> SurfaceId {
        let id = SurfaceId(self.next_id);
        self.next_id += 1;
        self.surfaces.push(Surface {
            id,
            name: name.into(),
            mesh,
            materials,
            transform,
            layer: 0,
            gi_contributor: true,
            shadow_caster: true,
        });
        id
    }

    /// Mutable access to a surface
    pub fn surface_mut(&mut self, id: SurfaceId) -> Option<&mut Surface> {
        self.surfaces.iter_mut().find(|s| s.id == id)
    }

    /// Add a LOD group
    pub fn add_lod_group(&mut self, group: LodGroup) {
        self.lod_groups.push(group);
    }

    /// Add a light
    pub fn add_light(&mut self, light: SceneLight) {
        self.lights.push(light);
    }
}

impl SceneSurfaceProvider for StaticScene {
    fn scene_name(&self) -> &str {
        &self.name
    }

    fn is_saved(&self) -> bool {
        self.saved
    }

    fn surfaces(&self) -> &[Surface] {
        &self.surfaces
    }

    fn lod_groups(&self) -> &[LodGroup] {
        &self.lod_groups
    }
}

impl SceneLightProvider for StaticScene {
    fn lights(&self) -> Vec<SceneLight> {
        self.lights.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cuboid_geometry() {
        let mesh = Mesh::cuboid("box", Vec3::new(2.0, 4.0, 6.0));
        assert_eq!(mesh.triangle_count(), 12);
        let b = mesh.local_bounds();
        assert!((b.size() - Vec3::new(2.0, 4.0, 6.0)).length() < 1e-5);
        for [a, b, c] in mesh.triangles(0) {
            let face = (b.position - a.position).cross(c.position - a.position).normalize();
            assert!(face.dot(a.normal) > 0.99, "winding must match normal");
        }
    }

    #[test]
    fn test_cuboid_uv1_islands_disjoint() {
        let mesh = Mesh::cuboid("box", Vec3::ONE);
        let cells: HashSet<(u32, u32)> = mesh
            .triangles(0)
            .map(|[a, b, c]| {
                let centroid = (a.uv1 + b.uv1 + c.uv1) / 3.0;
                ((centroid.x * 3.0) as u32, (centroid.y * 2.0) as u32)
            })
            .collect();
        assert_eq!(cells.len(), 6);
        assert!(mesh
            .vertices
            .iter()
            .all(|v| v.uv1.min_element() >= 0.0 && v.uv1.max_element() <= 1.0));
    }

    #[test]
    fn test_quad_faces_up() {
        let mesh = Mesh::quad("floor", Vec2::splat(2.0));
        let [a, b, c] = mesh.triangles(0).next().unwrap();
        let n = (b.position - a.position).cross(c.position - a.position);
        assert!(n.normalize().dot(Vec3::Y) > 0.99);
    }

    #[test]
    fn test_visibility_set_excludes_lower_lods() {
        let groups = [LodGroup {
            levels: vec![vec![SurfaceId(1)], vec![SurfaceId(2)], vec![SurfaceId(3), SurfaceId(4)]],
        }];
        let set = VisibilitySet::from_lod_groups(&groups);
        assert!(!set.is_excluded(SurfaceId(1)));
        assert!(set.is_excluded(SurfaceId(2)));
        assert!(set.is_excluded(SurfaceId(4)));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_surface_world_bounds() {
        let mut scene = StaticScene::new("Test");
        let mesh = Arc::new(Mesh::cuboid("box", Vec3::ONE));
        let mat = Arc::new(Material::diffuse("white", Vec3::ONE));
        let id = scene.add_surface("box", mesh, vec![mat], Mat4::from_translation(Vec3::X * 3.0));
        let s = scene.surfaces().iter().find(|s| s.id == id).unwrap();
        let b = s.world_bounds();
        assert!((b.center() - Vec3::X * 3.0).length() < 1e-5);
        assert!(s.material(0).is_some());
        assert!(s.material(1).is_none());
    }
}
