//! CPU triangle rasterizer and 2D RGBA images
//!
//! Used twice by the bake: the meta pass rasterizes triangles in lightmap-UV
//! space, and the voxelizer rasterizes them orthographically per slice.
//!
//! Pixel `(x, y)` is sampled at its centre `(x + 0.5, y + 0.5)`. A pixel is
//! covered when all three barycentric weights are `>= 0`.

use glam::{Vec2, Vec3, Vec4};

/// RGBA float image; alpha 0 marks an unwritten (invalid) texel
#[derive(Debug, Clone, PartialEq)]
pub struct Image2D {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Row-major texels
    pub data: Vec<Vec4>,
}

impl Image2D {
    /// Create a cleared image (every texel invalid)
    pub fn new(width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        Image2D {
            width,
            height,
            data: vec![Vec4::ZERO; width as usize * height as usize],
        }
    }

    /// Create an image filled with `value`
    pub fn filled(width: u32, height: u32, value: Vec4) -> Self {
        let mut img = Image2D::new(width, height);
        img.data.fill(value);
        img
    }

    /// Flat index of a pixel
    #[inline(always)]
    pub fn index(&self, x: u32, y: u32) -> usize {
        x as usize + y as usize * self.width as usize
    }

    /// Get pixel
    #[inline(always)]
    pub fn get(&self, x: u32, y: u32) -> Vec4 {
        self.data[self.index(x, y)]
    }

    /// Set pixel
    #[inline(always)]
    pub fn set(&mut self, x: u32, y: u32, value: Vec4) {
        let idx = self.index(x, y);
        self.data[idx] = value;
    }

    /// Nearest-texel lookup; `uv` is clamped to [0, 1]²
    pub fn sample_nearest(&self, uv: Vec2) -> Vec4 {
        let p = uv.clamp(Vec2::ZERO, Vec2::ONE) * Vec2::new(self.width as f32, self.height as f32);
        let x = (p.x as u32).min(self.width - 1);
        let y = (p.y as u32).min(self.height - 1);
        self.get(x, y)
    }

    /// Bilinear lookup with clamp-to-edge addressing
    pub fn sample_bilinear(&self, uv: Vec2) -> Vec4 {
        let p = uv * Vec2::new(self.width as f32, self.height as f32) - 0.5;
        let base = p.floor();
        let t = p - base;
        let max = Vec2::new((self.width - 1) as f32, (self.height - 1) as f32);
        let at = |dx: f32, dy: f32| {
            let q = (base + Vec2::new(dx, dy)).clamp(Vec2::ZERO, max);
            self.get(q.x as u32, q.y as u32)
        };
        let top = at(0.0, 0.0).lerp(at(1.0, 0.0), t.x);
        let bottom = at(0.0, 1.0).lerp(at(1.0, 1.0), t.x);
        top.lerp(bottom, t.y)
    }

    /// Number of texels with alpha above zero
    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|t| t.w > 0.0).count()
    }
}

/// Barycentric weights of `p` in triangle `tri`; `None` for degenerate triangles
#[inline]
pub fn barycentric_2d(tri: &[Vec2; 3], p: Vec2) -> Option<Vec3> {
    let u = Vec3::new(tri[2].x - tri[0].x, tri[1].x - tri[0].x, tri[0].x - p.x).cross(Vec3::new(
        tri[2].y - tri[0].y,
        tri[1].y - tri[0].y,
        tri[0].y - p.y,
    ));
    if u.z.abs() < 1e-9 {
        return None;
    }
    Some(Vec3::new(1.0 - (u.x + u.y) / u.z, u.y / u.z, u.x / u.z))
}

/// Twice the signed area of a 2D triangle (positive when counter-clockwise)
#[inline]
pub fn signed_area(tri: &[Vec2; 3]) -> f32 {
    (tri[1] - tri[0]).perp_dot(tri[2] - tri[0])
}

/// Rasterize a triangle given in pixel coordinates
///
/// Calls `fragment(x, y, barycentric)` for every covered pixel inside the
/// `width × height` target. Degenerate triangles produce no fragments.
pub fn rasterize_triangle<F>(width: u32, height: u32, tri: &[Vec2; 3], mut fragment: F)
where
    F: FnMut(u32, u32, Vec3),
{
    let lo = tri[0].min(tri[1]).min(tri[2]);
    let hi = tri[0].max(tri[1]).max(tri[2]);
    if hi.x < 0.0 || hi.y < 0.0 || lo.x >= width as f32 || lo.y >= height as f32 {
        return;
    }
    // pixel centres inside [lo, hi]
    let x0 = (lo.x - 0.5).ceil().max(0.0) as u32;
    let y0 = (lo.y - 0.5).ceil().max(0.0) as u32;
    let x1 = ((hi.x - 0.5).floor().min(width as f32 - 1.0)).max(-1.0);
    let y1 = ((hi.y - 0.5).floor().min(height as f32 - 1.0)).max(-1.0);
    if x1 < 0.0 || y1 < 0.0 {
        return;
    }
    let (x1, y1) = (x1 as u32, y1 as u32);

    for y in y0..=y1 {
        for x in x0..=x1 {
            let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
            let Some(b) = barycentric_2d(tri, p) else {
                return;
            };
            if b.x >= 0.0 && b.y >= 0.0 && b.z >= 0.0 {
                fragment(x, y, b);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_barycentric_vertices() {
        let tri = [Vec2::ZERO, Vec2::new(4.0, 0.0), Vec2::new(0.0, 4.0)];
        let b = barycentric_2d(&tri, Vec2::new(4.0, 0.0)).unwrap();
        assert!((b - Vec3::new(0.0, 1.0, 0.0)).length() < 1e-5);
        let b = barycentric_2d(&tri, Vec2::new(1.0, 1.0)).unwrap();
        assert!((b.x + b.y + b.z - 1.0).abs() < 1e-5);
        assert!(barycentric_2d(&[Vec2::ZERO, Vec2::ONE, Vec2::splat(2.0)], Vec2::ZERO).is_none());
    }

    #[test]
    fn test_full_quad_covers_every_pixel_once() {
        let (w, h) = (7u32, 5u32);
        let mut hits = vec![0u32; (w * h) as usize];
        let a = Vec2::ZERO;
        let b = Vec2::new(w as f32, 0.0);
        let c = Vec2::new(w as f32, h as f32);
        let d = Vec2::new(0.0, h as f32);
        for tri in [[a, b, c], [a, c, d]] {
            let mut covered = vec![false; (w * h) as usize];
            rasterize_triangle(w, h, &tri, |x, y, _| covered[(x + y * w) as usize] = true);
            for (hit, c) in hits.iter_mut().zip(covered) {
                *hit += c as u32;
            }
        }
        assert!(hits.iter().all(|&n| n >= 1));
    }

    #[test]
    fn test_offscreen_triangle_is_clipped() {
        let tri = [Vec2::new(-10.0, -10.0), Vec2::new(-5.0, -10.0), Vec2::new(-5.0, -5.0)];
        let mut n = 0;
        rasterize_triangle(8, 8, &tri, |_, _, _| n += 1);
        assert_eq!(n, 0);
    }

    #[test]
    fn test_bilinear_sampling() {
        let mut img = Image2D::new(2, 1);
        img.set(0, 0, Vec4::ZERO);
        img.set(1, 0, Vec4::ONE);
        assert!((img.sample_bilinear(Vec2::new(0.5, 0.5)).x - 0.5).abs() < 1e-5);
        assert_eq!(img.sample_bilinear(Vec2::new(0.0, 0.5)), Vec4::ZERO);
        assert_eq!(img.sample_nearest(Vec2::new(0.9, 0.2)), Vec4::ONE);
        assert_eq!(img.valid_count(), 1);
    }
}
