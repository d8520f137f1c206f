//! Meta extraction strategies
//!
//! | Strategy           | Passes | Storage per texel                         | Normals            |
//! |--------------------|--------|-------------------------------------------|--------------------|
//! | `ThreePassStrategy`| 3      | RGBA8 albedo + RGBA16F emissive + RGBA8 n | meta normal layer  |
//! | `SinglePassStrategy`| 2 (MRT)| one u64: RGBA8 albedo + HDR emissive     | vertex normals     |

use glam::{Vec2, Vec3, Vec4};

use super::dilate::dilate;
use super::hdr::HdrEncoding;
use super::pack::PackedMetaTexture;
use super::{MetaPass, MetaRenderer, MetaSample, MetaTexels};
use crate::dispatch::{kernel_names, Dispatcher, KernelDesc, KernelLibrary};
use crate::error::BakeResult;
use crate::raster::Image2D;
use crate::scene::Surface;
use crate::volume::TexelFormat;

/// Dispatcher and resolved kernels for the post-render meta work
#[derive(Clone, Copy)]
pub struct MetaKernels<'a> {
    dispatcher: &'a Dispatcher<'a>,
    dilate: &'a KernelDesc,
    pack: &'a KernelDesc,
}

impl<'a> MetaKernels<'a> {
    /// Resolve `DilateMeta` and `PackMetaData` from `library`
    pub fn new(dispatcher: &'a Dispatcher<'a>, library: &'a KernelLibrary) -> BakeResult<Self> {
        Ok(Self {
            dispatcher,
            dilate: library.require(kernel_names::DILATE_META)?,
            pack: library.require(kernel_names::PACK_META)?,
        })
    }

    /// Seam dilation, one dispatch per executed iteration
    pub fn dilate(&self, image: &Image2D, iterations: u32) -> BakeResult<Image2D> {
        dilate(self.dispatcher, self.dilate, image, iterations)
    }

    /// 64-bit packing, one dispatch
    pub fn pack(&self, albedo: &Image2D, emissive: &Image2D, encoding: HdrEncoding) -> BakeResult<PackedMetaTexture> {
        PackedMetaTexture::pack(self.dispatcher, self.pack, albedo, emissive, encoding)
    }
}

/// How meta textures are rendered and stored
pub trait MetaExtractionStrategy: Send + Sync {
    /// Strategy name for logging
    fn name(&self) -> &'static str;

    /// Number of meta render passes per submesh
    fn pass_count(&self) -> u32;

    /// Render, dilate and store one submesh; `Ok(None)` when it has no meta pass
    fn extract(
        &self,
        kernels: &MetaKernels<'_>,
        renderer: &dyn MetaRenderer,
        surface: &Surface,
        submesh: usize,
        size: u32,
        dilation: u32,
    ) -> BakeResult<Option<Box<dyn MetaTexels>>>;
}

#[inline]
fn texel_coords(uv: Vec2, width: u32, height: u32) -> (u32, u32) {
    let p = uv.clamp(Vec2::ZERO, Vec2::ONE) * Vec2::new(width as f32, height as f32);
    ((p.x as u32).min(width - 1), (p.y as u32).min(height - 1))
}

fn quantize_image(mut image: Image2D, format: TexelFormat) -> Image2D {
    for t in &mut image.data {
        *t = format.quantize(*t);
    }
    image
}

/// Three separate passes kept as three layers
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreePassStrategy;

struct LayeredTexels {
    albedo: Image2D,
    emissive: Image2D,
    normal: Image2D,
}

impl MetaTexels for LayeredTexels {
    fn sample(&self, uv: Vec2) -> MetaSample {
        let (x, y) = texel_coords(uv, self.albedo.width, self.albedo.height);
        let albedo = self.albedo.get(x, y);
        let emissive = self.emissive.get(x, y);
        let n = self.normal.get(x, y);
        let normal = if n.w > 0.0 {
            Some((n.truncate() * 2.0 - 1.0).normalize_or_zero()).filter(|n| *n != Vec3::ZERO)
        } else {
            None
        };
        MetaSample {
            albedo,
            emissive: if emissive.w > 0.0 { emissive.truncate() } else { Vec3::ZERO },
            normal,
        }
    }

    fn size(&self) -> u32 {
        self.albedo.width
    }

    fn byte_size(&self) -> usize {
        let texels = self.albedo.data.len();
        texels
            * (TexelFormat::Rgba8Unorm.bytes_per_texel() * 2
                + TexelFormat::Rgba16Float.bytes_per_texel())
    }
}

impl MetaExtractionStrategy for ThreePassStrategy {
    fn name(&self) -> &'static str {
        "three-pass"
    }

    fn pass_count(&self) -> u32 {
        3
    }

    fn extract(
        &self,
        kernels: &MetaKernels<'_>,
        renderer: &dyn MetaRenderer,
        surface: &Surface,
        submesh: usize,
        size: u32,
        dilation: u32,
    ) -> BakeResult<Option<Box<dyn MetaTexels>>> {
        let Some(albedo) = renderer.render(surface, submesh, MetaPass::Albedo, size) else {
            return Ok(None);
        };
        let emissive = renderer
            .render(surface, submesh, MetaPass::Emissive, size)
            .unwrap_or_else(|| Image2D::new(size, size));
        let normal = renderer
            .render(surface, submesh, MetaPass::Normal, size)
            .unwrap_or_else(|| Image2D::new(size, size));

        Ok(Some(Box::new(LayeredTexels {
            albedo: quantize_image(kernels.dilate(&albedo, dilation)?, TexelFormat::Rgba8Unorm),
            emissive: quantize_image(kernels.dilate(&emissive, dilation)?, TexelFormat::Rgba16Float),
            normal: quantize_image(kernels.dilate(&normal, dilation)?, TexelFormat::Rgba8Unorm),
        })))
    }
}

/// Albedo and emissive rendered together and packed into 64 bits per texel
#[derive(Debug, Clone, Copy, Default)]
pub struct SinglePassStrategy {
    /// Encoding of the emissive half
    pub encoding: HdrEncoding,
}

struct PackedTexels(PackedMetaTexture);

impl MetaTexels for PackedTexels {
    fn sample(&self, uv: Vec2) -> MetaSample {
        let (x, y) = texel_coords(uv, self.0.width, self.0.height);
        let (albedo, emissive) = self.0.get(x, y);
        MetaSample {
            albedo,
            emissive,
            normal: None,
        }
    }

    fn size(&self) -> u32 {
        self.0.width
    }

    fn byte_size(&self) -> usize {
        self.0.byte_size()
    }
}

impl MetaExtractionStrategy for SinglePassStrategy {
    fn name(&self) -> &'static str {
        "single-pass"
    }

    fn pass_count(&self) -> u32 {
        // albedo and emissive share one multi-target pass
        1
    }

    fn extract(
        &self,
        kernels: &MetaKernels<'_>,
        renderer: &dyn MetaRenderer,
        surface: &Surface,
        submesh: usize,
        size: u32,
        dilation: u32,
    ) -> BakeResult<Option<Box<dyn MetaTexels>>> {
        let Some(albedo) = renderer.render(surface, submesh, MetaPass::Albedo, size) else {
            return Ok(None);
        };
        let emissive = renderer
            .render(surface, submesh, MetaPass::Emissive, size)
            .unwrap_or_else(|| Image2D::filled(size, size, Vec4::ZERO));

        let albedo = kernels.dilate(&albedo, dilation)?;
        let emissive = kernels.dilate(&emissive, dilation)?;
        let packed = kernels.pack(&albedo, &emissive, self.encoding)?;
        Ok(Some(Box::new(PackedTexels(packed))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::CpuKernels;
    use crate::meta::SoftwareMetaRenderer;
    use crate::scene::{Material, Mesh, SceneSurfaceProvider, StaticScene};
    use glam::Mat4;
    use std::sync::Arc;

    /// Extract one submesh; returns the texels and the dispatch count
    fn extract(
        strategy: &dyn MetaExtractionStrategy,
        s: &Surface,
        size: u32,
        dilation: u32,
    ) -> (Option<Box<dyn MetaTexels>>, u64) {
        let cpu = CpuKernels;
        let dispatcher = Dispatcher::new(&cpu, 64, false);
        let lib = KernelLibrary::standard();
        let kernels = MetaKernels::new(&dispatcher, &lib).unwrap();
        let texels = strategy.extract(&kernels, &SoftwareMetaRenderer, s, 0, size, dilation).unwrap();
        (texels, dispatcher.stats().dispatches)
    }

    fn surface() -> Surface {
        let mut scene = StaticScene::new("S");
        let mesh = Arc::new(Mesh::quad("q", Vec2::splat(2.0)));
        let mat = Arc::new(Material::emissive("lamp", Vec3::new(0.5, 0.25, 1.0), Vec3::new(3.0, 2.0, 1.0)));
        scene.add_surface("q", mesh, vec![mat], Mat4::IDENTITY);
        scene.surfaces()[0].clone()
    }

    #[test]
    fn test_three_pass_sample() {
        let s = surface();
        let (texels, dispatches) = extract(&ThreePassStrategy, &s, 16, 1);
        let texels = texels.unwrap();
        // one dilation per layer
        assert_eq!(dispatches, 3);
        let m = texels.sample(Vec2::splat(0.5));
        assert!((m.albedo - Vec4::new(0.5, 0.25, 1.0, 1.0)).abs().max_element() < 1.0 / 255.0);
        assert!((m.emissive - Vec3::new(3.0, 2.0, 1.0)).abs().max_element() < 1e-2);
        let n = m.normal.unwrap();
        assert!(n.dot(Vec3::Y) > 0.99);
        assert_eq!(texels.byte_size(), 16 * 16 * 16);
    }

    #[test]
    fn test_single_pass_sample_has_no_normal() {
        let s = surface();
        let strategy = SinglePassStrategy {
            encoding: HdrEncoding::Rgbm,
        };
        let (texels, dispatches) = extract(&strategy, &s, 16, 1);
        let texels = texels.unwrap();
        // albedo and emissive dilation, then the pack
        assert_eq!(dispatches, 3);
        let m = texels.sample(Vec2::splat(0.5));
        assert!(m.normal.is_none());
        assert!((m.emissive - Vec3::new(3.0, 2.0, 1.0)).abs().max_element() < 0.05);
        assert_eq!(texels.byte_size(), 16 * 16 * 8);
        assert_eq!(strategy.pass_count(), 1);
    }

    #[test]
    fn test_meta_kernels_required() {
        let cpu = CpuKernels;
        let dispatcher = Dispatcher::new(&cpu, 64, false);
        for name in [kernel_names::DILATE_META, kernel_names::PACK_META] {
            let lib = KernelLibrary::standard().without(name);
            assert!(matches!(
                MetaKernels::new(&dispatcher, &lib),
                Err(crate::error::BakeError::MissingKernel(n)) if n == name
            ));
        }
    }

    #[test]
    fn test_missing_pass_gives_none() {
        let mut s = surface();
        let mut mat = (*s.materials[0]).clone();
        mat.has_meta_pass = false;
        s.materials[0] = Arc::new(mat);
        let (texels, dispatches) = extract(&ThreePassStrategy, &s, 8, 1);
        assert!(texels.is_none());
        assert_eq!(dispatches, 0);
    }
}
