//! 64-bit albedo + emissive meta texel packing
//!
//! Layout of one texel (little-endian bit order):
//!
//! ```text
//! bits  0..32  albedo RGBA8 unorm (R in the lowest byte)
//! bits 32..64  emissive, four bytes of the configured HdrEncoding
//! ```

use glam::{Vec3, Vec4};

use super::hdr::HdrEncoding;
use crate::dispatch::{Dispatcher, KernelDesc};
use crate::error::BakeResult;
use crate::raster::Image2D;

/// Packed albedo + emissive meta texture
#[derive(Debug, Clone, PartialEq)]
pub struct PackedMetaTexture {
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
    /// Encoding of the high 32 bits
    pub encoding: HdrEncoding,
    /// Row-major packed texels
    pub data: Vec<u64>,
}

/// Pack one texel
#[inline]
pub fn pack_texel(albedo: Vec4, emissive: Vec3, encoding: HdrEncoding) -> u64 {
    let a = (albedo.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round();
    let low = u32::from_le_bytes([a.x as u8, a.y as u8, a.z as u8, a.w as u8]);
    let high = u32::from_le_bytes(encoding.encode(emissive));
    (low as u64) | ((high as u64) << 32)
}

/// Unpack one texel into (albedo, emissive)
#[inline]
pub fn unpack_texel(texel: u64, encoding: HdrEncoding) -> (Vec4, Vec3) {
    let low = (texel as u32).to_le_bytes();
    let high = ((texel >> 32) as u32).to_le_bytes();
    let albedo = Vec4::new(low[0] as f32, low[1] as f32, low[2] as f32, low[3] as f32) / 255.0;
    (albedo, encoding.decode(high))
}

impl PackedMetaTexture {
    /// Pack two same-sized images as one `PackMetaData` dispatch
    ///
    /// The emissive image only contributes where the albedo texel is valid.
    pub fn pack(
        dispatcher: &Dispatcher<'_>,
        kernel: &KernelDesc,
        albedo: &Image2D,
        emissive: &Image2D,
        encoding: HdrEncoding,
    ) -> BakeResult<Self> {
        let width = albedo.width as usize;
        let mut data = vec![0u64; albedo.data.len()];
        dispatcher.dispatch_plane(kernel, [albedo.width, albedo.height], |x, y| {
            let i = x as usize + y as usize * width;
            let a = albedo.data[i];
            let e = emissive.data.get(i).copied().unwrap_or(Vec4::ZERO);
            let e = if a.w > 0.0 { e.truncate() } else { Vec3::ZERO };
            data[i] = pack_texel(a, e, encoding);
        })?;
        Ok(PackedMetaTexture {
            width: albedo.width,
            height: albedo.height,
            encoding,
            data,
        })
    }

    /// Unpack the texel at integer coordinates
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> (Vec4, Vec3) {
        let idx = x as usize + y as usize * self.width as usize;
        unpack_texel(self.data[idx], self.encoding)
    }

    /// Size of the packed texture in bytes
    pub fn byte_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<u64>()
    }
}
