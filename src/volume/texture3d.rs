//! `.texture3d` volume container (Deep Fried Edition)
//!
//! Header (48 bytes, little-endian):
//!   - Magic: "VT3D" (4 bytes)
//!   - Version: u16 (2 bytes)
//!   - Format: u16 (2 bytes, see [`TexelFormat::id`])
//!   - Resolution: 3 × u32 (12 bytes)
//!   - Center: 3 × f32 (12 bytes)
//!   - Size: 3 × f32 (12 bytes)
//!   - CRC32 of the body: u32 (4 bytes)
//!
//! Body:
//!   - Z-major texels, RGBA, 1/2/4 bytes per channel depending on the format
//!
//! # Deep Fried Optimizations
//! - **Streaming Write**: body is streamed through a CRC writer, header patched by seek.
//! - **CRC-First Read**: the body checksum is validated before any texel is decoded.

use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;

use glam::{UVec3, Vec3, Vec4};
use half::f16;

use super::store::StoreError;
use super::{TexelFormat, TexelVolume, Volume3D};
use crate::grid::{VoxelGrid, MAX_RESOLUTION};

/// Magic bytes for the container
pub const TEXTURE3D_MAGIC: [u8; 4] = *b"VT3D";

/// Current format version
pub const TEXTURE3D_VERSION: u16 = 1;

/// Header size in bytes
pub const HEADER_SIZE: usize = 48;

/// File extension used by directory stores
pub const TEXTURE3D_EXTENSION: &str = "texture3d";

/// `.texture3d` header
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Texture3DHeader {
    /// Format version
    pub version: u16,
    /// Texel storage format
    pub format: TexelFormat,
    /// Grid the volume was baked for
    pub grid: VoxelGrid,
    /// CRC32 of the body
    pub crc32: u32,
}

impl Texture3DHeader {
    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&TEXTURE3D_MAGIC);
        bytes[4..6].copy_from_slice(&self.version.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.format.id().to_le_bytes());
        let res = self.grid.resolution.to_array();
        let center = self.grid.center.to_array();
        let size = self.grid.size.to_array();
        for i in 0..3 {
            bytes[8 + i * 4..12 + i * 4].copy_from_slice(&res[i].to_le_bytes());
            bytes[20 + i * 4..24 + i * 4].copy_from_slice(&center[i].to_le_bytes());
            bytes[32 + i * 4..36 + i * 4].copy_from_slice(&size[i].to_le_bytes());
        }
        bytes[44..48].copy_from_slice(&self.crc32.to_le_bytes());
        bytes
    }

    /// Parse header from bytes
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Result<Self, StoreError> {
        if bytes[0..4] != TEXTURE3D_MAGIC {
            return Err(StoreError::InvalidFormat(format!(
                "Invalid magic bytes: {:?}",
                &bytes[0..4]
            )));
        }

        let version = le_u16(bytes, 4);
        if version > TEXTURE3D_VERSION {
            return Err(StoreError::UnsupportedVersion(version));
        }

        let format_id = le_u16(bytes, 6);
        let format = TexelFormat::from_id(format_id).ok_or_else(|| {
            StoreError::InvalidFormat(format!("Unknown texel format id {}", format_id))
        })?;

        let resolution = UVec3::new(le_u32(bytes, 8), le_u32(bytes, 12), le_u32(bytes, 16));
        let center = Vec3::new(le_f32(bytes, 20), le_f32(bytes, 24), le_f32(bytes, 28));
        let size = Vec3::new(le_f32(bytes, 32), le_f32(bytes, 36), le_f32(bytes, 40));
        if resolution.min_element() == 0 || resolution.max_element() > MAX_RESOLUTION {
            return Err(StoreError::InvalidFormat(format!(
                "Resolution {:?} outside 1..={}",
                resolution, MAX_RESOLUTION
            )));
        }
        if !(size.min_element() > 0.0) {
            return Err(StoreError::InvalidFormat(format!("Non-positive size {:?}", size)));
        }

        let header = Texture3DHeader {
            version,
            format,
            grid: VoxelGrid {
                center,
                size,
                resolution,
            },
            crc32: le_u32(bytes, 44),
        };
        header.body_len()?;
        Ok(header)
    }

    /// Expected body length in bytes
    pub fn body_len(&self) -> Result<usize, StoreError> {
        self.grid
            .checked_voxel_count()
            .and_then(|n| n.checked_mul(self.format.bytes_per_texel()))
            .ok_or_else(|| {
                StoreError::InvalidFormat(format!(
                    "Body size of {:?} overflows",
                    self.grid.resolution
                ))
            })
    }
}

#[inline(always)]
fn le_u16(b: &[u8], o: usize) -> u16 {
    u16::from_le_bytes([b[o], b[o + 1]])
}

#[inline(always)]
fn le_u32(b: &[u8], o: usize) -> u32 {
    u32::from_le_bytes([b[o], b[o + 1], b[o + 2], b[o + 3]])
}

#[inline(always)]
fn le_f32(b: &[u8], o: usize) -> f32 {
    f32::from_bits(le_u32(b, o))
}

/// Writer wrapper that calculates CRC32 on the fly
struct CrcWriter<W: Write> {
    inner: W,
    hasher: crc32fast::Hasher,
}

impl<W: Write> CrcWriter<W> {
    #[inline(always)]
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
        }
    }

    #[inline(always)]
    fn finalize(self) -> u32 {
        self.hasher.finalize()
    }
}

impl<W: Write> Write for CrcWriter<W> {
    #[inline(always)]
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    #[inline(always)]
    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Write the texel body of `volume` in `format`
fn write_body<W: Write>(w: &mut W, volume: &TexelVolume, format: TexelFormat) -> std::io::Result<()> {
    let mut texel = [0u8; 16];
    for t in &volume.data {
        let n = match format {
            TexelFormat::Rgba8Unorm => {
                let q = (t.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round();
                for (i, c) in q.to_array().into_iter().enumerate() {
                    texel[i] = c as u8;
                }
                4
            }
            TexelFormat::Rgba16Float => {
                for (i, c) in t.to_array().into_iter().enumerate() {
                    texel[i * 2..i * 2 + 2].copy_from_slice(&f16::from_f32(c).to_le_bytes());
                }
                8
            }
            TexelFormat::Rgba32Float => {
                for (i, c) in t.to_array().into_iter().enumerate() {
                    texel[i * 4..i * 4 + 4].copy_from_slice(&c.to_le_bytes());
                }
                16
            }
        };
        w.write_all(&texel[..n])?;
    }
    Ok(())
}

/// Decode a texel body (length already validated)
fn decode_body(body: &[u8], format: TexelFormat) -> Vec<Vec4> {
    body.chunks_exact(format.bytes_per_texel())
        .map(|c| match format {
            TexelFormat::Rgba8Unorm => {
                Vec4::new(c[0] as f32, c[1] as f32, c[2] as f32, c[3] as f32) / 255.0
            }
            TexelFormat::Rgba16Float => Vec4::new(
                f16::from_bits(le_u16(c, 0)).to_f32(),
                f16::from_bits(le_u16(c, 2)).to_f32(),
                f16::from_bits(le_u16(c, 4)).to_f32(),
                f16::from_bits(le_u16(c, 6)).to_f32(),
            ),
            TexelFormat::Rgba32Float => Vec4::new(
                le_f32(c, 0),
                le_f32(c, 4),
                le_f32(c, 8),
                le_f32(c, 12),
            ),
        })
        .collect()
}

/// Stream a volume into any seekable writer
///
/// Writes a placeholder header, streams the body with CRC, then patches the
/// header with the real checksum.
pub fn write_volume<W: Write + Seek>(
    writer: &mut W,
    volume: &TexelVolume,
    format: TexelFormat,
) -> Result<(), StoreError> {
    let start = writer.stream_position()?;
    let mut header = Texture3DHeader {
        version: TEXTURE3D_VERSION,
        format,
        grid: volume.grid,
        crc32: 0,
    };
    writer.write_all(&header.to_bytes())?;

    let mut crc_writer = CrcWriter::new(&mut *writer);
    write_body(&mut crc_writer, volume, format)?;
    header.crc32 = crc_writer.finalize();

    let end = writer.stream_position()?;
    writer.seek(SeekFrom::Start(start))?;
    writer.write_all(&header.to_bytes())?;
    writer.seek(SeekFrom::Start(end))?;
    writer.flush()?;
    Ok(())
}

/// Read a volume, validating magic, version, length and CRC before decoding
pub fn read_volume<R: Read>(reader: &mut R) -> Result<(Texture3DHeader, TexelVolume), StoreError> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_bytes)?;
    let header = Texture3DHeader::from_bytes(&header_bytes)?;

    let expected = header.body_len()?;

    // read at most one byte past the declared body; allocation follows the data
    let mut body = Vec::new();
    reader.by_ref().take(expected as u64 + 1).read_to_end(&mut body)?;
    if body.len() != expected {
        return Err(StoreError::InvalidFormat(format!(
            "Body is {} bytes, expected {}",
            body.len(),
            expected
        )));
    }

    let actual = crc32fast::hash(&body);
    if actual != header.crc32 {
        return Err(StoreError::CrcMismatch {
            expected: header.crc32,
            actual,
        });
    }

    let volume = Volume3D {
        data: decode_body(&body, header.format),
        grid: header.grid,
    };
    Ok((header, volume))
}

/// Encode a volume to an in-memory `.texture3d` image
pub fn encode_volume(volume: &TexelVolume, format: TexelFormat) -> Result<Vec<u8>, StoreError> {
    let mut cursor = Cursor::new(Vec::with_capacity(
        HEADER_SIZE + volume.voxel_count() * format.bytes_per_texel(),
    ));
    write_volume(&mut cursor, volume, format)?;
    Ok(cursor.into_inner())
}

/// Decode an in-memory `.texture3d` image
pub fn decode_volume(bytes: &[u8]) -> Result<TexelVolume, StoreError> {
    let mut cursor = Cursor::new(bytes);
    read_volume(&mut cursor).map(|(_, v)| v)
}

/// Save a volume to a `.texture3d` file
pub fn save_texture3d(
    volume: &TexelVolume,
    format: TexelFormat,
    path: impl AsRef<Path>,
) -> Result<(), StoreError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_volume(&mut writer, volume, format)
}

/// Load a volume from a `.texture3d` file
pub fn load_texture3d(path: impl AsRef<Path>) -> Result<TexelVolume, StoreError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    read_volume(&mut reader).map(|(_, v)| v)
}

/// Read only the header of a `.texture3d` file
pub fn read_header(path: impl AsRef<Path>) -> Result<Texture3DHeader, StoreError> {
    let mut file = File::open(path)?;
    let mut header_bytes = [0u8; HEADER_SIZE];
    file.read_exact(&mut header_bytes)?;
    Texture3DHeader::from_bytes(&header_bytes)
}
