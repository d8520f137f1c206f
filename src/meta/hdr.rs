//! HDR colour encodings for the packed emissive channel
//!
//! Each encoding squeezes a linear HDR colour into four bytes so that albedo and
//! emission fit into one 64-bit meta texel.
//!
//! | Encoding | Range            | Notes                                   |
//! |----------|------------------|-----------------------------------------|
//! | RGBM     | `[0, 8]`         | shared multiplier in alpha, rounded up  |
//! | RGBD     | `[0, 8]`         | shared divisor in alpha, exact below 1  |
//! | RGBE     | `2^-128..2^127`  | Radiance shared exponent                |
//! | LogLuv   | `~1e-19..1e19`   | CIE Luv with log luminance in 16 bits   |

use glam::{Mat3, Vec3};
use serde::{Deserialize, Serialize};

/// Upper bound of the RGBM range
pub const RGBM_RANGE: f32 = 8.0;

/// Upper bound of the RGBD range
pub const RGBD_RANGE: f32 = 8.0;

/// HDR encoding of the packed emissive texel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HdrEncoding {
    /// RGB × multiplier
    #[default]
    Rgbm,
    /// RGB ÷ divisor
    Rgbd,
    /// Shared exponent
    Rgbe,
    /// Log luminance + chromaticity
    LogLuv,
}

impl HdrEncoding {
    /// Encode a linear HDR colour (negative channels clamp to zero)
    pub fn encode(self, rgb: Vec3) -> [u8; 4] {
        let rgb = rgb.max(Vec3::ZERO);
        match self {
            HdrEncoding::Rgbm => encode_rgbm(rgb),
            HdrEncoding::Rgbd => encode_rgbd(rgb),
            HdrEncoding::Rgbe => encode_rgbe(rgb),
            HdrEncoding::LogLuv => encode_logluv(rgb),
        }
    }

    /// Decode four bytes back to linear RGB
    pub fn decode(self, bytes: [u8; 4]) -> Vec3 {
        match self {
            HdrEncoding::Rgbm => decode_rgbm(bytes),
            HdrEncoding::Rgbd => decode_rgbd(bytes),
            HdrEncoding::Rgbe => decode_rgbe(bytes),
            HdrEncoding::LogLuv => decode_logluv(bytes),
        }
    }
}

#[inline(always)]
fn unorm8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn encode_rgbm(rgb: Vec3) -> [u8; 4] {
    let m = (rgb.max_element() / RGBM_RANGE).clamp(1.0e-6, 1.0);
    let m8 = (m * 255.0).ceil().max(1.0);
    let scale = 1.0 / (m8 / 255.0 * RGBM_RANGE);
    [
        unorm8(rgb.x * scale),
        unorm8(rgb.y * scale),
        unorm8(rgb.z * scale),
        m8 as u8,
    ]
}

fn decode_rgbm(b: [u8; 4]) -> Vec3 {
    let m = b[3] as f32 / 255.0 * RGBM_RANGE;
    Vec3::new(b[0] as f32, b[1] as f32, b[2] as f32) / 255.0 * m
}

fn encode_rgbd(rgb: Vec3) -> [u8; 4] {
    let m = rgb.max_element().clamp(1.0, RGBD_RANGE);
    let d8 = (255.0 / m).floor().clamp(1.0, 255.0);
    let d = d8 / 255.0;
    [unorm8(rgb.x * d), unorm8(rgb.y * d), unorm8(rgb.z * d), d8 as u8]
}

fn decode_rgbd(b: [u8; 4]) -> Vec3 {
    let d = b[3].max(1) as f32 / 255.0;
    Vec3::new(b[0] as f32, b[1] as f32, b[2] as f32) / 255.0 / d
}

fn encode_rgbe(rgb: Vec3) -> [u8; 4] {
    let v = rgb.max_element();
    if v < 1.0e-32 {
        return [0; 4];
    }
    // frexp: v = mantissa * 2^e, mantissa in [0.5, 1)
    let e = ((v.to_bits() >> 23) & 0xFF) as i32 - 126;
    let scale = 256.0 / 2f32.powi(e);
    [
        (rgb.x * scale).min(255.0) as u8,
        (rgb.y * scale).min(255.0) as u8,
        (rgb.z * scale).min(255.0) as u8,
        (e + 128).clamp(1, 255) as u8,
    ]
}

fn decode_rgbe(b: [u8; 4]) -> Vec3 {
    if b[3] == 0 {
        return Vec3::ZERO;
    }
    let f = 2f32.powi(b[3] as i32 - 136);
    Vec3::new(b[0] as f32, b[1] as f32, b[2] as f32) * f
}

/// RGB → (X', Y, XYZ'); rows are stored as columns so `M * v` is `v · M`
const LOGLUV_M: Mat3 = Mat3::from_cols_array(&[
    0.2209, 0.3390, 0.4184, //
    0.1138, 0.6780, 0.7319, //
    0.0102, 0.1130, 0.2969,
]);

const LOGLUV_INV_M: Mat3 = Mat3::from_cols_array(&[
    6.0014, -2.7008, -1.7996, //
    -1.3320, 3.1029, -5.7721, //
    0.3008, -1.0882, 5.6268,
]);

fn encode_logluv(rgb: Vec3) -> [u8; 4] {
    if rgb.max_element() <= 0.0 {
        return [0; 4];
    }
    let xp_y_xyzp = (LOGLUV_M * rgb).max(Vec3::splat(1.0e-6));
    let u = xp_y_xyzp.x / xp_y_xyzp.z;
    let v = xp_y_xyzp.y / xp_y_xyzp.z;
    let le = (2.0 * xp_y_xyzp.y.log2() + 127.0).clamp(0.0, 255.0);
    let hi = le.floor().min(254.0);
    let lo = le - hi;
    [unorm8(u), unorm8(v), hi as u8, unorm8(lo)]
}

fn decode_logluv(b: [u8; 4]) -> Vec3 {
    if b == [0; 4] {
        return Vec3::ZERO;
    }
    let le = b[2] as f32 + b[3] as f32 / 255.0;
    let y = 2f32.powf((le - 127.0) / 2.0);
    let v = (b[1] as f32 / 255.0).max(1.0e-6);
    let z = y / v;
    let x = b[0] as f32 / 255.0 * z;
    (LOGLUV_INV_M * Vec3::new(x, y, z)).max(Vec3::ZERO)
}
