//! UV-seam dilation
//!
//! Each iteration reads the previous iteration's image: a texel with alpha 0
//! that has at least one valid 8-neighbour becomes the average of its valid
//! neighbours with alpha 1. After `R` iterations every invalid texel within
//! Chebyshev distance `R` of valid data is filled. Rows run in parallel and
//! every executed iteration is one `DilateMeta` dispatch.

use glam::Vec4;
use rayon::prelude::*;

use crate::dispatch::{Dispatcher, KernelDesc};
use crate::error::BakeResult;
use crate::raster::Image2D;

const NEIGHBOURS: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Dilate `image` by `iterations` texels
///
/// Stops early once a pass fills nothing; that pass is still dispatched.
pub fn dilate(
    dispatcher: &Dispatcher<'_>,
    kernel: &KernelDesc,
    image: &Image2D,
    iterations: u32,
) -> BakeResult<Image2D> {
    let mut src = image.clone();
    let mut dst = image.clone();
    for _ in 0..iterations {
        let filled = dilate_pass(&src, &mut dst);
        dispatcher.record(kernel)?;
        if filled == 0 {
            break;
        }
        std::mem::swap(&mut src, &mut dst);
    }
    Ok(src)
}

/// One dilation step from `src` into `dst`; returns the number of filled texels
fn dilate_pass(src: &Image2D, dst: &mut Image2D) -> usize {
    let width = src.width as usize;
    let (w, h) = (src.width as i32, src.height as i32);

    dst.data
        .par_chunks_mut(width)
        .enumerate()
        .map(|(y, row)| {
            let y = y as i32;
            let mut filled = 0;
            for (x, out) in row.iter_mut().enumerate() {
                let x = x as i32;
                let own = src.get(x as u32, y as u32);
                if own.w > 0.0 {
                    *out = own;
                    continue;
                }
                let mut sum = Vec4::ZERO;
                let mut count = 0u32;
                for (dx, dy) in NEIGHBOURS {
                    let (nx, ny) = (x + dx, y + dy);
                    if nx < 0 || ny < 0 || nx >= w || ny >= h {
                        continue;
                    }
                    let n = src.get(nx as u32, ny as u32);
                    if n.w > 0.0 {
                        sum += n;
                        count += 1;
                    }
                }
                if count > 0 {
                    *out = (sum / count as f32).truncate().extend(1.0);
                    filled += 1;
                } else {
                    *out = own;
                }
            }
            filled
        })
        .sum()
}
