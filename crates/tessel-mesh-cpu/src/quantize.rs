//! Fixed-point packing of positions and normals.

use crate::constants::{NORMAL_SCALE, POSITION_SCALE};

#[inline]
pub fn quantize_position(v: f32) -> i16 {
    (v * POSITION_SCALE)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

#[inline]
pub fn dequantize_position(q: i16) -> f32 {
    q as f32 / POSITION_SCALE
}

/// True when `v` survives quantization without clamping.
#[inline]
pub fn fits_quantized(v: f32) -> bool {
    let s = (v * POSITION_SCALE).round();
    s >= i16::MIN as f32 && s <= i16::MAX as f32
}

#[inline]
pub fn pack_normal(n: f32) -> i8 {
    (n.clamp(-1.0, 1.0) * NORMAL_SCALE).round() as i8
}

#[inline]
pub fn unpack_normal(q: i8) -> f32 {
    q as f32 / NORMAL_SCALE
}

pub fn dequantize_positions(data: &[i16]) -> Vec<f32> {
    data.iter().copied().map(dequantize_position).collect()
}

pub fn unpack_normals(data: &[i8]) -> Vec<f32> {
    data.iter().copied().map(unpack_normal).collect()
}
