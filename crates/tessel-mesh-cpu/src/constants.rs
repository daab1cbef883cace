/// Fixed-point scale for quantized positions: one block is 1024 units.
pub const POSITION_SCALE: f32 = 1024.0;
/// Scale for normals packed into signed bytes.
pub const NORMAL_SCALE: f32 = 127.0;
/// Largest magnitude, in blocks, a quantized position can carry.
pub const QUANTIZED_EXTENT: f32 = i16::MAX as f32 / POSITION_SCALE;
/// Vertex counts above this need 32-bit indices.
pub const U16_INDEX_LIMIT: usize = 65_535;
