use std::fmt;

/// Identifier of one dispatched request; unique among requests in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct ChunkCoords {
    pub cx: i32,
    pub cy: i32,
    pub cz: i32,
}

impl ChunkCoords {
    pub const fn new(cx: i32, cy: i32, cz: i32) -> Self {
        Self { cx, cy, cz }
    }

    /// World position of the chunk's minimum corner.
    pub fn origin(self, chunk_size: u32) -> [i32; 3] {
        let s = chunk_size as i32;
        [self.cx * s, self.cy * s, self.cz * s]
    }
}

impl fmt::Display for ChunkCoords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.cx, self.cy, self.cz)
    }
}

/// One chunk's `[x, y, z, palette_index]` records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkTask {
    pub coords: ChunkCoords,
    pub blocks: Vec<i32>,
}

impl ChunkTask {
    pub fn new(coords: ChunkCoords, blocks: Vec<i32>) -> Self {
        Self { coords, blocks }
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len() / 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_scales_coords() {
        assert_eq!(ChunkCoords::new(1, -2, 3).origin(16), [16, -32, 48]);
    }
}
