use tessel_palette::PaletteIndex;

/// Dense occupancy grid over the bounds of a block array, padded by one cell on every side.
///
/// Cells store `palette index + 1`, so `0` is empty. Lookups outside the padded grid are empty.
#[derive(Clone, Debug)]
pub struct VoxelMap {
    min: [i32; 3],
    size: [usize; 3],
    cells: Vec<u32>,
}

pub(crate) const PAD: i32 = 1;

impl VoxelMap {
    /// Builds the map from `[x, y, z, palette_index]` records. Returns `None` for an empty array.
    /// Records with a negative palette index are skipped.
    pub fn from_records(blocks: &[i32]) -> Option<Self> {
        let mut lo = [i32::MAX; 3];
        let mut hi = [i32::MIN; 3];
        let mut any = false;
        for rec in blocks.chunks_exact(4) {
            if rec[3] < 0 {
                continue;
            }
            any = true;
            for a in 0..3 {
                lo[a] = lo[a].min(rec[a]);
                hi[a] = hi[a].max(rec[a]);
            }
        }
        if !any {
            return None;
        }
        let min = lo.map(|v| v - PAD);
        let size = [0, 1, 2].map(|a| (hi[a] - lo[a] + 1 + 2 * PAD) as usize);
        let mut map = VoxelMap {
            min,
            size,
            cells: vec![0; size[0] * size[1] * size[2]],
        };
        for rec in blocks.chunks_exact(4) {
            if rec[3] < 0 {
                continue;
            }
            if let Some(i) = map.cell_index(rec[0], rec[1], rec[2]) {
                map.cells[i] = rec[3] as u32 + 1;
            }
        }
        Some(map)
    }

    #[inline]
    fn cell_index(&self, x: i32, y: i32, z: i32) -> Option<usize> {
        let lx = x.checked_sub(self.min[0])?;
        let ly = y.checked_sub(self.min[1])?;
        let lz = z.checked_sub(self.min[2])?;
        if lx < 0 || ly < 0 || lz < 0 {
            return None;
        }
        let (lx, ly, lz) = (lx as usize, ly as usize, lz as usize);
        if lx >= self.size[0] || ly >= self.size[1] || lz >= self.size[2] {
            return None;
        }
        Some(lx + ly * self.size[0] + lz * self.size[0] * self.size[1])
    }

    #[inline]
    pub fn get(&self, x: i32, y: i32, z: i32) -> Option<PaletteIndex> {
        let i = self.cell_index(x, y, z)?;
        self.cells[i].checked_sub(1)
    }

    /// Corner of the padded grid.
    pub fn min(&self) -> [i32; 3] {
        self.min
    }

    /// Padded dimensions.
    pub fn size(&self) -> [usize; 3] {
        self.size
    }

    /// Raw cells in x-fastest order.
    pub fn cells(&self) -> &[u32] {
        &self.cells
    }
}
