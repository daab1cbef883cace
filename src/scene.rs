use fastnoise_lite::{FastNoiseLite, NoiseType};
use tessel_runtime::{ChunkCoords, ChunkSource, ChunkTask};

// Palette positions in assets/palette.toml.
pub const STONE: i32 = 0;
pub const DIRT: i32 = 1;
pub const GRASS: i32 = 2;
pub const SAND: i32 = 3;
pub const SNOW: i32 = 4;
pub const WATER: i32 = 5;
pub const GLASS: i32 = 6;
pub const SLAB: i32 = 7;
pub const POPPY: i32 = 8;
pub const GLOWSTONE: i32 = 9;

fn chunk_grid(w: u32, h: u32, l: u32) -> impl Iterator<Item = ChunkCoords> {
    (0..l as i32).flat_map(move |cz| {
        (0..h as i32).flat_map(move |cy| (0..w as i32).map(move |cx| ChunkCoords::new(cx, cy, cz)))
    })
}

/// Rolling heightmap terrain with beaches, snow caps, water, flowers and the odd lamp.
pub struct TerrainSource {
    pub seed: i32,
    pub chunk_size: u32,
    /// World height of the water surface.
    pub sea_level: i32,
}

impl TerrainSource {
    pub fn new(seed: i32, chunk_size: u32) -> Self {
        Self {
            seed,
            chunk_size,
            sea_level: chunk_size as i32 / 2,
        }
    }

    fn noise(&self) -> FastNoiseLite {
        let mut noise = FastNoiseLite::with_seed(self.seed);
        noise.set_noise_type(Some(NoiseType::OpenSimplex2));
        noise.set_frequency(Some(0.02));
        noise
    }

    fn chunk(&self, noise: &FastNoiseLite, coords: ChunkCoords, world_height: i32) -> ChunkTask {
        let s = self.chunk_size as i32;
        let [x0, y0, z0] = coords.origin(self.chunk_size);
        let min_h = (world_height as f32 * 0.15) as i32;
        let max_h = (world_height as f32 * 0.7) as i32;
        let mut blocks = Vec::new();
        for z in z0..z0 + s {
            for x in x0..x0 + s {
                let n = noise.get_noise_2d(x as f32, z as f32);
                let height = (((n + 1.0) * 0.5 * (max_h - min_h) as f32) as i32 + min_h)
                    .clamp(1, world_height - 1);
                let detail = noise.get_noise_2d(x as f32 * 7.3, z as f32 * 7.3);
                for y in y0..(y0 + s).min(height.max(self.sea_level)) {
                    let b = if y >= height {
                        WATER
                    } else if y == height - 1 {
                        if height as f32 >= world_height as f32 * 0.62 {
                            SNOW
                        } else if height <= self.sea_level + 1 {
                            SAND
                        } else {
                            GRASS
                        }
                    } else if y + 3 >= height {
                        DIRT
                    } else {
                        STONE
                    };
                    blocks.extend_from_slice(&[x, y, z, b]);
                }
                let top = height;
                if top > self.sea_level + 1 && top >= y0 && top < y0 + s {
                    if detail > 0.85 {
                        blocks.extend_from_slice(&[x, top, z, POPPY]);
                    } else if detail < -0.95 {
                        blocks.extend_from_slice(&[x, top, z, GLOWSTONE]);
                    } else if detail < -0.9 {
                        blocks.extend_from_slice(&[x, top, z, SLAB]);
                    }
                }
            }
        }
        ChunkTask::new(coords, blocks)
    }
}

impl ChunkSource for TerrainSource {
    fn chunks(&self, width: u32, height: u32, length: u32) -> Vec<ChunkTask> {
        let noise = self.noise();
        let world_height = (height * self.chunk_size) as i32;
        chunk_grid(width, height, length)
            .map(|c| self.chunk(&noise, c, world_height))
            .filter(|t| t.block_count() > 0)
            .collect()
    }
}

/// Each chunk holds a solid cube one block smaller than the chunk on every side, so only its
/// outer shell is visible.
pub struct ShellSource {
    pub chunk_size: u32,
    pub block: i32,
}

impl ChunkSource for ShellSource {
    fn chunks(&self, width: u32, height: u32, length: u32) -> Vec<ChunkTask> {
        let s = self.chunk_size as i32;
        chunk_grid(width, height, length)
            .map(|c| {
                let [x0, y0, z0] = c.origin(self.chunk_size);
                let mut blocks = Vec::new();
                for z in 1..s - 1 {
                    for y in 1..s - 1 {
                        for x in 1..s - 1 {
                            blocks.extend_from_slice(&[x0 + x, y0 + y, z0 + z, self.block]);
                        }
                    }
                }
                ChunkTask::new(c, blocks)
            })
            .collect()
    }
}

/// Alternating solid and glass cells in a 3D checkerboard: no two solid blocks touch, so
/// nothing can be culled.
pub struct CheckerSource {
    pub chunk_size: u32,
}

impl ChunkSource for CheckerSource {
    fn chunks(&self, width: u32, height: u32, length: u32) -> Vec<ChunkTask> {
        let s = self.chunk_size as i32;
        chunk_grid(width, height, length)
            .map(|c| {
                let [x0, y0, z0] = c.origin(self.chunk_size);
                let mut blocks = Vec::new();
                for z in z0..z0 + s {
                    for y in y0..y0 + s {
                        for x in x0..x0 + s {
                            let b = if (x + y + z).rem_euclid(2) == 0 { STONE } else { GLASS };
                            blocks.extend_from_slice(&[x, y, z, b]);
                        }
                    }
                }
                ChunkTask::new(c, blocks)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_chunks_sit_inside_their_bounds() {
        let src = ShellSource {
            chunk_size: 16,
            block: STONE,
        };
        let chunks = src.chunks(2, 1, 1);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].block_count(), 14 * 14 * 14);
        let second = &chunks[1];
        assert!(second.blocks.chunks_exact(4).all(|r| (17..31).contains(&r[0])));
    }

    #[test]
    fn terrain_is_deterministic_per_seed() {
        let a = TerrainSource::new(7, 16).chunks(2, 2, 2);
        let b = TerrainSource::new(7, 16).chunks(2, 2, 2);
        assert_eq!(a, b);
        assert!(!a.is_empty());
        for task in &a {
            let [x0, y0, z0] = task.coords.origin(16);
            for r in task.blocks.chunks_exact(4) {
                assert!((x0..x0 + 16).contains(&r[0]));
                assert!((y0..y0 + 16).contains(&r[1]));
                assert!((z0..z0 + 16).contains(&r[2]));
                assert!((STONE..=GLOWSTONE).contains(&r[3]));
            }
        }
    }

    #[test]
    fn checker_fills_every_cell() {
        let chunks = CheckerSource { chunk_size: 4 }.chunks(1, 1, 1);
        assert_eq!(chunks[0].block_count(), 64);
        let stone = chunks[0].blocks.chunks_exact(4).filter(|r| r[3] == STONE).count();
        assert_eq!(stone, 32);
    }
}
