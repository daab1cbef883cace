use crate::task::ChunkTask;

/// Producer of chunk tasks, such as a voxel store or a procedural generator.
pub trait ChunkSource {
    /// Every non-empty chunk of a region `width x height x length` chunks in size, in any order.
    fn chunks(&self, width: u32, height: u32, length: u32) -> Vec<ChunkTask>;
}

impl<F> ChunkSource for F
where
    F: Fn(u32, u32, u32) -> Vec<ChunkTask>,
{
    fn chunks(&self, width: u32, height: u32, length: u32) -> Vec<ChunkTask> {
        self(width, height, length)
    }
}
