use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::task::TaskId;

/// Block records plus origin of one task, written once by the orchestrator and read in place
/// by a backend.
#[derive(Debug)]
pub struct SharedRegion {
    pub task: TaskId,
    pub origin: [i32; 3],
    blocks: Vec<i32>,
}

impl SharedRegion {
    pub fn blocks(&self) -> &[i32] {
        &self.blocks
    }
}

/// How a backend receives a task's block array.
#[derive(Clone, Debug)]
pub enum BlockPayload {
    /// Region leased from a [`SharedBufferPool`].
    Shared(Arc<SharedRegion>),
    /// The caller's buffer, moved in.
    Moved(Arc<Vec<i32>>),
}

impl BlockPayload {
    pub fn blocks(&self) -> &[i32] {
        match self {
            BlockPayload::Shared(r) => r.blocks(),
            BlockPayload::Moved(v) => v,
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, BlockPayload::Shared(_))
    }
}

/// Bounded pool of reusable block buffers.
///
/// Buffers are created lazily up to `max_buffers`. When all are leased, [`try_lease`] returns
/// `None` and the caller moves its own buffer instead of waiting.
///
/// [`try_lease`]: SharedBufferPool::try_lease
pub struct SharedBufferPool {
    available_tx: Sender<Vec<i32>>,
    available_rx: Receiver<Vec<i32>>,
    allocated: AtomicUsize,
    leased: AtomicUsize,
    max_buffers: usize,
}

impl SharedBufferPool {
    pub fn new(max_buffers: usize) -> Arc<Self> {
        let max_buffers = max_buffers.max(1);
        let (tx, rx) = bounded(max_buffers);
        Arc::new(Self {
            available_tx: tx,
            available_rx: rx,
            allocated: AtomicUsize::new(0),
            leased: AtomicUsize::new(0),
            max_buffers,
        })
    }

    /// Copies `blocks` into a free region for `task`.
    pub fn try_lease(
        self: &Arc<Self>,
        task: TaskId,
        origin: [i32; 3],
        blocks: &[i32],
    ) -> Option<BufferLease> {
        let mut buf = match self.available_rx.try_recv() {
            Ok(buf) => buf,
            Err(_) => {
                let prev = self.allocated.fetch_add(1, Ordering::AcqRel);
                if prev >= self.max_buffers {
                    self.allocated.fetch_sub(1, Ordering::AcqRel);
                    return None;
                }
                Vec::with_capacity(blocks.len())
            }
        };
        buf.clear();
        buf.extend_from_slice(blocks);
        self.leased.fetch_add(1, Ordering::AcqRel);
        Some(BufferLease {
            region: Some(Arc::new(SharedRegion {
                task,
                origin,
                blocks: buf,
            })),
            pool: Arc::clone(self),
        })
    }

    /// Leases not yet released.
    pub fn outstanding(&self) -> usize {
        self.leased.load(Ordering::Acquire)
    }

    /// Buffers currently owned by the pool, leased or idle.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.max_buffers
    }

    fn release(&self, region: Arc<SharedRegion>) {
        self.leased.fetch_sub(1, Ordering::AcqRel);
        match Arc::try_unwrap(region) {
            Ok(region) => {
                if self.available_tx.try_send(region.blocks).is_err() {
                    self.allocated.fetch_sub(1, Ordering::AcqRel);
                }
            }
            // A backend still reads it; the buffer is freed with the last reference.
            Err(_) => {
                self.allocated.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }
}

/// Ownership of one leased region. Dropping the lease returns the region to the pool, so a
/// lease is released exactly once on every path.
pub struct BufferLease {
    region: Option<Arc<SharedRegion>>,
    pool: Arc<SharedBufferPool>,
}

impl BufferLease {
    /// Reference handed to the backend.
    pub fn payload(&self) -> Option<BlockPayload> {
        self.region.clone().map(BlockPayload::Shared)
    }
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        if let Some(region) = self.region.take() {
            self.pool.release(region);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_buffers_are_reused() {
        let pool = SharedBufferPool::new(1);
        let lease = pool.try_lease(TaskId(1), [0; 3], &[1, 2, 3, 4]).unwrap();
        let payload = lease.payload().unwrap();
        assert_eq!(payload.blocks(), &[1, 2, 3, 4]);
        assert!(pool.try_lease(TaskId(2), [0; 3], &[0; 4]).is_none());
        drop(payload);
        drop(lease);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.allocated(), 1);
        let again = pool.try_lease(TaskId(3), [16, 0, 0], &[5, 6, 7, 8]).unwrap();
        assert_eq!(again.payload().unwrap().blocks(), &[5, 6, 7, 8]);
        assert_eq!(pool.allocated(), 1);
    }

    #[test]
    fn a_region_still_held_by_a_backend_is_not_recycled() {
        let pool = SharedBufferPool::new(2);
        let lease = pool.try_lease(TaskId(1), [0; 3], &[0, 0, 0, 1]).unwrap();
        let in_backend = lease.payload().unwrap();
        drop(lease);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.allocated(), 0);
        // the backend can still read its copy
        assert_eq!(in_backend.blocks(), &[0, 0, 0, 1]);
        assert!(pool.try_lease(TaskId(2), [0; 3], &[]).is_some());
    }
}
