use std::collections::VecDeque;
use std::fmt;

use crate::task::ChunkTask;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(pub u64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch#{}", self.0)
    }
}

/// Number of finish cycles needed for `chunks` chunks in sub-batches of `sub_batch`.
pub fn cycle_count(chunks: usize, sub_batch: usize) -> usize {
    chunks.div_ceil(sub_batch.max(1))
}

/// A workload split into size-bounded sub-batches, each merged by one worker and returned as
/// one result.
#[derive(Debug)]
pub struct BatchPlan {
    pub id: BatchId,
    remaining: VecDeque<ChunkTask>,
    sub_batch: usize,
    cycles: usize,
    started: usize,
    finished: usize,
    /// A cycle finished during the current poll; the next one starts on the following poll.
    next_due: bool,
    in_flight: bool,
}

impl BatchPlan {
    pub fn new(id: BatchId, tasks: Vec<ChunkTask>, sub_batch: usize) -> Self {
        let sub_batch = sub_batch.max(1);
        Self {
            id,
            cycles: cycle_count(tasks.len(), sub_batch),
            remaining: tasks.into(),
            sub_batch,
            started: 0,
            finished: 0,
            next_due: false,
            in_flight: false,
        }
    }

    pub fn cycles(&self) -> usize {
        self.cycles
    }

    pub fn is_done(&self) -> bool {
        self.finished == self.cycles
    }

    /// Takes the next sub-batch, unless one is already running. Returns the cycle number and
    /// its chunks.
    pub fn next_cycle(&mut self) -> Option<(usize, Vec<ChunkTask>)> {
        if self.in_flight || self.remaining.is_empty() {
            return None;
        }
        let n = self.sub_batch.min(self.remaining.len());
        let chunks: Vec<ChunkTask> = self.remaining.drain(..n).collect();
        let cycle = self.started;
        self.started += 1;
        self.in_flight = true;
        self.next_due = false;
        Some((cycle, chunks))
    }

    /// Records the end of the running cycle, successful or not.
    pub fn cycle_finished(&mut self) {
        if self.in_flight {
            self.in_flight = false;
            self.finished += 1;
            self.next_due = !self.remaining.is_empty();
        }
    }

    /// Whether the next cycle is waiting for the host's next poll.
    pub fn is_due(&self) -> bool {
        self.next_due
    }
}
