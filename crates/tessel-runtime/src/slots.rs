use std::collections::VecDeque;

/// Free list of backend slots with a FIFO queue of waiters.
///
/// A slot is handed to at most one holder at a time. Releasing a slot while waiters are queued
/// passes it straight to the oldest waiter.
#[derive(Debug)]
pub struct SlotPool<W> {
    free: VecDeque<usize>,
    busy: Vec<bool>,
    waiters: VecDeque<W>,
    peak: usize,
}

impl<W> SlotPool<W> {
    pub fn new(slots: usize) -> Self {
        Self {
            free: (0..slots).collect(),
            busy: vec![false; slots],
            waiters: VecDeque::new(),
            peak: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.busy.len()
    }

    pub fn in_use(&self) -> usize {
        self.busy.len() - self.free.len()
    }

    pub fn peak_in_use(&self) -> usize {
        self.peak
    }

    pub fn waiting(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_busy(&self, slot: usize) -> bool {
        self.busy.get(slot).copied().unwrap_or(false)
    }

    fn take(&mut self, slot: usize) -> usize {
        self.busy[slot] = true;
        self.peak = self.peak.max(self.in_use());
        slot
    }

    /// Grants a slot now, or queues the waiter behind earlier ones.
    pub fn request(&mut self, waiter: W) -> Option<(usize, W)> {
        if self.waiters.is_empty() {
            if let Some(slot) = self.free.pop_front() {
                return Some((self.take(slot), waiter));
            }
        }
        self.waiters.push_back(waiter);
        None
    }

    /// Returns `slot`; if a waiter is queued it receives the slot immediately. Releasing a slot
    /// that is not held does nothing.
    pub fn release(&mut self, slot: usize) -> Option<(usize, W)> {
        if !self.is_busy(slot) {
            return None;
        }
        if let Some(w) = self.waiters.pop_front() {
            return Some((slot, w));
        }
        self.busy[slot] = false;
        self.free.push_back(slot);
        None
    }

    pub fn drain_waiters(&mut self) -> Vec<W> {
        self.waiters.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn waiters_are_served_in_order() {
        let mut pool = SlotPool::new(1);
        assert_eq!(pool.request('a'), Some((0, 'a')));
        assert_eq!(pool.request('b'), None);
        assert_eq!(pool.request('c'), None);
        assert_eq!(pool.release(0), Some((0, 'b')));
        assert_eq!(pool.release(0), Some((0, 'c')));
        assert_eq!(pool.release(0), None);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.release(0), None);
        assert_eq!(pool.in_use(), 0);
    }

    proptest! {
        #[test]
        fn holders_never_exceed_capacity(
            slots in 1usize..6,
            ops in prop::collection::vec(any::<bool>(), 1..200),
        ) {
            let mut pool = SlotPool::new(slots);
            let mut held: Vec<usize> = Vec::new();
            let mut next = 0u32;
            let mut served = 0u32;
            for op in ops {
                if op || held.is_empty() {
                    if let Some((s, _)) = pool.request(next) {
                        held.push(s);
                        served += 1;
                    }
                    next += 1;
                } else {
                    let s = held.remove(0);
                    if let Some((s2, _)) = pool.release(s) {
                        held.push(s2);
                        served += 1;
                    }
                }
                prop_assert!(pool.in_use() <= slots);
                prop_assert_eq!(pool.in_use(), held.len());
            }
            // everything queued is served once holders let go
            while let Some(s) = held.pop() {
                if let Some((s2, _)) = pool.release(s) {
                    held.push(s2);
                    served += 1;
                }
            }
            prop_assert_eq!(served, next);
            prop_assert_eq!(pool.waiting(), 0);
            prop_assert!(pool.peak_in_use() <= slots);
        }
    }
}
