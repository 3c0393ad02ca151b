//! Futex wait queues.
//!
//! Waiters are kept per `(pid, address)` in arrival order, so `FUTEX_WAKE`
//! wakes the longest-waiting threads first and the choice never depends on
//! anything but the order threads blocked in.

use crate::id::{ProcessId, ThreadId};
use std::collections::{BTreeMap, VecDeque};

/// A futex word: private futexes are scoped to their process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FutexKey {
    pub pid: ProcessId,
    pub addr: u64,
}

#[derive(Debug, Default)]
pub struct FutexTable {
    queues: BTreeMap<FutexKey, VecDeque<ThreadId>>,
}

impl FutexTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, key: FutexKey, tid: ThreadId) {
        let queue = self.queues.entry(key).or_default();
        debug_assert!(!queue.contains(&tid));
        queue.push_back(tid);
    }

    /// Remove up to `count` waiters, oldest first.
    pub fn wake(&mut self, key: FutexKey, count: usize) -> Vec<ThreadId> {
        let Some(queue) = self.queues.get_mut(&key) else {
            return Vec::new();
        };
        let n = count.min(queue.len());
        let woken: Vec<ThreadId> = queue.drain(..n).collect();
        if queue.is_empty() {
            self.queues.remove(&key);
        }
        woken
    }

    /// Drop `tid` from `key`'s queue (timeout or thread exit).
    pub fn remove(&mut self, key: FutexKey, tid: ThreadId) -> bool {
        let Some(queue) = self.queues.get_mut(&key) else {
            return false;
        };
        let before = queue.len();
        queue.retain(|&t| t != tid);
        let removed = queue.len() != before;
        if queue.is_empty() {
            self.queues.remove(&key);
        }
        removed
    }

    pub fn waiters(&self, key: FutexKey) -> usize {
        self.queues.get(&key).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: FutexKey = FutexKey {
        pid: ProcessId(1000),
        addr: 0x1000,
    };

    #[test]
    fn wake_is_fifo_and_bounded() {
        let mut table = FutexTable::new();
        for tid in [5, 3, 9] {
            table.enqueue(KEY, ThreadId(tid));
        }
        assert_eq!(table.wake(KEY, 2), vec![ThreadId(5), ThreadId(3)]);
        assert_eq!(table.waiters(KEY), 1);
        assert_eq!(table.wake(KEY, 10), vec![ThreadId(9)]);
        assert!(table.is_empty());
    }

    #[test]
    fn same_address_in_different_processes_is_distinct() {
        let mut table = FutexTable::new();
        let other = FutexKey {
            pid: ProcessId(1001),
            ..KEY
        };
        table.enqueue(KEY, ThreadId(1));
        table.enqueue(other, ThreadId(2));
        assert_eq!(table.wake(other, 1), vec![ThreadId(2)]);
        assert_eq!(table.waiters(KEY), 1);
    }

    #[test]
    fn removed_waiter_is_not_woken() {
        let mut table = FutexTable::new();
        table.enqueue(KEY, ThreadId(1));
        table.enqueue(KEY, ThreadId(2));
        assert!(table.remove(KEY, ThreadId(1)));
        assert!(!table.remove(KEY, ThreadId(1)));
        assert_eq!(table.wake(KEY, 1), vec![ThreadId(2)]);
        assert!(table.wake(KEY, 1).is_empty());
    }
}
