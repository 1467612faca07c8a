// Cumulus file transfer engine.
// Copyright 2024, 2025 Cumulus contributors.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! The bounded in-memory priority queue between the feeder and the
//! worker pool.
//!
//! Items are ordered by `(priority, id)`, lower first, so the highest
//! priority oldest row always pops next. The queue is capacity-bounded:
//! a full queue blocks the feeder instead of dropping rows.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::item::TransferItem;

/// How long a blocked feeder waits between checks of the stop flag.
const PUSH_WAIT: Duration = Duration::from_millis(100);

struct Entry {
    key: (i64, i64),
    item: TransferItem,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the BinaryHeap's max is the smallest key.
        other.key.cmp(&self.key)
    }
}

pub struct HotQueue {
    capacity: usize,
    heap: Mutex<BinaryHeap<Entry>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl HotQueue {
    pub fn new(capacity: usize) -> HotQueue {
        HotQueue {
            capacity: capacity.max(1),
            heap: Mutex::new(BinaryHeap::new()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Push an item, blocking while the queue is full.
    ///
    /// Returns false, discarding the item, if `stop` is raised while
    /// waiting; the caller leaves the row QUEUED for `reset_inflight`
    /// to restore.
    pub fn push(&self, item: TransferItem, stop: &AtomicBool) -> bool {
        let key = (item.priority.code(), item.id);
        let mut heap = self.heap.lock().unwrap();
        while heap.len() >= self.capacity {
            if stop.load(Relaxed) {
                return false;
            }
            let (guard, _timed_out) = self
                .not_full
                .wait_timeout(heap, PUSH_WAIT)
                .unwrap();
            heap = guard;
        }
        heap.push(Entry { key, item });
        drop(heap);
        self.not_empty.notify_one();
        true
    }

    /// Pop the lowest-keyed item, waiting up to `timeout` for one.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<TransferItem> {
        let deadline = Instant::now() + timeout;
        let mut heap = self.heap.lock().unwrap();
        loop {
            if let Some(entry) = heap.pop() {
                drop(heap);
                self.not_full.notify_one();
                return Some(entry.item);
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            let (guard, _timed_out) = self.not_empty.wait_timeout(heap, remaining).unwrap();
            heap = guard;
        }
    }

    /// Discard everything waiting in the queue.
    pub fn drain(&self) -> usize {
        let mut heap = self.heap.lock().unwrap();
        let dropped = heap.len();
        heap.clear();
        drop(heap);
        self.not_full.notify_all();
        dropped
    }

    pub fn len(&self) -> usize {
        self.heap.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::account::Account;
    use crate::backend::LocalBackend;
    use crate::conflict::ConflictPolicy;
    use crate::item::Priority;

    fn item(id: i64, priority: Priority) -> TransferItem {
        let backend = LocalBackend::new(Account::local("/tmp/src"), false);
        TransferItem::new(
            id,
            Box::new(backend.clone()),
            Box::new(backend),
            0,
            priority,
            ConflictPolicy::Overwrite,
        )
    }

    #[test]
    fn pops_in_priority_then_id_order() {
        let queue = HotQueue::new(8);
        let stop = AtomicBool::new(false);
        queue.push(item(10, Priority::Normal), &stop);
        queue.push(item(11, Priority::VeryHigh), &stop);
        queue.push(item(9, Priority::Normal), &stop);

        let order: Vec<i64> = std::iter::from_fn(|| {
            queue
                .pop_timeout(Duration::from_millis(10))
                .map(|item| item.id)
        })
        .collect();
        assert_eq!(order, [11, 9, 10]);
    }

    #[test]
    fn pop_times_out_on_empty_queue() {
        let queue = HotQueue::new(2);
        let start = Instant::now();
        assert!(queue.pop_timeout(Duration::from_millis(50)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn full_queue_blocks_until_a_pop() {
        let queue = Arc::new(HotQueue::new(1));
        let stop = Arc::new(AtomicBool::new(false));
        queue.push(item(1, Priority::Normal), &stop);

        let producer = {
            let queue = queue.clone();
            let stop = stop.clone();
            std::thread::spawn(move || queue.push(item(2, Priority::Normal), &stop))
        };
        // The producer is blocked; free one slot and it completes.
        std::thread::sleep(Duration::from_millis(50));
        assert!(queue.pop_timeout(Duration::from_millis(10)).is_some());
        assert!(producer.join().unwrap());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn stop_discards_a_blocked_push() {
        let queue = Arc::new(HotQueue::new(1));
        let stop = Arc::new(AtomicBool::new(false));
        queue.push(item(1, Priority::Normal), &stop);

        let producer = {
            let queue = queue.clone();
            let stop = stop.clone();
            std::thread::spawn(move || queue.push(item(2, Priority::Normal), &stop))
        };
        std::thread::sleep(Duration::from_millis(50));
        stop.store(true, Relaxed);
        assert!(!producer.join().unwrap());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn drain_empties_the_queue() {
        let queue = HotQueue::new(4);
        let stop = AtomicBool::new(false);
        queue.push(item(1, Priority::Normal), &stop);
        queue.push(item(2, Priority::Normal), &stop);
        assert_eq!(queue.drain(), 2);
        assert!(queue.is_empty());
    }
}
