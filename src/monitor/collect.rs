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

//! Collect engine events so that they can be inspected by tests.

use std::mem::take;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use super::Monitor;
use crate::counters::{Counter, Counters};
use crate::item::{TransferItem, TransferStatus};

/// A snapshot of an item at the moment an event fired.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemEvent {
    pub id: i64,
    pub status: TransferStatus,
    pub processed: u64,
    pub message: String,
}

impl ItemEvent {
    fn of(item: &TransferItem) -> ItemEvent {
        ItemEvent {
            id: item.id,
            status: item.status,
            processed: item.processed,
            message: item.message.clone(),
        }
    }
}

/// A monitor that collects information for later inspection.
///
/// Event lists are kept in order; totals of counters are kept.
/// [CollectMonitor::wait_until_complete] parks a test until the engine
/// reports the queue drained.
#[derive(Default)]
pub struct CollectMonitor {
    counters: Counters,
    started: Mutex<Vec<ItemEvent>>,
    finished: Mutex<Vec<ItemEvent>>,
    stopped: Mutex<Vec<ItemEvent>>,
    queue_changes: Mutex<usize>,
    enqueue_outcomes: Mutex<Vec<usize>>,
    complete: Mutex<bool>,
    complete_signal: Condvar,
}

impl CollectMonitor {
    pub fn new() -> CollectMonitor {
        CollectMonitor::default()
    }

    pub fn get_counter(&self, counter: Counter) -> usize {
        self.counters.get(counter)
    }

    pub fn take_started(&self) -> Vec<ItemEvent> {
        take(self.started.lock().unwrap().as_mut())
    }

    pub fn take_finished(&self) -> Vec<ItemEvent> {
        take(self.finished.lock().unwrap().as_mut())
    }

    pub fn take_stopped(&self) -> Vec<ItemEvent> {
        take(self.stopped.lock().unwrap().as_mut())
    }

    pub fn finished_events(&self) -> Vec<ItemEvent> {
        self.finished.lock().unwrap().clone()
    }

    pub fn started_events(&self) -> Vec<ItemEvent> {
        self.started.lock().unwrap().clone()
    }

    pub fn queue_change_count(&self) -> usize {
        *self.queue_changes.lock().unwrap()
    }

    pub fn enqueue_outcomes(&self) -> Vec<usize> {
        self.enqueue_outcomes.lock().unwrap().clone()
    }

    /// Wait until the engine reports the queue drained, or panic after
    /// `timeout`.
    pub fn wait_until_complete(&self, timeout: Duration) {
        let complete = self.complete.lock().unwrap();
        let (complete, result) = self
            .complete_signal
            .wait_timeout_while(complete, timeout, |done| !*done)
            .unwrap();
        drop(complete);
        assert!(!result.timed_out(), "engine did not complete in {timeout:?}");
    }

    /// Forget a previous completion so the monitor can observe another
    /// start/complete cycle.
    pub fn reset_complete(&self) {
        *self.complete.lock().unwrap() = false;
    }
}

impl Monitor for CollectMonitor {
    fn count(&self, counter: Counter, increment: usize) {
        self.counters.count(counter, increment)
    }

    fn set_counter(&self, counter: Counter, value: usize) {
        self.counters.set(counter, value)
    }

    fn transfer_started(&self, item: &TransferItem) {
        self.started.lock().unwrap().push(ItemEvent::of(item));
    }

    fn transfer_finished(&self, item: &TransferItem) {
        self.finished.lock().unwrap().push(ItemEvent::of(item));
    }

    fn transfer_stopped(&self, item: &TransferItem) {
        self.stopped.lock().unwrap().push(ItemEvent::of(item));
    }

    fn queue_changed(&self) {
        *self.queue_changes.lock().unwrap() += 1;
    }

    fn enqueue_finished(&self, rows_added: usize) {
        self.enqueue_outcomes.lock().unwrap().push(rows_added);
    }

    fn completed(&self) {
        *self.complete.lock().unwrap() = true;
        self.complete_signal.notify_all();
    }

    fn worker_count_changed(&self, _workers: usize) {}
}
