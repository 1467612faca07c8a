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

//! Communication from the engine to an observer: a test, a UI, etc.
//!
//! The presentation layer is single-threaded; worker threads never call
//! into it directly, they emit events here and the observer decides
//! when and how to refresh.

pub mod collect;
pub mod void;

use crate::counters::Counter;
use crate::item::TransferItem;

pub trait Monitor: Send + Sync + 'static {
    /// Notify that a counter increased by a given amount.
    fn count(&self, counter: Counter, increment: usize);

    /// Set the absolute value of a counter.
    fn set_counter(&self, counter: Counter, value: usize);

    /// A worker began moving this item.
    fn transfer_started(&self, item: &TransferItem);

    /// An item reached ERROR or COMPLETED (including skips).
    fn transfer_finished(&self, item: &TransferItem);

    /// An item was downgraded by an engine stop.
    fn transfer_stopped(&self, item: &TransferItem);

    /// The enqueue pipeline flushed rows; views may want to refresh.
    fn queue_changed(&self);

    /// The enqueue pipeline finished one request.
    fn enqueue_finished(&self, rows_added: usize);

    /// The hot queue ran dry and the last worker went idle.
    fn completed(&self);

    /// The worker pool changed size.
    fn worker_count_changed(&self, workers: usize);
}
