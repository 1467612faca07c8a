// Cumulus file transfer engine.
// Copyright 2024 Cumulus contributors.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! A monitor that does nothing.

use super::Monitor;
use crate::counters::Counter;
use crate::item::TransferItem;

#[derive(Default)]
pub struct VoidMonitor;

impl Monitor for VoidMonitor {
    fn count(&self, _counter: Counter, _increment: usize) {}
    fn set_counter(&self, _counter: Counter, _value: usize) {}
    fn transfer_started(&self, _item: &TransferItem) {}
    fn transfer_finished(&self, _item: &TransferItem) {}
    fn transfer_stopped(&self, _item: &TransferItem) {}
    fn queue_changed(&self) {}
    fn enqueue_finished(&self, _rows_added: usize) {}
    fn completed(&self) {}
    fn worker_count_changed(&self, _workers: usize) {}
}
