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

//! Counters of files, bytes, and events processed by the engine.
//!
//! Engine code reports counters through the [Monitor](crate::Monitor)
//! interface.

use std::fmt::{self, Debug};
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::Relaxed;

use itertools::Itertools;
use strum::{EnumCount, IntoEnumIterator};
use strum_macros::{EnumCount, EnumIter};

/// Counters of events or bytes.
#[derive(Debug, Clone, Copy, Eq, PartialEq, EnumCount, EnumIter)]
pub enum Counter {
    /// Files fully transferred.
    Files,
    /// Total bytes committed to destinations.
    FileBytes,
    /// Items completed as skipped by a conflict policy.
    Skipped,
    /// Items that ended in an error.
    Errors,
    /// Items downgraded by a stop mid-transfer.
    Stopped,
    /// Rows inserted by the enqueue pipeline.
    RowsEnqueued,
    /// Rows promoted from PENDING to QUEUED.
    RowsPromoted,
    /// Rows the feeder could not match to an account.
    RowsUnmatched,
    /// Status batches flushed to the store.
    BatchesFlushed,
    /// Status batch flushes that failed and will be retried.
    BatchFlushRetries,
}

/// Counter values, identified by a [Counter].
#[derive(Default)]
pub struct Counters {
    counters: [AtomicUsize; Counter::COUNT],
}

impl Counters {
    /// Increase the value for a given counter by an amount.
    pub fn count(&self, counter: Counter, increment: usize) {
        self.counters[counter as usize].fetch_add(increment, Relaxed);
    }

    /// Set the absolute value of a counter.
    pub fn set(&self, counter: Counter, value: usize) {
        self.counters[counter as usize].store(value, Relaxed);
    }

    /// Get the current value of a counter.
    pub fn get(&self, counter: Counter) -> usize {
        self.counters[counter as usize].load(Relaxed)
    }

    /// Return an iterator over counter, value pairs.
    pub fn iter(&self) -> impl Iterator<Item = (Counter, usize)> {
        Counter::iter()
            .map(move |c| (c, self.counters[c as usize].load(Relaxed)))
            .collect_vec()
            .into_iter()
    }
}

impl Debug for Counters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Counters");
        for i in Counter::iter() {
            s.field(&format!("{i:?}"), &self.counters[i as usize].load(Relaxed));
        }
        s.finish()
    }
}
