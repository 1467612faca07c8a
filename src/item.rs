// Cumulus file transfer engine.
// Copyright 2024-2026 Cumulus contributors.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! In-memory transfer items and their state machine.
//!
//! Persisted rows only change status through the feeder and the
//! executor; the rules for which timestamps each status change touches
//! live in [transition], a pure function, so the store remains the
//! single source of truth for what was actually recorded.

use std::fmt;

use time::OffsetDateTime;

use crate::backend::Backend;
use crate::conflict::ConflictPolicy;

/// Lifecycle of a transfer row.
///
/// The integer codes are the persisted column values. Under normal flow
/// a row only ever moves forward through this sequence; stopping the
/// engine resets `Queued` and `Transferring` rows to `Pending`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransferStatus {
    Pending,
    Queued,
    Transferring,
    Error,
    Completed,
}

impl TransferStatus {
    pub fn code(&self) -> i64 {
        match self {
            TransferStatus::Pending => 0,
            TransferStatus::Queued => 1,
            TransferStatus::Transferring => 2,
            TransferStatus::Error => 3,
            TransferStatus::Completed => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<TransferStatus> {
        match code {
            0 => Some(TransferStatus::Pending),
            1 => Some(TransferStatus::Queued),
            2 => Some(TransferStatus::Transferring),
            3 => Some(TransferStatus::Error),
            4 => Some(TransferStatus::Completed),
            _ => None,
        }
    }

    /// Error and Completed rows are never touched by boot-time cleanup.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Error | TransferStatus::Completed)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransferStatus::Pending => "PENDING",
            TransferStatus::Queued => "QUEUED",
            TransferStatus::Transferring => "TRANSFERRING",
            TransferStatus::Error => "ERROR",
            TransferStatus::Completed => "COMPLETED",
        })
    }
}

/// Row priority; lower numbers run first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    VeryHigh,
    High,
    Normal,
    Low,
    VeryLow,
}

impl Priority {
    pub fn code(&self) -> i64 {
        match self {
            Priority::VeryHigh => 1,
            Priority::High => 2,
            Priority::Normal => 3,
            Priority::Low => 4,
            Priority::VeryLow => 5,
        }
    }

    /// Decode a persisted priority; 0 (and anything out of range) is
    /// treated as Normal.
    pub fn from_code(code: i64) -> Priority {
        match code {
            1 => Priority::VeryHigh,
            2 => Priority::High,
            4 => Priority::Low,
            5 => Priority::VeryLow,
            _ => Priority::Normal,
        }
    }
}

impl Default for Priority {
    fn default() -> Priority {
        Priority::Normal
    }
}

/// What a status change does to the recorded timestamps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stamp {
    Keep,
    Clear,
    Set(OffsetDateTime),
}

/// Timestamp deltas implied by entering `status` at `now`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateChange {
    pub status: TransferStatus,
    pub started: Stamp,
    pub completed: Stamp,
}

/// The transfer state machine, as a pure function.
///
/// Entering any non-terminal state restarts the clock (so a reset row
/// can be retried); entering a terminal state records completion and
/// leaves the start time alone.
pub fn transition(status: TransferStatus, now: OffsetDateTime) -> StateChange {
    match status {
        TransferStatus::Pending | TransferStatus::Queued | TransferStatus::Transferring => {
            StateChange {
                status,
                started: Stamp::Set(now),
                completed: Stamp::Clear,
            }
        }
        TransferStatus::Error | TransferStatus::Completed => StateChange {
            status,
            started: Stamp::Keep,
            completed: Stamp::Set(now),
        },
    }
}

/// A runnable transfer, derived from a store row at feed time.
///
/// Lives for one feed-then-execute cycle; its backends carry the client
/// context for exactly this row's source and destination.
#[derive(Debug)]
pub struct TransferItem {
    pub id: i64,
    pub source: Box<dyn Backend>,
    pub destination: Box<dyn Backend>,
    pub size: u64,
    pub priority: Priority,
    pub status: TransferStatus,
    pub started: Option<OffsetDateTime>,
    pub completed: Option<OffsetDateTime>,
    /// Bytes committed to the destination so far.
    pub processed: u64,
    pub message: String,
    pub conflict: ConflictPolicy,
}

impl TransferItem {
    pub fn new(
        id: i64,
        source: Box<dyn Backend>,
        destination: Box<dyn Backend>,
        size: u64,
        priority: Priority,
        conflict: ConflictPolicy,
    ) -> TransferItem {
        TransferItem {
            id,
            source,
            destination,
            size,
            priority,
            status: TransferStatus::Queued,
            started: None,
            completed: None,
            processed: 0,
            message: String::new(),
            conflict,
        }
    }

    /// Apply a [StateChange] produced by [transition].
    pub fn apply(&mut self, change: StateChange) {
        self.status = change.status;
        match change.started {
            Stamp::Keep => {}
            Stamp::Clear => self.started = None,
            Stamp::Set(at) => self.started = Some(at),
        }
        match change.completed {
            Stamp::Keep => {}
            Stamp::Clear => self.completed = None,
            Stamp::Set(at) => self.completed = Some(at),
        }
    }

    /// Move to `status` at `now`, with the standard timestamp rules.
    pub fn set_status(&mut self, status: TransferStatus, now: OffsetDateTime) {
        self.apply(transition(status, now));
    }

    /// Percentage of the object moved so far.
    pub fn progress(&self) -> f64 {
        if self.size == 0 {
            0.0
        } else {
            (self.processed as f64 / self.size as f64) * 100.0
        }
    }

    /// Transfer rate in bytes per second, using the completion time for
    /// finished items and the current time for live ones.
    pub fn rate_in_bytes(&self) -> u64 {
        if self.processed == 0 {
            return 0;
        }
        let Some(started) = self.started else {
            return self.processed;
        };
        let end = self.completed.unwrap_or_else(OffsetDateTime::now_utc);
        let seconds = (end - started).whole_seconds();
        if seconds > 0 {
            self.processed / seconds as u64
        } else {
            self.processed
        }
    }
}

#[cfg(test)]
mod test {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn status_codes_round_trip() {
        for code in 0..=4 {
            let status = TransferStatus::from_code(code).unwrap();
            assert_eq!(status.code(), code);
        }
        assert_eq!(TransferStatus::from_code(5), None);
        assert_eq!(TransferStatus::from_code(-1), None);
    }

    #[test]
    fn statuses_are_totally_ordered() {
        assert!(TransferStatus::Pending < TransferStatus::Queued);
        assert!(TransferStatus::Queued < TransferStatus::Transferring);
        assert!(TransferStatus::Transferring < TransferStatus::Error);
        assert!(TransferStatus::Error < TransferStatus::Completed);
    }

    #[test]
    fn zero_priority_is_normal() {
        assert_eq!(Priority::from_code(0), Priority::Normal);
        assert_eq!(Priority::from_code(1), Priority::VeryHigh);
        assert_eq!(Priority::from_code(99), Priority::Normal);
    }

    #[test]
    fn transition_into_running_states_restarts_clock() {
        let now = datetime!(2025-06-01 12:00 UTC);
        for status in [
            TransferStatus::Pending,
            TransferStatus::Queued,
            TransferStatus::Transferring,
        ] {
            let change = transition(status, now);
            assert_eq!(change.started, Stamp::Set(now));
            assert_eq!(change.completed, Stamp::Clear);
        }
    }

    #[test]
    fn transition_into_terminal_states_records_completion() {
        let now = datetime!(2025-06-01 12:00 UTC);
        for status in [TransferStatus::Error, TransferStatus::Completed] {
            let change = transition(status, now);
            assert_eq!(change.started, Stamp::Keep);
            assert_eq!(change.completed, Stamp::Set(now));
        }
    }

    fn item_of_size(size: u64) -> TransferItem {
        let backend = crate::backend::LocalBackend::new(
            crate::account::Account::local("/tmp/nowhere"),
            false,
        );
        TransferItem::new(
            1,
            Box::new(backend.clone()),
            Box::new(backend),
            size,
            Priority::Normal,
            ConflictPolicy::Overwrite,
        )
    }

    #[test]
    fn progress_handles_zero_sized_items() {
        let mut item = item_of_size(0);
        assert_eq!(item.progress(), 0.0);
        item = item_of_size(200);
        item.processed = 50;
        assert_eq!(item.progress(), 25.0);
    }

    #[test]
    fn rate_uses_completion_window() {
        let mut item = item_of_size(1000);
        item.processed = 1000;
        item.started = Some(datetime!(2025-06-01 12:00:00 UTC));
        item.completed = Some(datetime!(2025-06-01 12:00:10 UTC));
        assert_eq!(item.rate_in_bytes(), 100);

        // Sub-second transfers report what moved.
        item.completed = Some(datetime!(2025-06-01 12:00:00 UTC));
        assert_eq!(item.rate_in_bytes(), 1000);
    }
}
