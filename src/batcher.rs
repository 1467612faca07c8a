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

//! Coalesces per-item state changes into periodic batch writes.
//!
//! Workers push started and finished notices into two queues; a tick
//! thread with its own store connection flushes each queue once per
//! interval, one batch update per status class. A failed flush leaves
//! the rows queued in memory and retries on the next tick, so item
//! state is never lost to a transient store error.

use std::mem::take;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, Sender};
use tracing::warn;

use crate::counters::Counter;
use crate::item::{TransferItem, TransferStatus};
use crate::misc::{iso_now, to_iso};
use crate::monitor::Monitor;
use crate::store::TransferStore;

#[derive(Clone, Debug)]
struct FinishedRow {
    id: i64,
    status: TransferStatus,
    end_time: String,
    message: String,
}

/// The queues workers push into.
#[derive(Default)]
pub struct BatchQueues {
    started: Mutex<Vec<(i64, String)>>,
    finished: Mutex<Vec<FinishedRow>>,
}

impl BatchQueues {
    pub fn push_started(&self, item: &TransferItem) {
        let start_time = item.started.map(to_iso).unwrap_or_else(iso_now);
        self.started.lock().unwrap().push((item.id, start_time));
    }

    pub fn push_finished(&self, item: &TransferItem) {
        let end_time = item.completed.map(to_iso).unwrap_or_else(iso_now);
        self.finished.lock().unwrap().push(FinishedRow {
            id: item.id,
            status: item.status,
            end_time,
            message: item.message.clone(),
        });
    }

    /// Flush both queues to the store; rows stay queued on failure.
    fn flush(&self, store: &mut TransferStore, monitor: &dyn Monitor) {
        let started = take(&mut *self.started.lock().unwrap());
        if !started.is_empty() {
            match store.batch_update_started(&started) {
                Ok(()) => monitor.count(Counter::BatchesFlushed, 1),
                Err(err) => {
                    warn!(?err, rows = started.len(), "started batch flush failed; will retry");
                    monitor.count(Counter::BatchFlushRetries, 1);
                    self.started.lock().unwrap().extend(started);
                }
            }
        }

        let finished = take(&mut *self.finished.lock().unwrap());
        if finished.is_empty() {
            return;
        }
        let mut completed = Vec::new();
        let mut errors = Vec::new();
        for row in &finished {
            match row.status {
                TransferStatus::Error => {
                    errors.push((row.id, row.end_time.clone(), row.message.clone()))
                }
                _ => completed.push((row.id, row.end_time.clone())),
            }
        }
        let mut failed = false;
        if !completed.is_empty() {
            if let Err(err) = store.batch_update_completed(&completed) {
                warn!(?err, rows = completed.len(), "completed batch flush failed; will retry");
                failed = true;
            }
        }
        if !errors.is_empty() {
            if let Err(err) = store.batch_update_error(&errors) {
                warn!(?err, rows = errors.len(), "error batch flush failed; will retry");
                failed = true;
            }
        }
        if failed {
            monitor.count(Counter::BatchFlushRetries, 1);
            self.finished.lock().unwrap().extend(finished);
        } else {
            monitor.count(Counter::BatchesFlushed, 1);
        }
    }
}

/// Owns the tick thread and its store connection.
pub struct StatusBatcher {
    queues: Arc<BatchQueues>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StatusBatcher {
    /// Start the tick thread over an already-opened store connection.
    pub fn spawn(
        mut store: TransferStore,
        interval: Duration,
        monitor: Arc<dyn Monitor>,
    ) -> StatusBatcher {
        let queues = Arc::new(BatchQueues::default());
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let thread_queues = queues.clone();
        let handle = thread::Builder::new()
            .name("status-batcher".to_owned())
            .spawn(move || loop {
                select! {
                    recv(stop_rx) -> _ => {
                        // Final flush before exit, so nothing observed
                        // by a worker is lost.
                        thread_queues.flush(&mut store, monitor.as_ref());
                        return;
                    }
                    default(interval) => {
                        thread_queues.flush(&mut store, monitor.as_ref());
                    }
                }
            })
            .expect("spawn status batcher thread");
        StatusBatcher {
            queues,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    pub fn queues(&self) -> Arc<BatchQueues> {
        self.queues.clone()
    }

    /// Flush outstanding rows and stop the tick thread.
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StatusBatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::account::{Account, AccountKind};
    use crate::backend::LocalBackend;
    use crate::conflict::ConflictPolicy;
    use crate::item::Priority;
    use crate::monitor::void::VoidMonitor;
    use crate::store::NewTransfer;
    use time::OffsetDateTime;

    fn seeded_store(dir: &tempfile::TempDir, n: usize) -> (TransferStore, Vec<i64>) {
        let mut store = TransferStore::open(&dir.path().join("transfers.db")).unwrap();
        let items: Vec<NewTransfer> = (0..n)
            .map(|i| NewTransfer {
                source: format!("/tmp/in/{i}.txt"),
                size: 1,
            })
            .collect();
        store
            .add_transfers(
                &items,
                "/tmp/out",
                AccountKind::Local,
                AccountKind::Local,
                Priority::Normal,
            )
            .unwrap();
        let ids = store.transfers().unwrap().iter().map(|r| r.id).collect();
        (store, ids)
    }

    fn item_with_status(id: i64, status: TransferStatus, message: &str) -> TransferItem {
        let backend = LocalBackend::new(Account::local("/tmp/x"), false);
        let mut item = TransferItem::new(
            id,
            Box::new(backend.clone()),
            Box::new(backend),
            1,
            Priority::Normal,
            ConflictPolicy::Overwrite,
        );
        item.set_status(status, OffsetDateTime::now_utc());
        item.message = message.to_owned();
        item
    }

    #[test]
    fn flush_applies_each_status_class() {
        let dir = tempfile::tempdir().unwrap();
        let (store, ids) = seeded_store(&dir, 3);
        // A separate connection for assertions.
        let check = TransferStore::open(&dir.path().join("transfers.db")).unwrap();

        let mut batcher =
            StatusBatcher::spawn(store, Duration::from_millis(10), Arc::new(VoidMonitor));
        let queues = batcher.queues();

        queues.push_started(&item_with_status(ids[0], TransferStatus::Transferring, ""));
        queues.push_finished(&item_with_status(ids[1], TransferStatus::Completed, ""));
        queues.push_finished(&item_with_status(ids[2], TransferStatus::Error, "boom"));
        batcher.stop();

        assert_eq!(
            check.get(ids[0]).unwrap().unwrap().status,
            TransferStatus::Transferring
        );
        let done = check.get(ids[1]).unwrap().unwrap();
        assert_eq!(done.status, TransferStatus::Completed);
        assert!(!done.end_time.is_empty());
        let failed = check.get(ids[2]).unwrap().unwrap();
        assert_eq!(failed.status, TransferStatus::Error);
        assert_eq!(failed.error_message, "boom");
    }

    #[test]
    fn stop_flushes_outstanding_rows() {
        let dir = tempfile::tempdir().unwrap();
        let (store, ids) = seeded_store(&dir, 1);
        let check = TransferStore::open(&dir.path().join("transfers.db")).unwrap();

        // A long interval: only the stop-time flush can apply this row.
        let mut batcher =
            StatusBatcher::spawn(store, Duration::from_secs(3600), Arc::new(VoidMonitor));
        batcher
            .queues()
            .push_finished(&item_with_status(ids[0], TransferStatus::Completed, ""));
        batcher.stop();

        assert_eq!(
            check.get(ids[0]).unwrap().unwrap().status,
            TransferStatus::Completed
        );
    }
}
