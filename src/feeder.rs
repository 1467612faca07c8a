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

//! The feeder: promotes pending rows and materializes them into
//! runnable items on the hot queue.
//!
//! One long-running thread with its own store connection. Each pass
//! claims a bounded slice of PENDING rows (atomically marking them
//! QUEUED), resolves each row's source and destination to an account by
//! longest-prefix lookup, builds backend handles, and pushes the items
//! into the hot queue, blocking under backpressure. The feeder exits
//! when a pass finds nothing to promote; the executor notices the dry
//! queue and reports completion.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::account::{Account, AccountIndex, AccountKind, AccountSource, SecretStore};
use crate::backend;
use crate::conflict::ConflictPolicy;
use crate::counters::Counter;
use crate::hotqueue::HotQueue;
use crate::item::TransferItem;
use crate::monitor::Monitor;
use crate::store::{TransferRecord, TransferStore};

pub struct Feeder {
    pub db_path: PathBuf,
    pub queue: Arc<HotQueue>,
    pub accounts: Arc<dyn AccountSource>,
    pub secrets: Arc<dyn SecretStore>,
    /// Rows promoted per pass; the hot queue holds the same number.
    pub limit: usize,
    pub conflict: ConflictPolicy,
    pub stop: Arc<AtomicBool>,
    pub monitor: Arc<dyn Monitor>,
    /// Shared with the executor, which uses it to tell a dry queue
    /// from a finished one.
    pub running: Arc<AtomicBool>,
}

impl Feeder {
    pub fn spawn(self) -> FeederHandle {
        let running = self.running.clone();
        running.store(true, Relaxed);
        let thread_running = running.clone();
        let handle = thread::Builder::new()
            .name("queue-feeder".to_owned())
            .spawn(move || {
                self.run();
                thread_running.store(false, Relaxed);
            })
            .expect("spawn feeder thread");
        FeederHandle {
            handle: Some(handle),
            running,
        }
    }

    fn run(&self) {
        let mut store = match TransferStore::open(&self.db_path) {
            Ok(store) => store,
            Err(err) => {
                warn!(?err, "feeder cannot open transfer store");
                return;
            }
        };
        let mut unmatched: Vec<i64> = Vec::new();
        self.run_passes(&mut store, &mut unmatched);
        // Unmatchable rows go back to PENDING only now: requeueing them
        // mid-run would promote them again on the next pass.
        if !unmatched.is_empty() {
            if let Err(err) = store.requeue_rows(&unmatched) {
                warn!(?err, "cannot return unmatched rows to PENDING");
            }
        }
    }

    fn run_passes(&self, store: &mut TransferStore, unmatched: &mut Vec<i64>) {
        let mut index = AccountIndex::new(self.accounts.accounts());
        while !self.stop.load(Relaxed) {
            let rows = match store.promote_pending(self.limit) {
                Ok(rows) => rows,
                Err(err) => {
                    warn!(?err, "promotion failed; feeder exiting");
                    return;
                }
            };
            if rows.is_empty() {
                debug!("no pending rows; feeder exiting");
                return;
            }
            self.monitor.count(Counter::RowsPromoted, rows.len());

            // Accounts are re-read at most once per pass, in case one
            // was added since the queue was built.
            let mut refreshed = false;
            for row in rows {
                if self.stop.load(Relaxed) {
                    // Remaining promoted rows stay QUEUED; stop-time
                    // reset restores them to PENDING.
                    return;
                }
                match self.materialize(&row, &mut index, &mut refreshed) {
                    Ok(item) => {
                        if !self.queue.push(item, &self.stop) {
                            return;
                        }
                    }
                    Err(err) => {
                        warn!(id = row.id, %err, "cannot materialize row; skipping");
                        self.monitor.count(Counter::RowsUnmatched, 1);
                        unmatched.push(row.id);
                    }
                }
            }
        }
    }

    fn materialize(
        &self,
        row: &TransferRecord,
        index: &mut AccountIndex,
        refreshed: &mut bool,
    ) -> crate::Result<TransferItem> {
        let source_account =
            self.find_account(index, refreshed, row.source_kind, &row.source)?;
        let destination_account =
            self.find_account(index, refreshed, row.destination_kind, &row.destination)?;
        let source = backend::open(
            &source_account,
            &row.source,
            false,
            self.secrets.as_ref(),
        )?;
        let destination = backend::open(
            &destination_account,
            &row.destination,
            false,
            self.secrets.as_ref(),
        )?;
        Ok(TransferItem::new(
            row.id,
            source,
            destination,
            row.size,
            row.priority,
            self.conflict,
        ))
    }

    fn find_account(
        &self,
        index: &mut AccountIndex,
        refreshed: &mut bool,
        kind: AccountKind,
        path: &str,
    ) -> crate::Result<Account> {
        if let Some(account) = index.lookup(kind, path) {
            return Ok(account.clone());
        }
        if !*refreshed {
            index.refresh(self.accounts.accounts());
            *refreshed = true;
            if let Some(account) = index.lookup(kind, path) {
                return Ok(account.clone());
            }
        }
        Err(crate::Error::NoMatchingAccount {
            kind,
            path: path.to_owned(),
        })
    }
}

/// Join handle plus liveness flag for the feeder thread.
pub struct FeederHandle {
    handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl FeederHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Relaxed)
    }

    /// Try to join the feeder, polling up to `attempts` times.
    ///
    /// Returns false if the thread still has not finished; it is left
    /// detached in that case.
    pub fn join_with_retries(mut self, attempts: usize, wait: Duration) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };
        for _ in 0..attempts {
            if handle.is_finished() {
                let _ = handle.join();
                return true;
            }
            thread::sleep(wait);
        }
        warn!("feeder could not be joined after {attempts} attempts");
        false
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;
    use crate::account::{MemorySecrets, StaticAccounts};
    use crate::item::{Priority, TransferStatus};
    use crate::monitor::void::VoidMonitor;
    use crate::store::NewTransfer;

    fn seed_local_rows(db_path: &std::path::Path, n: usize) -> Vec<i64> {
        let mut store = TransferStore::open(db_path).unwrap();
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
        store.transfers().unwrap().iter().map(|r| r.id).collect()
    }

    fn feeder_over(db_path: &std::path::Path, queue: Arc<HotQueue>) -> Feeder {
        Feeder {
            db_path: db_path.to_owned(),
            queue,
            accounts: Arc::new(StaticAccounts(vec![Account::local("/")])),
            secrets: Arc::new(MemorySecrets::new()),
            limit: 8,
            conflict: ConflictPolicy::Overwrite,
            stop: Arc::new(AtomicBool::new(false)),
            monitor: Arc::new(VoidMonitor),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    #[test]
    fn feeds_rows_then_exits() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("transfers.db");
        let ids = seed_local_rows(&db_path, 3);

        let queue = Arc::new(HotQueue::new(8));
        let handle = feeder_over(&db_path, queue.clone()).spawn();

        let mut fed = Vec::new();
        for _ in 0..3 {
            fed.push(queue.pop_timeout(Duration::from_secs(2)).unwrap().id);
        }
        assert_eq!(fed, ids);
        assert!(handle.join_with_retries(50, Duration::from_millis(20)));

        let store = TransferStore::open(&db_path).unwrap();
        assert_eq!(store.count_status(TransferStatus::Queued).unwrap(), 3);
        assert_eq!(store.count_status(TransferStatus::Pending).unwrap(), 0);
    }

    #[test]
    fn unmatched_rows_return_to_pending() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("transfers.db");
        {
            let mut store = TransferStore::open(&db_path).unwrap();
            // An S3 row with no S3 account configured.
            store
                .add_transfers(
                    &[NewTransfer {
                        source: "/bucket/a.txt".to_owned(),
                        size: 1,
                    }],
                    "/tmp/out",
                    AccountKind::S3,
                    AccountKind::Local,
                    Priority::Normal,
                )
                .unwrap();
        }

        let queue = Arc::new(HotQueue::new(8));
        let handle = feeder_over(&db_path, queue.clone()).spawn();
        assert!(handle.join_with_retries(50, Duration::from_millis(20)));

        assert!(queue.is_empty());
        let store = TransferStore::open(&db_path).unwrap();
        assert_eq!(store.count_status(TransferStatus::Pending).unwrap(), 1);
        assert_eq!(store.count_status(TransferStatus::Queued).unwrap(), 0);
    }
}
