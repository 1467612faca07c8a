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

//! The engine control surface: everything a front end calls.
//!
//! An [Engine] owns the stop flag, the hot queue, and the lifecycle of
//! the feeder, executor, and status batcher. Opening the engine runs
//! boot-time cleanup; `start` brings the pipeline up; `stop` winds it
//! down cooperatively and restores in-flight rows to PENDING; `shutdown`
//! additionally clears stale timestamps so the next boot starts clean.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use crate::account::{AccountSource, SecretStore};
use crate::batcher::StatusBatcher;
use crate::conflict::ConflictPolicy;
use crate::enqueue::{self, EnqueueOutcome, EnqueuePlan};
use crate::executor::{Executor, ExecutorConfig};
use crate::feeder::{Feeder, FeederHandle};
use crate::hotqueue::HotQueue;
use crate::monitor::Monitor;
use crate::store::{TransferRecord, TransferStore};
use crate::{
    Result, BATCH_FLUSH_INTERVAL, FEED_FACTOR, JOIN_ATTEMPTS, JOIN_WAIT, POP_TIMEOUT,
};

pub struct EngineConfig {
    pub db_path: PathBuf,
    pub accounts: Arc<dyn AccountSource>,
    pub secrets: Arc<dyn SecretStore>,
    pub monitor: Arc<dyn Monitor>,
    pub max_workers: usize,
    pub conflict: ConflictPolicy,
    pub pop_timeout: Duration,
    pub flush_interval: Duration,
}

impl EngineConfig {
    pub fn new(
        db_path: impl Into<PathBuf>,
        accounts: Arc<dyn AccountSource>,
        secrets: Arc<dyn SecretStore>,
        monitor: Arc<dyn Monitor>,
    ) -> EngineConfig {
        EngineConfig {
            db_path: db_path.into(),
            accounts,
            secrets,
            monitor,
            max_workers: 10,
            conflict: ConflictPolicy::default(),
            pop_timeout: POP_TIMEOUT,
            flush_interval: BATCH_FLUSH_INTERVAL,
        }
    }
}

#[derive(Default)]
struct RunState {
    feeder: Option<FeederHandle>,
    executor: Option<Executor>,
    batcher: Option<StatusBatcher>,
}

pub struct Engine {
    config: EngineConfig,
    stop: Arc<AtomicBool>,
    feeder_running: Arc<AtomicBool>,
    queue: Arc<HotQueue>,
    state: Mutex<RunState>,
}

impl Engine {
    /// Open the engine over its database, running boot-time cleanup.
    ///
    /// Fails, refusing to start, if the database cannot be opened.
    pub fn open(config: EngineConfig) -> Result<Engine> {
        let mut store = TransferStore::open(&config.db_path)?;
        store.clean()?;
        let queue = Arc::new(HotQueue::new(FEED_FACTOR * config.max_workers.max(1)));
        Ok(Engine {
            queue,
            stop: Arc::new(AtomicBool::new(false)),
            feeder_running: Arc::new(AtomicBool::new(false)),
            config,
            state: Mutex::new(RunState::default()),
        })
    }

    /// Bring the pipeline up: batcher, feeder, worker pool.
    ///
    /// Idempotent; whatever part is already running is left alone, so a
    /// fresh enqueue can restart a drained feeder without disturbing
    /// live workers.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        self.stop.store(false, Relaxed);

        if state.batcher.is_none() {
            let store = TransferStore::open(&self.config.db_path)?;
            state.batcher = Some(StatusBatcher::spawn(
                store,
                self.config.flush_interval,
                self.config.monitor.clone(),
            ));
        }

        if !self.feeder_running.load(Relaxed) {
            if let Some(old) = state.feeder.take() {
                old.join_with_retries(JOIN_ATTEMPTS, JOIN_WAIT);
            }
            let feeder = Feeder {
                db_path: self.config.db_path.clone(),
                queue: self.queue.clone(),
                accounts: self.config.accounts.clone(),
                secrets: self.config.secrets.clone(),
                limit: FEED_FACTOR * self.config.max_workers.max(1),
                conflict: self.config.conflict,
                stop: self.stop.clone(),
                monitor: self.config.monitor.clone(),
                running: self.feeder_running.clone(),
            };
            state.feeder = Some(feeder.spawn());
            debug!("feeder started");
        }

        let workers_alive = state
            .executor
            .as_ref()
            .map(|executor| executor.active_workers() > 0)
            .unwrap_or(false);
        if !workers_alive {
            if let Some(old) = state.executor.take() {
                old.join();
            }
            let batch = state
                .batcher
                .as_ref()
                .expect("batcher running before executor")
                .queues();
            state.executor = Some(Executor::spawn(ExecutorConfig {
                queue: self.queue.clone(),
                stop: self.stop.clone(),
                feeder_running: self.feeder_running.clone(),
                monitor: self.config.monitor.clone(),
                batch,
                pop_timeout: self.config.pop_timeout,
                workers: self.config.max_workers,
            }));
            debug!(workers = self.config.max_workers, "worker pool started");
        }
        Ok(())
    }

    /// Wind the pipeline down.
    ///
    /// Cooperative: the feeder stops between rows, workers at the next
    /// chunk boundary. Queued and in-flight rows are restored to
    /// PENDING after the final status flush, so nothing is left stuck
    /// in QUEUED or TRANSFERRING.
    pub fn stop(&self) {
        self.stop.store(true, Relaxed);
        let dropped = self.queue.drain();
        if dropped > 0 {
            debug!(dropped, "discarded queued items");
        }
        let mut state = self.state.lock().unwrap();
        if let Some(feeder) = state.feeder.take() {
            feeder.join_with_retries(JOIN_ATTEMPTS, JOIN_WAIT);
        }
        if let Some(executor) = state.executor.take() {
            executor.join();
        }
        // The feeder may have pushed a few more items between the first
        // drain and its own stop check.
        self.queue.drain();
        if let Some(mut batcher) = state.batcher.take() {
            batcher.stop();
        }
        match TransferStore::open(&self.config.db_path) {
            Ok(mut store) => {
                if let Err(err) = store.reset_inflight() {
                    warn!(?err, "cannot reset in-flight rows");
                }
            }
            Err(err) => warn!(?err, "cannot open store for stop-time reset"),
        }
        // Everything is joined; the flag can drop so a later enqueue
        // or start is not seen as cancelled.
        self.stop.store(false, Relaxed);
    }

    /// Stop, then clear timestamps and error text on non-terminal rows.
    pub fn shutdown(&self) {
        self.stop();
        match TransferStore::open(&self.config.db_path) {
            Ok(mut store) => {
                if let Err(err) = store.clean() {
                    warn!(?err, "shutdown cleanup failed");
                }
            }
            Err(err) => warn!(?err, "cannot open store for shutdown cleanup"),
        }
    }

    /// Run one enqueue request, optionally starting the pipeline when
    /// it added rows.
    pub fn enqueue(&self, plan: &EnqueuePlan, start_immediately: bool) -> Result<EnqueueOutcome> {
        let mut store = TransferStore::open(&self.config.db_path)?;
        let outcome = enqueue::enqueue(
            &mut store,
            plan,
            self.config.monitor.as_ref(),
            &self.stop,
        )?;
        if start_immediately && outcome.rows_added > 0 {
            self.start()?;
        }
        Ok(outcome)
    }

    /// Delete rows by id.
    pub fn remove_rows(&self, ids: &[i64]) -> Result<usize> {
        let mut store = TransferStore::open(&self.config.db_path)?;
        store.drop_rows(ids)
    }

    /// Reset in-flight rows to PENDING without touching terminal rows.
    pub fn reset_queue(&self) -> Result<usize> {
        let mut store = TransferStore::open(&self.config.db_path)?;
        store.reset_inflight()
    }

    /// Pending, queued, and transferring rows.
    pub fn transfers(&self) -> Result<Vec<TransferRecord>> {
        TransferStore::open(&self.config.db_path)?.transfers()
    }

    /// Errored rows.
    pub fn errors(&self) -> Result<Vec<TransferRecord>> {
        TransferStore::open(&self.config.db_path)?.errors()
    }

    /// Completed rows.
    pub fn completed(&self) -> Result<Vec<TransferRecord>> {
        TransferStore::open(&self.config.db_path)?.completed()
    }

    /// Grow the worker pool by one.
    pub fn add_worker(&self) {
        if let Some(executor) = self.state.lock().unwrap().executor.as_ref() {
            executor.add_worker();
        }
    }

    /// Shrink the worker pool by one; never below one worker.
    pub fn remove_worker(&self) {
        if let Some(executor) = self.state.lock().unwrap().executor.as_ref() {
            executor.remove_worker();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::account::{Account, MemorySecrets, StaticAccounts};
    use crate::monitor::void::VoidMonitor;

    fn test_engine(dir: &tempfile::TempDir) -> Engine {
        let mut config = EngineConfig::new(
            dir.path().join("transfers.db"),
            Arc::new(StaticAccounts(vec![Account::local("/")])),
            Arc::new(MemorySecrets::new()),
            Arc::new(VoidMonitor),
        );
        config.max_workers = 2;
        config.pop_timeout = Duration::from_millis(100);
        config.flush_interval = Duration::from_millis(50);
        Engine::open(config).unwrap()
    }

    #[test]
    fn open_refuses_unreadable_database() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::new(
            dir.path().join("no/such/dir/transfers.db"),
            Arc::new(StaticAccounts(vec![])),
            Arc::new(MemorySecrets::new()),
            Arc::new(VoidMonitor),
        );
        assert!(Engine::open(config).is_err());
    }

    #[test]
    fn stop_without_start_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(&dir);
        engine.stop();
        engine.shutdown();
    }

    #[test]
    fn start_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(&dir);
        engine.start().unwrap();
        engine.start().unwrap();
        engine.shutdown();
    }
}
