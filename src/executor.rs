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

//! The worker pool draining the hot queue.
//!
//! Each worker pops an item, applies the conflict policy, streams bytes
//! from the source backend into the destination sink, and reports the
//! outcome to the status batcher and the monitor. Item-level failures
//! never kill a worker. A stop is honored at the next chunk boundary:
//! the item drops back to QUEUED, partial destination bytes are
//! removed, and stop-time reset restores the row to PENDING.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering::Relaxed};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::batcher::BatchQueues;
use crate::conflict::{self, Resolution};
use crate::counters::Counter;
use crate::hotqueue::HotQueue;
use crate::item::{TransferItem, TransferStatus};
use crate::monitor::Monitor;
use crate::{Error, Result};

pub struct ExecutorConfig {
    pub queue: Arc<HotQueue>,
    pub stop: Arc<AtomicBool>,
    pub feeder_running: Arc<AtomicBool>,
    pub monitor: Arc<dyn Monitor>,
    pub batch: Arc<BatchQueues>,
    pub pop_timeout: Duration,
    pub workers: usize,
}

struct Shared {
    queue: Arc<HotQueue>,
    stop: Arc<AtomicBool>,
    feeder_running: Arc<AtomicBool>,
    monitor: Arc<dyn Monitor>,
    batch: Arc<BatchQueues>,
    pop_timeout: Duration,
    /// Ids currently being moved by some worker.
    inflight: Mutex<HashSet<i64>>,
    /// Live workers.
    active: AtomicUsize,
    /// Desired pool size; never below 1.
    target: AtomicUsize,
}

/// A pool of identical transfer workers.
pub struct Executor {
    shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Executor {
    pub fn spawn(config: ExecutorConfig) -> Executor {
        let workers = config.workers.max(1);
        let shared = Arc::new(Shared {
            queue: config.queue,
            stop: config.stop,
            feeder_running: config.feeder_running,
            monitor: config.monitor,
            batch: config.batch,
            pop_timeout: config.pop_timeout,
            inflight: Mutex::new(HashSet::new()),
            active: AtomicUsize::new(0),
            target: AtomicUsize::new(workers),
        });
        let executor = Executor {
            shared,
            handles: Mutex::new(Vec::new()),
        };
        for _ in 0..workers {
            executor.spawn_worker();
        }
        executor
            .shared
            .monitor
            .worker_count_changed(workers);
        executor
    }

    fn spawn_worker(&self) {
        let shared = self.shared.clone();
        shared.active.fetch_add(1, Relaxed);
        let handle = thread::Builder::new()
            .name("transfer-worker".to_owned())
            .spawn(move || worker_loop(shared))
            .expect("spawn transfer worker");
        self.handles.lock().unwrap().push(handle);
    }

    /// Grow the pool by one worker.
    pub fn add_worker(&self) {
        self.shared.target.fetch_add(1, Relaxed);
        self.spawn_worker();
        self.shared
            .monitor
            .worker_count_changed(self.shared.target.load(Relaxed));
    }

    /// Shrink the pool by one worker; the pool never drops below one.
    pub fn remove_worker(&self) {
        let _ = self
            .shared
            .target
            .fetch_update(Relaxed, Relaxed, |target| {
                if target > 1 {
                    Some(target - 1)
                } else {
                    None
                }
            });
        self.shared
            .monitor
            .worker_count_changed(self.shared.target.load(Relaxed));
    }

    /// Workers currently alive.
    pub fn active_workers(&self) -> usize {
        self.shared.active.load(Relaxed)
    }

    /// Ids of items some worker currently holds.
    pub fn inflight(&self) -> Vec<i64> {
        self.shared.inflight.lock().unwrap().iter().copied().collect()
    }

    /// Wait for every worker to exit.
    pub fn join(&self) {
        let handles: Vec<_> = self.handles.lock().unwrap().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                warn!("a transfer worker panicked");
            }
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        if shared.active.load(Relaxed) > shared.target.load(Relaxed) {
            // The pool shrank; surplus workers bow out.
            break;
        }
        match shared.queue.pop_timeout(shared.pop_timeout) {
            Some(mut item) => process_item(&shared, &mut item),
            None => {
                if shared.stop.load(Relaxed) || !shared.feeder_running.load(Relaxed) {
                    break;
                }
                // The feeder is still producing; wait for more.
            }
        }
    }
    if shared.active.fetch_sub(1, Relaxed) == 1 {
        // Last worker out reports the drain.
        shared.monitor.completed();
    }
}

fn process_item(shared: &Shared, item: &mut TransferItem) {
    shared.inflight.lock().unwrap().insert(item.id);
    item.set_status(TransferStatus::Transferring, OffsetDateTime::now_utc());
    shared.batch.push_started(item);
    shared.monitor.transfer_started(item);

    let outcome = run_item(shared, item);
    let now = OffsetDateTime::now_utc();
    match outcome {
        Ok(StreamOutcome::Done) => {
            item.set_status(TransferStatus::Completed, now);
            shared.monitor.count(Counter::Files, 1);
            shared
                .monitor
                .count(Counter::FileBytes, item.processed as usize);
            shared.batch.push_finished(item);
            shared.monitor.transfer_finished(item);
        }
        Ok(StreamOutcome::Skipped) => {
            item.set_status(TransferStatus::Completed, now);
            item.message = "Skipped".to_owned();
            shared.monitor.count(Counter::Skipped, 1);
            shared.batch.push_finished(item);
            shared.monitor.transfer_finished(item);
        }
        Ok(StreamOutcome::Stopped) => {
            // Not an error and not finished: the row drops back to
            // QUEUED in memory and stop-time reset makes it PENDING.
            item.set_status(TransferStatus::Queued, now);
            item.message = "Stopped".to_owned();
            shared.monitor.count(Counter::Stopped, 1);
            shared.monitor.transfer_stopped(item);
        }
        Err(err) => {
            item.set_status(TransferStatus::Error, now);
            item.message = err.to_string();
            debug!(id = item.id, message = %item.message, "transfer failed");
            shared.monitor.count(Counter::Errors, 1);
            shared.batch.push_finished(item);
            shared.monitor.transfer_finished(item);
        }
    }
    shared.inflight.lock().unwrap().remove(&item.id);
}

enum StreamOutcome {
    Done,
    Skipped,
    Stopped,
}

fn run_item(shared: &Shared, item: &mut TransferItem) -> Result<StreamOutcome> {
    match conflict::resolve(item.conflict, item.source.as_ref(), item.destination.as_ref())? {
        Resolution::Skip => return Ok(StreamOutcome::Skipped),
        Resolution::Proceed => {}
        Resolution::Redirect(renamed) => {
            debug!(id = item.id, destination = renamed.root(), "conflict rename");
            item.destination = renamed;
        }
    }
    stream(item, &shared.stop)
}

/// Move the object, chunk by chunk, checking the stop flag between
/// chunks.
fn stream(item: &mut TransferItem, stop: &AtomicBool) -> Result<StreamOutcome> {
    let mut sink = item.destination.upload()?;
    for chunk in item.source.download()? {
        if stop.load(Relaxed) {
            // Drain the sink, then clear the partial destination.
            let _ = sink.finalize();
            drop(sink);
            if let Err(err) = item.destination.remove() {
                warn!(id = item.id, ?err, "cannot remove partial destination");
            }
            return Ok(StreamOutcome::Stopped);
        }
        let chunk = chunk?;
        let written = sink.write(&chunk)?;
        item.processed += written;
    }
    item.processed += sink.finalize()?;
    if item.processed != item.size {
        return Err(Error::ShortTransfer {
            written: item.processed,
            expected: item.size,
        });
    }
    Ok(StreamOutcome::Done)
}
