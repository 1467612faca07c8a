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

//! The enqueue pipeline: walk selected sources, filter, and persist
//! matched files as pending transfer rows.
//!
//! Destination paths follow two rules. Copying a directory preserves
//! its basename as a top-level wrapper under each destination, with
//! sub-paths rebased below it; copying individually selected files puts
//! each file's basename directly under the destination. Matched files
//! accumulate into destination-keyed batches of up to [INSERT_BATCH]
//! rows, each flushed in its own transaction.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering::Relaxed};

use tracing::debug;

use crate::account::AccountKind;
use crate::backend::{join, relative_components, Backend, Walk};
use crate::counters::Counter;
use crate::filter::{matches_all, Filter};
use crate::item::Priority;
use crate::monitor::Monitor;
use crate::store::{NewTransfer, TransferBatch, TransferStore};
use crate::{Result, INSERT_BATCH};

/// One enqueue request: sources crossed with destinations.
pub struct EnqueuePlan {
    pub sources: Vec<Box<dyn Backend>>,
    /// Directory handles new rows will point under.
    pub destinations: Vec<Box<dyn Backend>>,
    pub filters: Vec<Filter>,
    pub recursive: bool,
    pub priority: Priority,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct EnqueueOutcome {
    pub rows_added: usize,
    /// True when a stop interrupted the walk; accumulated rows are
    /// still flushed.
    pub stopped: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct BucketKey {
    destination_root: String,
    source_kind: AccountKind,
    destination_kind: AccountKind,
}

struct Batcher<'a> {
    store: &'a mut TransferStore,
    monitor: &'a dyn Monitor,
    priority: Priority,
    buckets: BTreeMap<BucketKey, Vec<NewTransfer>>,
    rows_added: usize,
}

impl<'a> Batcher<'a> {
    fn push(&mut self, key: BucketKey, item: NewTransfer) -> Result<()> {
        let bucket = self.buckets.entry(key.clone()).or_default();
        bucket.push(item);
        if bucket.len() >= INSERT_BATCH {
            let items = std::mem::take(bucket);
            self.flush_one(key, items)?;
        }
        Ok(())
    }

    fn flush_one(&mut self, key: BucketKey, items: Vec<NewTransfer>) -> Result<()> {
        let added = self.store.add_transfers(
            &items,
            &key.destination_root,
            key.source_kind,
            key.destination_kind,
            self.priority,
        )?;
        self.rows_added += added;
        self.monitor.count(Counter::RowsEnqueued, added);
        self.monitor.queue_changed();
        Ok(())
    }

    /// Flush every partially filled bucket.
    fn finish(mut self) -> Result<usize> {
        let remaining: Vec<TransferBatch> = std::mem::take(&mut self.buckets)
            .into_iter()
            .filter(|(_, items)| !items.is_empty())
            .map(|(key, items)| TransferBatch {
                destination_root: key.destination_root,
                source_kind: key.source_kind,
                destination_kind: key.destination_kind,
                priority: self.priority,
                items,
            })
            .collect();
        if !remaining.is_empty() {
            let added = self.store.add_batches(&remaining)?;
            self.rows_added += added;
            self.monitor.count(Counter::RowsEnqueued, added);
            self.monitor.queue_changed();
        }
        Ok(self.rows_added)
    }
}

/// Run one enqueue request to completion (or until `stop`).
pub fn enqueue(
    store: &mut TransferStore,
    plan: &EnqueuePlan,
    monitor: &dyn Monitor,
    stop: &AtomicBool,
) -> Result<EnqueueOutcome> {
    let mut batcher = Batcher {
        store,
        monitor,
        priority: plan.priority,
        buckets: BTreeMap::new(),
        rows_added: 0,
    };
    let mut stopped = false;

    'sources: for source in &plan.sources {
        if !source.is_dir() {
            enqueue_file(&mut batcher, source.as_ref(), &plan.destinations)?;
            continue;
        }
        // Directory copy: the directory's own name wraps everything.
        let wrapper = source.name().to_owned();
        if plan.recursive {
            let walk = Walk::new(source.boxed());
            for step in walk {
                let step = step?;
                let rel = relative_components(source.kind(), source.root(), step.dir.root())
                    .unwrap_or_default();
                for file in &step.files {
                    // A stop mid-walk is honored at the next file.
                    if stop.load(Relaxed) {
                        stopped = true;
                        break 'sources;
                    }
                    if !matches_all(&plan.filters, file.as_ref()) {
                        continue;
                    }
                    for destination in &plan.destinations {
                        let mut segments: Vec<&str> = vec![wrapper.as_str()];
                        segments.extend(rel.iter().copied());
                        let destination_dir =
                            join_segments(destination.kind(), destination.root(), &segments);
                        batcher.push(
                            BucketKey {
                                destination_root: destination_dir,
                                source_kind: file.kind(),
                                destination_kind: destination.kind(),
                            },
                            new_transfer(file.as_ref()),
                        )?;
                    }
                }
            }
        } else {
            for file in source.list_dir()? {
                if stop.load(Relaxed) {
                    stopped = true;
                    break 'sources;
                }
                if file.is_dir() || !matches_all(&plan.filters, file.as_ref()) {
                    continue;
                }
                for destination in &plan.destinations {
                    let destination_dir =
                        join(destination.kind(), destination.root(), &wrapper);
                    batcher.push(
                        BucketKey {
                            destination_root: destination_dir,
                            source_kind: file.kind(),
                            destination_kind: destination.kind(),
                        },
                        new_transfer(file.as_ref()),
                    )?;
                }
            }
        }
    }

    let rows_added = batcher.finish()?;
    debug!(rows_added, stopped, "enqueue finished");
    monitor.enqueue_finished(rows_added);
    Ok(EnqueueOutcome {
        rows_added,
        stopped,
    })
}

/// Individually selected file: basename directly under each destination.
fn enqueue_file(
    batcher: &mut Batcher<'_>,
    file: &dyn Backend,
    destinations: &[Box<dyn Backend>],
) -> Result<()> {
    // Handles built straight from a path carry no listing metadata, so
    // probe the size here; it is recorded once, at enqueue time.
    let size = if file.meta().size > 0 {
        file.meta().size
    } else {
        file.metadata()?.size
    };
    for destination in destinations {
        batcher.push(
            BucketKey {
                destination_root: destination.root().to_owned(),
                source_kind: file.kind(),
                destination_kind: destination.kind(),
            },
            NewTransfer {
                source: file.root().to_owned(),
                size,
            },
        )?;
    }
    Ok(())
}

fn new_transfer(file: &dyn Backend) -> NewTransfer {
    NewTransfer {
        source: file.root().to_owned(),
        size: file.meta().size,
    }
}

fn join_segments(kind: AccountKind, root: &str, segments: &[&str]) -> String {
    segments
        .iter()
        .fold(root.to_owned(), |acc, segment| join(kind, &acc, segment))
}
