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

//! End-to-end engine scenarios over the local backend.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use assert_fs::prelude::*;
use pretty_assertions::assert_eq;

use cumulus::account::{Account, MemorySecrets, StaticAccounts};
use cumulus::backend::LocalBackend;
use cumulus::counters::Counter;
use cumulus::enqueue::EnqueuePlan;
use cumulus::item::Priority;
use cumulus::misc::from_iso;
use cumulus::monitor::collect::CollectMonitor;
use cumulus::{Backend, ConflictPolicy, Engine, EngineConfig, TransferStatus};

const WAIT: Duration = Duration::from_secs(30);

fn engine_with(
    db_dir: &Path,
    monitor: Arc<CollectMonitor>,
    workers: usize,
    conflict: ConflictPolicy,
) -> Engine {
    let mut config = EngineConfig::new(
        db_dir.join("transfers.db"),
        Arc::new(StaticAccounts(vec![Account::local("/")])),
        Arc::new(MemorySecrets::new()),
        monitor,
    );
    config.max_workers = workers;
    config.conflict = conflict;
    config.pop_timeout = Duration::from_millis(100);
    config.flush_interval = Duration::from_millis(50);
    Engine::open(config).unwrap()
}

fn file_source(path: &Path) -> Box<dyn Backend> {
    Box::new(LocalBackend::new(Account::local(path), false))
}

fn dir_dest(path: &Path) -> Box<dyn Backend> {
    Box::new(LocalBackend::new(Account::local(path), true))
}

fn file_plan(source: &Path, dest: &Path, priority: Priority) -> EnqueuePlan {
    EnqueuePlan {
        sources: vec![file_source(source)],
        destinations: vec![dir_dest(dest)],
        filters: vec![],
        recursive: false,
        priority,
    }
}

#[test]
fn single_file_transfer_end_to_end() {
    let temp = assert_fs::TempDir::new().unwrap();
    temp.child("a.txt").write_str("hello world!").unwrap();
    temp.child("out").create_dir_all().unwrap();
    let db = tempfile::tempdir().unwrap();

    let monitor = Arc::new(CollectMonitor::new());
    let engine = engine_with(db.path(), monitor.clone(), 1, ConflictPolicy::Overwrite);
    let outcome = engine
        .enqueue(
            &file_plan(
                temp.child("a.txt").path(),
                temp.child("out").path(),
                Priority::Normal,
            ),
            true,
        )
        .unwrap();
    assert_eq!(outcome.rows_added, 1);

    monitor.wait_until_complete(WAIT);
    engine.stop();

    temp.child("out/a.txt").assert("hello world!");
    let finished = monitor.take_finished();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].status, TransferStatus::Completed);
    assert_eq!(finished[0].processed, 12);

    let rows = engine.completed().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, TransferStatus::Completed);
    assert!(!rows[0].start_time.is_empty());
    assert!(!rows[0].end_time.is_empty());
    assert!(rows[0].error_message.is_empty());
    temp.close().unwrap();
}

#[test]
fn higher_priority_starts_first_with_one_worker() {
    let temp = assert_fs::TempDir::new().unwrap();
    temp.child("urgent.bin").write_str(&"u".repeat(100)).unwrap();
    temp.child("later.bin").write_str(&"l".repeat(200)).unwrap();
    temp.child("out").create_dir_all().unwrap();
    let db = tempfile::tempdir().unwrap();

    let monitor = Arc::new(CollectMonitor::new());
    let engine = engine_with(db.path(), monitor.clone(), 1, ConflictPolicy::Overwrite);
    // Enqueued later, but at higher priority.
    engine
        .enqueue(
            &file_plan(
                temp.child("later.bin").path(),
                temp.child("out").path(),
                Priority::Normal,
            ),
            false,
        )
        .unwrap();
    engine
        .enqueue(
            &file_plan(
                temp.child("urgent.bin").path(),
                temp.child("out").path(),
                Priority::VeryHigh,
            ),
            false,
        )
        .unwrap();
    engine.start().unwrap();
    monitor.wait_until_complete(WAIT);
    engine.stop();

    let started = monitor.started_events();
    assert_eq!(started.len(), 2);
    let rows = engine.completed().unwrap();
    let urgent = rows.iter().find(|r| r.source.ends_with("urgent.bin")).unwrap();
    let later = rows.iter().find(|r| r.source.ends_with("later.bin")).unwrap();
    assert_eq!(started[0].id, urgent.id);
    assert!(from_iso(&urgent.start_time).unwrap() <= from_iso(&later.start_time).unwrap());
    temp.close().unwrap();
}

#[test]
fn hash_policy_skips_identical_destination() {
    let temp = assert_fs::TempDir::new().unwrap();
    temp.child("a.txt").write_str("same bytes").unwrap();
    temp.child("out/a.txt").write_str("same bytes").unwrap();
    let db = tempfile::tempdir().unwrap();

    let monitor = Arc::new(CollectMonitor::new());
    let engine = engine_with(db.path(), monitor.clone(), 1, ConflictPolicy::Hash);
    engine
        .enqueue(
            &file_plan(
                temp.child("a.txt").path(),
                temp.child("out").path(),
                Priority::Normal,
            ),
            true,
        )
        .unwrap();
    monitor.wait_until_complete(WAIT);
    engine.stop();

    let finished = monitor.take_finished();
    assert_eq!(finished[0].status, TransferStatus::Completed);
    assert_eq!(finished[0].message, "Skipped");
    assert_eq!(finished[0].processed, 0);
    assert_eq!(monitor.get_counter(Counter::Skipped), 1);
    assert_eq!(engine.completed().unwrap().len(), 1);
    temp.close().unwrap();
}

#[test]
fn rename_policy_keeps_both_files() {
    let temp = assert_fs::TempDir::new().unwrap();
    temp.child("other/a.txt").write_str("fresh bytes").unwrap();
    temp.child("out/a.txt").write_str("original").unwrap();
    let db = tempfile::tempdir().unwrap();

    let monitor = Arc::new(CollectMonitor::new());
    let engine = engine_with(db.path(), monitor.clone(), 1, ConflictPolicy::Rename);
    engine
        .enqueue(
            &file_plan(
                temp.child("other/a.txt").path(),
                temp.child("out").path(),
                Priority::Normal,
            ),
            true,
        )
        .unwrap();
    monitor.wait_until_complete(WAIT);
    engine.stop();

    temp.child("out/a.txt").assert("original");
    temp.child("out/a (1).txt").assert("fresh bytes");
    assert_eq!(engine.completed().unwrap().len(), 1);
    temp.close().unwrap();
}

#[test]
fn directory_copy_preserves_relative_paths() {
    let temp = assert_fs::TempDir::new().unwrap();
    temp.child("dir/sub1/one.txt").write_str("1").unwrap();
    temp.child("dir/sub2/two.txt").write_str("22").unwrap();
    temp.child("dir/three.txt").write_str("333").unwrap();
    temp.child("dl").create_dir_all().unwrap();
    let db = tempfile::tempdir().unwrap();

    let monitor = Arc::new(CollectMonitor::new());
    let engine = engine_with(db.path(), monitor.clone(), 2, ConflictPolicy::Overwrite);
    let plan = EnqueuePlan {
        sources: vec![Box::new(LocalBackend::new(
            Account::local(temp.child("dir").path()),
            true,
        ))],
        destinations: vec![dir_dest(temp.child("dl").path())],
        filters: vec![],
        recursive: true,
        priority: Priority::Normal,
    };
    let outcome = engine.enqueue(&plan, true).unwrap();
    assert_eq!(outcome.rows_added, 3);

    monitor.wait_until_complete(WAIT);
    engine.stop();

    temp.child("dl/dir/sub1/one.txt").assert("1");
    temp.child("dl/dir/sub2/two.txt").assert("22");
    temp.child("dl/dir/three.txt").assert("333");
    assert_eq!(engine.completed().unwrap().len(), 3);
    temp.close().unwrap();
}

#[test]
fn stop_leaves_no_row_stuck_and_restart_finishes() {
    let temp = assert_fs::TempDir::new().unwrap();
    let total = 120;
    for i in 0..total {
        temp.child(format!("src/{i:03}.txt"))
            .write_str(&format!("content {i}"))
            .unwrap();
    }
    temp.child("out").create_dir_all().unwrap();
    let db = tempfile::tempdir().unwrap();

    let monitor = Arc::new(CollectMonitor::new());
    let engine = engine_with(db.path(), monitor.clone(), 4, ConflictPolicy::Overwrite);
    let plan = EnqueuePlan {
        sources: vec![Box::new(LocalBackend::new(
            Account::local(temp.child("src").path()),
            true,
        ))],
        destinations: vec![dir_dest(temp.child("out").path())],
        filters: vec![],
        recursive: true,
        priority: Priority::Normal,
    };
    assert_eq!(engine.enqueue(&plan, true).unwrap().rows_added, total);

    // Let some transfers finish, then pull the plug.
    let deadline = std::time::Instant::now() + WAIT;
    while monitor.finished_events().len() < 5 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    engine.stop();

    let completed = engine.completed().unwrap().len();
    assert!(completed >= 5, "only {completed} rows completed before stop");
    let transfers = engine.transfers().unwrap();
    assert!(transfers
        .iter()
        .all(|r| r.status == TransferStatus::Pending));
    assert!(engine.errors().unwrap().is_empty());
    assert_eq!(completed + transfers.len(), total);

    // A restart drains the rest.
    monitor.reset_complete();
    engine.start().unwrap();
    monitor.wait_until_complete(WAIT);
    engine.shutdown();

    assert_eq!(engine.completed().unwrap().len(), total);
    for i in 0..total {
        temp.child(format!("out/src/{i:03}.txt"))
            .assert(format!("content {i}").as_str());
    }
    temp.close().unwrap();
}

#[test]
fn errored_row_carries_message_and_end_time() {
    let temp = assert_fs::TempDir::new().unwrap();
    temp.child("out").create_dir_all().unwrap();
    let db = tempfile::tempdir().unwrap();

    let monitor = Arc::new(CollectMonitor::new());
    let engine = engine_with(db.path(), monitor.clone(), 1, ConflictPolicy::Overwrite);
    // The source never existed; enqueue it directly through the store
    // row path by pointing at a missing file.
    let plan = EnqueuePlan {
        sources: vec![file_source(temp.child("ghost.txt").path())],
        destinations: vec![dir_dest(temp.child("out").path())],
        filters: vec![],
        recursive: false,
        priority: Priority::Normal,
    };
    // Size probing fails for the missing file before a row is written.
    assert!(engine.enqueue(&plan, true).is_err());
    assert!(engine.transfers().unwrap().is_empty());

    // Rows that vanish between enqueue and execution do reach ERROR.
    temp.child("ghost.txt").write_str("now you see me").unwrap();
    engine.enqueue(&plan, false).unwrap();
    std::fs::remove_file(temp.child("ghost.txt").path()).unwrap();
    engine.start().unwrap();
    monitor.wait_until_complete(WAIT);
    engine.stop();

    let errors = engine.errors().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(!errors[0].error_message.is_empty());
    assert!(!errors[0].end_time.is_empty());
    temp.close().unwrap();
}

#[test]
fn remove_rows_undoes_an_enqueue() {
    let temp = assert_fs::TempDir::new().unwrap();
    temp.child("a.txt").write_str("x").unwrap();
    temp.child("out").create_dir_all().unwrap();
    let db = tempfile::tempdir().unwrap();

    let monitor = Arc::new(CollectMonitor::new());
    let engine = engine_with(db.path(), monitor, 1, ConflictPolicy::Overwrite);
    engine
        .enqueue(
            &file_plan(
                temp.child("a.txt").path(),
                temp.child("out").path(),
                Priority::Normal,
            ),
            false,
        )
        .unwrap();
    let ids: Vec<i64> = engine.transfers().unwrap().iter().map(|r| r.id).collect();
    assert_eq!(engine.remove_rows(&ids).unwrap(), 1);
    assert!(engine.transfers().unwrap().is_empty());
    assert!(engine.completed().unwrap().is_empty());
    assert!(engine.errors().unwrap().is_empty());
    temp.close().unwrap();
}
