// Cumulus file transfer engine.
// Copyright 2025, 2026 Cumulus contributors.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! Cross-connection properties of the transfer store.

use std::collections::HashSet;
use std::path::Path;
use std::thread;

use cumulus::account::AccountKind;
use cumulus::item::Priority;
use cumulus::store::{NewTransfer, TransferStore};
use cumulus::TransferStatus;

fn seed(db_path: &Path, rows: usize) {
    let mut store = TransferStore::open(db_path).unwrap();
    let items: Vec<NewTransfer> = (0..rows)
        .map(|i| NewTransfer {
            source: format!("/tmp/in/{i:04}.bin"),
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
}

/// Two promoters over their own connections never claim the same row.
#[test]
fn concurrent_promotion_claims_each_row_once() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("transfers.db");
    let rows = 200;
    seed(&db_path, rows);

    let claim_all = |path: std::path::PathBuf| {
        thread::spawn(move || {
            let mut store = TransferStore::open(&path).unwrap();
            let mut claimed = Vec::new();
            loop {
                let batch = store.promote_pending(7).unwrap();
                if batch.is_empty() {
                    return claimed;
                }
                claimed.extend(batch.into_iter().map(|r| r.id));
            }
        })
    };
    let first = claim_all(db_path.clone());
    let second = claim_all(db_path.clone());
    let first = first.join().unwrap();
    let second = second.join().unwrap();

    let mut seen: HashSet<i64> = HashSet::new();
    for id in first.iter().chain(second.iter()) {
        assert!(seen.insert(*id), "row {id} was promoted twice");
    }
    assert_eq!(seen.len(), rows);

    let store = TransferStore::open(&db_path).unwrap();
    assert_eq!(store.count_status(TransferStatus::Queued).unwrap(), rows);
    assert_eq!(store.count_status(TransferStatus::Pending).unwrap(), 0);
}

/// A reader connection observes consistent rows while a writer batches.
#[test]
fn reader_sees_rows_during_writes() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("transfers.db");
    seed(&db_path, 50);

    let writer_path = db_path.clone();
    let writer = thread::spawn(move || {
        let mut store = TransferStore::open(&writer_path).unwrap();
        for i in 0..20 {
            let rows: Vec<(i64, String)> = (1..=50)
                .map(|id| (id, format!("2025-01-01T00:00:{i:02}Z")))
                .collect();
            store.batch_update_started(&rows).unwrap();
        }
    });

    let reader = TransferStore::open(&db_path).unwrap();
    for _ in 0..20 {
        let rows = reader.transfers().unwrap();
        assert_eq!(rows.len(), 50);
    }
    writer.join().unwrap();

    let rows = TransferStore::open(&db_path).unwrap().transfers().unwrap();
    assert!(rows
        .iter()
        .all(|r| r.status == TransferStatus::Transferring));
}
