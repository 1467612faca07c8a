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

//! The durable transfer queue, one SQLite file in WAL mode.
//!
//! Every owner (feeder, batcher, enqueue pipeline, presentation) opens
//! its own [TransferStore]; connections are never shared across
//! threads. Each operation runs in its own transaction and either
//! applies completely or not at all; callers that can retry do so on
//! the next tick.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, params_from_iter, Connection, TransactionBehavior};
use tracing::warn;

use crate::account::AccountKind;
use crate::backend::{basename, join};
use crate::item::{Priority, TransferStatus};
use crate::{Error, Result};

/// Serializes whole-table reset and clean operations across all the
/// process's connections.
static RESET_LOCK: Mutex<()> = Mutex::new(());

/// One persisted transfer row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferRecord {
    pub id: i64,
    pub source: String,
    pub destination: String,
    pub size: u64,
    pub priority: Priority,
    pub status: TransferStatus,
    /// RFC 3339, or empty when unset.
    pub start_time: String,
    pub end_time: String,
    pub error_message: String,
    pub source_kind: AccountKind,
    pub destination_kind: AccountKind,
}

/// A file waiting to be inserted by the enqueue pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTransfer {
    /// Absolute source path in the source backend's grammar.
    pub source: String,
    /// Source size at enqueue time; not re-read before transfer.
    pub size: u64,
}

/// A batch of files sharing one destination directory.
#[derive(Clone, Debug)]
pub struct TransferBatch {
    pub destination_root: String,
    pub source_kind: AccountKind,
    pub destination_kind: AccountKind,
    pub priority: Priority,
    pub items: Vec<NewTransfer>,
}

pub struct TransferStore {
    conn: Connection,
    path: PathBuf,
}

impl std::fmt::Debug for TransferStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferStore")
            .field("path", &self.path)
            .finish()
    }
}

const SELECT_COLUMNS: &str = "id, source, destination, size, priority, status,
     start_time, end_time, error_message, source_kind, destination_kind";

impl TransferStore {
    /// Open (and if necessary create) the transfers database.
    pub fn open(path: &Path) -> Result<TransferStore> {
        let conn = Connection::open(path).map_err(|source| Error::DatabaseOpen {
            path: path.to_owned(),
            source,
        })?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        // WAL lets presentation readers run while a writer is active.
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS transfers (
                id INTEGER PRIMARY KEY ASC,
                source TEXT NOT NULL,
                destination TEXT NOT NULL,
                size INTEGER NOT NULL,
                priority INTEGER DEFAULT 3,
                status INTEGER DEFAULT 0,
                start_time TEXT NOT NULL DEFAULT '',
                end_time TEXT NOT NULL DEFAULT '',
                error_message TEXT NOT NULL DEFAULT '',
                source_kind TEXT NOT NULL,
                destination_kind TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_transfers_status ON transfers (status);
            CREATE INDEX IF NOT EXISTS idx_transfers_priority ON transfers (priority);",
        )?;
        Ok(TransferStore {
            conn,
            path: path.to_owned(),
        })
    }

    /// Insert one row.
    pub fn add_transfer(
        &mut self,
        item: &NewTransfer,
        destination: &str,
        source_kind: AccountKind,
        destination_kind: AccountKind,
        priority: Priority,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO transfers
                 (source, destination, size, priority, source_kind, destination_kind)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                item.source,
                destination,
                item.size,
                priority.code(),
                source_kind.as_tag(),
                destination_kind.as_tag(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Insert a batch of rows bound for one destination directory.
    ///
    /// Each row's destination is `destination_root` joined with the
    /// basename of its source.
    pub fn add_transfers(
        &mut self,
        items: &[NewTransfer],
        destination_root: &str,
        source_kind: AccountKind,
        destination_kind: AccountKind,
        priority: Priority,
    ) -> Result<usize> {
        let batch = TransferBatch {
            destination_root: destination_root.to_owned(),
            source_kind,
            destination_kind,
            priority,
            items: items.to_vec(),
        };
        self.add_batches(std::slice::from_ref(&batch))
    }

    /// Insert several destination-keyed batches in one transaction.
    pub fn add_batches(&mut self, batches: &[TransferBatch]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO transfers
                     (source, destination, size, priority, source_kind, destination_kind)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for batch in batches {
                for item in &batch.items {
                    let name = basename(batch.source_kind, &item.source);
                    let destination = join(batch.destination_kind, &batch.destination_root, name);
                    stmt.execute(params![
                        item.source,
                        destination,
                        item.size,
                        batch.priority.code(),
                        batch.source_kind.as_tag(),
                        batch.destination_kind.as_tag(),
                    ])?;
                    inserted += 1;
                }
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Delete rows by id.
    pub fn drop_rows(&mut self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "DELETE FROM transfers WHERE id IN ({})",
            placeholders(ids.len())
        );
        let changed = self.conn.execute(&sql, params_from_iter(ids.iter()))?;
        Ok(changed)
    }

    /// Atomically claim up to `limit` pending rows: select them in
    /// `(priority ASC, id ASC)` order and mark them QUEUED inside one
    /// immediate transaction, so concurrent feeders can never observe
    /// the same pending row.
    pub fn promote_pending(&mut self, limit: usize) -> Result<Vec<TransferRecord>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut records = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM transfers
                 WHERE status = ?1
                 ORDER BY priority ASC, id ASC
                 LIMIT ?2"
            ))?;
            let rows = stmt.query_map(
                params![TransferStatus::Pending.code(), limit as i64],
                row_to_raw,
            )?;
            collect_records(rows)?
        };
        if !records.is_empty() {
            let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
            let sql = format!(
                "UPDATE transfers SET status = {} WHERE id IN ({})",
                TransferStatus::Queued.code(),
                placeholders(ids.len())
            );
            tx.execute(&sql, params_from_iter(ids.iter()))?;
        }
        tx.commit()?;
        for record in &mut records {
            record.status = TransferStatus::Queued;
        }
        Ok(records)
    }

    /// Put promoted rows that could not be materialized back to PENDING.
    pub fn requeue_rows(&mut self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "UPDATE transfers SET status = {} WHERE id IN ({})",
            TransferStatus::Pending.code(),
            placeholders(ids.len())
        );
        Ok(self.conn.execute(&sql, params_from_iter(ids.iter()))?)
    }

    /// Record that transfers began: status TRANSFERRING plus start time.
    pub fn batch_update_started(&mut self, rows: &[(i64, String)]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE transfers SET status = ?1, start_time = ?2 WHERE id = ?3",
            )?;
            for (id, start_time) in rows {
                stmt.execute(params![TransferStatus::Transferring.code(), start_time, id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Record successful completions.
    pub fn batch_update_completed(&mut self, rows: &[(i64, String)]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt =
                tx.prepare("UPDATE transfers SET status = ?1, end_time = ?2 WHERE id = ?3")?;
            for (id, end_time) in rows {
                stmt.execute(params![TransferStatus::Completed.code(), end_time, id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Record failures with their messages.
    pub fn batch_update_error(&mut self, rows: &[(i64, String, String)]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE transfers
                 SET status = ?1, end_time = ?2, error_message = ?3
                 WHERE id = ?4",
            )?;
            for (id, end_time, message) in rows {
                stmt.execute(params![
                    TransferStatus::Error.code(),
                    end_time,
                    message,
                    id
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Reset in-flight rows (QUEUED or TRANSFERRING) to PENDING, in one
    /// statement, so a stopped engine can restart them.
    pub fn reset_inflight(&mut self) -> Result<usize> {
        let _guard = RESET_LOCK.lock().unwrap();
        let changed = self.conn.execute(
            "UPDATE transfers SET status = ?1, start_time = ''
             WHERE status IN (?2, ?3)",
            params![
                TransferStatus::Pending.code(),
                TransferStatus::Queued.code(),
                TransferStatus::Transferring.code(),
            ],
        )?;
        Ok(changed)
    }

    /// Boot-time cleanup: reset in-flight rows and clear timestamps and
    /// error text on everything non-terminal. Idempotent.
    pub fn clean(&mut self) -> Result<()> {
        let _guard = RESET_LOCK.lock().unwrap();
        let tx = self.conn.transaction()?;
        tx.execute(
            "UPDATE transfers SET status = ?1, start_time = ''
             WHERE status IN (?2, ?3)",
            params![
                TransferStatus::Pending.code(),
                TransferStatus::Queued.code(),
                TransferStatus::Transferring.code(),
            ],
        )?;
        tx.execute(
            "UPDATE transfers SET start_time = '', end_time = '', error_message = ''
             WHERE status NOT IN (?1, ?2)",
            params![
                TransferStatus::Error.code(),
                TransferStatus::Completed.code(),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Rows still on their way: pending, queued, or transferring.
    pub fn transfers(&self) -> Result<Vec<TransferRecord>> {
        self.select(&format!(
            "WHERE status <= {} ORDER BY priority ASC, id ASC",
            TransferStatus::Transferring.code()
        ))
    }

    /// Rows that failed, for the errors tab.
    pub fn errors(&self) -> Result<Vec<TransferRecord>> {
        self.select(&format!(
            "WHERE status = {} ORDER BY id ASC",
            TransferStatus::Error.code()
        ))
    }

    /// Rows that finished, for the processed tab.
    pub fn completed(&self) -> Result<Vec<TransferRecord>> {
        self.select(&format!(
            "WHERE status = {} ORDER BY id ASC",
            TransferStatus::Completed.code()
        ))
    }

    pub fn get(&self, id: i64) -> Result<Option<TransferRecord>> {
        let mut records = self.select(&format!("WHERE id = {id}"))?;
        Ok(records.pop())
    }

    pub fn count_status(&self, status: TransferStatus) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM transfers WHERE status = ?1",
            params![status.code()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn select(&self, clause: &str) -> Result<Vec<TransferRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {SELECT_COLUMNS} FROM transfers {clause}"))?;
        let rows = stmt.query_map([], row_to_raw)?;
        collect_records(rows)
    }
}

/// Column tuple as read, before tag decoding.
type RawRow = (
    i64,
    String,
    String,
    i64,
    i64,
    i64,
    String,
    String,
    String,
    String,
    String,
);

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
    ))
}

fn collect_records(
    rows: impl Iterator<Item = rusqlite::Result<RawRow>>,
) -> Result<Vec<TransferRecord>> {
    let mut records = Vec::new();
    for raw in rows {
        let (
            id,
            source,
            destination,
            size,
            priority,
            status,
            start_time,
            end_time,
            error_message,
            source_kind,
            destination_kind,
        ) = raw?;
        let (Some(source_kind), Some(destination_kind)) = (
            AccountKind::from_tag(&source_kind),
            AccountKind::from_tag(&destination_kind),
        ) else {
            warn!(id, %source_kind, %destination_kind, "row has unknown backend kind; skipping");
            continue;
        };
        let Some(status) = TransferStatus::from_code(status) else {
            warn!(id, status, "row has unknown status; skipping");
            continue;
        };
        records.push(TransferRecord {
            id,
            source,
            destination,
            size: size.max(0) as u64,
            priority: Priority::from_code(priority),
            status,
            start_time,
            end_time,
            error_message,
            source_kind,
            destination_kind,
        });
    }
    Ok(records)
}

fn placeholders(n: usize) -> String {
    itertools::join(std::iter::repeat("?").take(n), ", ")
}

#[cfg(test)]
mod test {
    use super::*;

    fn store() -> (tempfile::TempDir, TransferStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = TransferStore::open(&dir.path().join("transfers.db")).unwrap();
        (dir, store)
    }

    fn seed(store: &mut TransferStore, sources: &[(&str, u64)], priority: Priority) {
        let items: Vec<NewTransfer> = sources
            .iter()
            .map(|(source, size)| NewTransfer {
                source: (*source).to_owned(),
                size: *size,
            })
            .collect();
        store
            .add_transfers(
                &items,
                "/bucket/out",
                AccountKind::Local,
                AccountKind::S3,
                priority,
            )
            .unwrap();
    }

    #[test]
    fn insert_computes_destination_from_basename() {
        let (_dir, mut store) = store();
        seed(&mut store, &[("/tmp/in/a.txt", 12)], Priority::Normal);
        let rows = store.transfers().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].destination, "/bucket/out/a.txt");
        assert_eq!(rows[0].status, TransferStatus::Pending);
        assert_eq!(rows[0].size, 12);
        assert_eq!(rows[0].source_kind, AccountKind::Local);
        assert_eq!(rows[0].destination_kind, AccountKind::S3);
    }

    #[test]
    fn promote_orders_by_priority_then_id() {
        let (_dir, mut store) = store();
        seed(&mut store, &[("/tmp/low.txt", 1)], Priority::Low);
        seed(&mut store, &[("/tmp/high.txt", 1)], Priority::VeryHigh);
        seed(&mut store, &[("/tmp/normal.txt", 1)], Priority::Normal);

        let promoted = store.promote_pending(10).unwrap();
        let names: Vec<&str> = promoted.iter().map(|r| r.source.as_str()).collect();
        assert_eq!(names, ["/tmp/high.txt", "/tmp/normal.txt", "/tmp/low.txt"]);
        assert!(promoted.iter().all(|r| r.status == TransferStatus::Queued));

        // Everything is claimed; a second promotion finds nothing.
        assert!(store.promote_pending(10).unwrap().is_empty());
        assert_eq!(store.count_status(TransferStatus::Queued).unwrap(), 3);
    }

    #[test]
    fn promote_respects_limit() {
        let (_dir, mut store) = store();
        for i in 0..5 {
            seed(&mut store, &[(&format!("/tmp/{i}.txt"), 1)], Priority::Normal);
        }
        assert_eq!(store.promote_pending(2).unwrap().len(), 2);
        assert_eq!(store.count_status(TransferStatus::Pending).unwrap(), 3);
    }

    #[test]
    fn status_batches_set_their_columns() {
        let (_dir, mut store) = store();
        seed(&mut store, &[("/tmp/a", 1), ("/tmp/b", 1)], Priority::Normal);
        let promoted = store.promote_pending(10).unwrap();
        let (a, b) = (promoted[0].id, promoted[1].id);

        store
            .batch_update_started(&[(a, "2025-01-01T00:00:00Z".into())])
            .unwrap();
        let row = store.get(a).unwrap().unwrap();
        assert_eq!(row.status, TransferStatus::Transferring);
        assert_eq!(row.start_time, "2025-01-01T00:00:00Z");

        store
            .batch_update_completed(&[(a, "2025-01-01T00:01:00Z".into())])
            .unwrap();
        let row = store.get(a).unwrap().unwrap();
        assert_eq!(row.status, TransferStatus::Completed);
        assert_eq!(row.end_time, "2025-01-01T00:01:00Z");
        assert!(row.error_message.is_empty());

        store
            .batch_update_error(&[(b, "2025-01-01T00:02:00Z".into(), "boom".into())])
            .unwrap();
        let row = store.get(b).unwrap().unwrap();
        assert_eq!(row.status, TransferStatus::Error);
        assert_eq!(row.error_message, "boom");
        assert!(!row.end_time.is_empty());
    }

    #[test]
    fn reset_inflight_restores_pending() {
        let (_dir, mut store) = store();
        seed(&mut store, &[("/tmp/a", 1), ("/tmp/b", 1)], Priority::Normal);
        let promoted = store.promote_pending(10).unwrap();
        store
            .batch_update_started(&[(promoted[0].id, "2025-01-01T00:00:00Z".into())])
            .unwrap();

        let changed = store.reset_inflight().unwrap();
        assert_eq!(changed, 2);
        assert_eq!(store.count_status(TransferStatus::Pending).unwrap(), 2);
        assert!(store
            .transfers()
            .unwrap()
            .iter()
            .all(|r| r.start_time.is_empty()));
    }

    #[test]
    fn clean_is_idempotent_and_keeps_terminal_rows() {
        let (_dir, mut store) = store();
        seed(&mut store, &[("/tmp/a", 1), ("/tmp/b", 1)], Priority::Normal);
        let promoted = store.promote_pending(10).unwrap();
        store
            .batch_update_error(&[(promoted[0].id, "2025-01-01T00:02:00Z".into(), "boom".into())])
            .unwrap();

        store.clean().unwrap();
        let after_once: Vec<_> = store.errors().unwrap();
        assert_eq!(after_once.len(), 1);
        assert_eq!(after_once[0].error_message, "boom");
        assert_eq!(store.count_status(TransferStatus::Pending).unwrap(), 1);

        store.clean().unwrap();
        assert_eq!(store.errors().unwrap(), after_once);
        assert_eq!(store.count_status(TransferStatus::Pending).unwrap(), 1);
    }

    #[test]
    fn drop_rows_restores_pre_enqueue_state() {
        let (_dir, mut store) = store();
        seed(&mut store, &[("/tmp/a", 1), ("/tmp/b", 2)], Priority::Normal);
        let ids: Vec<i64> = store.transfers().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(store.drop_rows(&ids).unwrap(), 2);
        assert!(store.transfers().unwrap().is_empty());
        assert_eq!(store.count_status(TransferStatus::Pending).unwrap(), 0);
    }

    #[test]
    fn mixed_batches_insert_in_one_call() {
        let (_dir, mut store) = store();
        let batches = vec![
            TransferBatch {
                destination_root: "/bucket/one".into(),
                source_kind: AccountKind::Local,
                destination_kind: AccountKind::S3,
                priority: Priority::Normal,
                items: vec![NewTransfer {
                    source: "/tmp/a.txt".into(),
                    size: 1,
                }],
            },
            TransferBatch {
                destination_root: "/bucket/two".into(),
                source_kind: AccountKind::Local,
                destination_kind: AccountKind::S3,
                priority: Priority::High,
                items: vec![NewTransfer {
                    source: "/tmp/b.txt".into(),
                    size: 2,
                }],
            },
        ];
        assert_eq!(store.add_batches(&batches).unwrap(), 2);
        let rows = store.transfers().unwrap();
        assert_eq!(rows[0].destination, "/bucket/one/a.txt");
        assert_eq!(rows[1].destination, "/bucket/two/b.txt");
        assert_eq!(rows[1].priority, Priority::High);
    }
}
