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

//! Cumulus moves objects between storage accounts: local filesystems,
//! Amazon S3, and S3-compatible stores such as Digital Ocean Spaces.
//!
//! Transfers are durable rows in an embedded SQLite queue. A feeder
//! thread promotes pending rows into a bounded in-memory priority queue,
//! a pool of worker threads streams each object from its source backend
//! to its destination backend, and a status batcher coalesces state
//! changes back into the store. The [Engine] ties the pieces together
//! and is the only type most embedders need.

use std::time::Duration;

pub mod account;
pub mod backend;
pub mod batcher;
pub mod conflict;
pub mod counters;
pub mod engine;
pub mod enqueue;
mod errors;
pub mod executor;
pub mod feeder;
pub mod filter;
pub mod hotqueue;
pub mod item;
pub mod kind;
pub mod misc;
pub mod monitor;
pub mod sink;
pub mod store;

pub use crate::account::{Account, AccountIndex, AccountKind, SecretStore};
pub use crate::backend::Backend;
pub use crate::conflict::ConflictPolicy;
pub use crate::engine::{Engine, EngineConfig};
pub use crate::errors::Error;
pub use crate::item::{Priority, TransferItem, TransferStatus};
pub use crate::kind::Kind;
pub use crate::monitor::Monitor;
pub use crate::store::{TransferRecord, TransferStore};

/// Chunk size for streaming reads from a source backend.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Bytes buffered in a sink before it commits a write downstream.
pub const SINK_BUFFER_SIZE: usize = 16 * 4096;

/// Chunks held between a backend's background IO task and its consumer.
pub const PIPE_DEPTH: usize = 16;

/// Rows inserted per transaction by the enqueue pipeline.
pub const INSERT_BATCH: usize = 100;

/// Workers wait this long on an empty hot queue before re-checking state.
pub const POP_TIMEOUT: Duration = Duration::from_secs(5);

/// The feeder promotes up to `FEED_FACTOR * max_workers` rows per pass,
/// and the hot queue holds the same number of items.
pub const FEED_FACTOR: usize = 2;

/// Objects listed per S3 `ListObjectsV2` page.
pub const S3_PAGE_SIZE: i32 = 1000;

/// Part size for S3 multipart uploads.
pub const S3_PART_SIZE: usize = 5 * 1024 * 1024;

/// Retry budget for S3 calls (standard mode with backoff).
pub const S3_MAX_ATTEMPTS: u32 = 10;

/// Interval between status batcher flushes.
pub const BATCH_FLUSH_INTERVAL: Duration = Duration::from_millis(1000);

/// Attempts, and the pause between them, when joining the feeder at shutdown.
pub const JOIN_ATTEMPTS: usize = 10;
pub const JOIN_WAIT: Duration = Duration::from_millis(100);

pub type Result<T> = std::result::Result<T, Error>;

/// Version of the Cumulus library code.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
