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

//! Error types for the Cumulus engine.

use std::path::PathBuf;

use thiserror::Error;

use crate::account::AccountKind;
use crate::backend;

/// Cumulus error.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// A backend call failed; carries the backend-level kind and path.
    #[error(transparent)]
    Backend(#[from] backend::Error),

    #[error("database error")]
    Database {
        #[from]
        source: rusqlite::Error,
    },

    #[error("cannot open transfers database {path:?}")]
    DatabaseOpen {
        path: PathBuf,
        source: rusqlite::Error,
    },

    #[error("no {kind} account matches {path:?}")]
    NoMatchingAccount { kind: AccountKind, path: String },

    #[error("no secret stored for access key {access_key:?}")]
    MissingSecret { access_key: String },

    #[error("cannot read settings file {path:?}")]
    SettingsRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("settings file {path:?} is malformed")]
    SettingsFormat {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("unknown conflict policy {word:?}")]
    UnknownConflictPolicy { word: String },

    #[error("invalid filter pattern {pattern:?}")]
    InvalidFilter {
        pattern: String,
        source: globset::Error,
    },

    #[error("invalid location {spec:?}: expected kind:path, e.g. local:/tmp or s3:/bucket/key")]
    InvalidLocation { spec: String },

    /// A transfer delivered fewer bytes than the row's recorded size.
    #[error("short transfer: wrote {written} of {expected} bytes")]
    ShortTransfer { written: u64, expected: u64 },
}
