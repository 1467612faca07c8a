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

//! Uniform access to storage backends.
//!
//! A [Backend] is anchored at a root: a file or directory on a local
//! filesystem, or a `/{bucket}/{key}` location on an S3-family store.
//! It exposes the capability set the engine needs and nothing more:
//! listing, traversal, existence and metadata probes, directory
//! creation, streaming download, a streaming upload [Sink], and removal.
//!
//! Backend operations return [`backend::Error`](Error), which is like
//! [std::io::Error] but abstracted to cover object stores.

use std::collections::VecDeque;
use std::fmt;

use bytes::Bytes;
use time::OffsetDateTime;

use crate::account::{Account, AccountKind, SecretStore};
use crate::sink::Sink;

pub mod local;
pub mod s3;

pub use local::LocalBackend;
pub use s3::S3Backend;

/// What went wrong, in terms coarse enough to cover every backend.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    NotFound,
    NotADirectory,
    /// The backend cannot do this at all, e.g. S3 bucket-level delete.
    NotImplemented,
    /// Transport-level trouble that retries may have already been spent on.
    Transport,
    CredentialsRejected,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::NotADirectory => "not a directory",
            ErrorKind::NotImplemented => "not implemented",
            ErrorKind::Transport => "transport error",
            ErrorKind::CredentialsRejected => "credentials rejected",
            ErrorKind::Other => "error",
        })
    }
}

/// A backend operation failed.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {path:?}")]
pub struct Error {
    pub kind: ErrorKind,
    pub path: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind, path: impl Into<String>) -> Error {
        Error {
            kind,
            path: path.into(),
            source: None,
        }
    }

    pub fn io_error(path: impl Into<String>, source: std::io::Error) -> Error {
        let kind = match source.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            _ => ErrorKind::Other,
        };
        Error {
            kind,
            path: path.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Stat metadata for an entry, from a listing or a fresh probe.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Meta {
    /// Length in bytes; zero for directories.
    pub size: u64,
    pub mtime: Option<OffsetDateTime>,
    pub ctime: Option<OffsetDateTime>,
}

/// One storage location, file or directory, reachable through an account.
///
/// Handles are cheap to clone through [Backend::boxed]: S3 handles share
/// their client and runtime, local handles are plain paths. A handle for
/// a sibling or child location on the same account comes from
/// [Backend::with_root].
pub trait Backend: Send + fmt::Debug {
    fn kind(&self) -> AccountKind;

    /// Absolute root in this backend's path grammar.
    fn root(&self) -> &str;

    fn is_dir(&self) -> bool;

    /// Final path segment of the root.
    fn name(&self) -> &str;

    /// Metadata observed when this handle was produced by a listing;
    /// default (zero) for handles constructed directly from a path.
    fn meta(&self) -> &Meta;

    /// Probe whether the location exists: a stat for local backends, a
    /// `HeadObject` for the S3 family.
    fn exists(&self) -> Result<bool>;

    /// Fresh metadata probe.
    fn metadata(&self) -> Result<Meta>;

    /// Immediate children of a directory, files and directories mixed,
    /// without recursing.
    fn list_dir(&self) -> Result<Vec<Box<dyn Backend>>>;

    /// Create this directory and any missing parents; idempotent. For
    /// the S3 family this writes a zero-byte object whose key ends in
    /// `/`.
    fn make_dirs(&self) -> Result<()>;

    /// Stream the object's content as an ordered, finite sequence of
    /// chunks. The sequence is not restartable.
    fn download(&self) -> Result<Box<dyn Iterator<Item = Result<Bytes>> + Send>>;

    /// Open a streaming write sink replacing this object's content.
    fn upload(&self) -> Result<Box<dyn Sink>>;

    /// Delete the file, or the directory tree for local backends.
    fn remove(&self) -> Result<()>;

    /// A handle on the same account, anchored elsewhere.
    fn with_root(&self, root: &str, is_dir: bool) -> Box<dyn Backend>;

    /// Clone this handle into a new box.
    fn boxed(&self) -> Box<dyn Backend>;

    /// Top-down traversal of a directory tree.
    fn walk(&self) -> Walk
    where
        Self: Sized,
    {
        Walk::new(self.boxed())
    }
}

impl Clone for Box<dyn Backend> {
    fn clone(&self) -> Box<dyn Backend> {
        self.boxed()
    }
}

/// One directory visited during a walk.
pub struct WalkStep {
    pub dir: Box<dyn Backend>,
    pub dirs: Vec<Box<dyn Backend>>,
    pub files: Vec<Box<dyn Backend>>,
}

/// Depth-first pre-order traversal over [Backend::list_dir].
///
/// Each step lists one directory, so a consumer that checks a stop flag
/// between steps observes it within bounded work.
pub struct Walk {
    pending: VecDeque<Box<dyn Backend>>,
}

impl Walk {
    pub fn new(dir: Box<dyn Backend>) -> Walk {
        let mut pending = VecDeque::new();
        pending.push_back(dir);
        Walk { pending }
    }
}

impl Iterator for Walk {
    type Item = Result<WalkStep>;

    fn next(&mut self) -> Option<Self::Item> {
        let dir = self.pending.pop_front()?;
        let children = match dir.list_dir() {
            Ok(children) => children,
            Err(err) => return Some(Err(err)),
        };
        let mut dirs = Vec::new();
        let mut files = Vec::new();
        for child in children {
            if child.is_dir() {
                dirs.push(child);
            } else {
                files.push(child);
            }
        }
        // Pre-order: visit subdirectories before later siblings.
        for sub in dirs.iter().rev() {
            self.pending.push_front(sub.boxed());
        }
        Some(Ok(WalkStep { dir, dirs, files }))
    }
}

/// Open a backend handle for `root` through `account`'s client.
pub fn open(
    account: &Account,
    root: &str,
    is_dir: bool,
    secrets: &dyn SecretStore,
) -> crate::Result<Box<dyn Backend>> {
    match account.kind {
        AccountKind::Local => Ok(Box::new(LocalBackend::new(account.with_root(root), is_dir))),
        AccountKind::S3 | AccountKind::S3Compat => Ok(Box::new(S3Backend::open(
            account.with_root(root),
            is_dir,
            secrets,
        )?)),
    }
}

/// Final path segment of `path` in `kind`'s grammar.
pub fn basename(kind: AccountKind, path: &str) -> &str {
    let sep = kind.separator();
    let trimmed = path.trim_end_matches(sep);
    match trimmed.rfind(sep) {
        Some(pos) => &trimmed[pos + 1..],
        None => trimmed,
    }
}

/// Join a name onto a directory root in `kind`'s grammar.
pub fn join(kind: AccountKind, root: &str, name: &str) -> String {
    let sep = kind.separator();
    let mut joined = root.trim_end_matches(sep).to_owned();
    joined.push(sep);
    joined.push_str(name.trim_start_matches(sep));
    joined
}

/// Split `path` into the components below `root`, or None when `path`
/// does not lie under `root`.
pub fn relative_components<'a>(
    kind: AccountKind,
    root: &str,
    path: &'a str,
) -> Option<Vec<&'a str>> {
    let sep = kind.separator();
    let root = root.trim_end_matches(sep);
    let rest = match path.strip_prefix(root) {
        Some("") => return Some(Vec::new()),
        Some(rest) if rest.starts_with(sep) => rest,
        _ => return None,
    };
    Some(
        rest.split(sep)
            .filter(|segment| !segment.is_empty())
            .collect(),
    )
}
