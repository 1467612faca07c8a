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

//! Access to files on the local filesystem.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, MAIN_SEPARATOR};

use bytes::Bytes;
use time::OffsetDateTime;

use super::{basename, Backend, Error, ErrorKind, Meta, Result};
use crate::account::{Account, AccountKind};
use crate::kind::Kind;
use crate::sink::Sink;
use crate::{CHUNK_SIZE, SINK_BUFFER_SIZE};

#[derive(Clone, Debug)]
pub struct LocalBackend {
    account: Account,
    /// Root in host separator form; also the account root, rebased.
    root: String,
    name: String,
    is_dir: bool,
    meta: Meta,
}

impl LocalBackend {
    pub fn new(account: Account, is_dir: bool) -> LocalBackend {
        Self::with_meta(account, is_dir, Meta::default())
    }

    fn with_meta(mut account: Account, is_dir: bool, meta: Meta) -> LocalBackend {
        let root = normalize(&account.root);
        account.root = root.clone();
        let name = basename(AccountKind::Local, &root).to_owned();
        LocalBackend {
            account,
            root,
            name,
            is_dir,
            meta,
        }
    }

    fn path(&self) -> &Path {
        Path::new(&self.root)
    }
}

/// Convert `/` or `\` separators into the host form.
fn normalize(path: &str) -> String {
    path.chars()
        .map(|c| {
            if c == '/' || c == '\\' {
                MAIN_SEPARATOR
            } else {
                c
            }
        })
        .collect()
}

fn stat_meta(meta: &fs::Metadata) -> Meta {
    Meta {
        size: meta.len(),
        mtime: meta.modified().ok().map(OffsetDateTime::from),
        ctime: meta.created().ok().map(OffsetDateTime::from),
    }
}

impl Backend for LocalBackend {
    fn kind(&self) -> AccountKind {
        AccountKind::Local
    }

    fn root(&self) -> &str {
        &self.root
    }

    fn is_dir(&self) -> bool {
        self.is_dir
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn exists(&self) -> Result<bool> {
        match fs::metadata(self.path()) {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(Error::io_error(&self.root, err)),
        }
    }

    fn metadata(&self) -> Result<Meta> {
        fs::metadata(self.path())
            .map(|m| stat_meta(&m))
            .map_err(|err| Error::io_error(&self.root, err))
    }

    fn list_dir(&self) -> Result<Vec<Box<dyn Backend>>> {
        if !self.is_dir {
            return Err(Error::new(ErrorKind::NotADirectory, &self.root));
        }
        let mut children: Vec<Box<dyn Backend>> = Vec::new();
        for entry in fs::read_dir(self.path()).map_err(|e| Error::io_error(&self.root, e))? {
            let entry = entry.map_err(|e| Error::io_error(&self.root, e))?;
            let file_type = entry
                .file_type()
                .map_err(|e| Error::io_error(&self.root, e))?;
            let child_root = entry.path().to_string_lossy().into_owned();
            match Kind::from(file_type) {
                Kind::Dir => children.push(Box::new(LocalBackend::with_meta(
                    self.account.with_root(&child_root),
                    true,
                    Meta::default(),
                ))),
                Kind::File => {
                    let meta = entry
                        .metadata()
                        .map(|m| stat_meta(&m))
                        .unwrap_or_default();
                    children.push(Box::new(LocalBackend::with_meta(
                        self.account.with_root(&child_root),
                        false,
                        meta,
                    )));
                }
                // Symlinks and specials are not transferable.
                Kind::Unknown => {}
            }
        }
        Ok(children)
    }

    fn make_dirs(&self) -> Result<()> {
        fs::create_dir_all(self.path()).map_err(|e| Error::io_error(&self.root, e))
    }

    fn download(&self) -> Result<Box<dyn Iterator<Item = Result<Bytes>> + Send>> {
        let file = File::open(self.path()).map_err(|e| Error::io_error(&self.root, e))?;
        Ok(Box::new(FileChunks {
            file,
            path: self.root.clone(),
            done: false,
        }))
    }

    fn upload(&self) -> Result<Box<dyn Sink>> {
        if let Some(parent) = self.path().parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io_error(&self.root, e))?;
        }
        let file = File::create(self.path()).map_err(|e| Error::io_error(&self.root, e))?;
        Ok(Box::new(LocalSink {
            file: Some(file),
            path: self.root.clone(),
            buf: Vec::with_capacity(SINK_BUFFER_SIZE),
        }))
    }

    fn remove(&self) -> Result<()> {
        let result = if self.path().is_dir() {
            fs::remove_dir_all(self.path())
        } else {
            fs::remove_file(self.path())
        };
        result.map_err(|e| Error::io_error(&self.root, e))
    }

    fn with_root(&self, root: &str, is_dir: bool) -> Box<dyn Backend> {
        Box::new(LocalBackend::new(self.account.with_root(root), is_dir))
    }

    fn boxed(&self) -> Box<dyn Backend> {
        Box::new(self.clone())
    }
}

/// Fixed-size chunk reads over an open file.
struct FileChunks {
    file: File,
    path: String,
    done: bool,
}

impl Iterator for FileChunks {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buf = vec![0u8; CHUNK_SIZE];
        match self.file.read(&mut buf) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(n) => {
                buf.truncate(n);
                Some(Ok(buf.into()))
            }
            Err(err) => {
                self.done = true;
                Some(Err(Error::io_error(&self.path, err)))
            }
        }
    }
}

/// Buffering sink writing straight to the destination path.
///
/// Bytes count as committed once handed to the OS; the engine removes
/// the destination on cancellation, so no temporary-and-rename dance is
/// needed here.
struct LocalSink {
    file: Option<File>,
    path: String,
    buf: Vec<u8>,
}

impl LocalSink {
    fn flush_buf(&mut self) -> Result<u64> {
        let Some(file) = self.file.as_mut() else {
            return Ok(0);
        };
        if self.buf.is_empty() {
            return Ok(0);
        }
        file.write_all(&self.buf)
            .map_err(|e| Error::io_error(&self.path, e))?;
        let written = self.buf.len() as u64;
        self.buf.clear();
        Ok(written)
    }
}

impl Sink for LocalSink {
    fn write(&mut self, chunk: &[u8]) -> Result<u64> {
        if self.file.is_none() {
            return Err(Error::new(ErrorKind::Other, &self.path));
        }
        self.buf.extend_from_slice(chunk);
        if self.buf.len() >= SINK_BUFFER_SIZE {
            self.flush_buf()
        } else {
            Ok(0)
        }
    }

    fn finalize(&mut self) -> Result<u64> {
        let written = self.flush_buf()?;
        if let Some(file) = self.file.take() {
            file.sync_all().map_err(|e| Error::io_error(&self.path, e))?;
        }
        Ok(written)
    }
}
