// Cumulus file transfer engine.
// Copyright 2024, 2025 Cumulus contributors.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! Streaming write sinks and the bounded pipe between a backend's
//! background IO task and the worker draining it.
//!
//! A sink accepts chunks from a source download and reports how many
//! bytes each call actually committed to backend storage; buffered bytes
//! are reported by whichever later call flushes them. `finalize` flushes
//! everything, closes the sink, and is idempotent, so a cancelled worker
//! can finalize unconditionally before cleaning up the destination.

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender};

use crate::backend::Result;

/// Streaming write endpoint owned by a destination backend.
pub trait Sink: Send {
    /// Accept one chunk; returns the bytes committed downstream by this
    /// call, which may be zero while data is buffered.
    fn write(&mut self, chunk: &[u8]) -> Result<u64>;

    /// Flush buffered data and close. Returns the bytes committed by the
    /// flush. Safe to call more than once.
    fn finalize(&mut self) -> Result<u64>;
}

/// Bounded pipe carrying chunks (or a terminal error) from a producer
/// thread to a consumer iterator.
///
/// Backends that stream through a background task push into the sending
/// half; the consuming half yields chunks in order and surfaces the
/// producer's error on the fetch after it occurred. Dropping the sender
/// ends the stream.
pub(crate) fn chunk_pipe(depth: usize) -> (Sender<Result<Bytes>>, ChunkReader) {
    let (tx, rx) = bounded(depth);
    (tx, ChunkReader { rx })
}

pub(crate) struct ChunkReader {
    rx: Receiver<Result<Bytes>>,
}

impl Iterator for ChunkReader {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.recv().ok()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::{Error, ErrorKind};

    #[test]
    fn pipe_preserves_order_and_ends_on_drop() {
        let (tx, reader) = chunk_pipe(4);
        std::thread::spawn(move || {
            for chunk in [&b"one"[..], b"two", b"three"] {
                tx.send(Ok(Bytes::copy_from_slice(chunk))).unwrap();
            }
        });
        let got: Vec<Bytes> = reader.map(|c| c.unwrap()).collect();
        assert_eq!(got, vec!["one", "two", "three"]);
    }

    #[test]
    fn pipe_surfaces_producer_error() {
        let (tx, mut reader) = chunk_pipe(4);
        tx.send(Ok(Bytes::from_static(b"data"))).unwrap();
        tx.send(Err(Error::new(ErrorKind::Other, "obj"))).unwrap();
        drop(tx);
        assert!(reader.next().unwrap().is_ok());
        assert!(reader.next().unwrap().is_err());
        assert!(reader.next().is_none());
    }
}
