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

//! What to do when a destination already exists.
//!
//! Policies are applied by a worker after it takes an item and before
//! any byte moves; when a policy says skip, nothing is written to the
//! destination backend at all.

use std::str::FromStr;

use md5::{Digest, Md5};
use strum_macros::{Display, EnumIter, EnumString};

use crate::backend::{basename, join, Backend};
use crate::{Error, Result};

/// Conflict policy tokens, as they appear in UIs and IPC.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum ConflictPolicy {
    /// Proceed without any existence check.
    Overwrite,
    /// Keep whatever is already there.
    Skip,
    /// Skip only if source and destination bytes hash identically.
    Hash,
    /// Skip only if the sizes match.
    Size,
    /// Skip unless the source is more recently modified.
    Newer,
    /// Write under a fresh `name (n).ext` style name.
    Rename,
}

impl Default for ConflictPolicy {
    fn default() -> ConflictPolicy {
        ConflictPolicy::Skip
    }
}

impl ConflictPolicy {
    /// Parse a UI/IPC token, mapping unknown words to a typed error.
    pub fn parse(word: &str) -> Result<ConflictPolicy> {
        ConflictPolicy::from_str(word).map_err(|_| Error::UnknownConflictPolicy {
            word: word.to_owned(),
        })
    }
}

/// The outcome of applying a policy to one transfer.
pub enum Resolution {
    /// Write to the original destination.
    Proceed,
    /// Leave the destination alone; the item completes as "Skipped".
    Skip,
    /// Write to a different destination on the same account.
    Redirect(Box<dyn Backend>),
}

/// Apply `policy` for a transfer of `source` onto `destination`.
pub fn resolve(
    policy: ConflictPolicy,
    source: &dyn Backend,
    destination: &dyn Backend,
) -> Result<Resolution> {
    if policy == ConflictPolicy::Overwrite {
        return Ok(Resolution::Proceed);
    }
    if !destination.exists()? {
        return Ok(Resolution::Proceed);
    }
    match policy {
        ConflictPolicy::Overwrite => unreachable!("handled above"),
        ConflictPolicy::Skip => Ok(Resolution::Skip),
        ConflictPolicy::Hash => {
            if stream_md5(source)? == stream_md5(destination)? {
                Ok(Resolution::Skip)
            } else {
                Ok(Resolution::Proceed)
            }
        }
        ConflictPolicy::Size => {
            let src = source.metadata()?;
            let dst = destination.metadata()?;
            if src.size == dst.size {
                Ok(Resolution::Skip)
            } else {
                Ok(Resolution::Proceed)
            }
        }
        ConflictPolicy::Newer => {
            let src = source.metadata()?;
            let dst = destination.metadata()?;
            match (src.mtime, dst.mtime) {
                (Some(src_mtime), Some(dst_mtime)) if src_mtime <= dst_mtime => {
                    Ok(Resolution::Skip)
                }
                // Missing times are inconclusive; copy.
                _ => Ok(Resolution::Proceed),
            }
        }
        ConflictPolicy::Rename => {
            for n in 1.. {
                let candidate = rename_root(destination, n);
                let renamed = destination.with_root(&candidate, false);
                if !renamed.exists()? {
                    return Ok(Resolution::Redirect(renamed));
                }
            }
            unreachable!("rename probe loop is unbounded")
        }
    }
}

/// MD5 of a backend object's content, streamed.
pub fn stream_md5(backend: &dyn Backend) -> Result<[u8; 16]> {
    let mut hasher = Md5::new();
    for chunk in backend.download()? {
        hasher.update(&chunk?);
    }
    Ok(hasher.finalize().into())
}

/// The n-th rename candidate: ` (n)` before the extension.
fn rename_root(destination: &dyn Backend, n: usize) -> String {
    let kind = destination.kind();
    let root = destination.root();
    let name = basename(kind, root);
    let renamed = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem} ({n}).{ext}"),
        _ => format!("{name} ({n})"),
    };
    let sep = kind.separator();
    match root.trim_end_matches(sep).rfind(sep) {
        Some(pos) => {
            let parent = &root[..pos];
            join(kind, parent, &renamed)
        }
        None => renamed,
    }
}
