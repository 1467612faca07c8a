// Cumulus file transfer engine.
// Copyright 2024 Cumulus contributors.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! The kind of an entry observed in a backend listing.

use std::fs::FileType;

use serde::{Deserialize, Serialize};

/// Kind of entry a backend can list or transfer.
///
/// Object stores only have files and synthesized directories; local
/// filesystems can also yield entries Cumulus does not transfer, which
/// appear as `Unknown` and are dropped from listings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Ord, PartialOrd)]
pub enum Kind {
    File,
    Dir,
    Unknown,
}

impl From<FileType> for Kind {
    fn from(ft: FileType) -> Kind {
        if ft.is_file() {
            Kind::File
        } else if ft.is_dir() {
            Kind::Dir
        } else {
            Kind::Unknown
        }
    }
}
