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

//! Predicates the enqueue pipeline applies to walked files.
//!
//! Filters compose by AND: a file must pass every filter to be
//! enqueued. Metadata cutoffs fail files whose backend did not report
//! the relevant timestamp.

use globset::{Glob, GlobMatcher};
use time::OffsetDateTime;

use crate::backend::Backend;
use crate::{Error, Result};

#[derive(Clone, Debug)]
pub enum Filter {
    /// Glob over the file name (not the whole path).
    Name(GlobMatcher),
    /// Case-insensitive extension match, without the dot.
    Extension(String),
    MinSize(u64),
    MaxSize(u64),
    ModifiedAfter(OffsetDateTime),
    ModifiedBefore(OffsetDateTime),
    CreatedAfter(OffsetDateTime),
    CreatedBefore(OffsetDateTime),
}

impl Filter {
    pub fn name(pattern: &str) -> Result<Filter> {
        let glob = Glob::new(pattern).map_err(|source| Error::InvalidFilter {
            pattern: pattern.to_owned(),
            source,
        })?;
        Ok(Filter::Name(glob.compile_matcher()))
    }

    pub fn extension(ext: &str) -> Filter {
        Filter::Extension(ext.trim_start_matches('.').to_ascii_lowercase())
    }

    pub fn matches(&self, entry: &dyn Backend) -> bool {
        match self {
            Filter::Name(matcher) => matcher.is_match(entry.name()),
            Filter::Extension(ext) => entry
                .name()
                .rsplit_once('.')
                .map(|(_, found)| found.eq_ignore_ascii_case(ext))
                .unwrap_or(false),
            Filter::MinSize(min) => entry.meta().size >= *min,
            Filter::MaxSize(max) => entry.meta().size <= *max,
            Filter::ModifiedAfter(cutoff) => {
                entry.meta().mtime.map(|t| t >= *cutoff).unwrap_or(false)
            }
            Filter::ModifiedBefore(cutoff) => {
                entry.meta().mtime.map(|t| t <= *cutoff).unwrap_or(false)
            }
            Filter::CreatedAfter(cutoff) => {
                entry.meta().ctime.map(|t| t >= *cutoff).unwrap_or(false)
            }
            Filter::CreatedBefore(cutoff) => {
                entry.meta().ctime.map(|t| t <= *cutoff).unwrap_or(false)
            }
        }
    }
}

/// True if `entry` passes every filter.
pub fn matches_all(filters: &[Filter], entry: &dyn Backend) -> bool {
    filters.iter().all(|filter| filter.matches(entry))
}
