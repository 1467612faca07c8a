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

//! Generally useful functions.

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Render a byte count for humans: `"3.21 MB"`, `"512 bytes"`.
///
/// Exact powers of 1024 stay in the smaller unit: 1024 is
/// `"1024 bytes"`, not `"1.00 KB"`.
pub fn bytes_to_human(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if size > GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size > MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size > KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else if size < 1 {
        "<1 bytes".to_owned()
    } else {
        format!("{size} bytes")
    }
}

/// The current time as an RFC 3339 string, as stored in timestamp columns.
pub fn iso_now() -> String {
    to_iso(OffsetDateTime::now_utc())
}

/// Render a timestamp the way the store records it.
pub fn to_iso(when: OffsetDateTime) -> String {
    // Rfc3339 formatting of a UTC timestamp cannot fail.
    when.format(&Rfc3339).expect("format RFC 3339 timestamp")
}

/// Parse a stored timestamp; empty strings mean unset.
pub fn from_iso(text: &str) -> Option<OffsetDateTime> {
    if text.is_empty() {
        return None;
    }
    OffsetDateTime::parse(text, &Rfc3339).ok()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bytes_to_human_scales() {
        assert_eq!(bytes_to_human(0), "<1 bytes");
        assert_eq!(bytes_to_human(999), "999 bytes");
        assert_eq!(bytes_to_human(2048), "2.00 KB");
        assert_eq!(bytes_to_human(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(bytes_to_human(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn bytes_to_human_boundaries_stay_in_the_smaller_unit() {
        assert_eq!(bytes_to_human(1024), "1024 bytes");
        assert_eq!(bytes_to_human(1025), "1.00 KB");
        assert_eq!(bytes_to_human(1024 * 1024), "1024.00 KB");
        assert_eq!(bytes_to_human(1024 * 1024 * 1024), "1024.00 MB");
    }

    #[test]
    fn iso_round_trip() {
        let now = OffsetDateTime::now_utc();
        let text = to_iso(now);
        let back = from_iso(&text).unwrap();
        assert_eq!(back.unix_timestamp(), now.unix_timestamp());
    }

    #[test]
    fn empty_timestamp_is_unset() {
        assert!(from_iso("").is_none());
        assert!(from_iso("not a timestamp").is_none());
    }
}
