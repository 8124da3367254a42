// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Calendar arithmetic in the admin's timezone. Every function takes "now"
//! and the timezone explicitly; nothing here reads the system clock.

use chrono::{DateTime, Days, NaiveDate};
use chrono_tz::Tz;

const YMD_LEN: usize = 10;

/// Calendar date of the instant `now_ms` as seen in `tz`.
pub(crate) fn today_in(now_ms: i64, tz: Tz) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(now_ms).map(|utc| utc.with_timezone(&tz).date_naive())
}

/// Moves `date` by `delta` calendar days. `None` past chrono's date range.
pub(crate) fn shift_days(date: NaiveDate, delta: i64) -> Option<NaiveDate> {
    let magnitude = Days::new(delta.unsigned_abs());
    if delta >= 0 {
        date.checked_add_days(magnitude)
    } else {
        date.checked_sub_days(magnitude)
    }
}

/// Number of calendar days in `[start, end]`, counting both ends.
/// Returns 1 for a single day and is only meaningful for `start <= end`.
pub fn days_between_inclusive(start: NaiveDate, end: NaiveDate) -> i64 {
    (end - start).num_days() + 1
}

/// Strict `YYYY-MM-DD` parser: zero-padded, ASCII digits only, and a real
/// calendar date. chrono alone would also accept `2025-3-1`.
pub(crate) fn parse_ymd(raw: &str) -> Option<NaiveDate> {
    let bytes = raw.as_bytes();
    if bytes.len() != YMD_LEN {
        return None;
    }
    let shape_ok = bytes.iter().enumerate().all(|(i, b)| match i {
        4 | 7 => *b == b'-',
        _ => b.is_ascii_digit(),
    });
    if !shape_ok {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}
