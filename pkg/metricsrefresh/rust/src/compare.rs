// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! "Vs previous period" windows.
//!
//! Calendar ranges compare against the equal-length window that ends the day
//! before the primary window starts. Sub-day ranges (`1h`, `live`) are
//! compared server-side; the payload echoes the window back and we only
//! label it.

use chrono::DateTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dates::shift_days;
use crate::range_key::{DateBounds, RangeKey, RangeKind, bounds_for};

const SAME_DAY_TIME_FORMAT: &str = "%H:%M";
const CROSS_DAY_TIME_FORMAT: &str = "%b %-d %H:%M";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompareKind {
    FixedDay,
    RollingWindow,
}

impl CompareKind {
    /// `None` for sub-day ranges, which have no calendar comparison.
    pub fn for_range(kind: RangeKind) -> Option<Self> {
        match kind {
            RangeKind::SubDay => None,
            RangeKind::FixedDay => Some(CompareKind::FixedDay),
            RangeKind::RollingWindow => Some(CompareKind::RollingWindow),
        }
    }
}

/// Baseline window for a primary range. `range_key` can itself be used as a
/// fetch key when the comparison's own breakdown is needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparePeriod {
    pub range_key: RangeKey,
    pub bounds: DateBounds,
    pub kind: CompareKind,
}

/// Derives the comparison window for `bounds`: same number of days, ending
/// the calendar day before `bounds.start`. Only the day count matters; the
/// range's name never does.
///
/// Returns `None` only when the window would fall before chrono's minimum
/// date.
pub fn compare_for(bounds: &DateBounds, kind: CompareKind) -> Option<ComparePeriod> {
    let length_days = bounds.len_days();
    let compare_end = shift_days(bounds.start, -1)?;
    let compare_start = shift_days(compare_end, -(length_days - 1))?;
    let compare_bounds = DateBounds::new(compare_start, compare_end);

    Some(ComparePeriod {
        range_key: RangeKey::for_bounds(&compare_bounds),
        bounds: compare_bounds,
        kind,
    })
}

/// Resolves `key` in `tz` as of `now_ms` and derives its comparison window.
/// `None` for `1h`/`live`; see [`SubDayCompare`] for those.
pub fn compare_for_range(key: &RangeKey, now_ms: i64, tz: Tz) -> Option<ComparePeriod> {
    let kind = CompareKind::for_range(key.kind())?;
    let bounds = bounds_for(key, now_ms, tz)?;
    compare_for(&bounds, kind)
}

/// Server-reported comparison window for sub-day ranges, read from the
/// `compare` object of a metrics payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubDayCompare {
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
    pub label: String,
}

impl SubDayCompare {
    /// Echoes the server's compare window. A label sent by the server wins;
    /// otherwise one is formatted from `start_ms`/`end_ms` in `tz`. `None`
    /// when the payload carries neither.
    pub fn from_payload(payload: &Value, tz: Tz) -> Option<Self> {
        let compare = payload.get("compare")?;
        let start_ms = compare.get("start_ms").and_then(Value::as_i64);
        let end_ms = compare.get("end_ms").and_then(Value::as_i64);

        let server_label = compare
            .get("label")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string);

        let label = match server_label {
            Some(label) => label,
            None => interval_label(start_ms?, end_ms?, tz)?,
        };

        Some(Self {
            start_ms,
            end_ms,
            label,
        })
    }
}

fn interval_label(start_ms: i64, end_ms: i64, tz: Tz) -> Option<String> {
    let start = DateTime::from_timestamp_millis(start_ms)?.with_timezone(&tz);
    let end = DateTime::from_timestamp_millis(end_ms)?.with_timezone(&tz);
    let same_day = start.date_naive() == end.date_naive();
    let format = if same_day {
        SAME_DAY_TIME_FORMAT
    } else {
        CROSS_DAY_TIME_FORMAT
    };
    Some(format!("{} - {}", start.format(format), end.format(format)))
}
