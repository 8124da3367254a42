// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use chrono_tz::Tz;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::dates::{parse_ymd, shift_days, today_in};
use crate::errors::RangeKeyError;

const DAY_PREFIX: &str = "d:";
const RANGE_PREFIX: &str = "r:";
const LABEL_DATE_FORMAT: &str = "%b %-d, %Y";

/// Canonical identifier of a reporting window.
///
/// The string form (`Display`/`FromStr`) is the wire and cache-key form:
/// `today`, `yesterday`, `1h`, `7d`, `14d`, `30d`, `live`, `d:YYYY-MM-DD` or
/// `r:YYYY-MM-DD:YYYY-MM-DD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RangeKey {
    Today,
    Yesterday,
    /// Rolling last hour.
    LastHour,
    Last7Days,
    Last14Days,
    Last30Days,
    /// Rolling "now".
    Live,
    /// Single custom calendar day.
    Day(NaiveDate),
    /// Custom inclusive day range. Always `start <= end`; build it with
    /// [`RangeKey::range`].
    Range { start: NaiveDate, end: NaiveDate },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeKind {
    /// No calendar bounds (`1h`, `live`).
    SubDay,
    /// Exactly one calendar day (`today`, `yesterday`, `d:`).
    FixedDay,
    /// Multi-day window (`7d`, `14d`, `30d`, `r:`).
    RollingWindow,
}

/// Inclusive calendar-day bounds in the admin timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateBounds {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateBounds {
    /// Builds bounds, swapping the dates if they arrive out of order.
    pub fn new(a: NaiveDate, b: NaiveDate) -> Self {
        if a <= b {
            Self { start: a, end: b }
        } else {
            Self { start: b, end: a }
        }
    }

    pub fn single(day: NaiveDate) -> Self {
        Self {
            start: day,
            end: day,
        }
    }

    pub fn start_ymd(&self) -> String {
        self.start.to_string()
    }

    pub fn end_ymd(&self) -> String {
        self.end.to_string()
    }

    pub fn len_days(&self) -> i64 {
        crate::dates::days_between_inclusive(self.start, self.end)
    }
}

impl RangeKey {
    /// Custom range with the swap law applied.
    pub fn range(a: NaiveDate, b: NaiveDate) -> Self {
        let bounds = DateBounds::new(a, b);
        RangeKey::Range {
            start: bounds.start,
            end: bounds.end,
        }
    }

    /// Key for explicit bounds: `d:` for a single day, `r:` otherwise.
    pub fn for_bounds(bounds: &DateBounds) -> Self {
        if bounds.start == bounds.end {
            RangeKey::Day(bounds.start)
        } else {
            RangeKey::range(bounds.start, bounds.end)
        }
    }

    pub fn kind(&self) -> RangeKind {
        match self {
            RangeKey::LastHour | RangeKey::Live => RangeKind::SubDay,
            RangeKey::Today | RangeKey::Yesterday | RangeKey::Day(_) => RangeKind::FixedDay,
            RangeKey::Last7Days
            | RangeKey::Last14Days
            | RangeKey::Last30Days
            | RangeKey::Range { .. } => RangeKind::RollingWindow,
        }
    }

    /// Human label echoed back to the range picker.
    pub fn label(&self) -> String {
        match self {
            RangeKey::Today => "Today".to_string(),
            RangeKey::Yesterday => "Yesterday".to_string(),
            RangeKey::LastHour => "Last hour".to_string(),
            RangeKey::Last7Days => "Last 7 days".to_string(),
            RangeKey::Last14Days => "Last 14 days".to_string(),
            RangeKey::Last30Days => "Last 30 days".to_string(),
            RangeKey::Live => "Live".to_string(),
            RangeKey::Day(day) => day.format(LABEL_DATE_FORMAT).to_string(),
            RangeKey::Range { start, end } => format!(
                "{} - {}",
                start.format(LABEL_DATE_FORMAT),
                end.format(LABEL_DATE_FORMAT)
            ),
        }
    }

    fn rolling_days(&self) -> Option<u64> {
        match self {
            RangeKey::Last7Days => Some(7),
            RangeKey::Last14Days => Some(14),
            RangeKey::Last30Days => Some(30),
            _ => None,
        }
    }
}

impl fmt::Display for RangeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeKey::Today => write!(f, "today"),
            RangeKey::Yesterday => write!(f, "yesterday"),
            RangeKey::LastHour => write!(f, "1h"),
            RangeKey::Last7Days => write!(f, "7d"),
            RangeKey::Last14Days => write!(f, "14d"),
            RangeKey::Last30Days => write!(f, "30d"),
            RangeKey::Live => write!(f, "live"),
            RangeKey::Day(day) => write!(f, "{DAY_PREFIX}{day}"),
            RangeKey::Range { start, end } => write!(f, "{RANGE_PREFIX}{start}:{end}"),
        }
    }
}

impl FromStr for RangeKey {
    type Err = RangeKeyError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let cleaned = raw.trim().to_ascii_lowercase();
        if cleaned.is_empty() {
            return Err(RangeKeyError::Empty);
        }

        let fixed = match cleaned.as_str() {
            "today" => Some(RangeKey::Today),
            "yesterday" => Some(RangeKey::Yesterday),
            "1h" => Some(RangeKey::LastHour),
            "7d" => Some(RangeKey::Last7Days),
            "14d" => Some(RangeKey::Last14Days),
            "30d" => Some(RangeKey::Last30Days),
            "live" => Some(RangeKey::Live),
            _ => None,
        };
        if let Some(key) = fixed {
            return Ok(key);
        }

        let date = |part: &str| {
            parse_ymd(part).ok_or_else(|| RangeKeyError::InvalidDate {
                raw: raw.to_string(),
                date: part.to_string(),
            })
        };

        if let Some(rest) = cleaned.strip_prefix(DAY_PREFIX) {
            return Ok(RangeKey::Day(date(rest)?));
        }
        if let Some(rest) = cleaned.strip_prefix(RANGE_PREFIX) {
            let Some((a, b)) = rest.split_once(':') else {
                return Err(RangeKeyError::Unrecognized {
                    raw: raw.to_string(),
                });
            };
            return Ok(RangeKey::range(date(a)?, date(b)?));
        }

        Err(RangeKeyError::Unrecognized {
            raw: raw.to_string(),
        })
    }
}

impl TryFrom<String> for RangeKey {
    type Error = RangeKeyError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<RangeKey> for String {
    fn from(key: RangeKey) -> Self {
        key.to_string()
    }
}

/// Resolves raw UI input into a range key, coercing anything outside the
/// grammar to `fallback`. Never fails.
pub fn normalize(raw: &str, fallback: RangeKey) -> RangeKey {
    match raw.parse::<RangeKey>() {
        Ok(key) => key,
        Err(e) => {
            debug!("range key coerced to {fallback}: {e}");
            fallback
        }
    }
}

/// Calendar bounds of `key` in `tz` as of `now_ms`.
///
/// Returns `None` for sub-day keys (`1h`, `live`); callers branch on
/// [`RangeKey::kind`] rather than assuming bounds exist. Also `None` if
/// `now_ms` is outside the representable date range.
pub fn bounds_for(key: &RangeKey, now_ms: i64, tz: Tz) -> Option<DateBounds> {
    match key {
        RangeKey::LastHour | RangeKey::Live => None,
        RangeKey::Day(day) => Some(DateBounds::single(*day)),
        RangeKey::Range { start, end } => Some(DateBounds::new(*start, *end)),
        RangeKey::Today => today_in(now_ms, tz).map(DateBounds::single),
        RangeKey::Yesterday => {
            let yesterday = shift_days(today_in(now_ms, tz)?, -1)?;
            Some(DateBounds::single(yesterday))
        }
        RangeKey::Last7Days | RangeKey::Last14Days | RangeKey::Last30Days => {
            let days = i64::try_from(key.rolling_days()?).ok()?;
            let today = today_in(now_ms, tz)?;
            let start = shift_days(today, -(days - 1))?;
            Some(DateBounds::new(start, today))
        }
    }
}
