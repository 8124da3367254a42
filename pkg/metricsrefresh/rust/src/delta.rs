// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! KPI delta classification (current vs baseline).

use serde::{Deserialize, Serialize};

/// Relative change below which a KPI shows as flat. Short windows such as
/// `today` or `1h` jitter by a few percent between polls.
pub const DEFAULT_DEADBAND_RATIO: f64 = 0.05;

/// Same idea for rate metrics (conversion rate, refund rate...), in
/// percentage points.
pub const DEFAULT_DEADBAND_POINTS: f64 = 5.0;

const NO_DATA_TEXT: &str = "—";
const NEW_TEXT: &str = "new";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Up,
    Down,
    Flat,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaResult {
    /// True relative change, `None` when it cannot be computed.
    pub ratio: Option<f64>,
    pub tone: Tone,
    /// Baseline was exactly zero and current is not.
    pub is_new: bool,
    pub display_text: String,
}

impl DeltaResult {
    fn no_data() -> Self {
        Self {
            ratio: None,
            tone: Tone::None,
            is_new: false,
            display_text: NO_DATA_TEXT.to_string(),
        }
    }
}

/// [`classify_with_deadband`] with [`DEFAULT_DEADBAND_RATIO`].
pub fn classify(current: Option<f64>, baseline: Option<f64>, invert: bool) -> DeltaResult {
    classify_with_deadband(current, baseline, invert, DEFAULT_DEADBAND_RATIO)
}

/// Classifies the change from `baseline` to `current`.
///
/// `invert` is for metrics where lower is better (bounce rate, refunds): it
/// flips the tone only. `display_text` always shows the true signed change.
pub fn classify_with_deadband(
    current: Option<f64>,
    baseline: Option<f64>,
    invert: bool,
    deadband_ratio: f64,
) -> DeltaResult {
    let (Some(current), Some(baseline)) = (finite(current), finite(baseline)) else {
        return DeltaResult::no_data();
    };

    if baseline == 0.0 {
        if current == 0.0 {
            return DeltaResult::no_data();
        }
        return DeltaResult {
            ratio: None,
            tone: Tone::Up,
            is_new: true,
            display_text: NEW_TEXT.to_string(),
        };
    }

    let ratio = (current - baseline) / baseline.abs();
    DeltaResult {
        ratio: Some(ratio),
        tone: tone_for(ratio, invert, deadband_ratio),
        is_new: false,
        display_text: format!("{:+.1}%", ratio * 100.0),
    }
}

/// Percentage-point delta for metrics that are already percentages, with
/// [`DEFAULT_DEADBAND_POINTS`]. `ratio` carries the point difference as a
/// fraction (2.5 pp -> 0.025). A zero baseline is an ordinary value here.
pub fn classify_points(
    current_pct: Option<f64>,
    baseline_pct: Option<f64>,
    invert: bool,
) -> DeltaResult {
    classify_points_with_deadband(current_pct, baseline_pct, invert, DEFAULT_DEADBAND_POINTS)
}

pub fn classify_points_with_deadband(
    current_pct: Option<f64>,
    baseline_pct: Option<f64>,
    invert: bool,
    deadband_points: f64,
) -> DeltaResult {
    let (Some(current), Some(baseline)) = (finite(current_pct), finite(baseline_pct)) else {
        return DeltaResult::no_data();
    };

    let points = current - baseline;
    DeltaResult {
        ratio: Some(points / 100.0),
        tone: tone_for(points, invert, deadband_points),
        is_new: false,
        display_text: format!("{points:+.1} pp"),
    }
}

fn tone_for(change: f64, invert: bool, deadband: f64) -> Tone {
    let adjusted = if invert { -change } else { change };
    if adjusted > deadband {
        Tone::Up
    } else if adjusted < -deadband {
        Tone::Down
    } else {
        Tone::Flat
    }
}

fn finite(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite())
}
