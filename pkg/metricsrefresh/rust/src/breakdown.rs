// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Top-N + "Other" grouping for attribution and finish breakdowns.

use serde::{Deserialize, Serialize};

pub const DEFAULT_TOP_N: usize = 5;
pub const OTHER_LABEL: &str = "Other";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownSlice {
    pub label: String,
    pub value: f64,
    /// Fraction of the total, 0 when the total is 0.
    pub share: f64,
    /// Number of source rows folded into this slice.
    pub rows: usize,
}

/// Keeps the `top_n` largest rows (value desc, then label asc) and folds the
/// rest into a single [`OTHER_LABEL`] slice. Negative and non-finite values
/// are dropped. The "Other" slice only appears when it folds something.
pub fn group_top_n(
    rows: impl IntoIterator<Item = (String, f64)>,
    top_n: usize,
) -> Vec<BreakdownSlice> {
    let mut rows: Vec<(String, f64)> = rows
        .into_iter()
        .filter(|(_, v)| v.is_finite() && *v >= 0.0)
        .collect();
    rows.sort_by(|(la, va), (lb, vb)| vb.total_cmp(va).then_with(|| la.cmp(lb)));

    let total: f64 = rows.iter().map(|(_, v)| v).sum();
    let share = |value: f64| if total > 0.0 { value / total } else { 0.0 };

    let folded = rows.split_off(top_n.min(rows.len()));
    let mut slices: Vec<BreakdownSlice> = rows
        .into_iter()
        .map(|(label, value)| BreakdownSlice {
            label,
            value,
            share: share(value),
            rows: 1,
        })
        .collect();

    if !folded.is_empty() {
        let value: f64 = folded.iter().map(|(_, v)| v).sum();
        slices.push(BreakdownSlice {
            label: OTHER_LABEL.to_string(),
            value,
            share: share(value),
            rows: folded.len(),
        });
    }
    slices
}
