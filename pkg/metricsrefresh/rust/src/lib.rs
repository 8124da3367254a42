// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Data orchestration layer behind the e-commerce analytics dashboard.
//!
//! Resolves range keys into calendar bounds, derives comparison periods,
//! caches metric payloads with single-flight fetching, classifies KPI deltas
//! and sorts/paginates report tables. Rendering is left to the caller.

// Correctness
#![cfg_attr(not(test), deny(clippy::indexing_slicing))]
#![deny(clippy::string_slice)]
#![deny(clippy::cast_possible_wrap)]
#![deny(clippy::undocumented_unsafe_blocks)]
// Panicking code
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![deny(clippy::unimplemented)]
#![deny(clippy::todo)]
// Debug code that shouldn't be in production
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]

pub mod breakdown;
pub mod cache;
pub mod clock;
pub mod compare;
pub mod config;
mod dates;
pub mod delta;
mod errors;
pub mod range_key;
pub mod refresh;
pub mod render_gate;
pub mod table;

// Re-export the public API
pub use breakdown::{BreakdownSlice, group_top_n};
pub use cache::{CacheEntry, CacheKey, FetchCache, GetOptions, with_timeout};
pub use clock::{Clock, ManualClock, SystemClock};
pub use compare::{CompareKind, ComparePeriod, SubDayCompare, compare_for, compare_for_range};
pub use config::{PayloadKind, RefreshConfig, load_config};
pub use dates::days_between_inclusive;
pub use delta::{DeltaResult, Tone, classify, classify_points, classify_with_deadband};
pub use errors::{FetchError, RangeKeyError};
pub use range_key::{DateBounds, RangeKey, RangeKind, bounds_for, normalize};
pub use refresh::{
    JoinPolicy, KpiBoard, KpiLoader, KpiSpec, KpiTile, MetricSource, RefreshJob, WidgetData,
    breakdown_rows, extract_metric, get_or_stale, refresh_all,
};
pub use render_gate::{RenderGate, signature_of};
pub use table::{
    Column, PageItem, PageState, SortDir, SortState, SortValue, TableSpec, TableState,
    build_page_window, clamp_page, page_count, paginate,
};
