// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Dashboard-level orchestration on top of [`FetchCache`]: per-widget
//! degradation to stale data, "refresh all" joins, and widget loading.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use futures::future::{BoxFuture, FutureExt, join_all};
use log::{debug, warn};
use serde::Serialize;
use serde_json::Value;

use crate::breakdown::{BreakdownSlice, group_top_n};
use crate::cache::{CacheKey, FetchCache, GetOptions};
use crate::clock::Clock;
use crate::compare::{ComparePeriod, SubDayCompare, compare_for_range};
use crate::config::{PayloadKind, RefreshConfig};
use crate::delta::{DeltaResult, classify_points_with_deadband, classify_with_deadband};
use crate::errors::FetchError;
use crate::range_key::{DateBounds, RangeKey, RangeKind, bounds_for, normalize};

/// Report name used for headline KPI payloads.
pub const KPI_REPORT: &str = "kpi";
/// Object of a sub-day payload holding the server-computed baseline.
const COMPARE_FIELD: &str = "compare";
/// Cache-key dimension and source parameter carrying the admin timezone.
const TZ_DIMENSION: &str = "tz";

/// What a widget has to show after a refresh.
#[derive(Debug, Clone, PartialEq)]
pub enum WidgetData<T> {
    Fresh(T),
    /// The refresh failed; this is the last value that loaded.
    Stale {
        value: T,
        fetched_at_ms: i64,
        error: FetchError,
    },
    /// The refresh failed and nothing was ever loaded for this key.
    Failed(FetchError),
}

impl<T> WidgetData<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            WidgetData::Fresh(value) | WidgetData::Stale { value, .. } => Some(value),
            WidgetData::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&FetchError> {
        match self {
            WidgetData::Fresh(_) => None,
            WidgetData::Stale { error, .. } | WidgetData::Failed(error) => Some(error),
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, WidgetData::Stale { .. })
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> WidgetData<U> {
        match self {
            WidgetData::Fresh(value) => WidgetData::Fresh(f(value)),
            WidgetData::Stale {
                value,
                fetched_at_ms,
                error,
            } => WidgetData::Stale {
                value: f(value),
                fetched_at_ms,
                error,
            },
            WidgetData::Failed(error) => WidgetData::Failed(error),
        }
    }
}

/// [`FetchCache::get`], falling back to the last cached value for `key` when
/// the fetch fails.
pub async fn get_or_stale<T, F, Fut>(
    cache: &FetchCache<T>,
    key: &str,
    ttl: Duration,
    fetcher: F,
    opts: GetOptions,
) -> WidgetData<T>
where
    T: Clone + Send + Sync + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    match cache.get(key, ttl, fetcher, opts).await {
        Ok(value) => WidgetData::Fresh(value),
        Err(error) => match cache.peek(key) {
            Some(entry) => {
                debug!("serving stale {key} fetched at {}", entry.fetched_at_ms);
                WidgetData::Stale {
                    value: entry.value,
                    fetched_at_ms: entry.fetched_at_ms,
                    error,
                }
            }
            None => WidgetData::Failed(error),
        },
    }
}

pub type BoxFetcher<T> = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<T>> + Send>;

/// One widget's share of a "refresh all".
pub struct RefreshJob<T> {
    pub key: String,
    pub ttl: Duration,
    pub fetcher: BoxFetcher<T>,
}

impl<T: 'static> RefreshJob<T> {
    pub fn new<F, Fut>(key: impl Into<String>, ttl: Duration, fetcher: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            key: key.into(),
            ttl,
            fetcher: Box::new(move || fetcher().boxed()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinPolicy {
    /// Any failed job fails the whole refresh.
    AllSucceed,
    /// Every job reports its own outcome; one failure never hides the rest.
    BestEffort,
}

/// Runs every job through the cache concurrently and joins the results, in
/// job order. Under [`JoinPolicy::AllSucceed`] the first failure (in job
/// order) is returned instead.
pub async fn refresh_all<T>(
    cache: &FetchCache<T>,
    jobs: Vec<RefreshJob<T>>,
    opts: GetOptions,
    policy: JoinPolicy,
) -> Result<Vec<(String, WidgetData<T>)>, FetchError>
where
    T: Clone + Send + Sync + 'static,
{
    let pending = jobs.into_iter().map(|job| async move {
        let data = get_or_stale(cache, &job.key, job.ttl, job.fetcher, opts).await;
        (job.key, data)
    });
    let results = join_all(pending).await;

    let failures = results.iter().filter(|(_, d)| d.error().is_some()).count();
    if failures > 0 {
        warn!("refresh completed with {failures}/{} failed jobs", results.len());
    }

    if policy == JoinPolicy::AllSucceed
        && let Some(error) = results.iter().find_map(|(_, d)| d.error())
    {
        return Err(error.clone());
    }
    Ok(results)
}

/// Server side of the dashboard: returns the JSON payload of `report` for
/// `range`. Implementations bound their own I/O (see
/// [`crate::cache::with_timeout`]).
pub trait MetricSource: Send + Sync + 'static {
    fn fetch(
        &self,
        report: &str,
        range: &RangeKey,
        params: &BTreeMap<String, String>,
    ) -> BoxFuture<'static, anyhow::Result<Value>>;
}

/// A KPI tile to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KpiSpec {
    pub name: String,
    /// Dotted path of the value inside the payload, e.g. `totals.revenue`.
    pub path: String,
    /// Lower is better (refunds, bounce rate).
    pub invert: bool,
    /// The value is a percentage; compare in percentage points.
    pub points: bool,
}

impl KpiSpec {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            path: name.clone(),
            name,
            invert: false,
            points: false,
        }
    }

    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn inverted(mut self) -> Self {
        self.invert = true;
        self
    }

    pub fn in_points(mut self) -> Self {
        self.points = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiTile {
    pub name: String,
    pub current: Option<f64>,
    pub baseline: Option<f64>,
    pub delta: DeltaResult,
    /// Current value comes from an earlier successful load.
    pub stale: bool,
    /// Why the tile could not be refreshed, if it could not.
    pub error: Option<String>,
    /// Why the comparison payload could not be refreshed, if it could not.
    pub baseline_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiBoard {
    pub range: RangeKey,
    pub bounds: Option<DateBounds>,
    pub compare: Option<ComparePeriod>,
    pub compare_label: Option<String>,
    pub tiles: Vec<KpiTile>,
}

/// A raw range resolved against the loader's clock and timezone.
struct Resolved {
    range: RangeKey,
    bounds: Option<DateBounds>,
    /// What is fetched and cached: the concrete `d:`/`r:` window for
    /// calendar ranges, the range itself for sub-day ones.
    window: RangeKey,
    now_ms: i64,
    tz: Tz,
}

/// Loads a shop's dashboard widgets through the shared cache: KPI boards
/// (current and baseline payloads, one delta per KPI), breakdowns and raw
/// report payloads.
pub struct KpiLoader<S> {
    source: Arc<S>,
    cache: Arc<FetchCache<Value>>,
    clock: Arc<dyn Clock>,
    config: RefreshConfig,
    shop: String,
    dimensions: BTreeMap<String, String>,
}

impl<S: MetricSource> KpiLoader<S> {
    pub fn new(
        source: Arc<S>,
        cache: Arc<FetchCache<Value>>,
        clock: impl Clock,
        config: RefreshConfig,
        shop: impl Into<String>,
    ) -> Self {
        Self {
            source,
            cache,
            clock: Arc::new(clock),
            config,
            shop: shop.into(),
            dimensions: BTreeMap::new(),
        }
    }

    /// Adds a payload-affecting dimension (e.g. the profit-rule
    /// fingerprint). It is folded into every cache key and sent to the
    /// source.
    pub fn with_dimension(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.dimensions.insert(name.into(), value.into());
        self
    }

    /// Cache key of `report` for a resolved `window`. The admin timezone is
    /// always part of the key since it decides what a window contains.
    pub fn cache_key(&self, report: &str, window: &RangeKey) -> String {
        self.dimensions
            .iter()
            .fold(
                CacheKey::new(report).range(window).shop(self.shop.as_str()),
                |key, (name, value)| key.dim(name.as_str(), value.as_str()),
            )
            .dim(TZ_DIMENSION, self.config.tz().name())
            .build()
    }

    fn resolve(&self, raw_range: &str) -> Resolved {
        let range = normalize(raw_range, self.config.fallback_range());
        let tz = self.config.tz();
        let now_ms = self.clock.now_ms();
        let bounds = bounds_for(&range, now_ms, tz);
        let window = bounds.as_ref().map_or(range, RangeKey::for_bounds);
        Resolved {
            range,
            bounds,
            window,
            now_ms,
            tz,
        }
    }

    pub async fn load(&self, raw_range: &str, kpis: &[KpiSpec], opts: GetOptions) -> KpiBoard {
        let Resolved {
            range,
            bounds,
            window,
            now_ms,
            tz,
        } = self.resolve(raw_range);

        if range.kind() == RangeKind::SubDay {
            let current = self
                .fetch_payload(KPI_REPORT, &window, None, PayloadKind::Live, opts)
                .await;
            let compare_label = current
                .value()
                .and_then(|payload| SubDayCompare::from_payload(payload, tz))
                .map(|c| c.label);
            let tiles = kpis
                .iter()
                .map(|kpi| {
                    let baseline_path = format!("{COMPARE_FIELD}.{}", kpi.path);
                    self.tile(kpi, &current, current.value(), None, &baseline_path)
                })
                .collect();
            return KpiBoard {
                range,
                bounds,
                compare: None,
                compare_label,
                tiles,
            };
        }

        let compare = compare_for_range(&range, now_ms, tz);
        let current = self.fetch_payload(KPI_REPORT, &window, bounds, PayloadKind::Kpi, opts);
        let baseline = async {
            match &compare {
                Some(period) => Some(
                    self.fetch_payload(
                        KPI_REPORT,
                        &period.range_key,
                        Some(period.bounds),
                        PayloadKind::Kpi,
                        opts,
                    )
                    .await,
                ),
                None => None,
            }
        };
        let (current, baseline) = futures::join!(current, baseline);
        let baseline_payload = baseline.as_ref().and_then(WidgetData::value);
        let baseline_error = baseline.as_ref().and_then(WidgetData::error);

        let tiles = kpis
            .iter()
            .map(|kpi| self.tile(kpi, &current, baseline_payload, baseline_error, &kpi.path))
            .collect();
        KpiBoard {
            range,
            bounds,
            compare_label: compare.as_ref().map(|c| c.range_key.label()),
            compare,
            tiles,
        }
    }

    /// Payload of `report` for a raw range, cached with the TTL of `kind`.
    /// Sub-day ranges always use the live TTL.
    pub async fn load_report(
        &self,
        report: &str,
        raw_range: &str,
        kind: PayloadKind,
        opts: GetOptions,
    ) -> WidgetData<Value> {
        let resolved = self.resolve(raw_range);
        let kind = if resolved.range.kind() == RangeKind::SubDay {
            PayloadKind::Live
        } else {
            kind
        };
        self.fetch_payload(report, &resolved.window, resolved.bounds, kind, opts)
            .await
    }

    /// Breakdown widget: the rows at `path` of `report`, grouped into the
    /// configured top-N plus "Other".
    pub async fn load_breakdown(
        &self,
        report: &str,
        raw_range: &str,
        path: &str,
        opts: GetOptions,
    ) -> WidgetData<Vec<BreakdownSlice>> {
        let top_n = self.config.breakdown_top_n;
        self.load_report(report, raw_range, PayloadKind::Breakdown, opts)
            .await
            .map(|payload| group_top_n(breakdown_rows(&payload, path), top_n))
    }

    fn tile(
        &self,
        kpi: &KpiSpec,
        current: &WidgetData<Value>,
        baseline_payload: Option<&Value>,
        baseline_error: Option<&FetchError>,
        baseline_path: &str,
    ) -> KpiTile {
        let current_value = current.value().and_then(|p| extract_metric(p, &kpi.path));
        let baseline_value = baseline_payload.and_then(|p| extract_metric(p, baseline_path));
        let delta = if kpi.points {
            classify_points_with_deadband(
                current_value,
                baseline_value,
                kpi.invert,
                self.config.deadband_points,
            )
        } else {
            classify_with_deadband(
                current_value,
                baseline_value,
                kpi.invert,
                self.config.deadband_ratio,
            )
        };
        KpiTile {
            name: kpi.name.clone(),
            current: current_value,
            baseline: baseline_value,
            delta,
            stale: current.is_stale(),
            error: current.error().map(ToString::to_string),
            baseline_error: baseline_error.map(ToString::to_string),
        }
    }

    async fn fetch_payload(
        &self,
        report: &str,
        window: &RangeKey,
        bounds: Option<DateBounds>,
        kind: PayloadKind,
        opts: GetOptions,
    ) -> WidgetData<Value> {
        let key = self.cache_key(report, window);
        let params = self.params(bounds);
        let source = Arc::clone(&self.source);
        let report = report.to_string();
        let window = *window;
        get_or_stale(
            &self.cache,
            &key,
            self.config.ttl_for(kind),
            move || source.fetch(&report, &window, &params),
            opts,
        )
        .await
    }

    fn params(&self, bounds: Option<DateBounds>) -> BTreeMap<String, String> {
        let mut params = self.dimensions.clone();
        params.insert("shop".to_string(), self.shop.clone());
        params.insert(TZ_DIMENSION.to_string(), self.config.tz().name().to_string());
        if let Some(bounds) = bounds {
            params.insert("start".to_string(), bounds.start_ymd());
            params.insert("end".to_string(), bounds.end_ymd());
        }
        params
    }
}

/// `(label, value)` rows of a breakdown payload. `path` points at either an
/// array of `{"label": .., "value": ..}` objects or an object of label to
/// value. Rows without a usable label or number are skipped.
pub fn breakdown_rows(payload: &Value, path: &str) -> Vec<(String, f64)> {
    let node = if path.is_empty() {
        Some(payload)
    } else {
        path.split('.').try_fold(payload, |node, part| node.get(part))
    };
    match node {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| {
                let label = item.get("label").and_then(Value::as_str)?;
                let value = extract_metric(item, "value")?;
                Some((label.to_string(), value))
            })
            .collect(),
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(label, value)| Some((label.clone(), as_number(value)?)))
            .collect(),
        _ => Vec::new(),
    }
}

/// Reads a number at a dotted `path` of `payload`. Numeric strings are
/// accepted since money amounts often arrive as decimal strings.
pub fn extract_metric(payload: &Value, path: &str) -> Option<f64> {
    let value = path
        .split('.')
        .try_fold(payload, |node, part| node.get(part))?;
    as_number(value)
}

fn as_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|v| v.is_finite())
}
