// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result, ensure};
use chrono_tz::Tz;
use log::{debug, warn};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::breakdown::DEFAULT_TOP_N;
use crate::delta::{DEFAULT_DEADBAND_POINTS, DEFAULT_DEADBAND_RATIO};
use crate::range_key::{RangeKey, normalize};
use crate::table::{SortState, TableState};

const DEFAULT_CONFIG_PATH: &str = "/etc/datadog-agent/metrics-refresh.yaml";
const CONFIG_PATH_ENV: &str = "DD_METRICS_REFRESH_CONFIG";
const TIMEZONE_ENV: &str = "DD_METRICS_REFRESH_TIMEZONE";
const DEFAULT_RANGE_ENV: &str = "DD_METRICS_REFRESH_DEFAULT_RANGE";

const FALLBACK_RANGE: RangeKey = RangeKey::Last7Days;

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_range() -> String {
    FALLBACK_RANGE.to_string()
}

fn default_deadband_ratio() -> f64 {
    DEFAULT_DEADBAND_RATIO
}

fn default_deadband_points() -> f64 {
    DEFAULT_DEADBAND_POINTS
}

fn default_top_n() -> usize {
    DEFAULT_TOP_N
}

fn default_page_size() -> usize {
    25
}

fn default_kpi_secs() -> u64 {
    60
}

fn default_series_secs() -> u64 {
    120
}

fn default_breakdown_secs() -> u64 {
    300
}

fn default_live_secs() -> u64 {
    15
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RefreshConfig {
    /// IANA name of the admin timezone.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Range used when the UI sends something unparsable.
    #[serde(default = "default_range")]
    pub default_range: String,
    #[serde(default = "default_deadband_ratio")]
    pub deadband_ratio: f64,
    #[serde(default = "default_deadband_points")]
    pub deadband_points: f64,
    #[serde(default = "default_top_n")]
    pub breakdown_top_n: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub ttl: TtlConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TtlConfig {
    #[serde(default = "default_kpi_secs")]
    pub kpi_secs: u64,
    #[serde(default = "default_series_secs")]
    pub series_secs: u64,
    #[serde(default = "default_breakdown_secs")]
    pub breakdown_secs: u64,
    #[serde(default = "default_kpi_secs")]
    pub mini_card_secs: u64,
    #[serde(default = "default_live_secs")]
    pub live_secs: u64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            kpi_secs: default_kpi_secs(),
            series_secs: default_series_secs(),
            breakdown_secs: default_breakdown_secs(),
            mini_card_secs: default_kpi_secs(),
            live_secs: default_live_secs(),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            default_range: default_range(),
            deadband_ratio: default_deadband_ratio(),
            deadband_points: default_deadband_points(),
            breakdown_top_n: default_top_n(),
            page_size: default_page_size(),
            ttl: TtlConfig::default(),
        }
    }
}

/// What a cached payload feeds; each kind has its own TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Kpi,
    Series,
    Breakdown,
    MiniCard,
    /// Anything fetched for `1h`/`live`, whatever the widget.
    Live,
}

impl RefreshConfig {
    /// Admin timezone. Unknown names fall back to UTC.
    pub fn tz(&self) -> Tz {
        match self.timezone.parse::<Tz>() {
            Ok(tz) => tz,
            Err(e) => {
                warn!("unknown timezone {:?}, using UTC: {e}", self.timezone);
                Tz::UTC
            }
        }
    }

    pub fn fallback_range(&self) -> RangeKey {
        normalize(&self.default_range, FALLBACK_RANGE)
    }

    pub fn ttl_for(&self, kind: PayloadKind) -> Duration {
        let secs = match kind {
            PayloadKind::Kpi => self.ttl.kpi_secs,
            PayloadKind::Series => self.ttl.series_secs,
            PayloadKind::Breakdown => self.ttl.breakdown_secs,
            PayloadKind::MiniCard => self.ttl.mini_card_secs,
            PayloadKind::Live => self.ttl.live_secs,
        };
        Duration::from_secs(secs)
    }

    /// Fresh table state sorted by `sort`, paged with the configured size.
    pub fn table_state(&self, sort: SortState) -> TableState {
        TableState::new(sort, self.page_size)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(tz) = std::env::var(TIMEZONE_ENV) {
            debug!("timezone overridden by {TIMEZONE_ENV}: {tz}");
            self.timezone = tz;
        }
        if let Ok(range) = std::env::var(DEFAULT_RANGE_ENV) {
            debug!("default range overridden by {DEFAULT_RANGE_ENV}: {range}");
            self.default_range = range;
        }
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.deadband_ratio.is_finite() && self.deadband_ratio >= 0.0,
            "deadband_ratio must be a non-negative number, got {}",
            self.deadband_ratio
        );
        ensure!(
            self.deadband_points.is_finite() && self.deadband_points >= 0.0,
            "deadband_points must be a non-negative number, got {}",
            self.deadband_points
        );
        ensure!(self.page_size > 0, "page_size must be greater than 0");
        Ok(())
    }
}

pub fn config_path() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Loads the config at `path`, then applies environment overrides.
/// A missing file yields the defaults; an unreadable or invalid one is an
/// error.
pub fn load_config(path: &Path) -> Result<RefreshConfig> {
    let mut config = if path.exists() {
        parse_config(path)?
    } else {
        warn!(
            "config file not found at {}, using defaults",
            path.display()
        );
        RefreshConfig::default()
    };
    config.apply_env_overrides();
    config
        .validate()
        .with_context(|| format!("validating {}", path.display()))?;
    Ok(config)
}

fn parse_config(path: &Path) -> Result<RefreshConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    if contents.trim().is_empty() {
        return Ok(RefreshConfig::default());
    }
    let config: RefreshConfig =
        serde_yaml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
    Ok(config)
}
