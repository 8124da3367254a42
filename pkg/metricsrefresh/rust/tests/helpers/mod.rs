// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dd_metrics_refresh::{MetricSource, RangeKey};
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;

/// 2025-03-12T15:00:00Z
pub const NOW_MS: i64 = 1_741_791_600_000;

/// In-memory metrics backend keyed by range key string. Missing ranges fail
/// like a server error.
#[derive(Default)]
pub struct StubSource {
    payloads: Mutex<HashMap<String, Value>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl StubSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn serve(&self, range: &str, payload: Value) {
        self.payloads
            .lock()
            .unwrap()
            .insert(range.to_string(), payload);
    }

    pub fn fail(&self, range: &str) {
        self.payloads.lock().unwrap().remove(range);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MetricSource for StubSource {
    fn fetch(
        &self,
        report: &str,
        range: &RangeKey,
        _params: &BTreeMap<String, String>,
    ) -> BoxFuture<'static, anyhow::Result<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let payload = self
            .payloads
            .lock()
            .unwrap()
            .get(&range.to_string())
            .cloned();
        let delay = self.delay;
        let what = format!("{report} {range}");
        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            payload.ok_or_else(|| anyhow::anyhow!("HTTP 500 for {what}"))
        }
        .boxed()
    }
}

pub fn shared(source: StubSource) -> Arc<StubSource> {
    Arc::new(source)
}
