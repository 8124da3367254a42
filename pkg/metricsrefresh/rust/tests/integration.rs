// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

mod helpers;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dd_metrics_refresh::{
    Column, FetchCache, GetOptions, JoinPolicy, KpiLoader, KpiSpec, ManualClock, PageItem,
    RangeKey, RefreshConfig, RefreshJob, RenderGate, SortDir, SortState, SortValue, TableSpec,
    Tone, WidgetData, bounds_for, classify, compare_for_range, group_top_n, refresh_all,
    signature_of,
};
use helpers::{NOW_MS, StubSource, shared};
use serde_json::{Value, json};

// ===========================================================================
// Group 1: Range resolution and comparison
// ===========================================================================

#[test]
fn test_custom_range_compares_to_preceding_window() {
    let key: RangeKey = "r:2025-03-10:2025-03-12".parse().unwrap();
    let compare = compare_for_range(&key, NOW_MS, chrono_tz::UTC).unwrap();
    assert_eq!(compare.range_key.to_string(), "r:2025-03-07:2025-03-09");
    assert_eq!(compare.bounds.len_days(), 3);
}

#[test]
fn test_named_range_comparisons() {
    let tz = chrono_tz::UTC;
    let cases = [
        ("today", "d:2025-03-11"),
        ("yesterday", "d:2025-03-10"),
        ("7d", "r:2025-02-27:2025-03-05"),
        ("30d", "r:2025-01-12:2025-02-10"),
    ];
    for (raw, expected) in cases {
        let key: RangeKey = raw.parse().unwrap();
        let compare = compare_for_range(&key, NOW_MS, tz).unwrap();
        assert_eq!(compare.range_key.to_string(), expected, "compare for {raw}");

        let primary = bounds_for(&key, NOW_MS, tz).unwrap();
        assert_eq!(compare.bounds.len_days(), primary.len_days());
    }

    assert!(compare_for_range(&RangeKey::LastHour, NOW_MS, tz).is_none());
    assert!(compare_for_range(&RangeKey::Live, NOW_MS, tz).is_none());
}

#[test]
fn test_today_depends_on_admin_timezone() {
    // 2025-03-10T03:30:00Z is still March 9 in New York.
    let now_ms = 1_741_577_400_000;
    let today_utc = bounds_for(&RangeKey::Today, now_ms, chrono_tz::UTC).unwrap();
    let today_ny = bounds_for(&RangeKey::Today, now_ms, chrono_tz::America::New_York).unwrap();
    assert_eq!(today_utc.start_ymd(), "2025-03-10");
    assert_eq!(today_ny.start_ymd(), "2025-03-09");
}

// ===========================================================================
// Group 2: Delta classification
// ===========================================================================

#[test]
fn test_revenue_delta() {
    let delta = classify(Some(300.0), Some(250.0), false);
    assert_eq!(delta.ratio, Some(0.2));
    assert_eq!(delta.tone, Tone::Up);
    assert_eq!(delta.display_text, "+20.0%");

    let inverted = classify(Some(300.0), Some(250.0), true);
    assert_eq!(inverted.tone, Tone::Down);
    assert_eq!(inverted.display_text, "+20.0%");
}

// ===========================================================================
// Group 3: Table sorting and pagination
// ===========================================================================

#[derive(Debug, Clone, PartialEq)]
struct Product {
    name: String,
    revenue: Option<f64>,
}

fn product(name: &str, revenue: Option<f64>) -> Product {
    Product {
        name: name.to_string(),
        revenue,
    }
}

fn product_table() -> TableSpec<Product> {
    TableSpec::new()
        .column(Column::new("revenue", SortDir::Desc, |p: &Product| {
            SortValue::from(p.revenue)
        }))
        .column(Column::new("name", SortDir::Asc, |p: &Product| {
            SortValue::from(p.name.as_str())
        }))
        .tie_break("name", SortDir::Asc)
}

#[test]
fn test_null_revenue_sorts_last() {
    let spec = product_table();
    let mut rows = vec![product("B", None), product("A", Some(50.0))];
    assert!(spec.sort(&mut rows, &SortState::new("revenue", SortDir::Desc)));
    let names: Vec<&str> = rows.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["A", "B"]);
}

#[test]
fn test_table_header_clicks_and_pages() {
    let spec = product_table();
    let mut rows: Vec<Product> = (1..=45u32)
        .map(|i| product(&format!("p{i:02}"), Some(f64::from(i))))
        .collect();
    let config = RefreshConfig {
        page_size: 10,
        ..RefreshConfig::default()
    };
    let mut state = config.table_state(spec.default_sort().unwrap());

    let page = state.apply(&spec, &mut rows);
    assert_eq!(page.first().unwrap().name, "p45");
    assert_eq!(state.page.total_pages(), 5);

    state.page.go_to(99);
    assert_eq!(state.page.page, 5);
    assert_eq!(state.apply(&spec, &mut rows).len(), 5);

    assert!(state.click_header("revenue", &spec));
    assert_eq!(state.sort.dir, SortDir::Asc);
    assert_eq!(state.page.page, 5);

    assert!(state.click_header("name", &spec));
    assert_eq!(state.page.page, 1);
    assert_eq!(state.apply(&spec, &mut rows).first().unwrap().name, "p01");

    assert!(!state.click_header("margin", &spec));
    assert_eq!(
        state.page.window(),
        vec![
            PageItem::Page(1),
            PageItem::Page(2),
            PageItem::Page(3),
            PageItem::Page(4),
            PageItem::Page(5),
        ]
    );
}

// ===========================================================================
// Group 4: Fetch cache
// ===========================================================================

#[tokio::test]
async fn test_concurrent_widgets_share_one_fetch() {
    let clock = ManualClock::new(NOW_MS);
    let cache = Arc::new(FetchCache::<u64>::with_clock(clock.clone()));
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = Arc::clone(&cache);
        let calls = Arc::clone(&calls);
        handles.push(tokio::spawn(async move {
            cache
                .get(
                    "shop=s1|kpi|range=7d",
                    Duration::from_secs(60),
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, anyhow::Error>(42)
                    },
                    GetOptions::default(),
                )
                .await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), 42);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(cache.is_fresh("shop=s1|kpi|range=7d", Duration::from_secs(60)));

    clock.advance(Duration::from_secs(61));
    assert!(!cache.is_fresh("shop=s1|kpi|range=7d", Duration::from_secs(60)));
}

#[tokio::test]
async fn test_refresh_all_keeps_healthy_widgets() {
    let cache = FetchCache::<Value>::with_clock(ManualClock::new(NOW_MS));
    let ttl = Duration::from_secs(60);
    let jobs = vec![
        RefreshJob::new("kpi", ttl, || async { Ok(json!({"revenue": 1})) }),
        RefreshJob::new("series", ttl, || async {
            Err(anyhow::anyhow!("connection reset"))
        }),
        RefreshJob::new("breakdown", ttl, || async { Ok(json!([])) }),
    ];

    let results = refresh_all(&cache, jobs, GetOptions::default(), JoinPolicy::BestEffort)
        .await
        .unwrap();
    assert!(matches!(results[0].1, WidgetData::Fresh(_)));
    assert!(matches!(results[1].1, WidgetData::Failed(_)));
    assert!(matches!(results[2].1, WidgetData::Fresh(_)));
    assert_eq!(cache.len(), 2);
}

// ===========================================================================
// Group 5: Dashboard load
// ===========================================================================

#[tokio::test]
async fn test_dashboard_load_and_refresh() {
    let source = shared(StubSource::with_delay(Duration::from_millis(10)));
    source.serve(
        "r:2025-03-10:2025-03-12",
        json!({"totals": {"revenue": "300.00", "conversion": 3.5}}),
    );
    source.serve(
        "r:2025-03-07:2025-03-09",
        json!({"totals": {"revenue": "250.00", "conversion": 3.0}}),
    );

    let clock = ManualClock::new(NOW_MS);
    let cache = Arc::new(FetchCache::with_clock(clock.clone()));
    let loader = KpiLoader::new(
        Arc::clone(&source),
        Arc::clone(&cache),
        clock.clone(),
        RefreshConfig::default(),
        "s1",
    );
    let kpis = [
        KpiSpec::new("revenue").at("totals.revenue"),
        KpiSpec::new("conversion").at("totals.conversion").in_points(),
    ];

    let board = loader
        .load("r:2025-03-10:2025-03-12", &kpis, GetOptions::default())
        .await;
    assert_eq!(board.tiles[0].delta.display_text, "+20.0%");
    assert_eq!(board.tiles[1].delta.display_text, "+0.5 pp");
    assert_eq!(board.tiles[1].delta.tone, Tone::Flat);
    assert_eq!(source.calls(), 2);

    // Same range again within TTL: nothing is refetched and nothing redraws.
    let mut gate = RenderGate::new();
    let first = signature_of(&board.tiles, "light").unwrap();
    assert!(gate.should_render("kpis", &first, false));

    let again = loader
        .load("r:2025-03-10:2025-03-12", &kpis, GetOptions::default())
        .await;
    assert_eq!(source.calls(), 2);
    let second = signature_of(&again.tiles, "light").unwrap();
    assert!(!gate.should_render("kpis", &second, false));

    // Forced refresh after the backend went down keeps the old numbers.
    source.fail("r:2025-03-10:2025-03-12");
    let forced = loader
        .load("r:2025-03-10:2025-03-12", &kpis, GetOptions::forced())
        .await;
    assert_eq!(source.calls(), 4);
    assert!(forced.tiles.iter().all(|t| t.stale));
    assert_eq!(forced.tiles[0].current, Some(300.0));
    let third = signature_of(&forced.tiles, "light").unwrap();
    assert!(gate.should_render("kpis", &third, false));
}

#[test]
fn test_breakdown_top_five_plus_other() {
    let rows = [
        ("direct", 500.0),
        ("google", 300.0),
        ("facebook", 100.0),
        ("email", 50.0),
        ("tiktok", 25.0),
        ("bing", 15.0),
        ("referral", 10.0),
    ]
    .into_iter()
    .map(|(label, value)| (label.to_string(), value));

    let slices = group_top_n(rows, 5);
    assert_eq!(slices.len(), 6);
    let other = slices.last().unwrap();
    assert_eq!(other.label, "Other");
    assert_eq!(other.value, 25.0);
    assert_eq!(other.rows, 2);
    let total: f64 = slices.iter().map(|s| s.value).sum();
    assert_eq!(total, 1000.0);
}
