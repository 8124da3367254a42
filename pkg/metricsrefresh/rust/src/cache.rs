// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! TTL-bounded, key-scoped payload cache with single-flight fetching.
//!
//! One instance is shared by every widget that loads metrics. For a given
//! key there is at most one outstanding fetch: concurrent callers join the
//! same shared future. Failures never touch the cached entry; they only
//! clear the in-flight marker so the next call can retry.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::errors::FetchError;
use crate::range_key::RangeKey;

type SharedFetch<T> = Shared<BoxFuture<'static, Result<T, FetchError>>>;

/// Last successful fetch for a key. Replaced wholesale on refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub key: String,
    pub value: T,
    pub fetched_at_ms: i64,
    pub ttl_ms: i64,
}

impl<T> CacheEntry<T> {
    fn is_fresh(&self, now_ms: i64, ttl_ms: i64) -> bool {
        now_ms.saturating_sub(self.fetched_at_ms) < ttl_ms
    }

    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.fetched_at_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// Skip the freshness check. A fetch already in flight is still joined.
    pub force: bool,
}

impl GetOptions {
    pub fn forced() -> Self {
        Self { force: true }
    }
}

struct InFlight<T> {
    id: u64,
    fetch: SharedFetch<T>,
}

struct CacheState<T> {
    entries: HashMap<String, CacheEntry<T>>,
    in_flight: HashMap<String, InFlight<T>>,
    next_fetch_id: u64,
}

impl<T> Default for CacheState<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            in_flight: HashMap::new(),
            next_fetch_id: 0,
        }
    }
}

pub struct FetchCache<T> {
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<CacheState<T>>>,
}

impl<T> Default for FetchCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FetchCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    pub fn with_clock(clock: impl Clock) -> Self {
        Self {
            clock: Arc::new(clock),
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    /// Returns the cached value for `key` if it is younger than `ttl`,
    /// otherwise runs `fetcher` (or joins the fetch already running for
    /// `key`) and caches its result on success.
    ///
    /// `fetcher` is only invoked when a new fetch actually starts, and never
    /// while the cache lock is held.
    pub async fn get<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetcher: F,
        opts: GetOptions,
    ) -> Result<T, FetchError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let ttl_ms = duration_ms(ttl);
        let fetch = {
            let mut state = lock(&self.state);
            let now_ms = self.clock.now_ms();

            if !opts.force
                && let Some(entry) = state.entries.get(key)
                && entry.is_fresh(now_ms, ttl_ms)
            {
                debug!("cache hit for {key} (age {}ms)", entry.age_ms(now_ms));
                return Ok(entry.value.clone());
            }

            if let Some(pending) = state.in_flight.get(key) {
                debug!("joining in-flight fetch for {key}");
                pending.fetch.clone()
            } else {
                let id = state.next_fetch_id;
                state.next_fetch_id = state.next_fetch_id.wrapping_add(1);
                debug!("cache miss for {key}, starting fetch #{id}");
                let fetch = self.start_fetch(key.to_string(), id, ttl_ms, fetcher);
                state.in_flight.insert(
                    key.to_string(),
                    InFlight {
                        id,
                        fetch: fetch.clone(),
                    },
                );
                fetch
            }
        };
        fetch.await
    }

    fn start_fetch<F, Fut>(&self, key: String, id: u64, ttl_ms: i64, fetcher: F) -> SharedFetch<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let clock = Arc::clone(&self.clock);

        async move {
            let result = fetcher().await;

            let mut guard = lock(&state);
            // An invalidation while pending detaches this fetch: its callers
            // still get the value, but it is not written back.
            let current = guard.in_flight.get(&key).is_some_and(|f| f.id == id);
            if current {
                guard.in_flight.remove(&key);
            }

            match result {
                Ok(value) => {
                    if current {
                        guard.entries.insert(
                            key.clone(),
                            CacheEntry {
                                key,
                                value: value.clone(),
                                fetched_at_ms: clock.now_ms(),
                                ttl_ms,
                            },
                        );
                    } else {
                        debug!("dropping result of detached fetch #{id} for {key}");
                    }
                    Ok(value)
                }
                Err(e) => {
                    warn!("fetch for {key} failed: {e:#}");
                    Err(match e.downcast_ref::<FetchError>() {
                        Some(fetch_error) => fetch_error.clone(),
                        None => FetchError::Failed {
                            key,
                            reason: format!("{e:#}"),
                        },
                    })
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Last successful entry for `key`, fresh or stale.
    pub fn peek(&self, key: &str) -> Option<CacheEntry<T>> {
        lock(&self.state).entries.get(key).cloned()
    }

    pub fn is_fresh(&self, key: &str, ttl: Duration) -> bool {
        let now_ms = self.clock.now_ms();
        lock(&self.state)
            .entries
            .get(key)
            .is_some_and(|e| e.is_fresh(now_ms, duration_ms(ttl)))
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        lock(&self.state).in_flight.contains_key(key)
    }

    /// Drops the entry for `key` and detaches any fetch pending for it.
    /// Returns whether anything was dropped.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut state = lock(&self.state);
        let had_entry = state.entries.remove(key).is_some();
        let had_fetch = state.in_flight.remove(key).is_some();
        if had_entry || had_fetch {
            debug!("invalidated {key}");
        }
        had_entry || had_fetch
    }

    /// Bulk invalidation for every key starting with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        self.invalidate_where(|key| key.starts_with(prefix))
    }

    /// Bulk invalidation for every key matching the glob `pattern`.
    pub fn invalidate_matching(&self, pattern: &str) -> usize {
        self.invalidate_where(|key| glob_match::glob_match(pattern, key))
    }

    pub fn clear(&self) {
        let mut state = lock(&self.state);
        state.entries.clear();
        state.in_flight.clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn invalidate_where(&self, matches: impl Fn(&str) -> bool) -> usize {
        let mut state = lock(&self.state);
        let before = state.entries.len();
        state.entries.retain(|key, _| !matches(key));
        state.in_flight.retain(|key, _| !matches(key));
        let dropped = before - state.entries.len();
        debug!("bulk invalidation dropped {dropped} entries");
        dropped
    }
}

fn lock<T>(state: &Mutex<CacheState<T>>) -> MutexGuard<'_, CacheState<T>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// Bounds a fetcher's I/O. Expiry surfaces as [`FetchError::Timeout`] and is
/// handled by the cache like any other failure.
pub async fn with_timeout<T, Fut>(after: Duration, fut: Fut) -> anyhow::Result<T>
where
    Fut: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout { after }.into()),
    }
}

/// Builds cache keys that fold in every dimension affecting a payload.
///
/// Format: `[shop=<id>|]<metric>|range=<range>[|<dim>=<value>...]`, extra
/// dimensions sorted by name. The shop comes first so a shop switch can be
/// handled with [`FetchCache::invalidate_prefix`] and [`CacheKey::shop_prefix`].
/// `|`, `=` and `%` inside values are escaped so two different dimension
/// sets can never produce the same key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    metric: String,
    range: Option<String>,
    shop: Option<String>,
    dims: BTreeMap<String, String>,
}

impl CacheKey {
    pub fn new(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            range: None,
            shop: None,
            dims: BTreeMap::new(),
        }
    }

    pub fn range(mut self, range: &RangeKey) -> Self {
        self.range = Some(range.to_string());
        self
    }

    pub fn shop(mut self, shop: impl Into<String>) -> Self {
        self.shop = Some(shop.into());
        self
    }

    /// Extra dimension such as a profit-rule fingerprint.
    pub fn dim(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.dims.insert(name.into(), value.into());
        self
    }

    pub fn shop_prefix(shop: &str) -> String {
        format!("shop={}|", escape(shop))
    }

    pub fn build(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(shop) = &self.shop {
            write!(f, "{}", Self::shop_prefix(shop))?;
        }
        write!(f, "{}", escape(&self.metric))?;
        if let Some(range) = &self.range {
            write!(f, "|range={}", escape(range))?;
        }
        for (name, value) in &self.dims {
            write!(f, "|{}={}", escape(name), escape(value))?;
        }
        Ok(())
    }
}

fn escape(raw: &str) -> String {
    raw.replace('%', "%25")
        .replace('|', "%7C")
        .replace('=', "%3D")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TTL: Duration = Duration::from_secs(60);

    fn counting_fetcher(
        calls: &Arc<AtomicUsize>,
        value: u32,
    ) -> impl FnOnce() -> BoxFuture<'static, anyhow::Result<u32>> + Send + 'static {
        let calls = Arc::clone(calls);
        move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(value)
            }
            .boxed()
        }
    }

    fn failing_fetcher() -> impl FnOnce() -> BoxFuture<'static, anyhow::Result<u32>> + Send + 'static
    {
        || async { Err(anyhow::anyhow!("upstream returned 502")) }.boxed()
    }

    #[tokio::test]
    async fn test_single_flight_for_concurrent_gets() {
        let cache = FetchCache::<u32>::with_clock(ManualClock::new(0));
        let calls = Arc::new(AtomicUsize::new(0));

        let gets = (0..5).map(|_| {
            cache.get(
                "kpi|range=7d",
                TTL,
                counting_fetcher(&calls, 7),
                GetOptions::default(),
            )
        });
        let results = futures::future::join_all(gets).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r == &Ok(7)));
        assert!(!cache.is_in_flight("kpi|range=7d"));
    }

    #[tokio::test]
    async fn test_single_flight_across_tasks() {
        let cache = Arc::new(FetchCache::<u32>::with_clock(ManualClock::new(0)));
        let calls = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = tokio::sync::watch::channel(false);

        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            let release_rx = release_rx.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get(
                        "series|range=today",
                        TTL,
                        move || async move {
                            let mut release_rx = release_rx;
                            calls.fetch_add(1, Ordering::SeqCst);
                            release_rx.wait_for(|released| *released).await?;
                            Ok::<_, anyhow::Error>(11)
                        },
                        GetOptions::default(),
                    )
                    .await
            }));
        }

        while !cache.is_in_flight("series|range=today") {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        release_tx.send(true).unwrap();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(11));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fresh_entry_skips_fetcher() {
        let clock = ManualClock::new(1_000_000);
        let cache = FetchCache::<u32>::with_clock(clock.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache
            .get("k", TTL, counting_fetcher(&calls, 1), GetOptions::default())
            .await;
        assert_eq!(first, Ok(1));

        clock.advance(Duration::from_secs(59));
        let second = cache
            .get("k", TTL, counting_fetcher(&calls, 2), GetOptions::default())
            .await;
        assert_eq!(second, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(1));
        let third = cache
            .get("k", TTL, counting_fetcher(&calls, 3), GetOptions::default())
            .await;
        assert_eq!(third, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.peek("k").unwrap().fetched_at_ms, 1_060_000);
    }

    #[tokio::test]
    async fn test_force_bypasses_freshness() {
        let cache = FetchCache::<u32>::with_clock(ManualClock::new(0));
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get("k", TTL, counting_fetcher(&calls, 1), GetOptions::default())
            .await
            .unwrap();
        let forced = cache
            .get("k", TTL, counting_fetcher(&calls, 2), GetOptions::forced())
            .await;
        assert_eq!(forced, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.peek("k").unwrap().value, 2);
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_entry_and_allows_retry() {
        let clock = ManualClock::new(0);
        let cache = FetchCache::<u32>::with_clock(clock.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get("k", TTL, counting_fetcher(&calls, 5), GetOptions::default())
            .await
            .unwrap();
        clock.advance(Duration::from_secs(120));

        let err = cache
            .get("k", TTL, failing_fetcher(), GetOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Failed { ref key, .. } if key == "k"));
        assert!(err.to_string().contains("upstream returned 502"));
        assert!(!cache.is_in_flight("k"));

        let stale = cache.peek("k").unwrap();
        assert_eq!(stale.value, 5);
        assert!(!cache.is_fresh("k", TTL));

        let retried = cache
            .get("k", TTL, counting_fetcher(&calls, 6), GetOptions::default())
            .await;
        assert_eq!(retried, Ok(6));
    }

    #[tokio::test]
    async fn test_failure_shared_by_joined_callers() {
        let cache = FetchCache::<u32>::with_clock(ManualClock::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_fetch = Arc::clone(&calls);

        let first = cache.get(
            "k",
            TTL,
            move || async move {
                calls_in_fetch.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err::<u32, _>(anyhow::anyhow!("connection reset"))
            },
            GetOptions::default(),
        );
        let second = cache.get("k", TTL, counting_fetcher(&calls, 1), GetOptions::default());
        let (a, b) = futures::join!(first, second);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(a.is_err());
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_invalidate_detaches_pending_fetch() {
        let cache = FetchCache::<u32>::with_clock(ManualClock::new(0));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let pending = cache.get(
            "k",
            TTL,
            move || async move {
                rx.await?;
                Ok::<_, anyhow::Error>(9)
            },
            GetOptions::default(),
        );
        let invalidate = async {
            tokio::task::yield_now().await;
            assert!(cache.invalidate("k"));
            tx.send(()).unwrap();
        };
        let (result, ()) = futures::join!(pending, invalidate);

        assert_eq!(result, Ok(9));
        assert!(cache.peek("k").is_none());
        assert!(!cache.is_in_flight("k"));
    }

    #[tokio::test]
    async fn test_invalidate_prefix_and_glob() {
        let cache = FetchCache::<u32>::with_clock(ManualClock::new(0));
        let keys = [
            "shop=1|kpi|range=7d",
            "shop=1|series|range=7d",
            "shop=2|kpi|range=7d",
            "shop=2|kpi|range=today",
        ];
        for (i, key) in keys.iter().enumerate() {
            let value = u32::try_from(i).unwrap();
            cache
                .get(
                    key,
                    TTL,
                    move || async move { Ok::<_, anyhow::Error>(value) },
                    GetOptions::default(),
                )
                .await
                .unwrap();
        }
        assert_eq!(cache.len(), 4);

        assert_eq!(cache.invalidate_prefix(&CacheKey::shop_prefix("1")), 2);
        assert_eq!(cache.len(), 2);

        assert_eq!(cache.invalidate_matching("*|range=today"), 1);
        assert!(cache.peek("shop=2|kpi|range=7d").is_some());

        assert!(!cache.invalidate("missing"));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_with_timeout_surfaces_timeout_error() {
        let cache = FetchCache::<u32>::with_clock(ManualClock::new(0));
        let after = Duration::from_millis(5);
        let err = cache
            .get(
                "slow",
                TTL,
                move || {
                    with_timeout(after, async {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        Ok::<_, anyhow::Error>(1)
                    })
                },
                GetOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::Timeout { after });
        assert!(!cache.is_in_flight("slow"));
    }

    #[test]
    fn test_cache_key_folds_every_dimension() {
        let key = CacheKey::new("kpi.revenue")
            .range(&RangeKey::Last7Days)
            .shop("42")
            .dim("profit_rules", "abc123")
            .dim("currency", "USD");
        assert_eq!(
            key.build(),
            "shop=42|kpi.revenue|range=7d|currency=USD|profit_rules=abc123"
        );

        let other_rules = CacheKey::new("kpi.revenue")
            .range(&RangeKey::Last7Days)
            .shop("42")
            .dim("profit_rules", "def456")
            .dim("currency", "USD");
        assert_ne!(key.build(), other_rules.build());
    }

    #[test]
    fn test_cache_key_escapes_separators() {
        let a = CacheKey::new("m").dim("a", "1|b=2").build();
        let b = CacheKey::new("m").dim("a", "1").dim("b", "2").build();
        assert_ne!(a, b);
        assert_eq!(a, "m|a=1%7Cb%3D2");
    }
}
