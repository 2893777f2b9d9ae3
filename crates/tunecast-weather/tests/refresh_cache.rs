#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Integration tests for the location-aware refresh cache.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tunecast_core::LocationError;
use tunecast_weather::location::{Accuracy, Permission, PositionStream, WatchOptions};
use tunecast_weather::{
    CachePhase, CacheSettings, CachedPayload, Clock, DataRefreshCache, FetchError, FetchParams,
    Fetcher, Geocoder, GeolocationProvider, KeyValueStore, LocationFix, LocationTracker,
    MemoryStore, MovementRule, PlaceAddress, Position, RefreshOutcome, RefreshPolicy,
};

const TTL_MS: u64 = 1_800_000;
const STORAGE_KEY: &str = "cachedTestData";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Reading {
    temp: i32,
}

struct ManualClock(AtomicI64);

impl ManualClock {
    fn set(&self, now_ms: i64) {
        self.0.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Returns queued results in order, then `temp = call number` once the queue is empty.
#[derive(Default)]
struct ScriptedFetcher {
    calls: AtomicUsize,
    delay: Duration,
    results: Mutex<VecDeque<Result<Reading, FetchError>>>,
    params: Mutex<Vec<FetchParams>>,
}

impl ScriptedFetcher {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    fn push(&self, result: Result<Reading, FetchError>) {
        self.results.lock().push_back(result);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_params(&self) -> Option<FetchParams> {
        self.params.lock().last().cloned()
    }
}

#[async_trait]
impl Fetcher<Reading> for ScriptedFetcher {
    async fn fetch(&self, params: &FetchParams) -> Result<Reading, FetchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.params.lock().push(params.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = self.results.lock().pop_front();
        scripted.unwrap_or(Ok(Reading { temp: call as i32 }))
    }
}

struct FakeGeolocation {
    permission: Permission,
    sender: Mutex<Option<mpsc::Sender<Result<Position, LocationError>>>>,
}

impl FakeGeolocation {
    fn new(permission: Permission) -> Self {
        Self {
            permission,
            sender: Mutex::new(None),
        }
    }

    /// Wait until a tracking task has subscribed, then return its sender.
    async fn subscriber(&self) -> mpsc::Sender<Result<Position, LocationError>> {
        for _ in 0..200 {
            if let Some(tx) = self.sender.lock().clone() {
                return tx;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("tracking never subscribed");
    }
}

#[async_trait]
impl GeolocationProvider for FakeGeolocation {
    async fn request_permission(&self) -> Result<Permission, LocationError> {
        Ok(self.permission)
    }

    async fn current_position(&self, _accuracy: Accuracy) -> Result<Position, LocationError> {
        Ok(hanoi())
    }

    async fn watch_position(&self, _options: WatchOptions) -> Result<PositionStream, LocationError> {
        let (tx, rx) = mpsc::channel(16);
        *self.sender.lock() = Some(tx);
        Ok(rx)
    }
}

/// Names everything north of 21.1 "Bac Ninh", everything else "Hanoi".
struct BandGeocoder;

#[async_trait]
impl Geocoder for BandGeocoder {
    async fn reverse(&self, position: Position) -> Result<Vec<PlaceAddress>, LocationError> {
        let city = if position.latitude > 21.1 {
            "Bac Ninh"
        } else {
            "Hanoi"
        };
        Ok(vec![PlaceAddress {
            city: Some(city.into()),
            ..Default::default()
        }])
    }
}

fn hanoi() -> Position {
    Position::new(21.0285, 105.8542)
}

struct Harness {
    cache: DataRefreshCache<Reading>,
    fetcher: Arc<ScriptedFetcher>,
    clock: Arc<ManualClock>,
    geolocation: Arc<FakeGeolocation>,
    store: Arc<MemoryStore>,
}

fn harness_with(
    fetcher: ScriptedFetcher,
    store: Arc<MemoryStore>,
    permission: Permission,
    rule: MovementRule,
) -> Harness {
    let fetcher = Arc::new(fetcher);
    let clock = Arc::new(ManualClock(AtomicI64::new(0)));
    let geolocation = Arc::new(FakeGeolocation::new(permission));
    let tracker = LocationTracker::new(geolocation.clone(), Arc::new(BandGeocoder), "Hanoi, VN");
    let settings = CacheSettings {
        label: "test".into(),
        storage_key: STORAGE_KEY.into(),
        policy: RefreshPolicy {
            ttl: Duration::from_millis(TTL_MS),
            movement_threshold_degrees: 0.01,
            movement_rule: rule,
        },
    };
    let cache: DataRefreshCache<Reading> = DataRefreshCache::with_clock(
        settings,
        fetcher.clone(),
        store.clone(),
        tracker,
        clock.clone(),
    );

    Harness {
        cache,
        fetcher,
        clock,
        geolocation,
        store,
    }
}

fn harness(fetcher: ScriptedFetcher) -> Harness {
    harness_with(
        fetcher,
        Arc::new(MemoryStore::new()),
        Permission::Granted,
        MovementRule::CoordinatesAndPlace,
    )
}

async fn seed_store(store: &MemoryStore, temp: i32, fetched_at_ms: i64) {
    let payload = CachedPayload {
        value: Reading { temp },
        fetched_at_ms,
        location: Some(LocationFix::new(hanoi(), Some("Hanoi".into()))),
    };
    store
        .set(STORAGE_KEY, serde_json::to_string(&payload).unwrap())
        .await
        .unwrap();
}

async fn wait_for_calls(fetcher: &ScriptedFetcher, expected: usize) {
    for _ in 0..200 {
        if fetcher.calls() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn ttl_scenario_skips_then_refetches() {
    let store = Arc::new(MemoryStore::new());
    seed_store(&store, 20, 0).await;
    let h = harness_with(
        ScriptedFetcher::default(),
        store,
        Permission::Granted,
        MovementRule::CoordinatesAndPlace,
    );

    h.clock.set(1_000_000);
    assert_eq!(h.cache.refresh(false).await, RefreshOutcome::Skipped);
    assert_eq!(h.fetcher.calls(), 0);
    assert_eq!(h.cache.get_current().value, Some(Reading { temp: 20 }));

    h.clock.set(1_900_000);
    h.fetcher.push(Ok(Reading { temp: 25 }));
    assert_eq!(h.cache.refresh(false).await, RefreshOutcome::Fetched);
    assert_eq!(h.fetcher.calls(), 1);

    let snapshot = h.cache.get_current();
    assert_eq!(snapshot.value, Some(Reading { temp: 25 }));
    assert!(!snapshot.is_stale);
    assert_eq!(snapshot.phase, CachePhase::Fresh);
    assert_eq!(snapshot.last_fetched_at_ms, Some(1_900_000));
}

#[tokio::test]
async fn ttl_is_respected_after_a_fetch() {
    let h = harness(ScriptedFetcher::default());

    assert_eq!(h.cache.check_and_refresh_if_needed().await, RefreshOutcome::Fetched);
    h.clock.set(TTL_MS as i64 - 1);
    assert_eq!(h.cache.check_and_refresh_if_needed().await, RefreshOutcome::Skipped);
    assert_eq!(h.fetcher.calls(), 1);
}

#[tokio::test]
async fn explicit_refresh_always_fetches() {
    let h = harness(ScriptedFetcher::default());

    h.cache.refresh(true).await;
    h.cache.refresh(true).await;
    h.cache.refresh(true).await;

    assert_eq!(h.fetcher.calls(), 3);
    assert_eq!(h.cache.get_current().value, Some(Reading { temp: 3 }));
}

#[tokio::test]
async fn concurrent_refreshes_share_one_fetch() {
    let h = harness(ScriptedFetcher::with_delay(Duration::from_millis(100)));

    let (first, second) = tokio::join!(h.cache.refresh(true), h.cache.refresh(true));

    assert_eq!(h.fetcher.calls(), 1);
    assert_eq!(first, RefreshOutcome::Fetched);
    assert_eq!(first, second);
}

#[tokio::test]
async fn failure_with_cached_value_serves_stale() {
    let h = harness(ScriptedFetcher::default());
    h.fetcher.push(Ok(Reading { temp: 20 }));
    h.fetcher.push(Err(FetchError::Parse("truncated body".into())));

    h.cache.refresh(true).await;
    let outcome = h.cache.refresh(true).await;

    assert!(matches!(outcome, RefreshOutcome::Fallback { .. }));
    let snapshot = h.cache.get_current();
    assert_eq!(snapshot.value, Some(Reading { temp: 20 }));
    assert!(snapshot.is_stale);
    assert_eq!(snapshot.phase, CachePhase::StaleFallback);
    assert!(snapshot.error.is_some());

    // A later success clears the fallback.
    h.cache.refresh(true).await;
    let snapshot = h.cache.get_current();
    assert!(!snapshot.is_stale);
    assert_eq!(snapshot.phase, CachePhase::Fresh);
}

#[tokio::test]
async fn failure_with_restored_value_serves_stale() {
    let store = Arc::new(MemoryStore::new());
    seed_store(&store, 18, 0).await;
    let h = harness_with(
        ScriptedFetcher::default(),
        store,
        Permission::Granted,
        MovementRule::CoordinatesAndPlace,
    );
    h.fetcher.push(Err(FetchError::LocationNotFound("Hanoi".into())));

    h.clock.set(TTL_MS as i64 * 2);
    let outcome = h.cache.start().await;

    assert!(matches!(outcome, RefreshOutcome::Fallback { .. }));
    let snapshot = h.cache.get_current();
    assert_eq!(snapshot.value, Some(Reading { temp: 18 }));
    assert!(snapshot.is_stale);
}

#[tokio::test]
async fn failure_without_cache_is_error() {
    let h = harness(ScriptedFetcher::default());
    h.fetcher.push(Err(FetchError::Parse("bad json".into())));

    let outcome = h.cache.refresh(false).await;

    assert!(matches!(outcome, RefreshOutcome::Failed { .. }));
    let snapshot = h.cache.get_current();
    assert!(snapshot.value.is_none());
    assert_eq!(snapshot.phase, CachePhase::Error);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn retry_after_error_recovers() {
    let h = harness(ScriptedFetcher::default());
    h.fetcher.push(Err(FetchError::Parse("bad json".into())));
    h.fetcher.push(Ok(Reading { temp: 27 }));

    assert!(matches!(
        h.cache.refresh(false).await,
        RefreshOutcome::Failed { .. }
    ));
    assert_eq!(h.cache.get_current().phase, CachePhase::Error);

    // Nothing cached, so even a non-explicit refresh retries.
    assert_eq!(h.cache.refresh(false).await, RefreshOutcome::Fetched);
    assert_eq!(h.fetcher.calls(), 2);

    let snapshot = h.cache.get_current();
    assert_eq!(snapshot.phase, CachePhase::Fresh);
    assert_eq!(snapshot.value, Some(Reading { temp: 27 }));
    assert!(snapshot.error.is_none());
    assert!(!snapshot.is_stale);
    assert!(!h.store.is_empty());
}

#[tokio::test]
async fn movement_to_new_place_triggers_one_fetch() {
    let h = harness(ScriptedFetcher::default());
    assert_eq!(h.cache.start().await, RefreshOutcome::Fetched);
    assert!(h.cache.is_tracking());

    let tx = h.geolocation.subscriber().await;
    tx.send(Ok(Position::new(21.18, 106.07))).await.unwrap();

    wait_for_calls(&h.fetcher, 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.fetcher.calls(), 2);

    let params = h.fetcher.last_params().unwrap();
    assert_eq!(params.place_name.as_deref(), Some("Bac Ninh"));
    assert_eq!(params.latitude, Some(21.18));
    assert_eq!(h.cache.get_current().value, Some(Reading { temp: 2 }));
}

#[tokio::test]
async fn small_or_same_place_movement_is_ignored() {
    let h = harness(ScriptedFetcher::default());
    h.cache.start().await;

    let tx = h.geolocation.subscriber().await;
    // Below threshold
    tx.send(Ok(Position::new(21.0300, 105.8542))).await.unwrap();
    // Past threshold, still Hanoi
    tx.send(Ok(Position::new(21.0500, 105.8700))).await.unwrap();
    tx.send(Err(LocationError::Timeout)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.fetcher.calls(), 1);
}

#[tokio::test]
async fn coordinate_domains_refetch_without_place_change() {
    let h = harness_with(
        ScriptedFetcher::default(),
        Arc::new(MemoryStore::new()),
        Permission::Granted,
        MovementRule::CoordinatesOnly,
    );
    h.cache.start().await;

    let tx = h.geolocation.subscriber().await;
    tx.send(Ok(Position::new(21.0500, 105.8700))).await.unwrap();

    wait_for_calls(&h.fetcher, 2).await;
    assert_eq!(h.fetcher.calls(), 2);
}

#[tokio::test]
async fn teardown_discards_in_flight_result() {
    let h = harness(ScriptedFetcher::with_delay(Duration::from_millis(100)));

    let cache = h.cache.clone();
    let pending = tokio::spawn(async move { cache.refresh(true).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let before = h.cache.get_current();
    h.cache.teardown();

    assert_eq!(pending.await.unwrap(), RefreshOutcome::Cancelled);
    assert_eq!(h.cache.get_current(), before);
    assert!(h.cache.get_current().value.is_none());
    assert!(h.store.is_empty());
    assert!(!h.cache.is_tracking());
}

#[tokio::test]
async fn teardown_stops_movement_refreshes() {
    let h = harness(ScriptedFetcher::default());
    h.cache.start().await;
    let tx = h.geolocation.subscriber().await;

    h.cache.teardown();
    let _ = tx.send(Ok(Position::new(21.18, 106.07))).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.fetcher.calls(), 1);
}

#[tokio::test]
async fn fresh_restore_tracks_without_fetching() {
    let store = Arc::new(MemoryStore::new());
    seed_store(&store, 22, 0).await;
    let h = harness_with(
        ScriptedFetcher::default(),
        store,
        Permission::Granted,
        MovementRule::CoordinatesAndPlace,
    );
    h.clock.set(60_000);

    assert_eq!(h.cache.start().await, RefreshOutcome::Skipped);
    assert_eq!(h.fetcher.calls(), 0);
    assert!(h.cache.is_tracking());

    let snapshot = h.cache.get_current();
    assert_eq!(snapshot.phase, CachePhase::Fresh);
    assert_eq!(snapshot.value, Some(Reading { temp: 22 }));

    // The stored Hanoi fix is the baseline for movement.
    let tx = h.geolocation.subscriber().await;
    tx.send(Ok(Position::new(21.18, 106.07))).await.unwrap();
    wait_for_calls(&h.fetcher, 1).await;
    assert_eq!(h.fetcher.calls(), 1);
}

#[tokio::test]
async fn fetched_data_survives_a_restart() {
    let store = Arc::new(MemoryStore::new());
    let first = harness_with(
        ScriptedFetcher::default(),
        store.clone(),
        Permission::Granted,
        MovementRule::CoordinatesAndPlace,
    );
    first.fetcher.push(Ok(Reading { temp: 31 }));
    first.cache.start().await;
    first.cache.teardown();

    let raw = store.get(STORAGE_KEY).await.unwrap().unwrap();
    let envelope: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(envelope["value"]["temp"], 31);
    assert_eq!(envelope["fetchedAtMs"], 0);
    assert_eq!(envelope["location"]["placeName"], "Hanoi");

    let second = harness_with(
        ScriptedFetcher::default(),
        store,
        Permission::Granted,
        MovementRule::CoordinatesAndPlace,
    );
    assert_eq!(second.cache.start().await, RefreshOutcome::Skipped);
    assert_eq!(second.cache.get_current().value, Some(Reading { temp: 31 }));
    second.cache.teardown();
}

#[tokio::test]
async fn denied_permission_fetches_default_place() {
    let h = harness_with(
        ScriptedFetcher::default(),
        Arc::new(MemoryStore::new()),
        Permission::Denied,
        MovementRule::CoordinatesAndPlace,
    );

    assert_eq!(h.cache.start().await, RefreshOutcome::Fetched);

    let params = h.fetcher.last_params().unwrap();
    assert!(params.use_default);
    assert_eq!(params.place_name.as_deref(), Some("Hanoi, VN"));
    assert!(params.coordinates().is_none());
}

#[tokio::test]
async fn movement_during_a_fetch_is_fetched_afterwards() {
    let h = harness(ScriptedFetcher::with_delay(Duration::from_millis(100)));
    assert_eq!(h.cache.start().await, RefreshOutcome::Fetched);
    let tx = h.geolocation.subscriber().await;

    let cache = h.cache.clone();
    let explicit = tokio::spawn(async move { cache.refresh(true).await });
    wait_for_calls(&h.fetcher, 2).await;
    tx.send(Ok(Position::new(21.18, 106.07))).await.unwrap();

    assert_eq!(explicit.await.unwrap(), RefreshOutcome::Fetched);
    wait_for_calls(&h.fetcher, 3).await;
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(h.fetcher.calls(), 3);
    let places: Vec<_> = h
        .fetcher
        .params
        .lock()
        .iter()
        .map(|p| p.place_name.clone())
        .collect();
    assert_eq!(
        places,
        vec![
            Some("Hanoi".to_string()),
            Some("Hanoi".to_string()),
            Some("Bac Ninh".to_string()),
        ]
    );
    assert_eq!(h.cache.get_current().value, Some(Reading { temp: 3 }));
    assert_eq!(h.cache.get_current().phase, CachePhase::Fresh);
}
