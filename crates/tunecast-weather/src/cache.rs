//! Location-aware refresh cache shared by every data domain.
//!
//! One `DataRefreshCache` owns one domain: its in-memory payload, the
//! persisted envelope under its storage key, and the movement subscription
//! that triggers refreshes when the device relocates. Concurrent refresh
//! requests share a single in-flight fetch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::OnceCell;

use crate::location::{InitialFix, LocationTracker, MoveCallback, SubscriptionHandle};
use crate::store::KeyValueStore;
use crate::types::{CachedPayload, FetchError, FetchParams, LocationFix, RefreshPolicy};

/// Source of wall-clock time in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Fetches one domain's data for a location.
#[async_trait]
pub trait Fetcher<T>: Send + Sync {
    async fn fetch(&self, params: &FetchParams) -> Result<T, FetchError>;
}

/// Lifecycle phase of a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePhase {
    #[default]
    Uninitialized,
    Refreshing,
    Fresh,
    /// Last fetch failed; the previous payload is still served.
    StaleFallback,
    /// Last fetch failed and there is nothing to serve.
    Error,
}

/// What a consumer sees when reading the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSnapshot<T> {
    pub value: Option<T>,
    pub is_stale: bool,
    pub last_fetched_at_ms: Option<i64>,
    pub phase: CachePhase,
    pub error: Option<String>,
}

/// Result of one refresh request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Fetched,
    /// Cached data is still within its TTL.
    Skipped,
    /// Fetch failed; previous data is served as stale.
    Fallback { reason: String },
    /// Fetch failed with no previous data.
    Failed { reason: String },
    /// The cache was torn down before the refresh could land.
    Cancelled,
}

/// Per-domain identity and refresh rules.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    pub label: String,
    pub storage_key: String,
    pub policy: RefreshPolicy,
}

#[derive(Debug)]
struct CacheState<T> {
    phase: CachePhase,
    payload: Option<CachedPayload<T>>,
    degraded: bool,
    error: Option<String>,
}

impl<T> Default for CacheState<T> {
    fn default() -> Self {
        Self {
            phase: CachePhase::Uninitialized,
            payload: None,
            degraded: false,
            error: None,
        }
    }
}

type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

struct Inner<T> {
    settings: CacheSettings,
    fetcher: Arc<dyn Fetcher<T>>,
    store: Arc<dyn KeyValueStore>,
    tracker: LocationTracker,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState<T>>,
    in_flight: Mutex<Option<SharedRefresh>>,
    /// Latest move reported while a refresh was in flight.
    pending_move: Mutex<Option<LocationFix>>,
    subscription: Mutex<Option<SubscriptionHandle>>,
    restored: OnceCell<()>,
    alive: AtomicBool,
}

/// Cheap-to-clone handle to one domain cache.
pub struct DataRefreshCache<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for DataRefreshCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> DataRefreshCache<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(
        settings: CacheSettings,
        fetcher: Arc<dyn Fetcher<T>>,
        store: Arc<dyn KeyValueStore>,
        tracker: LocationTracker,
    ) -> Self {
        Self::with_clock(settings, fetcher, store, tracker, Arc::new(SystemClock))
    }

    pub fn with_clock(
        settings: CacheSettings,
        fetcher: Arc<dyn Fetcher<T>>,
        store: Arc<dyn KeyValueStore>,
        tracker: LocationTracker,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                fetcher,
                store,
                tracker,
                clock,
                state: Mutex::new(CacheState::default()),
                in_flight: Mutex::new(None),
                pending_move: Mutex::new(None),
                subscription: Mutex::new(None),
                restored: OnceCell::new(),
                alive: AtomicBool::new(true),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.inner.settings.label
    }

    pub fn policy(&self) -> &RefreshPolicy {
        &self.inner.settings.policy
    }

    /// Current value, staleness flag and phase. Never triggers I/O.
    pub fn get_current(&self) -> CacheSnapshot<T> {
        let state = self.inner.state.lock();
        CacheSnapshot {
            value: state.payload.as_ref().map(|p| p.value.clone()),
            is_stale: state.degraded,
            last_fetched_at_ms: state.payload.as_ref().map(|p| p.fetched_at_ms),
            phase: state.phase,
            error: state.error.clone(),
        }
    }

    /// True while a movement subscription is held.
    pub fn is_tracking(&self) -> bool {
        self.inner.subscription.lock().is_some()
    }

    /// Restore persisted data, then fetch only if it is missing or expired.
    ///
    /// A fresh restore starts movement tracking from the stored location.
    pub async fn start(&self) -> RefreshOutcome {
        self.restore().await;
        if !self.inner.is_alive() {
            return RefreshOutcome::Cancelled;
        }

        let fresh_location = {
            let state = self.inner.state.lock();
            match (&state.payload, state.phase) {
                (Some(payload), CachePhase::Fresh) => Some(payload.location.clone()),
                _ => None,
            }
        };

        match fresh_location {
            Some(location) => {
                tracing::debug!(domain = %self.label(), "Restored fresh data, skipping fetch");
                Inner::ensure_tracking(&self.inner, location);
                RefreshOutcome::Skipped
            }
            None => self.refresh(false).await,
        }
    }

    /// Fetch new data. Non-explicit refreshes are skipped inside the TTL.
    pub async fn refresh(&self, explicit: bool) -> RefreshOutcome {
        self.restore().await;
        if !self.inner.is_alive() {
            return RefreshOutcome::Cancelled;
        }
        if !explicit && !self.inner.is_due() {
            tracing::debug!(domain = %self.label(), "Cache still fresh, skipping refresh");
            return RefreshOutcome::Skipped;
        }
        Inner::shared_refresh(&self.inner, None).await
    }

    /// Refresh only when the cached data has expired.
    pub async fn check_and_refresh_if_needed(&self) -> RefreshOutcome {
        self.refresh(false).await
    }

    /// Stop tracking and drop any result still in flight. Idempotent.
    pub fn teardown(&self) {
        let handle = {
            let mut slot = self.inner.subscription.lock();
            let _state = self.inner.state.lock();
            self.inner.alive.store(false, Ordering::SeqCst);
            slot.take()
        };
        self.inner.pending_move.lock().take();
        if let Some(handle) = handle {
            self.inner.tracker.stop_tracking(&handle);
        }
        tracing::debug!(domain = %self.label(), "Cache torn down");
    }

    async fn restore(&self) {
        let inner = &self.inner;
        inner
            .restored
            .get_or_init(|| async { inner.restore_from_store().await })
            .await;
    }
}

impl<T> Inner<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn is_due(&self) -> bool {
        let now = self.clock.now_ms();
        let state = self.state.lock();
        state
            .payload
            .as_ref()
            .map_or(true, |p| self.settings.policy.is_expired(p.fetched_at_ms, now))
    }

    async fn restore_from_store(&self) {
        let key = &self.settings.storage_key;
        let raw = match self.store.get(key).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(domain = %self.settings.label, "Failed to read cache: {}", e);
                None
            }
        };

        let payload = raw.and_then(|json| {
            serde_json::from_str::<CachedPayload<T>>(&json)
                .map_err(|e| {
                    tracing::warn!(
                        domain = %self.settings.label,
                        "Discarding unreadable cache entry: {}",
                        e
                    );
                })
                .ok()
        });

        let Some(payload) = payload else {
            tracing::debug!(domain = %self.settings.label, "No cached data");
            return;
        };

        let expired = self
            .settings
            .policy
            .is_expired(payload.fetched_at_ms, self.clock.now_ms());

        let mut state = self.state.lock();
        if !self.is_alive() {
            return;
        }
        if expired {
            tracing::info!(domain = %self.settings.label, "Cached data expired");
        } else {
            state.phase = CachePhase::Fresh;
        }
        state.degraded = expired;
        state.payload = Some(payload);
    }

    fn shared_refresh(inner: &Arc<Self>, fix: Option<LocationFix>) -> SharedRefresh {
        let mut slot = inner.in_flight.lock();
        if let Some(existing) = slot.as_ref() {
            tracing::debug!(domain = %inner.settings.label, "Joining in-flight refresh");
            return existing.clone();
        }
        Self::begin_refresh(inner, &mut slot, fix)
    }

    /// Refresh for a reported move. A move that lands while a fetch is
    /// running is queued and fetched once that fetch finishes.
    fn refresh_for_move(inner: &Arc<Self>, fix: LocationFix) -> Option<SharedRefresh> {
        let mut slot = inner.in_flight.lock();
        if slot.is_some() {
            tracing::debug!(domain = %inner.settings.label, "Refresh in flight, queueing move");
            *inner.pending_move.lock() = Some(fix);
            return None;
        }
        Some(Self::begin_refresh(inner, &mut slot, Some(fix)))
    }

    fn begin_refresh(
        inner: &Arc<Self>,
        slot: &mut Option<SharedRefresh>,
        fix: Option<LocationFix>,
    ) -> SharedRefresh {
        let task_inner = Arc::clone(inner);
        let refresh = async move {
            let outcome = Self::run_refresh(&task_inner, fix).await;
            Self::finish_refresh(&task_inner);
            outcome
        }
        .boxed()
        .shared();

        *slot = Some(refresh.clone());
        refresh
    }

    /// Clear the in-flight slot, or hand it straight to a queued move.
    fn finish_refresh(inner: &Arc<Self>) {
        let mut slot = inner.in_flight.lock();
        let pending = inner.pending_move.lock().take();
        match pending {
            Some(fix) if inner.is_alive() => {
                tracing::info!(domain = %inner.settings.label, "Refreshing for queued move");
                let follow_up = Self::begin_refresh(inner, &mut slot, Some(fix));
                tokio::spawn(follow_up);
            }
            _ => *slot = None,
        }
    }

    async fn run_refresh(inner: &Arc<Self>, fix: Option<LocationFix>) -> RefreshOutcome {
        {
            let mut state = inner.state.lock();
            if !inner.is_alive() {
                return RefreshOutcome::Cancelled;
            }
            state.phase = CachePhase::Refreshing;
        }

        let fix = match fix {
            Some(fix) => Some(fix),
            None => match inner.tracker.request_initial_fix().await {
                InitialFix::Located(fix) => Some(fix),
                InitialFix::PermissionDenied | InitialFix::Unavailable => None,
            },
        };

        let params = match &fix {
            Some(fix) => FetchParams::from_fix(fix),
            None => FetchParams::default_place(inner.tracker.default_place()),
        };

        tracing::info!(
            domain = %inner.settings.label,
            place = ?params.place_name,
            "Refreshing"
        );
        let result = inner.fetcher.fetch(&params).await;

        if !inner.is_alive() {
            tracing::debug!(domain = %inner.settings.label, "Dropping result after teardown");
            return RefreshOutcome::Cancelled;
        }

        match result {
            Ok(value) => Self::commit(inner, value, fix).await,
            Err(err) => inner.fall_back(&err),
        }
    }

    async fn commit(inner: &Arc<Self>, value: T, fix: Option<LocationFix>) -> RefreshOutcome {
        let payload = {
            let mut state = inner.state.lock();
            if !inner.is_alive() {
                return RefreshOutcome::Cancelled;
            }
            let now = inner.clock.now_ms();
            // Timestamps never go backwards, even if the clock does.
            let fetched_at_ms = state
                .payload
                .as_ref()
                .map_or(now, |p| p.fetched_at_ms.max(now));
            let payload = CachedPayload {
                value,
                fetched_at_ms,
                location: fix.clone(),
            };
            state.payload = Some(payload.clone());
            state.phase = CachePhase::Fresh;
            state.degraded = false;
            state.error = None;
            payload
        };

        match serde_json::to_string(&payload) {
            Ok(json) => {
                if let Err(e) = inner.store.set(&inner.settings.storage_key, json).await {
                    tracing::warn!(domain = %inner.settings.label, "Failed to persist cache: {}", e);
                }
            }
            Err(e) => {
                tracing::warn!(domain = %inner.settings.label, "Failed to encode cache: {}", e);
            }
        }

        tracing::info!(domain = %inner.settings.label, "Refreshed");
        Self::ensure_tracking(inner, fix);
        RefreshOutcome::Fetched
    }

    fn fall_back(&self, err: &FetchError) -> RefreshOutcome {
        let reason = err.to_string();
        let mut state = self.state.lock();
        if !self.is_alive() {
            return RefreshOutcome::Cancelled;
        }
        state.error = Some(reason.clone());

        if state.payload.is_some() {
            tracing::warn!(
                domain = %self.settings.label,
                "Fetch failed, serving last known data: {}",
                reason
            );
            state.phase = CachePhase::StaleFallback;
            state.degraded = true;
            RefreshOutcome::Fallback { reason }
        } else {
            tracing::error!(domain = %self.settings.label, "Fetch failed with no cached data: {}", reason);
            state.phase = CachePhase::Error;
            RefreshOutcome::Failed { reason }
        }
    }

    /// Start the movement subscription once; later calls are no-ops.
    fn ensure_tracking(inner: &Arc<Self>, seed: Option<LocationFix>) {
        let mut slot = inner.subscription.lock();
        if slot.is_some() || !inner.is_alive() {
            return;
        }

        let weak = Arc::downgrade(inner);
        let on_move: MoveCallback = Arc::new(move |fix: LocationFix| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            tokio::spawn(async move {
                if !inner.is_alive() {
                    return;
                }
                tracing::info!(domain = %inner.settings.label, "Location changed, refreshing");
                if let Some(refresh) = Self::refresh_for_move(&inner, fix) {
                    refresh.await;
                }
            });
        });

        let policy = inner.settings.policy;
        *slot = Some(inner.tracker.start_tracking(
            seed,
            policy.movement_threshold_degrees,
            policy.movement_rule,
            on_move,
        ));
    }
}
