//! Device location: initial fix, reverse geocoding, and movement tracking.
//!
//! `LocationTracker` never fails towards its caller. Permission problems and
//! provider errors turn into "use the default place" or "no update".

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tunecast_core::LocationError;

use crate::geocode::{preferred_place_name, Geocoder};
use crate::types::{LocationFix, MovementRule, Position};

/// Minimum device-reported movement between watch samples.
pub const WATCH_DISTANCE_INTERVAL_M: f64 = 100.0;
/// Minimum time between watch samples.
pub const WATCH_TIME_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accuracy {
    Low,
    Balanced,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
}

/// Options for a position subscription
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchOptions {
    pub accuracy: Accuracy,
    pub distance_interval_m: f64,
    pub time_interval: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            accuracy: Accuracy::Balanced,
            distance_interval_m: WATCH_DISTANCE_INTERVAL_M,
            time_interval: WATCH_TIME_INTERVAL,
        }
    }
}

/// Stream of position samples; closes when the platform stops reporting.
pub type PositionStream = mpsc::Receiver<Result<Position, LocationError>>;

/// Platform geolocation API.
#[async_trait]
pub trait GeolocationProvider: Send + Sync {
    async fn request_permission(&self) -> Result<Permission, LocationError>;

    async fn current_position(&self, accuracy: Accuracy) -> Result<Position, LocationError>;

    async fn watch_position(&self, options: WatchOptions) -> Result<PositionStream, LocationError>;
}

/// Fixed-position provider for hosts without a GPS.
///
/// With no configured coordinates it behaves like a device where the user
/// declined location access.
#[derive(Debug, Clone, Default)]
pub struct StaticGeolocation {
    position: Option<Position>,
}

impl StaticGeolocation {
    pub fn new(position: Option<Position>) -> Self {
        Self { position }
    }
}

#[async_trait]
impl GeolocationProvider for StaticGeolocation {
    async fn request_permission(&self) -> Result<Permission, LocationError> {
        Ok(if self.position.is_some() {
            Permission::Granted
        } else {
            Permission::Denied
        })
    }

    async fn current_position(&self, _accuracy: Accuracy) -> Result<Position, LocationError> {
        self.position.ok_or(LocationError::PermissionDenied)
    }

    async fn watch_position(&self, _options: WatchOptions) -> Result<PositionStream, LocationError> {
        if self.position.is_none() {
            return Err(LocationError::PermissionDenied);
        }
        // A fixed position never moves: hand back a stream that is already closed.
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }
}

/// Result of asking for the first location fix.
#[derive(Debug, Clone, PartialEq)]
pub enum InitialFix {
    Located(LocationFix),
    /// The user declined location access; use the default place name.
    PermissionDenied,
    /// The platform could not produce a position; use the default place name.
    Unavailable,
}

impl InitialFix {
    pub fn fix(&self) -> Option<&LocationFix> {
        match self {
            InitialFix::Located(fix) => Some(fix),
            InitialFix::PermissionDenied | InitialFix::Unavailable => None,
        }
    }
}

/// Invoked with the new fix whenever the device has meaningfully moved.
pub type MoveCallback = Arc<dyn Fn(LocationFix) + Send + Sync>;

/// True when either coordinate moved strictly more than `threshold_degrees`.
pub fn has_moved(last: &LocationFix, position: Position, threshold_degrees: f64) -> bool {
    (position.latitude - last.latitude).abs() > threshold_degrees
        || (position.longitude - last.longitude).abs() > threshold_degrees
}

/// Owns a position subscription. Stopping is idempotent; dropping stops too.
#[derive(Debug)]
pub struct SubscriptionHandle {
    token: CancellationToken,
}

impl SubscriptionHandle {
    pub fn stop(&self) {
        if !self.token.is_cancelled() {
            tracing::debug!("Stopping location tracking");
            self.token.cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[derive(Clone)]
pub struct LocationTracker {
    provider: Arc<dyn GeolocationProvider>,
    geocoder: Arc<dyn Geocoder>,
    default_place: String,
}

impl LocationTracker {
    pub fn new(
        provider: Arc<dyn GeolocationProvider>,
        geocoder: Arc<dyn Geocoder>,
        default_place: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            geocoder,
            default_place: default_place.into(),
        }
    }

    /// Place name used when no fix is available
    pub fn default_place(&self) -> &str {
        &self.default_place
    }

    /// Request permission, sample the position and name it.
    pub async fn request_initial_fix(&self) -> InitialFix {
        match self.provider.request_permission().await {
            Ok(Permission::Granted) => {}
            Ok(Permission::Denied) => {
                tracing::info!(
                    "Location permission denied, using default place {}",
                    self.default_place
                );
                return InitialFix::PermissionDenied;
            }
            Err(e) => {
                tracing::warn!("Location permission request failed: {}", e);
                return InitialFix::Unavailable;
            }
        }

        let position = match self.provider.current_position(Accuracy::Balanced).await {
            Ok(position) => position,
            Err(LocationError::PermissionDenied) => return InitialFix::PermissionDenied,
            Err(e) => {
                tracing::warn!("Failed to get current position: {}", e);
                return InitialFix::Unavailable;
            }
        };

        let place_name = self
            .lookup_place(position)
            .await
            .unwrap_or_else(|| self.default_place.clone());

        tracing::info!(
            "Initial fix: {:.4}, {:.4} ({})",
            position.latitude,
            position.longitude,
            place_name
        );
        InitialFix::Located(LocationFix::new(position, Some(place_name)))
    }

    async fn lookup_place(&self, position: Position) -> Option<String> {
        match self.geocoder.reverse(position).await {
            Ok(addresses) => preferred_place_name(&addresses),
            Err(e) => {
                tracing::debug!("Reverse geocoding failed: {}", e);
                None
            }
        }
    }

    /// Compare a sample against the last-known fix held in `last`.
    ///
    /// Returns the fix to report when the sample counts as a relocation.
    /// `last` is advanced whenever the coordinates moved past the threshold,
    /// even if the place name stayed the same.
    pub async fn evaluate_sample(
        &self,
        last: &mut Option<LocationFix>,
        position: Position,
        threshold_degrees: f64,
        rule: MovementRule,
    ) -> Option<LocationFix> {
        let Some(previous) = last.as_ref() else {
            let place_name = match rule {
                MovementRule::CoordinatesAndPlace => self.lookup_place(position).await,
                MovementRule::CoordinatesOnly => None,
            };
            *last = Some(LocationFix::new(position, place_name));
            return None;
        };

        if !has_moved(previous, position, threshold_degrees) {
            return None;
        }

        match rule {
            MovementRule::CoordinatesOnly => {
                let previous_name = previous.place_name.clone();
                let place_name = self.lookup_place(position).await.or(previous_name);
                let fix = LocationFix::new(position, place_name);
                *last = Some(fix.clone());
                Some(fix)
            }
            MovementRule::CoordinatesAndPlace => {
                let previous_name = previous.place_name.clone();
                // No name means no usable update for a place-keyed domain.
                let place_name = self.lookup_place(position).await?;
                let changed = previous_name.as_deref() != Some(place_name.as_str());
                let fix = LocationFix::new(position, Some(place_name));
                *last = Some(fix.clone());
                changed.then_some(fix)
            }
        }
    }

    /// Subscribe to position updates and call `on_move` on relocation.
    pub fn start_tracking(
        &self,
        seed: Option<LocationFix>,
        threshold_degrees: f64,
        rule: MovementRule,
        on_move: MoveCallback,
    ) -> SubscriptionHandle {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let tracker = self.clone();

        tokio::spawn(async move {
            let stream = tokio::select! {
                _ = task_token.cancelled() => return,
                stream = tracker.provider.watch_position(WatchOptions::default()) => stream,
            };
            let mut stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("Location tracking unavailable: {}", e);
                    return;
                }
            };

            let mut last = seed;
            loop {
                let sample = tokio::select! {
                    _ = task_token.cancelled() => break,
                    sample = stream.recv() => sample,
                };

                let position = match sample {
                    Some(Ok(position)) => position,
                    Some(Err(e)) => {
                        tracing::debug!("Skipping position sample: {}", e);
                        continue;
                    }
                    None => {
                        tracing::debug!("Position stream closed");
                        break;
                    }
                };

                let moved = tracker
                    .evaluate_sample(&mut last, position, threshold_degrees, rule)
                    .await;
                if let Some(fix) = moved {
                    if task_token.is_cancelled() {
                        break;
                    }
                    tracing::info!(
                        "Device moved to {:.4}, {:.4} ({:?})",
                        fix.latitude,
                        fix.longitude,
                        fix.place_name
                    );
                    on_move(fix);
                }
            }
        });

        SubscriptionHandle { token }
    }

    /// Release a subscription. Safe to call more than once.
    pub fn stop_tracking(&self, handle: &SubscriptionHandle) {
        handle.stop();
    }
}
