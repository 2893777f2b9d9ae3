//! Weather data for Tunecast
//!
//! Location-aware, persistently cached weather, severe-weather warnings and
//! sun/moon data from Open-Meteo, with device movement triggering refreshes.

pub mod cache;
pub mod domain;
pub mod geocode;
pub mod location;
pub mod notify;
pub mod provider;
pub mod store;
pub mod types;

pub use cache::{
    CachePhase, CacheSettings, CacheSnapshot, Clock, DataRefreshCache, Fetcher, RefreshOutcome,
    SystemClock,
};
pub use domain::DataDomain;
pub use geocode::{Geocoder, NominatimGeocoder};
pub use location::{
    GeolocationProvider, InitialFix, LocationTracker, StaticGeolocation, SubscriptionHandle,
};
pub use notify::{DesktopNotifier, Notifier, WarningNotifyingFetcher};
pub use provider::{BadWeatherFetcher, OpenMeteoClient, SunMoonFetcher, WeatherFetcher};
pub use store::{KeyValueStore, MemoryStore, SqliteStore};
pub use types::*;
