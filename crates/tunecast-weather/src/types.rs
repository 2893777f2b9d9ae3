use std::time::Duration;

use serde::{Deserialize, Serialize};
use tunecast_core::{
    AppError, LocationError, NetworkError, ReqwestErrorExt, StorageError, WeatherError,
};

pub use tunecast_core::TemperatureUnit;

/// Weather condition categories mapped from WMO codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WeatherCondition {
    #[default]
    Clear,
    PartlyCloudy,
    Cloudy,
    Fog,
    Drizzle,
    Rain,
    HeavyRain,
    Snow,
    Sleet,
    Thunderstorm,
}

impl WeatherCondition {
    /// Convert WMO weather code to WeatherCondition
    /// See: https://open-meteo.com/en/docs#weathervariables
    pub fn from_wmo_code(code: i32) -> Self {
        match code {
            0 => Self::Clear,
            1..=2 => Self::PartlyCloudy,
            3 => Self::Cloudy,
            45 | 48 => Self::Fog,
            51 | 53 | 55 => Self::Drizzle,
            56 | 57 => Self::Sleet, // Freezing drizzle
            61 | 63 | 80 => Self::Rain,
            65 | 81 | 82 => Self::HeavyRain,
            66 | 67 => Self::Sleet, // Freezing rain
            71 | 73 | 75 | 77 | 85 | 86 => Self::Snow,
            95 | 96 | 99 => Self::Thunderstorm,
            _ => Self::Clear, // Unknown codes default to clear
        }
    }

    /// Get a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Self::Clear => "Clear",
            Self::PartlyCloudy => "Partly Cloudy",
            Self::Cloudy => "Cloudy",
            Self::Fog => "Fog",
            Self::Drizzle => "Drizzle",
            Self::Rain => "Rain",
            Self::HeavyRain => "Heavy Rain",
            Self::Snow => "Snow",
            Self::Sleet => "Sleet",
            Self::Thunderstorm => "Thunderstorm",
        }
    }

    /// Icon name used by the presentation layer
    pub fn icon_name(&self) -> &'static str {
        match self {
            Self::Clear => "sun",
            Self::PartlyCloudy => "cloud_sun",
            Self::Cloudy => "cloud",
            Self::Fog => "cloud_fog",
            Self::Drizzle | Self::Rain | Self::HeavyRain => "cloud_rain",
            Self::Snow | Self::Sleet => "cloud_snow",
            Self::Thunderstorm => "cloud_lightning",
        }
    }

    /// Mood used to seed music recommendations for this condition
    pub fn music_mood(&self) -> MusicMood {
        match self {
            Self::Clear => MusicMood::Upbeat,
            Self::PartlyCloudy => MusicMood::Chill,
            Self::Cloudy | Self::Fog => MusicMood::Dreamy,
            Self::Drizzle | Self::Rain => MusicMood::Melancholic,
            Self::HeavyRain | Self::Thunderstorm => MusicMood::Intense,
            Self::Snow | Self::Sleet => MusicMood::Cozy,
        }
    }
}

/// Listening mood derived from the current weather.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MusicMood {
    Upbeat,
    Chill,
    Dreamy,
    Melancholic,
    Intense,
    Cozy,
}

impl MusicMood {
    /// Genre keywords sent to the music catalog
    pub fn seed_genres(&self) -> &'static [&'static str] {
        match self {
            Self::Upbeat => &["pop", "dance", "funk"],
            Self::Chill => &["indie", "acoustic", "soul"],
            Self::Dreamy => &["dream-pop", "ambient", "shoegaze"],
            Self::Melancholic => &["lo-fi", "jazz", "ballad"],
            Self::Intense => &["rock", "metal", "cinematic"],
            Self::Cozy => &["folk", "classical", "singer-songwriter"],
        }
    }
}

/// Compass point for a wind direction in degrees
pub fn wind_direction_to_cardinal(degrees: u16) -> &'static str {
    match degrees % 360 {
        0..=22 | 338..=359 => "N",
        23..=67 => "NE",
        68..=112 => "E",
        113..=157 => "SE",
        158..=202 => "S",
        203..=247 => "SW",
        248..=292 => "W",
        _ => "NW",
    }
}

/// Raw device position sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// A resolved location: coordinates plus an optional place name.
///
/// Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    pub place_name: Option<String>,
}

impl LocationFix {
    pub fn new(position: Position, place_name: Option<String>) -> Self {
        Self {
            latitude: position.latitude,
            longitude: position.longitude,
            place_name,
        }
    }
}

/// One reverse-geocoding candidate, most specific field first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaceAddress {
    pub city: Option<String>,
    pub district: Option<String>,
    pub subregion: Option<String>,
    pub region: Option<String>,
}

impl PlaceAddress {
    /// Preferred display name: city, then district, subregion, region
    pub fn preferred_name(&self) -> Option<&str> {
        [&self.city, &self.district, &self.subregion, &self.region]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
    }
}

/// When a movement sample counts as a relocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementRule {
    /// Coordinate delta above the threshold is enough
    CoordinatesOnly,
    /// Coordinate delta above the threshold and a different place name
    CoordinatesAndPlace,
}

/// Refresh configuration for one data domain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshPolicy {
    pub ttl: Duration,
    pub movement_threshold_degrees: f64,
    pub movement_rule: MovementRule,
}

impl RefreshPolicy {
    pub fn ttl_ms(&self) -> i64 {
        i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX)
    }

    /// True once `fetched_at_ms` is at least one TTL in the past
    pub fn is_expired(&self, fetched_at_ms: i64, now_ms: i64) -> bool {
        now_ms.saturating_sub(fetched_at_ms) >= self.ttl_ms()
    }
}

/// Persisted cache envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedPayload<T> {
    pub value: T,
    pub fetched_at_ms: i64,
    pub location: Option<LocationFix>,
}

/// Location parameters passed to a domain fetcher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchParams {
    pub place_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub use_default: bool,
}

impl FetchParams {
    pub fn from_fix(fix: &LocationFix) -> Self {
        Self {
            place_name: fix.place_name.clone(),
            latitude: Some(fix.latitude),
            longitude: Some(fix.longitude),
            use_default: false,
        }
    }

    pub fn default_place(place_name: &str) -> Self {
        Self {
            place_name: Some(place_name.to_string()),
            latitude: None,
            longitude: None,
            use_default: true,
        }
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

/// Current conditions shown on the weather card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentWeather {
    pub place_name: Option<String>,
    pub temperature: f64,
    pub feels_like: f64,
    pub unit: TemperatureUnit,
    pub humidity: u8,
    pub wind_speed_kmh: f64,
    pub wind_direction: u16,
    pub precipitation_mm: f64,
    pub pressure_hpa: f64,
    pub uv_index: f64,
    pub condition: WeatherCondition,
}

impl CurrentWeather {
    pub fn format_temperature(&self) -> String {
        let symbol = match self.unit {
            TemperatureUnit::Fahrenheit => "°F",
            TemperatureUnit::Celsius | TemperatureUnit::Auto => "°C",
        };
        format!("{:.0}{}", self.temperature, symbol)
    }

    pub fn format_wind(&self) -> String {
        format!(
            "{:.0} km/h {}",
            self.wind_speed_kmh,
            wind_direction_to_cardinal(self.wind_direction)
        )
    }
}

/// Severe-weather warnings for a place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BadWeatherReport {
    pub place_name: Option<String>,
    pub warnings: Vec<String>,
}

/// Moon phase buckets (eighths of the synodic month).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoonPhase {
    NewMoon,
    WaxingCrescent,
    FirstQuarter,
    WaxingGibbous,
    FullMoon,
    WaningGibbous,
    LastQuarter,
    WaningCrescent,
}

impl MoonPhase {
    pub fn description(&self) -> &'static str {
        match self {
            Self::NewMoon => "New Moon",
            Self::WaxingCrescent => "Waxing Crescent",
            Self::FirstQuarter => "First Quarter",
            Self::WaxingGibbous => "Waxing Gibbous",
            Self::FullMoon => "Full Moon",
            Self::WaningGibbous => "Waning Gibbous",
            Self::LastQuarter => "Last Quarter",
            Self::WaningCrescent => "Waning Crescent",
        }
    }
}

/// Sunrise/sunset and moon data for today.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SunMoonData {
    pub place_name: Option<String>,
    pub sunrise: String,
    pub sunset: String,
    pub daylight_hours: f64,
    pub moon_phase: MoonPhase,
    pub moon_illumination: f64,
}

/// Domain fetch errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),
    #[error("API returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Location not found: {0}")]
    LocationNotFound(String),
    #[error("Location error: {0}")]
    Location(#[from] LocationError),
}

impl FetchError {
    /// Message suitable for showing next to stale or missing data
    pub fn user_message(&self) -> &'static str {
        AppError::from(self.clone()).user_message()
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Network(err.into_network_error())
    }
}

impl From<FetchError> for AppError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Network(e) => AppError::Network(e),
            FetchError::Location(e) => AppError::Location(e),
            FetchError::LocationNotFound(place) => {
                AppError::Weather(WeatherError::LocationNotFound(place))
            }
            FetchError::Api { status, message } => {
                AppError::Weather(WeatherError::ApiError(format!("{}: {}", status, message)))
            }
            FetchError::Parse(message) => AppError::Weather(WeatherError::NoData(message)),
        }
    }
}

/// Convenience alias for storage results
pub type StorageResult<T> = Result<T, StorageError>;
