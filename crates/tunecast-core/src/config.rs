use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::ConfigError;

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Add an error
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return String::new();
        }
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application configuration directory
    pub config_dir: PathBuf,

    /// Directory holding the offline key-value store
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log filter used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Device location settings
    #[serde(default)]
    pub location: LocationConfig,

    /// Weather provider settings
    #[serde(default)]
    pub weather: WeatherConfig,

    /// Cache refresh policies
    #[serde(default)]
    pub refresh: RefreshConfig,

    /// Local notification settings
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    /// Place name used whenever the device location cannot be resolved
    #[serde(default = "default_place_name")]
    pub default_place_name: String,

    /// Fixed device latitude (desktop builds have no GPS)
    #[serde(default)]
    pub latitude: Option<f64>,

    /// Fixed device longitude
    #[serde(default)]
    pub longitude: Option<f64>,
}

fn default_place_name() -> String {
    "Hanoi, VN".to_string()
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            default_place_name: default_place_name(),
            latitude: None,
            longitude: None,
        }
    }
}

impl LocationConfig {
    /// Configured coordinates, if both halves are present
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

/// Temperature unit preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Auto,
    Celsius,
    Fahrenheit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// Temperature unit preference
    #[serde(default)]
    pub temperature_unit: TemperatureUnit,

    /// Open-Meteo forecast endpoint
    #[serde(default = "default_forecast_url")]
    pub forecast_url: String,

    /// Open-Meteo forward geocoding endpoint
    #[serde(default = "default_geocoding_url")]
    pub geocoding_url: String,

    /// Nominatim reverse geocoding endpoint
    #[serde(default = "default_reverse_geocoding_url")]
    pub reverse_geocoding_url: String,

    /// HTTP timeout applied by the provider clients
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_forecast_url() -> String {
    "https://api.open-meteo.com/v1/forecast".to_string()
}

fn default_geocoding_url() -> String {
    "https://geocoding-api.open-meteo.com/v1/search".to_string()
}

fn default_reverse_geocoding_url() -> String {
    "https://nominatim.openstreetmap.org/reverse".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            temperature_unit: TemperatureUnit::Auto,
            forecast_url: default_forecast_url(),
            geocoding_url: default_geocoding_url(),
            reverse_geocoding_url: default_reverse_geocoding_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Per-domain refresh settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_weather_ttl")]
    pub weather_ttl_minutes: u32,

    #[serde(default = "default_bad_weather_ttl")]
    pub bad_weather_ttl_minutes: u32,

    #[serde(default = "default_sun_moon_ttl")]
    pub sun_moon_ttl_minutes: u32,

    /// Threshold for coordinate-keyed data (~111 m)
    #[serde(default = "default_fine_threshold")]
    pub fine_movement_threshold_degrees: f64,

    /// Threshold for city-keyed data (~1.1 km)
    #[serde(default = "default_coarse_threshold")]
    pub coarse_movement_threshold_degrees: f64,
}

fn default_weather_ttl() -> u32 {
    30
}

fn default_bad_weather_ttl() -> u32 {
    30
}

fn default_sun_moon_ttl() -> u32 {
    6 * 60
}

fn default_fine_threshold() -> f64 {
    0.001
}

fn default_coarse_threshold() -> f64 {
    0.01
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            weather_ttl_minutes: default_weather_ttl(),
            bad_weather_ttl_minutes: default_bad_weather_ttl(),
            sun_moon_ttl_minutes: default_sun_moon_ttl(),
            fine_movement_threshold_degrees: default_fine_threshold(),
            coarse_movement_threshold_degrees: default_coarse_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Forward severe weather warnings to desktop notifications
    #[serde(default = "default_notifications_enabled")]
    pub enabled: bool,
}

fn default_notifications_enabled() -> bool {
    true
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: default_notifications_enabled(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tunecast")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tunecast");

        Self {
            config_dir,
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            location: LocationConfig::default(),
            weather: WeatherConfig::default(),
            refresh: RefreshConfig::default(),
            notifications: NotificationsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file, creating default if it doesn't exist
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from an explicit path, writing defaults there if missing
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let contents =
            std::fs::read_to_string(config_path).context("Failed to read config file")?;

        let config: Config =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings for the caller
    /// to report once logging is up. Returns an error if validation fails with critical errors.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        let config = Self::load()?;
        let validation = config.validate();

        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()).into());
        }

        Ok((config, validation))
    }

    /// Validate the configuration
    ///
    /// Returns a ValidationResult containing any errors or warnings.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_url(&self.weather.forecast_url, "weather.forecast_url", &mut result);
        self.validate_url(&self.weather.geocoding_url, "weather.geocoding_url", &mut result);
        self.validate_url(
            &self.weather.reverse_geocoding_url,
            "weather.reverse_geocoding_url",
            &mut result,
        );

        if self.weather.request_timeout_secs == 0 {
            result.add_error(
                "weather.request_timeout_secs",
                "Request timeout must be greater than 0",
            );
        } else if self.weather.request_timeout_secs > 120 {
            result.add_warning(
                "weather.request_timeout_secs",
                "Request timeout is unusually long (>120 seconds)",
            );
        }

        if self.location.default_place_name.trim().is_empty() {
            result.add_error(
                "location.default_place_name",
                "Default place name cannot be empty",
            );
        }

        match (self.location.latitude, self.location.longitude) {
            (Some(lat), Some(lon)) => {
                if !(-90.0..=90.0).contains(&lat) {
                    result.add_error("location.latitude", "Latitude must be within -90..90");
                }
                if !(-180.0..=180.0).contains(&lon) {
                    result.add_error("location.longitude", "Longitude must be within -180..180");
                }
            }
            (None, None) => {}
            _ => result.add_warning(
                "location",
                "Only one of latitude/longitude is set - fixed location ignored",
            ),
        }

        let ttls = [
            ("refresh.weather_ttl_minutes", self.refresh.weather_ttl_minutes),
            ("refresh.bad_weather_ttl_minutes", self.refresh.bad_weather_ttl_minutes),
            ("refresh.sun_moon_ttl_minutes", self.refresh.sun_moon_ttl_minutes),
        ];
        for (field, minutes) in ttls {
            if minutes == 0 {
                result.add_warning(field, "Cache disabled (0 minutes) - every refresh hits the network");
            } else if minutes > 7 * 24 * 60 {
                result.add_warning(field, "Cache lifetime is more than a week");
            }
        }

        let thresholds = [
            (
                "refresh.fine_movement_threshold_degrees",
                self.refresh.fine_movement_threshold_degrees,
            ),
            (
                "refresh.coarse_movement_threshold_degrees",
                self.refresh.coarse_movement_threshold_degrees,
            ),
        ];
        for (field, degrees) in thresholds {
            if !degrees.is_finite() || degrees <= 0.0 {
                result.add_error(field, "Movement threshold must be a positive number of degrees");
            } else if degrees > 1.0 {
                result.add_warning(field, "Movement threshold exceeds 1 degree (~111 km)");
            }
        }

        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            result.add_error(
                "log_level",
                format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.log_level,
                    valid_log_levels.join(", ")
                ),
            );
        }

        result
    }

    /// Validate a URL field
    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Path of the SQLite database backing the offline cache
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("cache.db")
    }

    /// Get the path to the configuration file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| ConfigError::NotFound("no platform config directory".into()))?
            .join("tunecast");

        Ok(config_dir.join("config.toml"))
    }
}
