//! Open-Meteo backed fetchers for every data domain.
//!
//! Free API, no key required. Coordinates are used when the caller has them;
//! otherwise the place name is forward-geocoded first.

use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tunecast_core::WeatherConfig;

use crate::cache::Fetcher;
use crate::types::{
    BadWeatherReport, CurrentWeather, FetchError, FetchParams, MoonPhase, SunMoonData,
    TemperatureUnit, WeatherCondition,
};

/// Mean length of a lunation in days.
const SYNODIC_MONTH_DAYS: f64 = 29.530588853;
/// A known new moon: 2000-01-06 18:14 UTC.
const REFERENCE_NEW_MOON_MS: i64 = 947_182_440_000;
const MS_PER_DAY: f64 = 86_400_000.0;

const HOURS_AHEAD: usize = 24;
const HEAVY_RAIN_MM_PER_HOUR: f64 = 10.0;
const STRONG_GUST_KMH: f64 = 60.0;
const HIGH_UV_INDEX: f64 = 8.0;
const HEAT_CELSIUS: f64 = 35.0;
const FREEZING_CELSIUS: f64 = 0.0;

/// Coordinates a request was resolved to.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPlace {
    pub latitude: f64,
    pub longitude: f64,
    pub place_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodingResponse {
    results: Option<Vec<GeocodingResult>>,
}

#[derive(Debug, Deserialize)]
struct GeocodingResult {
    name: String,
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct CurrentResponse {
    current: CurrentData,
}

#[derive(Debug, Deserialize)]
struct CurrentData {
    temperature_2m: f64,
    relative_humidity_2m: f64,
    apparent_temperature: f64,
    precipitation: f64,
    weather_code: i32,
    surface_pressure: f64,
    wind_speed_10m: f64,
    wind_direction_10m: f64,
    #[serde(default)]
    uv_index: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct HourlyResponse {
    hourly: HourlySamples,
}

/// Hourly forecast columns used for warnings. Missing values are `None`.
#[derive(Debug, Default, Deserialize)]
pub struct HourlySamples {
    #[serde(default)]
    pub weather_code: Vec<Option<i32>>,
    #[serde(default)]
    pub precipitation: Vec<Option<f64>>,
    #[serde(default)]
    pub wind_gusts_10m: Vec<Option<f64>>,
    #[serde(default)]
    pub uv_index: Vec<Option<f64>>,
    #[serde(default)]
    pub temperature_2m: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct DailyResponse {
    daily: DailyData,
}

#[derive(Debug, Deserialize)]
struct DailyData {
    time: Vec<String>,
    sunrise: Vec<String>,
    sunset: Vec<String>,
    #[serde(default)]
    daylight_duration: Vec<Option<f64>>,
}

/// HTTP client for the Open-Meteo forecast and geocoding APIs.
#[derive(Debug, Clone)]
pub struct OpenMeteoClient {
    client: Client,
    forecast_url: String,
    geocoding_url: String,
    unit: TemperatureUnit,
}

impl OpenMeteoClient {
    pub fn new(config: &WeatherConfig) -> Result<Self, FetchError> {
        Self::with_urls(
            &config.forecast_url,
            &config.geocoding_url,
            config.temperature_unit,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn with_urls(
        forecast_url: &str,
        geocoding_url: &str,
        unit: TemperatureUnit,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            forecast_url: forecast_url.to_string(),
            geocoding_url: geocoding_url.to_string(),
            unit,
        })
    }

    async fn get_json<R: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<R, FetchError> {
        let response = self.client.get(url).query(query).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(FetchError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        serde_json::from_str(&body).map_err(|e| FetchError::Parse(e.to_string()))
    }

    /// Coordinates for a request, forward-geocoding the place name if needed.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn resolve(&self, params: &FetchParams) -> Result<ResolvedPlace, FetchError> {
        if let Some((latitude, longitude)) = params.coordinates() {
            return Ok(ResolvedPlace {
                latitude,
                longitude,
                place_name: params.place_name.clone(),
            });
        }

        let place_name = params
            .place_name
            .as_deref()
            .ok_or_else(|| FetchError::LocationNotFound("no place name".into()))?;

        // "Hanoi, VN" searches for "Hanoi"
        let query = place_name.split(',').next().unwrap_or_default().trim();
        if query.is_empty() {
            return Err(FetchError::LocationNotFound(place_name.to_string()));
        }

        let response: GeocodingResponse = self
            .get_json(
                &self.geocoding_url,
                &[
                    ("name", query.to_string()),
                    ("count", "1".to_string()),
                    ("language", "en".to_string()),
                    ("format", "json".to_string()),
                ],
            )
            .await?;

        let result = response
            .results
            .and_then(|results| results.into_iter().next())
            .ok_or_else(|| FetchError::LocationNotFound(place_name.to_string()))?;

        tracing::debug!(
            "Geocoded {} to {} ({:.4}, {:.4})",
            place_name,
            result.name,
            result.latitude,
            result.longitude
        );
        Ok(ResolvedPlace {
            latitude: result.latitude,
            longitude: result.longitude,
            place_name: Some(place_name.to_string()),
        })
    }

    fn coordinate_query(place: &ResolvedPlace) -> Vec<(&'static str, String)> {
        vec![
            ("latitude", place.latitude.to_string()),
            ("longitude", place.longitude.to_string()),
            ("timezone", "auto".to_string()),
        ]
    }

    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn current_conditions(
        &self,
        params: &FetchParams,
    ) -> Result<CurrentWeather, FetchError> {
        let place = self.resolve(params).await?;
        let unit = match self.unit {
            TemperatureUnit::Fahrenheit => TemperatureUnit::Fahrenheit,
            TemperatureUnit::Celsius | TemperatureUnit::Auto => TemperatureUnit::Celsius,
        };

        let mut query = Self::coordinate_query(&place);
        query.push((
            "current",
            "temperature_2m,relative_humidity_2m,apparent_temperature,precipitation,\
             weather_code,surface_pressure,wind_speed_10m,wind_direction_10m,uv_index"
                .to_string(),
        ));
        if unit == TemperatureUnit::Fahrenheit {
            query.push(("temperature_unit", "fahrenheit".to_string()));
        }

        let response: CurrentResponse = self.get_json(&self.forecast_url, &query).await?;
        let current = response.current;

        Ok(CurrentWeather {
            place_name: place.place_name,
            temperature: current.temperature_2m,
            feels_like: current.apparent_temperature,
            unit,
            humidity: current.relative_humidity_2m.clamp(0.0, 100.0).round() as u8,
            wind_speed_kmh: current.wind_speed_10m,
            wind_direction: current.wind_direction_10m.rem_euclid(360.0).round() as u16,
            precipitation_mm: current.precipitation,
            pressure_hpa: current.surface_pressure,
            uv_index: current.uv_index.unwrap_or_default(),
            condition: WeatherCondition::from_wmo_code(current.weather_code),
        })
    }

    /// Warnings for the next 24 hours. Temperatures are always requested in Celsius.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn bad_weather(&self, params: &FetchParams) -> Result<BadWeatherReport, FetchError> {
        let place = self.resolve(params).await?;

        let mut query = Self::coordinate_query(&place);
        query.push((
            "hourly",
            "weather_code,precipitation,wind_gusts_10m,uv_index,temperature_2m".to_string(),
        ));
        query.push(("forecast_hours", HOURS_AHEAD.to_string()));

        let response: HourlyResponse = self.get_json(&self.forecast_url, &query).await?;
        let warnings = derive_warnings(&response.hourly);
        tracing::debug!("{} weather warning(s)", warnings.len());

        Ok(BadWeatherReport {
            place_name: place.place_name,
            warnings,
        })
    }

    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn sun_moon(&self, params: &FetchParams) -> Result<SunMoonData, FetchError> {
        let place = self.resolve(params).await?;

        let mut query = Self::coordinate_query(&place);
        query.push(("daily", "sunrise,sunset,daylight_duration".to_string()));
        query.push(("forecast_days", "1".to_string()));

        let response: DailyResponse = self.get_json(&self.forecast_url, &query).await?;
        let daily = response.daily;

        let (Some(sunrise), Some(sunset)) = (daily.sunrise.first(), daily.sunset.first()) else {
            return Err(FetchError::Parse("daily forecast has no sunrise/sunset".into()));
        };

        // Moon phase at local noon of the forecast day; today if the date is unreadable.
        let moment = daily
            .time
            .first()
            .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok())
            .and_then(|day| day.and_hms_opt(12, 0, 0))
            .map(|noon| noon.and_utc())
            .unwrap_or_else(Utc::now);
        let (moon_phase, moon_illumination) = moon_phase_at(moment);

        Ok(SunMoonData {
            place_name: place.place_name,
            sunrise: clock_time(sunrise).to_string(),
            sunset: clock_time(sunset).to_string(),
            daylight_hours: daily
                .daylight_duration
                .first()
                .copied()
                .flatten()
                .map(|secs| secs / 3600.0)
                .unwrap_or_default(),
            moon_phase,
            moon_illumination,
        })
    }
}

/// "2024-06-01T05:14" -> "05:14"
fn clock_time(iso: &str) -> &str {
    iso.split_once('T').map_or(iso, |(_, time)| time)
}

fn max_of(values: &[Option<f64>]) -> Option<f64> {
    values
        .iter()
        .take(HOURS_AHEAD)
        .flatten()
        .copied()
        .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))))
}

fn min_of(values: &[Option<f64>]) -> Option<f64> {
    values
        .iter()
        .take(HOURS_AHEAD)
        .flatten()
        .copied()
        .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.min(v))))
}

/// One warning per hazard found in the next 24 hourly samples.
pub fn derive_warnings(hourly: &HourlySamples) -> Vec<String> {
    let mut warnings = Vec::new();

    let thunderstorm = hourly
        .weather_code
        .iter()
        .take(HOURS_AHEAD)
        .flatten()
        .any(|code| WeatherCondition::from_wmo_code(*code) == WeatherCondition::Thunderstorm);
    if thunderstorm {
        warnings.push("Thunderstorms expected in the next 24 hours".to_string());
    }

    if let Some(rain) = max_of(&hourly.precipitation).filter(|r| *r >= HEAVY_RAIN_MM_PER_HOUR) {
        warnings.push(format!("Heavy rain up to {:.0} mm/h", rain));
    }
    if let Some(gust) = max_of(&hourly.wind_gusts_10m).filter(|g| *g >= STRONG_GUST_KMH) {
        warnings.push(format!("Strong wind gusts up to {:.0} km/h", gust));
    }
    if let Some(heat) = max_of(&hourly.temperature_2m).filter(|t| *t >= HEAT_CELSIUS) {
        warnings.push(format!("Extreme heat up to {:.0}°C", heat));
    }
    if let Some(cold) = min_of(&hourly.temperature_2m).filter(|t| *t <= FREEZING_CELSIUS) {
        warnings.push(format!("Freezing temperatures down to {:.0}°C", cold));
    }
    if let Some(uv) = max_of(&hourly.uv_index).filter(|u| *u >= HIGH_UV_INDEX) {
        warnings.push(format!("Very high UV index ({:.0})", uv));
    }

    warnings
}

/// Phase bucket and illuminated fraction (0.0-1.0) of the moon at `moment`.
pub fn moon_phase_at(moment: DateTime<Utc>) -> (MoonPhase, f64) {
    let days = (moment.timestamp_millis() - REFERENCE_NEW_MOON_MS) as f64 / MS_PER_DAY;
    let fraction = days.rem_euclid(SYNODIC_MONTH_DAYS) / SYNODIC_MONTH_DAYS;
    let illumination = (1.0 - (2.0 * PI * fraction).cos()) / 2.0;

    let phase = match ((fraction * 8.0) + 0.5).floor() as u32 % 8 {
        0 => MoonPhase::NewMoon,
        1 => MoonPhase::WaxingCrescent,
        2 => MoonPhase::FirstQuarter,
        3 => MoonPhase::WaxingGibbous,
        4 => MoonPhase::FullMoon,
        5 => MoonPhase::WaningGibbous,
        6 => MoonPhase::LastQuarter,
        _ => MoonPhase::WaningCrescent,
    };

    (phase, illumination)
}

/// Current conditions fetcher.
pub struct WeatherFetcher {
    client: Arc<OpenMeteoClient>,
}

impl WeatherFetcher {
    pub fn new(client: Arc<OpenMeteoClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher<CurrentWeather> for WeatherFetcher {
    async fn fetch(&self, params: &FetchParams) -> Result<CurrentWeather, FetchError> {
        self.client.current_conditions(params).await
    }
}

/// Severe-weather warnings fetcher.
pub struct BadWeatherFetcher {
    client: Arc<OpenMeteoClient>,
}

impl BadWeatherFetcher {
    pub fn new(client: Arc<OpenMeteoClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher<BadWeatherReport> for BadWeatherFetcher {
    async fn fetch(&self, params: &FetchParams) -> Result<BadWeatherReport, FetchError> {
        self.client.bad_weather(params).await
    }
}

/// Sun and moon fetcher.
pub struct SunMoonFetcher {
    client: Arc<OpenMeteoClient>,
}

impl SunMoonFetcher {
    pub fn new(client: Arc<OpenMeteoClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher<SunMoonData> for SunMoonFetcher {
    async fn fetch(&self, params: &FetchParams) -> Result<SunMoonData, FetchError> {
        self.client.sun_moon(params).await
    }
}
