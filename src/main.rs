use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tunecast_core::Config;
use tunecast_weather::{
    BadWeatherFetcher, BadWeatherReport, CacheSnapshot, CurrentWeather, DataDomain,
    DataRefreshCache, DesktopNotifier, Fetcher, KeyValueStore, LocationTracker,
    NominatimGeocoder, OpenMeteoClient, Position, RefreshOutcome, SqliteStore, StaticGeolocation,
    SunMoonData, SunMoonFetcher, WarningNotifyingFetcher, WeatherFetcher,
};

#[tokio::main]
async fn main() -> Result<()> {
    let (config, validation) = Config::load_validated()?;
    tunecast_core::init(&config.log_level)?;
    for warning in &validation.warnings {
        tracing::warn!("Config warning: {}", warning);
    }

    // `--refresh` ignores the TTL and fetches every domain.
    let force = std::env::args().any(|arg| arg == "--refresh");

    let store: Arc<dyn KeyValueStore> = Arc::new(
        SqliteStore::open(config.store_path()).context("Failed to open the cache database")?,
    );
    let geolocation = Arc::new(StaticGeolocation::new(
        config
            .location
            .coordinates()
            .map(|(lat, lon)| Position::new(lat, lon)),
    ));
    let geocoder = Arc::new(NominatimGeocoder::with_base_url(
        &config.weather.reverse_geocoding_url,
        Duration::from_secs(config.weather.request_timeout_secs),
    )?);
    let tracker = LocationTracker::new(
        geolocation,
        geocoder,
        config.location.default_place_name.clone(),
    );
    let client = Arc::new(OpenMeteoClient::new(&config.weather)?);

    let bad_weather_fetcher: Arc<dyn Fetcher<BadWeatherReport>> = if config.notifications.enabled
    {
        Arc::new(WarningNotifyingFetcher::new(
            BadWeatherFetcher::new(client.clone()),
            Arc::new(DesktopNotifier),
        ))
    } else {
        Arc::new(BadWeatherFetcher::new(client.clone()))
    };

    let weather: DataRefreshCache<CurrentWeather> = DataRefreshCache::new(
        DataDomain::Weather.cache_settings(&config.refresh),
        Arc::new(WeatherFetcher::new(client.clone())),
        store.clone(),
        tracker.clone(),
    );
    let bad_weather: DataRefreshCache<BadWeatherReport> = DataRefreshCache::new(
        DataDomain::BadWeather.cache_settings(&config.refresh),
        bad_weather_fetcher,
        store.clone(),
        tracker.clone(),
    );
    let sun_moon: DataRefreshCache<SunMoonData> = DataRefreshCache::new(
        DataDomain::SunMoon.cache_settings(&config.refresh),
        Arc::new(SunMoonFetcher::new(client)),
        store,
        tracker,
    );

    tracing::info!("Tunecast started");

    let (weather_outcome, bad_weather_outcome, sun_moon_outcome) = if force {
        tokio::join!(
            weather.refresh(true),
            bad_weather.refresh(true),
            sun_moon.refresh(true)
        )
    } else {
        tokio::join!(weather.start(), bad_weather.start(), sun_moon.start())
    };

    print_domain(
        DataDomain::Weather,
        &weather_outcome,
        &weather.get_current(),
        render_weather,
    );
    print_domain(
        DataDomain::BadWeather,
        &bad_weather_outcome,
        &bad_weather.get_current(),
        render_bad_weather,
    );
    print_domain(
        DataDomain::SunMoon,
        &sun_moon_outcome,
        &sun_moon.get_current(),
        render_sun_moon,
    );

    weather.teardown();
    bad_weather.teardown();
    sun_moon.teardown();

    Ok(())
}

fn print_domain<T>(
    domain: DataDomain,
    outcome: &RefreshOutcome,
    snapshot: &CacheSnapshot<T>,
    render: fn(&T) -> String,
) {
    println!("[{}] {:?}", domain, snapshot.phase);
    match &snapshot.value {
        Some(value) => {
            let stale = if snapshot.is_stale { " (stale)" } else { "" };
            println!("  {}{}", render(value), stale);
        }
        None => println!("  no data"),
    }
    match outcome {
        RefreshOutcome::Fallback { reason } | RefreshOutcome::Failed { reason } => {
            println!("  last refresh failed: {}", reason);
        }
        _ => {}
    }
}

fn render_weather(weather: &CurrentWeather) -> String {
    let mood = weather.condition.music_mood();
    format!(
        "{}: {} {} (feels like {:.0}), humidity {}%, wind {}, UV {:.0}\n  Mood {:?}: {}",
        weather.place_name.as_deref().unwrap_or("Unknown"),
        weather.format_temperature(),
        weather.condition.description(),
        weather.feels_like,
        weather.humidity,
        weather.format_wind(),
        weather.uv_index,
        mood,
        mood.seed_genres().join(", ")
    )
}

fn render_bad_weather(report: &BadWeatherReport) -> String {
    let place = report.place_name.as_deref().unwrap_or("Unknown");
    if report.warnings.is_empty() {
        format!("{}: no warnings", place)
    } else {
        format!("{}: {}", place, report.warnings.join("; "))
    }
}

fn render_sun_moon(data: &SunMoonData) -> String {
    format!(
        "{}: sunrise {}, sunset {}, {:.1} h daylight, {} ({:.0}% lit)",
        data.place_name.as_deref().unwrap_or("Unknown"),
        data.sunrise,
        data.sunset,
        data.daylight_hours,
        data.moon_phase.description(),
        data.moon_illumination * 100.0
    )
}
