pub mod config;
pub mod error;

pub use config::{
    Config, LocationConfig, NotificationsConfig, RefreshConfig, TemperatureUnit, ValidationResult,
    WeatherConfig,
};
pub use error::{
    AppError, ConfigError, LocationError, NetworkError, ReqwestErrorExt, RusqliteErrorExt,
    StorageError, WeatherError,
};

use anyhow::Result;

/// Initialize tracing/logging.
///
/// `RUST_LOG` wins when set; otherwise `default_level` is used.
pub fn init(default_level: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    tracing::info!("Tunecast core initialized");
    Ok(())
}
