//! The data domains cached by the app and their refresh rules.

use std::fmt;
use std::time::Duration;

use tunecast_core::RefreshConfig;

use crate::cache::CacheSettings;
use crate::types::{MovementRule, RefreshPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataDomain {
    /// Current conditions, fetched by coordinates
    Weather,
    /// Severe-weather warnings, fetched by place
    BadWeather,
    /// Sunrise/sunset and moon phase, fetched by place
    SunMoon,
}

impl DataDomain {
    pub const ALL: [DataDomain; 3] = [Self::Weather, Self::BadWeather, Self::SunMoon];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Weather => "weather",
            Self::BadWeather => "bad-weather",
            Self::SunMoon => "sun-moon",
        }
    }

    /// Persistent storage key; each domain owns exactly one.
    pub fn storage_key(&self) -> &'static str {
        match self {
            Self::Weather => "cachedWeatherData",
            Self::BadWeather => "cachedBadWeatherData",
            Self::SunMoon => "cachedSunMoonData",
        }
    }

    pub fn policy(&self, refresh: &RefreshConfig) -> RefreshPolicy {
        let minutes = |m: u32| Duration::from_secs(u64::from(m) * 60);
        match self {
            Self::Weather => RefreshPolicy {
                ttl: minutes(refresh.weather_ttl_minutes),
                movement_threshold_degrees: refresh.fine_movement_threshold_degrees,
                movement_rule: MovementRule::CoordinatesOnly,
            },
            Self::BadWeather => RefreshPolicy {
                ttl: minutes(refresh.bad_weather_ttl_minutes),
                movement_threshold_degrees: refresh.coarse_movement_threshold_degrees,
                movement_rule: MovementRule::CoordinatesAndPlace,
            },
            Self::SunMoon => RefreshPolicy {
                ttl: minutes(refresh.sun_moon_ttl_minutes),
                movement_threshold_degrees: refresh.coarse_movement_threshold_degrees,
                movement_rule: MovementRule::CoordinatesAndPlace,
            },
        }
    }

    pub fn cache_settings(&self, refresh: &RefreshConfig) -> CacheSettings {
        CacheSettings {
            label: self.name().to_string(),
            storage_key: self.storage_key().to_string(),
            policy: self.policy(refresh),
        }
    }
}

impl fmt::Display for DataDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_default_policies() {
        let refresh = RefreshConfig::default();

        let weather = DataDomain::Weather.policy(&refresh);
        assert_eq!(weather.ttl, Duration::from_secs(30 * 60));
        assert_eq!(weather.movement_threshold_degrees, 0.001);
        assert_eq!(weather.movement_rule, MovementRule::CoordinatesOnly);

        let bad = DataDomain::BadWeather.policy(&refresh);
        assert_eq!(bad.ttl, Duration::from_secs(30 * 60));
        assert_eq!(bad.movement_rule, MovementRule::CoordinatesAndPlace);

        let sun = DataDomain::SunMoon.policy(&refresh);
        assert_eq!(sun.ttl, Duration::from_secs(6 * 60 * 60));
        assert_eq!(sun.movement_threshold_degrees, 0.01);
    }

    #[test]
    fn test_storage_keys_are_distinct() {
        let keys: HashSet<_> = DataDomain::ALL.iter().map(|d| d.storage_key()).collect();
        assert_eq!(keys.len(), DataDomain::ALL.len());
    }

    #[test]
    fn test_cache_settings_carry_domain_identity() {
        let settings = DataDomain::SunMoon.cache_settings(&RefreshConfig::default());
        assert_eq!(settings.label, "sun-moon");
        assert_eq!(settings.storage_key, "cachedSunMoonData");
    }
}
