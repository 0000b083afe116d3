//! Runtime configuration loaded from the environment (`.env` supported)

use crate::error::ItineraryError;
use crate::models::FramingStrategy;
use crate::Result;
use serde::Serialize;
use std::env;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_CACHE_TTL_DAYS: u64 = 7;
pub const DEFAULT_CACHE_PURGE_SECS: u64 = 3600;

const SECS_PER_DAY: u64 = 24 * 3600;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub gemini_api_key: Option<String>,
    pub google_maps_api_key: Option<String>,
    pub database_url: Option<String>,
    pub framing_strategy: FramingStrategy,
    pub ai_timeout: Duration,
    pub places_timeout: Duration,
    pub routes_timeout: Duration,
    pub cache_ttl: Duration,
    pub cache_purge_interval: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            gemini_api_key: None,
            google_maps_api_key: None,
            database_url: None,
            framing_strategy: FramingStrategy::Ai,
            ai_timeout: Duration::from_secs(30),
            places_timeout: Duration::from_secs(5),
            routes_timeout: Duration::from_secs(10),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_DAYS * SECS_PER_DAY),
            cache_purge_interval: Duration::from_secs(DEFAULT_CACHE_PURGE_SECS),
        }
    }
}

impl AppConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match non_empty("PORT").or_else(|| non_empty("API_PORT")) {
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| {
                ItineraryError::ConfigError(format!("PORT must be a port number, got '{}'", raw))
            })?,
            None => defaults.port,
        };

        let framing_strategy = match non_empty("FRAMING_STRATEGY") {
            Some(raw) => FramingStrategy::parse(&raw).ok_or_else(|| {
                ItineraryError::ConfigError(format!(
                    "FRAMING_STRATEGY must be 'ai' or 'rules', got '{}'",
                    raw
                ))
            })?,
            None => defaults.framing_strategy,
        };

        let seconds = |key: &str, default: Duration| -> Result<Duration> {
            match non_empty(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| {
                        ItineraryError::ConfigError(format!("{} must be whole seconds, got '{}'", key, raw))
                    }),
                None => Ok(default),
            }
        };

        let cache_ttl = match non_empty("SCHEDULE_CACHE_TTL_DAYS") {
            Some(raw) => {
                let days = raw.trim().parse::<u64>().map_err(|_| {
                    ItineraryError::ConfigError(format!(
                        "SCHEDULE_CACHE_TTL_DAYS must be whole days, got '{}'",
                        raw
                    ))
                })?;
                let secs = days.checked_mul(SECS_PER_DAY).ok_or_else(|| {
                    ItineraryError::ConfigError(format!(
                        "SCHEDULE_CACHE_TTL_DAYS is too large: {}",
                        days
                    ))
                })?;
                Duration::from_secs(secs)
            }
            None => defaults.cache_ttl,
        };

        let cache_purge_interval =
            seconds("CACHE_PURGE_INTERVAL_SECS", defaults.cache_purge_interval)?;
        if cache_purge_interval.is_zero() {
            return Err(ItineraryError::ConfigError(
                "CACHE_PURGE_INTERVAL_SECS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            port,
            gemini_api_key: non_empty("GEMINI_API_KEY"),
            google_maps_api_key: non_empty("GOOGLE_MAPS_API_KEY"),
            database_url: non_empty("POSTGRES_URL").or_else(|| non_empty("DATABASE_URL")),
            framing_strategy,
            ai_timeout: seconds("AI_TIMEOUT_SECS", defaults.ai_timeout)?,
            places_timeout: seconds("PLACES_TIMEOUT_SECS", defaults.places_timeout)?,
            routes_timeout: seconds("ROUTES_TIMEOUT_SECS", defaults.routes_timeout)?,
            cache_ttl,
            cache_purge_interval,
        })
    }

    /// Configuration safe to hand to the frontend (no secrets)
    pub fn public_view(&self, radius_schedule_km: &[f64], supported_cities: Vec<&'static str>) -> PublicConfig {
        PublicConfig {
            framing_strategy: self.framing_strategy,
            ai_configured: self.gemini_api_key.is_some(),
            place_search_configured: self.google_maps_api_key.is_some(),
            routing_configured: self.google_maps_api_key.is_some(),
            cache_backend: if self.database_url.is_some() { "postgres" } else { "in_memory" },
            cache_ttl_days: self.cache_ttl.as_secs() / SECS_PER_DAY,
            ai_timeout_secs: self.ai_timeout.as_secs(),
            places_timeout_secs: self.places_timeout.as_secs(),
            routes_timeout_secs: self.routes_timeout.as_secs(),
            radius_schedule_km: radius_schedule_km.to_vec(),
            supported_cities,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicConfig {
    pub framing_strategy: FramingStrategy,
    pub ai_configured: bool,
    pub place_search_configured: bool,
    pub routing_configured: bool,
    pub cache_backend: &'static str,
    pub cache_ttl_days: u64,
    pub ai_timeout_secs: u64,
    pub places_timeout_secs: u64,
    pub routes_timeout_secs: u64,
    pub radius_schedule_km: Vec<f64>,
    pub supported_cities: Vec<&'static str>,
}
