use crate::domain::Decimal;
use crate::engine::clock::{BusinessClock, DEFAULT_BOUNDARY_HOUR, DEFAULT_UTC_OFFSET_MINUTES};
use crate::ledger::{LedgerSettings, DEFAULT_MAX_CONFLICT_RETRIES};
use crate::rates::RateDefaults;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    /// Civil timezone of the business day, as minutes east of UTC.
    pub business_utc_offset_minutes: i32,
    pub day_boundary_hour: u32,
    pub default_buy_rate: Decimal,
    pub default_sell_rate: Decimal,
    pub confirmation_timeout: Duration,
    pub max_conflict_retries: u32,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = parse_or(&env_map, "PORT", 8080u16, "must be a valid u16")?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let business_utc_offset_minutes = parse_or(
            &env_map,
            "BUSINESS_UTC_OFFSET_MINUTES",
            DEFAULT_UTC_OFFSET_MINUTES,
            "must be whole minutes east of UTC",
        )?;
        if !(-24 * 60 < business_utc_offset_minutes && business_utc_offset_minutes < 24 * 60) {
            return Err(ConfigError::InvalidValue(
                "BUSINESS_UTC_OFFSET_MINUTES".to_string(),
                format!("must be within ±1439, got {}", business_utc_offset_minutes),
            ));
        }

        let day_boundary_hour = parse_or(
            &env_map,
            "DAY_BOUNDARY_HOUR",
            DEFAULT_BOUNDARY_HOUR,
            "must be an hour of the day",
        )?;
        if day_boundary_hour > 23 {
            return Err(ConfigError::InvalidValue(
                "DAY_BOUNDARY_HOUR".to_string(),
                format!("must be 0..=23, got {}", day_boundary_hour),
            ));
        }

        let defaults = RateDefaults::default();
        let default_buy_rate = parse_or(
            &env_map,
            "DEFAULT_BUY_RATE",
            defaults.buy_rate,
            "must be a decimal number",
        )?;
        if !default_buy_rate.is_positive() {
            return Err(ConfigError::InvalidValue(
                "DEFAULT_BUY_RATE".to_string(),
                format!("must be greater than 0, got {}", default_buy_rate),
            ));
        }

        let default_sell_rate = parse_or(
            &env_map,
            "DEFAULT_SELL_RATE",
            defaults.sell_rate,
            "must be a decimal number",
        )?;
        if default_sell_rate.is_negative() {
            return Err(ConfigError::InvalidValue(
                "DEFAULT_SELL_RATE".to_string(),
                format!("must not be negative, got {}", default_sell_rate),
            ));
        }

        let confirmation_timeout_secs = parse_or(
            &env_map,
            "CONFIRMATION_TIMEOUT_SECS",
            300u64,
            "must be a number of seconds",
        )?;
        if confirmation_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "CONFIRMATION_TIMEOUT_SECS".to_string(),
                "must be greater than 0".to_string(),
            ));
        }

        let max_conflict_retries = parse_or(
            &env_map,
            "MAX_CONFLICT_RETRIES",
            DEFAULT_MAX_CONFLICT_RETRIES,
            "must be a valid u32",
        )?;

        Ok(Config {
            port,
            database_path,
            business_utc_offset_minutes,
            day_boundary_hour,
            default_buy_rate,
            default_sell_rate,
            confirmation_timeout: Duration::from_secs(confirmation_timeout_secs),
            max_conflict_retries,
        })
    }

    /// Business-day clock for the configured timezone and boundary.
    pub fn business_clock(&self) -> Result<BusinessClock, ConfigError> {
        BusinessClock::new(self.business_utc_offset_minutes, self.day_boundary_hour).ok_or_else(
            || {
                ConfigError::InvalidValue(
                    "BUSINESS_UTC_OFFSET_MINUTES".to_string(),
                    "offset and boundary hour do not form a valid clock".to_string(),
                )
            },
        )
    }

    pub fn ledger_settings(&self) -> LedgerSettings {
        LedgerSettings {
            rate_defaults: RateDefaults {
                buy_rate: self.default_buy_rate,
                sell_rate: self.default_sell_rate,
            },
            max_conflict_retries: self.max_conflict_retries,
        }
    }
}

fn parse_or<T: FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: T,
    expected: &str,
) -> Result<T, ConfigError> {
    match env_map.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), expected.to_string())),
    }
}
