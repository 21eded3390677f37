use crate::domain::{Decimal, RiskLimits};
use std::collections::HashMap;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind_addr: IpAddr,
    pub database_path: String,
    pub session_ttl_secs: i64,
    pub max_failed_logins: i64,
    pub lockout_secs: i64,
    pub currency: String,
    /// Defaults written to `risk_limits` the first time the database is used.
    pub default_limits: RiskLimits,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

/// Credentials for the first admin account, created only on an empty database.
#[derive(Debug, Clone)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: String,
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
        let bind_addr = parse_or(
            &env_map,
            "BIND_ADDR",
            IpAddr::from([127, 0, 0, 1]),
            "must be an IP address",
        )?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let session_ttl_secs =
            parse_positive(&env_map, "SESSION_TTL_SECS", 43_200, "must be a positive i64")?;
        let max_failed_logins =
            parse_positive(&env_map, "MAX_FAILED_LOGINS", 5, "must be a positive i64")?;
        let lockout_secs = parse_positive(&env_map, "LOCKOUT_SECS", 900, "must be a positive i64")?;

        let currency = env_map
            .get("CURRENCY")
            .map(|s| s.trim().to_uppercase())
            .unwrap_or_else(|| "NGN".to_string());
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ConfigError::InvalidValue(
                "CURRENCY".to_string(),
                "must be a three-letter code".to_string(),
            ));
        }

        let default_limits = RiskLimits {
            single_transaction_limit: parse_decimal(
                &env_map,
                "SINGLE_TRANSACTION_LIMIT",
                "1000000",
            )?,
            daily_withdrawal_limit: parse_decimal(&env_map, "DAILY_WITHDRAWAL_LIMIT", "5000000")?,
            min_transaction_amount: parse_decimal(&env_map, "MIN_TRANSACTION_AMOUNT", "100")?,
            velocity_max_requests_per_hour: parse_positive(
                &env_map,
                "VELOCITY_MAX_REQUESTS_PER_HOUR",
                5,
                "must be a positive i64",
            )?,
        };

        let bootstrap_admin = match (
            env_map.get("BOOTSTRAP_ADMIN_EMAIL"),
            env_map.get("BOOTSTRAP_ADMIN_PASSWORD"),
        ) {
            (Some(email), Some(password)) => Some(BootstrapAdmin {
                email: email.clone(),
                password: password.clone(),
            }),
            (None, None) => None,
            (Some(_), None) => {
                return Err(ConfigError::MissingEnv(
                    "BOOTSTRAP_ADMIN_PASSWORD".to_string(),
                ))
            }
            (None, Some(_)) => {
                return Err(ConfigError::MissingEnv("BOOTSTRAP_ADMIN_EMAIL".to_string()))
            }
        };

        Ok(Config {
            port,
            bind_addr,
            database_path,
            session_ttl_secs,
            max_failed_logins,
            lockout_secs,
            currency,
            default_limits,
            bootstrap_admin,
        })
    }
}

fn parse_or<T: FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: T,
    reason: &str,
) -> Result<T, ConfigError> {
    match env_map.get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), reason.to_string())),
        None => Ok(default),
    }
}

fn parse_positive(
    env_map: &HashMap<String, String>,
    key: &str,
    default: i64,
    reason: &str,
) -> Result<i64, ConfigError> {
    let value = parse_or(env_map, key, default, reason)?;
    if value <= 0 {
        return Err(ConfigError::InvalidValue(key.to_string(), reason.to_string()));
    }
    Ok(value)
}

fn parse_decimal(
    env_map: &HashMap<String, String>,
    key: &str,
    default: &str,
) -> Result<Decimal, ConfigError> {
    let raw = env_map.get(key).map(|s| s.as_str()).unwrap_or(default);
    let value = Decimal::from_str(raw).map_err(|_| {
        ConfigError::InvalidValue(key.to_string(), "must be a decimal number".to_string())
    })?;
    if value.is_negative() {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "must not be negative".to_string(),
        ));
    }
    Ok(value)
}
