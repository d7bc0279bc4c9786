use serde::Deserialize;
use thiserror::Error;

/// Startup configuration failures. Any of these aborts the process.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

impl JwtConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            secret: required("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "bandsync".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "bandsync-users".into()),
            ttl_minutes: minutes("JWT_TTL_MINUTES", 60)?,
            refresh_ttl_minutes: minutes("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 7)?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub jwt: JwtConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = required("DATABASE_URL")?;
        let max_connections = match std::env::var("DB_MAX_CONNECTIONS") {
            Ok(v) => v.parse::<u32>().map_err(|_| ConfigError::Invalid {
                name: "DB_MAX_CONNECTIONS",
                value: v,
            })?,
            Err(_) => 10,
        };
        let jwt = JwtConfig::from_env()?;
        Ok(Self {
            database_url,
            max_connections,
            jwt,
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(name)),
    }
}

/// Upper bound for any token lifetime: ten years.
pub const MAX_TTL_MINUTES: i64 = 60 * 24 * 365 * 10;

/// Reads a minute count in `1..=MAX_TTL_MINUTES`, falling back to `default` when unset.
fn minutes(name: &'static str, default: i64) -> Result<i64, ConfigError> {
    let Ok(raw) = std::env::var(name) else {
        return Ok(default);
    };
    match raw.parse::<i64>() {
        Ok(v) if (1..=MAX_TTL_MINUTES).contains(&v) => Ok(v),
        _ => Err(ConfigError::Invalid { name, value: raw }),
    }
}
