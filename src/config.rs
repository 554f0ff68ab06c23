//! Streamer configuration
//!
//! Read once from the environment (after `.env` is loaded) and validated
//! before any connection is opened. Every other component receives the
//! typed struct, never the raw environment.

use chrono_tz::Tz;
use sea_orm::sqlx::postgres::PgConnectOptions;
use sea_orm::sqlx::ConnectOptions as _;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Environment variable for the DuckDB source file
pub const ENV_DUCKDB_PATH: &str = "DUCKDB_PATH";
pub const ENV_DB_HOST: &str = "DB_HOST";
pub const ENV_DB_PORT: &str = "DB_PORT";
pub const ENV_DB_NAME: &str = "DB_NAME";
pub const ENV_DB_USER: &str = "DB_USER";
pub const ENV_DB_PASSWORD: &str = "DB_PASSWORD";
pub const ENV_START_OFFSET_DAYS: &str = "START_OFFSET_DAYS";
pub const ENV_BATCH_SIZE_HOURS: &str = "BATCH_SIZE_HOURS";
pub const ENV_CATCHUP_THRESHOLD_HOURS: &str = "CATCHUP_THRESHOLD_HOURS";
pub const ENV_CATCHUP_BATCH_HOURS: &str = "CATCHUP_BATCH_HOURS";
pub const ENV_TIMEZONE: &str = "TZ";
pub const ENV_CONNECT_MAX_RETRIES: &str = "CONNECT_MAX_RETRIES";
pub const ENV_CONNECT_RETRY_DELAY_SECS: &str = "CONNECT_RETRY_DELAY_SECS";
pub const ENV_VIEW_STALENESS_WARN_HOURS: &str = "VIEW_STALENESS_WARN_HOURS";
pub const ENV_RUN_MIGRATIONS: &str = "RUN_MIGRATIONS";

const DEFAULT_DUCKDB_PATH: &str = "/app/data/prod_hourly_data.duckdb";
const DEFAULT_DB_HOST: &str = "localhost";
const DEFAULT_DB_PORT: u16 = 5432;
const DEFAULT_DB_NAME: &str = "volve_production";
const DEFAULT_DB_USER: &str = "flodata";
const DEFAULT_DB_PASSWORD: &str = "flodata_secret";

/// 7 days per batch during the historical load
const DEFAULT_BATCH_SIZE_HOURS: u32 = 168;
const DEFAULT_CATCHUP_THRESHOLD_HOURS: u32 = 2;
const DEFAULT_CATCHUP_BATCH_HOURS: u32 = 24;
const DEFAULT_CONNECT_MAX_RETRIES: u32 = 30;
const DEFAULT_CONNECT_RETRY_DELAY_SECS: u64 = 2;
const DEFAULT_VIEW_STALENESS_WARN_HOURS: u32 = 24;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be an integer, got {value:?}")]
    InvalidNumber { key: &'static str, value: String },

    #[error("{key} must be greater than zero")]
    Zero { key: &'static str },

    #[error("Unknown timezone {0:?}")]
    UnknownTimezone(String),

    #[error("{key} must be true or false, got {value:?}")]
    InvalidFlag { key: &'static str, value: String },
}

/// Connection settings for the Postgres/TimescaleDB sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl SinkConfig {
    /// Whether `host` names a Unix socket directory (Cloud SQL on Cloud Run).
    pub fn is_unix_socket(&self) -> bool {
        self.host.starts_with('/')
    }

    /// Connection options with each credential passed as its own field, so
    /// reserved URL characters in passwords need no escaping.
    pub fn connect_options(&self) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .username(&self.user)
            .password(&self.password)
            .database(&self.database);

        let options = if self.is_unix_socket() {
            options.socket(&self.host)
        } else {
            options.host(&self.host).port(self.port)
        };
        options.disable_statement_logging()
    }

    /// Location for logs, without the password.
    pub fn display_target(&self) -> String {
        if self.is_unix_socket() {
            format!("{} (socket) / {}", self.host, self.database)
        } else {
            format!("{}:{}/{}", self.host, self.port, self.database)
        }
    }
}

/// Replay pacing settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayConfig {
    /// Days into the dataset that map to "today"; 0 streams from the first record
    pub start_offset_days: u32,
    pub batch_size_hours: u32,
    pub catchup_threshold_hours: u32,
    pub catchup_batch_hours: u32,
    /// Clock used for hour-boundary and midnight arithmetic
    pub timezone: Tz,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            start_offset_days: 0,
            batch_size_hours: DEFAULT_BATCH_SIZE_HOURS,
            catchup_threshold_hours: DEFAULT_CATCHUP_THRESHOLD_HOURS,
            catchup_batch_hours: DEFAULT_CATCHUP_BATCH_HOURS,
            timezone: Tz::UTC,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamerConfig {
    pub duckdb_path: PathBuf,
    pub sink: SinkConfig,
    pub replay: ReplayConfig,
    pub connect_max_retries: u32,
    pub connect_retry_delay: Duration,
    pub view_staleness_warn_hours: u32,
    pub run_migrations: bool,
}

impl StreamerConfig {
    /// Build the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let sink = SinkConfig {
            host: text(ENV_DB_HOST, DEFAULT_DB_HOST),
            port: parse_number(&lookup, ENV_DB_PORT, DEFAULT_DB_PORT)?,
            database: text(ENV_DB_NAME, DEFAULT_DB_NAME),
            user: text(ENV_DB_USER, DEFAULT_DB_USER),
            password: text(ENV_DB_PASSWORD, DEFAULT_DB_PASSWORD),
        };

        let tz_name = text(ENV_TIMEZONE, "UTC");
        let timezone: Tz = tz_name
            .parse()
            .map_err(|_| ConfigError::UnknownTimezone(tz_name.clone()))?;

        let replay = ReplayConfig {
            start_offset_days: parse_number(&lookup, ENV_START_OFFSET_DAYS, 0)?,
            batch_size_hours: parse_positive(&lookup, ENV_BATCH_SIZE_HOURS, DEFAULT_BATCH_SIZE_HOURS)?,
            catchup_threshold_hours: parse_number(
                &lookup,
                ENV_CATCHUP_THRESHOLD_HOURS,
                DEFAULT_CATCHUP_THRESHOLD_HOURS,
            )?,
            catchup_batch_hours: parse_positive(
                &lookup,
                ENV_CATCHUP_BATCH_HOURS,
                DEFAULT_CATCHUP_BATCH_HOURS,
            )?,
            timezone,
        };

        let run_migrations = match lookup(ENV_RUN_MIGRATIONS) {
            None => true,
            Some(v) => match v.trim().to_lowercase().as_str() {
                "" | "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => {
                    return Err(ConfigError::InvalidFlag {
                        key: ENV_RUN_MIGRATIONS,
                        value: v,
                    })
                }
            },
        };

        Ok(Self {
            duckdb_path: PathBuf::from(text(ENV_DUCKDB_PATH, DEFAULT_DUCKDB_PATH)),
            sink,
            replay,
            connect_max_retries: parse_positive(
                &lookup,
                ENV_CONNECT_MAX_RETRIES,
                DEFAULT_CONNECT_MAX_RETRIES,
            )?,
            connect_retry_delay: Duration::from_secs(parse_number(
                &lookup,
                ENV_CONNECT_RETRY_DELAY_SECS,
                DEFAULT_CONNECT_RETRY_DELAY_SECS,
            )?),
            view_staleness_warn_hours: parse_positive(
                &lookup,
                ENV_VIEW_STALENESS_WARN_HOURS,
                DEFAULT_VIEW_STALENESS_WARN_HOURS,
            )?,
            run_migrations,
        })
    }
}

fn parse_number<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidNumber {
            key,
            value: raw,
        }),
    }
}

fn parse_positive<F>(lookup: &F, key: &'static str, default: u32) -> Result<u32, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = parse_number(lookup, key, default)?;
    if value == 0 {
        return Err(ConfigError::Zero { key });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<StreamerConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        StreamerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_env_not_set() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.replay.start_offset_days, 0);
        assert_eq!(config.replay.batch_size_hours, 168);
        assert_eq!(config.replay.catchup_threshold_hours, 2);
        assert_eq!(config.replay.catchup_batch_hours, 24);
        assert_eq!(config.replay.timezone, Tz::UTC);
        assert_eq!(config.sink.port, 5432);
        assert_eq!(config.sink.database, "volve_production");
        assert_eq!(config.connect_max_retries, 30);
        assert_eq!(config.connect_retry_delay, Duration::from_secs(2));
        assert!(config.run_migrations);
    }

    #[test]
    fn test_loads_environment_variables() {
        let config = config_from(&[
            ("START_OFFSET_DAYS", "730"),
            ("BATCH_SIZE_HOURS", "336"),
            ("TZ", "Asia/Kuala_Lumpur"),
            ("RUN_MIGRATIONS", "false"),
        ])
        .unwrap();

        assert_eq!(config.replay.start_offset_days, 730);
        assert_eq!(config.replay.batch_size_hours, 336);
        assert_eq!(config.replay.timezone, chrono_tz::Asia::Kuala_Lumpur);
        assert!(!config.run_migrations);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert_eq!(
            config_from(&[("START_OFFSET_DAYS", "-5")]),
            Err(ConfigError::InvalidNumber {
                key: ENV_START_OFFSET_DAYS,
                value: "-5".to_string()
            })
        );
        assert_eq!(
            config_from(&[("CATCHUP_BATCH_HOURS", "0")]),
            Err(ConfigError::Zero {
                key: ENV_CATCHUP_BATCH_HOURS
            })
        );
        assert!(matches!(
            config_from(&[("TZ", "Mars/Olympus_Mons")]),
            Err(ConfigError::UnknownTimezone(_))
        ));
    }

    #[test]
    fn test_connect_options_tcp() {
        let config = config_from(&[("DB_HOST", "db.internal"), ("DB_PORT", "6543")]).unwrap();
        let options = config.sink.connect_options();

        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_username(), "flodata");
        assert_eq!(options.get_database(), Some("volve_production"));
    }

    #[test]
    fn test_password_with_reserved_characters_keeps_target() {
        let config = config_from(&[
            ("DB_HOST", "db.internal"),
            ("DB_PASSWORD", "p@ss#word/?:x"),
            ("DB_USER", "stream:er"),
        ])
        .unwrap();
        let options = config.sink.connect_options();

        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 5432);
        assert_eq!(options.get_username(), "stream:er");
        assert_eq!(options.get_database(), Some("volve_production"));
        assert!(!config.sink.display_target().contains("p@ss"));
    }

    #[test]
    fn test_connect_options_cloud_sql_socket() {
        let config = config_from(&[("DB_HOST", "/cloudsql/proj:region:inst")]).unwrap();
        let options = config.sink.connect_options();

        assert!(config.sink.is_unix_socket());
        assert_eq!(
            options.get_socket(),
            Some(&PathBuf::from("/cloudsql/proj:region:inst"))
        );
        assert_eq!(options.get_database(), Some("volve_production"));
    }
}
