//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{
    CliArgs, Command, GlobalOverrides, InspectArgs, RebuildArgs, TreeArg, WarmArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pubcache";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 4;
const DEFAULT_CACHE_FILE_PATH: &str = "data/pubcache/content.json";
pub(crate) const DEFAULT_QUIET_PERIOD_MS: u64 = 4_000;
pub(crate) const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
pub(crate) const DEFAULT_FILE_CHECK_INTERVAL_MS: u64 = 1_000;
pub(crate) const DEFAULT_ROUTE_CACHE_LIMIT: usize = 10_000;
pub(crate) const DEFAULT_LEADERSHIP_KEY: i64 = 0x7075_6263;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Read and write the snapshot file at all.
    pub file_enabled: bool,
    pub file_path: PathBuf,
    /// Persist the snapshot after commits (debounced).
    pub continuously_update_file: bool,
    /// Reload the tree when another process rewrites the snapshot file.
    pub sync_from_file: bool,
    pub quiet_period: Duration,
    pub max_delay: Duration,
    pub file_check_interval: Duration,
    pub hide_top_level_node_from_path: bool,
    pub route_cache_limit: NonZeroUsize,
    /// Advisory lock key used for the single-writer election.
    pub leadership_key: i64,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("PUBCACHE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_global_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_global_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(path) = overrides.cache_file_path.as_ref() {
            self.cache.file_path = Some(path.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            cache,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let database = build_database_settings(database)?;
        let cache = build_cache_settings(cache)?;

        Ok(Self {
            logging,
            database,
            cache,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = database
        .max_connections
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);
    let max_connections = NonZeroU32::new(max_connections).ok_or_else(|| {
        LoadError::invalid("database.max_connections", "must be greater than zero")
    })?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let file_enabled = cache.file_enabled.unwrap_or(true);
    let continuously_update_file = cache.continuously_update_file.unwrap_or(true);
    let sync_from_file = cache.sync_from_file.unwrap_or(false);

    if continuously_update_file && sync_from_file {
        return Err(LoadError::invalid(
            "cache.sync_from_file",
            "cannot be enabled together with cache.continuously_update_file",
        ));
    }

    let file_path = cache
        .file_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_FILE_PATH));
    if file_enabled && file_path.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "cache.file_path",
            "path must not be empty",
        ));
    }

    let quiet_period_ms = cache.quiet_period_ms.unwrap_or(DEFAULT_QUIET_PERIOD_MS);
    if quiet_period_ms == 0 {
        return Err(LoadError::invalid(
            "cache.quiet_period_ms",
            "must be greater than zero",
        ));
    }

    let max_delay_ms = cache.max_delay_ms.unwrap_or(DEFAULT_MAX_DELAY_MS);
    if max_delay_ms < quiet_period_ms {
        return Err(LoadError::invalid(
            "cache.max_delay_ms",
            "must not be shorter than cache.quiet_period_ms",
        ));
    }

    let file_check_interval_ms = cache
        .file_check_interval_ms
        .unwrap_or(DEFAULT_FILE_CHECK_INTERVAL_MS);

    let route_cache_limit = cache
        .route_cache_limit
        .unwrap_or(DEFAULT_ROUTE_CACHE_LIMIT);
    let route_cache_limit = NonZeroUsize::new(route_cache_limit).ok_or_else(|| {
        LoadError::invalid("cache.route_cache_limit", "must be greater than zero")
    })?;

    Ok(CacheSettings {
        file_enabled,
        file_path,
        continuously_update_file,
        sync_from_file,
        quiet_period: Duration::from_millis(quiet_period_ms),
        max_delay: Duration::from_millis(max_delay_ms),
        file_check_interval: Duration::from_millis(file_check_interval_ms),
        hide_top_level_node_from_path: cache.hide_top_level_node_from_path.unwrap_or(true),
        route_cache_limit,
        leadership_key: cache.leadership_key.unwrap_or(DEFAULT_LEADERSHIP_KEY),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    file_enabled: Option<bool>,
    file_path: Option<PathBuf>,
    continuously_update_file: Option<bool>,
    sync_from_file: Option<bool>,
    quiet_period_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    file_check_interval_ms: Option<u64>,
    hide_top_level_node_from_path: Option<bool>,
    route_cache_limit: Option<usize>,
    leadership_key: Option<i64>,
}

#[cfg(test)]
mod tests;
