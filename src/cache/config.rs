//! Runtime cache configuration.
//!
//! Projected from the `[cache]` section of `pubcache.toml`; `Default` mirrors
//! the documented defaults so tests can build stores without a config file.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{
    CacheSettings, DEFAULT_FILE_CHECK_INTERVAL_MS, DEFAULT_MAX_DELAY_MS, DEFAULT_QUIET_PERIOD_MS,
    DEFAULT_ROUTE_CACHE_LIMIT,
};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Read the snapshot file at cold start (and write it, see below).
    pub file_enabled: bool,
    pub file_path: PathBuf,
    /// Write the snapshot file after commits.
    pub continuously_update_file: bool,
    /// Reload when the snapshot file is rewritten by another process.
    pub sync_from_file: bool,
    /// Quiet period before a pending write is flushed.
    pub quiet_period: Duration,
    /// Upper bound on how long a burst of commits can postpone a write.
    pub max_delay: Duration,
    /// Minimum interval between two modification-time checks of the file.
    pub file_check_interval: Duration,
    /// Drop the top-level segment from routes.
    pub hide_top_level_node_from_path: bool,
    /// Maximum cached id ⇄ route pairs.
    pub route_cache_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            file_enabled: false,
            file_path: PathBuf::from("content.json"),
            continuously_update_file: true,
            sync_from_file: false,
            quiet_period: Duration::from_millis(DEFAULT_QUIET_PERIOD_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            file_check_interval: Duration::from_millis(DEFAULT_FILE_CHECK_INTERVAL_MS),
            hide_top_level_node_from_path: true,
            route_cache_limit: DEFAULT_ROUTE_CACHE_LIMIT,
        }
    }
}

impl From<&CacheSettings> for CacheConfig {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            file_enabled: settings.file_enabled,
            file_path: settings.file_path.clone(),
            continuously_update_file: settings.continuously_update_file,
            sync_from_file: settings.sync_from_file,
            quiet_period: settings.quiet_period,
            max_delay: settings.max_delay,
            file_check_interval: settings.file_check_interval,
            hide_top_level_node_from_path: settings.hide_top_level_node_from_path,
            route_cache_limit: settings.route_cache_limit.get(),
        }
    }
}

impl CacheConfig {
    /// Default configuration with the snapshot file at `path`.
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            file_enabled: true,
            file_path: path.into(),
            ..Self::default()
        }
    }

    /// Returns true when commits should schedule a file write.
    pub fn persists_file(&self) -> bool {
        self.file_enabled && self.continuously_update_file
    }

    /// Returns the route cache limit as NonZeroUsize, clamping to 1 if zero.
    pub fn route_cache_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.route_cache_limit).unwrap_or(NonZeroUsize::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(!config.file_enabled);
        assert!(!config.persists_file());
        assert_eq!(config.quiet_period, Duration::from_secs(4));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.file_check_interval, Duration::from_secs(1));
        assert!(config.hide_top_level_node_from_path);
    }

    #[test]
    fn with_file_enables_persistence() {
        let config = CacheConfig::with_file("/tmp/content.json");
        assert!(config.persists_file());

        let read_only = CacheConfig {
            continuously_update_file: false,
            ..config
        };
        assert!(!read_only.persists_file());
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = CacheConfig {
            route_cache_limit: 0,
            ..Default::default()
        };
        assert_eq!(config.route_cache_limit_non_zero().get(), 1);
    }
}
