//! Config - TOML から読む実行設定
//!
//! 全フィールドにデフォルトがあるので、空ファイルでも起動できる。
//! CLI 側のフラグはここで読んだ値を上書きする。
//!
//! ```toml
//! strategy = "cooperative"
//! max_retry = 5
//! reader_capacity = 64
//! acquire_timeout_ms = 2000
//!
//! [load]
//! read = { min_ms = 100, max_ms = 200 }
//! write = { min_ms = 200, max_ms = 350 }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::app::LatencyProfile;
use crate::domain::RetryPolicy;
use crate::lock::{DrainMode, LockSettings, StrategyKind};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AugurConfig {
    pub strategy: StrategyKind,

    /// Attempts at or above this are fatal.
    pub max_retry: u32,
    pub redelivery_base_delay_ms: u64,
    pub redelivery_multiplier: f64,

    /// Cooperative strategy: max readers in flight.
    pub reader_capacity: u32,
    pub drain_mode: DrainMode,
    /// Unset waits forever.
    pub acquire_timeout_ms: Option<u64>,
    pub evict_idle_keys: bool,

    /// Past scores kept per key.
    pub history_window: usize,

    pub load: LatencyProfile,
}

impl Default for AugurConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        let lock = LockSettings::default();
        Self {
            strategy: lock.strategy,
            max_retry: retry.max_retry,
            redelivery_base_delay_ms: retry.base_delay.as_millis() as u64,
            redelivery_multiplier: retry.multiplier,
            reader_capacity: lock.reader_capacity,
            drain_mode: lock.drain_mode,
            acquire_timeout_ms: None,
            evict_idle_keys: lock.evict_idle_keys,
            history_window: 10,
            load: LatencyProfile::default(),
        }
    }
}

impl AugurConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn lock_settings(&self) -> LockSettings {
        LockSettings {
            strategy: self.strategy,
            reader_capacity: self.reader_capacity.max(1),
            drain_mode: self.drain_mode,
            acquire_timeout: self.acquire_timeout_ms.map(Duration::from_millis),
            evict_idle_keys: self.evict_idle_keys,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retry,
            Duration::from_millis(self.redelivery_base_delay_ms),
            self.redelivery_multiplier,
        )
    }

    pub fn latency_profile(&self) -> LatencyProfile {
        self.load
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::LatencyRange;

    #[test]
    fn empty_file_uses_defaults() {
        let config = AugurConfig::from_toml_str("").unwrap();
        assert_eq!(config, AugurConfig::default());
        assert_eq!(config.lock_settings(), LockSettings::default());
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.history_window, 10);
    }

    #[test]
    fn full_file_is_mapped_to_settings() {
        let config = AugurConfig::from_toml_str(
            r#"
            strategy = "cooperative"
            max_retry = 3
            redelivery_base_delay_ms = 250
            redelivery_multiplier = 1.5
            reader_capacity = 8
            drain_mode = "snapshot"
            acquire_timeout_ms = 1500
            evict_idle_keys = false
            history_window = 4

            [load]
            read = { min_ms = 1, max_ms = 2 }
            write = { min_ms = 3, max_ms = 4 }
            "#,
        )
        .unwrap();

        let lock = config.lock_settings();
        assert_eq!(lock.strategy, StrategyKind::Cooperative);
        assert_eq!(lock.reader_capacity, 8);
        assert_eq!(lock.drain_mode, DrainMode::Snapshot);
        assert_eq!(lock.acquire_timeout, Some(Duration::from_millis(1500)));
        assert!(!lock.evict_idle_keys);

        let retry = config.retry_policy();
        assert_eq!(retry.max_retry, 3);
        assert_eq!(retry.base_delay, Duration::from_millis(250));

        assert_eq!(config.latency_profile().write, LatencyRange::new(3, 4));
    }

    #[test]
    fn zero_reader_capacity_is_raised_to_one() {
        let config = AugurConfig::from_toml_str("reader_capacity = 0").unwrap();
        assert_eq!(config.lock_settings().reader_capacity, 1);
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let err = AugurConfig::from_toml_str(r#"strategy = "optimistic""#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn typo_in_field_name_is_rejected() {
        assert!(AugurConfig::from_toml_str("max_retries = 3").is_err());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = AugurConfig::load("/nonexistent/augur.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/augur.toml"));
    }
}
