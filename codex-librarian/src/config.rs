//! Librarian tuning
//!
//! Built from the `[librarian]` table of `codex.toml`; every key is optional
//! and falls back to its default. Paths default to locations inside the root
//! folder.

use codex_common::config::{RootFolder, TomlConfig};
use codex_common::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// `[librarian]` keys as written in TOML
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LibrarianToml {
    settle_timeout_secs: Option<f64>,
    settle_poll_initial_secs: Option<f64>,
    status_throttle_secs: Option<f64>,
    notifier_debounce_secs: Option<f64>,
    search_index_delay_secs: Option<f64>,
    max_lock_wait_ms: Option<u64>,
    nightly_hour: Option<u32>,
    cover_cache_dir: Option<PathBuf>,
    backup_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct LibrarianConfig {
    /// Cap on waiting for files to stop growing before an import
    pub settle_timeout: Duration,
    /// First settle poll interval, doubled each poll
    pub settle_poll_initial: Duration,
    /// Minimum time between unforced status writes
    pub status_throttle: Duration,
    pub notifier_debounce: Duration,
    /// Delay before a queued search index update runs
    pub search_index_delay: Duration,
    /// Give up retrying a locked database write after this long
    pub max_lock_wait_ms: u64,
    /// Local hour (0-23) the nightly janitor runs
    pub nightly_hour: u32,
    pub cover_cache_dir: PathBuf,
    pub backup_dir: PathBuf,
}

impl LibrarianConfig {
    /// Defaults with cache and backups under the given root folder
    pub fn with_root(root: &RootFolder) -> Self {
        Self {
            settle_timeout: Duration::from_secs(60),
            settle_poll_initial: Duration::from_millis(250),
            status_throttle: Duration::from_secs(5),
            notifier_debounce: Duration::from_secs(1),
            search_index_delay: Duration::from_secs(5),
            max_lock_wait_ms: 10_000,
            nightly_hour: 0,
            cover_cache_dir: root.cover_cache_dir(),
            backup_dir: root.backup_dir(),
        }
    }

    /// Apply the `[librarian]` table, if any, over the defaults
    pub fn from_toml(root: &RootFolder, toml_config: &TomlConfig) -> Result<Self> {
        let mut config = Self::with_root(root);
        let Some(table) = &toml_config.librarian else {
            return Ok(config);
        };

        let parsed: LibrarianToml = toml::Value::Table(table.clone())
            .try_into()
            .map_err(|e| Error::ConfigValue {
                key: "librarian".into(),
                reason: e.to_string(),
            })?;

        if let Some(secs) = parsed.settle_timeout_secs {
            config.settle_timeout = seconds("settle_timeout_secs", secs)?;
        }
        if let Some(secs) = parsed.settle_poll_initial_secs {
            config.settle_poll_initial = seconds("settle_poll_initial_secs", secs)?;
        }
        if let Some(secs) = parsed.status_throttle_secs {
            config.status_throttle = seconds("status_throttle_secs", secs)?;
        }
        if let Some(secs) = parsed.notifier_debounce_secs {
            config.notifier_debounce = seconds("notifier_debounce_secs", secs)?;
        }
        if let Some(secs) = parsed.search_index_delay_secs {
            config.search_index_delay = seconds("search_index_delay_secs", secs)?;
        }
        if let Some(ms) = parsed.max_lock_wait_ms {
            config.max_lock_wait_ms = ms;
        }
        if let Some(hour) = parsed.nightly_hour {
            if hour > 23 {
                return Err(Error::ConfigValue {
                    key: "nightly_hour".into(),
                    reason: format!("must be 0-23, got {}", hour),
                });
            }
            config.nightly_hour = hour;
        }
        if let Some(dir) = parsed.cover_cache_dir {
            config.cover_cache_dir = dir;
        }
        if let Some(dir) = parsed.backup_dir {
            config.backup_dir = dir;
        }

        info!(
            settle_timeout_secs = config.settle_timeout.as_secs_f64(),
            nightly_hour = config.nightly_hour,
            "Loaded librarian config"
        );
        Ok(config)
    }
}

fn seconds(key: &str, value: f64) -> Result<Duration> {
    if !value.is_finite() || value < 0.0 {
        return Err(Error::ConfigValue {
            key: key.into(),
            reason: "must be a non-negative number".into(),
        });
    }
    Ok(Duration::from_secs_f64(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> RootFolder {
        RootFolder::new(PathBuf::from("/srv/codex"))
    }

    #[test]
    fn test_defaults_without_table() {
        let config = LibrarianConfig::from_toml(&root(), &TomlConfig::default()).unwrap();
        assert_eq!(config.settle_timeout, Duration::from_secs(60));
        assert_eq!(config.status_throttle, Duration::from_secs(5));
        assert_eq!(config.cover_cache_dir, PathBuf::from("/srv/codex/cache/covers"));
        assert_eq!(config.backup_dir, PathBuf::from("/srv/codex/backups"));
    }

    #[test]
    fn test_table_overrides() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [librarian]
            settle_timeout_secs = 2.5
            nightly_hour = 3
            backup_dir = "/mnt/backups"
            "#,
        )
        .unwrap();

        let config = LibrarianConfig::from_toml(&root(), &toml_config).unwrap();
        assert_eq!(config.settle_timeout, Duration::from_millis(2500));
        assert_eq!(config.nightly_hour, 3);
        assert_eq!(config.backup_dir, PathBuf::from("/mnt/backups"));
        assert_eq!(config.search_index_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let bad_hour: TomlConfig = toml::from_str("[librarian]\nnightly_hour = 24\n").unwrap();
        assert!(matches!(
            LibrarianConfig::from_toml(&root(), &bad_hour),
            Err(Error::ConfigValue { key, .. }) if key == "nightly_hour"
        ));

        let unknown: TomlConfig = toml::from_str("[librarian]\nsettle = 1\n").unwrap();
        assert!(LibrarianConfig::from_toml(&root(), &unknown).is_err());

        let negative: TomlConfig =
            toml::from_str("[librarian]\nstatus_throttle_secs = -1.0\n").unwrap();
        assert!(LibrarianConfig::from_toml(&root(), &negative).is_err());
    }
}
