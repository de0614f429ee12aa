//! Service configuration.
//!
//! `ServiceConfig` can be built from defaults, a JSON file, or `CHANSYNC_*`
//! environment variables:
//!
//! | Variable                          | Field                     |
//! |-----------------------------------|---------------------------|
//! | `CHANSYNC_DATA_DIR`               | `data_dir`                |
//! | `CHANSYNC_DOWNLOAD_DIR`           | `download_directory`      |
//! | `CHANSYNC_SEARCH_WINDOW_SECS`     | `distant_search_secs`     |
//! | `CHANSYNC_LOCAL_SEARCH_SECS`      | `local_search_secs`       |
//! | `CHANSYNC_TOKEN_RETENTION_SECS`   | `token_retention_secs`    |
//! | `CHANSYNC_MAX_ORPHANS`            | `max_orphans`             |
//! | `CHANSYNC_CIRCLES`                | `defined_circles` (comma) |
//! | `CHANSYNC_FRIEND_GROUPS`          | `friend_groups` (comma)   |

use crate::channel::constants::{
    DEFAULT_DISTANT_SEARCH_SECS, DEFAULT_LOCAL_SEARCH_SECS, DEFAULT_TOKEN_RETENTION_SECS,
    MAX_ORPHANS,
};
use crate::channel::types::CircleId;
use crate::error::{ChansyncError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Runtime configuration of a channel engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Directory holding the RocksDB store and the keyring file.
    pub data_dir: PathBuf,
    /// Default download directory for channels without an override.
    pub download_directory: PathBuf,
    /// Default window for overlay searches and channel requests.
    pub distant_search_secs: u64,
    /// Default window for local searches.
    pub local_search_secs: u64,
    /// How long completed token results wait to be fetched.
    pub token_retention_secs: u64,
    /// Orphan buffer capacity.
    pub max_orphans: usize,
    /// Circles that `External` channels may name.
    pub defined_circles: Vec<CircleId>,
    /// Local friend groups that `NodesGroup` channels may name.
    pub friend_groups: Vec<CircleId>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".chansync"),
            download_directory: PathBuf::from("downloads"),
            distant_search_secs: DEFAULT_DISTANT_SEARCH_SECS,
            local_search_secs: DEFAULT_LOCAL_SEARCH_SECS,
            token_retention_secs: DEFAULT_TOKEN_RETENTION_SECS,
            max_orphans: MAX_ORPHANS,
            defined_circles: Vec::new(),
            friend_groups: Vec::new(),
        }
    }
}

impl ServiceConfig {
    /// Loads a configuration from a JSON file. Missing fields take defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            ChansyncError::config(format!("Invalid config file {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a configuration from `CHANSYNC_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("CHANSYNC_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("CHANSYNC_DOWNLOAD_DIR") {
            config.download_directory = PathBuf::from(dir);
        }
        if let Some(value) = lookup("CHANSYNC_SEARCH_WINDOW_SECS") {
            config.distant_search_secs = parse_var("CHANSYNC_SEARCH_WINDOW_SECS", &value)?;
        }
        if let Some(value) = lookup("CHANSYNC_LOCAL_SEARCH_SECS") {
            config.local_search_secs = parse_var("CHANSYNC_LOCAL_SEARCH_SECS", &value)?;
        }
        if let Some(value) = lookup("CHANSYNC_TOKEN_RETENTION_SECS") {
            config.token_retention_secs = parse_var("CHANSYNC_TOKEN_RETENTION_SECS", &value)?;
        }
        if let Some(value) = lookup("CHANSYNC_MAX_ORPHANS") {
            config.max_orphans = parse_var("CHANSYNC_MAX_ORPHANS", &value)?;
        }
        if let Some(value) = lookup("CHANSYNC_CIRCLES") {
            config.defined_circles = parse_list(&value);
        }
        if let Some(value) = lookup("CHANSYNC_FRIEND_GROUPS") {
            config.friend_groups = parse_list(&value);
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects windows of zero length.
    pub fn validate(&self) -> Result<()> {
        if self.distant_search_secs == 0 || self.local_search_secs == 0 {
            return Err(ChansyncError::config("Search windows must be at least one second"));
        }
        if self.token_retention_secs == 0 {
            return Err(ChansyncError::config("Token retention must be at least one second"));
        }
        Ok(())
    }

    /// Default overlay search window.
    pub fn distant_search_window(&self) -> Duration {
        Duration::from_secs(self.distant_search_secs)
    }

    /// Default local search window.
    pub fn local_search_window(&self) -> Duration {
        Duration::from_secs(self.local_search_secs)
    }

    /// Token result retention.
    pub fn token_retention(&self) -> Duration {
        Duration::from_secs(self.token_retention_secs)
    }

    /// Path of the RocksDB store.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("store")
    }

    /// Path of the keyring file.
    pub fn keyring_path(&self) -> PathBuf {
        self.data_dir.join("keyring.bin")
    }

    /// Returns true if `id` names a defined circle.
    pub fn is_defined_circle(&self, id: &CircleId) -> bool {
        self.defined_circles.contains(id)
    }

    /// Returns true if `id` names a local friend group.
    pub fn is_friend_group(&self, id: &CircleId) -> bool {
        self.friend_groups.contains(id)
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ChansyncError::config(format!("Invalid {}: {}", name, e)))
}

fn parse_list(value: &str) -> Vec<CircleId> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(CircleId::new)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.distant_search_window(), Duration::from_secs(300));
        assert_eq!(config.local_search_window(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("CHANSYNC_DATA_DIR", "/var/lib/chansync"),
            ("CHANSYNC_SEARCH_WINDOW_SECS", "60"),
            ("CHANSYNC_CIRCLES", "alpha, beta,,"),
            ("CHANSYNC_FRIEND_GROUPS", "family"),
        ]
        .into_iter()
        .collect();

        let config =
            ServiceConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/chansync"));
        assert_eq!(config.distant_search_secs, 60);
        assert_eq!(
            config.defined_circles,
            vec![CircleId::new("alpha"), CircleId::new("beta")]
        );
        assert!(config.is_friend_group(&CircleId::new("family")));
        assert_eq!(config.keyring_path(), PathBuf::from("/var/lib/chansync/keyring.bin"));
    }

    #[test]
    fn test_bad_number_is_config_error() {
        let result = ServiceConfig::from_lookup(|key| {
            (key == "CHANSYNC_LOCAL_SEARCH_SECS").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(ChansyncError::Config(_))));
    }

    #[test]
    fn test_zero_window_rejected() {
        let result = ServiceConfig::from_lookup(|key| {
            (key == "CHANSYNC_SEARCH_WINDOW_SECS").then(|| "0".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_from_file_with_partial_fields() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "local_search_secs": 5, "defined_circles": ["engineering"] }"#,
        )
        .unwrap();

        let config = ServiceConfig::from_file(&path).unwrap();
        assert_eq!(config.local_search_secs, 5);
        assert_eq!(config.distant_search_secs, 300);
        assert!(config.is_defined_circle(&CircleId::new("engineering")));
    }
}
