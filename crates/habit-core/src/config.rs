//! Configuration for habit
//!
//! Stored in .habit/config.toml, with an optional per-user fallback in the
//! platform config directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// habit configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Points credited when a habit is marked done
    pub points_per_completion: u64,

    /// Upper bound for a single coordinator call, in milliseconds
    pub op_timeout_ms: u64,

    /// ID prefixes for new documents
    #[serde(default)]
    pub ids: IdConfig,

    /// Display settings
    #[serde(default)]
    pub display: DisplayConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            points_per_completion: 3,
            op_timeout_ms: 5000,
            ids: IdConfig::default(),
            display: DisplayConfig::default(),
        }
    }
}

/// ID prefix configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdConfig {
    pub user_prefix: String,
    pub habit_prefix: String,
    pub track_prefix: String,
}

impl Default for IdConfig {
    fn default() -> Self {
        Self {
            user_prefix: "usr".to_string(),
            habit_prefix: "hab".to_string(),
            track_prefix: "trk".to_string(),
        }
    }
}

/// Display configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Use colors in output
    pub colors: bool,

    /// Marker for completed habits
    pub done_marker: String,

    /// Marker for pending habits
    pub pending_marker: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            colors: true,
            done_marker: "[x]".to_string(),
            pending_marker: "[ ]".to_string(),
        }
    }
}

impl Config {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    /// Reject values the coordinator cannot work with
    pub fn validate(&self) -> crate::Result<()> {
        if self.op_timeout_ms == 0 {
            return Err(crate::Error::InvalidArgument(
                "op_timeout_ms must be greater than zero".into(),
            ));
        }
        for (field, prefix) in [
            ("ids.user_prefix", &self.ids.user_prefix),
            ("ids.habit_prefix", &self.ids.habit_prefix),
            ("ids.track_prefix", &self.ids.track_prefix),
        ] {
            if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(crate::Error::InvalidArgument(format!(
                    "{field} must be non-empty and alphanumeric, got {prefix:?}"
                )));
            }
        }
        Ok(())
    }

    /// Load config from a TOML file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Other(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the first config that exists: the store's own, then the user's
    /// global one, then defaults.
    pub fn resolve(data_dir: Option<&Path>) -> crate::Result<Self> {
        let candidates = data_dir
            .map(|dir| dir.join(crate::db::CONFIG_FILE))
            .into_iter()
            .chain(Self::global_path());

        for path in candidates {
            if path.exists() {
                tracing::debug!(path = %path.display(), "loading config");
                return Self::load(&path);
            }
        }
        Ok(Self::default())
    }

    /// Per-user config location, e.g. ~/.config/habit/config.toml
    pub fn global_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("habit").join(crate::db::CONFIG_FILE))
    }

    /// Save config to a TOML file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Other(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Generate a default config file with comments
    pub fn default_with_comments() -> String {
        r#"# habit configuration

# Points credited when a habit is marked done
points_per_completion = 3

# Upper bound for a single operation, in milliseconds
op_timeout_ms = 5000

[ids]
user_prefix = "usr"
habit_prefix = "hab"
track_prefix = "trk"

[display]
# Use colors in output
colors = true

# Markers used when printing a track
done_marker = "[x]"
pending_marker = "[ ]"
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commented_default_matches_default() {
        let parsed: Config = toml::from_str(&Config::default_with_comments()).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let parsed: Config = toml::from_str("points_per_completion = 5\n").unwrap();
        assert_eq!(parsed.points_per_completion, 5);
        assert_eq!(parsed.op_timeout_ms, 5000);
        assert_eq!(parsed.ids.habit_prefix, "hab");
    }

    #[test]
    fn test_load_rejects_zero_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "op_timeout_ms = 0\n").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.points_per_completion = 10;
        config.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }
}
