// ABOUTME: Optional TOML configuration for store path and logging defaults
// ABOUTME: CLI flags override config values, which override built-in defaults

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "agency-sync.toml";
pub const DEFAULT_STORE_PATH: &str = "agency-sync.db";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub store_path: Option<PathBuf>,
    pub log: Option<String>,
}

impl Config {
    pub fn store_path(&self) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH))
    }
}

/// Loads configuration. An explicitly supplied path must exist; the default
/// agency-sync.toml in the working directory is optional.
pub fn load(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => read_config(path),
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            if default.exists() {
                read_config(default)
            } else {
                Ok(Config::default())
            }
        }
    }
}

fn read_config(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config from {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config: Config =
            toml::from_str("store_path = \"/var/lib/agency-sync/sync.db\"\nlog = \"debug\"")
                .unwrap();
        assert_eq!(
            config.store_path(),
            PathBuf::from("/var/lib/agency-sync/sync.db")
        );
        assert_eq!(config.log.as_deref(), Some("debug"));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.store_path(), PathBuf::from(DEFAULT_STORE_PATH));
        assert!(config.log.is_none());
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let result: std::result::Result<Config, _> = toml::from_str("store = \"typo.db\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_explicit_missing_path_is_an_error() {
        let result = load(Some(Path::new("/nonexistent/agency-sync.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agency-sync.toml");
        std::fs::write(&path, "log = \"warn\"").unwrap();
        let config = load(Some(&path)).unwrap();
        assert_eq!(config.log.as_deref(), Some("warn"));
    }
}
