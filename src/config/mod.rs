//! Configuration management for Harvest.
//!
//! Configuration is read from `~/.config/harvest/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.

use serde::Deserialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::request::{DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT};
use crate::domain::RequestDefaults;
use crate::transport::DEFAULT_WORKERS;

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub http: HttpConfig,
}

/// Transport settings applied to every request unless overridden per request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
    pub workers: usize,
    pub follow_redirects: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            workers: DEFAULT_WORKERS,
            follow_redirects: true,
        }
    }
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// If the config file exists but is invalid, returns an error.
    /// Missing fields in the config file will use default values.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
            return Ok(Self::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path. The file must exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the default config file path: `~/.config/harvest/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("harvest").join("config.toml"))
    }

    /// Write the commented default config to `path`, creating parent
    /// directories as needed. An existing file is left untouched.
    pub fn create_default_config(path: &Path) -> Result<bool, ConfigError> {
        if path.exists() {
            return Ok(false);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(true)
    }

    /// Generate the default config file content with comments.
    pub fn default_config_content() -> String {
        format!(
            r##"# Harvest Configuration
#
# Values under [http] are defaults; a request or manifest entry may
# override the timeout and redirect policy for itself.

[http]
# Per-request timeout in seconds
timeout_secs = {DEFAULT_TIMEOUT_SECS}

# User-Agent header sent with every request
user_agent = "{DEFAULT_USER_AGENT}"

# Maximum concurrent transfers for concurrent modules
workers = {DEFAULT_WORKERS}

# Follow HTTP redirects
follow_redirects = true
"##
        )
    }

    pub fn request_defaults(&self) -> RequestDefaults {
        RequestDefaults {
            timeout: Duration::from_secs(self.http.timeout_secs),
            user_agent: self.http.user_agent.clone(),
            follow_redirects: self.http.follow_redirects,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_deserializes() {
        let content = Config::default_config_content();
        let config: Config = toml::from_str(&content).expect("Default config should be valid TOML");

        assert_eq!(config.http, HttpConfig::default());
        assert_eq!(config.http.timeout_secs, 30);
        assert_eq!(config.http.workers, 10);
    }

    #[test]
    fn test_partial_config() {
        let content = r##"
[http]
timeout_secs = 5
"##;
        let config: Config = toml::from_str(content).expect("Partial config should work");

        assert_eq!(config.http.timeout_secs, 5);
        assert_eq!(config.http.user_agent, DEFAULT_USER_AGENT);
        assert!(config.http.follow_redirects);
    }

    #[test]
    fn test_empty_config() {
        let config: Config = toml::from_str("").expect("Empty config should work");
        assert_eq!(config.http, HttpConfig::default());
    }

    #[test]
    fn test_request_defaults() {
        let config: Config = toml::from_str(
            r#"
[http]
timeout_secs = 12
user_agent = "harvest-test/1.0"
follow_redirects = false
"#,
        )
        .unwrap();

        let defaults = config.request_defaults();
        assert_eq!(defaults.timeout, Duration::from_secs(12));
        assert_eq!(defaults.user_agent, "harvest-test/1.0");
        assert!(!defaults.follow_redirects);
    }

    #[test]
    fn test_create_and_load_from() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        assert!(Config::create_default_config(&path).unwrap());
        assert!(!Config::create_default_config(&path).unwrap());

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.http, HttpConfig::default());
    }

    #[test]
    fn test_load_from_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[http]\ntimeout_secs = \"soon\"\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_from(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
