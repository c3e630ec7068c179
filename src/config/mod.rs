//! Configuration management for runnel.
//!
//! Configuration is read from `~/.config/runnel/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.

use serde::Deserialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{DEFAULT_CAPACITY, DEFAULT_TTL};
use crate::fetcher::http_client::{DEFAULT_TIMEOUT, DEFAULT_USER_AGENT};

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheSettings,
    pub http: HttpSettings,
    pub negative_cache: NegativeCacheSettings,
}

/// Engine behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Distinct feeds counted before the hit counter is flushed
    pub counter_max: usize,
    /// Always GET, ignoring stored ETags
    pub force: bool,
    /// Capacity of each pipeline channel
    pub high_water_mark: usize,
    /// Pause before every request, in milliseconds
    pub delay_ms: u64,
    /// Emit records as objects rather than JSON text
    pub object_mode: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            counter_max: 500,
            force: false,
            high_water_mark: 16,
            delay_ms: 0,
            object_mode: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Connect and read timeout in seconds
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl HttpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Redirect and failure caches.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NegativeCacheSettings {
    pub redirect_ttl_secs: u64,
    pub failure_ttl_secs: u64,
    /// Entries kept per cache before the least recently used is evicted
    pub capacity: usize,
}

impl Default for NegativeCacheSettings {
    fn default() -> Self {
        Self {
            redirect_ttl_secs: DEFAULT_TTL.as_secs(),
            failure_ttl_secs: DEFAULT_TTL.as_secs(),
            capacity: DEFAULT_CAPACITY,
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
        Self::load_from(&Self::default_config_path()?)
    }

    /// Load from `path`, creating it with defaults when absent.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            Self::create_default_config(path)?;
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the default config file path: `~/.config/runnel/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("runnel").join("config.toml"))
    }

    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
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

        Ok(())
    }

    /// Generate the default config file content with comments.
    fn default_config_content() -> String {
        format!(
            r##"# runnel configuration

[cache]
# Distinct feeds the hit counter tracks before it is flushed to the rank index
counter_max = 500

# Always GET feeds, skipping ETag checks
force = false

# Capacity of each pipeline channel; producers wait when it is full
high_water_mark = 16

# Pause before every request (milliseconds)
delay_ms = 0

# Emit records as objects (true) or as JSON text (false)
object_mode = true

[http]
# Connect and read timeout (seconds)
timeout_secs = {timeout}

user_agent = "{user_agent}"

[negative_cache]
# How long a redirect is remembered (seconds)
redirect_ttl_secs = {ttl}

# How long a failed request is not retried (seconds)
failure_ttl_secs = {ttl}

# Entries kept per cache
capacity = {capacity}
"##,
            timeout = DEFAULT_TIMEOUT.as_secs(),
            user_agent = DEFAULT_USER_AGENT,
            ttl = DEFAULT_TTL.as_secs(),
            capacity = DEFAULT_CAPACITY,
        )
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
