use crate::paths::AppDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const CURRENT_CONFIG_VERSION: u32 = 1;

/// Package id of the stock Lyricon host.
pub const DEFAULT_HOST_ID: &str = "io.github.proify.lyricon";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_config_version")]
    pub config_version: u32,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            bridge: BridgeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Identity of the host the provider registers with.
    #[serde(default = "default_host_id")]
    pub host_id: String,
    /// Overrides the platform runtime directory used for sockets and segments.
    #[serde(default)]
    pub runtime_dir: Option<PathBuf>,
    #[serde(default = "default_register_timeout_ms")]
    pub register_timeout_ms: u64,
    /// Upper bound for a single call on the control channel.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// How often a host samples the shared position segment.
    #[serde(default = "default_position_poll_ms")]
    pub position_poll_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host_id: default_host_id(),
            runtime_dir: None,
            register_timeout_ms: default_register_timeout_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            position_poll_ms: default_position_poll_ms(),
        }
    }
}

impl BridgeConfig {
    pub fn register_timeout(&self) -> Duration {
        Duration::from_millis(self.register_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn position_poll(&self) -> Duration {
        Duration::from_millis(self.position_poll_ms)
    }

    /// Runtime directory to use, honouring the override.
    pub fn resolve_runtime_dir(&self, dirs: &AppDirs) -> PathBuf {
        self.runtime_dir
            .clone()
            .unwrap_or_else(|| dirs.runtime_dir().to_path_buf())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
    #[serde(default = "default_max_log_files")]
    pub max_log_files: usize,
    #[serde(default = "default_stdout_enabled")]
    pub stdout: bool,
    #[serde(default)]
    pub file_name: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_log_files: default_max_log_files(),
            stdout: default_stdout_enabled(),
            file_name: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("config validation failed: {0}")]
    Validation(ValidationError),
    #[error("failed to prepare configuration directories: {0}")]
    Directories(#[from] crate::paths::DirsError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unsupported config_version {found}, expected {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("bridge.host_id must not be empty")]
    EmptyHostId,
    #[error("bridge.{field} must be greater than zero")]
    ZeroDuration { field: &'static str },
}

impl Config {
    pub fn load_or_default(dirs: &AppDirs) -> Result<Self, ConfigError> {
        dirs.ensure_exists()?;
        let path = Self::config_path(dirs);
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        Self::from_toml(&contents).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse { path, source },
            other => other,
        })
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    pub fn config_path(dirs: &AppDirs) -> PathBuf {
        dirs.config_dir().join("config.toml")
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.config_version != CURRENT_CONFIG_VERSION {
            return Err(ValidationError::UnsupportedVersion {
                found: self.config_version,
                expected: CURRENT_CONFIG_VERSION,
            });
        }
        if self.bridge.host_id.trim().is_empty() {
            return Err(ValidationError::EmptyHostId);
        }
        for (field, value) in [
            ("register_timeout_ms", self.bridge.register_timeout_ms),
            ("call_timeout_ms", self.bridge.call_timeout_ms),
            ("position_poll_ms", self.bridge.position_poll_ms),
        ] {
            if value == 0 {
                return Err(ValidationError::ZeroDuration { field });
            }
        }
        Ok(())
    }
}

fn default_config_version() -> u32 {
    CURRENT_CONFIG_VERSION
}

fn default_host_id() -> String {
    DEFAULT_HOST_ID.to_string()
}

fn default_register_timeout_ms() -> u64 {
    4000
}

fn default_call_timeout_ms() -> u64 {
    2000
}

fn default_position_poll_ms() -> u64 {
    16
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_max_log_files() -> usize {
    7
}

fn default_stdout_enabled() -> bool {
    true
}
