//! Engine configuration
//!
//! Resolution order: defaults < TOML file < `TESSERA_*` environment variables.
//!
//! ```toml
//! mode = "debug"
//! handle_growth_constant = 32
//! closed_handles_queue_max_size = 1024
//! check_handles = true
//! fatal_policy = "abort"
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::universal::DEFAULT_GROWTH_CONSTANT;

/// Default capacity of the debug layer's closed-handle history
pub const DEFAULT_CLOSED_HANDLES_QUEUE_MAX_SIZE: usize = 1024;

/// Environment variable selecting the context mode
pub const ENV_MODE: &str = "TESSERA_MODE";
/// Environment variable overriding `closed_handles_queue_max_size`
pub const ENV_CLOSED_HANDLES_QUEUE_MAX_SIZE: &str = "TESSERA_CLOSED_HANDLES_QUEUE_MAX_SIZE";
/// Environment variable overriding `handle_growth_constant`
pub const ENV_HANDLE_GROWTH_CONSTANT: &str = "TESSERA_HANDLE_GROWTH_CONSTANT";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Mode string is not one of the known modes
    #[error("Unknown mode '{0}' (expected universal, debug or trace)")]
    UnknownMode(String),

    /// Environment override could not be parsed
    #[error("Invalid value '{value}' for {key}")]
    InvalidValue {
        /// Variable name
        key: String,
        /// Rejected value
        value: String,
    },

    /// Failed to read the config file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values parse but make no sense together
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Which context extensions are loaded against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Plain handle table, no checks beyond validity
    #[default]
    Universal,
    /// Every handle wrapped and audited
    Debug,
    /// Every call counted and timed
    Trace,
}

impl Mode {
    /// All modes
    pub const ALL: [Mode; 3] = [Mode::Universal, Mode::Debug, Mode::Trace];

    /// Lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Universal => "universal",
            Mode::Debug => "debug",
            Mode::Trace => "trace",
        }
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "universal" => Ok(Mode::Universal),
            "debug" => Ok(Mode::Debug),
            "trace" => Ok(Mode::Trace),
            other => Err(ConfigError::UnknownMode(other.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens after a fatal diagnostic has been printed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FatalPolicy {
    /// `std::process::abort()`
    #[default]
    Abort,
    /// Unwind with a panic (embedding, tests)
    Panic,
}

/// Engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default mode for `Runtime::default_context`
    pub mode: Mode,
    /// Extra slots added on each handle table growth
    pub handle_growth_constant: usize,
    /// Hard cap on handle table slots (`None` = unbounded)
    pub max_handle_slots: Option<usize>,
    /// How many closed debug handles are remembered
    pub closed_handles_queue_max_size: usize,
    /// Treat invalid handles in universal mode as fatal
    pub check_handles: bool,
    /// Abort or panic on fatal errors
    pub fatal_policy: FatalPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Universal,
            handle_growth_constant: DEFAULT_GROWTH_CONSTANT,
            max_handle_slots: None,
            closed_handles_queue_max_size: DEFAULT_CLOSED_HANDLES_QUEUE_MAX_SIZE,
            check_handles: cfg!(debug_assertions),
            fatal_policy: FatalPolicy::Abort,
        }
    }
}

impl EngineConfig {
    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load a TOML file, then apply environment overrides
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env()?;
        Ok(config)
    }

    /// Parse a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse TOML content
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `TESSERA_*` overrides from the process environment
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source
    pub fn apply_vars<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = lookup(ENV_MODE) {
            self.mode = mode.trim().parse()?;
        }
        if let Some(value) = lookup(ENV_CLOSED_HANDLES_QUEUE_MAX_SIZE) {
            self.closed_handles_queue_max_size =
                parse_usize(ENV_CLOSED_HANDLES_QUEUE_MAX_SIZE, &value)?;
        }
        if let Some(value) = lookup(ENV_HANDLE_GROWTH_CONSTANT) {
            self.handle_growth_constant = parse_usize(ENV_HANDLE_GROWTH_CONSTANT, &value)?;
        }
        self.validate()
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.handle_growth_constant == 0 {
            return Err(ConfigError::Invalid(
                "handle_growth_constant must be at least 1".to_string(),
            ));
        }
        if self.max_handle_slots == Some(0) {
            return Err(ConfigError::Invalid(
                "max_handle_slots must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
}
