//! Settings loaded with Figment
//!
//! Configuration is read from a TOML file and then overridden by environment
//! variables prefixed with `TSPDAQ_`. Nested keys are separated by a double
//! underscore:
//!
//! ```text
//! TSPDAQ_INSTRUMENT__ADDRESS=/dev/ttyUSB1
//! TSPDAQ_INSTRUMENT__TIMEOUT_MS=20000
//! TSPDAQ_APPLICATION__LOG_LEVEL=debug
//! ```
//!
//! Every field has a default, so an empty or missing file yields a working
//! configuration for a K2636 on `/dev/ttyUSB0`.

use crate::instrument::session::{SessionConfig, TransportKind};
use crate::measurement::{ScriptCatalog, SweepRunner};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "config/tsp_daq.toml";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "TSPDAQ_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read or deserialized
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),
    /// Values loaded but are unusable
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Settings {
    /// `[application]`
    #[serde(default)]
    pub application: ApplicationSettings,
    /// `[instrument]`
    #[serde(default)]
    pub instrument: InstrumentSettings,
    /// `[scripts]`
    #[serde(default)]
    pub scripts: ScriptSettings,
    /// `[sweep]`
    #[serde(default)]
    pub sweep: SweepSettings,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Name shown in the startup log
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory for tab-separated result files
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

/// Instrument link configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSettings {
    /// Serial port path (e.g., "/dev/ttyUSB0", "COM3")
    #[serde(default = "default_address")]
    pub address: String,
    /// Link type; `mock` runs without hardware
    #[serde(default)]
    pub transport: TransportKind,
    /// Appended to every command
    #[serde(default = "default_write_terminator")]
    pub write_terminator: String,
    /// Must be a single character
    #[serde(default = "default_read_terminator")]
    pub read_terminator: String,
    /// Serial baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Response timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Send `*IDN?` when connecting
    #[serde(default)]
    pub identify: bool,
}

/// Script catalogue configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptSettings {
    /// Directory holding the measurement scripts
    #[serde(default = "default_script_dir")]
    pub directory: PathBuf,
}

/// Sweep behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SweepSettings {
    /// Delay between starting a script and reading its buffers
    #[serde(default)]
    pub readback_delay_ms: u64,
    /// Accept sweeps that return no samples
    #[serde(default)]
    pub allow_empty: bool,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_name() -> String {
    "TSP DAQ".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_address() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_write_terminator() -> String {
    "\r\n".to_string()
}

fn default_read_terminator() -> String {
    "\n".to_string()
}

fn default_baud_rate() -> u32 {
    57600
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_script_dir() -> PathBuf {
    PathBuf::from("TSP-scripts")
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            output_dir: default_output_dir(),
        }
    }
}

impl Default for InstrumentSettings {
    fn default() -> Self {
        Self {
            address: default_address(),
            transport: TransportKind::default(),
            write_terminator: default_write_terminator(),
            read_terminator: default_read_terminator(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            identify: false,
        }
    }
}

impl Default for ScriptSettings {
    fn default() -> Self {
        Self {
            directory: default_script_dir(),
        }
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl Settings {
    /// Load configuration from the default path and the environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// Precedence, highest first: `TSPDAQ_` environment variables, the file,
    /// built-in defaults. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file cannot be parsed or validation fails.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings: Self = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ConfigError::LoadError(Box::new(e)))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration after loading
    ///
    /// # Errors
    ///
    /// Returns a ConfigError with a descriptive message for any validation failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let instrument = &self.instrument;
        if instrument.address.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "instrument.address cannot be empty".to_string(),
            ));
        }
        if instrument.baud_rate == 0 {
            return Err(ConfigError::ValidationError(
                "instrument.baud_rate must be greater than 0".to_string(),
            ));
        }
        if instrument.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "instrument.timeout_ms must be greater than 0".to_string(),
            ));
        }
        if instrument.write_terminator.is_empty() {
            return Err(ConfigError::ValidationError(
                "instrument.write_terminator cannot be empty".to_string(),
            ));
        }
        if instrument.read_terminator.chars().count() != 1 {
            return Err(ConfigError::ValidationError(format!(
                "instrument.read_terminator must be a single character, got {:?}",
                instrument.read_terminator
            )));
        }

        Ok(())
    }

    /// Session parameters for the configured instrument
    pub fn session_config(&self) -> SessionConfig {
        let instrument = &self.instrument;
        SessionConfig {
            address: instrument.address.clone(),
            transport: instrument.transport,
            write_terminator: instrument.write_terminator.clone(),
            // Validated to hold exactly one character
            read_terminator: instrument.read_terminator.chars().next().unwrap_or('\n'),
            baud_rate: instrument.baud_rate,
            timeout: Duration::from_millis(instrument.timeout_ms),
            identify: instrument.identify,
        }
    }

    /// Sweep runner over the configured script directory
    pub fn sweep_runner(&self) -> SweepRunner {
        SweepRunner::new(ScriptCatalog::new(&self.scripts.directory))
            .with_readback_delay(Duration::from_millis(self.sweep.readback_delay_ms))
    }
}
