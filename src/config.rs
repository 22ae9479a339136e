//! Configuration management for nvreport
//!
//! Every setting defaults to the behavior of the plain demo run: a 10 second
//! averaging window, the placeholder pid filter `[1280, 1288]`, and text
//! output. A missing config file means defaults.

use crate::error::{Error, Result};
use crate::telemetry::SamplingMode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// nvreport configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Averaged metric options
    #[serde(default)]
    pub sampling: SamplingConfig,
    /// Process memory attribution options
    #[serde(default)]
    pub processes: ProcessConfig,
    /// Output options
    #[serde(default)]
    pub output: OutputConfig,
}

/// Averaged metric configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Averaging window in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Wait out the window or read already-buffered samples
    #[serde(default)]
    pub mode: SamplingMode,
}

/// Process filters for the memory-used queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Graphics processes to attribute memory for (empty = all)
    #[serde(default = "default_pids")]
    pub graphics_pids: Vec<u32>,
    /// Compute processes to attribute memory for (empty = all)
    #[serde(default = "default_pids")]
    pub compute_pids: Vec<u32>,
}

/// Output configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
}

/// Report output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Line-oriented text, streamed as values are read
    #[default]
    Text,
    /// One JSON document after a complete run
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

// Default value functions
fn default_window_secs() -> u64 {
    10
}

fn default_pids() -> Vec<u32> {
    vec![1280, 1288]
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            mode: SamplingMode::default(),
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            graphics_pids: default_pids(),
            compute_pids: default_pids(),
        }
    }
}

impl SamplingConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Config {
    /// Get the default configuration directory
    ///
    /// Returns `~/.config/nvreport` on Unix-like systems,
    /// or `%APPDATA%\nvreport` on Windows.
    pub fn default_path() -> PathBuf {
        let config_dir = if cfg!(windows) {
            std::env::var("APPDATA")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("."))
        } else {
            std::env::var("HOME")
                .map(|home| PathBuf::from(home).join(".config"))
                .unwrap_or_else(|_| PathBuf::from(".config"))
        };

        config_dir.join("nvreport")
    }

    /// Load configuration from the default path, falling back to defaults
    pub fn load() -> Result<Self> {
        let config_file = Self::default_path().join("config.toml");

        if !config_file.exists() {
            log::debug!("No config at {}, using defaults", config_file.display());
            return Ok(Self::default());
        }

        Self::load_from(&config_file)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config = Self::parse(&contents)?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.sampling.window_secs == 0 {
            return Err(Error::Config(
                "sampling.window_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
