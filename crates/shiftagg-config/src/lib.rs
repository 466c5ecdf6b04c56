//! # shiftagg-config
//!
//! Configuration management for shiftagg.
//!
//! Configuration is read from `~/.shiftagg/config.yaml` unless another path is
//! given. A missing default file is not an error: every field has a default,
//! so a bare install aggregates into `~/.shiftagg/shiftagg.db` every 10
//! seconds using the host time zone.
//!
//! ```yaml
//! database_path: /var/lib/shiftagg/factory.db
//! interval_secs: 10
//! timezone: Asia/Seoul
//! shift:
//!   day_start_hour: 8
//!   night_start_hour: 20
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shiftagg_core::logging::{default_database_path, default_home_dir};
use shiftagg_core::{PlantZone, Result, ShiftCalendar, ShiftaggError};
use tracing::{debug, info};

/// Default aggregation interval in seconds.
pub const DEFAULT_INTERVAL_SECS: u64 = 10;

/// Default configuration file name inside `~/.shiftagg/`.
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Top-level shiftagg configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// SQLite database holding raw events and shift buckets
    pub database_path: Option<PathBuf>,

    /// Seconds to wait between aggregation passes
    pub interval_secs: u64,

    /// "local" or an IANA zone name used to evaluate shift boundaries
    pub timezone: String,

    /// Shift boundary hours
    pub shift: ShiftCalendar,

    /// Directory for log files (defaults to ~/.shiftagg/logs/)
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            interval_secs: DEFAULT_INTERVAL_SECS,
            timezone: "local".to_string(),
            shift: ShiftCalendar::default(),
            log_dir: None,
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// With `Some(path)` the file must exist. With `None` the default
    /// location is tried and defaults are used when it is absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default_path = default_config_path()?;
                if default_path.exists() {
                    Self::from_file(&default_path)
                } else {
                    debug!(path = %default_path.display(), "no config file, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    /// Read and validate a configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ShiftaggError::ConfigNotFound {
                    path: path.to_path_buf(),
                    source: Some(e),
                }
            } else {
                ShiftaggError::io("reading config", path, e)
            }
        })?;

        let config = Self::from_yaml_str(&content).map_err(|e| match e {
            ShiftaggError::ConfigInvalid { message, .. } => ShiftaggError::ConfigInvalid {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })?;

        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        // An empty document deserializes to unit, not a mapping
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self =
            serde_yaml::from_str(content).map_err(|e| ShiftaggError::ConfigInvalid {
                path: PathBuf::new(),
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field ranges and the timezone name.
    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            return Err(ShiftaggError::ConfigValidation {
                message: "interval_secs must be greater than zero".to_string(),
            });
        }
        self.shift.validate()?;
        self.plant_zone()?;
        Ok(())
    }

    /// Parsed plant time zone.
    pub fn plant_zone(&self) -> Result<PlantZone> {
        self.timezone.parse()
    }

    /// Interval between aggregation passes.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Database path, falling back to `~/.shiftagg/shiftagg.db`.
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => default_database_path(),
        }
    }

    /// Override the database path.
    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Override the pass interval.
    pub fn with_interval_secs(mut self, secs: u64) -> Self {
        self.interval_secs = secs;
        self
    }
}

/// Get the default configuration file path: `~/.shiftagg/config.yaml`.
pub fn default_config_path() -> Result<PathBuf> {
    Ok(default_home_dir()?.join(CONFIG_FILE_NAME))
}
