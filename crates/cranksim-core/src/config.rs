//! Settings loading and typed settings structures for cranksim.
//!
//! Settings live in `cranksim.yaml`. This module defines strongly-typed
//! structs mirroring the YAML layout and a loader that reads and validates
//! it. Every field has a default, so a partial file (or no file at all)
//! yields a usable setup: a 60-2 crank, the stock twelve-sector cam, an
//! 8000 RPM ceiling, and a 10 ms tick.
//!
//! ```yaml
//! engine:
//!   rpm_max: 8000
//!   initial_rpm: 800
//!   tick_interval_ms: 10
//!   max_tick_ms: 1000
//!   rpm_slew_rpm_per_s: 2000
//!   sink_capacity: 4096
//!   run_seconds: 30
//! sensors:
//!   crank: [6, 2]
//!   cam: [12, 1, 1, 1, 1, 1, 1, 0, 1, 1, 1, 1, 1]
//! logging:
//!   level: info
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::engine::EngineLimits;
use crate::pattern::ConfigError;
use crate::sensor::{SensorConfig, SensorDocument};

/// Settings file looked up by the binary when no path is given.
pub const DEFAULT_SETTINGS_PATH: &str = "cranksim.yaml";

/// Environment variable overriding `engine.rpm_max`.
pub const RPM_MAX_ENV: &str = "CRANKSIM_RPM_MAX";

/// Errors that can occur when loading settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Failed to read the settings file from disk.
    #[error("failed to read settings file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse settings YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        #[from]
        source: serde_yml::Error,
    },

    /// Failed to parse a JSON sensor document.
    #[error("failed to parse sensor JSON: {source}")]
    Json {
        /// The underlying JSON parse error.
        #[from]
        source: serde_json::Error,
    },

    /// The described wheels are geometrically invalid.
    #[error("invalid sensor geometry: {source}")]
    Sensor {
        /// The geometry error.
        #[from]
        source: ConfigError,
    },

    /// A setting has an unusable value.
    #[error("invalid setting {field}: {reason}")]
    Invalid {
        /// Dotted path of the setting.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Top-level settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Settings {
    /// Engine speed, cadence, and output settings.
    #[serde(default)]
    pub engine: EngineSettings,

    /// Crank and cam wheel descriptions.
    #[serde(default)]
    pub sensors: SensorDocument,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Settings {
    /// Load settings from a YAML file, then apply environment overrides.
    ///
    /// `CRANKSIM_RPM_MAX` overrides `engine.rpm_max`.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Io`] if the file cannot be read,
    /// [`SettingsError::Yaml`] if it is not valid YAML, or
    /// [`SettingsError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Like [`from_file`](Self::from_file), but a missing file yields the
    /// defaults (still subject to environment overrides).
    ///
    /// # Errors
    ///
    /// Same as [`from_file`](Self::from_file), except for a missing file.
    pub fn load_or_default(path: &Path) -> Result<Self, SettingsError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let mut settings = Self::default();
                settings.apply_env_overrides();
                settings.validate()?;
                Ok(settings)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Parse settings from a YAML string, then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Yaml`] if the string is not valid YAML, or
    /// [`SettingsError::Invalid`] if a value is out of range.
    pub fn parse(yaml: &str) -> Result<Self, SettingsError> {
        let mut settings: Self = serde_yml::from_str(yaml)?;
        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    /// Override settings from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Override settings from an arbitrary variable lookup.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup(RPM_MAX_ENV) {
            match raw.trim().parse::<f64>() {
                Ok(value) => self.engine.rpm_max = value,
                Err(err) => warn!(variable = RPM_MAX_ENV, value = %raw, error = %err, "ignoring unparsable override"),
            }
        }
    }

    /// Check ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Invalid`] for the first bad value.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let engine = &self.engine;
        if !engine.rpm_max.is_finite() || engine.rpm_max <= 0.0 {
            return Err(SettingsError::Invalid {
                field: "engine.rpm_max",
                reason: format!("must be a positive number, got {}", engine.rpm_max),
            });
        }
        if !engine.initial_rpm.is_finite() || engine.initial_rpm < 0.0 {
            return Err(SettingsError::Invalid {
                field: "engine.initial_rpm",
                reason: format!("must be a non-negative number, got {}", engine.initial_rpm),
            });
        }
        if engine.tick_interval_ms == 0 {
            return Err(SettingsError::Invalid {
                field: "engine.tick_interval_ms",
                reason: "must be at least 1".to_owned(),
            });
        }
        if engine.max_tick_ms < engine.tick_interval_ms {
            return Err(SettingsError::Invalid {
                field: "engine.max_tick_ms",
                reason: format!(
                    "must be at least the tick interval ({} ms), got {}",
                    engine.tick_interval_ms, engine.max_tick_ms
                ),
            });
        }
        if let Some(slew) = engine.rpm_slew_rpm_per_s {
            if !slew.is_finite() || slew <= 0.0 {
                return Err(SettingsError::Invalid {
                    field: "engine.rpm_slew_rpm_per_s",
                    reason: format!("must be a positive number, got {slew}"),
                });
            }
        }
        if engine.sink_capacity == 0 {
            return Err(SettingsError::Invalid {
                field: "engine.sink_capacity",
                reason: "must be at least 1".to_owned(),
            });
        }
        Ok(())
    }

    /// Resolve the wheel descriptions into a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Sensor`] if either wheel is invalid.
    pub fn sensor_config(&self) -> Result<SensorConfig, SettingsError> {
        Ok(self.sensors.to_config()?)
    }
}

/// Parse the JSON sensor document handed over by an external settings
/// store, e.g. `{"crank": [6, 2], "cam": [12, 1, 1, 0]}`.
///
/// # Errors
///
/// Returns [`SettingsError::Json`] for malformed JSON or
/// [`SettingsError::Sensor`] for invalid geometry.
pub fn parse_sensor_json(json: &str) -> Result<SensorConfig, SettingsError> {
    let document: SensorDocument = serde_json::from_str(json)?;
    Ok(document.to_config()?)
}

/// Engine speed, cadence, and output settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EngineSettings {
    /// Highest accepted target RPM.
    #[serde(default = "default_rpm_max")]
    pub rpm_max: f64,

    /// Target RPM applied at start-up.
    #[serde(default = "default_initial_rpm")]
    pub initial_rpm: f64,

    /// Milliseconds between ticks.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Longest wall-clock gap one tick simulates; the rest is skipped.
    #[serde(default = "default_max_tick_ms")]
    pub max_tick_ms: u64,

    /// RPM slew limit in RPM per second. Absent means instantaneous.
    #[serde(default)]
    pub rpm_slew_rpm_per_s: Option<f64>,

    /// Depth of the bounded edge queue.
    #[serde(default = "default_sink_capacity")]
    pub sink_capacity: usize,

    /// Stop after this many seconds. Absent means run until interrupted.
    #[serde(default)]
    pub run_seconds: Option<u64>,
}

impl EngineSettings {
    /// Engine limits derived from these settings.
    pub const fn limits(&self) -> EngineLimits {
        EngineLimits {
            rpm_max: self.rpm_max,
            rpm_slew_rpm_per_s: self.rpm_slew_rpm_per_s,
        }
    }

    /// Tick interval as a duration.
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Per-tick simulation cap as a duration.
    pub const fn max_tick_dt(&self) -> Duration {
        Duration::from_millis(self.max_tick_ms)
    }

    /// Bounded run time, if any.
    pub fn run_duration(&self) -> Option<Duration> {
        self.run_seconds.map(Duration::from_secs)
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            rpm_max: default_rpm_max(),
            initial_rpm: default_initial_rpm(),
            tick_interval_ms: default_tick_interval_ms(),
            max_tick_ms: default_max_tick_ms(),
            rpm_slew_rpm_per_s: None,
            sink_capacity: default_sink_capacity(),
            run_seconds: None,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON log lines instead of human-readable ones.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

const fn default_rpm_max() -> f64 {
    8000.0
}

const fn default_initial_rpm() -> f64 {
    800.0
}

const fn default_tick_interval_ms() -> u64 {
    10
}

const fn default_max_tick_ms() -> u64 {
    1000
}

const fn default_sink_capacity() -> usize {
    4096
}

fn default_log_level() -> String {
    "info".to_owned()
}
