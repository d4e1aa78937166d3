//! Crank/cam wheel pair and its stored-configuration shapes.
//!
//! The external settings store describes each wheel as a JSON array:
//!
//! - crank shorthand `[degrees_per_tooth, missing_teeth]`
//! - explicit sectors `[degrees_per_tooth, b0, b1, ..., bn]` with `bi` in `{0, 1}`
//!
//! Older stores use objects instead (`{"degrees_per_tooth": 6,
//! "missing_teeth": 2}` and `{"degrees_per_tooth": 12, "tooth_pattern":
//! [...]}`); [`WheelSpec`] accepts all of these and resolves them into a
//! single canonical [`ToothPattern`], so nothing downstream special-cases
//! the channel type.

use cranksim_types::Channel;
use serde::{Deserialize, Serialize};

use crate::pattern::{ConfigError, PatternOrigin, ToothPattern};

/// Validated pair of wheel patterns.
///
/// The crank pattern is laid out over one crank revolution. The cam pattern
/// is laid out over one cam revolution, i.e. a 720 crank-degree four-stroke
/// cycle, and tiles from the start of each cam revolution when its span is
/// shorter than that.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorConfig {
    /// Crankshaft wheel.
    crank: ToothPattern,
    /// Camshaft wheel.
    cam: ToothPattern,
}

impl SensorConfig {
    /// Pair two patterns after validating both.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found by [`validate`].
    pub fn new(crank: ToothPattern, cam: ToothPattern) -> Result<Self, ConfigError> {
        let config = Self { crank, cam };
        validate(&config)?;
        Ok(config)
    }

    /// The wheel set the bench tool ships with: a 60-2 crank at 6 degrees
    /// per tooth and a twelve-sector cam at 12 degrees per lobe with one
    /// lobe absent.
    pub fn default_wheels() -> Self {
        Self {
            crank: ToothPattern::sixty_minus_two(),
            cam: ToothPattern::default_cam(),
        }
    }

    /// Crankshaft wheel.
    pub const fn crank(&self) -> &ToothPattern {
        &self.crank
    }

    /// Camshaft wheel.
    pub const fn cam(&self) -> &ToothPattern {
        &self.cam
    }

    /// Wheel driving the given channel.
    pub const fn pattern(&self, channel: Channel) -> &ToothPattern {
        match channel {
            Channel::Crank => &self.crank,
            Channel::Cam => &self.cam,
        }
    }
}

/// Check both wheels of a configuration. Pure; never touches engine state.
///
/// # Errors
///
/// - [`ConfigError::InvalidGeometry`] for a non-positive tooth width or an
///   empty sector list.
/// - [`ConfigError::NonDivisibleRevolution`] if a missing-tooth wheel does
///   not have a whole number of teeth per revolution.
/// - [`ConfigError::MissingTeethExceedsTotal`] if a missing-tooth wheel has
///   no tooth left.
pub fn validate(config: &SensorConfig) -> Result<(), ConfigError> {
    config.crank.validate()?;
    config.cam.validate()
}

// ---------------------------------------------------------------------------
// Stored shapes
// ---------------------------------------------------------------------------

/// One wheel as it appears in stored configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WheelSpec {
    /// `[degrees_per_tooth, missing]` or `[degrees_per_tooth, b0, ..., bn]`.
    Array(Vec<f64>),
    /// Object form of the missing-tooth shorthand.
    MissingTeeth {
        /// Sector width in degrees.
        degrees_per_tooth: f64,
        /// Trailing sectors without a tooth.
        missing_teeth: usize,
    },
    /// Object form of an explicit sector list.
    Explicit {
        /// Sector width in degrees.
        degrees_per_tooth: f64,
        /// `0`/`1` sector flags.
        tooth_pattern: Vec<u8>,
    },
}

impl WheelSpec {
    /// Resolve the stored shape into a validated pattern.
    ///
    /// A two-element array on the crank channel is the missing-tooth
    /// shorthand; any other array is an explicit sector list.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the shape is malformed or the resulting
    /// geometry is invalid.
    pub fn to_pattern(&self, channel: Channel) -> Result<ToothPattern, ConfigError> {
        match self {
            Self::Array(values) => {
                let Some((&degrees_per_tooth, rest)) = values.split_first() else {
                    return Err(ConfigError::InvalidGeometry {
                        reason: format!("{channel} wheel array is empty"),
                    });
                };
                match (channel, rest) {
                    (Channel::Crank, &[missing]) => {
                        let missing = whole_count(missing).ok_or_else(|| {
                            ConfigError::InvalidGeometry {
                                reason: format!(
                                    "missing tooth count must be a whole number, got {missing}"
                                ),
                            }
                        })?;
                        ToothPattern::from_missing_teeth(degrees_per_tooth, missing)
                    }
                    _ => {
                        let sectors = rest
                            .iter()
                            .enumerate()
                            .map(|(position, value)| sector_flag(position, *value))
                            .collect::<Result<Vec<_>, _>>()?;
                        ToothPattern::from_explicit_sectors(degrees_per_tooth, sectors)
                    }
                }
            }
            Self::MissingTeeth {
                degrees_per_tooth,
                missing_teeth,
            } => ToothPattern::from_missing_teeth(*degrees_per_tooth, *missing_teeth),
            Self::Explicit {
                degrees_per_tooth,
                tooth_pattern,
            } => ToothPattern::from_bits(*degrees_per_tooth, tooth_pattern),
        }
    }
}

impl From<&ToothPattern> for WheelSpec {
    #[allow(clippy::cast_precision_loss)]
    fn from(pattern: &ToothPattern) -> Self {
        match pattern.origin() {
            PatternOrigin::MissingTeeth { missing } => {
                Self::Array(vec![pattern.degrees_per_tooth(), missing as f64])
            }
            PatternOrigin::Explicit => {
                let mut values = Vec::with_capacity(pattern.len().saturating_add(1));
                values.push(pattern.degrees_per_tooth());
                values.extend(
                    pattern
                        .sectors()
                        .iter()
                        .map(|present| if *present { 1.0 } else { 0.0 }),
                );
                Self::Array(values)
            }
        }
    }
}

/// Stored crank/cam pair, e.g. `{"crank": [6, 2], "cam": [12, 1, 1, 0]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDocument {
    /// Crankshaft wheel.
    #[serde(default = "default_crank_spec")]
    pub crank: WheelSpec,
    /// Camshaft wheel.
    #[serde(default = "default_cam_spec")]
    pub cam: WheelSpec,
}

impl Default for SensorDocument {
    fn default() -> Self {
        Self {
            crank: default_crank_spec(),
            cam: default_cam_spec(),
        }
    }
}

impl SensorDocument {
    /// Resolve both wheels into a validated [`SensorConfig`].
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] from either wheel.
    pub fn to_config(&self) -> Result<SensorConfig, ConfigError> {
        SensorConfig::new(
            self.crank.to_pattern(Channel::Crank)?,
            self.cam.to_pattern(Channel::Cam)?,
        )
    }
}

impl From<&SensorConfig> for SensorDocument {
    fn from(config: &SensorConfig) -> Self {
        Self {
            crank: WheelSpec::from(config.crank()),
            cam: WheelSpec::from(config.cam()),
        }
    }
}

/// Interpret a stored number as a non-negative whole count.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn whole_count(value: f64) -> Option<usize> {
    let whole = value.round();
    if !value.is_finite() || whole < 0.0 || (value - whole).abs() > f64::EPSILON {
        return None;
    }
    Some(whole as usize)
}

/// Interpret a stored number as a `0`/`1` sector flag.
fn sector_flag(position: usize, value: f64) -> Result<bool, ConfigError> {
    match whole_count(value) {
        Some(0) => Ok(false),
        Some(1) => Ok(true),
        _ => Err(ConfigError::InvalidGeometry {
            reason: format!("sector {position} is {value}, expected 0 or 1"),
        }),
    }
}

fn default_crank_spec() -> WheelSpec {
    WheelSpec::from(&ToothPattern::sixty_minus_two())
}

fn default_cam_spec() -> WheelSpec {
    WheelSpec::from(&ToothPattern::default_cam())
}
