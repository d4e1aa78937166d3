//! Tooth pattern geometry for one sensor wheel.
//!
//! A [`ToothPattern`] is an ordered list of equal-width sectors, each either
//! a present tooth or a gap. Patterns are immutable once built. Outside this
//! module they can only come from the validating constructors (or the stock
//! wheels, which are checked by tests), so every pattern the engine sees
//! already satisfies its geometry invariants.
//!
//! Internally a sector width is kept as a [`SectorPitch`], an exact
//! fraction of integer micro-degrees, which is the unit the phase clock and
//! the edge scheduler count in. Widths that divide the 720 degree engine
//! cycle are stored exactly (a 7-tooth wheel is `720e6 / 14`, not a rounded
//! `51_428_571`), so boundary positions never pick up rounding error and a
//! wheel closes on itself at every revolution.

use std::fmt;

use crate::clock::CYCLE_MICRODEGREES;

/// Integer angle units per degree.
pub const MICRODEGREES_PER_DEGREE: u64 = 1_000_000;

/// One shaft revolution in micro-degrees.
pub const REVOLUTION_MICRODEGREES: u64 = 360 * MICRODEGREES_PER_DEGREE;

/// Degrees in one shaft revolution.
const REVOLUTION_DEGREES: f64 = 360.0;

/// Crank degrees in one four-stroke cycle, the widest sector allowed.
const CYCLE_DEGREES: f64 = 720.0;

/// Lobe layout of the stock cam wheel.
const DEFAULT_CAM_LOBES: [u8; 12] = [1, 1, 1, 1, 1, 1, 0, 1, 1, 1, 1, 1];

/// Relative tolerance used when checking that teeth divide a revolution.
const DIVISIBILITY_TOLERANCE: f64 = 1e-9;

/// Errors detected while validating wheel geometry.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Non-positive tooth width, empty sector list, or a malformed value.
    #[error("invalid tooth geometry: {reason}")]
    InvalidGeometry {
        /// What is wrong with the geometry.
        reason: String,
    },

    /// A missing-tooth wheel whose tooth width does not divide 360 degrees.
    #[error("{degrees_per_tooth} degrees per tooth does not divide a 360 degree revolution")]
    NonDivisibleRevolution {
        /// The offending tooth width.
        degrees_per_tooth: f64,
    },

    /// More missing teeth than the wheel can hold.
    #[error("{missing} missing teeth leaves no tooth on a {total}-tooth wheel")]
    MissingTeethExceedsTotal {
        /// Requested number of missing teeth.
        missing: usize,
        /// Total sectors on the wheel.
        total: usize,
    },
}

/// How a pattern was described.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternOrigin {
    /// Full-circle wheel with a trailing gap (`[degrees_per_tooth, missing]`).
    MissingTeeth {
        /// Number of trailing sectors left without a tooth.
        missing: usize,
    },
    /// Sector list taken verbatim (`[degrees_per_tooth, b0, b1, ...]`).
    Explicit,
}

/// Exact sector width: `numerator / denominator` micro-degrees.
///
/// Boundary `k` of a pattern sits at `floor(k * numerator / denominator)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorPitch {
    /// Micro-degrees spanned by `denominator` sectors.
    pub numerator: u64,
    /// Number of sectors spanning `numerator` micro-degrees. Never zero.
    pub denominator: u64,
}

impl SectorPitch {
    /// Position of boundary `index` in micro-degrees, rounded down.
    pub fn boundary_position(&self, index: u64) -> u64 {
        let scaled = u128::from(index).saturating_mul(u128::from(self.numerator));
        let position = scaled
            .checked_div(u128::from(self.denominator))
            .unwrap_or(0);
        u64::try_from(position).unwrap_or(u64::MAX)
    }

    /// Number of boundaries at or before `position`, including the one at 0.
    pub fn boundaries_through(&self, position: u64) -> u64 {
        // floor(k * n / d) <= x  <=>  k * n < (x + 1) * d
        let limit = u128::from(position)
            .saturating_add(1)
            .saturating_mul(u128::from(self.denominator));
        let count = limit.div_ceil(u128::from(self.numerator.max(1)));
        u64::try_from(count).unwrap_or(u64::MAX)
    }
}

/// Immutable geometry of one sensor wheel.
#[derive(Debug, Clone, PartialEq)]
pub struct ToothPattern {
    /// Angular width of one sector in degrees.
    degrees_per_tooth: f64,
    /// Sector list, `true` = tooth present.
    sectors: Vec<bool>,
    /// Which shorthand produced this pattern.
    origin: PatternOrigin,
    /// `degrees_per_tooth` as an exact micro-degree fraction.
    pitch: SectorPitch,
}

impl ToothPattern {
    /// Build a full-circle wheel of `360 / degrees_per_tooth` sectors with
    /// the last `missing_teeth` sectors left empty.
    ///
    /// `from_missing_teeth(6.0, 2)` is the common 60-2 crank wheel.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InvalidGeometry`] for a non-positive or non-finite
    ///   tooth width.
    /// - [`ConfigError::NonDivisibleRevolution`] if the tooth width does not
    ///   yield a whole number of teeth per revolution.
    /// - [`ConfigError::MissingTeethExceedsTotal`] if
    ///   `missing_teeth >= total_teeth`.
    pub fn from_missing_teeth(
        degrees_per_tooth: f64,
        missing_teeth: usize,
    ) -> Result<Self, ConfigError> {
        let pitch = sector_pitch(degrees_per_tooth)?;
        let total = teeth_per_revolution(degrees_per_tooth)?;
        if missing_teeth >= total {
            return Err(ConfigError::MissingTeethExceedsTotal {
                missing: missing_teeth,
                total,
            });
        }

        let mut sectors = vec![true; total];
        for sector in sectors.iter_mut().rev().take(missing_teeth) {
            *sector = false;
        }

        Ok(Self {
            degrees_per_tooth,
            sectors,
            origin: PatternOrigin::MissingTeeth {
                missing: missing_teeth,
            },
            pitch,
        })
    }

    /// Take a sector list verbatim. Used for camshaft lobe patterns.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidGeometry`] for a non-positive tooth
    /// width or an empty sector list.
    pub fn from_explicit_sectors(
        degrees_per_tooth: f64,
        sectors: Vec<bool>,
    ) -> Result<Self, ConfigError> {
        let pitch = sector_pitch(degrees_per_tooth)?;
        if sectors.is_empty() {
            return Err(ConfigError::InvalidGeometry {
                reason: "a tooth pattern needs at least one sector".to_owned(),
            });
        }
        Ok(Self {
            degrees_per_tooth,
            sectors,
            origin: PatternOrigin::Explicit,
            pitch,
        })
    }

    /// Like [`from_explicit_sectors`](Self::from_explicit_sectors), but from
    /// `0`/`1` flags as they appear in stored configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidGeometry`] if any flag is not 0 or 1,
    /// or for the same reasons as `from_explicit_sectors`.
    pub fn from_bits(degrees_per_tooth: f64, bits: &[u8]) -> Result<Self, ConfigError> {
        let sectors = bits
            .iter()
            .enumerate()
            .map(|(position, bit)| match bit {
                0 => Ok(false),
                1 => Ok(true),
                other => Err(ConfigError::InvalidGeometry {
                    reason: format!("sector {position} is {other}, expected 0 or 1"),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_explicit_sectors(degrees_per_tooth, sectors)
    }

    /// The 60-2 crank wheel at 6 degrees per tooth.
    pub fn sixty_minus_two() -> Self {
        let mut sectors = vec![true; 60];
        for sector in sectors.iter_mut().rev().take(2) {
            *sector = false;
        }
        Self {
            degrees_per_tooth: 6.0,
            sectors,
            origin: PatternOrigin::MissingTeeth { missing: 2 },
            pitch: SectorPitch {
                numerator: CYCLE_MICRODEGREES,
                denominator: 120,
            },
        }
    }

    /// Twelve 12-degree cam sectors with the seventh lobe absent.
    pub fn default_cam() -> Self {
        let sectors = DEFAULT_CAM_LOBES.iter().map(|lobe| *lobe == 1).collect();
        Self {
            degrees_per_tooth: 12.0,
            sectors,
            origin: PatternOrigin::Explicit,
            pitch: SectorPitch {
                numerator: CYCLE_MICRODEGREES,
                denominator: 60,
            },
        }
    }

    /// Re-check the geometry invariants. Pure.
    ///
    /// # Errors
    ///
    /// Returns the same errors the constructors would.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pitch = sector_pitch(self.degrees_per_tooth)?;
        if pitch != self.pitch || self.sectors.is_empty() {
            return Err(ConfigError::InvalidGeometry {
                reason: "sector list or tooth width is inconsistent".to_owned(),
            });
        }
        if let PatternOrigin::MissingTeeth { missing } = self.origin {
            let total = teeth_per_revolution(self.degrees_per_tooth)?;
            if missing >= total {
                return Err(ConfigError::MissingTeethExceedsTotal { missing, total });
            }
            if total != self.sectors.len() {
                return Err(ConfigError::InvalidGeometry {
                    reason: format!(
                        "missing-tooth wheel has {} sectors, expected {total}",
                        self.sectors.len()
                    ),
                });
            }
        }
        Ok(())
    }

    /// Angular width of one sector in degrees.
    pub const fn degrees_per_tooth(&self) -> f64 {
        self.degrees_per_tooth
    }

    /// Exact angular width of one sector.
    pub const fn pitch(&self) -> SectorPitch {
        self.pitch
    }

    /// The sector list, `true` = tooth present.
    pub fn sectors(&self) -> &[bool] {
        &self.sectors
    }

    /// Number of sectors in the pattern.
    pub fn len(&self) -> usize {
        self.sectors.len()
    }

    /// Always `false`; patterns hold at least one sector.
    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }

    /// How the pattern was described.
    pub const fn origin(&self) -> PatternOrigin {
        self.origin
    }

    /// Number of present teeth in one pass of the pattern.
    pub fn present_teeth(&self) -> usize {
        self.sectors.iter().filter(|present| **present).count()
    }

    /// `degrees_per_tooth * len`.
    #[allow(clippy::cast_precision_loss)]
    pub fn span_degrees(&self) -> f64 {
        self.degrees_per_tooth * self.sectors.len() as f64
    }

    /// Whether the sector at `index` (taken modulo the pattern length) holds
    /// a tooth.
    pub fn is_present(&self, index: usize) -> bool {
        index
            .checked_rem(self.sectors.len())
            .and_then(|wrapped| self.sectors.get(wrapped))
            .copied()
            .unwrap_or(false)
    }
}

impl fmt::Display for ToothPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.origin {
            PatternOrigin::MissingTeeth { missing } => write!(
                f,
                "{}-{missing} @ {} deg/tooth",
                self.sectors.len(),
                self.degrees_per_tooth
            ),
            PatternOrigin::Explicit => {
                write!(f, "[")?;
                for present in &self.sectors {
                    f.write_str(if *present { "1" } else { "0" })?;
                }
                write!(f, "] @ {} deg/tooth", self.degrees_per_tooth)
            }
        }
    }
}

/// Convert a tooth width to an exact pitch, rejecting non-positive,
/// non-finite, sub-micro-degree, and wider-than-a-cycle values.
///
/// A width that divides 720 degrees becomes `720e6 / sectors_per_cycle`;
/// any other width is rounded to whole micro-degrees.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn sector_pitch(degrees_per_tooth: f64) -> Result<SectorPitch, ConfigError> {
    if !degrees_per_tooth.is_finite() || degrees_per_tooth <= 0.0 {
        return Err(ConfigError::InvalidGeometry {
            reason: format!("degrees per tooth must be positive, got {degrees_per_tooth}"),
        });
    }
    if degrees_per_tooth > CYCLE_DEGREES {
        return Err(ConfigError::InvalidGeometry {
            reason: format!("a {degrees_per_tooth} degree sector is wider than one engine cycle"),
        });
    }
    let scaled = (degrees_per_tooth * 1e6).round();
    if scaled < 1.0 {
        return Err(ConfigError::InvalidGeometry {
            reason: format!("{degrees_per_tooth} degrees per tooth is below one micro-degree"),
        });
    }

    let per_cycle = CYCLE_DEGREES / degrees_per_tooth;
    let whole = per_cycle.round();
    if (per_cycle - whole).abs() <= DIVISIBILITY_TOLERANCE * whole {
        // 1 <= whole <= 720e6 given the range checks above.
        return Ok(SectorPitch {
            numerator: CYCLE_MICRODEGREES,
            denominator: whole as u64,
        });
    }
    // Range checked above: 1 <= scaled <= 720e6.
    Ok(SectorPitch {
        numerator: scaled as u64,
        denominator: 1,
    })
}

/// Whole number of teeth on a full-circle wheel.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn teeth_per_revolution(degrees_per_tooth: f64) -> Result<usize, ConfigError> {
    let teeth = REVOLUTION_DEGREES / degrees_per_tooth;
    let whole = teeth.round();
    if whole < 1.0 || (teeth - whole).abs() > DIVISIBILITY_TOLERANCE * whole {
        return Err(ConfigError::NonDivisibleRevolution { degrees_per_tooth });
    }
    // degrees_per_tooth >= 1e-6 bounds this well inside usize.
    Ok(whole as usize)
}
