//! Enumeration types for the cranksim signal generator.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A simulated position-sensor output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Crankshaft position sensor.
    Crank,
    /// Camshaft position sensor (half crank speed).
    Cam,
}

impl Channel {
    /// Both channels, crank first.
    pub const ALL: [Self; 2] = [Self::Crank, Self::Cam];

    /// Stable lowercase name, used as a structured log field.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Crank => "crank",
            Self::Cam => "cam",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Digital level carried by an edge event.
///
/// `High` marks entry into a present tooth, `Low` marks entry into a gap
/// (missing tooth or absent cam lobe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    /// Logic low.
    Low,
    /// Logic high.
    High,
}

impl Level {
    /// Return `true` for [`Level::High`].
    pub const fn is_high(self) -> bool {
        matches!(self, Self::High)
    }
}

impl From<bool> for Level {
    fn from(present: bool) -> Self {
        if present { Self::High } else { Self::Low }
    }
}

impl std::ops::Not for Level {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            Self::High => Self::Low,
            Self::Low => Self::High,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => f.write_str("high"),
            Self::Low => f.write_str("low"),
        }
    }
}
