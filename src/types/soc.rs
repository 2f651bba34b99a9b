// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! State-of-charge percentage and the two-threshold control band.

use std::fmt;

use crate::error::ValueError;

/// Battery state of charge as a percentage (0-100).
///
/// # Examples
///
/// ```
/// use solix_relay::types::Soc;
///
/// let soc = Soc::new(62).unwrap();
/// assert_eq!(soc.value(), 62);
///
/// assert!(Soc::new(101).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Soc(u8);

impl Soc {
    /// Empty battery (0%).
    pub const EMPTY: Self = Self(0);

    /// Full battery (100%).
    pub const FULL: Self = Self(100);

    /// Creates a new state-of-charge value.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::OutOfRange` if value exceeds 100.
    pub fn new(value: u8) -> Result<Self, ValueError> {
        if value > 100 {
            return Err(ValueError::OutOfRange {
                min: 0,
                max: 100,
                actual: u16::from(value),
            });
        }
        Ok(Self(value))
    }

    /// Creates a state-of-charge value from a raw telemetry reading.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::OutOfRange` if the reading is negative or above 100.
    pub fn from_reading(reading: i64) -> Result<Self, ValueError> {
        u8::try_from(reading)
            .map_err(|_| ValueError::OutOfRange {
                min: 0,
                max: 100,
                actual: u16::try_from(reading.clamp(0, i64::from(u16::MAX))).unwrap_or(u16::MAX),
            })
            .and_then(Self::new)
    }

    /// Returns the percentage value.
    #[must_use]
    pub const fn value(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for Soc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// The `low`/`high` state-of-charge thresholds of the hysteresis band.
///
/// The invariant `low < high` holds for every constructed value.
///
/// # Examples
///
/// ```
/// use solix_relay::types::{ControlThresholds, Soc};
///
/// let band = ControlThresholds::new(Soc::new(55).unwrap(), Soc::new(60).unwrap()).unwrap();
/// assert!(band.is_inside_band(Soc::new(58).unwrap()));
/// assert!(!band.is_inside_band(Soc::new(60).unwrap()));
///
/// assert!(ControlThresholds::new(Soc::new(60).unwrap(), Soc::new(60).unwrap()).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlThresholds {
    low: Soc,
    high: Soc,
}

impl ControlThresholds {
    /// Creates thresholds from the low and high bounds.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::InvalidThresholds` unless `low < high`.
    pub fn new(low: Soc, high: Soc) -> Result<Self, ValueError> {
        if low >= high {
            return Err(ValueError::InvalidThresholds {
                low: low.value(),
                high: high.value(),
            });
        }
        Ok(Self { low, high })
    }

    /// Creates thresholds from raw percentages.
    ///
    /// # Errors
    ///
    /// Returns an error if either value is out of range or `low >= high`.
    pub fn from_percent(low: u8, high: u8) -> Result<Self, ValueError> {
        Self::new(Soc::new(low)?, Soc::new(high)?)
    }

    /// Returns the low threshold; at or below it the output is switched off.
    #[must_use]
    pub const fn low(&self) -> Soc {
        self.low
    }

    /// Returns the high threshold; at or above it the output is switched on.
    #[must_use]
    pub const fn high(&self) -> Soc {
        self.high
    }

    /// Returns `true` if `soc` lies strictly between the thresholds.
    #[must_use]
    pub fn is_inside_band(&self, soc: Soc) -> bool {
        self.low < soc && soc < self.high
    }
}

impl Default for ControlThresholds {
    fn default() -> Self {
        Self {
            low: Soc(55),
            high: Soc(60),
        }
    }
}

impl fmt::Display for ControlThresholds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.low, self.high)
    }
}
