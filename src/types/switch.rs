// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! AC output switch state as reported by the device.

use std::fmt;
use std::str::FromStr;

use crate::error::ValueError;

/// Reported state of the AC output relay.
///
/// # Examples
///
/// ```
/// use solix_relay::types::SwitchState;
///
/// assert_eq!("1".parse::<SwitchState>().unwrap(), SwitchState::On);
/// assert_eq!(SwitchState::from(false), SwitchState::Off);
/// assert_eq!(SwitchState::On.as_num(), 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwitchState {
    /// Output is off.
    Off,
    /// Output is on.
    On,
}

impl SwitchState {
    /// Returns the display string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::On => "ON",
        }
    }

    /// Returns the numeric value used in telemetry.
    #[must_use]
    pub const fn as_num(&self) -> u8 {
        match self {
            Self::Off => 0,
            Self::On => 1,
        }
    }

    /// Returns `true` if the output is on.
    #[must_use]
    pub const fn is_on(&self) -> bool {
        matches!(self, Self::On)
    }

    /// Interprets a numeric telemetry reading.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::InvalidSwitchState` for anything other than 0 or 1.
    pub fn from_reading(reading: i64) -> Result<Self, ValueError> {
        match reading {
            0 => Ok(Self::Off),
            1 => Ok(Self::On),
            other => Err(ValueError::InvalidSwitchState(other.to_string())),
        }
    }
}

impl fmt::Display for SwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SwitchState {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "OFF" | "0" | "FALSE" => Ok(Self::Off),
            "ON" | "1" | "TRUE" => Ok(Self::On),
            _ => Err(ValueError::InvalidSwitchState(s.to_string())),
        }
    }
}

impl From<bool> for SwitchState {
    fn from(value: bool) -> Self {
        if value { Self::On } else { Self::Off }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_state_from_str() {
        assert_eq!("ON".parse::<SwitchState>().unwrap(), SwitchState::On);
        assert_eq!("off".parse::<SwitchState>().unwrap(), SwitchState::Off);
        assert_eq!(" 1 ".parse::<SwitchState>().unwrap(), SwitchState::On);
        assert_eq!("false".parse::<SwitchState>().unwrap(), SwitchState::Off);
    }

    #[test]
    fn switch_state_from_str_invalid() {
        assert!(matches!(
            "toggle".parse::<SwitchState>(),
            Err(ValueError::InvalidSwitchState(_))
        ));
    }

    #[test]
    fn switch_state_from_reading() {
        assert_eq!(SwitchState::from_reading(0).unwrap(), SwitchState::Off);
        assert_eq!(SwitchState::from_reading(1).unwrap(), SwitchState::On);
        assert!(SwitchState::from_reading(2).is_err());
    }

    #[test]
    fn switch_state_display() {
        assert_eq!(SwitchState::On.to_string(), "ON");
        assert!(!SwitchState::Off.is_on());
    }
}
