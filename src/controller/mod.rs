// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SOC hysteresis control.
//!
//! The decision rule is a pure function of the cached telemetry record and
//! the thresholds, so it can be checked without any transport:
//!
//! | Reported SOC | Reported switch | Decision |
//! |--------------|-----------------|----------|
//! | `>= high` | Off | [`Decision::Enable`] |
//! | `<= low` | On | [`Decision::Disable`] |
//! | anything else | any | [`Decision::Hold`] |
//!
//! The switch state is always the one the device reports, never the last
//! command sent, so a lost command is retried on the next cycle.
//!
//! # Examples
//!
//! ```
//! use solix_relay::controller::{decide, AttributeKeys, Decision};
//! use solix_relay::telemetry::{AttributeValue, Attributes, TelemetryRecord};
//! use solix_relay::types::ControlThresholds;
//!
//! let mut attributes = Attributes::new();
//! attributes.insert("main_battery_soc".into(), AttributeValue::Integer(61));
//! attributes.insert("ac_output_power_switch".into(), AttributeValue::Integer(0));
//! let record = TelemetryRecord::new("dt/anker_power/A1790/SN1/param_info", attributes);
//!
//! let decision = decide(
//!     Some(&record),
//!     ControlThresholds::default(),
//!     &AttributeKeys::default(),
//! );
//! assert!(matches!(decision, Decision::Enable(_)));
//! assert_eq!(decision.requested_output(), Some(true));
//! ```

mod hysteresis;

pub use hysteresis::{CycleReport, HysteresisController, LoopExit};

use std::fmt;

use crate::telemetry::TelemetryRecord;
use crate::types::{ControlThresholds, Soc, SwitchState};

/// Telemetry attribute carrying the main battery state of charge.
pub const DEFAULT_SOC_KEY: &str = "main_battery_soc";

/// Telemetry attribute carrying the AC output switch state.
pub const DEFAULT_SWITCH_KEY: &str = "ac_output_power_switch";

/// Names of the telemetry attributes the decision reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeKeys {
    /// Attribute holding the state of charge.
    pub soc: String,
    /// Attribute holding the AC output switch state.
    pub switch: String,
}

impl AttributeKeys {
    /// Creates a key set.
    #[must_use]
    pub fn new(soc: impl Into<String>, switch: impl Into<String>) -> Self {
        Self {
            soc: soc.into(),
            switch: switch.into(),
        }
    }
}

impl Default for AttributeKeys {
    fn default() -> Self {
        Self::new(DEFAULT_SOC_KEY, DEFAULT_SWITCH_KEY)
    }
}

/// The device readings a decision was made from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    /// Reported state of charge.
    pub soc: Soc,
    /// Reported AC output state.
    pub output: SwitchState,
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "soc {} / ac output {}", self.soc, self.output)
    }
}

/// Result of evaluating one telemetry record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Nothing has been received from the device yet.
    NoTelemetry,
    /// The record is missing a required attribute or holds an unusable value.
    Incomplete {
        /// The attribute that could not be used.
        attribute: String,
        /// Why it could not be used.
        reason: String,
    },
    /// No change needed.
    Hold(Reading),
    /// Turn the AC output on.
    Enable(Reading),
    /// Turn the AC output off.
    Disable(Reading),
}

impl Decision {
    /// Returns the output state to command, if any.
    #[must_use]
    pub const fn requested_output(&self) -> Option<bool> {
        match self {
            Self::Enable(_) => Some(true),
            Self::Disable(_) => Some(false),
            Self::NoTelemetry | Self::Incomplete { .. } | Self::Hold(_) => None,
        }
    }

    /// Returns the readings the decision was based on.
    #[must_use]
    pub const fn reading(&self) -> Option<&Reading> {
        match self {
            Self::Hold(r) | Self::Enable(r) | Self::Disable(r) => Some(r),
            Self::NoTelemetry | Self::Incomplete { .. } => None,
        }
    }
}

/// Applies the two-threshold rule to the latest record of a device.
#[must_use]
pub fn decide(
    record: Option<&TelemetryRecord>,
    thresholds: ControlThresholds,
    keys: &AttributeKeys,
) -> Decision {
    let Some(record) = record else {
        return Decision::NoTelemetry;
    };

    let soc = match read_attribute(record, &keys.soc, Soc::from_reading) {
        Ok(soc) => soc,
        Err(decision) => return decision,
    };
    let output = match read_attribute(record, &keys.switch, SwitchState::from_reading) {
        Ok(output) => output,
        Err(decision) => return decision,
    };

    let reading = Reading { soc, output };
    if soc >= thresholds.high() && !output.is_on() {
        Decision::Enable(reading)
    } else if soc <= thresholds.low() && output.is_on() {
        Decision::Disable(reading)
    } else {
        Decision::Hold(reading)
    }
}

fn read_attribute<V, E: fmt::Display>(
    record: &TelemetryRecord,
    key: &str,
    parse: impl FnOnce(i64) -> Result<V, E>,
) -> Result<V, Decision> {
    let incomplete = |reason: String| Decision::Incomplete {
        attribute: key.to_string(),
        reason,
    };

    let value = record
        .get(key)
        .ok_or_else(|| incomplete("missing".to_string()))?;
    let raw = value
        .as_i64()
        .ok_or_else(|| incomplete(format!("not an integer: {value}")))?;
    parse(raw).map_err(|e| incomplete(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{AttributeValue, Attributes};

    fn record(soc: Option<AttributeValue>, switch: Option<AttributeValue>) -> TelemetryRecord {
        let mut attributes = Attributes::new();
        if let Some(soc) = soc {
            attributes.insert(DEFAULT_SOC_KEY.to_string(), soc);
        }
        if let Some(switch) = switch {
            attributes.insert(DEFAULT_SWITCH_KEY.to_string(), switch);
        }
        TelemetryRecord::new("dt/anker_power/A1790/SN1/param_info", attributes)
    }

    fn reading(soc: i64, switch: i64) -> TelemetryRecord {
        record(
            Some(AttributeValue::Integer(soc)),
            Some(AttributeValue::Integer(switch)),
        )
    }

    fn evaluate(record: &TelemetryRecord) -> Decision {
        decide(
            Some(record),
            ControlThresholds::default(),
            &AttributeKeys::default(),
        )
    }

    #[test]
    fn no_record_means_no_telemetry() {
        let decision = decide(None, ControlThresholds::default(), &AttributeKeys::default());
        assert_eq!(decision, Decision::NoTelemetry);
        assert_eq!(decision.requested_output(), None);
    }

    #[test]
    fn inside_band_never_commands() {
        for soc in 56..60 {
            for switch in [0, 1] {
                let decision = evaluate(&reading(soc, switch));
                assert!(
                    matches!(decision, Decision::Hold(_)),
                    "soc={soc} switch={switch} gave {decision:?}"
                );
            }
        }
    }

    #[test]
    fn high_soc_enables_only_when_off() {
        assert_eq!(evaluate(&reading(61, 0)).requested_output(), Some(true));
        assert_eq!(evaluate(&reading(60, 0)).requested_output(), Some(true));
        assert_eq!(evaluate(&reading(61, 1)).requested_output(), None);
    }

    #[test]
    fn low_soc_disables_only_when_on() {
        assert_eq!(evaluate(&reading(54, 1)).requested_output(), Some(false));
        assert_eq!(evaluate(&reading(55, 1)).requested_output(), Some(false));
        assert_eq!(evaluate(&reading(54, 0)).requested_output(), None);
    }

    #[test]
    fn decision_carries_reading() {
        let decision = evaluate(&reading(62, 0));
        let reading = decision.reading().unwrap();
        assert_eq!(reading.soc.value(), 62);
        assert_eq!(reading.output, SwitchState::Off);
    }

    #[test]
    fn missing_attribute_is_incomplete() {
        let decision = evaluate(&record(Some(AttributeValue::Integer(70)), None));
        assert!(matches!(
            decision,
            Decision::Incomplete { ref attribute, .. } if attribute == DEFAULT_SWITCH_KEY
        ));
    }

    #[test]
    fn unusable_values_are_incomplete() {
        let text = record(
            Some(AttributeValue::Text("full".to_string())),
            Some(AttributeValue::Integer(0)),
        );
        assert!(matches!(evaluate(&text), Decision::Incomplete { .. }));

        let out_of_range = reading(140, 0);
        assert!(matches!(
            evaluate(&out_of_range),
            Decision::Incomplete { ref attribute, .. } if attribute == DEFAULT_SOC_KEY
        ));

        let bad_switch = reading(61, 7);
        assert!(matches!(evaluate(&bad_switch), Decision::Incomplete { .. }));
    }

    #[test]
    fn custom_keys_and_thresholds() {
        let mut attributes = Attributes::new();
        attributes.insert("soc".to_string(), AttributeValue::Integer(30));
        attributes.insert("ac".to_string(), AttributeValue::Integer(1));
        let record = TelemetryRecord::new("t", attributes);

        let thresholds = ControlThresholds::from_percent(40, 80).unwrap();
        let decision = decide(Some(&record), thresholds, &AttributeKeys::new("soc", "ac"));
        assert_eq!(decision.requested_output(), Some(false));
    }
}
