// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Telemetry attributes, records and the shared telemetry cache.
//!
//! Devices publish telemetry on `dt/<app>/<model>/<serial>/...` topics. Each
//! message is decoded by a [`TelemetryDecoder`] into a flat set of named
//! [`AttributeValue`]s, which is merged into the device's [`TelemetryRecord`]
//! inside the [`TelemetryCache`].
//!
//! # Examples
//!
//! ```
//! use solix_relay::telemetry::{AttributeValue, Attributes, TelemetryCache};
//!
//! let cache = TelemetryCache::new();
//!
//! let mut update = Attributes::new();
//! update.insert("main_battery_soc".to_string(), AttributeValue::Integer(62));
//! cache.merge("SN1", "dt/anker_power/A1790/SN1/param_info", update);
//!
//! let record = cache.get("SN1").unwrap();
//! assert_eq!(record.integer("main_battery_soc"), Some(62));
//! ```

mod cache;
mod decoder;

pub use cache::TelemetryCache;
pub use decoder::{JsonTelemetryDecoder, TelemetryDecoder};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Local, Utc};

/// Named attributes decoded from one telemetry message.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// A single telemetry attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// Whole number.
    Integer(i64),
    /// Fractional number.
    Float(f64),
    /// Boolean flag.
    Bool(bool),
    /// Point in time.
    Timestamp(DateTime<Utc>),
    /// Free text.
    Text(String),
}

impl AttributeValue {
    /// Interprets the value as an integer.
    ///
    /// Floats are accepted when they have no fractional part, booleans map to
    /// 0/1 and text is parsed. Timestamps are never integers.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            #[allow(clippy::cast_possible_truncation)]
            Self::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            Self::Bool(v) => Some(i64::from(*v)),
            Self::Text(s) => s.trim().parse().ok(),
            Self::Float(_) | Self::Timestamp(_) => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Timestamp(ts) => write!(
                f,
                "{}",
                ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
            ),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// The latest known attribute set of one device.
///
/// Records are immutable once stored in the cache; every update produces a
/// new record that replaces the previous one as a whole.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    attributes: Attributes,
    topics: BTreeSet<String>,
    updated_at: DateTime<Utc>,
    message_count: u64,
}

impl TelemetryRecord {
    /// Creates a record from the first decoded message of a device.
    #[must_use]
    pub fn new(topic: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            attributes,
            topics: BTreeSet::from([topic.into()]),
            updated_at: Utc::now(),
            message_count: 1,
        }
    }

    /// Returns a new record with `update` merged over this one.
    ///
    /// Attributes present in `update` replace the existing values; attributes
    /// not mentioned are carried over unchanged.
    #[must_use]
    pub fn merged(&self, topic: &str, update: Attributes) -> Self {
        let mut next = self.clone();
        next.attributes.extend(update);
        if !next.topics.contains(topic) {
            next.topics.insert(topic.to_string());
        }
        next.updated_at = Utc::now();
        next.message_count += 1;
        next
    }

    /// Returns an attribute by name.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    /// Returns an attribute interpreted as an integer.
    #[must_use]
    pub fn integer(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(AttributeValue::as_i64)
    }

    /// Returns all attributes.
    #[must_use]
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Returns the topics this record has been fed from.
    #[must_use]
    pub fn topics(&self) -> &BTreeSet<String> {
        &self.topics
    }

    /// Returns when the record was last updated.
    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns how many messages have been merged into this record.
    #[must_use]
    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    /// Renders the attributes as two-column report lines.
    ///
    /// Timestamps are shown in local time.
    #[must_use]
    pub fn report_lines(&self) -> Vec<String> {
        const KEY_WIDTH: usize = 25;
        const VALUE_WIDTH: usize = 25;

        let cells: Vec<(&String, String)> = self
            .attributes
            .iter()
            .map(|(k, v)| (k, v.to_string()))
            .collect();

        cells
            .chunks(2)
            .map(|row| match row {
                [(k1, v1), (k2, v2)] => {
                    format!("{k1:<KEY_WIDTH$}: {v1:<VALUE_WIDTH$} {k2:<KEY_WIDTH$}: {v2}")
                }
                [(k, v)] => format!("{k:<KEY_WIDTH$}: {v}"),
                _ => String::new(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, AttributeValue)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn as_i64_conversions() {
        assert_eq!(AttributeValue::Integer(5).as_i64(), Some(5));
        assert_eq!(AttributeValue::Float(61.0).as_i64(), Some(61));
        assert_eq!(AttributeValue::Float(61.5).as_i64(), None);
        assert_eq!(AttributeValue::Bool(true).as_i64(), Some(1));
        assert_eq!(AttributeValue::Text(" 42 ".to_string()).as_i64(), Some(42));
        assert_eq!(AttributeValue::Text("n/a".to_string()).as_i64(), None);
    }

    #[test]
    fn merge_replaces_and_preserves() {
        let first = TelemetryRecord::new(
            "dt/a/m/s/one",
            attrs(&[
                ("main_battery_soc", AttributeValue::Integer(50)),
                ("ac_output_power_switch", AttributeValue::Integer(0)),
            ]),
        );

        let second = first.merged(
            "dt/a/m/s/two",
            attrs(&[("main_battery_soc", AttributeValue::Integer(61))]),
        );

        assert_eq!(second.integer("main_battery_soc"), Some(61));
        assert_eq!(second.integer("ac_output_power_switch"), Some(0));
        assert_eq!(second.message_count(), 2);
        assert_eq!(second.topics().len(), 2);
        // Source record is untouched
        assert_eq!(first.integer("main_battery_soc"), Some(50));
    }

    #[test]
    fn report_lines_pair_attributes() {
        let record = TelemetryRecord::new(
            "t",
            attrs(&[
                ("a", AttributeValue::Integer(1)),
                ("b", AttributeValue::Text("x".to_string())),
                ("c", AttributeValue::Bool(false)),
            ]),
        );

        let lines = record.report_lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("a "));
        assert!(lines[0].contains("b "));
        assert!(lines[1].starts_with("c "));
        assert!(lines[1].ends_with(": false"));
    }
}
