// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device identity and topic addressing.
//!
//! A [`Device`] is resolved once at startup and never changes afterwards.
//! Its serial number keys the telemetry cache, and its identity determines
//! the MQTT topic namespace:
//!
//! - Telemetry: `dt/<app>/<model>/<serial>/...`
//! - Commands: `cmd/<app>/<model>/<serial>/req`
//!
//! ```
//! use solix_relay::device::Device;
//!
//! let device = Device::new("AZVN1234", "A1790");
//! assert_eq!(device.topic_prefix(), "dt/anker_power/A1790/AZVN1234/");
//! assert_eq!(device.subscription_pattern(), "dt/anker_power/A1790/AZVN1234/#");
//! assert_eq!(device.command_topic(), "cmd/anker_power/A1790/AZVN1234/req");
//! ```

mod resolver;

pub use resolver::{DeviceResolver, StaticDeviceResolver};

use std::fmt;

/// Default application namespace used in device topics.
pub const DEFAULT_APP_NAMESPACE: &str = "anker_power";

/// A resolved power device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Device {
    serial: String,
    model: String,
    app: String,
}

impl Device {
    /// Creates a device in the default application namespace.
    #[must_use]
    pub fn new(serial: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_namespace(serial, model, DEFAULT_APP_NAMESPACE)
    }

    /// Creates a device in a specific application namespace.
    #[must_use]
    pub fn with_namespace(
        serial: impl Into<String>,
        model: impl Into<String>,
        app: impl Into<String>,
    ) -> Self {
        Self {
            serial: serial.into(),
            model: model.into(),
            app: app.into(),
        }
    }

    /// Returns the serial number.
    #[must_use]
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Returns the product/model code (e.g., `A1790`).
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Returns the application namespace.
    #[must_use]
    pub fn app(&self) -> &str {
        &self.app
    }

    /// Returns the telemetry topic prefix, including the trailing slash.
    #[must_use]
    pub fn topic_prefix(&self) -> String {
        format!("dt/{}/{}/{}/", self.app, self.model, self.serial)
    }

    /// Returns the wildcard pattern covering all telemetry of this device.
    #[must_use]
    pub fn subscription_pattern(&self) -> String {
        format!("{}#", self.topic_prefix())
    }

    /// Returns the topic commands are published to.
    #[must_use]
    pub fn command_topic(&self) -> String {
        format!("cmd/{}/{}/{}/req", self.app, self.model, self.serial)
    }

    /// Returns `true` if `topic` belongs to this device's telemetry namespace.
    #[must_use]
    pub fn owns_topic(&self, topic: &str) -> bool {
        topic
            .strip_prefix("dt/")
            .and_then(|rest| rest.strip_prefix(self.app.as_str()))
            .and_then(|rest| rest.strip_prefix('/'))
            .and_then(|rest| rest.strip_prefix(self.model.as_str()))
            .and_then(|rest| rest.strip_prefix('/'))
            .and_then(|rest| rest.strip_prefix(self.serial.as_str()))
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.serial, self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_derive_from_identity() {
        let device = Device::with_namespace("SN1", "A1790", "custom_app");
        assert_eq!(device.topic_prefix(), "dt/custom_app/A1790/SN1/");
        assert_eq!(device.command_topic(), "cmd/custom_app/A1790/SN1/req");
    }

    #[test]
    fn owns_topic_matches_namespace() {
        let device = Device::new("SN1", "A1790");
        assert!(device.owns_topic("dt/anker_power/A1790/SN1/param_info"));
        assert!(device.owns_topic("dt/anker_power/A1790/SN1"));
        assert!(!device.owns_topic("dt/anker_power/A1790/SN10/param_info"));
        assert!(!device.owns_topic("cmd/anker_power/A1790/SN1/req"));
        assert!(!device.owns_topic("dt/anker_power/A1791/SN1/param_info"));
    }

    #[test]
    fn display_shows_serial_and_model() {
        assert_eq!(Device::new("SN1", "A1790").to_string(), "SN1 (A1790)");
    }
}
