// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Runtime configuration.
//!
//! Configuration is read from `SOLIX_*` environment variables by
//! [`Config::from_env`]. [`Config::from_lookup`] takes any lookup function,
//! which keeps tests away from the process environment.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `SOLIX_MQTT_HOST` | derived from `SOLIX_COUNTRY` |
//! | `SOLIX_MQTT_PORT` | `1883` |
//! | `SOLIX_USER` / `SOLIX_PASSWORD` | none |
//! | `SOLIX_COUNTRY` | `DE` |
//! | `SOLIX_DEVICE_SN` | required |
//! | `SOLIX_DEVICE_PN` | `A1790` |
//! | `SOLIX_PRODUCT_CODES` | `A1790` |
//! | `SOLIX_SOC_HIGH` / `SOLIX_SOC_LOW` | `60` / `55` |
//! | `SOLIX_CYCLE_SECS` | `30` |
//! | `SOLIX_POLL_TIMEOUT_SECS` | `60` |
//! | `SOLIX_TRIGGER_ON_TELEMETRY` | `false` |

use std::str::FromStr;
use std::time::Duration;

use crate::controller::AttributeKeys;
use crate::device::Device;
use crate::error::ConfigError;
use crate::types::ControlThresholds;

/// Default product code of the controlled power station.
pub const DEFAULT_PRODUCT_CODE: &str = "A1790";

/// Default broker country code.
pub const DEFAULT_COUNTRY: &str = "DE";

const EU_BROKER_HOST: &str = "aiot-mqtt-eu.anker.com";
const COM_BROKER_HOST: &str = "aiot-mqtt-us.anker.com";

const EU_COUNTRIES: &[&str] = &[
    "AT", "BE", "BG", "CH", "CY", "CZ", "DE", "DK", "EE", "ES", "FI", "FR", "GB", "GR", "HR",
    "HU", "IE", "IS", "IT", "LI", "LT", "LU", "LV", "MT", "NL", "NO", "PL", "PT", "RO", "SE",
    "SI", "SK",
];

/// Returns the default broker host for a country code.
#[must_use]
pub fn default_broker_host(country: &str) -> &'static str {
    if EU_COUNTRIES
        .iter()
        .any(|c| c.eq_ignore_ascii_case(country.trim()))
    {
        EU_BROKER_HOST
    } else {
        COM_BROKER_HOST
    }
}

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Broker host name.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Optional username and password.
    pub credentials: Option<(String, String)>,
    /// Account country code.
    pub country: String,
}

impl BrokerConfig {
    /// Creates a broker configuration for `host` on the default port.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 1883,
            credentials: None,
            country: DEFAULT_COUNTRY.to_string(),
        }
    }

    /// Sets the port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the credentials.
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }
}

/// Which device to control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSelection {
    /// Serial number.
    pub serial: String,
    /// Product code of the device.
    pub model: String,
    /// Product codes accepted when resolving the device.
    pub product_codes: Vec<String>,
}

impl DeviceSelection {
    /// Selects a device by serial with the default product code.
    #[must_use]
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            model: DEFAULT_PRODUCT_CODE.to_string(),
            product_codes: vec![DEFAULT_PRODUCT_CODE.to_string()],
        }
    }

    /// Returns the configured device.
    #[must_use]
    pub fn device(&self) -> Device {
        Device::new(self.serial.clone(), self.model.clone())
    }
}

/// Timing of one control cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleTiming {
    /// Wait after subscribing before the status request.
    pub settle: Duration,
    /// How long a status request waits for the broker's acknowledgment.
    pub status_ack_deadline: Duration,
    /// Wait after the status request before reading the cache.
    pub data_wait: Duration,
    /// Window of each cycle's poll.
    pub poll_timeout: Duration,
    /// Sleep between cycles.
    pub cycle_interval: Duration,
}

impl Default for CycleTiming {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(2),
            status_ack_deadline: Duration::from_secs(2),
            data_wait: Duration::from_secs(2),
            poll_timeout: Duration::from_secs(60),
            cycle_interval: Duration::from_secs(30),
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Broker connection.
    pub broker: BrokerConfig,
    /// Controlled device.
    pub device: DeviceSelection,
    /// Hysteresis band.
    pub thresholds: ControlThresholds,
    /// Cycle timing.
    pub timing: CycleTiming,
    /// Telemetry attributes read by the decision.
    pub attribute_keys: AttributeKeys,
    /// End each poll early once the controlled device reports.
    pub trigger_on_telemetry: bool,
}

impl Config {
    /// Creates a configuration with defaults for everything but the device.
    #[must_use]
    pub fn new(broker: BrokerConfig, device: DeviceSelection) -> Self {
        Self {
            broker,
            device,
            thresholds: ControlThresholds::default(),
            timing: CycleTiming::default(),
            attribute_keys: AttributeKeys::default(),
            trigger_on_telemetry: false,
        }
    }

    /// Sets the hysteresis thresholds.
    #[must_use]
    pub fn with_thresholds(mut self, thresholds: ControlThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Sets the cycle timing.
    #[must_use]
    pub fn with_timing(mut self, timing: CycleTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or a value is
    /// invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`.
    ///
    /// Empty values count as unset.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let country = get("SOLIX_COUNTRY").unwrap_or_else(|| DEFAULT_COUNTRY.to_string());
        let host = get("SOLIX_MQTT_HOST")
            .unwrap_or_else(|| default_broker_host(&country).to_string());
        let mut broker = BrokerConfig::new(host)
            .with_port(parse_or(&get, "SOLIX_MQTT_PORT", 1883)?);
        broker.country = country;
        if let Some(user) = get("SOLIX_USER") {
            broker = broker.with_credentials(user, get("SOLIX_PASSWORD").unwrap_or_default());
        }

        let serial =
            get("SOLIX_DEVICE_SN").ok_or_else(|| ConfigError::Missing("SOLIX_DEVICE_SN".into()))?;
        let mut device = DeviceSelection::new(serial);
        if let Some(model) = get("SOLIX_DEVICE_PN") {
            device.model = model;
        }
        if let Some(codes) = get("SOLIX_PRODUCT_CODES") {
            device.product_codes = codes
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect();
        }
        if device.product_codes.is_empty() {
            return Err(ConfigError::Invalid {
                key: "SOLIX_PRODUCT_CODES".into(),
                value: String::new(),
                message: "at least one product code is required".into(),
            });
        }

        let low = parse_or(&get, "SOLIX_SOC_LOW", 55u8)?;
        let high = parse_or(&get, "SOLIX_SOC_HIGH", 60u8)?;
        let thresholds =
            ControlThresholds::from_percent(low, high).map_err(|e| ConfigError::Invalid {
                key: "SOLIX_SOC_LOW/SOLIX_SOC_HIGH".into(),
                value: format!("{low}/{high}"),
                message: e.to_string(),
            })?;

        let timing = CycleTiming {
            cycle_interval: Duration::from_secs(parse_or(&get, "SOLIX_CYCLE_SECS", 30)?),
            poll_timeout: Duration::from_secs(parse_or(&get, "SOLIX_POLL_TIMEOUT_SECS", 60)?),
            ..CycleTiming::default()
        };

        Ok(Self {
            trigger_on_telemetry: parse_bool(&get, "SOLIX_TRIGGER_ON_TELEMETRY")?,
            ..Self::new(broker, device)
                .with_thresholds(thresholds)
                .with_timing(timing)
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key: key.to_string(),
            message: e.to_string(),
            value,
        }),
    }
}

fn parse_bool<G>(get: &G, key: &str) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.to_ascii_lowercase()).as_deref() {
        None | Some("0" | "false" | "no" | "off") => Ok(false),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some(other) => Err(ConfigError::Invalid {
            key: key.to_string(),
            value: other.to_string(),
            message: "expected a boolean".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_need_only_a_serial() {
        let config = Config::from_lookup(lookup(&[("SOLIX_DEVICE_SN", "SN1")])).unwrap();

        assert_eq!(config.broker.host, EU_BROKER_HOST);
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.broker.credentials, None);
        assert_eq!(config.device.device(), Device::new("SN1", "A1790"));
        assert_eq!(config.device.product_codes, vec!["A1790".to_string()]);
        assert_eq!(config.thresholds, ControlThresholds::default());
        assert_eq!(config.timing, CycleTiming::default());
        assert!(!config.trigger_on_telemetry);
    }

    #[test]
    fn missing_serial_is_an_error() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(ref key) if key == "SOLIX_DEVICE_SN"));
    }

    #[test]
    fn reads_all_variables() {
        let config = Config::from_lookup(lookup(&[
            ("SOLIX_MQTT_HOST", "broker.local"),
            ("SOLIX_MQTT_PORT", "8883"),
            ("SOLIX_USER", "me"),
            ("SOLIX_PASSWORD", "secret"),
            ("SOLIX_COUNTRY", "US"),
            ("SOLIX_DEVICE_SN", "SN9"),
            ("SOLIX_DEVICE_PN", "A1780"),
            ("SOLIX_PRODUCT_CODES", "A1780, A1790"),
            ("SOLIX_SOC_HIGH", "80"),
            ("SOLIX_SOC_LOW", "20"),
            ("SOLIX_CYCLE_SECS", "10"),
            ("SOLIX_POLL_TIMEOUT_SECS", "15"),
            ("SOLIX_TRIGGER_ON_TELEMETRY", "yes"),
        ]))
        .unwrap();

        assert_eq!(config.broker.host, "broker.local");
        assert_eq!(config.broker.port, 8883);
        assert_eq!(
            config.broker.credentials,
            Some(("me".to_string(), "secret".to_string()))
        );
        assert_eq!(config.broker.country, "US");
        assert_eq!(config.device.model, "A1780");
        assert_eq!(config.device.product_codes, vec!["A1780", "A1790"]);
        assert_eq!(config.thresholds.low().value(), 20);
        assert_eq!(config.thresholds.high().value(), 80);
        assert_eq!(config.timing.cycle_interval, Duration::from_secs(10));
        assert_eq!(config.timing.poll_timeout, Duration::from_secs(15));
        assert!(config.trigger_on_telemetry);
    }

    #[test]
    fn country_selects_broker_region() {
        assert_eq!(default_broker_host("de"), EU_BROKER_HOST);
        assert_eq!(default_broker_host("US"), COM_BROKER_HOST);

        let config = Config::from_lookup(lookup(&[
            ("SOLIX_DEVICE_SN", "SN1"),
            ("SOLIX_COUNTRY", "JP"),
        ]))
        .unwrap();
        assert_eq!(config.broker.host, COM_BROKER_HOST);
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let err = Config::from_lookup(lookup(&[
            ("SOLIX_DEVICE_SN", "SN1"),
            ("SOLIX_SOC_HIGH", "50"),
            ("SOLIX_SOC_LOW", "55"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn malformed_numbers_name_the_variable() {
        let err = Config::from_lookup(lookup(&[
            ("SOLIX_DEVICE_SN", "SN1"),
            ("SOLIX_MQTT_PORT", "mqtt"),
        ]))
        .unwrap_err();
        assert!(
            matches!(err, ConfigError::Invalid { ref key, ref value, .. }
                if key == "SOLIX_MQTT_PORT" && value == "mqtt")
        );
    }

    #[test]
    fn bad_boolean_is_rejected() {
        let err = Config::from_lookup(lookup(&[
            ("SOLIX_DEVICE_SN", "SN1"),
            ("SOLIX_TRIGGER_ON_TELEMETRY", "maybe"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn empty_product_codes_are_rejected() {
        let err = Config::from_lookup(lookup(&[
            ("SOLIX_DEVICE_SN", "SN1"),
            ("SOLIX_PRODUCT_CODES", " , "),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
