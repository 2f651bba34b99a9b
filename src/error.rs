// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the relay controller.
//!
//! The hierarchy separates the failure classes the control loop has to tell
//! apart: connection loss, telemetry decode failures, command failures and
//! configuration problems. Everything funnels into [`Error`], which is what
//! escapes the control loop and reaches the session lifecycle.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Error occurred during value validation.
    #[error("value error: {0}")]
    Value(#[from] ValueError),

    /// Error occurred during transport communication.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Error occurred while decoding telemetry.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Error occurred while building or issuing a device command.
    #[error("command error: {0}")]
    Command(#[from] CommandError),

    /// Configuration is missing or invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// No device matching the requested product codes was found.
    #[error("no device found for product codes {product_codes:?}")]
    DeviceNotFound {
        /// The product codes that were searched for.
        product_codes: Vec<String>,
    },

    /// The session is not connected.
    #[error("session is not connected")]
    NotConnected,
}

impl Error {
    /// Returns `true` if the error means the transport connection is gone.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::NotConnected | Self::Protocol(_))
    }
}

/// Errors related to value validation and constraints.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// A numeric value is outside the allowed range.
    #[error("value {actual} is out of range [{min}, {max}]")]
    OutOfRange {
        /// Minimum allowed value.
        min: u16,
        /// Maximum allowed value.
        max: u16,
        /// The actual value that was provided.
        actual: u16,
    },

    /// The low threshold is not strictly below the high threshold.
    #[error("low threshold {low}% must be below high threshold {high}%")]
    InvalidThresholds {
        /// The low threshold.
        low: u8,
        /// The high threshold.
        high: u8,
    },

    /// An invalid switch state string was provided.
    #[error("invalid switch state: {0}")]
    InvalidSwitchState(String),
}

/// Errors related to transport communication.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// MQTT client request failed.
    #[cfg(feature = "mqtt")]
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Connection to the broker failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// An established connection was lost.
    #[error("connection lost")]
    ConnectionLost,

    /// Invalid broker address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// Errors related to decoding telemetry payloads.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload is not valid UTF-8.
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    /// Unexpected payload format.
    #[error("unexpected payload format: {0}")]
    UnexpectedFormat(String),
}

/// Errors related to device commands.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The command could not be encoded for the device.
    #[error("failed to encode {command}: {message}")]
    Encode {
        /// The logical command name.
        command: String,
        /// Description of the failure.
        message: String,
    },

    /// The device model does not support the command.
    #[error("model {model} does not support {command}")]
    Unsupported {
        /// The device model code.
        model: String,
        /// The logical command name.
        command: String,
    },
}

/// Errors related to process configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required setting is missing.
    #[error("missing required setting {0}")]
    Missing(String),

    /// A setting could not be parsed.
    #[error("invalid value {value:?} for {key}: {message}")]
    Invalid {
        /// The setting name.
        key: String,
        /// The raw value.
        value: String,
        /// Description of the failure.
        message: String,
    },
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
