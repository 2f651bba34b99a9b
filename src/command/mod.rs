// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device commands.
//!
//! A logical [`DeviceCommand`] is turned into a transport-level
//! [`CommandRequest`] by a device-specific [`CommandEncoder`], then published
//! by the [`CommandIssuer`].
//!
//! | Command | Purpose |
//! |---------|---------|
//! | [`DeviceCommand::StatusRequest`] | Ask the device to publish its full status |
//! | [`DeviceCommand::SetAcOutput`] | Switch the AC output relay on or off |
//!
//! # Examples
//!
//! ```
//! use solix_relay::command::{CommandEncoder, DeviceCommand, JsonCommandEncoder};
//! use solix_relay::device::Device;
//!
//! let device = Device::new("SN1", "A1790");
//! let encoder = JsonCommandEncoder::new("relay-1");
//!
//! let request = encoder
//!     .encode(&device, DeviceCommand::SetAcOutput { enabled: true })
//!     .unwrap();
//! assert_eq!(request.topic(), "cmd/anker_power/A1790/SN1/req");
//! assert!(request.ack_deadline().is_none());
//! ```

mod issuer;

pub use issuer::CommandIssuer;

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::device::Device;
use crate::error::CommandError;

/// A logical command understood by the power device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceCommand {
    /// Request an immediate status publish.
    StatusRequest,
    /// Switch the AC output.
    SetAcOutput {
        /// Whether the output should be on.
        enabled: bool,
    },
}

impl DeviceCommand {
    /// Returns the command name used on the wire.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::StatusRequest => "status_request",
            Self::SetAcOutput { .. } => "set_ac_output",
        }
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StatusRequest => f.write_str(self.name()),
            Self::SetAcOutput { enabled } => {
                write!(f, "{}({})", self.name(), if *enabled { "on" } else { "off" })
            }
        }
    }
}

/// A command ready to be published: topic, payload and optional ack deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    topic: String,
    payload: Vec<u8>,
    command: DeviceCommand,
    ack_deadline: Option<Duration>,
}

impl CommandRequest {
    /// Creates a request without an acknowledgment deadline.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: Vec<u8>, command: DeviceCommand) -> Self {
        Self {
            topic: topic.into(),
            payload,
            command,
            ack_deadline: None,
        }
    }

    /// Sets how long the publisher waits for the broker's acknowledgment.
    #[must_use]
    pub fn with_ack_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.ack_deadline = deadline;
        self
    }

    /// Returns the topic to publish on.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Returns the encoded payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Returns the logical command this request encodes.
    #[must_use]
    pub fn command(&self) -> DeviceCommand {
        self.command
    }

    /// Returns the acknowledgment deadline, if any.
    #[must_use]
    pub fn ack_deadline(&self) -> Option<Duration> {
        self.ack_deadline
    }
}

/// Encodes logical commands for a specific device family.
pub trait CommandEncoder: Send + Sync {
    /// Encodes `command` for `device`.
    ///
    /// # Errors
    ///
    /// Returns `CommandError` if the command cannot be encoded for the device.
    fn encode(
        &self,
        device: &Device,
        command: DeviceCommand,
    ) -> Result<CommandRequest, CommandError>;
}

/// Encodes commands as a JSON `head`/`payload` envelope.
///
/// The payload is itself a JSON document serialized into a string, the same
/// shape [`JsonTelemetryDecoder`](crate::telemetry::JsonTelemetryDecoder)
/// unwraps on the telemetry side.
#[derive(Debug, Clone)]
pub struct JsonCommandEncoder {
    client_id: String,
    models: Option<Vec<String>>,
}

#[derive(Serialize)]
struct Envelope<'a> {
    head: Head<'a>,
    payload: String,
}

#[derive(Serialize)]
struct Head<'a> {
    msg_id: Uuid,
    client_id: &'a str,
    timestamp: i64,
}

#[derive(Serialize)]
struct Body<'a> {
    command: &'a str,
    sn: &'a str,
    pn: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    enabled: Option<u8>,
}

impl JsonCommandEncoder {
    /// Creates an encoder that accepts any device model.
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            models: None,
        }
    }

    /// Restricts the encoder to the given model codes.
    #[must_use]
    pub fn for_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = Some(models.into_iter().map(Into::into).collect());
        self
    }

    fn supports(&self, model: &str) -> bool {
        self.models
            .as_ref()
            .is_none_or(|models| models.iter().any(|m| m == model))
    }
}

impl CommandEncoder for JsonCommandEncoder {
    fn encode(
        &self,
        device: &Device,
        command: DeviceCommand,
    ) -> Result<CommandRequest, CommandError> {
        if !self.supports(device.model()) {
            return Err(CommandError::Unsupported {
                model: device.model().to_string(),
                command: command.name().to_string(),
            });
        }

        let encode_err = |e: serde_json::Error| CommandError::Encode {
            command: command.name().to_string(),
            message: e.to_string(),
        };

        let body = Body {
            command: command.name(),
            sn: device.serial(),
            pn: device.model(),
            enabled: match command {
                DeviceCommand::StatusRequest => None,
                DeviceCommand::SetAcOutput { enabled } => Some(u8::from(enabled)),
            },
        };
        let envelope = Envelope {
            head: Head {
                msg_id: Uuid::new_v4(),
                client_id: &self.client_id,
                timestamp: Utc::now().timestamp(),
            },
            payload: serde_json::to_string(&body).map_err(encode_err)?,
        };
        let payload = serde_json::to_vec(&envelope).map_err(encode_err)?;

        Ok(CommandRequest::new(device.command_topic(), payload, command))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    fn inner_payload(request: &CommandRequest) -> Value {
        let envelope: Value = serde_json::from_slice(request.payload()).unwrap();
        assert!(envelope["head"]["msg_id"].is_string());
        serde_json::from_str(envelope["payload"].as_str().unwrap()).unwrap()
    }

    #[test]
    fn command_display() {
        assert_eq!(DeviceCommand::StatusRequest.to_string(), "status_request");
        assert_eq!(
            DeviceCommand::SetAcOutput { enabled: false }.to_string(),
            "set_ac_output(off)"
        );
    }

    #[test]
    fn encodes_set_ac_output() {
        let device = Device::new("SN1", "A1790");
        let request = JsonCommandEncoder::new("relay")
            .encode(&device, DeviceCommand::SetAcOutput { enabled: true })
            .unwrap();

        let body = inner_payload(&request);
        assert_eq!(body["command"], "set_ac_output");
        assert_eq!(body["sn"], "SN1");
        assert_eq!(body["pn"], "A1790");
        assert_eq!(body["enabled"], 1);
        assert_eq!(
            request.command(),
            DeviceCommand::SetAcOutput { enabled: true }
        );
    }

    #[test]
    fn status_request_has_no_enabled_field() {
        let device = Device::new("SN1", "A1790");
        let request = JsonCommandEncoder::new("relay")
            .encode(&device, DeviceCommand::StatusRequest)
            .unwrap();

        let body = inner_payload(&request);
        assert_eq!(body["command"], "status_request");
        assert!(body.get("enabled").is_none());
    }

    #[test]
    fn restricted_encoder_rejects_other_models() {
        let encoder = JsonCommandEncoder::new("relay").for_models(["A1790"]);
        let err = encoder
            .encode(&Device::new("SN2", "A1780"), DeviceCommand::StatusRequest)
            .unwrap_err();
        assert!(matches!(err, CommandError::Unsupported { .. }));
    }

    #[test]
    fn ack_deadline_is_optional() {
        let request = CommandRequest::new("t", Vec::new(), DeviceCommand::StatusRequest)
            .with_ack_deadline(Some(Duration::from_secs(2)));
        assert_eq!(request.ack_deadline(), Some(Duration::from_secs(2)));
    }
}
