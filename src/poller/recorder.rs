// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Decode-and-record step of the poller.

use std::sync::Arc;

use crate::device::Device;
use crate::protocol::InboundMessage;
use crate::telemetry::{TelemetryCache, TelemetryDecoder};

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The topic belongs to no known device.
    Unmatched,
    /// The message was decoded and merged into the device's record.
    Merged {
        /// Serial of the device the message belongs to.
        serial: String,
    },
    /// The message belongs to a device but could not be decoded.
    DecodeFailed {
        /// Serial of the device the message belongs to.
        serial: String,
    },
}

impl RecordOutcome {
    /// Returns the serial of the device the message belongs to.
    #[must_use]
    pub fn serial(&self) -> Option<&str> {
        match self {
            Self::Unmatched => None,
            Self::Merged { serial } | Self::DecodeFailed { serial } => Some(serial),
        }
    }
}

/// Decodes inbound messages and merges them into the telemetry cache.
///
/// `record` is synchronous and touches the cache exactly once per message,
/// so a message is either fully merged or not at all.
pub struct TelemetryRecorder {
    devices: Vec<Device>,
    decoder: Arc<dyn TelemetryDecoder>,
    cache: TelemetryCache,
}

impl TelemetryRecorder {
    /// Creates a recorder for `devices`.
    #[must_use]
    pub fn new(devices: Vec<Device>, decoder: Arc<dyn TelemetryDecoder>, cache: TelemetryCache) -> Self {
        Self {
            devices,
            decoder,
            cache,
        }
    }

    /// Returns the cache records are merged into.
    #[must_use]
    pub fn cache(&self) -> &TelemetryCache {
        &self.cache
    }

    /// Returns the device whose telemetry namespace contains `topic`.
    #[must_use]
    pub fn device_for(&self, topic: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.owns_topic(topic))
    }

    /// Records one inbound message.
    ///
    /// Decode failures are logged and leave the cache untouched.
    pub fn record(&self, message: &InboundMessage) -> RecordOutcome {
        let topic = message.topic();

        tracing::info!(
            topic = %topic,
            bytes = message.payload().len(),
            "MQTT message received"
        );

        let Some(device) = self.device_for(topic) else {
            tracing::trace!(topic = %topic, "No known device for topic");
            return RecordOutcome::Unmatched;
        };
        let serial = device.serial().to_string();

        match self.decoder.decode(device, topic, message.payload()) {
            Ok(attributes) => {
                let record = self.cache.merge(&serial, topic, attributes);
                tracing::debug!(
                    device = %serial,
                    attributes = record.attributes().len(),
                    messages = record.message_count(),
                    "Telemetry recorded"
                );
                RecordOutcome::Merged { serial }
            }
            Err(e) => {
                tracing::warn!(
                    device = %serial,
                    topic = %topic,
                    error = %e,
                    "Failed to decode telemetry, message discarded"
                );
                RecordOutcome::DecodeFailed { serial }
            }
        }
    }
}
