// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Publishing device commands through the session transport.

use std::sync::Arc;
use std::time::Duration;

use super::{CommandEncoder, DeviceCommand};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::protocol::{PublishOutcome, Transport};

/// Sends status requests and output state changes to a device.
///
/// The issuer never retries. A command that is not acknowledged is reported
/// as [`PublishOutcome::NotPublished`]; whether it took effect is visible only
/// through later telemetry.
pub struct CommandIssuer<T> {
    transport: Arc<T>,
    encoder: Arc<dyn CommandEncoder>,
}

impl<T: Transport> CommandIssuer<T> {
    /// Creates an issuer publishing through `transport`.
    pub fn new(transport: Arc<T>, encoder: Arc<dyn CommandEncoder>) -> Self {
        Self { transport, encoder }
    }

    /// Asks the device to publish its status.
    ///
    /// Waits at most `ack_deadline` for the broker to acknowledge the
    /// publish; does not wait for the telemetry response.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConnected` if the session is down, or a protocol or
    /// command error if the request cannot be built or handed off.
    pub async fn request_status(
        &self,
        device: &Device,
        ack_deadline: Duration,
    ) -> Result<PublishOutcome> {
        self.issue(device, DeviceCommand::StatusRequest, Some(ack_deadline))
            .await
    }

    /// Switches the AC output without waiting for acknowledgment.
    ///
    /// # Errors
    ///
    /// Same as [`request_status`](Self::request_status).
    pub async fn set_output_state(&self, device: &Device, enabled: bool) -> Result<PublishOutcome> {
        self.issue(device, DeviceCommand::SetAcOutput { enabled }, None)
            .await
    }

    /// Switches the AC output and waits at most `ack_deadline` for the
    /// broker's acknowledgment.
    ///
    /// # Errors
    ///
    /// Same as [`request_status`](Self::request_status).
    pub async fn set_output_state_with_ack(
        &self,
        device: &Device,
        enabled: bool,
        ack_deadline: Duration,
    ) -> Result<PublishOutcome> {
        self.issue(
            device,
            DeviceCommand::SetAcOutput { enabled },
            Some(ack_deadline),
        )
        .await
    }

    async fn issue(
        &self,
        device: &Device,
        command: DeviceCommand,
        ack_deadline: Option<Duration>,
    ) -> Result<PublishOutcome> {
        if !self.transport.is_connected() {
            return Err(Error::NotConnected);
        }

        let request = self
            .encoder
            .encode(device, command)?
            .with_ack_deadline(ack_deadline);
        let outcome = self.transport.publish(&request).await?;

        tracing::debug!(
            device = %device.serial(),
            command = %command,
            ?outcome,
            "Command issued"
        );
        Ok(outcome)
    }
}

impl<T> std::fmt::Debug for CommandIssuer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandIssuer").finish_non_exhaustive()
    }
}
