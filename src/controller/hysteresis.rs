// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The periodic control loop.

use std::sync::Arc;

use tokio::sync::watch;

use super::{AttributeKeys, Decision, decide};
use crate::command::{CommandEncoder, CommandIssuer, JsonCommandEncoder};
use crate::config::CycleTiming;
use crate::device::Device;
use crate::error::Result;
use crate::poller::{MessagePoller, PollOutcome, PollReport, PollRequest, PollerHandle};
use crate::protocol::{PublishOutcome, Transport};
use crate::telemetry::{JsonTelemetryDecoder, TelemetryCache, TelemetryDecoder};
use crate::types::ControlThresholds;

/// Client id written into command envelopes.
const DEFAULT_CLIENT_ID: &str = "solix_relay";

/// What happened in one control cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Outcome of the previous cycle's poll, if one was still attached.
    pub previous_poll: Option<PollReport>,
    /// Outcome of the status request.
    pub status_request: PublishOutcome,
    /// The control decision.
    pub decision: Decision,
    /// Outcome of the output command, if one was sent.
    pub command: Option<PublishOutcome>,
}

/// Why the control loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The transport connection went away.
    Disconnected,
    /// Shutdown was requested.
    Shutdown,
}

/// Drives the AC output of one device from its reported state of charge.
///
/// Every cycle starts a fresh poll into the shared cache, asks the device
/// for its status, reads what has arrived and switches the output if the
/// SOC has left the band in the direction the output does not match.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use solix_relay::controller::HysteresisController;
/// use solix_relay::device::Device;
/// use solix_relay::protocol::MemoryTransport;
/// use solix_relay::types::ControlThresholds;
///
/// # async fn example() -> solix_relay::Result<()> {
/// let transport = Arc::new(MemoryTransport::new());
/// let mut controller = HysteresisController::new(
///     Device::new("SN1", "A1790"),
///     transport,
///     ControlThresholds::default(),
/// );
///
/// let report = controller.run_cycle().await?;
/// assert!(report.command.is_none());
/// # Ok(())
/// # }
/// ```
pub struct HysteresisController<T> {
    device: Device,
    transport: Arc<T>,
    thresholds: ControlThresholds,
    keys: AttributeKeys,
    timing: CycleTiming,
    trigger_on_telemetry: bool,
    decoder: Arc<dyn TelemetryDecoder>,
    cache: TelemetryCache,
    issuer: CommandIssuer<T>,
    poller: MessagePoller,
    active_poll: Option<PollerHandle>,
}

impl<T: Transport> HysteresisController<T> {
    /// Creates a controller with JSON codecs, default timing and a new cache.
    pub fn new(device: Device, transport: Arc<T>, thresholds: ControlThresholds) -> Self {
        let decoder: Arc<dyn TelemetryDecoder> = Arc::new(JsonTelemetryDecoder);
        let cache = TelemetryCache::new();
        let issuer = CommandIssuer::new(
            Arc::clone(&transport),
            Arc::new(JsonCommandEncoder::new(DEFAULT_CLIENT_ID)),
        );
        let poller = MessagePoller::new(vec![device.clone()], Arc::clone(&decoder), cache.clone());

        Self {
            device,
            transport,
            thresholds,
            keys: AttributeKeys::default(),
            timing: CycleTiming::default(),
            trigger_on_telemetry: false,
            decoder,
            cache,
            issuer,
            poller,
            active_poll: None,
        }
    }

    /// Sets the cycle timing.
    #[must_use]
    pub fn with_timing(mut self, timing: CycleTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Sets the telemetry attributes the decision reads.
    #[must_use]
    pub fn with_attribute_keys(mut self, keys: AttributeKeys) -> Self {
        self.keys = keys;
        self
    }

    /// Ends each poll as soon as the controlled device reports.
    #[must_use]
    pub fn with_trigger_on_telemetry(mut self, enabled: bool) -> Self {
        self.trigger_on_telemetry = enabled;
        self
    }

    /// Replaces the command encoder.
    #[must_use]
    pub fn with_encoder(mut self, encoder: Arc<dyn CommandEncoder>) -> Self {
        self.issuer = CommandIssuer::new(Arc::clone(&self.transport), encoder);
        self
    }

    /// Replaces the telemetry decoder.
    #[must_use]
    pub fn with_decoder(mut self, decoder: Arc<dyn TelemetryDecoder>) -> Self {
        self.decoder = decoder;
        self.rebuild_poller();
        self
    }

    /// Writes telemetry into `cache` instead of a private one.
    #[must_use]
    pub fn with_cache(mut self, cache: TelemetryCache) -> Self {
        self.cache = cache;
        self.rebuild_poller();
        self
    }

    fn rebuild_poller(&mut self) {
        self.poller = MessagePoller::new(
            vec![self.device.clone()],
            Arc::clone(&self.decoder),
            self.cache.clone(),
        );
    }

    /// Returns the controlled device.
    #[must_use]
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Returns the telemetry cache.
    #[must_use]
    pub fn cache(&self) -> &TelemetryCache {
        &self.cache
    }

    /// Returns the thresholds.
    #[must_use]
    pub fn thresholds(&self) -> ControlThresholds {
        self.thresholds
    }

    /// Runs one control cycle.
    ///
    /// # Errors
    ///
    /// Returns an error if subscribing, the status request or the output
    /// command fails at the transport level.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let previous_poll = self.restart_poll().await?;

        tokio::time::sleep(self.timing.settle).await;

        let status_request = self
            .issuer
            .request_status(&self.device, self.timing.status_ack_deadline)
            .await?;
        if status_request.is_published() {
            tracing::info!(device = %self.device.serial(), "Status request published");
        } else {
            tracing::info!(
                device = %self.device.serial(),
                ?status_request,
                "Status request not acknowledged"
            );
        }

        tokio::time::sleep(self.timing.data_wait).await;

        let record = self.cache.get(self.device.serial());
        if let Some(record) = &record {
            tracing::info!(
                device = %self.device.serial(),
                "battery_soc: {}",
                display_attribute(record.get(&self.keys.soc))
            );
            tracing::info!(
                device = %self.device.serial(),
                "ac switch: {}",
                display_attribute(record.get(&self.keys.switch))
            );
            for line in record.report_lines() {
                tracing::debug!(device = %self.device.serial(), "{line}");
            }
        }

        let decision = decide(record.as_deref(), self.thresholds, &self.keys);
        let command = match &decision {
            Decision::NoTelemetry => {
                tracing::info!(device = %self.device.serial(), "No telemetry received yet");
                None
            }
            Decision::Incomplete { attribute, reason } => {
                tracing::warn!(
                    device = %self.device.serial(),
                    attribute = %attribute,
                    reason = %reason,
                    "Telemetry incomplete, skipping decision"
                );
                None
            }
            Decision::Hold(reading) => {
                tracing::debug!(
                    device = %self.device.serial(),
                    %reading,
                    thresholds = %self.thresholds,
                    "Holding AC output"
                );
                None
            }
            Decision::Enable(reading) | Decision::Disable(reading) => {
                let enabled = decision.requested_output() == Some(true);
                tracing::info!(
                    device = %self.device.serial(),
                    %reading,
                    thresholds = %self.thresholds,
                    "Switching AC output {}",
                    if enabled { "on" } else { "off" }
                );
                Some(self.issuer.set_output_state(&self.device, enabled).await?)
            }
        };

        Ok(CycleReport {
            previous_poll,
            status_request,
            decision,
            command,
        })
    }

    /// Repeats control cycles until the connection drops or `shutdown`
    /// becomes `true`.
    ///
    /// A cycle in progress is completed before shutdown is honored. The
    /// sleep between cycles is interrupted immediately by shutdown or by the
    /// running poll losing its connection.
    ///
    /// # Errors
    ///
    /// Returns the first error a cycle produces while the transport is still
    /// connected.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<LoopExit> {
        tracing::info!(
            device = %self.device.serial(),
            thresholds = %self.thresholds,
            interval_secs = self.timing.cycle_interval.as_secs(),
            "Starting control loop"
        );

        loop {
            if *shutdown.borrow() {
                return Ok(LoopExit::Shutdown);
            }
            if !self.transport.is_connected() {
                tracing::info!("Session disconnected, leaving control loop");
                return Ok(LoopExit::Disconnected);
            }

            if let Err(e) = self.run_cycle().await {
                if e.is_connection_error() && !self.transport.is_connected() {
                    tracing::info!(error = %e, "Session disconnected during cycle");
                    return Ok(LoopExit::Disconnected);
                }
                return Err(e);
            }

            if let Some(exit) = self.pause(&mut shutdown).await {
                return Ok(exit);
            }
        }
    }

    /// Sleeps for the cycle interval. Ends early on shutdown or when the
    /// running poll sees the connection drop.
    async fn pause(&mut self, shutdown: &mut watch::Receiver<bool>) -> Option<LoopExit> {
        let interval = tokio::time::sleep(self.timing.cycle_interval);
        tokio::pin!(interval);
        let mut watch_poll = self.active_poll.is_some();

        loop {
            tokio::select! {
                biased;
                () = shutdown_requested(shutdown) => return Some(LoopExit::Shutdown),
                outcome = poll_ended(self.active_poll.as_mut()), if watch_poll => {
                    if outcome == PollOutcome::ConnectionLost {
                        tracing::info!("Session disconnected, leaving control loop");
                        return Some(LoopExit::Disconnected);
                    }
                    // Timed out or triggered; wait out the interval
                    watch_poll = false;
                }
                () = &mut interval => return None,
            }
        }
    }

    /// Cancels the running poll, if any.
    pub async fn stop_poller(&mut self) -> Option<PollReport> {
        let handle = self.active_poll.take()?;
        let report = handle.cancel().await;
        tracing::debug!(outcome = ?report.outcome, "Poller stopped");
        Some(report)
    }

    async fn restart_poll(&mut self) -> Result<Option<PollReport>> {
        let previous = self.stop_poller().await;

        let mut request = PollRequest::new(self.timing.poll_timeout)
            .topic(self.device.subscription_pattern());
        if self.trigger_on_telemetry {
            request = request.trigger_device(self.device.serial());
        }

        self.active_poll = Some(self.poller.start(self.transport.as_ref(), request).await?);
        Ok(previous)
    }
}

impl<T> std::fmt::Debug for HysteresisController<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HysteresisController")
            .field("device", &self.device)
            .field("thresholds", &self.thresholds)
            .field("timing", &self.timing)
            .finish_non_exhaustive()
    }
}

fn display_attribute(value: Option<&crate::telemetry::AttributeValue>) -> String {
    value.map_or_else(|| "n/a".to_string(), ToString::to_string)
}

async fn poll_ended(poll: Option<&mut PollerHandle>) -> PollOutcome {
    match poll {
        Some(handle) => handle.finished().await.outcome.clone(),
        None => std::future::pending().await,
    }
}

/// Resolves once `true` is observed; never if the sender goes away.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let requested = shutdown.wait_for(|stop| *stop).await.is_ok();
    if !requested {
        std::future::pending::<()>().await;
    }
}
