// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Session lifecycle.
//!
//! [`SessionManager`] owns everything with a lifetime: the resolved device,
//! the transport session and the controller with its poll task. Whatever
//! way [`run`](SessionManager::run) ends, the poll is cancelled first and
//! the session is closed afterwards, exactly once.
//!
//! ```text
//! resolve device ─▶ start session ─▶ control loop ─┬─▶ cancel poll ─▶ disconnect
//!       │                 │                 │      │
//!       └──── error ──────┴──── error ──────┴──────┘
//! ```

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::Config;
use crate::controller::{HysteresisController, LoopExit};
use crate::device::DeviceResolver;
use crate::error::Result;
use crate::protocol::{SessionConnector, Transport};
use crate::telemetry::TelemetryCache;

/// Where the lifecycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Not started.
    Idle,
    /// Looking up the device.
    ResolvingDevice,
    /// Connecting the transport session.
    StartingSession,
    /// Running control cycles.
    Controlling,
    /// Resources released.
    Closed,
}

/// Runs the relay for one device over one session.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use solix_relay::config::{BrokerConfig, Config, DeviceSelection};
/// use solix_relay::device::{Device, StaticDeviceResolver};
/// use solix_relay::protocol::{MemoryConnector, MemoryTransport};
/// use solix_relay::session::SessionManager;
///
/// # async fn example() -> solix_relay::Result<()> {
/// let config = Config::new(BrokerConfig::new("localhost"), DeviceSelection::new("SN1"));
/// let resolver = StaticDeviceResolver::single(config.device.device());
/// let connector = MemoryConnector::new(Arc::new(MemoryTransport::new()));
///
/// let (_stop, shutdown) = tokio::sync::watch::channel(false);
/// let mut manager = SessionManager::new(connector, resolver, config);
/// manager.run(shutdown).await?;
/// # Ok(())
/// # }
/// ```
pub struct SessionManager<C: SessionConnector, R> {
    connector: C,
    resolver: R,
    config: Config,
    cache: TelemetryCache,
    stage: Stage,
    transport: Option<Arc<C::Session>>,
    controller: Option<HysteresisController<C::Session>>,
}

impl<C: SessionConnector, R: DeviceResolver> SessionManager<C, R> {
    /// Creates a manager; nothing is connected until [`run`](Self::run).
    pub fn new(connector: C, resolver: R, config: Config) -> Self {
        Self {
            connector,
            resolver,
            config,
            cache: TelemetryCache::new(),
            stage: Stage::Idle,
            transport: None,
            controller: None,
        }
    }

    /// Returns the telemetry cache the controller writes to.
    #[must_use]
    pub fn cache(&self) -> &TelemetryCache {
        &self.cache
    }

    /// Returns the current lifecycle stage.
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Resolves the device, starts the session and runs the control loop
    /// until the session drops, `shutdown` turns `true` or an error escapes.
    ///
    /// Resources are released before this returns. An escaped error is
    /// logged here once and then returned.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the run: device resolution, session
    /// start or a failed control cycle.
    pub async fn run(&mut self, shutdown: watch::Receiver<bool>) -> Result<LoopExit> {
        let result = self.run_until_exit(shutdown).await;

        if let Err(e) = &result {
            match self.stage {
                Stage::StartingSession => {
                    tracing::error!(error = %e, "Failed to start MQTT session");
                }
                stage => tracing::error!(error = %e, ?stage, "Relay stopped with error"),
            }
        }

        self.cleanup().await;
        result
    }

    async fn run_until_exit(&mut self, shutdown: watch::Receiver<bool>) -> Result<LoopExit> {
        self.stage = Stage::ResolvingDevice;
        let device = self
            .resolver
            .lookup_device(&self.config.device.product_codes)
            .await?;

        self.stage = Stage::StartingSession;
        let transport = Arc::new(self.connector.start_session().await?);
        self.transport = Some(Arc::clone(&transport));
        tracing::info!(
            device = %device.serial(),
            country = %self.config.broker.country,
            "MQTT session started"
        );

        self.stage = Stage::Controlling;
        let controller = self.controller.insert(
            HysteresisController::new(device, transport, self.config.thresholds)
                .with_timing(self.config.timing)
                .with_attribute_keys(self.config.attribute_keys.clone())
                .with_trigger_on_telemetry(self.config.trigger_on_telemetry)
                .with_cache(self.cache.clone()),
        );

        let exit = controller.run(shutdown).await?;
        match exit {
            LoopExit::Disconnected => tracing::info!("MQTT session disconnected"),
            LoopExit::Shutdown => tracing::info!("Shutdown requested"),
        }
        Ok(exit)
    }

    /// Cancels the poll and closes the session.
    ///
    /// Safe to call at any point and any number of times; only the first
    /// call after a session was started does any work.
    pub async fn cleanup(&mut self) {
        if let Some(mut controller) = self.controller.take()
            && let Some(report) = controller.stop_poller().await
        {
            tracing::debug!(
                outcome = ?report.outcome,
                received = report.received,
                "Message poller cancelled"
            );
        }

        if let Some(transport) = self.transport.take() {
            tracing::info!("Closing MQTT session");
            if let Err(e) = transport.disconnect().await {
                tracing::warn!(error = %e, "Error while closing MQTT session");
            }
        }

        self.stage = Stage::Closed;
    }
}

impl<C: SessionConnector, R> std::fmt::Debug for SessionManager<C, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("stage", &self.stage)
            .field("connected", &self.transport.is_some())
            .finish_non_exhaustive()
    }
}
