// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Background message polling.
//!
//! The [`MessagePoller`] subscribes to a set of topic patterns and then runs
//! a task that drains the transport's inbound queue into the
//! [`TelemetryCache`]:
//!
//! ```text
//! transport event loop ──▶ inbound queue ──▶ poller task
//!                                                │ decode
//!                                                ▼
//!                                       TelemetryCache.merge()
//! ```
//!
//! A poll ends when its timeout elapses, when a message from a trigger
//! device arrives, when its owner cancels it, or when the connection is lost.
//! The [`PollOutcome`] tells these apart.

mod recorder;

pub use recorder::{RecordOutcome, TelemetryRecorder};

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::device::Device;
use crate::error::ProtocolError;
use crate::protocol::{InboundQueue, Transport};
use crate::telemetry::{TelemetryCache, TelemetryDecoder};

/// Why a poll ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The timeout elapsed.
    TimedOut,
    /// A message from the given trigger device arrived.
    Triggered(String),
    /// The owner cancelled the poll.
    Cancelled,
    /// The transport connection was lost.
    ConnectionLost,
}

/// Summary of a finished poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReport {
    /// Why the poll ended.
    pub outcome: PollOutcome,
    /// Messages taken from the inbound queue.
    pub received: usize,
    /// Messages merged into the cache.
    pub recorded: usize,
    /// Messages that failed to decode.
    pub decode_failures: usize,
}

impl PollReport {
    fn new(outcome: PollOutcome, stats: PollStats) -> Self {
        Self {
            outcome,
            received: stats.received,
            recorded: stats.recorded,
            decode_failures: stats.decode_failures,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct PollStats {
    received: usize,
    recorded: usize,
    decode_failures: usize,
}

/// What to poll for.
#[derive(Debug, Clone)]
pub struct PollRequest {
    topics: BTreeSet<String>,
    trigger_devices: HashSet<String>,
    timeout: Duration,
}

impl PollRequest {
    /// Creates a request that polls until `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            topics: BTreeSet::new(),
            trigger_devices: HashSet::new(),
            timeout,
        }
    }

    /// Adds a topic pattern to subscribe to.
    #[must_use]
    pub fn topic(mut self, pattern: impl Into<String>) -> Self {
        self.topics.insert(pattern.into());
        self
    }

    /// Adds a device whose messages end the poll early.
    #[must_use]
    pub fn trigger_device(mut self, serial: impl Into<String>) -> Self {
        self.trigger_devices.insert(serial.into());
        self
    }

    /// Returns the topic patterns.
    #[must_use]
    pub fn topics(&self) -> &BTreeSet<String> {
        &self.topics
    }

    /// Returns the poll timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Starts poll tasks that feed the telemetry cache.
#[derive(Clone)]
pub struct MessagePoller {
    recorder: Arc<TelemetryRecorder>,
}

impl MessagePoller {
    /// Creates a poller recording telemetry of `devices` into `cache`.
    #[must_use]
    pub fn new(
        devices: Vec<Device>,
        decoder: Arc<dyn TelemetryDecoder>,
        cache: TelemetryCache,
    ) -> Self {
        Self {
            recorder: Arc::new(TelemetryRecorder::new(devices, decoder, cache)),
        }
    }

    /// Returns the cache this poller writes to.
    #[must_use]
    pub fn cache(&self) -> &TelemetryCache {
        self.recorder.cache()
    }

    /// Subscribes to the requested topics and spawns the receive task.
    ///
    /// Only one poll should run per transport at a time; a second poll waits
    /// for the inbound queue until the first one ends.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if a subscription fails. No task is spawned in
    /// that case.
    pub async fn start<T: Transport>(
        &self,
        transport: &T,
        request: PollRequest,
    ) -> Result<PollerHandle, ProtocolError> {
        for pattern in &request.topics {
            tracing::info!(pattern = %pattern, "Subscribing to topic pattern");
            transport.subscribe(pattern).await?;
        }

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task = tokio::spawn(receive_loop(
            transport.inbound(),
            Arc::clone(&self.recorder),
            request.trigger_devices,
            request.timeout,
            cancel_rx,
        ));

        Ok(PollerHandle {
            cancel_tx: Some(cancel_tx),
            task,
            report: None,
        })
    }
}

impl std::fmt::Debug for MessagePoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagePoller").finish_non_exhaustive()
    }
}

/// Handle to a running poll task.
///
/// Dropping the handle cancels the poll.
#[derive(Debug)]
pub struct PollerHandle {
    cancel_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<PollReport>,
    report: Option<PollReport>,
}

impl PollerHandle {
    /// Returns `true` if the poll has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.report.is_some() || self.task.is_finished()
    }

    /// Waits for the poll to end without giving up the handle.
    ///
    /// Cancel safe: dropping the future leaves the poll running.
    pub async fn finished(&mut self) -> &PollReport {
        let report = match self.report.take() {
            Some(report) => report,
            None => task_report((&mut self.task).await),
        };
        self.report.insert(report)
    }

    /// Cancels the poll and waits for the task to stop.
    ///
    /// If the poll had already ended on its own, its original report is
    /// returned.
    pub async fn cancel(mut self) -> PollReport {
        if let Some(tx) = self.cancel_tx.take() {
            // Task may already be done
            let _ = tx.send(());
        }
        self.join().await
    }

    /// Waits for the poll to end on its own.
    pub async fn join(self) -> PollReport {
        let Self {
            cancel_tx,
            task,
            report,
        } = self;
        let report = match report {
            Some(report) => report,
            None => task_report(task.await),
        };
        drop(cancel_tx);
        report
    }
}

fn task_report(result: Result<PollReport, tokio::task::JoinError>) -> PollReport {
    result.unwrap_or_else(|e| {
        tracing::error!(error = %e, "Poll task failed");
        PollReport::new(PollOutcome::Cancelled, PollStats::default())
    })
}

/// Stand-in deadline for timeouts the clock cannot represent.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or(now + FAR_FUTURE)
}

async fn receive_loop(
    inbound: InboundQueue,
    recorder: Arc<TelemetryRecorder>,
    trigger_devices: HashSet<String>,
    timeout: Duration,
    mut cancel_rx: oneshot::Receiver<()>,
) -> PollReport {
    let deadline = deadline_after(timeout);
    let mut stats = PollStats::default();

    let mut queue = tokio::select! {
        biased;
        _ = &mut cancel_rx => return PollReport::new(PollOutcome::Cancelled, stats),
        () = tokio::time::sleep_until(deadline) => {
            return PollReport::new(PollOutcome::TimedOut, stats);
        }
        queue = inbound.lock() => queue,
    };

    let outcome = loop {
        tokio::select! {
            biased;
            _ = &mut cancel_rx => break PollOutcome::Cancelled,
            () = tokio::time::sleep_until(deadline) => break PollOutcome::TimedOut,
            message = queue.recv() => {
                let Some(message) = message else {
                    tracing::warn!("Inbound queue closed, connection lost");
                    break PollOutcome::ConnectionLost;
                };
                stats.received += 1;

                let recorded = recorder.record(&message);
                match recorded {
                    RecordOutcome::Merged { .. } => stats.recorded += 1,
                    RecordOutcome::DecodeFailed { .. } => stats.decode_failures += 1,
                    RecordOutcome::Unmatched => {}
                }

                if let Some(serial) = recorded.serial()
                    && trigger_devices.contains(serial)
                {
                    tracing::debug!(device = %serial, "Trigger device reported, ending poll");
                    break PollOutcome::Triggered(serial.to_string());
                }
            }
        }
    };

    tracing::debug!(
        ?outcome,
        received = stats.received,
        recorded = stats.recorded,
        decode_failures = stats.decode_failures,
        "Poll finished"
    );
    PollReport::new(outcome, stats)
}
