// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-process loopback transport.
//!
//! [`MemoryTransport`] behaves like a connected broker session without any
//! network: inbound messages are injected by the caller, publishes are
//! recorded, and an optional [`Responder`] can answer publishes with
//! telemetry the way a real device would.
//!
//! ```
//! use solix_relay::protocol::{MemoryTransport, Transport};
//!
//! # async fn example() {
//! let transport = MemoryTransport::new();
//! transport.inject("dt/anker_power/A1790/SN1/param_info", r#"{"main_battery_soc":61}"#);
//!
//! let queue = transport.inbound();
//! let message = queue.lock().await.recv().await.unwrap();
//! assert_eq!(message.topic(), "dt/anker_power/A1790/SN1/param_info");
//! # }
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{
    INBOUND_QUEUE_CAPACITY, InboundMessage, InboundQueue, PublishOutcome, SessionConnector,
    Transport,
};
use crate::command::{CommandRequest, DeviceCommand};
use crate::error::ProtocolError;

/// Produces the inbound messages a publish should trigger.
pub type Responder = Box<dyn Fn(&CommandRequest) -> Vec<InboundMessage> + Send + Sync>;

/// A transport that keeps everything in memory.
pub struct MemoryTransport {
    connected: AtomicBool,
    acknowledge: AtomicBool,
    inbound_tx: Mutex<Option<mpsc::Sender<InboundMessage>>>,
    inbound_rx: InboundQueue,
    subscriptions: Mutex<BTreeSet<String>>,
    published: Mutex<Vec<CommandRequest>>,
    responder: Mutex<Option<Responder>>,
    disconnects: AtomicUsize,
}

impl MemoryTransport {
    /// Creates a connected transport with the default queue capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(INBOUND_QUEUE_CAPACITY)
    }

    /// Creates a connected transport with a specific inbound queue capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            connected: AtomicBool::new(true),
            acknowledge: AtomicBool::new(true),
            inbound_tx: Mutex::new(Some(tx)),
            inbound_rx: Arc::new(tokio::sync::Mutex::new(rx)),
            subscriptions: Mutex::new(BTreeSet::new()),
            published: Mutex::new(Vec::new()),
            responder: Mutex::new(None),
            disconnects: AtomicUsize::new(0),
        }
    }

    /// Queues an inbound message as if the broker had delivered it.
    ///
    /// Returns `false` if the queue is full or the connection was dropped.
    pub fn inject(&self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> bool {
        self.deliver(InboundMessage::new(topic, payload))
    }

    fn deliver(&self, message: InboundMessage) -> bool {
        match self.inbound_tx.lock().as_ref() {
            Some(tx) => tx.try_send(message).is_ok(),
            None => false,
        }
    }

    /// Sets whether publishes with a deadline are acknowledged (default: yes).
    pub fn set_acknowledge(&self, acknowledge: bool) {
        self.acknowledge.store(acknowledge, Ordering::Release);
    }

    /// Installs a responder invoked on every publish.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&CommandRequest) -> Vec<InboundMessage> + Send + Sync + 'static,
    {
        *self.responder.lock() = Some(Box::new(responder));
    }

    /// Simulates a lost connection: closes the inbound queue.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::Release);
        self.inbound_tx.lock().take();
    }

    /// Returns every request published so far.
    #[must_use]
    pub fn published(&self) -> Vec<CommandRequest> {
        self.published.lock().clone()
    }

    /// Returns the logical commands published so far.
    #[must_use]
    pub fn published_commands(&self) -> Vec<DeviceCommand> {
        self.published.lock().iter().map(|r| r.command()).collect()
    }

    /// Returns how often `disconnect` was called.
    #[must_use]
    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::Acquire)
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("connected", &self.is_connected())
            .field("published", &self.published.lock().len())
            .finish_non_exhaustive()
    }
}

impl Transport for MemoryTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn subscribe(&self, pattern: &str) -> Result<(), ProtocolError> {
        if !self.is_connected() {
            return Err(ProtocolError::ConnectionLost);
        }
        self.subscriptions.lock().insert(pattern.to_string());
        Ok(())
    }

    fn subscriptions(&self) -> BTreeSet<String> {
        self.subscriptions.lock().clone()
    }

    async fn publish(&self, request: &CommandRequest) -> Result<PublishOutcome, ProtocolError> {
        if !self.is_connected() {
            return Err(ProtocolError::ConnectionLost);
        }
        self.published.lock().push(request.clone());

        let responses = self
            .responder
            .lock()
            .as_ref()
            .map(|respond| respond(request))
            .unwrap_or_default();
        for message in responses {
            if !self.deliver(message) {
                tracing::warn!("Memory transport dropped a response message");
            }
        }

        match request.ack_deadline() {
            None => Ok(PublishOutcome::Queued),
            Some(_) if self.acknowledge.load(Ordering::Acquire) => Ok(PublishOutcome::Published),
            Some(deadline) => {
                tokio::time::sleep(deadline).await;
                Ok(PublishOutcome::NotPublished)
            }
        }
    }

    fn inbound(&self) -> InboundQueue {
        Arc::clone(&self.inbound_rx)
    }

    async fn disconnect(&self) -> Result<(), ProtocolError> {
        self.disconnects.fetch_add(1, Ordering::AcqRel);
        self.drop_connection();
        self.subscriptions.lock().clear();
        Ok(())
    }
}

/// Hands out a shared [`MemoryTransport`] as the session.
///
/// Callers keep their own `Arc` to the transport, so they can inject
/// telemetry and inspect publishes while a session manager owns the session.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    transport: Arc<MemoryTransport>,
    failure: Option<String>,
    starts: Arc<AtomicUsize>,
}

impl MemoryConnector {
    /// Creates a connector whose sessions are `transport`.
    #[must_use]
    pub fn new(transport: Arc<MemoryTransport>) -> Self {
        Self {
            transport,
            failure: None,
            starts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Creates a connector whose sessions always fail to start.
    #[must_use]
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            failure: Some(reason.into()),
            ..Self::new(Arc::new(MemoryTransport::new()))
        }
    }

    /// Returns how often a session was requested.
    #[must_use]
    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::Acquire)
    }
}

impl SessionConnector for MemoryConnector {
    type Session = Arc<MemoryTransport>;

    async fn start_session(&self) -> Result<Self::Session, ProtocolError> {
        self.starts.fetch_add(1, Ordering::AcqRel);
        match &self.failure {
            Some(reason) => Err(ProtocolError::ConnectionFailed(reason.clone())),
            None => Ok(Arc::clone(&self.transport)),
        }
    }
}
