// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT session built on `rumqttc`.
//!
//! The session owns one broker connection. A background task drives the
//! `rumqttc` event loop: it forwards inbound publishes to the inbound queue,
//! resolves publish acknowledgments and tracks connectivity.
//!
//! # Examples
//!
//! ```no_run
//! use solix_relay::protocol::{MqttSession, Transport};
//!
//! # async fn example() -> solix_relay::Result<()> {
//! let session = MqttSession::builder()
//!     .host("192.168.1.50")
//!     .port(1883)
//!     .credentials("user", "password")
//!     .build()
//!     .await?;
//!
//! session.subscribe("dt/anker_power/A1790/SN1/#").await?;
//!
//! // Safe to call more than once
//! session.disconnect().await?;
//! session.disconnect().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{
    INBOUND_QUEUE_CAPACITY, InboundMessage, InboundQueue, PublishOutcome, SessionConnector,
    Transport,
};
use crate::command::CommandRequest;
use crate::error::ProtocolError;

/// Global counter for generating unique client IDs.
static SESSION_CLIENT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// How long `disconnect` waits for the event loop to flush before aborting it.
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Configuration for an MQTT session.
#[derive(Debug, Clone)]
pub struct MqttSessionConfig {
    host: String,
    port: u16,
    credentials: Option<(String, String)>,
    client_id: Option<String>,
    keep_alive: Duration,
    connection_timeout: Duration,
    inbound_capacity: usize,
}

impl Default for MqttSessionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 1883,
            credentials: None,
            client_id: None,
            keep_alive: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
            inbound_capacity: INBOUND_QUEUE_CAPACITY,
        }
    }
}

/// Matches broker acknowledgments to the publishes waiting for them.
///
/// `rumqttc` assigns packet ids when a publish leaves the event loop, in the
/// order requests were queued. Waiters are queued in the same order under
/// the publish lock, so the n-th outgoing publish belongs to the n-th waiter.
#[derive(Debug, Default)]
struct AckTracker {
    queued: VecDeque<Option<oneshot::Sender<()>>>,
    in_flight: HashMap<u16, oneshot::Sender<()>>,
}

impl AckTracker {
    fn enqueue(&mut self, waiter: Option<oneshot::Sender<()>>) {
        self.queued.push_back(waiter);
    }

    /// Drops the most recently queued waiter after a failed hand-off.
    fn cancel_last(&mut self) {
        self.queued.pop_back();
    }

    fn sent(&mut self, pkid: u16) {
        if let Some(Some(waiter)) = self.queued.pop_front() {
            self.in_flight.insert(pkid, waiter);
        }
    }

    fn acknowledged(&mut self, pkid: u16) {
        if let Some(waiter) = self.in_flight.remove(&pkid) {
            // Receiver is gone if the publisher already hit its deadline
            let _ = waiter.send(());
        }
    }

    fn clear(&mut self) {
        self.queued.clear();
        self.in_flight.clear();
    }
}

/// A live MQTT session.
///
/// `MqttSession` is cheaply cloneable (via `Arc`); all clones share the same
/// connection.
#[derive(Clone)]
pub struct MqttSession {
    inner: Arc<MqttSessionInner>,
}

struct MqttSessionInner {
    client: AsyncClient,
    config: MqttSessionConfig,
    connected: AtomicBool,
    closed: AtomicBool,
    subscriptions: parking_lot::Mutex<BTreeSet<String>>,
    inbound_rx: InboundQueue,
    acks: parking_lot::Mutex<AckTracker>,
    /// Serializes waiter registration with request hand-off.
    publish_lock: Mutex<()>,
    event_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl MqttSession {
    /// Creates a new builder for configuring an MQTT session.
    #[must_use]
    pub fn builder() -> MqttSessionBuilder {
        MqttSessionBuilder::default()
    }

    /// Returns the host address of the broker.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.inner.config.host
    }

    /// Returns the port of the broker.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.inner.config.port
    }

    /// Connects to the broker and waits for its `ConnAck`.
    async fn connect(config: MqttSessionConfig) -> Result<Self, ProtocolError> {
        if config.host.is_empty() {
            return Err(ProtocolError::InvalidAddress(
                "MQTT broker host is required".to_string(),
            ));
        }

        let client_id = config.client_id.clone().unwrap_or_else(|| {
            let counter = SESSION_CLIENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
            format!("solix_relay_{}_{}", std::process::id(), counter)
        });

        let mut mqtt_options = MqttOptions::new(&client_id, &config.host, config.port);
        mqtt_options.set_keep_alive(config.keep_alive);
        mqtt_options.set_clean_session(true);

        if let Some((ref username, ref password)) = config.credentials {
            mqtt_options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(mqtt_options, 10);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));

        let session = Self {
            inner: Arc::new(MqttSessionInner {
                client,
                config: config.clone(),
                connected: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                subscriptions: parking_lot::Mutex::new(BTreeSet::new()),
                inbound_rx: Arc::new(Mutex::new(inbound_rx)),
                acks: parking_lot::Mutex::new(AckTracker::default()),
                publish_lock: Mutex::new(()),
                event_task: parking_lot::Mutex::new(None),
            }),
        };

        let (connack_tx, connack_rx) = oneshot::channel();
        let task = tokio::spawn(handle_session_events(
            event_loop,
            session.clone(),
            inbound_tx,
            connack_tx,
        ));
        *session.inner.event_task.lock() = Some(task);

        let timeout = config.connection_timeout;
        let failure = match tokio::time::timeout(timeout, connack_rx).await {
            Ok(Ok(())) => {
                tracing::info!(
                    host = %config.host,
                    port = %config.port,
                    client_id = %client_id,
                    "Connected to MQTT broker"
                );
                return Ok(session);
            }
            Ok(Err(_)) => {
                ProtocolError::ConnectionFailed("MQTT event loop terminated unexpectedly".to_string())
            }
            Err(_) => ProtocolError::ConnectionFailed(format!(
                "MQTT connection timeout after {}s",
                timeout.as_secs()
            )),
        };

        session.abort_event_loop();
        Err(failure)
    }

    fn abort_event_loop(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.connected.store(false, Ordering::Release);
        if let Some(task) = self.inner.event_task.lock().take() {
            task.abort();
        }
    }
}

impl Transport for MqttSession {
    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    async fn subscribe(&self, pattern: &str) -> Result<(), ProtocolError> {
        if self.inner.subscriptions.lock().contains(pattern) {
            return Ok(());
        }
        if !self.is_connected() {
            return Err(ProtocolError::ConnectionLost);
        }

        self.inner
            .client
            .subscribe(pattern, QoS::AtLeastOnce)
            .await
            .map_err(ProtocolError::Mqtt)?;

        tracing::debug!(pattern = %pattern, "Subscribed to topic pattern");
        self.inner.subscriptions.lock().insert(pattern.to_string());
        Ok(())
    }

    fn subscriptions(&self) -> BTreeSet<String> {
        self.inner.subscriptions.lock().clone()
    }

    async fn publish(&self, request: &CommandRequest) -> Result<PublishOutcome, ProtocolError> {
        if !self.is_connected() {
            return Err(ProtocolError::ConnectionLost);
        }

        let ack_rx = {
            let _guard = self.inner.publish_lock.lock().await;

            let (ack_tx, ack_rx) = match request.ack_deadline() {
                Some(_) => {
                    let (tx, rx) = oneshot::channel();
                    (Some(tx), Some(rx))
                }
                None => (None, None),
            };
            self.inner.acks.lock().enqueue(ack_tx);

            tracing::debug!(
                topic = %request.topic(),
                command = %request.command(),
                bytes = request.payload().len(),
                "Publishing MQTT command"
            );

            if let Err(e) = self
                .inner
                .client
                .publish(
                    request.topic(),
                    QoS::AtLeastOnce,
                    false,
                    request.payload().to_vec(),
                )
                .await
            {
                self.inner.acks.lock().cancel_last();
                return Err(ProtocolError::Mqtt(e));
            }
            ack_rx
        };

        match (ack_rx, request.ack_deadline()) {
            (Some(rx), Some(deadline)) => match tokio::time::timeout(deadline, rx).await {
                Ok(Ok(())) => Ok(PublishOutcome::Published),
                Ok(Err(_)) | Err(_) => Ok(PublishOutcome::NotPublished),
            },
            _ => Ok(PublishOutcome::Queued),
        }
    }

    fn inbound(&self) -> InboundQueue {
        Arc::clone(&self.inner.inbound_rx)
    }

    async fn disconnect(&self) -> Result<(), ProtocolError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        tracing::info!(
            host = %self.inner.config.host,
            port = %self.inner.config.port,
            "Disconnecting from MQTT broker"
        );

        self.inner.subscriptions.lock().clear();

        // Fails when the event loop already ended; nothing left to close then.
        if let Err(e) = self.inner.client.disconnect().await {
            tracing::debug!(error = %e, "MQTT disconnect request not delivered");
        }

        let task = self.inner.event_task.lock().take();
        if let Some(mut task) = task
            && tokio::time::timeout(DISCONNECT_GRACE, &mut task).await.is_err()
        {
            tracing::warn!("MQTT event loop did not stop in time, aborting");
            task.abort();
        }

        self.inner.connected.store(false, Ordering::Release);
        self.inner.acks.lock().clear();
        Ok(())
    }
}

impl std::fmt::Debug for MqttSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttSession")
            .field("host", &self.inner.config.host)
            .field("port", &self.inner.config.port)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

/// Builder for creating an MQTT session.
#[derive(Debug, Default, Clone)]
pub struct MqttSessionBuilder {
    config: MqttSessionConfig,
}

impl MqttSessionBuilder {
    /// Sets the broker host address.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Sets the broker port (default: 1883).
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets authentication credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Some((username.into(), password.into()));
        self
    }

    /// Sets a custom client ID.
    #[must_use]
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.config.client_id = Some(id.into());
        self
    }

    /// Sets the keep-alive interval (default: 30 seconds).
    #[must_use]
    pub fn keep_alive(mut self, duration: Duration) -> Self {
        self.config.keep_alive = duration;
        self
    }

    /// Sets the connection timeout (default: 10 seconds).
    #[must_use]
    pub fn connection_timeout(mut self, duration: Duration) -> Self {
        self.config.connection_timeout = duration;
        self
    }

    /// Sets the inbound queue capacity (default: 256 messages).
    #[must_use]
    pub fn inbound_capacity(mut self, capacity: usize) -> Self {
        self.config.inbound_capacity = capacity;
        self
    }

    /// Connects to the broker.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Host is not set
    /// - Connection fails
    /// - Connection times out
    pub async fn build(self) -> Result<MqttSession, ProtocolError> {
        MqttSession::connect(self.config).await
    }

    /// Returns a connector that establishes sessions with this configuration.
    #[must_use]
    pub fn connector(self) -> MqttConnector {
        MqttConnector {
            config: self.config,
        }
    }
}

/// Establishes [`MqttSession`]s on demand.
#[derive(Debug, Clone)]
pub struct MqttConnector {
    config: MqttSessionConfig,
}

impl SessionConnector for MqttConnector {
    type Session = MqttSession;

    async fn start_session(&self) -> Result<MqttSession, ProtocolError> {
        MqttSession::connect(self.config.clone()).await
    }
}

/// Drives the `rumqttc` event loop for a session.
async fn handle_session_events(
    mut event_loop: EventLoop,
    session: MqttSession,
    inbound_tx: mpsc::Sender<InboundMessage>,
    connack_tx: oneshot::Sender<()>,
) {
    use rumqttc::{Event, Outgoing, Packet};
    use tokio::sync::mpsc::error::TrySendError;

    let mut connack_tx = Some(connack_tx);
    let inner = &session.inner;

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                tracing::debug!(?connack, "MQTT session connected");
                inner.connected.store(true, Ordering::Release);
                if let Some(tx) = connack_tx.take() {
                    let _ = tx.send(());
                }
            }
            Ok(Event::Incoming(Packet::SubAck(suback))) => {
                tracing::debug!(?suback, "MQTT subscription acknowledged");
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = InboundMessage::new(publish.topic.clone(), publish.payload.to_vec());
                // Never block here: acknowledgments are processed by this loop too.
                match inbound_tx.try_send(message) {
                    Ok(()) => {}
                    Err(TrySendError::Full(dropped)) => {
                        tracing::warn!(topic = %dropped.topic(), "Inbound queue full, dropping message");
                    }
                    Err(TrySendError::Closed(_)) => {}
                }
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                inner.acks.lock().sent(pkid);
            }
            Ok(Event::Incoming(Packet::PubAck(puback))) => {
                inner.acks.lock().acknowledged(puback.pkid);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                tracing::debug!("MQTT disconnect sent");
                inner.connected.store(false, Ordering::Release);
                break;
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                tracing::info!("MQTT broker closed the session");
                inner.connected.store(false, Ordering::Release);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if inner.closed.load(Ordering::Acquire) {
                    tracing::debug!(error = %e, "MQTT event loop ended after close");
                } else {
                    tracing::error!(error = %e, "MQTT session event loop error");
                }
                inner.connected.store(false, Ordering::Release);
                break;
            }
        }
    }
    // Dropping `inbound_tx` closes the inbound queue for the poller.
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_default_values() {
        let builder = MqttSessionBuilder::default();
        assert_eq!(builder.config.port, 1883);
        assert!(builder.config.host.is_empty());
        assert!(builder.config.credentials.is_none());
        assert_eq!(builder.config.keep_alive, Duration::from_secs(30));
        assert_eq!(builder.config.connection_timeout, Duration::from_secs(10));
        assert_eq!(builder.config.inbound_capacity, INBOUND_QUEUE_CAPACITY);
    }

    #[test]
    fn builder_chain() {
        let builder = MqttSessionBuilder::default()
            .host("192.168.1.50")
            .port(8883)
            .credentials("admin", "secret")
            .client_id("relay")
            .keep_alive(Duration::from_secs(45))
            .connection_timeout(Duration::from_secs(15))
            .inbound_capacity(16);

        assert_eq!(builder.config.host, "192.168.1.50");
        assert_eq!(builder.config.port, 8883);
        assert_eq!(
            builder.config.credentials,
            Some(("admin".to_string(), "secret".to_string()))
        );
        assert_eq!(builder.config.client_id.as_deref(), Some("relay"));
        assert_eq!(builder.config.keep_alive, Duration::from_secs(45));
        assert_eq!(builder.config.connection_timeout, Duration::from_secs(15));
        assert_eq!(builder.config.inbound_capacity, 16);
    }

    #[tokio::test]
    async fn builder_missing_host_fails() {
        let err = MqttSessionBuilder::default().build().await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn ack_tracker_resolves_in_order() {
        let mut tracker = AckTracker::default();
        let (tx1, rx1) = oneshot::channel();
        let (tx3, mut rx3) = oneshot::channel();

        tracker.enqueue(Some(tx1));
        tracker.enqueue(None);
        tracker.enqueue(Some(tx3));

        tracker.sent(7);
        tracker.sent(8);
        tracker.sent(9);

        tracker.acknowledged(7);
        assert!(rx1.await.is_ok());

        // pkid 8 had no waiter
        tracker.acknowledged(8);
        assert!(rx3.try_recv().is_err());

        tracker.acknowledged(9);
        assert!(rx3.await.is_ok());
    }

    #[test]
    fn ack_tracker_cancel_last_keeps_order() {
        let mut tracker = AckTracker::default();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();

        tracker.enqueue(Some(tx1));
        tracker.enqueue(Some(tx2));
        tracker.cancel_last();
        tracker.sent(1);

        assert_eq!(tracker.queued.len(), 0);
        assert!(tracker.in_flight.contains_key(&1));
    }
}
