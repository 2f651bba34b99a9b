// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Publish/subscribe transport.
//!
//! The controller talks to the device exclusively through the [`Transport`]
//! trait: topic subscriptions, publishes with an optional acknowledgment
//! deadline, and an ordered queue of inbound messages.
//!
//! # Implementations
//!
//! - [`MqttSession`]: MQTT broker connection built on `rumqttc`
//! - [`MemoryTransport`]: in-process loopback for tests and simulations
//!
//! # Inbound delivery
//!
//! The transport's receive path pushes every inbound publish into a bounded
//! queue, in receipt order. Exactly one consumer (the message poller) holds
//! the queue at a time. When the connection ends, the queue is closed so the
//! consumer can tell a lost connection apart from a quiet one.

mod memory;
#[cfg(feature = "mqtt")]
mod mqtt_session;

pub use memory::{MemoryConnector, MemoryTransport, Responder};
#[cfg(feature = "mqtt")]
pub use mqtt_session::{MqttConnector, MqttSession, MqttSessionBuilder};

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};

use crate::command::CommandRequest;
use crate::error::ProtocolError;

/// Default capacity of the inbound message queue.
pub const INBOUND_QUEUE_CAPACITY: usize = 256;

/// Shared handle to a transport's inbound message queue.
pub type InboundQueue = Arc<Mutex<mpsc::Receiver<InboundMessage>>>;

/// A message received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    topic: String,
    payload: Vec<u8>,
}

impl InboundMessage {
    /// Creates a new inbound message.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Returns the topic the message was published on.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Returns the raw payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Result of publishing a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The broker acknowledged the publish within the deadline.
    Published,
    /// No acknowledgment arrived within the deadline.
    NotPublished,
    /// Handed to the transport; no acknowledgment was requested.
    Queued,
}

impl PublishOutcome {
    /// Returns `true` if the publish was acknowledged.
    #[must_use]
    pub const fn is_published(&self) -> bool {
        matches!(self, Self::Published)
    }
}

/// A live publish/subscribe session.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Returns whether the session is currently connected.
    fn is_connected(&self) -> bool;

    /// Subscribes to a topic pattern.
    ///
    /// Subscribing to an already active pattern is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the subscription request cannot be sent.
    async fn subscribe(&self, pattern: &str) -> Result<(), ProtocolError>;

    /// Returns the set of active subscription patterns.
    fn subscriptions(&self) -> BTreeSet<String>;

    /// Publishes a command request.
    ///
    /// If the request carries an acknowledgment deadline, waits at most that
    /// long for the broker's acknowledgment.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the publish cannot be handed to the
    /// connection.
    async fn publish(&self, request: &CommandRequest) -> Result<PublishOutcome, ProtocolError>;

    /// Returns the inbound message queue.
    fn inbound(&self) -> InboundQueue;

    /// Closes the session and releases its resources.
    ///
    /// Must be idempotent and succeed on an already closed session.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the transport reports a failure while
    /// closing.
    async fn disconnect(&self) -> Result<(), ProtocolError>;
}

impl<T: Transport> Transport for Arc<T> {
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    async fn subscribe(&self, pattern: &str) -> Result<(), ProtocolError> {
        (**self).subscribe(pattern).await
    }

    fn subscriptions(&self) -> BTreeSet<String> {
        (**self).subscriptions()
    }

    async fn publish(&self, request: &CommandRequest) -> Result<PublishOutcome, ProtocolError> {
        (**self).publish(request).await
    }

    fn inbound(&self) -> InboundQueue {
        (**self).inbound()
    }

    async fn disconnect(&self) -> Result<(), ProtocolError> {
        (**self).disconnect().await
    }
}

/// Establishes sessions.
#[allow(async_fn_in_trait)]
pub trait SessionConnector {
    /// The session type produced.
    type Session: Transport;

    /// Starts a new session.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the session cannot be established.
    async fn start_session(&self) -> Result<Self::Session, ProtocolError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_published_counts_as_published() {
        assert!(PublishOutcome::Published.is_published());
        assert!(!PublishOutcome::NotPublished.is_published());
        assert!(!PublishOutcome::Queued.is_published());
    }

    #[test]
    fn inbound_message_accessors() {
        let msg = InboundMessage::new("dt/a", b"{}".to_vec());
        assert_eq!(msg.topic(), "dt/a");
        assert_eq!(msg.payload(), b"{}");
    }
}
