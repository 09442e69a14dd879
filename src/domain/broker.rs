// src/domain/broker.rs

//! Broker capability abstractions.
//!
//! This module defines the slice of a message broker the conductor relies on:
//! a connection that hands out logical channels, and channels that declare
//! queues, consume deliveries and publish payloads. It intentionally avoids
//! any reference to a concrete client library.
//!
//! The conductor never shares a channel between components. Each inbound
//! stream and each destination publisher opens its own channel on the single
//! shared connection, and closes it when it stops.
//!
//! Concrete implementations live under `src/transport/`.

use crate::Result;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Content type stamped on every conductor publish.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Queue declaration parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueOptions {
    /// Survive a broker restart.
    pub durable: bool,
    /// Restrict the queue to the declaring connection.
    pub exclusive: bool,
    /// Delete the queue when its last consumer goes away.
    pub auto_delete: bool,
}

impl QueueOptions {
    /// Durable, shared, long-lived queue. Used for every conductor queue.
    pub const fn durable() -> Self {
        // ---
        Self {
            durable: true,
            exclusive: false,
            auto_delete: false,
        }
    }
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self::durable()
    }
}

/// Consumer registration parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConsumeOptions {
    /// Deliveries are acknowledged by the broker as soon as they are sent.
    pub auto_ack: bool,
    /// Request exclusive access to the queue.
    pub exclusive: bool,
}

impl ConsumeOptions {
    /// Non-exclusive consumer with automatic acknowledgement.
    pub const fn auto_ack() -> Self {
        // ---
        Self {
            auto_ack: true,
            exclusive: false,
        }
    }
}

/// A message handed to the broker for delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Publishing {
    /// Pre-serialized message body.
    pub body: Bytes,
    /// MIME type of `body`.
    pub content_type: Arc<str>,
    /// Return the message if it cannot be routed.
    pub mandatory: bool,
    /// Return the message if it cannot be delivered to a consumer at once.
    pub immediate: bool,
}

impl Publishing {
    /// Non-mandatory, non-immediate JSON message.
    pub fn json(body: impl Into<Bytes>) -> Self {
        // ---
        Self {
            body: body.into(),
            content_type: Arc::from(JSON_CONTENT_TYPE),
            mandatory: false,
            immediate: false,
        }
    }
}

/// A message received from a queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// Raw message body.
    pub body: Bytes,
    /// Content type reported by the publisher, if any.
    pub content_type: Option<Arc<str>>,
}

/// Handle returned from a successful consumer registration.
///
/// The inbox closes when the broker cancels the consumer, when the owning
/// channel or connection closes, or when the consumer is otherwise lost.
pub struct Deliveries {
    // ---
    /// Receiver for deliveries from the consumed queue.
    pub inbox: mpsc::UnboundedReceiver<Delivery>,
}

/// A logical channel multiplexed over a broker connection.
#[async_trait::async_trait]
pub trait BrokerChannel: Send + Sync {
    // ---
    /// Declare `queue`, creating it if it does not exist.
    async fn declare_queue(&self, queue: &str, opts: QueueOptions) -> Result<()>;

    /// Limit the number of unacknowledged deliveries per consumer.
    async fn set_prefetch(&self, count: u16) -> Result<()>;

    /// Start consuming `queue`.
    async fn consume(&self, queue: &str, opts: ConsumeOptions) -> Result<Deliveries>;

    /// Publish to `queue` through the default exchange.
    async fn publish(&self, queue: &str, msg: Publishing) -> Result<()>;

    /// Close the channel. Closing twice is harmless.
    async fn close(&self) -> Result<()>;
}

/// Shared channel pointer.
pub type ChannelPtr = Arc<dyn BrokerChannel>;

/// A single broker connection.
///
/// # Notes
///
/// This trait uses `async_trait`; the expanded documentation may show explicit
/// lifetimes and a boxed `Future`. Treat methods as normal `async fn`s.
#[async_trait::async_trait]
pub trait BrokerConnection: Send + Sync {
    // ---
    /// Open a new logical channel.
    async fn open_channel(&self) -> Result<ChannelPtr>;

    /// Close the connection and every channel opened on it.
    async fn close(&self) -> Result<()>;
}

/// Shared connection pointer.
///
/// Cloning is cheap; all clones share the same underlying connection.
pub type ConnectionPtr = Arc<dyn BrokerConnection>;
