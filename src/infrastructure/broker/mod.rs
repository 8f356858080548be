//! Message Broker Abstraction
//!
//! The services talk to each other through named queues on a broker.
//! This module defines the transport-neutral surface: the wire message,
//! the `Broker` trait, and the delivery/acknowledgement contract.
//!
//! Two implementations are provided:
//! - [`RedisBroker`]: queues as Redis lists with a reliable-consume
//!   pattern (BLMOVE into a processing list, LREM on ack)
//! - [`MemoryBroker`]: in-process queues for tests and single-node mode
//!
//! On top of the trait sit the two protocol halves:
//! - [`RpcClient`]: request/reply with per-call reply queues and
//!   correlation-id matching
//! - [`QueueConsumer`]: binds a queue to an action table and dispatches
//!   inbound requests

pub mod consumer;
pub mod memory;
pub mod redis;
pub mod rpc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use self::consumer::{decode_payload, ActionTable, ConsumerHandle, QueueConsumer};
pub use self::memory::MemoryBroker;
pub use self::redis::RedisBroker;
pub use self::rpc::{RpcClient, RpcError, RpcRequest};

/// Broker-level failure.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker channel unavailable")]
    ChannelUnavailable,

    #[error("queue {0} redeclared with different durability")]
    DeclareMismatch(String),

    #[error("broker transport failure: {0}")]
    Transport(String),
}

impl From<::redis::RedisError> for BrokerError {
    fn from(e: ::redis::RedisError) -> Self {
        BrokerError::Transport(e.to_string())
    }
}

/// A single message on the wire: opaque JSON payload plus the two
/// routing headers of the request/reply convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerMessage {
    /// JSON-encoded body
    pub payload: String,

    /// Caller-generated token echoed back in the reply
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Queue the reply should be published to; absent for fire-and-forget
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl BrokerMessage {
    /// A fire-and-forget message with no routing headers.
    pub fn new(payload: String) -> Self {
        Self {
            payload,
            correlation_id: None,
            reply_to: None,
        }
    }
}

/// How a consumer settles a delivery.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Settlement {
    Ack,
    Nack { requeue: bool },
}

/// Transport-specific acknowledgement token carried by a [`Delivery`].
#[async_trait]
pub(crate) trait AckToken: Send {
    async fn settle(self: Box<Self>, settlement: Settlement) -> Result<(), BrokerError>;
}

/// One message handed to a consumer. Must be settled exactly once with
/// [`Delivery::ack`] or [`Delivery::nack`].
pub struct Delivery {
    pub message: BrokerMessage,
    ack: Box<dyn AckToken>,
}

impl Delivery {
    pub(crate) fn new(message: BrokerMessage, ack: Box<dyn AckToken>) -> Self {
        Self { message, ack }
    }

    /// Acknowledge successful processing.
    pub async fn ack(self) -> Result<(), BrokerError> {
        self.ack.settle(Settlement::Ack).await
    }

    /// Negatively acknowledge. With `requeue` the message goes back to
    /// the queue for redelivery; without it the message is discarded.
    pub async fn nack(self, requeue: bool) -> Result<(), BrokerError> {
        self.ack.settle(Settlement::Nack { requeue }).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// A live consumer on one queue. Deliveries arrive through [`recv`];
/// dropping (or [`cancel`]ing) the subscription stops the consumer task.
///
/// [`recv`]: Subscription::recv
/// [`cancel`]: Subscription::cancel
pub struct Subscription {
    receiver: mpsc::Receiver<Delivery>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn new(receiver: mpsc::Receiver<Delivery>, task: JoinHandle<()>) -> Self {
        Self { receiver, task }
    }

    /// Next delivery, or None once the consumer task has stopped.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    /// Stop consuming.
    pub fn cancel(self) {
        self.task.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Transport-neutral broker handle. One instance owns the queue
/// declarations of its process; it is passed explicitly into
/// [`RpcClient`] and [`QueueConsumer`] so independent instances can
/// coexist (and be torn down) in one process.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declare a queue. Idempotent when re-declared with the same
    /// durability; a conflicting re-declare is an error.
    async fn declare_queue(&self, queue: &str, durable: bool) -> Result<(), BrokerError>;

    /// Publish a message to a queue.
    async fn publish(&self, queue: &str, message: BrokerMessage) -> Result<(), BrokerError>;

    /// Start consuming a queue. Each message is delivered to exactly one
    /// subscription bound to that queue.
    async fn consume(&self, queue: &str) -> Result<Subscription, BrokerError>;

    /// Delete a queue and any messages still on it.
    async fn delete_queue(&self, queue: &str) -> Result<(), BrokerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_headers_are_omitted_when_absent() {
        let message = BrokerMessage::new("{}".into());
        let raw = serde_json::to_string(&message).unwrap();
        assert!(!raw.contains("correlation_id"));
        assert!(!raw.contains("reply_to"));
    }

    #[test]
    fn message_roundtrips_with_headers() {
        let message = BrokerMessage {
            payload: r#"{"action":"login"}"#.into(),
            correlation_id: Some("abc".into()),
            reply_to: Some("reply.abc".into()),
        };
        let raw = serde_json::to_string(&message).unwrap();
        let parsed: BrokerMessage = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.correlation_id.as_deref(), Some("abc"));
        assert_eq!(parsed.reply_to.as_deref(), Some("reply.abc"));
    }
}
