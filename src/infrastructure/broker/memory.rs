//! In-process broker implementation.
//!
//! Queues are plain VecDeques behind a Notify. Competing consumers on
//! the same queue each pop from the shared deque, which preserves the
//! one-consumer-per-message property of the transport contract. Used by
//! the test suites and by single-node deployments (`broker.driver =
//! "memory"`).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex, Notify};

use super::{AckToken, Broker, BrokerError, BrokerMessage, Delivery, Settlement, Subscription};

struct MemoryQueue {
    items: Mutex<VecDeque<String>>,
    notify: Notify,
}

impl MemoryQueue {
    fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }
}

/// In-process [`Broker`] implementation.
pub struct MemoryBroker {
    queues: DashMap<String, Arc<MemoryQueue>>,
    durability: DashMap<String, bool>,
    closed: AtomicBool,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            queues: DashMap::new(),
            durability: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Tear the channel down. Every subsequent operation fails with
    /// [`BrokerError::ChannelUnavailable`], mirroring a lost broker
    /// connection.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(BrokerError::ChannelUnavailable)
        } else {
            Ok(())
        }
    }

    fn queue(&self, name: &str) -> Arc<MemoryQueue> {
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryQueue::new()))
            .clone()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare_queue(&self, queue: &str, durable: bool) -> Result<(), BrokerError> {
        self.ensure_open()?;
        if let Some(existing) = self.durability.get(queue) {
            if *existing != durable {
                return Err(BrokerError::DeclareMismatch(queue.to_string()));
            }
        } else {
            self.durability.insert(queue.to_string(), durable);
        }
        self.queue(queue);
        Ok(())
    }

    async fn publish(&self, queue: &str, message: BrokerMessage) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let raw = serde_json::to_string(&message)
            .map_err(|e| BrokerError::Transport(e.to_string()))?;
        let q = self.queue(queue);
        q.items.lock().await.push_back(raw);
        q.notify.notify_one();
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<Subscription, BrokerError> {
        self.ensure_open()?;
        let q = self.queue(queue);
        let (tx, rx) = mpsc::channel(16);

        let task = tokio::spawn(async move {
            loop {
                let raw = q.items.lock().await.pop_front();
                match raw {
                    Some(raw) => {
                        let message: BrokerMessage = match serde_json::from_str(&raw) {
                            Ok(message) => message,
                            Err(e) => {
                                tracing::error!(error = %e, "undecodable queue entry dropped");
                                continue;
                            }
                        };
                        let delivery = Delivery::new(
                            message,
                            Box::new(MemoryAck {
                                queue: q.clone(),
                                raw,
                            }),
                        );
                        if let Err(unsent) = tx.send(delivery).await {
                            // receiver gone before handoff; put the message back
                            if let Ok(raw) = serde_json::to_string(&unsent.0.message) {
                                q.items.lock().await.push_front(raw);
                                q.notify.notify_one();
                            }
                            break;
                        }
                    }
                    None => {
                        tokio::select! {
                            _ = q.notify.notified() => {}
                            _ = tx.closed() => break,
                            // fallback tick: Notify holds a single permit, so
                            // a burst of publishes can outrun the wakeups
                            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                        }
                    }
                }
            }
        });

        Ok(Subscription::new(rx, task))
    }

    async fn delete_queue(&self, queue: &str) -> Result<(), BrokerError> {
        self.queues.remove(queue);
        self.durability.remove(queue);
        Ok(())
    }
}

struct MemoryAck {
    queue: Arc<MemoryQueue>,
    raw: String,
}

#[async_trait]
impl AckToken for MemoryAck {
    async fn settle(self: Box<Self>, settlement: Settlement) -> Result<(), BrokerError> {
        match settlement {
            // the entry was popped at delivery time
            Settlement::Ack | Settlement::Nack { requeue: false } => Ok(()),
            Settlement::Nack { requeue: true } => {
                self.queue.items.lock().await.push_front(self.raw);
                self.queue.notify.notify_one();
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("queues", &self.queues.len())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_then_consume() {
        let broker = MemoryBroker::new();
        broker.declare_queue("q", false).await.unwrap();
        broker
            .publish("q", BrokerMessage::new("{\"n\":1}".into()))
            .await
            .unwrap();

        let mut subscription = broker.consume("q").await.unwrap();
        let delivery = subscription.recv().await.unwrap();
        assert_eq!(delivery.message.payload, "{\"n\":1}");
        delivery.ack().await.unwrap();
    }

    #[tokio::test]
    async fn nack_with_requeue_redelivers() {
        let broker = MemoryBroker::new();
        broker.declare_queue("q", false).await.unwrap();
        broker
            .publish("q", BrokerMessage::new("{}".into()))
            .await
            .unwrap();

        let mut subscription = broker.consume("q").await.unwrap();
        let delivery = subscription.recv().await.unwrap();
        delivery.nack(true).await.unwrap();

        let redelivered = subscription.recv().await.unwrap();
        assert_eq!(redelivered.message.payload, "{}");
        redelivered.nack(false).await.unwrap();
    }

    #[tokio::test]
    async fn closed_channel_rejects_operations() {
        let broker = MemoryBroker::new();
        broker.close();
        let err = broker
            .publish("q", BrokerMessage::new("{}".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::ChannelUnavailable));
    }

    #[tokio::test]
    async fn conflicting_redeclare_is_rejected() {
        let broker = MemoryBroker::new();
        broker.declare_queue("q", true).await.unwrap();
        broker.declare_queue("q", true).await.unwrap();
        let err = broker.declare_queue("q", false).await.unwrap_err();
        assert!(matches!(err, BrokerError::DeclareMismatch(_)));
    }
}
