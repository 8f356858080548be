//! Redis-backed broker implementation.
//!
//! Queues are Redis lists. Publishing is an RPUSH; consuming follows the
//! reliable-queue pattern: BLMOVE pops into a per-queue processing list,
//! and acknowledging removes the entry from it with LREM. A message is
//! therefore never lost between pop and ack, at the cost of at-least-once
//! delivery when a consumer dies mid-flight.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tracing::{debug, error, instrument, warn};

use super::{AckToken, Broker, BrokerError, BrokerMessage, Delivery, Settlement, Subscription};

/// Poll interval for the blocking pop, seconds. Short enough that a
/// cancelled subscription stops promptly.
const BLOCK_SECS: f64 = 1.0;

/// Redis-backed [`Broker`] implementation.
#[derive(Clone)]
pub struct RedisBroker {
    conn: ConnectionManager,
    declared: std::sync::Arc<DashMap<String, bool>>,
}

impl RedisBroker {
    /// Creates a broker handle over an established connection manager.
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            declared: std::sync::Arc::new(DashMap::new()),
        }
    }

    fn queue_key(queue: &str) -> String {
        format!("mq:{queue}")
    }

    fn processing_key(queue: &str) -> String {
        format!("mq:{queue}:processing")
    }
}

#[async_trait]
impl Broker for RedisBroker {
    #[instrument(skip(self), level = "debug")]
    async fn declare_queue(&self, queue: &str, durable: bool) -> Result<(), BrokerError> {
        if let Some(existing) = self.declared.get(queue) {
            if *existing != durable {
                return Err(BrokerError::DeclareMismatch(queue.to_string()));
            }
            return Ok(());
        }
        self.declared.insert(queue.to_string(), durable);
        debug!(queue, durable, "queue declared");
        Ok(())
    }

    #[instrument(skip(self, message), level = "debug")]
    async fn publish(&self, queue: &str, message: BrokerMessage) -> Result<(), BrokerError> {
        let raw = serde_json::to_string(&message)
            .map_err(|e| BrokerError::Transport(e.to_string()))?;
        let mut conn = self.conn.clone();
        let _: i64 = conn.rpush(Self::queue_key(queue), raw).await?;
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<Subscription, BrokerError> {
        let queue_key = Self::queue_key(queue);
        let processing_key = Self::processing_key(queue);
        let mut conn = self.conn.clone();
        let (tx, rx) = mpsc::channel(16);

        let task = tokio::spawn(async move {
            loop {
                if tx.is_closed() {
                    break;
                }
                let popped: Result<Option<String>, redis::RedisError> = redis::cmd("BLMOVE")
                    .arg(&queue_key)
                    .arg(&processing_key)
                    .arg("LEFT")
                    .arg("RIGHT")
                    .arg(BLOCK_SECS)
                    .query_async(&mut conn)
                    .await;

                let raw = match popped {
                    Ok(Some(raw)) => raw,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(queue = %queue_key, error = %e, "consume poll failed; retrying");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                };

                let message: BrokerMessage = match serde_json::from_str(&raw) {
                    Ok(message) => message,
                    Err(e) => {
                        error!(queue = %queue_key, error = %e, "undecodable queue entry dropped");
                        let _: Result<i64, _> = conn.lrem(&processing_key, 1, &raw).await;
                        continue;
                    }
                };

                let delivery = Delivery::new(
                    message,
                    Box::new(RedisAck {
                        conn: conn.clone(),
                        queue_key: queue_key.clone(),
                        processing_key: processing_key.clone(),
                        raw: raw.clone(),
                    }),
                );

                if tx.send(delivery).await.is_err() {
                    // receiver gone before handoff; return the entry to the queue
                    let _: Result<i64, _> = conn.lrem(&processing_key, 1, &raw).await;
                    let _: Result<i64, _> = conn.lpush(&queue_key, &raw).await;
                    break;
                }
            }
        });

        Ok(Subscription::new(rx, task))
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete_queue(&self, queue: &str) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let keys = vec![Self::queue_key(queue), Self::processing_key(queue)];
        let _: i64 = conn.del(keys.as_slice()).await?;
        self.declared.remove(queue);
        Ok(())
    }
}

struct RedisAck {
    conn: ConnectionManager,
    queue_key: String,
    processing_key: String,
    raw: String,
}

#[async_trait]
impl AckToken for RedisAck {
    async fn settle(mut self: Box<Self>, settlement: Settlement) -> Result<(), BrokerError> {
        let _: i64 = self.conn.lrem(&self.processing_key, 1, &self.raw).await?;
        if let Settlement::Nack { requeue: true } = settlement {
            let _: i64 = self.conn.rpush(&self.queue_key, &self.raw).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBroker")
            .field("declared", &self.declared.len())
            .finish_non_exhaustive()
    }
}
