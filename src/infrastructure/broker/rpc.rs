//! Request/reply over the broker.
//!
//! Every call publishes `{action, data}` to the callee's queue with a
//! fresh correlation id and a private reply queue, then suspends until
//! the correlated reply arrives or the deadline passes. Replies are
//! matched strictly by correlation id through a pending-call table, so
//! overlapping calls to the same queue can complete in any order and a
//! retained consumer from an earlier timed-out call can never resolve
//! the wrong caller.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Broker, BrokerError, BrokerMessage, Subscription};

/// RPC-level failure surfaced to callers.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// No broker connection; the call was never sent.
    #[error("broker channel unavailable")]
    ChannelUnavailable,

    /// No reply within the deadline. The callee may still have executed;
    /// treat this as "unknown outcome", not "did not happen".
    #[error("no reply within {0:?}")]
    CallTimeout(Duration),

    /// Broker-level send or receive failure.
    #[error("broker transport failure: {0}")]
    Transport(String),
}

impl From<BrokerError> for RpcError {
    fn from(e: BrokerError) -> Self {
        match e {
            BrokerError::ChannelUnavailable => RpcError::ChannelUnavailable,
            other => RpcError::Transport(other.to_string()),
        }
    }
}

impl From<RpcError> for crate::shared::error::AppError {
    fn from(e: RpcError) -> Self {
        use crate::shared::error::AppError;
        match e {
            RpcError::CallTimeout(_) => AppError::UpstreamTimeout(e.to_string()),
            RpcError::ChannelUnavailable | RpcError::Transport(_) => {
                AppError::Upstream(e.to_string())
            }
        }
    }
}

/// Wire body of a request: `{action, data}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub action: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

type PendingCalls = DashMap<String, oneshot::Sender<serde_json::Value>>;

/// Broker-mediated RPC caller.
///
/// Shared across the process via `Arc`; every call owns its private
/// reply queue and pending-call entry, so concurrent calls never
/// interfere.
pub struct RpcClient {
    broker: Arc<dyn Broker>,
    pending: Arc<PendingCalls>,
    default_timeout: Duration,
}

impl RpcClient {
    pub fn new(broker: Arc<dyn Broker>, default_timeout: Duration) -> Self {
        Self {
            broker,
            pending: Arc::new(DashMap::new()),
            default_timeout,
        }
    }

    /// Calls outstanding right now (resolved and timed-out calls are
    /// removed from the table).
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Issue a request with the client's default deadline.
    pub async fn call(
        &self,
        queue: &str,
        action: &str,
        data: serde_json::Value,
    ) -> Result<serde_json::Value, RpcError> {
        self.call_with_timeout(queue, action, data, self.default_timeout)
            .await
    }

    /// Issue a request and suspend until the correlated reply arrives or
    /// `timeout` elapses. A reply arriving after the deadline is dropped
    /// silently.
    pub async fn call_with_timeout(
        &self,
        queue: &str,
        action: &str,
        data: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, RpcError> {
        let request = RpcRequest {
            action: action.to_string(),
            data,
        };
        let payload =
            serde_json::to_string(&request).map_err(|e| RpcError::Transport(e.to_string()))?;

        let reply_queue = format!("reply.{}", Uuid::new_v4().simple());
        self.broker.declare_queue(&reply_queue, false).await?;

        // Correlation ids must be unique among outstanding calls; a
        // collision would misroute a reply. Regenerate instead of
        // assuming impossibility.
        let (correlation_id, rx) = loop {
            let candidate = Uuid::new_v4().to_string();
            if let Entry::Vacant(entry) = self.pending.entry(candidate.clone()) {
                let (tx, rx) = oneshot::channel();
                entry.insert(tx);
                break (candidate, rx);
            }
        };

        let subscription = match self.broker.consume(&reply_queue).await {
            Ok(subscription) => subscription,
            Err(e) => {
                self.pending.remove(&correlation_id);
                let _ = self.broker.delete_queue(&reply_queue).await;
                return Err(e.into());
            }
        };
        let dispatcher = tokio::spawn(Self::dispatch_replies(subscription, self.pending.clone()));

        let message = BrokerMessage {
            payload,
            correlation_id: Some(correlation_id.clone()),
            reply_to: Some(reply_queue.clone()),
        };
        if let Err(e) = self.broker.publish(queue, message).await {
            self.pending.remove(&correlation_id);
            dispatcher.abort();
            let _ = self.broker.delete_queue(&reply_queue).await;
            return Err(e.into());
        }

        debug!(queue, action, correlation_id = %correlation_id, "rpc call published");

        let result = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(RpcError::Transport("reply dispatcher stopped".into())),
            Err(_) => {
                warn!(queue, action, correlation_id = %correlation_id, "rpc call timed out");
                Err(RpcError::CallTimeout(timeout))
            }
        };

        // Single cleanup point for every exit: the pending entry goes
        // away (a late reply then finds nothing to resolve), the
        // one-shot consumer is cancelled, the reply queue reclaimed.
        self.pending.remove(&correlation_id);
        dispatcher.abort();
        if let Err(e) = self.broker.delete_queue(&reply_queue).await {
            debug!(queue = %reply_queue, error = %e, "reply queue cleanup failed");
        }

        result
    }

    /// Reads a private reply queue and resolves matching pending calls.
    /// Anything without a matching correlation id is dropped without
    /// touching other calls.
    async fn dispatch_replies(mut subscription: Subscription, pending: Arc<PendingCalls>) {
        while let Some(delivery) = subscription.recv().await {
            let correlation_id = delivery.message.correlation_id.clone();
            let payload = delivery.message.payload.clone();
            if let Err(e) = delivery.ack().await {
                debug!(error = %e, "reply ack failed");
            }

            let Some(correlation_id) = correlation_id else {
                debug!("reply without correlation id dropped");
                continue;
            };
            let value: serde_json::Value = match serde_json::from_str(&payload) {
                Ok(value) => value,
                Err(e) => {
                    warn!(correlation_id = %correlation_id, error = %e, "malformed reply dropped");
                    continue;
                }
            };
            match pending.remove(&correlation_id) {
                Some((_, slot)) => {
                    // the receiver may have timed out concurrently; a
                    // failed send is the late-reply case and is silent
                    let _ = slot.send(value);
                }
                None => {
                    debug!(correlation_id = %correlation_id, "stale reply dropped");
                }
            }
        }
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("pending", &self.pending.len())
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_payload_roundtrip() {
        let request = RpcRequest {
            action: "login".into(),
            data: serde_json::json!({"email": "a@b.c"}),
        };
        let raw = serde_json::to_string(&request).unwrap();
        let parsed: RpcRequest = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.action, "login");
        assert_eq!(parsed.data["email"], "a@b.c");
    }

    #[test]
    fn data_defaults_to_null_when_absent() {
        let parsed: RpcRequest = serde_json::from_str(r#"{"action":"ping"}"#).unwrap();
        assert!(parsed.data.is_null());
    }
}
