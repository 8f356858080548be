//! Queue consumer: binds a queue to a table of action handlers.
//!
//! Each inbound message is decoded as `{action, data}`, dispatched to
//! the registered handler, and settled exactly once:
//!
//! - handler success, or a modeled error → reply (when `reply_to` is
//!   present) and ack
//! - unknown action → error-shaped reply and ack; redelivery would not
//!   help a caller that speaks the wrong protocol
//! - unexpected fault (storage breakage, panic, undecodable payload) →
//!   nack without requeue, logged with full context
//!
//! Fire-and-forget and reply-expected messages share this single
//! dispatch path; the consumer just branches on `reply_to`.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::rpc::RpcRequest;
use super::{Broker, BrokerError, BrokerMessage, Delivery};
use crate::shared::error::AppError;

/// Outcome of an action handler.
pub type HandlerResult = Result<serde_json::Value, AppError>;

type HandlerFuture = BoxFuture<'static, HandlerResult>;
type Handler = Arc<dyn Fn(serde_json::Value) -> HandlerFuture + Send + Sync>;

/// Immutable action name → handler map. Built once with [`register`]
/// and shared read-only across all consumer invocations.
///
/// [`register`]: ActionTable::register
#[derive(Default)]
pub struct ActionTable {
    actions: HashMap<String, Handler>,
}

impl ActionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an action name.
    pub fn register<F, Fut>(mut self, action: &str, handler: F) -> Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
    {
        self.actions
            .insert(action.to_string(), Arc::new(move |data| handler(data).boxed()));
        self
    }

    fn get(&self, action: &str) -> Option<Handler> {
        self.actions.get(action).cloned()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl std::fmt::Debug for ActionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ActionTable").field("actions", &names).finish()
    }
}

/// Decode an action's `data` payload into a typed request. Failures are
/// modeled errors (the caller sent a malformed body).
pub fn decode_payload<T: DeserializeOwned>(data: serde_json::Value) -> Result<T, AppError> {
    serde_json::from_value(data).map_err(|e| AppError::BadRequest(format!("Invalid payload: {e}")))
}

/// Binds queues to action tables on a shared broker handle.
pub struct QueueConsumer {
    broker: Arc<dyn Broker>,
    prefetch: usize,
}

impl QueueConsumer {
    pub fn new(broker: Arc<dyn Broker>, prefetch: usize) -> Self {
        Self {
            broker,
            prefetch: prefetch.max(1),
        }
    }

    /// Declare `queue` and start dispatching its messages against
    /// `actions`. Up to `prefetch` messages are handled concurrently;
    /// handlers must not assume serialized access to shared state.
    pub async fn bind(
        &self,
        queue: &str,
        actions: ActionTable,
        durable: bool,
    ) -> Result<ConsumerHandle, BrokerError> {
        self.broker.declare_queue(queue, durable).await?;
        let mut subscription = self.broker.consume(queue).await?;

        let actions = Arc::new(actions);
        let semaphore = Arc::new(Semaphore::new(self.prefetch));
        let broker = self.broker.clone();
        let queue_name = queue.to_string();

        let task = tokio::spawn(async move {
            while let Some(delivery) = subscription.recv().await {
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let actions = actions.clone();
                let broker = broker.clone();
                let queue_name = queue_name.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    process(broker, &queue_name, &actions, delivery).await;
                });
            }
        });

        info!(queue, "listening on queue");
        Ok(ConsumerHandle {
            queue: queue.to_string(),
            task,
        })
    }
}

/// Handle to a bound queue consumer. The consumer keeps running if the
/// handle is dropped; call [`shutdown`] to stop it.
///
/// [`shutdown`]: ConsumerHandle::shutdown
pub struct ConsumerHandle {
    queue: String,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn shutdown(self) {
        self.task.abort();
    }
}

enum Outcome {
    Reply(serde_json::Value),
    Fault(String),
}

async fn process(
    broker: Arc<dyn Broker>,
    queue: &str,
    actions: &ActionTable,
    delivery: Delivery,
) {
    let correlation_id = delivery.message.correlation_id.clone();
    let reply_to = delivery.message.reply_to.clone();

    let request: RpcRequest = match serde_json::from_str(&delivery.message.payload) {
        Ok(request) => request,
        Err(e) => {
            error!(queue, error = %e, "undecodable message; dropping without requeue");
            settle_nack(delivery, queue).await;
            return;
        }
    };

    let outcome = match actions.get(&request.action) {
        Some(handler) => {
            match AssertUnwindSafe(handler(request.data)).catch_unwind().await {
                Ok(Ok(value)) => Outcome::Reply(value),
                Ok(Err(error)) if error.is_fault() => Outcome::Fault(error.to_string()),
                Ok(Err(error)) => {
                    debug!(queue, action = %request.action, error = %error, "handler returned error");
                    Outcome::Reply(error_reply(&error))
                }
                Err(_) => Outcome::Fault("handler panicked".to_string()),
            }
        }
        None => {
            warn!(queue, action = %request.action, "unknown action");
            Outcome::Reply(json!({
                "success": false,
                "status": 400,
                "message": format!("Unknown action: {}", request.action),
            }))
        }
    };

    match outcome {
        Outcome::Reply(value) => {
            if let Some(reply_to) = reply_to {
                let reply = BrokerMessage {
                    payload: value.to_string(),
                    correlation_id,
                    reply_to: None,
                };
                if let Err(error) = broker.publish(&reply_to, reply).await {
                    error!(queue, error = %error, "failed to publish reply");
                    settle_nack(delivery, queue).await;
                    return;
                }
            }
            if let Err(error) = delivery.ack().await {
                debug!(queue, error = %error, "ack failed");
            }
        }
        Outcome::Fault(reason) => {
            error!(
                queue,
                action = %request.action,
                reason = %reason,
                "handler fault; dropping message without requeue"
            );
            settle_nack(delivery, queue).await;
        }
    }
}

async fn settle_nack(delivery: Delivery, queue: &str) {
    if let Err(error) = delivery.nack(false).await {
        debug!(queue, error = %error, "nack failed");
    }
}

fn error_reply(error: &AppError) -> serde_json::Value {
    json!({
        "success": false,
        "status": error.status().as_u16(),
        "message": error.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn action_table_registration() {
        let table = ActionTable::new()
            .register("ping", |_| async { Ok(json!("pong")) })
            .register("echo", |data| async move { Ok(data) });
        assert_eq!(table.len(), 2);
        assert!(table.get("ping").is_some());
        assert!(table.get("nope").is_none());
    }

    #[test]
    fn error_reply_carries_status_and_message() {
        let reply = error_reply(&AppError::NotFound("User not found".into()));
        assert_eq!(reply["success"], false);
        assert_eq!(reply["status"], 404);
        assert_eq!(reply["message"], "Not found: User not found");
    }

    #[test]
    fn decode_payload_rejects_wrong_shape() {
        #[derive(Debug, Deserialize)]
        struct Login {
            #[allow(dead_code)]
            email: String,
        }
        let err = decode_payload::<Login>(json!({"nope": 1})).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
