//! RPC and queue-consumer behavior over the in-process broker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use sayhi_server::infrastructure::broker::{
    ActionTable, Broker, BrokerMessage, MemoryBroker, QueueConsumer, RpcClient, RpcError,
};
use sayhi_server::shared::error::AppError;

fn broker() -> Arc<dyn Broker> {
    Arc::new(MemoryBroker::new())
}

#[tokio::test]
async fn call_resolves_with_the_handler_reply() {
    let broker = broker();
    let rpc = RpcClient::new(broker.clone(), Duration::from_secs(2));
    let consumer = QueueConsumer::new(broker, 8);

    let actions = ActionTable::new().register("echo", |data| async move {
        Ok(json!({ "success": true, "echo": data }))
    });
    consumer.bind("svc", actions, false).await.unwrap();

    let reply = rpc.call("svc", "echo", json!({ "n": 7 })).await.unwrap();
    assert_eq!(reply["success"], true);
    assert_eq!(reply["echo"]["n"], 7);
    assert_eq!(rpc.pending_calls(), 0);
}

#[tokio::test]
async fn concurrent_calls_to_one_queue_never_cross_talk() {
    let broker = broker();
    let rpc = Arc::new(RpcClient::new(broker.clone(), Duration::from_secs(5)));
    let consumer = QueueConsumer::new(broker, 16);

    // uneven handler latency so replies come back out of order
    let actions = ActionTable::new().register("echo", |data| async move {
        let n = data["n"].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis((n % 5) * 20)).await;
        Ok(json!({ "n": n }))
    });
    consumer.bind("svc", actions, false).await.unwrap();

    let calls = (0..16u64).map(|n| {
        let rpc = rpc.clone();
        tokio::spawn(async move {
            let reply = rpc.call("svc", "echo", json!({ "n": n })).await.unwrap();
            (n, reply)
        })
    });

    for handle in calls {
        let (n, reply) = handle.await.unwrap();
        assert_eq!(reply["n"], n, "call {n} got someone else's reply");
    }
    assert_eq!(rpc.pending_calls(), 0);
}

#[tokio::test]
async fn call_times_out_when_nobody_replies() {
    let broker = broker();
    let rpc = RpcClient::new(broker, Duration::from_millis(100));

    let err = rpc.call("nobody", "ping", json!({})).await.unwrap_err();
    assert!(matches!(err, RpcError::CallTimeout(_)));
    assert_eq!(rpc.pending_calls(), 0);
}

#[tokio::test]
async fn mismatched_correlation_id_is_dropped_silently() {
    let broker = broker();
    broker.declare_queue("svc", false).await.unwrap();
    let mut requests = broker.consume("svc").await.unwrap();

    // a hand-rolled callee that first replies with a stale correlation
    // id, then with the real one
    let replier = broker.clone();
    tokio::spawn(async move {
        let delivery = requests.recv().await.unwrap();
        let reply_to = delivery.message.reply_to.clone().unwrap();
        let correlation_id = delivery.message.correlation_id.clone();

        replier
            .publish(
                &reply_to,
                BrokerMessage {
                    payload: json!({ "which": "stale" }).to_string(),
                    correlation_id: Some("stale-token".into()),
                    reply_to: None,
                },
            )
            .await
            .unwrap();
        replier
            .publish(
                &reply_to,
                BrokerMessage {
                    payload: json!({ "which": "real" }).to_string(),
                    correlation_id,
                    reply_to: None,
                },
            )
            .await
            .unwrap();
        delivery.ack().await.unwrap();
    });

    let rpc = RpcClient::new(broker, Duration::from_secs(2));
    let reply = rpc.call("svc", "anything", json!({})).await.unwrap();
    assert_eq!(reply["which"], "real");
}

#[tokio::test]
async fn closed_channel_fails_immediately() {
    let memory = Arc::new(MemoryBroker::new());
    memory.close();
    let broker: Arc<dyn Broker> = memory;

    let rpc = RpcClient::new(broker, Duration::from_secs(1));
    let err = rpc.call("svc", "ping", json!({})).await.unwrap_err();
    assert!(matches!(err, RpcError::ChannelUnavailable));
}

#[tokio::test]
async fn unknown_action_gets_error_reply_and_consumer_survives() {
    let broker = broker();
    let rpc = RpcClient::new(broker.clone(), Duration::from_secs(2));
    let consumer = QueueConsumer::new(broker, 8);

    let actions =
        ActionTable::new().register("ping", |_| async move { Ok(json!({ "success": true })) });
    consumer.bind("svc", actions, false).await.unwrap();

    let reply = rpc.call("svc", "frobnicate", json!({})).await.unwrap();
    assert_eq!(reply["success"], false);
    assert_eq!(reply["status"], 400);
    assert_eq!(reply["message"], "Unknown action: frobnicate");

    // the consumer loop keeps processing after the protocol mismatch
    let reply = rpc.call("svc", "ping", json!({})).await.unwrap();
    assert_eq!(reply["success"], true);
}

#[tokio::test]
async fn modeled_handler_error_becomes_error_reply() {
    let broker = broker();
    let rpc = RpcClient::new(broker.clone(), Duration::from_secs(2));
    let consumer = QueueConsumer::new(broker, 8);

    let actions = ActionTable::new().register("lookup", |_| async move {
        Err::<serde_json::Value, _>(AppError::NotFound("User not found".into()))
    });
    consumer.bind("svc", actions, false).await.unwrap();

    let reply = rpc.call("svc", "lookup", json!({})).await.unwrap();
    assert_eq!(reply["success"], false);
    assert_eq!(reply["status"], 404);
}

#[tokio::test]
async fn handler_fault_drops_the_message_without_retry() {
    let broker = broker();
    let rpc = RpcClient::new(broker.clone(), Duration::from_secs(2));
    let consumer = QueueConsumer::new(broker, 8);

    let attempts = Arc::new(AtomicUsize::new(0));
    let actions = ActionTable::new().register("explode", {
        let attempts = attempts.clone();
        move |_| {
            let attempts = attempts.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<serde_json::Value, _>(AppError::Internal("storage down".into()))
            }
        }
    });
    consumer.bind("svc", actions, false).await.unwrap();

    // no reply comes back for a fault; the caller only sees the timeout
    let err = rpc
        .call_with_timeout("svc", "explode", json!({}), Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::CallTimeout(_)));

    // negatively acknowledged without requeue: exactly one attempt
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn fire_and_forget_runs_the_handler_without_a_reply() {
    let broker = broker();
    let consumer = QueueConsumer::new(broker.clone(), 8);

    let handled = Arc::new(AtomicUsize::new(0));
    let actions = ActionTable::new().register("notify", {
        let handled = handled.clone();
        move |_| {
            let handled = handled.clone();
            async move {
                handled.fetch_add(1, Ordering::SeqCst);
                Ok(json!({ "success": true }))
            }
        }
    });
    consumer.bind("svc", actions, false).await.unwrap();

    // no reply_to header: the consumer must not attempt a reply
    broker
        .publish(
            "svc",
            BrokerMessage::new(json!({ "action": "notify", "data": {} }).to_string()),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(handled.load(Ordering::SeqCst), 1);
}
