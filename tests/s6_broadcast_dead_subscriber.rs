//! A broadcast to three participants under at-least-once reliability,
//! where one receiver never accepts delivery: the two healthy
//! participants are each delivered exactly once, and the unreachable
//! one's copy ends up dead-lettered with reason `retry_exhausted` once
//! its retry budget is exhausted.

use conductor_core::bus::{
    BusConfig, Channel, ChannelType, DeliveryMode, Message, MessageBus, Queue, QueueType, Reliability, RetryConfig,
    SendOptions,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn dead_subscriber_is_dead_lettered_while_others_are_delivered_once() {
    let bus = MessageBus::new(BusConfig {
        retry: RetryConfig {
            max_attempts: 2,
            base_backoff: Duration::ZERO,
            ..Default::default()
        },
        ..Default::default()
    });
    bus.create_queue(Queue::new("dlq", QueueType::Fifo, DeliveryMode::AtMostOnce, 10))
        .await;

    let mut room = Channel::new("ops-room", ChannelType::Broadcast);
    room.join("alive-1");
    room.join("alive-2");
    room.join("dead-subscriber");
    bus.create_channel(room).await;

    let deliveries: Arc<std::sync::Mutex<Vec<String>>> = Arc::new(std::sync::Mutex::new(Vec::new()));

    let deliver = {
        let deliveries = deliveries.clone();
        move |_msg: Message, receiver: String| {
            let deliveries = deliveries.clone();
            async move {
                if receiver == "dead-subscriber" {
                    Err("unreachable".to_string())
                } else {
                    deliveries.lock().unwrap().push(receiver);
                    Ok(())
                }
            }
        }
    };

    let message = Message::new(
        "announcement",
        "sender",
        vec![],
        b"deploy complete".to_vec(),
        "text/plain",
        SendOptions {
            reliability: Reliability::AtLeastOnce,
            ..Default::default()
        },
    );
    let outcome = bus.send(message, Some("ops-room"), deliver.clone()).await.unwrap();
    assert_eq!(outcome.queued_for_retry, vec!["dead-subscriber".to_string()]);

    let attempts = Arc::new(AtomicUsize::new(0));
    for _ in 0..2 {
        let attempts = attempts.clone();
        let deliver = deliver.clone();
        bus.run_retry_tick("dlq", move |msg, receiver| {
            let attempts = attempts.clone();
            let deliver = deliver.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                deliver(msg, receiver).await
            }
        })
        .await;
    }

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(bus.dead_letter_count("dlq").await, Some(1));

    let mut delivered = deliveries.lock().unwrap().clone();
    delivered.sort();
    assert_eq!(delivered, vec!["alive-1".to_string(), "alive-2".to_string()]);
}
