//! A priority queue on the bus always dequeues its highest-priority
//! entry first, regardless of submission order.

use conductor_core::bus::{DeliveryMode, Message, MessagePriority, Queue, QueueType, SendOptions};

#[test]
fn bus_priority_queue_dequeues_highest_first() {
    let mut q = Queue::new("work", QueueType::Priority, DeliveryMode::AtMostOnce, 10);
    for priority in [
        MessagePriority::Low,
        MessagePriority::Critical,
        MessagePriority::Normal,
        MessagePriority::High,
    ] {
        q.push(Message::new(
            "job",
            "scheduler",
            vec!["worker".to_string()],
            vec![],
            "text/plain",
            SendOptions {
                priority,
                ..Default::default()
            },
        ));
    }

    let order: Vec<_> = std::iter::from_fn(|| q.pop_ready()).map(|m| m.priority).collect();
    assert_eq!(
        order,
        vec![
            MessagePriority::Critical,
            MessagePriority::High,
            MessagePriority::Normal,
            MessagePriority::Low,
        ]
    );
}
