//! A task with a retry budget fails twice and succeeds on the third
//! attempt, landing on `completed` with the retry counter reflecting
//! both prior failures.

use conductor_core::engine::{EngineConfig, RetryPolicy, TaskEngine};
use conductor_core::models::{AgentProfile, Task, TaskStatus};
use std::time::{Duration, Instant};

#[tokio::test]
async fn flaky_task_retries_twice_then_completes() {
    let mut engine = TaskEngine::new(EngineConfig::default());
    engine.retry_policy = RetryPolicy {
        base: Duration::from_millis(40),
        multiplier: 2.0,
        max: Duration::from_secs(1),
        jitter: false,
    };

    let mut worker = AgentProfile::new("worker", 1).with_capabilities(["flaky".to_string()]);
    worker.id = "w1".to_string();
    engine.register_agent(worker).await;

    let task = Task::new("flaky", "sometimes works", 5)
        .with_capabilities(["flaky".to_string()])
        .with_max_retries(2);
    let id = task.id.clone();
    engine.create(task).await.unwrap();

    let mut backoffs = Vec::new();
    for attempt in 0..2 {
        let agent_id = engine.assign(&id, None).await.unwrap();
        engine.start_running(&id).await.unwrap();

        let started = Instant::now();
        let status = engine.fail(&id, &agent_id, "timeout", "agent did not respond").await.unwrap();
        backoffs.push(started.elapsed());

        assert_eq!(status, TaskStatus::Pending);
        assert_eq!(engine.get(&id).await.unwrap().retry_count, attempt + 1);
    }

    // Backoff before the first retry is at least one base interval, and
    // the second retry waits noticeably longer than the first.
    assert!(backoffs[0] >= Duration::from_millis(35));
    assert!(backoffs[1] > backoffs[0]);

    let agent_id = engine.assign(&id, None).await.unwrap();
    engine.start_running(&id).await.unwrap();
    engine.complete(&id, &agent_id).await.unwrap();

    let task = engine.get(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.retry_count, 2);
}
