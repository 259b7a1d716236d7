//! Repeated failures against one agent's circuit open it; once open,
//! assignment to that agent is refused and the task is rerouted to a
//! second, healthy agent.

use conductor_core::engine::{EngineConfig, TaskEngine};
use conductor_core::error::OrchestratorError;
use conductor_core::models::{AgentProfile, Task};

#[tokio::test]
async fn open_circuit_reroutes_to_a_different_agent() {
    let engine = TaskEngine::new(EngineConfig::default());

    let mut flaky = AgentProfile::new("worker", 2).with_capabilities(["deploy".to_string()]);
    flaky.id = "flaky-agent".to_string();
    engine.register_agent(flaky).await;

    let mut healthy = AgentProfile::new("worker", 2).with_capabilities(["deploy".to_string()]);
    healthy.id = "healthy-agent".to_string();
    engine.register_agent(healthy).await;

    for i in 0..5 {
        let flaky_task = Task::new("deploy", &format!("flaky-attempt-{i}"), 5)
            .with_capabilities(["deploy".to_string()]);
        let flaky_id = flaky_task.id.clone();
        engine.create(flaky_task).await.unwrap();

        let agent_id = engine
            .assign(&flaky_id, Some(&"flaky-agent".to_string()))
            .await
            .unwrap();
        engine.start_running(&flaky_id).await.unwrap();
        let status = engine
            .fail(&flaky_id, &agent_id, "deploy_error", "deploy hook rejected")
            .await
            .unwrap();
        assert_eq!(status, conductor_core::models::TaskStatus::Failed);
    }

    assert_eq!(
        engine.circuits.state("flaky-agent").await,
        conductor_core::circuit::CircuitState::Open
    );

    let task = Task::new("deploy", "ship it", 5).with_capabilities(["deploy".to_string()]);
    let id = task.id.clone();
    engine.create(task).await.unwrap();

    let err = engine
        .assign(&id, Some(&"flaky-agent".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::CircuitOpen { .. }));

    let agent_id = engine.assign(&id, Some(&"healthy-agent".to_string())).await.unwrap();
    assert_eq!(agent_id, "healthy-agent");
}
