//! A three-task dependency chain runs start to finish in order, with a
//! single agent capable of all of them.

use conductor_core::engine::{EngineConfig, TaskEngine};
use conductor_core::models::{AgentProfile, Task, TaskStatus};

#[tokio::test]
async fn linear_pipeline_completes_in_dependency_order() {
    let engine = TaskEngine::new(EngineConfig::default());

    let mut worker = AgentProfile::new("worker", 1).with_capabilities(["build".to_string()]);
    worker.id = "w1".to_string();
    engine.register_agent(worker).await;

    let t1 = Task::new("build", "compile core", 5).with_capabilities(["build".to_string()]);
    let id1 = t1.id.clone();
    let t2 = Task::new("build", "link binary", 5)
        .with_capabilities(["build".to_string()])
        .with_dependencies(vec![id1.clone()]);
    let id2 = t2.id.clone();
    let t3 = Task::new("build", "package artifact", 5)
        .with_capabilities(["build".to_string()])
        .with_dependencies(vec![id2.clone()]);
    let id3 = t3.id.clone();

    engine.create(t1).await.unwrap();
    engine.create(t2).await.unwrap();
    engine.create(t3).await.unwrap();

    let mut completed_order = Vec::new();
    for id in [&id1, &id2, &id3] {
        let agent_id = engine.assign(id, None).await.unwrap();
        engine.start_running(id).await.unwrap();
        engine.complete(id, &agent_id).await.unwrap();
        completed_order.push(id.clone());
    }

    assert_eq!(completed_order, vec![id1.clone(), id2.clone(), id3.clone()]);
    for id in [&id1, &id2, &id3] {
        assert_eq!(engine.get(id).await.unwrap().status, TaskStatus::Completed);
    }
}
