//! Cancelling a task with `cascade` transitively cancels every
//! dependent that has not already reached a terminal state.

use conductor_core::engine::{EngineConfig, TaskEngine};
use conductor_core::models::{Task, TaskStatus};

#[tokio::test]
async fn cascading_cancel_reaches_every_transitive_dependent() {
    let engine = TaskEngine::new(EngineConfig::default());

    let t1 = Task::new("build", "root", 5);
    let id1 = t1.id.clone();
    let t2 = Task::new("build", "depends on root", 5).with_dependencies(vec![id1.clone()]);
    let id2 = t2.id.clone();
    let t3 = Task::new("build", "also depends on root", 5).with_dependencies(vec![id1.clone()]);
    let id3 = t3.id.clone();
    let t4 = Task::new("build", "depends on t3", 5).with_dependencies(vec![id3.clone()]);
    let id4 = t4.id.clone();

    engine.create(t1).await.unwrap();
    engine.create(t2).await.unwrap();
    engine.create(t3).await.unwrap();
    engine.create(t4).await.unwrap();

    let cancelled = engine
        .cancel(&id1, "root no longer needed".to_string(), true, false)
        .await
        .unwrap();
    assert_eq!(cancelled.len(), 4);

    for id in [&id1, &id2, &id3, &id4] {
        assert_eq!(engine.get(id).await.unwrap().status, TaskStatus::Cancelled);
    }
}
