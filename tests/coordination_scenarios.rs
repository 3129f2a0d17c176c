//! Integration tests for the coordination engine
//!
//! Exercises FIFO resource handoff, deadlock rejection, wait timeouts,
//! abandoned waits, maintenance of orphaned state, agent messaging and scheduling.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use backbone::config::CoordinationConfig;
use backbone::coordination::{CoordinationEngine, LeastLoaded};
use backbone::error::CoordinationError;
use backbone::events::{BackendEvent, EventBus};
use backbone::types::{ConflictType, Task, TaskStatus};

fn setup(agents: &[&str]) -> (Arc<CoordinationEngine>, EventBus) {
    let events = EventBus::new(256);
    let config = CoordinationConfig {
        resource_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    let engine = Arc::new(CoordinationEngine::new(config, events.clone()).unwrap());
    for agent in agents {
        engine.register_agent(*agent).unwrap();
    }
    (engine, events)
}

async fn wait_until_queued(engine: &CoordinationEngine, resource: &str, count: usize) {
    while engine.waiters(resource).len() < count {
        tokio::task::yield_now().await;
    }
}

fn spawn_acquire(
    engine: &Arc<CoordinationEngine>,
    resource: &str,
    agent: &str,
) -> tokio::task::JoinHandle<Result<(), CoordinationError>> {
    let engine = Arc::clone(engine);
    let resource = resource.to_string();
    let agent = agent.to_string();
    tokio::spawn(async move { engine.acquire_resource(&resource, &agent).await })
}

#[tokio::test(start_paused = true)]
async fn test_release_hands_resource_to_waiter() {
    let (engine, _events) = setup(&["agent-1", "agent-2"]);

    engine.acquire_resource("R", "agent-1").await.unwrap();
    let waiter = spawn_acquire(&engine, "R", "agent-2");
    wait_until_queued(&engine, "R", 1).await;
    assert_eq!(engine.waiters("R"), vec!["agent-2"]);

    engine.release_resource("R", "agent-1").unwrap();
    waiter.await.unwrap().unwrap();

    assert_eq!(engine.resource_holder("R").as_deref(), Some("agent-2"));
    assert!(engine.waiters("R").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_circular_wait_is_rejected_immediately() {
    let (engine, events) = setup(&["agent-1", "agent-2"]);
    let mut rx = events.subscribe();

    engine.acquire_resource("R1", "agent-1").await.unwrap();
    engine.acquire_resource("R2", "agent-2").await.unwrap();

    let blocked = spawn_acquire(&engine, "R2", "agent-1");
    wait_until_queued(&engine, "R2", 1).await;

    let started = tokio::time::Instant::now();
    let err = engine.acquire_resource("R1", "agent-2").await.unwrap_err();
    assert!(err.is_deadlock());
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert!(engine.waiters("R1").is_empty());

    let mut prevented = false;
    while let Ok(event) = rx.try_recv() {
        if let BackendEvent::DeadlockPrevented { agent_id, cycle, .. } = event {
            assert_eq!(agent_id, "agent-2");
            assert!(cycle.contains(&"agent-1".to_string()));
            prevented = true;
        }
    }
    assert!(prevented);

    // agent-1 still gets R2 once agent-2 backs off.
    engine.release_resource("R2", "agent-2").unwrap();
    blocked.await.unwrap().unwrap();
    assert_eq!(engine.resource_holder("R2").as_deref(), Some("agent-1"));
}

#[tokio::test(start_paused = true)]
async fn test_cycle_through_earlier_waiter_is_rejected() {
    let (engine, _events) = setup(&["x", "a", "b"]);

    engine.acquire_resource("r1", "x").await.unwrap();
    engine.acquire_resource("r2", "b").await.unwrap();

    let first = spawn_acquire(&engine, "r1", "a");
    wait_until_queued(&engine, "r1", 1).await;
    let second = spawn_acquire(&engine, "r1", "b");
    wait_until_queued(&engine, "r1", 2).await;

    // b waits behind a on r1, so a waiting on b's r2 would never resolve.
    let err = engine.acquire_resource("r2", "a").await.unwrap_err();
    assert!(err.is_deadlock());
    assert!(engine.waiters("r2").is_empty());

    engine.release_resource("r1", "x").unwrap();
    first.await.unwrap().unwrap();
    assert_eq!(engine.resource_holder("r1").as_deref(), Some("a"));

    engine.release_resource("r1", "a").unwrap();
    second.await.unwrap().unwrap();
    assert_eq!(engine.resource_holder("r1").as_deref(), Some("b"));
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_wait_leaves_no_trace() {
    let (engine, _events) = setup(&["a", "b"]);

    engine.acquire_resource("r1", "a").await.unwrap();
    engine.acquire_resource("r2", "b").await.unwrap();

    let abandoned =
        tokio::time::timeout(Duration::from_millis(10), engine.acquire_resource("r1", "b")).await;
    assert!(abandoned.is_err());
    assert!(engine.waiters("r1").is_empty());

    // b is no longer waiting on r1, so a may queue for r2.
    let waiter = spawn_acquire(&engine, "r2", "a");
    wait_until_queued(&engine, "r2", 1).await;
    assert_eq!(engine.waiters("r2"), vec!["a"]);

    engine.release_resource("r2", "b").unwrap();
    waiter.await.unwrap().unwrap();
    assert_eq!(engine.resource_holder("r2").as_deref(), Some("a"));
}

#[tokio::test(start_paused = true)]
async fn test_wait_times_out_and_leaves_queue() {
    let (engine, _events) = setup(&["agent-1", "agent-2"]);

    engine.acquire_resource("R", "agent-1").await.unwrap();
    let err = engine.acquire_resource("R", "agent-2").await.unwrap_err();

    assert!(err.is_timeout());
    assert!(engine.waiters("R").is_empty());
    assert_eq!(engine.resource_holder("R").as_deref(), Some("agent-1"));
}

#[tokio::test]
async fn test_release_by_non_holder_fails() {
    let (engine, _events) = setup(&["agent-1", "agent-2"]);
    engine.acquire_resource("R", "agent-1").await.unwrap();

    let err = engine.release_resource("R", "agent-2").unwrap_err();
    match err {
        CoordinationError::NotHolder { holder, .. } => {
            assert_eq!(holder.as_deref(), Some("agent-1"))
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(engine.resource_holder("R").as_deref(), Some("agent-1"));
}

#[tokio::test(start_paused = true)]
async fn test_waiters_are_served_in_arrival_order() {
    let (engine, _events) = setup(&["agent-1", "agent-2", "agent-3", "agent-4"]);
    engine.acquire_resource("R", "agent-1").await.unwrap();

    let mut handles = Vec::new();
    for (queued, agent) in ["agent-2", "agent-3", "agent-4"].into_iter().enumerate() {
        handles.push(spawn_acquire(&engine, "R", agent));
        wait_until_queued(&engine, "R", queued + 1).await;
    }
    assert_eq!(engine.waiters("R"), vec!["agent-2", "agent-3", "agent-4"]);

    let mut holders = Vec::new();
    for current in ["agent-1", "agent-2", "agent-3"] {
        engine.release_resource("R", current).unwrap();
        holders.push(engine.resource_holder("R").unwrap());
    }
    assert_eq!(holders, vec!["agent-2", "agent-3", "agent-4"]);

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_contention_is_recorded_as_conflict() {
    let (engine, _events) = setup(&["agent-1", "agent-2"]);
    engine.acquire_resource("R", "agent-1").await.unwrap();
    let waiter = spawn_acquire(&engine, "R", "agent-2");
    wait_until_queued(&engine, "R", 1).await;

    let conflicts = engine.conflicts();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].conflict_type, ConflictType::Resource);
    assert_eq!(conflicts[0].target_id, "R");

    engine.release_resource("R", "agent-1").unwrap();
    waiter.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_maintenance_cleans_up_after_departed_agent() {
    let (engine, _events) = setup(&["agent-1", "agent-2"]);

    engine.acquire_resource("R", "agent-1").await.unwrap();
    engine.assign_task(Task::new("t-1", "index"), "agent-1").unwrap();
    engine.unregister_agent("agent-1").unwrap();

    let report = engine.perform_maintenance();
    assert_eq!(
        report.released_resources,
        vec![("R".to_string(), "agent-1".to_string())]
    );
    assert_eq!(report.cancelled_tasks, vec!["t-1"]);
    assert!(engine.resource_holder("R").is_none());
    assert_eq!(engine.get_task("t-1").unwrap().status, TaskStatus::Cancelled);

    engine.acquire_resource("R", "agent-2").await.unwrap();
    assert!(engine.perform_maintenance().released_resources.is_empty());
}

#[tokio::test]
async fn test_messages_arrive_in_send_order() {
    let (engine, _events) = setup(&["agent-1", "agent-2", "agent-3"]);
    let mut inbox = engine.mailbox("agent-2").unwrap();

    for i in 0..3 {
        engine.send_message("agent-1", "agent-2", json!({ "seq": i })).unwrap();
    }
    engine.send_message("agent-1", "agent-3", json!({ "seq": 99 })).unwrap();

    for i in 0..3 {
        let envelope = inbox.recv().await.unwrap();
        assert_eq!(envelope.from, "agent-1");
        assert_eq!(envelope.payload["seq"], i);
    }
    assert!(inbox.try_recv().is_none());
}

#[tokio::test]
async fn test_send_to_unknown_agent_fails() {
    let (engine, _events) = setup(&["agent-1"]);
    let err = engine
        .send_message("agent-1", "ghost", json!("hello"))
        .unwrap_err();
    assert!(matches!(err, CoordinationError::UnknownAgent(agent) if agent == "ghost"));
}

#[tokio::test]
async fn test_scheduling_modes() {
    let (engine, _events) = setup(&["agent-1", "agent-2", "agent-3"]);

    let mut assigned = Vec::new();
    for i in 0..3 {
        let task = engine.schedule_task(Task::new(format!("rr-{i}"), "spread")).unwrap();
        assigned.push(task.agent_id.unwrap());
    }
    assigned.sort();
    assert_eq!(assigned, vec!["agent-1", "agent-2", "agent-3"]);

    engine.assign_task(Task::new("busy-1", "x"), "agent-1").unwrap();
    engine.assign_task(Task::new("busy-2", "x"), "agent-2").unwrap();

    engine.enable_advanced_scheduling();
    engine.set_scheduling_policy(Arc::new(LeastLoaded));
    let task = engine.schedule_task(Task::new("balanced", "x")).unwrap();
    assert_eq!(task.agent_id.as_deref(), Some("agent-3"));
    assert_eq!(task.status, TaskStatus::Assigned);

    engine.disable_advanced_scheduling();
    assert!(!engine.is_advanced_scheduling_enabled());
}

#[tokio::test]
async fn test_assigning_task_to_second_agent_conflicts() {
    let (engine, _events) = setup(&["agent-1", "agent-2"]);
    engine.assign_task(Task::new("t", "x"), "agent-1").unwrap();

    // Same agent again is a no-op.
    engine.assign_task(Task::new("t", "x"), "agent-1").unwrap();

    let err = engine.assign_task(Task::new("t", "x"), "agent-2").unwrap_err();
    assert!(matches!(err, CoordinationError::TaskConflict { .. }));
    assert_eq!(
        engine.conflicts().last().map(|c| c.conflict_type),
        Some(ConflictType::Task)
    );
}
