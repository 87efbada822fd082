//! Cross-cutting properties of the engine surface.

use std::time::Duration;

use volition_engine::{CoroutineBuilder, Engine};

/// Every committed goal gets a builtin tactic that admits exactly the
/// plans handling it.
#[test]
fn test_builtin_tactic_admits_handling_plans() {
    let mut engine = Engine::new("node");
    let goal = engine.goal("G").commit();
    engine
        .plan("A")
        .handles(goal.as_str())
        .body(CoroutineBuilder::new().print("a"))
        .commit();
    engine
        .plan("B")
        .handles(goal.as_str())
        .body(CoroutineBuilder::new().print("b"))
        .commit();
    engine.goal("Other").commit();
    engine
        .plan("C")
        .handles("Other")
        .body(CoroutineBuilder::new().print("c"))
        .commit();

    let tactic = engine.get_builtin_tactic(&goal).expect("builtin tactic");
    assert!(tactic.handle.valid());
    assert_eq!(tactic.goal, goal);
    assert!(tactic.plan_allowed("A"));
    assert!(tactic.plan_allowed("B"));

    let handling: Vec<String> = engine
        .registry()
        .goal_plans
        .get(&goal)
        .cloned()
        .unwrap_or_default();
    assert_eq!(handling, vec!["A".to_string(), "B".to_string()]);
}

/// A plan without a body violates a commit-time invariant and must not
/// land in the registry.
#[test]
fn test_bodyless_plan_is_not_committed() {
    let mut engine = Engine::new("node");
    engine.goal("G").commit();
    let result = engine.commit_plan({
        let mut plan = volition_bdi::Plan::new("Empty");
        plan.set_goal("G");
        plan
    });
    assert!(result.is_err());
    assert!(engine.get_plan("Empty").is_none());
}

/// Applying the same percept twice leaves the context unchanged after
/// the first application.
#[test]
fn test_percept_idempotence() {
    let mut engine = Engine::new("node");
    engine
        .message("Position")
        .field_with_value("x", 0i32)
        .commit();
    engine.agent("Observer").belief("Position").commit();
    let agent = engine.create_agent("Observer", "watcher").unwrap();
    engine.agent_mut(&agent).unwrap().start();
    engine.poll(Some(Duration::from_millis(1)));

    engine.percept(Some(&agent), "Position", "x", 42i32);
    engine.poll(Some(Duration::from_millis(1)));
    let first = engine
        .agent(&agent)
        .unwrap()
        .context()
        .get("x")
        .and_then(|v| v.as_i32());

    engine.percept(Some(&agent), "Position", "x", 42i32);
    engine.poll(Some(Duration::from_millis(1)));
    let second = engine
        .agent(&agent)
        .unwrap()
        .context()
        .get("x")
        .and_then(|v| v.as_i32());

    assert_eq!(first, Some(42));
    assert_eq!(first, second);
}

/// A percept with no named recipient fans out to every agent holding
/// the belief, and only to them.
#[test]
fn test_percept_broadcast_routing() {
    let mut engine = Engine::new("node");
    engine
        .message("Weather")
        .field_with_value("temperature", 0i32)
        .commit();
    engine
        .message("Unrelated")
        .field_with_value("y", 0i32)
        .commit();
    engine.agent("Watcher").belief("Weather").commit();
    engine.agent("Deaf").belief("Unrelated").commit();

    let watcher = engine.create_agent("Watcher", "w").unwrap();
    let deaf = engine.create_agent("Deaf", "d").unwrap();
    engine.agent_mut(&watcher).unwrap().start();
    engine.agent_mut(&deaf).unwrap().start();
    engine.poll(Some(Duration::from_millis(1)));

    engine.percept(None, "Weather", "temperature", 30i32);
    // One poll routes through the engine queue, the next lets agents
    // drain their own queues.
    engine.poll(Some(Duration::from_millis(1)));
    engine.poll(Some(Duration::from_millis(1)));

    let temperature = engine
        .agent(&watcher)
        .unwrap()
        .context()
        .get("temperature")
        .and_then(|v| v.as_i32());
    assert_eq!(temperature, Some(30));
    assert!(engine.agent(&deaf).unwrap().context().get("temperature").is_none());
}

/// Dropping a desire that does not exist is idempotent and harmless.
#[test]
fn test_drop_of_non_existent_desire_is_ignored() {
    let mut engine = Engine::new("node");
    engine.goal("G").commit();
    engine.agent("A").commit();
    let agent = engine.create_agent("A", "a").unwrap();
    engine.agent_mut(&agent).unwrap().start();
    engine.poll(Some(Duration::from_millis(1)));

    let ghost = volition_core::GoalHandle::new("G", volition_core::UniqueId::random());
    engine.agent_mut(&agent).unwrap().drop_with_mode(
        ghost,
        volition_core::DropMode::Force,
        "never pursued",
    );
    engine.poll(Some(Duration::from_millis(1)));
    assert!(engine.agent(&agent).unwrap().desires().is_empty());
}

/// A pending action suspends its plan until the handler's completer
/// finishes it, potentially from another thread.
#[test]
fn test_pending_action_completes_later() {
    use std::sync::Arc;

    let mut engine = Engine::new("node");
    engine.action("SlowWork").commit();
    let goal = engine.goal("WorkGoal").commit();
    engine
        .plan("SlowPlan")
        .handles(goal.as_str())
        .body(CoroutineBuilder::new().action("SlowWork"))
        .commit();

    let completer_slot: Arc<parking_lot::Mutex<Option<volition_engine::ActionCompleter>>> =
        Arc::new(parking_lot::Mutex::new(None));
    let slot = completer_slot.clone();
    engine
        .agent("Slow")
        .plans(["SlowPlan"])
        .handle_action("SlowWork", move |agent, _request, _reply, handle| {
            *slot.lock() = agent.action_completer(handle);
            volition_engine::EventStatus::Pending
        })
        .commit();

    let agent = engine.create_agent("Slow", "slow").unwrap();
    engine.agent_mut(&agent).unwrap().start();
    let pursue = engine.agent_mut(&agent).unwrap().pursue("WorkGoal", false, None);

    // The plan reaches the action and suspends on it.
    for _ in 0..32 {
        engine.poll(Some(Duration::from_millis(1)));
    }
    assert!(!pursue.promise.finished());
    let completer = completer_slot.lock().take().expect("handler ran");

    // Completing from outside the engine resumes the plan.
    completer.finish(true, None);
    for _ in 0..8 {
        engine.poll(Some(Duration::from_millis(1)));
    }
    assert_eq!(pursue.promise.state(), volition_core::FinishState::Success);
}

/// A normal drop leaves persistent desires in place; a forced drop
/// removes them.
#[test]
fn test_persistent_desire_ignores_normal_drop() {
    let mut engine = Engine::new("node");
    engine.goal("KeepAlive").commit();
    engine.agent("A").commit();
    let agent = engine.create_agent("A", "a").unwrap();
    engine.agent_mut(&agent).unwrap().start();
    let pursue = engine
        .agent_mut(&agent)
        .unwrap()
        .pursue("KeepAlive", true, None);
    engine.poll(Some(Duration::from_millis(1)));
    assert_eq!(engine.agent(&agent).unwrap().desires().len(), 1);

    engine.agent_mut(&agent).unwrap().drop_with_mode(
        pursue.handle.clone(),
        volition_core::DropMode::Normal,
        "polite request",
    );
    engine.poll(Some(Duration::from_millis(1)));
    assert_eq!(engine.agent(&agent).unwrap().desires().len(), 1);

    engine.agent_mut(&agent).unwrap().drop_with_mode(
        pursue.handle.clone(),
        volition_core::DropMode::Force,
        "final",
    );
    for _ in 0..8 {
        engine.poll(Some(Duration::from_millis(1)));
    }
    assert!(engine.agent(&agent).unwrap().desires().is_empty());
    assert_eq!(
        pursue.promise.state(),
        volition_core::FinishState::Dropped
    );
}
