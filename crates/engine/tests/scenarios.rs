//! End-to-end scenarios driving full engine instances through poll
//! loops with fixed time deltas.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use volition_core::FinishState;
use volition_engine::{CoroutineBuilder, Engine, EventStatus};

/// Poll with a fixed virtual-time delta until `done` holds or the tick
/// limit runs out. Returns true when `done` held.
fn run_until(
    engine: &mut Engine,
    delta: Duration,
    max_ticks: usize,
    mut done: impl FnMut(&mut Engine) -> bool,
) -> bool {
    for _ in 0..max_ticks {
        engine.poll(Some(delta));
        if done(engine) {
            return true;
        }
    }
    false
}

/// Count-down soak: a single plan decrements a belief counter once per
/// intention until the achievement goal is satisfied.
#[test]
fn test_count_down_with_satisfied_condition() {
    let mut engine = Engine::new("soak-node");
    engine.exit_when_done();

    engine
        .message("ABC")
        .field_with_value("count", 1000i32)
        .commit();
    engine.message("CountRequest").field::<i32>("count").commit();
    engine.action("DoCount").request("CountRequest").commit();

    let soak_goal = engine
        .goal("SoakGoal")
        .satisfied(|ctx| ctx.get("count").and_then(|v| v.as_i32()).unwrap_or(0) <= 0)
        .commit();

    let body = CoroutineBuilder::new().action("DoCount").param_from("count");
    engine
        .plan("SomePlan")
        .handles(soak_goal.as_str())
        .body(body)
        .commit();

    let invocations = Arc::new(AtomicU32::new(0));
    let observed = invocations.clone();
    engine
        .agent("CountingAgent")
        .belief("ABC")
        .plans(["SomePlan"])
        .handle_action("DoCount", move |agent, request, _reply, _handle| {
            let count = request
                .get_field("count")
                .and_then(|v| v.as_i32())
                .unwrap_or(0);
            let beliefs = agent.message("ABC").expect("belief exists");
            beliefs
                .write()
                .set_field("count", count - 1)
                .expect("count is an i32 field");
            observed.fetch_add(1, Ordering::Relaxed);
            EventStatus::Success
        })
        .commit();

    let bob = engine.create_agent("CountingAgent", "bob").unwrap();
    engine.agent_mut(&bob).unwrap().start();
    let pursue = engine.agent_mut(&bob).unwrap().pursue("SoakGoal", false, None);

    engine.execute();

    let agent = engine.agent(&bob).unwrap();
    let count = agent
        .context()
        .get("count")
        .and_then(|v| v.as_i32())
        .unwrap();
    assert_eq!(count, 0);
    assert_eq!(invocations.load(Ordering::Relaxed), 1000);
    assert_eq!(pursue.promise.state(), FinishState::Success);
}

/// Mission retarget: re-pursuing with a changed id drops the stale
/// mission before its plan completes; later missions run to completion.
#[test]
fn test_mission_retarget_drops_and_repursues() {
    let mut engine = Engine::new("mission-node");

    engine
        .message("ABC")
        .field_with_value("current_id", -1i32)
        .commit();
    engine
        .message("AchieveMission")
        .field::<i32>("mission_id")
        .commit();

    engine
        .action("PerformMission")
        .request("AchieveMission")
        .commit();
    engine
        .action("SetCurrentMission")
        .request("AchieveMission")
        .commit();
    engine.action("Quit").commit();

    let achieve_mission = engine
        .goal("AchieveMission")
        .message("AchieveMission")
        .drop_when(|ctx| {
            let mission_id = ctx.get("mission_id").and_then(|v| v.as_i32()).unwrap_or(0);
            let current_id = ctx.get("current_id").and_then(|v| v.as_i32()).unwrap_or(0);
            mission_id != current_id
        })
        .commit();
    let perform_test = engine.goal("PerformTestGoal").commit();

    let mission_body = CoroutineBuilder::new().sleep(1000).action("PerformMission");
    engine
        .plan("DoMissionPlan")
        .handles(achieve_mission.as_str())
        .body(mission_body)
        .commit();

    let test_body = CoroutineBuilder::new()
        .action("SetCurrentMission")
        .param("mission_id", 10i32)
        .goal("AchieveMission")
        .param("mission_id", 10i32)
        .nowait()
        // Not enough time for the mission; it is dropped on retarget.
        .sleep(1)
        .action("SetCurrentMission")
        .param("mission_id", 20i32)
        .goal("AchieveMission")
        .param("mission_id", 20i32)
        .nowait()
        // Plenty of time to finish the mission.
        .sleep(1500)
        .action("SetCurrentMission")
        .param("mission_id", 30i32)
        .goal("AchieveMission")
        .param("mission_id", 30i32)
        .nowait()
        .sleep(1500)
        .action("SetCurrentMission")
        .param("mission_id", -1i32)
        .action("Quit");
    engine
        .plan("PerformTestPlan")
        .handles(perform_test.as_str())
        .body(test_body)
        .commit();

    let performed = Arc::new(Mutex::new(Vec::<i32>::new()));
    let performed_log = performed.clone();
    engine
        .agent("CountingAgent")
        .belief("ABC")
        .plans(["DoMissionPlan", "PerformTestPlan"])
        .handle_action("PerformMission", move |_agent, request, _reply, _handle| {
            let id = request
                .get_field("mission_id")
                .and_then(|v| v.as_i32())
                .unwrap_or(0);
            performed_log.lock().push(id);
            EventStatus::Success
        })
        .handle_action("SetCurrentMission", |agent, request, _reply, _handle| {
            let id = request
                .get_field("mission_id")
                .and_then(|v| v.as_i32())
                .unwrap_or(0);
            agent
                .message("ABC")
                .expect("belief exists")
                .write()
                .set_field("current_id", id)
                .expect("current_id is an i32 field");
            EventStatus::Success
        })
        .handle_action("Quit", |agent, _request, _reply, _handle| {
            agent.stop();
            EventStatus::Success
        })
        .commit();

    let bob = engine.create_agent("CountingAgent", "bob").unwrap();
    engine.agent_mut(&bob).unwrap().start();
    engine
        .agent_mut(&bob)
        .unwrap()
        .pursue("PerformTestGoal", false, None);

    let stopped = run_until(&mut engine, Duration::from_millis(5), 4000, |engine| {
        engine.agent(&bob).unwrap().stopped()
    });
    assert!(stopped, "agent should quit itself");

    // Mission 10 was dropped mid-sleep; 20 and 30 completed.
    assert_eq!(*performed.lock(), vec![20, 30]);
}

/// Ping-pong: two agents exchange messages, each receipt bumping a
/// shared counter, until a persistent quit goal's precondition stops
/// them both.
#[test]
fn test_ping_pong() {
    let mut engine = Engine::new("pingpong-node");

    engine.message("PingPong").field::<i32>("count").commit();
    engine.action("SendBall").commit();
    engine.action("Quit").commit();

    let counter = Arc::new(AtomicI32::new(0));

    let play_goal = engine.goal("PingPongGoal").commit();
    let quit_counter = counter.clone();
    let quit_goal = engine
        .goal("QuitGoal")
        .pre(move |_ctx| quit_counter.load(Ordering::Relaxed) > 5)
        .commit();

    engine
        .plan("SendBallPlan")
        .handles(play_goal.as_str())
        .body(CoroutineBuilder::new().action("SendBall"))
        .commit();
    engine
        .plan("QuitPlan")
        .handles(quit_goal.as_str())
        .body(CoroutineBuilder::new().action("Quit"))
        .commit();

    let peers = Arc::new(Mutex::new(Vec::<volition_core::AgentHandle>::new()));

    let send_peers = peers.clone();
    let handler_counter = counter.clone();
    engine
        .agent("Player")
        .belief("PingPong")
        .plans(["SendBallPlan", "QuitPlan"])
        .handle_action("SendBall", move |agent, _request, _reply, _handle| {
            let peer = send_peers
                .lock()
                .iter()
                .find(|p| p.id != agent.id())
                .cloned();
            if let Some(peer) = peer {
                let message = agent.message("PingPong").unwrap().read().clone();
                agent.send_message(message, Some(peer));
            }
            EventStatus::Success
        })
        .handle_action("Quit", |agent, _request, _reply, _handle| {
            agent.stop();
            EventStatus::Success
        })
        .handle_message("PingPong", move |agent, _message| {
            let count = handler_counter.fetch_add(1, Ordering::Relaxed) + 1;
            if count <= 5 {
                agent.pursue("PingPongGoal", false, None);
            }
        })
        .commit();

    let alice = engine.create_agent("Player", "alice").unwrap();
    let bob = engine.create_agent("Player", "bob").unwrap();
    peers.lock().extend([alice.clone(), bob.clone()]);

    engine.agent_mut(&alice).unwrap().start();
    engine.agent_mut(&bob).unwrap().start();
    // Both persistently want to quit once the rally is long enough.
    engine.agent_mut(&alice).unwrap().pursue("QuitGoal", true, None);
    engine.agent_mut(&bob).unwrap().pursue("QuitGoal", true, None);
    // Alice serves.
    engine
        .agent_mut(&alice)
        .unwrap()
        .pursue("PingPongGoal", false, None);

    let both_stopped = run_until(&mut engine, Duration::from_millis(1), 4000, |engine| {
        engine.agent(&alice).unwrap().stopped() && engine.agent(&bob).unwrap().stopped()
    });
    assert!(both_stopped, "both agents should stop");
    assert_eq!(counter.load(Ordering::Relaxed), 6);
}

/// Resource violation suspends task work until a recharge plan restores
/// the battery; an exclusive resource keeps the two from interleaving.
#[test]
fn test_resource_violation_suspends_then_resumes() {
    let mut engine = Engine::new("resource-node");

    engine.resource("Battery").min(0).max(100).commit();
    engine.resource("Exclusive").min(0).max(1).commit();
    engine
        .message("Vehicle")
        .field_with_value("tasksCompleted", 0i32)
        .commit();
    engine.action("StartTask").commit();
    engine.action("EndTask").commit();
    engine.action("Recharge").commit();

    let recharge_goal = engine
        .goal("RechargeBatteryGoal")
        .pre(|ctx| {
            ctx.resource("Battery")
                .map(|r| r.read().count() < 25)
                .unwrap_or(false)
        })
        .heuristic(|_ctx| 1.0)
        .commit();
    let work_goal = engine
        .goal("StartWorkGoal")
        .pre(|ctx| {
            ctx.get("tasksCompleted")
                .and_then(|v| v.as_i32())
                .unwrap_or(0)
                < 10
        })
        .satisfied(|ctx| {
            ctx.get("tasksCompleted")
                .and_then(|v| v.as_i32())
                .unwrap_or(0)
                >= 10
        })
        .heuristic(|ctx| {
            10.0 - ctx
                .get("tasksCompleted")
                .and_then(|v| v.as_i32())
                .unwrap_or(0) as f32
        })
        .commit();

    engine
        .plan("RechargeBatteryPlan")
        .handles(recharge_goal.as_str())
        .lock("Exclusive")
        .body(CoroutineBuilder::new().action("Recharge"))
        .effects(|ctx| {
            if let Some(battery) = ctx.resource("Battery") {
                battery.write().set(100);
            }
        })
        .commit();
    engine
        .plan("DoTaskPlan")
        .handles(work_goal.as_str())
        .lock("Exclusive")
        .pre(|ctx| {
            let battery_ok = ctx
                .resource("Battery")
                .map(|r| r.read().count() >= 10)
                .unwrap_or(false);
            let tasks = ctx
                .get("tasksCompleted")
                .and_then(|v| v.as_i32())
                .unwrap_or(0);
            battery_ok && tasks <= 9
        })
        .effects(|ctx| {
            if let Some(battery) = ctx.resource("Battery") {
                battery.write().consume(10);
            }
            if let Some(vehicle) = ctx.message("Vehicle") {
                let mut vehicle = vehicle.write();
                let tasks = vehicle
                    .get_field("tasksCompleted")
                    .and_then(|v| v.as_i32())
                    .unwrap_or(0);
                let _ = vehicle.set_field("tasksCompleted", tasks + 1);
            }
        })
        .body(CoroutineBuilder::new().action("StartTask").action("EndTask"))
        .commit();

    let task_in_progress = Arc::new(AtomicBool::new(false));
    let recharges = Arc::new(AtomicU32::new(0));
    let overlap_detected = Arc::new(AtomicBool::new(false));

    let start_flag = task_in_progress.clone();
    let end_flag = task_in_progress.clone();
    let recharge_flag = task_in_progress.clone();
    let recharge_count = recharges.clone();
    let overlap = overlap_detected.clone();

    engine
        .agent("WorkerAgent")
        .belief("Vehicle")
        .resources(["Battery", "Exclusive"])
        .plans(["DoTaskPlan", "RechargeBatteryPlan"])
        .handle_action("StartTask", move |agent, _request, _reply, _handle| {
            if start_flag.swap(true, Ordering::Relaxed) {
                panic!("task started while another task was in progress");
            }
            if let Some(battery) = agent.context().resource("Battery") {
                battery.write().consume(10);
            }
            EventStatus::Success
        })
        .handle_action("EndTask", move |agent, _request, _reply, _handle| {
            end_flag.store(false, Ordering::Relaxed);
            let vehicle = agent.message("Vehicle").unwrap();
            let tasks = {
                let mut vehicle = vehicle.write();
                let tasks = vehicle
                    .get_field("tasksCompleted")
                    .and_then(|v| v.as_i32())
                    .unwrap_or(0)
                    + 1;
                vehicle.set_field("tasksCompleted", tasks).unwrap();
                tasks
            };
            if tasks >= 10 {
                agent.stop();
            }
            EventStatus::Success
        })
        .handle_action("Recharge", move |agent, _request, _reply, _handle| {
            if recharge_flag.load(Ordering::Relaxed) {
                overlap.store(true, Ordering::Relaxed);
            }
            recharge_count.fetch_add(1, Ordering::Relaxed);
            if let Some(battery) = agent.context().resource("Battery") {
                battery.write().set(100);
            }
            EventStatus::Success
        })
        .commit();

    let worker = engine.create_agent("WorkerAgent", "worker").unwrap();
    engine
        .agent(&worker)
        .unwrap()
        .context()
        .resource("Battery")
        .unwrap()
        .write()
        .set(50);

    engine.agent_mut(&worker).unwrap().start();
    engine
        .agent_mut(&worker)
        .unwrap()
        .pursue("StartWorkGoal", true, None);
    engine
        .agent_mut(&worker)
        .unwrap()
        .pursue("RechargeBatteryGoal", true, None);

    let stopped = run_until(&mut engine, Duration::from_millis(1), 10_000, |engine| {
        engine.agent(&worker).unwrap().stopped()
    });
    assert!(stopped, "worker should finish all tasks");

    let tasks = engine
        .agent(&worker)
        .unwrap()
        .context()
        .get("tasksCompleted")
        .and_then(|v| v.as_i32())
        .unwrap();
    assert_eq!(tasks, 10);
    assert!(
        recharges.load(Ordering::Relaxed) >= 1,
        "battery must have been recharged at least once"
    );
    assert!(
        !overlap_detected.load(Ordering::Relaxed),
        "recharge interleaved with task execution"
    );
}

mod delegation {
    use super::*;
    use volition_core::AgentHandle;

    /// Engine with a team of three members: two can do `TeamGoal` at
    /// different costs, one has the role but no applicable plan.
    fn build_team(engine: &mut Engine, executions: Arc<Mutex<Vec<String>>>) -> (AgentHandle, Vec<AgentHandle>) {
        engine.message("CostBelief").field::<i64>("cost").commit();
        engine.action("DoTeamWork").commit();

        engine.role("Worker").goal("TeamGoal").commit();
        engine
            .goal("TeamGoal")
            .heuristic(|ctx| ctx.get("cost").and_then(|v| v.as_i64()).unwrap_or(0) as f32)
            .commit();
        engine
            .plan("TeamWorkPlan")
            .handles("TeamGoal")
            .body(CoroutineBuilder::new().action("DoTeamWork"))
            .commit();

        let log = executions;
        engine
            .agent("CapableMember")
            .belief("CostBelief")
            .roles(["Worker"])
            .plans(["TeamWorkPlan"])
            .handle_action("DoTeamWork", move |agent, _request, _reply, _handle| {
                log.lock().push(agent.name().to_string());
                EventStatus::Success
            })
            .commit();
        engine.agent("IdleMember").roles(["Worker"]).commit();
        engine.team("WorkTeam").commit();

        let cheap = engine.create_agent("CapableMember", "cheap").unwrap();
        let dear = engine.create_agent("CapableMember", "dear").unwrap();
        let idle = engine.create_agent("IdleMember", "idle").unwrap();
        let team = engine.create_team("WorkTeam", "coordinator").unwrap();

        // Per-member delegation costs surface through the goal heuristic.
        for (member, cost) in [(&cheap, 3i64), (&dear, 5i64)] {
            engine
                .agent(member)
                .unwrap()
                .context()
                .message("CostBelief")
                .unwrap()
                .write()
                .set_field("cost", cost)
                .unwrap();
        }

        for member in [&cheap, &dear, &idle] {
            engine.add_team_member(&team, member).unwrap();
            engine.agent_mut(member).unwrap().start();
        }
        engine.agent_mut(&team).unwrap().start();

        (team, vec![cheap, dear, idle])
    }

    /// Team delegation: the cheapest bidder wins the auction and
    /// executes; the dearer member only ever analyses.
    #[test]
    fn test_team_delegation_cheapest_wins() {
        let mut engine = Engine::new("team-node");
        let executions = Arc::new(Mutex::new(Vec::<String>::new()));
        let (team, _members) = build_team(&mut engine, executions.clone());

        let pursue = engine
            .agent_mut(&team)
            .unwrap()
            .pursue("TeamGoal", false, None);

        // One millisecond per poll: everything must conclude well before
        // the 2-second auction expiry.
        let done = run_until(&mut engine, Duration::from_millis(1), 1500, |_| {
            pursue.promise.finished()
        });
        assert!(done, "team goal should conclude before the auction expiry");
        assert_eq!(pursue.promise.state(), FinishState::Success);
        assert_eq!(*executions.lock(), vec!["cheap".to_string()]);
    }

    /// Removing the delegate mid-flight forces an immediate reschedule
    /// and re-delegation to the next best member.
    #[test]
    fn test_schedule_dirty_on_member_removed() {
        let mut engine = Engine::new("team-node");
        let executions = Arc::new(Mutex::new(Vec::<String>::new()));
        let (team, members) = build_team(&mut engine, executions.clone());
        let cheap = members[0].clone();

        let pursue = engine
            .agent_mut(&team)
            .unwrap()
            .pursue("TeamGoal", false, None);

        // Wait until the delegation reached the cheap member...
        let delegated = run_until(&mut engine, Duration::from_millis(1), 1000, |engine| {
            !engine.agent(&cheap).unwrap().desires().is_empty()
        });
        assert!(delegated, "cheap member should receive the delegation");

        // ...then yank it from the team before it can finish.
        engine.remove_team_member(&team, &cheap).unwrap();
        engine.agent_mut(&cheap).unwrap().stop();

        let done = run_until(&mut engine, Duration::from_millis(1), 4000, |_| {
            pursue.promise.finished()
        });
        assert!(done, "team goal should still conclude");
        assert_eq!(pursue.promise.state(), FinishState::Success);
        assert!(
            executions.lock().contains(&"dear".to_string()),
            "the next best member should have executed the goal"
        );
    }
}
