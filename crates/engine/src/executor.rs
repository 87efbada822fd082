use std::sync::atomic::{AtomicU64, Ordering};

use volition_bdi::{Goal, Plan, PlanOrder, Tactic, TaskEffect, LOOP_PLANS_INFINITE};
use volition_core::{DropMode, FinishState, GoalHandle, UniqueId};

pub type ExecutorId = u64;
pub const NULL_EXECUTOR_ID: ExecutorId = 0;

static EXECUTOR_IDS: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    /// Drop the current plan, then transition to a new plan if one is
    /// staged.
    Dropping,
    /// Drop the current plan by direct request; no plan transition
    /// follows.
    ForceDropping,
    /// Advance the plan (or drop coroutine) one step per tick.
    Running,
    /// Terminal.
    Concluded,
}

/// Side information produced by one executor tick, consumed by the owning
/// agent (logging, schedule dirtying, desire conclusion).
#[derive(Debug, Clone)]
pub enum ExecutorNote {
    IntentionStarted {
        plan: String,
    },
    IntentionFinished {
        plan: String,
        result: FinishState,
    },
    /// The executor may need a different plan; the agent's schedule must
    /// be regenerated.
    Reschedule,
    GoalConcluded {
        result: FinishState,
    },
}

/// Effects from the ticked plan, tagged with enough context for the agent
/// to turn them into events.
#[derive(Debug, Clone, Default)]
pub struct ExecutorStep {
    pub effects: Vec<TaskEffect>,
    pub notes: Vec<ExecutorNote>,
}

/// Inputs an executor tick needs from the owning agent.
pub struct ExecutorHost<'a> {
    /// The agent's live desires; plan-selection bookkeeping is applied to
    /// the desire the executor serves.
    pub desires: &'a mut Vec<Goal>,
    /// The tactic currently governing the desire's goal.
    pub tactic: &'a Tactic,
    /// Plans applicable to the goal under that tactic.
    pub tactic_plans: &'a [String],
}

/// Drives one desire: runs the chosen plan (or its drop sequence) one
/// task per tick, applies plan-selection bookkeeping when an intention
/// concludes, and re-evaluates the goal between intentions.
pub struct IntentionExecutor {
    id: ExecutorId,
    desire_handle: GoalHandle,
    /// Clone of the desire; carries the intention's context. Its id is
    /// the intention id.
    goal: Goal,
    current: Option<Plan>,
    target: Option<Plan>,
    state: ExecutorState,
    last_plan_finish_state: FinishState,
    total_intentions: u32,
    succeeded_intentions: u32,
    failed_intentions: u32,
    current_intention_started: bool,
    locks_held: bool,
    sub_goal_desire_ids: Vec<UniqueId>,
    delegated: bool,
    delegate: Option<volition_core::AgentHandle>,
    drop_request: Option<(DropMode, String)>,
}

impl IntentionExecutor {
    pub fn new(desire: &Goal, delegated: bool) -> Self {
        let mut goal = desire.instantiate();
        goal.set_delegated(delegated);
        Self {
            id: EXECUTOR_IDS.fetch_add(1, Ordering::Relaxed),
            desire_handle: desire.handle().clone(),
            goal,
            current: None,
            target: None,
            state: ExecutorState::Running,
            last_plan_finish_state: FinishState::NotYet,
            total_intentions: 0,
            succeeded_intentions: 0,
            failed_intentions: 0,
            current_intention_started: false,
            locks_held: false,
            sub_goal_desire_ids: Vec::new(),
            delegated,
            delegate: None,
            drop_request: None,
        }
    }

    pub fn id(&self) -> ExecutorId {
        self.id
    }

    pub fn desire_handle(&self) -> &GoalHandle {
        &self.desire_handle
    }

    pub fn goal(&self) -> &Goal {
        &self.goal
    }

    pub fn goal_mut(&mut self) -> &mut Goal {
        &mut self.goal
    }

    /// The intention id: each executor carries a unique instance of the
    /// goal, distinct from the desire.
    pub fn intention_id(&self) -> UniqueId {
        self.goal.id()
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ExecutorState::Running
    }

    pub fn is_concluded(&self) -> bool {
        self.state == ExecutorState::Concluded
    }

    pub fn is_dropping(&self) -> bool {
        matches!(
            self.state,
            ExecutorState::Dropping | ExecutorState::ForceDropping
        )
    }

    pub fn is_delegated(&self) -> bool {
        self.delegated
    }

    pub fn delegate(&self) -> Option<&volition_core::AgentHandle> {
        self.delegate.as_ref()
    }

    pub fn set_delegate(&mut self, delegate: volition_core::AgentHandle) {
        self.delegate = Some(delegate);
    }

    pub fn current_plan_name(&self) -> Option<&str> {
        self.current.as_ref().map(|p| p.name())
    }

    pub fn current_plan(&self) -> Option<&Plan> {
        self.current.as_ref()
    }

    pub fn current_plan_mut(&mut self) -> Option<&mut Plan> {
        self.current.as_mut()
    }

    pub fn target_plan_name(&self) -> Option<&str> {
        self.target.as_ref().map(|p| p.name())
    }

    pub fn last_plan_finish_state(&self) -> FinishState {
        self.last_plan_finish_state
    }

    pub fn total_intentions(&self) -> u32 {
        self.total_intentions
    }

    pub fn drop_request(&self) -> Option<&(DropMode, String)> {
        self.drop_request.as_ref()
    }

    pub fn add_sub_goal_desire_id(&mut self, id: UniqueId) {
        debug_assert_ne!(self.desire_handle.id, id);
        self.sub_goal_desire_ids.push(id);
    }

    pub fn sub_goal_desire_ids(&self) -> &[UniqueId] {
        &self.sub_goal_desire_ids
    }

    /// Stage a plan transition. The current plan cleanly unwinds through
    /// its drop sequence before the new one begins.
    pub fn set_plan(&mut self, plan: Plan) {
        self.target = Some(plan.instantiate());
        self.total_intentions += 1;
        self.set_state(ExecutorState::Dropping);
    }

    /// No plan to run and none staged; the executor idles until the
    /// scheduler assigns one.
    pub fn is_waiting_for_plan(&self) -> bool {
        self.current.is_none() && self.target.is_none() && !self.delegated
    }

    pub fn is_waiting(&self) -> bool {
        let waiting_on_task = self.is_running()
            && self
                .current
                .as_ref()
                .map(|p| p.waiting())
                .unwrap_or(false);
        let waiting_on_delegate =
            self.delegated && self.last_plan_finish_state == FinishState::NotYet;
        self.is_waiting_for_plan() || waiting_on_task || waiting_on_delegate
    }

    /// Request a drop by direct request. Force-dropping takes priority
    /// over a plan-transition drop and cannot be downgraded.
    pub fn drop_intention(&mut self, mode: DropMode, reason: &str) {
        if self.set_state(ExecutorState::ForceDropping) {
            tracing::debug!(
                desire = %self.desire_handle,
                plan = self.current_plan_name().unwrap_or("(none)"),
                next_plan = self.target_plan_name().unwrap_or("(none)"),
                reason,
                "Drop intention (direct request)"
            );
        }
        self.drop_request = Some((mode, reason.to_string()));
    }

    /// A delegated intention concluded on the remote member.
    pub fn on_delegation_done(&mut self, result: FinishState) {
        self.last_plan_finish_state = result;
    }

    fn set_state(&mut self, new_state: ExecutorState) -> bool {
        if self.state == ExecutorState::Concluded {
            return false;
        }
        if self.state == ExecutorState::ForceDropping && new_state == ExecutorState::Dropping {
            return false;
        }
        self.state = new_state;
        true
    }

    fn on_intention_done(&mut self, result: FinishState, step: &mut ExecutorStep) {
        debug_assert!(result.is_terminal());
        self.last_plan_finish_state = result;
        match result {
            FinishState::Success => self.succeeded_intentions += 1,
            _ => self.failed_intentions += 1,
        }
        step.notes.push(ExecutorNote::IntentionFinished {
            plan: self.current_plan_name().unwrap_or("(none)").to_string(),
            result,
        });
        self.current_intention_started = false;
        // A new plan may be needed for this desire.
        step.notes.push(ExecutorNote::Reschedule);
    }

    fn on_goal_done(&mut self, result: FinishState, step: &mut ExecutorStep) {
        if !self.set_state(ExecutorState::Concluded) {
            return;
        }
        self.goal.finish(result);
        step.notes.push(ExecutorNote::GoalConcluded { result });
        tracing::debug!(desire = %self.desire_handle, ?result, "Goal is done");
    }

    /// Re-evaluate the goal between intentions (§ precondition check).
    fn check_precondition(&mut self, step: &mut ExecutorStep) {
        if !self.goal.delegated() {
            // A satisfied goal is never failed for a broken precondition;
            // plan for success in the general case.
            if !self.goal.is_satisfied() && !self.goal.is_valid() {
                tracing::debug!(
                    desire = %self.desire_handle,
                    "Goal precondition failed, concluding"
                );
                self.on_goal_done(FinishState::Failed, step);
                return;
            }
        }

        let finished = if self.goal.is_achievement() {
            self.goal.is_satisfied()
        } else {
            self.last_plan_finish_state == FinishState::Success
        };
        if finished {
            self.on_goal_done(FinishState::Success, step);
            return;
        }
        self.set_state(ExecutorState::Running);
    }

    /// One tick: run the current plan or its drop sequence, account for
    /// the outcome, and advance the executor state machine.
    pub fn execute(&mut self, host: &mut ExecutorHost) -> ExecutorStep {
        let mut step = ExecutorStep::default();
        if !self.is_running() && !self.is_dropping() {
            return step;
        }

        // The DAG sequences resource conflicts, but sibling executors can
        // still collide at runtime; re-check availability at the point of
        // execution and hold off for a tick when locks are contested or
        // violated.
        let mut plan_can_execute = false;
        if let Some(plan) = &self.current {
            debug_assert!(!self.delegated, "delegated intentions cannot hold a plan");
            let locks = plan.resource_locks().to_vec();
            let context = self.goal.context();
            let contested = !self.locks_held && context.any_resource_locked(&locks);
            let violated = context.has_resource_violation_in(&locks);
            plan_can_execute = !contested && !violated;
            if plan_can_execute && !self.locks_held && !locks.is_empty() {
                context.lock_resources(&locks);
                self.locks_held = true;
            }
            if !plan_can_execute {
                tracing::debug!(
                    executor = self.id,
                    desire = %self.desire_handle,
                    plan = plan.name(),
                    "Resource unavailable, skipping task execution for one tick"
                );
            }
        }

        if (plan_can_execute || self.delegated) && !self.current_intention_started {
            self.current_intention_started = true;
            step.notes.push(ExecutorNote::IntentionStarted {
                plan: self
                    .current_plan_name()
                    .unwrap_or(if self.delegated {
                        "<delegated to team member>"
                    } else {
                        "<no suitable plans>"
                    })
                    .to_string(),
            });
        }

        // Tracks exhaustion of the tactic: all plans tried and no loops
        // left.
        let mut goal_policy_failure = false;
        if plan_can_execute {
            let desire_handle = self.desire_handle.clone();
            let intention_id = self.goal.id();
            let should_drop = self
                .current
                .as_ref()
                .map(|p| p.should_drop(self.goal.context()))
                .unwrap_or(false);

            if self.is_dropping() || should_drop {
                if self.is_running() {
                    self.set_state(ExecutorState::Dropping);
                }

                // Sub-goal desires spawned from this intention must be
                // gone before the drop can complete, preserving
                // parent/child deletion order.
                let children_exist = self
                    .sub_goal_desire_ids
                    .iter()
                    .any(|id| host.desires.iter().any(|d| d.id() == *id));
                if !children_exist {
                    let context = self.goal.context().clone();
                    let plan = self.current.as_mut().expect("plan checked above");
                    step.effects
                        .extend(plan.drop_tick(&context, &desire_handle, intention_id));
                }
            } else {
                let context = self.goal.context().clone();
                let plan = self.current.as_mut().expect("plan checked above");
                step.effects
                    .extend(plan.tick(&context, &desire_handle, intention_id));
            }

            let status = self.current.as_ref().expect("plan checked above").status();
            if status.finish_state.is_terminal() {
                // A drop that lands after the body already finished is a
                // completed intention, not a dropped one.
                let mut finish = status.finish_state;
                if finish == FinishState::Dropped && status.body_finished {
                    finish = FinishState::Success;
                }
                self.on_intention_done(finish, &mut step);

                if self.locks_held {
                    let locks = self
                        .current
                        .as_ref()
                        .map(|p| p.resource_locks().to_vec())
                        .unwrap_or_default();
                    self.goal.context().unlock_resources(&locks);
                    self.locks_held = false;
                }

                let plan_name = self
                    .current
                    .as_ref()
                    .map(|p| p.name().to_string())
                    .unwrap_or_default();
                let succeeded = status.finish_state == FinishState::Success;
                if let Some(desire) = host
                    .desires
                    .iter_mut()
                    .find(|d| d.id() == self.desire_handle.id)
                {
                    let all_tried = evaluate_plan_result_for_goal_policy(
                        desire,
                        &plan_name,
                        host.tactic,
                        host.tactic_plans,
                        succeeded,
                    );
                    if all_tried {
                        let selection = &mut desire.plan_selection;
                        let loop_max = host.tactic.loop_plans_count;
                        if loop_max == LOOP_PLANS_INFINITE
                            || selection.plan_loop_iteration + 1 < loop_max
                        {
                            selection.plan_loop_iteration += 1;
                        } else {
                            goal_policy_failure = true;
                        }
                    }
                } else {
                    tracing::warn!(
                        desire = %self.desire_handle,
                        plan = %plan_name,
                        "Executor finished but desire no longer exists"
                    );
                }
            }
        }

        // Handle intention completion: body finished, or the drop
        // sequence ran dry.
        let finished = self
            .current
            .as_ref()
            .map(|p| p.finished())
            .unwrap_or(true);
        if finished {
            if self.delegated {
                debug_assert!(self.current.is_none() && self.target.is_none());
            } else {
                self.current = self.target.take();
            }

            if self.state == ExecutorState::ForceDropping || goal_policy_failure {
                let result = if self.last_plan_finish_state == FinishState::NotYet {
                    FinishState::Dropped
                } else {
                    self.last_plan_finish_state
                };
                self.on_goal_done(result, &mut step);
            } else {
                // Dropping or running: the previous intention is gone;
                // re-evaluate whether the desire is achieved and prepare
                // for the staged plan if any.
                self.check_precondition(&mut step);
            }
        }
        step
    }
}

/// Apply a completed plan's result to the desire's plan-selection state.
/// Returns true when every plan the tactic permits has been attempted in
/// the current loop iteration.
fn evaluate_plan_result_for_goal_policy(
    desire: &mut Goal,
    plan: &str,
    tactic: &Tactic,
    tactic_plans: &[String],
    succeeded: bool,
) -> bool {
    let loop_iteration = desire.plan_selection.plan_loop_iteration;
    {
        let entry = desire.plan_selection.find_or_make_history(plan);
        entry.last_loop_iteration = loop_iteration;
        entry.success_count += u32::from(succeeded);
        entry.fail_count += u32::from(!succeeded);
    }

    if tactic.is_using_plan_list() && tactic.plan_order == PlanOrder::Strict {
        let plans = &tactic.plans;
        if plans.is_empty() {
            return true;
        }
        let desire_handle = desire.handle().clone();
        let selection = &mut desire.plan_selection;
        let expected = &plans[selection.plan_list_index as usize % plans.len()];
        if expected != plan {
            tracing::error!(
                desire = %desire_handle,
                plan,
                expected = %expected,
                "Strict plan policy executed an out-of-order plan"
            );
        }
        selection.plan_list_index = (selection.plan_list_index + 1) % plans.len() as u32;
        // All plans are tried once the fixed list wraps around.
        selection.plan_list_index == 0
    } else {
        for candidate in tactic_plans {
            match desire.plan_selection.find_history(candidate) {
                // An applicable plan that has never run: keep going.
                None => return false,
                Some(history) if history.last_loop_iteration != loop_iteration => return false,
                Some(_) => {}
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volition_bdi::{BeliefQuery, Coroutine, TaskKind};
    use volition_core::TacticHandle;

    fn print_plan(name: &str) -> Plan {
        let mut plan = Plan::new(name);
        plan.set_goal("G");
        let mut body = Coroutine::new();
        body.add_task(
            TaskKind::Print {
                message: "step".into(),
            },
            UniqueId::random(),
        );
        plan.set_body(body);
        plan
    }

    fn choose_best_tactic(plans: &[&str]) -> Tactic {
        Tactic {
            handle: TacticHandle::new("T", UniqueId::random()),
            goal: "G".into(),
            plans: plans.iter().map(|p| p.to_string()).collect(),
            use_plan_list: false,
            plan_order: PlanOrder::ChooseBestPlan,
            loop_plans_count: LOOP_PLANS_INFINITE,
        }
    }

    fn run_executor(
        executor: &mut IntentionExecutor,
        desires: &mut Vec<Goal>,
        tactic: &Tactic,
        ticks: usize,
    ) -> Vec<ExecutorNote> {
        let plans = tactic.plans.clone();
        let mut notes = Vec::new();
        for _ in 0..ticks {
            let mut host = ExecutorHost {
                desires: &mut *desires,
                tactic,
                tactic_plans: &plans,
            };
            let step = executor.execute(&mut host);
            notes.extend(step.notes);
            if executor.is_concluded() {
                break;
            }
        }
        notes
    }

    #[test]
    fn test_perform_goal_concludes_after_plan_success() {
        let desire = Goal::new("G");
        let mut desires = vec![desire.clone()];
        let mut executor = IntentionExecutor::new(&desire, false);
        executor.set_plan(print_plan("P"));

        let tactic = choose_best_tactic(&["P"]);
        let notes = run_executor(&mut executor, &mut desires, &tactic, 8);

        assert!(executor.is_concluded());
        assert!(notes.iter().any(|n| matches!(
            n,
            ExecutorNote::GoalConcluded {
                result: FinishState::Success
            }
        )));
        assert_eq!(executor.goal().finish_state(), FinishState::Success);
    }

    #[test]
    fn test_unsatisfied_achievement_goal_waits_for_new_plan() {
        let mut desire = Goal::new("G");
        desire.set_satisfied(BeliefQuery::new(|_| false));
        let mut desires = vec![desire.clone()];
        let mut executor = IntentionExecutor::new(&desire, false);
        executor.set_plan(print_plan("P"));

        let tactic = choose_best_tactic(&["P"]);
        run_executor(&mut executor, &mut desires, &tactic, 8);

        // Plan finished, goal not satisfied: the executor stays running,
        // waiting for the scheduler to stage the next plan.
        assert!(!executor.is_concluded());
        assert!(executor.is_waiting_for_plan());
        // The loop iteration advanced so the plan can be retried.
        assert_eq!(desires[0].plan_selection.plan_loop_iteration, 1);
    }

    #[test]
    fn test_force_drop_concludes_dropped() {
        let desire = Goal::new("G");
        let mut desires = vec![desire.clone()];
        let mut executor = IntentionExecutor::new(&desire, false);
        // No plan has run; the drop concludes with DROPPED.
        executor.drop_intention(DropMode::Force, "test");

        let tactic = choose_best_tactic(&[]);
        run_executor(&mut executor, &mut desires, &tactic, 4);

        assert!(executor.is_concluded());
        assert_eq!(executor.goal().finish_state(), FinishState::Dropped);
    }

    #[test]
    fn test_force_dropping_blocks_downgrade() {
        let desire = Goal::new("G");
        let mut executor = IntentionExecutor::new(&desire, false);
        executor.drop_intention(DropMode::Force, "test");
        assert_eq!(executor.state(), ExecutorState::ForceDropping);
        executor.set_plan(print_plan("P"));
        // setPlan requests DROPPING but cannot override a force drop.
        assert_eq!(executor.state(), ExecutorState::ForceDropping);
    }

    #[test]
    fn test_strict_policy_wraps_and_fails_goal() {
        let mut desire = Goal::new("G");
        desire.set_satisfied(BeliefQuery::new(|_| false));
        let tactic = Tactic {
            handle: TacticHandle::new("T", UniqueId::random()),
            goal: "G".into(),
            plans: vec!["P".into()],
            use_plan_list: true,
            plan_order: PlanOrder::Strict,
            loop_plans_count: 1,
        };
        let mut desires = vec![desire.clone()];
        let mut executor = IntentionExecutor::new(&desire, false);
        executor.set_plan(print_plan("P"));

        run_executor(&mut executor, &mut desires, &tactic, 8);

        // One loop allowed, list wrapped: goal policy failure drops the
        // goal.
        assert!(executor.is_concluded());
    }
}
