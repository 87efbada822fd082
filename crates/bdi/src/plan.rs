use std::sync::Arc;

use volition_core::FinishState;

use crate::beliefs::BeliefContext;
use crate::coroutine::Coroutine;
use crate::query::BeliefQuery;
use crate::task::{TaskEffect, TaskTick};
use volition_core::{GoalHandle, UniqueId};

type EffectsFn = Arc<dyn Fn(&mut BeliefContext) + Send + Sync>;

/// Whether the plan is currently unwinding through its drop sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DropState {
    #[default]
    None,
    Dropping,
    Finished,
}

/// Snapshot of a plan's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanStatus {
    /// A drop has been requested; until dropping completes the finish
    /// state stays `NotYet`, after which it reads `Dropped`.
    pub drop_requested: bool,
    pub finish_state: FinishState,
    /// All tasks of the body ran to completion (meaningful during drops:
    /// the body may have already finished when the drop arrived).
    pub body_finished: bool,
}

/// A plan template, and — once cloned into an intention executor — a live
/// intention: the body coroutine, an optional drop coroutine, the
/// feasibility conditions the scheduler tests, an effects simulator, and
/// the resources the plan locks while executing.
#[derive(Clone, Default)]
pub struct Plan {
    name: String,
    goal: String,
    body: Coroutine,
    drop_coroutine: Option<Coroutine>,
    precondition: BeliefQuery,
    drop_when: BeliefQuery,
    effects: Option<EffectsFn>,
    resource_locks: Vec<String>,
    drop_state: DropState,
}

impl Plan {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn set_goal(&mut self, goal: impl Into<String>) {
        self.goal = goal.into();
    }

    pub fn body(&self) -> &Coroutine {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Coroutine {
        &mut self.body
    }

    pub fn set_body(&mut self, body: Coroutine) {
        self.body = body;
    }

    pub fn drop_coroutine(&self) -> Option<&Coroutine> {
        self.drop_coroutine.as_ref()
    }

    pub fn set_drop_coroutine(&mut self, coroutine: Coroutine) {
        self.drop_coroutine = Some(coroutine);
    }

    pub fn set_precondition(&mut self, query: BeliefQuery) {
        self.precondition = query;
    }

    pub fn set_drop_when(&mut self, query: BeliefQuery) {
        self.drop_when = query;
    }

    pub fn set_effects(&mut self, effects: impl Fn(&mut BeliefContext) + Send + Sync + 'static) {
        self.effects = Some(Arc::new(effects));
    }

    pub fn resource_locks(&self) -> &[String] {
        &self.resource_locks
    }

    pub fn set_resource_locks(&mut self, locks: Vec<String>) {
        self.resource_locks = locks;
    }

    /// Fresh executable instance of this template.
    pub fn instantiate(&self) -> Plan {
        let mut plan = self.clone();
        plan.reset();
        plan
    }

    pub fn reset(&mut self) {
        self.body.reset();
        if let Some(drop_coroutine) = &mut self.drop_coroutine {
            drop_coroutine.reset();
        }
        self.drop_state = DropState::None;
    }

    /// True if the precondition passes; absent preconditions always do.
    pub fn valid(&self, context: &BeliefContext) -> bool {
        self.precondition.evaluate_or(context, true)
    }

    pub fn should_drop(&self, context: &BeliefContext) -> bool {
        self.drop_when.evaluate_or(context, false)
    }

    /// True if a user-supplied effects model is attached.
    pub fn can_model_effect(&self) -> bool {
        self.effects.is_some()
    }

    /// Simulate the outcome of this plan on the given context.
    pub fn apply_effects(&self, context: &mut BeliefContext) {
        if let Some(effects) = &self.effects {
            effects(context);
        }
    }

    pub fn status(&self) -> PlanStatus {
        let body_finished = self.body.finished();
        let finish_state = match self.drop_state {
            DropState::Finished => FinishState::Dropped,
            DropState::Dropping => FinishState::NotYet,
            DropState::None => match self.body.completion() {
                Some(true) => FinishState::Success,
                Some(false) => FinishState::Failed,
                None => FinishState::NotYet,
            },
        };
        PlanStatus {
            drop_requested: self.drop_state != DropState::None,
            finish_state,
            body_finished,
        }
    }

    pub fn finished(&self) -> bool {
        self.status().finish_state.is_terminal()
    }

    /// True if the active coroutine is suspended on an external
    /// completion.
    pub fn waiting(&self) -> bool {
        match self.drop_state {
            DropState::None => self.body.waiting(),
            _ => self
                .drop_coroutine
                .as_ref()
                .map(|c| c.waiting())
                .unwrap_or(false),
        }
    }

    /// Advance the plan body by one task.
    pub fn tick(
        &mut self,
        context: &BeliefContext,
        desire: &GoalHandle,
        intention_id: UniqueId,
    ) -> Vec<TaskEffect> {
        let tick = TaskTick {
            context,
            desire,
            intention_id,
            plan: &self.name,
        };
        self.body.tick(&tick)
    }

    /// Advance the drop sequence by one task. Without a drop coroutine
    /// the plan finishes dropping immediately.
    pub fn drop_tick(
        &mut self,
        context: &BeliefContext,
        desire: &GoalHandle,
        intention_id: UniqueId,
    ) -> Vec<TaskEffect> {
        if self.drop_state == DropState::Finished {
            return Vec::new();
        }
        if self.drop_state == DropState::None {
            self.drop_state = DropState::Dropping;
            if let Some(drop_coroutine) = &mut self.drop_coroutine {
                drop_coroutine.reset();
            }
        }

        let Some(drop_coroutine) = &mut self.drop_coroutine else {
            self.drop_state = DropState::Finished;
            return Vec::new();
        };

        let tick = TaskTick {
            context,
            desire,
            intention_id,
            plan: &self.name,
        };
        let effects = drop_coroutine.tick(&tick);
        if drop_coroutine.finished() {
            self.drop_state = DropState::Finished;
        }
        effects
    }

    /// Route a task completion to the active coroutine. A completion for
    /// a task that is neither current nor outstanding-async is a no-op.
    pub fn on_task_complete(&mut self, task_id: UniqueId, success: bool) -> bool {
        match self.drop_state {
            DropState::None => self.body.on_task_complete(task_id, success),
            _ => {
                if let Some(drop_coroutine) = &mut self.drop_coroutine {
                    if drop_coroutine.on_task_complete(task_id, success) {
                        return true;
                    }
                }
                // Async completions from the interrupted body may still
                // land while the drop sequence runs.
                self.body.on_task_complete(task_id, success)
            }
        }
    }

    /// True if the task belongs to this plan's body or drop coroutine.
    pub fn has_task(&self, task_id: UniqueId) -> bool {
        self.body.has_task(task_id)
            || self
                .drop_coroutine
                .as_ref()
                .map(|c| c.has_task(task_id))
                .unwrap_or(false)
    }
}

impl std::fmt::Debug for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plan")
            .field("name", &self.name)
            .field("goal", &self.goal)
            .field("tasks", &self.body.tasks().len())
            .field("locks", &self.resource_locks)
            .field("drop_state", &self.drop_state)
            .finish()
    }
}
