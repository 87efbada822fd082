use volition_core::{FinishState, GoalHandle, UniqueId};

use crate::beliefs::BeliefContext;
use crate::query::{BeliefQuery, Heuristic};

/// Link from a sub-goal back to the intention that pursued it.
#[derive(Debug, Clone, Default)]
pub struct GoalParent {
    pub handle: GoalHandle,
    /// The task in the parent plan that initiated this sub-goal.
    pub plan_task_id: UniqueId,
}

/// Execution history of one plan for one desire.
#[derive(Debug, Clone, Default)]
pub struct PlanHistory {
    pub plan: String,
    pub success_count: u32,
    pub fail_count: u32,
    /// The plan-selection loop iteration this plan last executed in.
    pub last_loop_iteration: u32,
}

/// Per-desire record of which plans have been tried, how often, and in
/// which loop iteration. The tactic consults this to decide the next
/// candidate.
#[derive(Debug, Clone, Default)]
pub struct PlanSelection {
    /// The tactic the goal was pursued with.
    pub tactic: String,
    /// Current iteration of attempting to solve the goal. Stays zero when
    /// looping is not permitted.
    pub plan_loop_iteration: u32,
    /// Index into a fixed plan list; always modulo the list size, zero
    /// when no plan list is in use.
    pub plan_list_index: u32,
    pub history: Vec<PlanHistory>,
}

impl PlanSelection {
    pub fn find_history(&self, plan: &str) -> Option<&PlanHistory> {
        self.history.iter().find(|h| h.plan == plan)
    }

    pub fn find_or_make_history(&mut self, plan: &str) -> &mut PlanHistory {
        if let Some(index) = self.history.iter().position(|h| h.plan == plan) {
            return &mut self.history[index];
        }
        self.history.push(PlanHistory {
            plan: plan.to_string(),
            ..Default::default()
        });
        self.history.last_mut().expect("just pushed")
    }
}

/// A goal: a template when committed to the engine, an instance once
/// pursued by an agent (a desire) or cloned into an intention executor.
///
/// An achievement goal carries a satisfied condition; a perform goal does
/// not and succeeds when a plan for it completes.
#[derive(Debug, Clone, Default)]
pub struct Goal {
    handle: GoalHandle,
    /// Schema of the parameter message required to pursue this goal, if
    /// any.
    message_schema: Option<String>,
    precondition: BeliefQuery,
    satisfied: BeliefQuery,
    drop_when: BeliefQuery,
    heuristic: Heuristic,
    /// Persistent goals are re-attempted forever, through success and
    /// failure, until force-dropped.
    persistent: bool,
    context: BeliefContext,
    parent: Option<GoalParent>,
    finish_state: FinishState,
    /// Set when the owning agent has no plan for the goal and must hand
    /// it to a team member.
    delegated: bool,
    pub plan_selection: PlanSelection,
}

impl Goal {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            handle: GoalHandle::new(name, UniqueId::random()),
            ..Default::default()
        }
    }

    /// Create a new instance from this goal as a template: fresh id,
    /// reset finish state and context, conditions and selection state
    /// carried over.
    pub fn instantiate(&self) -> Goal {
        Goal {
            handle: GoalHandle::new(self.handle.name.clone(), UniqueId::random()),
            message_schema: self.message_schema.clone(),
            precondition: self.precondition.clone(),
            satisfied: self.satisfied.clone(),
            drop_when: self.drop_when.clone(),
            heuristic: self.heuristic.clone(),
            persistent: self.persistent,
            context: BeliefContext::new(),
            parent: self.parent.clone(),
            finish_state: FinishState::NotYet,
            delegated: self.delegated,
            plan_selection: self.plan_selection.clone(),
        }
    }

    pub fn handle(&self) -> &GoalHandle {
        &self.handle
    }

    pub fn id(&self) -> UniqueId {
        self.handle.id
    }

    pub fn set_id(&mut self, id: UniqueId) {
        self.handle.id = id;
    }

    pub fn name(&self) -> &str {
        &self.handle.name
    }

    pub fn context(&self) -> &BeliefContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut BeliefContext {
        &mut self.context
    }

    /// Evaluate the precondition; absent preconditions always pass.
    pub fn is_valid_in(&self, context: &BeliefContext) -> bool {
        self.precondition.evaluate_or(context, true)
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_in(&self.context)
    }

    /// Evaluate the satisfied condition; absent conditions never hold.
    pub fn is_satisfied_in(&self, context: &BeliefContext) -> bool {
        self.satisfied.evaluate_or(context, false)
    }

    pub fn is_satisfied(&self) -> bool {
        self.is_satisfied_in(&self.context)
    }

    /// An achievement goal has a satisfied condition.
    pub fn is_achievement(&self) -> bool {
        self.satisfied.is_set()
    }

    pub fn should_drop(&self) -> bool {
        self.drop_when.evaluate_or(&self.context, false)
    }

    pub fn heuristic_in(&self, context: &BeliefContext) -> Option<f32> {
        self.heuristic.evaluate(context)
    }

    pub fn has_heuristic(&self) -> bool {
        self.heuristic.is_set()
    }

    pub fn set_precondition(&mut self, query: BeliefQuery) {
        self.precondition = query;
    }

    pub fn set_satisfied(&mut self, query: BeliefQuery) {
        self.satisfied = query;
    }

    pub fn set_drop_when(&mut self, query: BeliefQuery) {
        self.drop_when = query;
    }

    pub fn set_heuristic(&mut self, heuristic: Heuristic) {
        self.heuristic = heuristic;
    }

    pub fn message_schema(&self) -> Option<&str> {
        self.message_schema.as_deref()
    }

    pub fn set_message_schema(&mut self, schema: Option<String>) {
        self.message_schema = schema;
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn set_persistent(&mut self, persistent: bool) {
        self.persistent = persistent;
    }

    pub fn parent(&self) -> Option<&GoalParent> {
        self.parent.as_ref()
    }

    pub fn set_parent(&mut self, parent: Option<GoalParent>) {
        self.parent = parent;
    }

    pub fn delegated(&self) -> bool {
        self.delegated
    }

    pub fn set_delegated(&mut self, delegated: bool) {
        self.delegated = delegated;
    }

    pub fn finish_state(&self) -> FinishState {
        self.finish_state
    }

    /// Mark the goal finished. The first terminal state wins; later calls
    /// are ignored to prevent double-firing completion handlers.
    pub fn finish(&mut self, state: FinishState) {
        if self.finish_state.is_terminal() {
            return;
        }
        self.finish_state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instantiate_assigns_fresh_id() {
        let template = Goal::new("G");
        let a = template.instantiate();
        let b = template.instantiate();
        assert_eq!(a.name(), "G");
        assert_ne!(a.id(), b.id());
        assert_ne!(a.id(), template.id());
    }

    #[test]
    fn test_condition_defaults() {
        let goal = Goal::new("G");
        assert!(goal.is_valid());
        assert!(!goal.is_satisfied());
        assert!(!goal.should_drop());
        assert!(!goal.is_achievement());
    }

    #[test]
    fn test_achievement_goal() {
        let mut goal = Goal::new("G");
        goal.set_satisfied(BeliefQuery::new(|_| true));
        assert!(goal.is_achievement());
        assert!(goal.is_satisfied());
    }

    #[test]
    fn test_finish_is_latched() {
        let mut goal = Goal::new("G");
        goal.finish(FinishState::Success);
        goal.finish(FinishState::Failed);
        assert_eq!(goal.finish_state(), FinishState::Success);
    }

    #[test]
    fn test_plan_selection_history() {
        let mut selection = PlanSelection::default();
        assert!(selection.find_history("P").is_none());
        {
            let entry = selection.find_or_make_history("P");
            entry.success_count += 1;
            entry.last_loop_iteration = 3;
        }
        let entry = selection.find_history("P").unwrap();
        assert_eq!(entry.success_count, 1);
        assert_eq!(entry.last_loop_iteration, 3);
    }
}
