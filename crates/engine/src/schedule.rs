use std::collections::BinaryHeap;

use volition_bdi::{BeliefContext, Goal, Plan};
use volition_core::AgentHandle;

use crate::dag::ChainEntry;

/// Cost assigned to infeasible nodes.
pub const FAILED_COST: f32 = f32::INFINITY;

/// Why a search node could not be placed into the planned graph.
pub mod failure {
    /// Executing this node would violate a resource bound.
    pub const RESOURCE_VIOLATION: u8 = 1 << 0;
    /// No auction bid arrived from the delegate before the timeout.
    pub const AUCTION_BID_TIMEOUT: u8 = 1 << 1;
    /// The heuristic marked the goal impossible.
    pub const HEURISTIC_FAILED: u8 = 1 << 2;
    /// The plan's precondition did not pass.
    pub const PLAN_INVALID: u8 = 1 << 3;
    /// A service required by the plan is missing or unavailable.
    pub const SERVICE_UNAVAILABLE: u8 = 1 << 4;
    /// The delegate is already allocated an intention in this graph.
    pub const DELEGATE_ALLOCATED: u8 = 1 << 5;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    Closed,
    Open,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleState {
    Start,
    /// Select the next best open node.
    Select,
    /// Expand the selection into pending candidate nodes.
    Expand,
    /// Start auctions pricing delegated goals.
    Auction,
    /// Cost the pending nodes.
    Cost,
    /// Awaiting auction bids.
    PendingCost,
    /// Resolve resource and delegate conflicts among pending nodes.
    Deconflict,
    /// Move survivors onto the open list.
    Bind,
    /// Solution found or search exhausted.
    End,
}

const ROOT_GOAL: usize = usize::MAX;

#[derive(Debug)]
pub struct SearchNode {
    pub state: NodeState,
    pub failure: u8,
    pub goal_index: usize,
    /// `None` on the root and on delegation nodes.
    pub plan: Option<String>,
    pub resource_locks: Vec<String>,
    pub delegate: Option<AgentHandle>,
    /// The execution context after this node's plan effects are applied.
    pub context: BeliefContext,
    pub cost_from_start: f32,
    pub cost_of_node: f32,
    pub estimate_to_end: f32,
    pub cost_total: f32,
    pub parent: Option<usize>,
    /// Root-goal indices still to expand below this node.
    pub goals_remaining: Vec<usize>,
}

impl SearchNode {
    pub fn is_delegation(&self) -> bool {
        self.plan.is_none() && self.goal_index != ROOT_GOAL
    }
}

/// A plan candidate for one goal, as filtered by the agent's tactic and
/// plan-selection state when the schedule was created.
#[derive(Debug, Clone)]
pub struct PlanCandidate {
    pub plan: Plan,
    /// A service the plan needs is not attached/available.
    pub service_unavailable: bool,
}

/// One root goal the schedule tries to solve.
pub struct PlannerGoal {
    /// Clone of the desire, including its selection state and queries.
    pub goal: Goal,
    pub candidates: Vec<PlanCandidate>,
    /// The owning team can auction this goal to a member.
    pub can_delegate: bool,
    /// Cleared when the goal has neither plans nor delegates; such goals
    /// are removed from the agent after scheduling.
    pub can_be_planned: bool,
}

impl PlannerGoal {
    /// Overlay the desire's parameter message onto a node context so goal
    /// and plan queries see their pursue parameters.
    fn eval_context(&self, base: &BeliefContext) -> BeliefContext {
        let mut context = base.clone();
        context.set_goal_message(
            self.goal
                .context()
                .goal_message()
                .map(|m| m.read().clone()),
        );
        context
    }

    fn is_satisfied_at(&self, base: &BeliefContext) -> bool {
        self.goal.is_satisfied_in(&self.eval_context(base))
    }

    fn is_valid_at(&self, base: &BeliefContext) -> bool {
        self.goal.is_valid_in(&self.eval_context(base))
    }

    fn heuristic_at(&self, base: &BeliefContext) -> Option<f32> {
        self.goal.heuristic_in(&self.eval_context(base))
    }
}

/// Heap entry ordering open nodes cheapest-first.
struct OpenEntry {
    cost_total: f32,
    node: usize,
}

impl PartialEq for OpenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cost_total == other.cost_total && self.node == other.node
    }
}
impl Eq for OpenEntry {}
impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; invert for cheapest-first.
        other
            .cost_total
            .total_cmp(&self.cost_total)
            .then(other.node.cmp(&self.node))
    }
}

/// Output of one schedule step.
#[derive(Debug, Default)]
pub struct ScheduleTick {
    /// Goal indices that need a delegation auction started.
    pub auction_requests: Vec<usize>,
}

/// A best-first forward search over `(goal, plan)` expansions, producing
/// an optimally sequenced chain of intentions. One state transition runs
/// per engine tick; auctions suspend the search in `PendingCost` until
/// the team folds the bids back in.
pub struct Schedule {
    id: u64,
    /// Set on schedules built to cost a delegation: the team that asked,
    /// and the team-side schedule the bid belongs to.
    pub delegator: Option<(AgentHandle, u64)>,
    state: ScheduleState,
    goals: Vec<PlannerGoal>,
    root_context: BeliefContext,
    nodes: Vec<SearchNode>,
    open: BinaryHeap<OpenEntry>,
    pending: Vec<usize>,
    closed: Vec<usize>,
    failed: Vec<usize>,
    selected: Option<usize>,
    best_terminal: Option<usize>,
    search_depth: i32,
    /// Goal indices with an auction in flight.
    waiting_auctions: Vec<usize>,
    auctioned_goals: Vec<usize>,
    failure_flags: u8,
}

impl Schedule {
    pub fn new(
        id: u64,
        root_context: BeliefContext,
        goals: Vec<PlannerGoal>,
        delegator: Option<(AgentHandle, u64)>,
    ) -> Self {
        Self {
            id,
            delegator,
            state: ScheduleState::Start,
            goals,
            root_context,
            nodes: Vec::new(),
            open: BinaryHeap::new(),
            pending: Vec::new(),
            closed: Vec::new(),
            failed: Vec::new(),
            selected: None,
            best_terminal: None,
            search_depth: 1000,
            waiting_auctions: Vec::new(),
            auctioned_goals: Vec::new(),
            failure_flags: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ScheduleState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == ScheduleState::End || self.search_depth <= 0
    }

    pub fn is_waiting_for_auctions(&self) -> bool {
        self.state == ScheduleState::PendingCost
    }

    pub fn failure_flags(&self) -> u8 {
        self.failure_flags
    }

    pub fn goals(&self) -> &[PlannerGoal] {
        &self.goals
    }

    pub fn nodes(&self) -> &[SearchNode] {
        &self.nodes
    }

    /// The cost of the best complete solution, [`FAILED_COST`] when the
    /// search found none.
    pub fn best_cost(&self) -> f32 {
        self.best_terminal
            .map(|node| self.nodes[node].cost_total)
            .unwrap_or(FAILED_COST)
    }

    /// Advance the search by one state transition.
    pub fn tick(&mut self) -> ScheduleTick {
        let mut output = ScheduleTick::default();
        match self.state {
            ScheduleState::Start => self.start(),
            ScheduleState::Select => self.select(),
            ScheduleState::Expand => self.expand(),
            ScheduleState::Auction => self.auction(&mut output),
            ScheduleState::Cost => self.cost(),
            ScheduleState::PendingCost => {
                if self.waiting_auctions.is_empty() {
                    self.state = ScheduleState::Deconflict;
                }
            }
            ScheduleState::Deconflict => self.deconflict(),
            ScheduleState::Bind => self.bind(),
            ScheduleState::End => {}
        }
        output
    }

    fn start(&mut self) {
        let context = self.root_context.clone_deep();
        let goals_remaining: Vec<usize> = self
            .goals
            .iter()
            .enumerate()
            .filter(|(_, g)| !g.is_satisfied_at(&context))
            .map(|(i, _)| i)
            .collect();
        let root = SearchNode {
            state: NodeState::Open,
            failure: 0,
            goal_index: ROOT_GOAL,
            plan: None,
            resource_locks: Vec::new(),
            delegate: None,
            context,
            cost_from_start: 0.0,
            cost_of_node: 0.0,
            estimate_to_end: goals_remaining.len() as f32,
            cost_total: goals_remaining.len() as f32,
            parent: None,
            goals_remaining,
        };
        self.nodes.push(root);
        self.open.push(OpenEntry {
            cost_total: self.nodes[0].cost_total,
            node: 0,
        });
        self.state = ScheduleState::Select;
    }

    fn select(&mut self) {
        self.search_depth -= 1;
        if self.search_depth <= 0 {
            self.state = ScheduleState::End;
            return;
        }
        loop {
            let Some(entry) = self.open.pop() else {
                self.state = ScheduleState::End;
                return;
            };
            if self.nodes[entry.node].state != NodeState::Open {
                continue; // stale heap entry
            }
            self.nodes[entry.node].state = NodeState::Closed;
            self.closed.push(entry.node);
            if self.nodes[entry.node].goals_remaining.is_empty() {
                // First complete node off a cheapest-first heap is the
                // optimum.
                self.best_terminal = Some(entry.node);
                self.state = ScheduleState::End;
                return;
            }
            self.selected = Some(entry.node);
            self.state = ScheduleState::Expand;
            return;
        }
    }

    fn expand(&mut self) {
        let selected = self.selected.expect("expand without selection");
        let remaining = self.nodes[selected].goals_remaining.clone();

        for goal_index in remaining {
            let parent_context = &self.nodes[selected].context;
            let goal = &self.goals[goal_index];
            if goal.is_satisfied_at(parent_context) {
                continue;
            }
            // A goal whose precondition fails here may become valid
            // deeper in the search once effects accumulate.
            if !goal.is_valid_at(parent_context) {
                continue;
            }

            if self.goals[goal_index].candidates.is_empty() {
                if self.goals[goal_index].can_delegate {
                    self.push_delegation_candidate(selected, goal_index);
                } else {
                    self.goals[goal_index].can_be_planned = false;
                }
                continue;
            }

            for candidate_index in 0..self.goals[goal_index].candidates.len() {
                self.push_plan_candidate(selected, goal_index, candidate_index);
            }
        }
        self.state = ScheduleState::Auction;
    }

    fn push_delegation_candidate(&mut self, parent: usize, goal_index: usize) {
        let context = self.nodes[parent].context.clone();
        let goals_remaining: Vec<usize> = self.nodes[parent]
            .goals_remaining
            .iter()
            .copied()
            .filter(|&g| g != goal_index)
            .collect();
        let node = SearchNode {
            state: NodeState::Pending,
            failure: 0,
            goal_index,
            plan: None,
            resource_locks: Vec::new(),
            delegate: None,
            context,
            cost_from_start: 0.0,
            cost_of_node: 0.0,
            estimate_to_end: 0.0,
            cost_total: 0.0,
            parent: Some(parent),
            goals_remaining,
        };
        self.nodes.push(node);
        self.pending.push(self.nodes.len() - 1);
    }

    fn push_plan_candidate(&mut self, parent: usize, goal_index: usize, candidate_index: usize) {
        let candidate = &self.goals[goal_index].candidates[candidate_index];
        let plan_name = candidate.plan.name().to_string();
        let locks = candidate.plan.resource_locks().to_vec();

        if candidate.service_unavailable {
            self.push_failed_candidate(
                parent,
                goal_index,
                Some(plan_name),
                failure::SERVICE_UNAVAILABLE,
            );
            return;
        }

        let parent_context = &self.nodes[parent].context;
        let eval_context = self.goals[goal_index].eval_context(parent_context);
        if !candidate.plan.valid(&eval_context) {
            self.push_failed_candidate(parent, goal_index, Some(plan_name), failure::PLAN_INVALID);
            return;
        }

        // Only plans with effects mutate the context; effectless plans
        // share the parent's.
        let has_effects = candidate.plan.can_model_effect();
        let context = if has_effects {
            let mut context = parent_context.clone_deep();
            candidate.plan.apply_effects(&mut context);
            context
        } else {
            parent_context.clone()
        };

        if has_effects && context.has_resource_violation(None) {
            self.push_failed_candidate(
                parent,
                goal_index,
                Some(plan_name),
                failure::RESOURCE_VIOLATION,
            );
            return;
        }

        let goal = &self.goals[goal_index];
        let progressed = goal.is_satisfied_at(&context)
            || !goal.goal.is_achievement()
            || !has_effects;
        let goals_remaining: Vec<usize> = self.nodes[parent]
            .goals_remaining
            .iter()
            .copied()
            .filter(|&g| g != goal_index || !progressed)
            .collect();

        let node = SearchNode {
            state: NodeState::Pending,
            failure: 0,
            goal_index,
            plan: Some(plan_name),
            resource_locks: locks,
            delegate: None,
            context,
            cost_from_start: 0.0,
            cost_of_node: 0.0,
            estimate_to_end: 0.0,
            cost_total: 0.0,
            parent: Some(parent),
            goals_remaining,
        };
        self.nodes.push(node);
        self.pending.push(self.nodes.len() - 1);
    }

    fn push_failed_candidate(
        &mut self,
        parent: usize,
        goal_index: usize,
        plan: Option<String>,
        reason: u8,
    ) {
        self.failure_flags |= reason;
        let node = SearchNode {
            state: NodeState::Failed,
            failure: reason,
            goal_index,
            plan,
            resource_locks: Vec::new(),
            delegate: None,
            context: self.nodes[parent].context.clone(),
            cost_from_start: self.nodes[parent].cost_from_start,
            cost_of_node: FAILED_COST,
            estimate_to_end: 0.0,
            cost_total: FAILED_COST,
            parent: Some(parent),
            goals_remaining: self.nodes[parent].goals_remaining.clone(),
        };
        self.nodes.push(node);
        self.failed.push(self.nodes.len() - 1);
    }

    fn auction(&mut self, output: &mut ScheduleTick) {
        for &node in &self.pending {
            if !self.nodes[node].is_delegation() {
                continue;
            }
            let goal_index = self.nodes[node].goal_index;
            if self.auctioned_goals.contains(&goal_index)
                || self.waiting_auctions.contains(&goal_index)
            {
                continue;
            }
            output.auction_requests.push(goal_index);
            self.waiting_auctions.push(goal_index);
            self.auctioned_goals.push(goal_index);
        }
        self.state = ScheduleState::Cost;
    }

    fn cost(&mut self) {
        let pending = self.pending.clone();
        for index in pending {
            let parent = self.nodes[index].parent.expect("pending node has parent");
            let cost_from_start =
                self.nodes[parent].cost_from_start + self.nodes[parent].cost_of_node;
            let node = &self.nodes[index];
            // Delegations are priced by their auction bid.
            let cost_of_node = if node.is_delegation() {
                node.cost_of_node
            } else {
                1.0
            };
            let estimate_to_end = self.estimate_to_end(node);

            let node = &mut self.nodes[index];
            node.cost_from_start = cost_from_start;
            node.cost_of_node = cost_of_node;
            node.estimate_to_end = estimate_to_end;
            node.cost_total = cost_from_start + cost_of_node + estimate_to_end;
            if node.cost_total.is_infinite() {
                self.fail_node(index, failure::HEURISTIC_FAILED);
            }
        }
        self.pending
            .retain(|&n| self.nodes[n].state == NodeState::Pending);
        self.state = if self.waiting_auctions.is_empty() {
            ScheduleState::Deconflict
        } else {
            ScheduleState::PendingCost
        };
    }

    /// Estimated remaining cost from a node: the node's own goal
    /// heuristic against the post-effects context, plus every other
    /// remaining goal's heuristic (unit cost when a goal has none).
    fn estimate_to_end(&self, node: &SearchNode) -> f32 {
        let own = self.goals[node.goal_index]
            .heuristic_at(&node.context)
            .unwrap_or(if node.goals_remaining.contains(&node.goal_index) {
                1.0
            } else {
                0.0
            });
        let rest: f32 = node
            .goals_remaining
            .iter()
            .filter(|&&g| g != node.goal_index)
            .map(|&g| self.goals[g].heuristic_at(&node.context).unwrap_or(1.0))
            .sum();
        own + rest
    }

    /// Fold a finished auction into the schedule. `best` carries the
    /// cheapest bidder; `None` means no bid arrived before expiry.
    pub fn complete_auction(&mut self, goal_index: usize, best: Option<(AgentHandle, f32)>) {
        self.waiting_auctions.retain(|&g| g != goal_index);
        let pending_delegations: Vec<usize> = self
            .pending
            .iter()
            .copied()
            .filter(|&n| self.nodes[n].is_delegation() && self.nodes[n].goal_index == goal_index)
            .collect();
        for index in pending_delegations {
            match &best {
                Some((delegate, score)) => {
                    let node = &mut self.nodes[index];
                    node.delegate = Some(delegate.clone());
                    node.cost_of_node = *score;
                    node.cost_total = node.cost_from_start + node.cost_of_node + node.estimate_to_end;
                }
                None => {
                    self.failure_flags |= failure::AUCTION_BID_TIMEOUT;
                    let node = &mut self.nodes[index];
                    node.state = NodeState::Failed;
                    node.failure |= failure::AUCTION_BID_TIMEOUT;
                    node.cost_total = FAILED_COST;
                    self.failed.push(index);
                }
            }
        }
        if best.is_none() {
            self.pending
                .retain(|&n| self.nodes[n].state == NodeState::Pending);
        }
    }

    /// Mark a delegation goal as having no delegates at all.
    pub fn cancel_auction(&mut self, goal_index: usize) {
        self.complete_auction(goal_index, None);
        self.goals[goal_index].can_be_planned = false;
    }

    fn ancestors_contain_delegate(&self, node: usize, delegate: &AgentHandle) -> bool {
        let mut cursor = self.nodes[node].parent;
        while let Some(index) = cursor {
            if self.nodes[index].delegate.as_ref() == Some(delegate) {
                return true;
            }
            cursor = self.nodes[index].parent;
        }
        false
    }

    fn deconflict(&mut self) {
        let pending = self.pending.clone();

        // Two pending nodes contending for the same resource collapse to
        // the cheaper variant.
        for i in 0..pending.len() {
            for j in (i + 1)..pending.len() {
                let (a, b) = (pending[i], pending[j]);
                if self.nodes[a].state != NodeState::Pending
                    || self.nodes[b].state != NodeState::Pending
                {
                    continue;
                }
                let conflict = self.nodes[a]
                    .resource_locks
                    .iter()
                    .any(|lock| self.nodes[b].resource_locks.contains(lock));
                if !conflict {
                    continue;
                }
                let loser = if self.nodes[a].cost_total <= self.nodes[b].cost_total {
                    b
                } else {
                    a
                };
                self.fail_node(loser, failure::RESOURCE_VIOLATION);
            }
        }

        // A delegate may execute one goal for the team at a time.
        let mut allocated: Vec<AgentHandle> = Vec::new();
        for &index in &pending {
            if self.nodes[index].state != NodeState::Pending {
                continue;
            }
            let Some(delegate) = self.nodes[index].delegate.clone() else {
                continue;
            };
            if allocated.contains(&delegate)
                || self.ancestors_contain_delegate(index, &delegate)
            {
                self.fail_node(index, failure::DELEGATE_ALLOCATED);
            } else {
                allocated.push(delegate);
            }
        }
        self.state = ScheduleState::Bind;
    }

    fn fail_node(&mut self, index: usize, reason: u8) {
        self.failure_flags |= reason;
        let node = &mut self.nodes[index];
        node.state = NodeState::Failed;
        node.failure |= reason;
        node.cost_total = FAILED_COST;
        self.failed.push(index);
    }

    fn bind(&mut self) {
        for &index in &self.pending {
            if self.nodes[index].state != NodeState::Pending {
                continue;
            }
            self.nodes[index].state = NodeState::Open;
            self.open.push(OpenEntry {
                cost_total: self.nodes[index].cost_total,
                node: index,
            });
        }
        self.pending.clear();
        if self.open.is_empty() && self.waiting_auctions.is_empty() {
            self.state = ScheduleState::End;
        } else {
            self.state = ScheduleState::Select;
        }
    }

    /// Extract the best chain of intentions: the cheapest complete node's
    /// ancestry, root first. Falls back to the most-progressed closed
    /// node when the search found no complete solution.
    pub fn best_chain(&self) -> Vec<ChainEntry> {
        let start = self.best_terminal.or_else(|| {
            self.closed
                .iter()
                .copied()
                .filter(|&n| self.nodes[n].goal_index != ROOT_GOAL)
                .min_by(|&a, &b| {
                    let na = &self.nodes[a];
                    let nb = &self.nodes[b];
                    na.goals_remaining
                        .len()
                        .cmp(&nb.goals_remaining.len())
                        .then(na.cost_total.total_cmp(&nb.cost_total))
                })
        });
        let Some(start) = start else {
            return Vec::new();
        };

        let mut chain = Vec::new();
        let mut cursor = Some(start);
        while let Some(index) = cursor {
            let node = &self.nodes[index];
            if node.goal_index != ROOT_GOAL {
                chain.push(ChainEntry {
                    desire: self.goals[node.goal_index].goal.handle().clone(),
                    plan: node.plan.clone(),
                    resource_locks: node.resource_locks.clone(),
                    delegate: node.delegate.clone(),
                });
            }
            cursor = node.parent;
        }
        chain.reverse();
        chain
    }

    /// Goals that the planner proved structurally unachievable: no plans
    /// under the tactic and nobody to delegate to.
    pub fn unachievable_goals(&self) -> Vec<&PlannerGoal> {
        self.goals.iter().filter(|g| !g.can_be_planned).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volition_bdi::{BeliefQuery, Coroutine, Heuristic, TaskKind};
    use volition_core::{MessageSchema, Resource, UniqueId};

    fn run_schedule(schedule: &mut Schedule) {
        for _ in 0..10_000 {
            if schedule.is_finished() {
                return;
            }
            let tick = schedule.tick();
            // No team in these tests: cancel any auction request.
            for goal_index in tick.auction_requests {
                schedule.cancel_auction(goal_index);
            }
        }
        panic!("schedule did not finish");
    }

    fn plan(name: &str, goal: &str) -> Plan {
        let mut plan = Plan::new(name);
        plan.set_goal(goal);
        let mut body = Coroutine::new();
        body.add_task(
            TaskKind::Print {
                message: "work".into(),
            },
            UniqueId::random(),
        );
        plan.set_body(body);
        plan
    }

    fn candidate(plan: Plan) -> PlanCandidate {
        PlanCandidate {
            plan,
            service_unavailable: false,
        }
    }

    #[test]
    fn test_single_goal_single_plan() {
        let goal = Goal::new("G");
        let schedule_goals = vec![PlannerGoal {
            goal: goal.clone(),
            candidates: vec![candidate(plan("P", "G"))],
            can_delegate: false,
            can_be_planned: true,
        }];
        let mut schedule = Schedule::new(1, BeliefContext::new(), schedule_goals, None);
        run_schedule(&mut schedule);

        let chain = schedule.best_chain();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].plan.as_deref(), Some("P"));
        assert_eq!(chain[0].desire.id, goal.id());
        assert!(schedule.best_cost() < FAILED_COST);
    }

    #[test]
    fn test_invalid_plan_is_failed_out() {
        let goal = Goal::new("G");
        let mut bad = plan("Bad", "G");
        bad.set_precondition(BeliefQuery::new(|_| false));
        let schedule_goals = vec![PlannerGoal {
            goal,
            candidates: vec![candidate(bad), candidate(plan("Good", "G"))],
            can_delegate: false,
            can_be_planned: true,
        }];
        let mut schedule = Schedule::new(1, BeliefContext::new(), schedule_goals, None);
        run_schedule(&mut schedule);

        let chain = schedule.best_chain();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].plan.as_deref(), Some("Good"));
        assert!(schedule.failure_flags() & failure::PLAN_INVALID != 0);
    }

    #[test]
    fn test_effects_chain_until_satisfied() {
        // Counter starts at 3; the plan's effect decrements; the goal is
        // satisfied at zero. The planner chains three expansions.
        let context = BeliefContext::new();
        context.add_message(
            MessageSchema::new("Counter")
                .with_field_value("count", 3i32)
                .instantiate()
                .unwrap(),
        );

        let mut goal = Goal::new("G");
        goal.set_satisfied(BeliefQuery::new(|ctx| {
            ctx.get("count").and_then(|v| v.as_i32()).unwrap_or(0) <= 0
        }));

        let mut decrement = plan("Decrement", "G");
        decrement.set_effects(|ctx| {
            if let Some(message) = ctx.message("Counter") {
                let mut message = message.write();
                let count = message.get_field("count").and_then(|v| v.as_i32()).unwrap_or(0);
                let _ = message.set_field("count", count - 1);
            }
        });

        let schedule_goals = vec![PlannerGoal {
            goal,
            candidates: vec![candidate(decrement)],
            can_delegate: false,
            can_be_planned: true,
        }];
        let mut schedule = Schedule::new(1, context, schedule_goals, None);
        run_schedule(&mut schedule);

        let chain = schedule.best_chain();
        assert_eq!(chain.len(), 3);
        assert!(chain.iter().all(|e| e.plan.as_deref() == Some("Decrement")));

        // Adjacent chain costs are monotone.
        let mut cost = 0.0;
        for node in schedule.nodes().iter().filter(|n| n.state == NodeState::Closed && n.goal_index != ROOT_GOAL) {
            assert!(node.cost_from_start >= cost);
            cost = node.cost_from_start;
        }
    }

    #[test]
    fn test_resource_violating_effects_fail() {
        let context = BeliefContext::new();
        context.add_resource(Resource::new("Fuel", 0, 10));
        context.resource("Fuel").unwrap().write().set(5);

        let goal = Goal::new("G");
        let mut hungry = plan("Hungry", "G");
        hungry.set_effects(|ctx| {
            if let Some(fuel) = ctx.resource("Fuel") {
                fuel.write().consume(50);
            }
        });

        let schedule_goals = vec![PlannerGoal {
            goal,
            candidates: vec![candidate(hungry)],
            can_delegate: false,
            can_be_planned: true,
        }];
        let mut schedule = Schedule::new(1, context, schedule_goals, None);
        run_schedule(&mut schedule);

        assert!(schedule.best_chain().is_empty());
        assert!(schedule.failure_flags() & failure::RESOURCE_VIOLATION != 0);
    }

    #[test]
    fn test_heuristic_prices_the_solution() {
        let mut goal = Goal::new("G");
        goal.set_heuristic(Heuristic::new(|ctx| {
            ctx.get("distance")
                .and_then(|v| v.as_i32())
                .unwrap_or(0) as f32
        }));
        let context = BeliefContext::new();
        context.add_message(
            MessageSchema::new("Nav")
                .with_field_value("distance", 3i32)
                .instantiate()
                .unwrap(),
        );

        let schedule_goals = vec![PlannerGoal {
            goal,
            candidates: vec![candidate(plan("Go", "G"))],
            can_delegate: false,
            can_be_planned: true,
        }];
        let mut schedule = Schedule::new(1, context, schedule_goals, None);
        run_schedule(&mut schedule);

        // Unit plan cost plus the heuristic estimate: this is the score a
        // team member would bid into an auction.
        assert_eq!(schedule.best_cost(), 4.0);
    }

    #[test]
    fn test_goal_invalid_at_root_is_sequenced_after_enabling_effects() {
        // "Refill" only becomes valid once "Work" has drained the tank;
        // the planner orders it after the draining expansions.
        let context = BeliefContext::new();
        context.add_message(
            MessageSchema::new("Tank")
                .with_field_value("level", 2i32)
                .instantiate()
                .unwrap(),
        );

        let mut work = Goal::new("Work");
        work.set_satisfied(BeliefQuery::new(|ctx| {
            ctx.get("level").and_then(|v| v.as_i32()).unwrap_or(0) <= 0
        }));
        let mut drain = plan("Drain", "Work");
        drain.set_effects(|ctx| {
            if let Some(tank) = ctx.message("Tank") {
                let mut tank = tank.write();
                let level = tank.get_field("level").and_then(|v| v.as_i32()).unwrap_or(0);
                let _ = tank.set_field("level", level - 1);
            }
        });

        let mut refill = Goal::new("Refill");
        refill.set_precondition(BeliefQuery::new(|ctx| {
            ctx.get("level").and_then(|v| v.as_i32()).unwrap_or(0) <= 0
        }));
        let fill = plan("Fill", "Refill");

        let schedule_goals = vec![
            PlannerGoal {
                goal: refill,
                candidates: vec![candidate(fill)],
                can_delegate: false,
                can_be_planned: true,
            },
            PlannerGoal {
                goal: work,
                candidates: vec![candidate(drain)],
                can_delegate: false,
                can_be_planned: true,
            },
        ];
        let mut schedule = Schedule::new(1, context, schedule_goals, None);
        run_schedule(&mut schedule);

        let chain = schedule.best_chain();
        let plans: Vec<&str> = chain.iter().filter_map(|e| e.plan.as_deref()).collect();
        assert_eq!(plans, vec!["Drain", "Drain", "Fill"]);
    }

    #[test]
    fn test_unplannable_goal_is_reported() {
        let goal = Goal::new("G");
        let schedule_goals = vec![PlannerGoal {
            goal,
            candidates: Vec::new(),
            can_delegate: false,
            can_be_planned: true,
        }];
        let mut schedule = Schedule::new(1, BeliefContext::new(), schedule_goals, None);
        run_schedule(&mut schedule);

        assert!(schedule.best_chain().is_empty());
        assert_eq!(schedule.unachievable_goals().len(), 1);
    }

    #[test]
    fn test_delegation_candidate_priced_by_bid() {
        let goal = Goal::new("G");
        let schedule_goals = vec![PlannerGoal {
            goal: goal.clone(),
            candidates: Vec::new(),
            can_delegate: true,
            can_be_planned: true,
        }];
        let mut schedule = Schedule::new(7, BeliefContext::new(), schedule_goals, None);

        let mut requested = None;
        for _ in 0..100 {
            if schedule.is_finished() {
                break;
            }
            let tick = schedule.tick();
            if let Some(&goal_index) = tick.auction_requests.first() {
                requested = Some(goal_index);
                let winner = AgentHandle::new("member", UniqueId::random());
                schedule.complete_auction(goal_index, Some((winner, 3.0)));
            }
        }
        assert_eq!(requested, Some(0));
        assert!(schedule.is_finished());

        let chain = schedule.best_chain();
        assert_eq!(chain.len(), 1);
        assert!(chain[0].is_delegation());
        assert_eq!(chain[0].delegate.as_ref().unwrap().name, "member");
    }

    #[test]
    fn test_auction_timeout_fails_delegation() {
        let goal = Goal::new("G");
        let schedule_goals = vec![PlannerGoal {
            goal,
            candidates: Vec::new(),
            can_delegate: true,
            can_be_planned: true,
        }];
        let mut schedule = Schedule::new(7, BeliefContext::new(), schedule_goals, None);

        for _ in 0..100 {
            if schedule.is_finished() {
                break;
            }
            let tick = schedule.tick();
            for goal_index in tick.auction_requests {
                schedule.complete_auction(goal_index, None);
            }
        }
        assert!(schedule.is_finished());
        assert!(schedule.best_chain().is_empty());
        assert!(schedule.failure_flags() & failure::AUCTION_BID_TIMEOUT != 0);
    }
}
