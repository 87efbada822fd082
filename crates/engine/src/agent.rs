use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;

use volition_bdi::{
    bind_message, BeliefContext, Goal, GoalParent, Plan, PlanOrder, Tactic, TaskEffect,
};
use volition_core::{
    ActionHandle, AgentHandle, BusAddress, DelegationStatus, DropMode, FinishState, GoalHandle,
    Message, NodeType, UniqueId,
};

use crate::agent_executor::{AgentExecutor, RunningState};
use crate::bus;
use crate::dispatch::{EventQueue, QueueHandle, Router};
use crate::engine::{EngineCtx, Registry};
use crate::event::{
    ActionCompleteEvent, ActionEvent, ControlCommand, Event, EventBody, EventStatus, GoalPromise,
    GoalPursue, SubGoalParent,
};
use crate::executor::{ExecutorHost, ExecutorNote, IntentionExecutor};
use crate::schedule::{PlanCandidate, PlannerGoal, Schedule};
use crate::service::{ActionCompleter, EntityState};
use crate::team::TeamState;

/// Why the current schedule is invalid and a new one is needed. Bits are
/// OR'd; [`dirty::IMMEDIATE`] bits force replacement before the current
/// schedule completes.
pub mod dirty {
    pub const NONE: u16 = 0;
    pub const AGENT_STARTED: u16 = 1 << 0;
    pub const PERCEPT: u16 = 1 << 1;
    pub const MESSAGE: u16 = 1 << 2;
    pub const GOAL_ADDED: u16 = 1 << 3;
    pub const GOAL_REMOVED: u16 = 1 << 4;
    pub const MEMBER_ADDED: u16 = 1 << 5;
    pub const MEMBER_REMOVED: u16 = 1 << 6;
    pub const TACTICS_CHANGED: u16 = 1 << 7;
    pub const FORCE: u16 = 1 << 8;

    /// The schedule may reference goals or members that no longer exist,
    /// or the application demanded a replan.
    pub const IMMEDIATE: u16 = GOAL_REMOVED | MEMBER_REMOVED | FORCE;
}

/// Fair bound on events handled per agent per tick.
const MAX_EVENTS_PER_TICK: usize = 128;

pub type ActionHandlerFn =
    Arc<dyn Fn(&mut Agent, &Message, &mut Message, &ActionHandle) -> EventStatus + Send + Sync>;
pub type MessageHandlerFn = Arc<dyn Fn(&mut Agent, &Message) + Send + Sync>;

/// Committed description of an agent: everything needed to instantiate
/// one.
#[derive(Clone, Default)]
pub struct AgentTemplate {
    pub name: String,
    pub plans: Vec<String>,
    pub roles: Vec<String>,
    pub resources: Vec<String>,
    pub services: Vec<String>,
    pub initial_desires: Vec<String>,
    pub beliefs: Vec<String>,
    pub tactics: Vec<String>,
    pub action_handlers: HashMap<String, ActionHandlerFn>,
    pub message_handlers: HashMap<String, MessageHandlerFn>,
    /// Maintenance mapping: pursue the goal when the resource is
    /// violated.
    pub resources_to_goals: HashMap<String, String>,
    pub is_team: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct TimerEntry {
    expire_at_us: u64,
    task_id: UniqueId,
}

/// A live BDI agent: belief context, desires, intention executors, a
/// planning schedule and a per-entity event queue, all ticked on the
/// engine thread.
pub struct Agent {
    handle: AgentHandle,
    template_name: String,
    bus_address: BusAddress,
    state: EntityState,
    available: bool,
    proxy: bool,
    queue: EventQueue,
    queue_handle: QueueHandle,
    router: Router,

    // Template-derived configuration.
    pub(crate) plans: Vec<String>,
    pub(crate) roles: Vec<String>,
    resource_names: Vec<String>,
    service_names: Vec<String>,
    initial_desires: Vec<String>,
    belief_names: Vec<String>,
    action_handlers: HashMap<String, ActionHandlerFn>,
    message_handlers: HashMap<String, MessageHandlerFn>,
    resources_to_goals: HashMap<String, String>,

    // Instance state.
    context: BeliefContext,
    desires: Vec<Goal>,
    promises: HashMap<UniqueId, GoalPromise>,
    pub(crate) executor: AgentExecutor,
    pub(crate) schedule: Option<Schedule>,
    pub(crate) schedule_dirty: u16,
    schedule_id_counter: u64,
    timers: BinaryHeap<std::cmp::Reverse<TimerEntry>>,
    attached_services: Vec<volition_core::ServiceHandle>,
    current_tactics: HashMap<String, String>,
    pending_actions: HashMap<UniqueId, ActionEvent>,
    pub(crate) team: Option<TeamState>,
    pub(crate) team_memberships: Vec<AgentHandle>,
    /// Goals this agent is achieving on behalf of a team, keyed by
    /// desire id.
    delegations_in_progress: HashMap<UniqueId, AgentHandle>,
    /// Single-goal schedules costing incoming delegation analyses.
    delegation_backlog: Vec<Schedule>,
    started_once: bool,
    beliefs_dirty: HashSet<String>,
    last_share_us: u64,
}

impl Agent {
    pub fn from_template(
        template: &AgentTemplate,
        name: &str,
        id: UniqueId,
        registry: &Registry,
        router: Router,
    ) -> Self {
        let handle = AgentHandle::new(name, id);
        let queue = EventQueue::new();
        let queue_handle = queue.handle();
        let context = BeliefContext::new();
        let node_type = if template.is_team {
            NodeType::Team
        } else {
            NodeType::Agent
        };

        for schema_name in &template.beliefs {
            match registry.message_schemas.get(schema_name) {
                Some(schema) => match schema.instantiate() {
                    Ok(message) => context.add_message(message),
                    Err(err) => {
                        tracing::warn!(agent = %handle, schema = %schema_name, %err,
                            "Failed to instantiate belief message");
                    }
                },
                None => {
                    tracing::warn!(agent = %handle, schema = %schema_name,
                        "Belief schema not committed to the engine");
                }
            }
        }
        for resource_name in &template.resources {
            match registry.resources.get(resource_name) {
                Some(resource) => context.add_resource(resource.clone()),
                None => {
                    tracing::warn!(agent = %handle, resource = %resource_name,
                        "Resource template not committed to the engine");
                }
            }
        }

        let current_tactics = template
            .tactics
            .iter()
            .filter_map(|tactic_name| {
                registry
                    .tactics
                    .get(tactic_name)
                    .map(|t| (t.goal.clone(), tactic_name.clone()))
            })
            .collect();

        let mut agent = Self {
            bus_address: BusAddress::new(node_type, name, id),
            handle,
            template_name: template.name.clone(),
            state: EntityState::Stopped,
            available: true,
            proxy: false,
            queue,
            queue_handle,
            router,
            plans: template.plans.clone(),
            roles: template.roles.clone(),
            resource_names: template.resources.clone(),
            service_names: template.services.clone(),
            initial_desires: template.initial_desires.clone(),
            belief_names: template.beliefs.clone(),
            action_handlers: template.action_handlers.clone(),
            message_handlers: template.message_handlers.clone(),
            resources_to_goals: template.resources_to_goals.clone(),
            context,
            desires: Vec::new(),
            promises: HashMap::new(),
            executor: AgentExecutor::default(),
            schedule: None,
            schedule_dirty: dirty::NONE,
            schedule_id_counter: 0,
            timers: BinaryHeap::new(),
            attached_services: Vec::new(),
            current_tactics,
            pending_actions: HashMap::new(),
            team: template.is_team.then(TeamState::default),
            team_memberships: Vec::new(),
            delegations_in_progress: HashMap::new(),
            delegation_backlog: Vec::new(),
            started_once: false,
            beliefs_dirty: HashSet::new(),
            last_share_us: 0,
        };
        let handle = agent.handle.clone();
        agent.context.set_agent(handle);
        agent
    }

    pub fn handle(&self) -> &AgentHandle {
        &self.handle
    }

    pub fn name(&self) -> &str {
        &self.handle.name
    }

    pub fn id(&self) -> UniqueId {
        self.handle.id
    }

    pub fn template_name(&self) -> &str {
        &self.template_name
    }

    pub fn bus_address(&self) -> &BusAddress {
        &self.bus_address
    }

    pub fn state(&self) -> EntityState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, EntityState::Running | EntityState::Stopping)
    }

    pub fn stopped(&self) -> bool {
        self.state == EntityState::Stopped
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn set_availability(&mut self, available: bool) {
        self.available = available;
    }

    pub fn is_proxy(&self) -> bool {
        self.proxy
    }

    pub fn set_proxy(&mut self, proxy: bool) {
        self.proxy = proxy;
    }

    pub fn is_team(&self) -> bool {
        self.team.is_some()
    }

    pub fn context(&self) -> &BeliefContext {
        &self.context
    }

    pub fn message(&self, name: &str) -> Option<volition_bdi::SharedMessage> {
        self.context.message(name)
    }

    pub fn queue_handle(&self) -> QueueHandle {
        self.queue_handle.clone()
    }

    /// True if this agent would act on a broadcast message of the schema.
    pub(crate) fn handles_message(&self, schema: &str) -> bool {
        self.message_handlers.contains_key(schema) || self.context.message(schema).is_some()
    }

    /// Send a belief message to another agent, or broadcast it to every
    /// interested agent when no recipient is named.
    pub fn send_message(&self, message: Message, recipient: Option<AgentHandle>) {
        let event = Event::new(
            self.handle.clone(),
            recipient.unwrap_or_default(),
            EventBody::Message { message },
        );
        self.router.route(event);
    }

    pub fn running_state(&self) -> RunningState {
        self.executor.running_state(self.stopped())
    }

    /// Belief schemas this agent instantiates.
    pub fn belief_set_names(&self) -> &[String] {
        &self.belief_names
    }

    /// Services this agent depends on, by template name.
    pub fn service_names(&self) -> &[String] {
        &self.service_names
    }

    pub fn resource_names(&self) -> &[String] {
        &self.resource_names
    }

    pub fn plan_names(&self) -> &[String] {
        &self.plans
    }

    pub fn role_names(&self) -> &[String] {
        &self.roles
    }

    pub fn desires(&self) -> &[Goal] {
        &self.desires
    }

    pub fn desire(&self, id: UniqueId) -> Option<&Goal> {
        self.desires.iter().find(|d| d.id() == id)
    }

    pub fn team_memberships(&self) -> &[AgentHandle] {
        &self.team_memberships
    }

    pub fn attached_services(&self) -> &[volition_core::ServiceHandle] {
        &self.attached_services
    }

    /// Attach a service instance so the agent can forward unhandled
    /// actions to it.
    pub fn attach_service(&mut self, service: volition_core::ServiceHandle, force: bool) -> bool {
        if let Some(existing) = self
            .attached_services
            .iter()
            .position(|s| s.name == service.name)
        {
            if !force {
                return false;
            }
            self.attached_services[existing] = service;
            return true;
        }
        self.attached_services.push(service);
        true
    }

    pub fn detach_service(&mut self, service: &volition_core::ServiceHandle) -> bool {
        let before = self.attached_services.len();
        self.attached_services.retain(|s| s != service);
        before != self.attached_services.len()
    }

    /// An agent is active while it has anything left to do; the engine's
    /// exit-when-done check keys off this.
    pub fn is_active(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        !self.desires.is_empty()
            || !self.queue.is_empty()
            || !self.executor.executors().is_empty()
            || !self.timers.is_empty()
            || self
                .schedule
                .as_ref()
                .map(|s| !s.is_finished())
                .unwrap_or(false)
    }

    pub fn start(&mut self) {
        let event = Event::new(
            self.handle.clone(),
            self.handle.clone(),
            EventBody::Control {
                command: ControlCommand::Start,
            },
        );
        self.queue_handle.push(event);
    }

    pub fn stop(&mut self) {
        let event = Event::new(
            self.handle.clone(),
            self.handle.clone(),
            EventBody::Control {
                command: ControlCommand::Stop,
            },
        );
        self.queue_handle.push(event);
    }

    pub fn pause(&mut self) {
        let event = Event::new(
            self.handle.clone(),
            self.handle.clone(),
            EventBody::Control {
                command: ControlCommand::Pause,
            },
        );
        self.queue_handle.push(event);
    }

    pub fn force_reschedule(&mut self) {
        self.schedule_dirty |= dirty::FORCE;
    }

    /// Pursue a goal. The desire is created when the event is handled on
    /// the agent's next tick; the returned promise fulfils when the
    /// desire concludes.
    pub fn pursue(
        &mut self,
        goal: &str,
        persistent: bool,
        parameters: Option<Message>,
    ) -> GoalPursue {
        self.pursue_with_id(goal, persistent, parameters, UniqueId::random(), None)
    }

    pub fn pursue_with_id(
        &mut self,
        goal: &str,
        persistent: bool,
        parameters: Option<Message>,
        goal_id: UniqueId,
        parent: Option<SubGoalParent>,
    ) -> GoalPursue {
        let promise = GoalPromise::new();
        let event = Event::new(
            self.handle.clone(),
            self.handle.clone(),
            EventBody::Pursue {
                goal: goal.to_string(),
                goal_id,
                persistent,
                parameters,
                parent,
                promise: Some(promise.clone()),
            },
        );
        self.queue_handle.push(event);
        GoalPursue {
            handle: GoalHandle::new(goal, goal_id),
            promise,
        }
    }

    /// Drop a desire. `Normal` drops are ignored on persistent desires;
    /// `Force` removes them too.
    pub fn drop_with_mode(&mut self, goal: GoalHandle, mode: DropMode, reason: &str) {
        let event = Event::new(
            self.handle.clone(),
            self.handle.clone(),
            EventBody::Drop {
                goal,
                mode,
                reason: reason.to_string(),
            },
        );
        self.queue_handle.push(event);
    }

    /// Complete a pending action from any thread. Returns false when the
    /// handle no longer refers to an in-flight action.
    pub fn finish_action_handle(
        &mut self,
        handle: &ActionHandle,
        success: bool,
        reply: Option<Message>,
    ) -> bool {
        match self.action_completer(handle) {
            Some(completer) => {
                completer.finish(success, reply);
                self.pending_actions.remove(&handle.id);
                true
            }
            None => false,
        }
    }

    /// Build a thread-safe completer for an in-flight action; used by
    /// handlers that return [`EventStatus::Pending`] and finish on
    /// another thread.
    pub fn action_completer(&self, handle: &ActionHandle) -> Option<ActionCompleter> {
        let event = self.pending_actions.get(&handle.id)?;
        Some(ActionCompleter::new(
            self.queue_handle.clone(),
            self.handle.clone(),
            event.clone(),
        ))
    }

    /// Select a tactic for its goal; replaces the goal's previous tactic.
    pub fn select_tactic(&mut self, registry: &Registry, tactic_name: &str) -> bool {
        let Some(tactic) = registry.tactics.get(tactic_name) else {
            tracing::warn!(agent = %self.handle, tactic = %tactic_name, "Unknown tactic");
            return false;
        };
        self.current_tactics
            .insert(tactic.goal.clone(), tactic_name.to_string());
        self.schedule_dirty |= dirty::TACTICS_CHANGED;
        true
    }

    pub(crate) fn current_tactic(&self, registry: &Registry, goal: &str) -> Tactic {
        if let Some(name) = self.current_tactics.get(goal) {
            if let Some(tactic) = registry.tactics.get(name) {
                return tactic.clone();
            }
        }
        registry
            .builtin_tactic(goal)
            .cloned()
            .unwrap_or_else(|| Tactic {
                goal: goal.to_string(),
                ..Default::default()
            })
    }

    /// Plan names applicable to a goal under the active tactic: committed
    /// for the goal, carried by this agent, allowed by the tactic.
    pub(crate) fn tactic_plan_names(&self, registry: &Registry, goal: &str) -> Vec<String> {
        let tactic = self.current_tactic(registry, goal);
        registry
            .goal_plans
            .get(goal)
            .map(|names| {
                names
                    .iter()
                    .filter(|name| self.plans.contains(name))
                    .filter(|name| tactic.plan_allowed(name))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Tick pipeline
    // ------------------------------------------------------------------

    /// One BDI step: drain events, keep the schedule fresh, bind the best
    /// chain to the executor DAG, advance open intentions, fire timers
    /// and clean up concluded desires.
    pub fn run(&mut self, ctx: &mut EngineCtx) {
        for event in self.queue.drain(MAX_EVENTS_PER_TICK) {
            if self.proxy {
                self.forward_to_bus(event, ctx);
            } else {
                self.handle_event(event, ctx);
            }
        }

        if !self.is_running() || self.proxy {
            return;
        }

        self.fire_timers(ctx);
        self.check_desire_drop_conditions();
        self.check_maintenance_goals();
        self.step_delegation_backlog(ctx);
        self.step_schedule(ctx);
        if let Some(team) = &mut self.team {
            team.reconcile_auctions(ctx.now_us, self.schedule.as_mut());
        }
        self.step_executors(ctx);
        self.conclude_finished(ctx);
        self.share_beliefs(ctx);

        if self.state == EntityState::Stopping
            && self.desires.is_empty()
            && self.executor.executors().is_empty()
        {
            self.state = EntityState::Stopped;
            tracing::info!(agent = %self.handle, "Agent stopped");
        }
    }

    fn fire_timers(&mut self, ctx: &mut EngineCtx) {
        while let Some(&std::cmp::Reverse(entry)) = self.timers.peek() {
            if entry.expire_at_us > ctx.now_us {
                break;
            }
            self.timers.pop();
            self.complete_task(entry.task_id, true, None, ctx);
            bus::log_sleep_finished(ctx, &self.bus_address, entry.task_id);
        }
    }

    /// Route a completion to whichever executor's active coroutine owns
    /// the task.
    fn complete_task(
        &mut self,
        task_id: UniqueId,
        success: bool,
        reply: Option<Message>,
        _ctx: &mut EngineCtx,
    ) {
        let Some(executor) = self.executor.by_task_mut(task_id) else {
            tracing::debug!(agent = %self.handle, %task_id,
                "Task completion with no matching executor, ignoring");
            return;
        };
        if let Some(reply) = reply {
            executor.goal_mut().context_mut().add_action_reply(reply);
        }
        if let Some(plan) = executor.current_plan_mut() {
            plan.on_task_complete(task_id, success);
        }
    }

    /// Desires whose drop condition holds are dropped, persistent or not:
    /// the goal itself asked to go.
    fn check_desire_drop_conditions(&mut self) {
        let mut to_drop = Vec::new();
        for desire in &self.desires {
            if desire.should_drop() {
                to_drop.push(desire.handle().clone());
            }
        }
        for handle in to_drop {
            tracing::debug!(agent = %self.handle, goal = %handle, "Goal drop condition holds");
            self.drop_with_mode(handle, DropMode::Force, "drop condition held");
        }
    }

    /// Pursue the maintenance goal mapped to any currently violated
    /// resource, unless it is already desired.
    fn check_maintenance_goals(&mut self) {
        let mut violated = Vec::new();
        self.context.has_resource_violation(Some(&mut violated));
        for resource in violated {
            let Some(goal) = self.resources_to_goals.get(&resource).cloned() else {
                continue;
            };
            if self.desires.iter().any(|d| d.name() == goal) {
                continue;
            }
            tracing::debug!(agent = %self.handle, resource = %resource, goal = %goal,
                "Resource violated, pursuing maintenance goal");
            self.pursue(&goal, false, None);
        }
    }

    // ------------------------------------------------------------------
    // Event handling
    // ------------------------------------------------------------------

    fn handle_event(&mut self, event: Event, ctx: &mut EngineCtx) {
        match event.body {
            EventBody::Control { command } => self.handle_control(command),
            EventBody::Percept { schema, field } => {
                match self.context.message(&schema) {
                    Some(message) => {
                        if let Err(err) = message.write().set_field(&field.name, field.value) {
                            tracing::warn!(agent = %self.handle, schema = %schema,
                                field = %field.name, %err, "Percept rejected");
                            return;
                        }
                    }
                    None => {
                        tracing::warn!(agent = %self.handle, schema = %schema,
                            "Percept for unknown belief");
                        return;
                    }
                }
                self.beliefs_dirty.insert(schema);
                self.schedule_dirty |= dirty::PERCEPT;
            }
            EventBody::Message { message } => {
                let schema = message.schema().to_string();
                self.context.add_message(message.clone());
                if let Some(handler) = self.message_handlers.get(&schema).cloned() {
                    handler(self, &message);
                }
                self.beliefs_dirty.insert(schema);
                self.schedule_dirty |= dirty::MESSAGE;
            }
            EventBody::Pursue {
                goal,
                goal_id,
                persistent,
                parameters,
                parent,
                promise,
            } => self.handle_pursue(goal, goal_id, persistent, parameters, parent, promise, ctx),
            EventBody::Drop { goal, mode, reason } => self.handle_drop(goal, mode, &reason, ctx),
            EventBody::Delegation {
                goal,
                goal_id,
                parameters,
                analyse,
                status,
                team,
                team_schedule_id,
            } => self.handle_delegation(
                goal,
                goal_id,
                parameters,
                analyse,
                status,
                team,
                team_schedule_id,
                ctx,
            ),
            EventBody::AuctionBid {
                goal,
                score,
                bidder,
                schedule_id,
            } => {
                if let Some(team) = &mut self.team {
                    team.record_bid(&goal, bidder, score, schedule_id);
                } else {
                    tracing::debug!(agent = %self.handle, goal = %goal,
                        "Auction bid on a non-team agent, ignoring");
                }
            }
            EventBody::Action(action) => self.handle_action(action, ctx),
            EventBody::ActionComplete(complete) => {
                bus::log_action_finished(ctx, &self.bus_address, &complete);
                self.complete_task(complete.task_id, complete.success, complete.reply, ctx);
            }
            EventBody::Timer {
                expire_at_us,
                task_id,
            } => {
                self.timers.push(std::cmp::Reverse(TimerEntry {
                    expire_at_us,
                    task_id,
                }));
            }
            EventBody::ShareBeliefSet {
                member,
                message,
                last_updated_us,
            } => {
                if let Some(team) = &mut self.team {
                    team.store_shared_beliefs(member, message, last_updated_us);
                }
            }
        }
    }

    fn handle_control(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::Start => {
                self.state = EntityState::Running;
                self.schedule_dirty |= dirty::AGENT_STARTED;
                if !self.started_once {
                    self.started_once = true;
                    for goal in self.initial_desires.clone() {
                        self.pursue(&goal, false, None);
                    }
                }
                tracing::info!(agent = %self.handle, "Agent started");
            }
            ControlCommand::Pause => {
                self.state = EntityState::Paused;
            }
            ControlCommand::Stop => {
                if self.state == EntityState::Stopped {
                    return;
                }
                self.state = EntityState::Stopping;
                for desire in &self.desires {
                    let handle = desire.handle().clone();
                    let event = Event::new(
                        self.handle.clone(),
                        self.handle.clone(),
                        EventBody::Drop {
                            goal: handle,
                            mode: DropMode::Force,
                            reason: "agent stopping".to_string(),
                        },
                    );
                    self.queue_handle.push(event);
                }
                tracing::info!(agent = %self.handle, "Agent stopping");
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_pursue(
        &mut self,
        goal: String,
        goal_id: UniqueId,
        persistent: bool,
        parameters: Option<Message>,
        parent: Option<SubGoalParent>,
        promise: Option<GoalPromise>,
        ctx: &mut EngineCtx,
    ) {
        if !matches!(self.state, EntityState::Running | EntityState::Paused) {
            tracing::warn!(agent = %self.handle, goal = %goal,
                "Pursue ignored, agent is not running");
            if let Some(promise) = promise {
                promise.fulfill(FinishState::Dropped);
            }
            return;
        }
        if goal_id.valid() && self.desires.iter().any(|d| d.id() == goal_id) {
            tracing::debug!(agent = %self.handle, goal = %goal,
                "Pursue of an already-desired goal id, ignoring");
            return;
        }
        let Some(template) = ctx.registry.goals.get(&goal) else {
            tracing::warn!(agent = %self.handle, goal = %goal, "Pursue of unknown goal");
            if let Some(promise) = promise {
                promise.fulfill(FinishState::Failed);
            }
            return;
        };

        let mut desire = template.instantiate();
        if goal_id.valid() {
            desire.set_id(goal_id);
        }
        desire.set_persistent(persistent);
        let agent_context = self.context.clone();
        desire
            .context_mut()
            .set_agent_context(&agent_context, self.handle.clone());

        // Bind the pursue parameter message per the goal's schema.
        let goal_message = match desire.message_schema() {
            Some(schema_name) => match ctx.registry.message_schemas.get(schema_name) {
                Some(schema) => {
                    let mut message = match schema.instantiate() {
                        Ok(message) => message,
                        Err(err) => {
                            tracing::warn!(agent = %self.handle, goal = %goal, %err,
                                "Failed to instantiate goal message");
                            if let Some(promise) = promise {
                                promise.fulfill(FinishState::Failed);
                            }
                            return;
                        }
                    };
                    if let Some(parameters) = &parameters {
                        message.merge_from(parameters);
                    }
                    Some(message)
                }
                None => {
                    tracing::warn!(agent = %self.handle, goal = %goal, schema = %schema_name,
                        "Goal requires a message schema that is not committed");
                    if let Some(promise) = promise {
                        promise.fulfill(FinishState::Failed);
                    }
                    return;
                }
            },
            None => {
                if parameters.is_some() {
                    tracing::warn!(agent = %self.handle, goal = %goal,
                        "Pursue parameters given but the goal has no message schema");
                }
                None
            }
        };
        desire.context_mut().set_goal_message(goal_message);

        if let Some(parent) = &parent {
            desire.set_parent(Some(GoalParent {
                handle: parent.desire.clone(),
                plan_task_id: parent.plan_task_id,
            }));
            if let Some(parent_executor) = self.executor.by_id_mut(parent.executor_id) {
                parent_executor.add_sub_goal_desire_id(desire.id());
            }
            bus::log_sub_goal_started(ctx, &self.bus_address, desire.handle(), parent);
        } else {
            bus::log_goal_started(ctx, &self.bus_address, desire.handle());
        }

        tracing::debug!(agent = %self.handle, goal = %desire.handle(), persistent,
            "Desire added");
        if let Some(promise) = promise {
            self.promises.insert(desire.id(), promise);
        }
        self.desires.push(desire);
        self.schedule_dirty |= dirty::GOAL_ADDED;
    }

    fn handle_drop(&mut self, goal: GoalHandle, mode: DropMode, reason: &str, ctx: &mut EngineCtx) {
        // Resolve by id, falling back to name for handle-less drops.
        let desire = if goal.id.valid() {
            self.desires.iter().find(|d| d.id() == goal.id)
        } else {
            self.desires.iter().find(|d| d.name() == goal.name)
        };
        // Dropping a desire that does not exist is idempotent.
        let Some(desire) = desire else {
            tracing::debug!(agent = %self.handle, goal = %goal, "Drop of non-existent desire");
            return;
        };
        if mode == DropMode::Normal && desire.is_persistent() {
            tracing::debug!(agent = %self.handle, goal = %goal,
                "Normal drop ignored on persistent desire");
            return;
        }

        let desire_id = desire.id();
        match self.executor.by_desire_mut(desire_id) {
            Some(executor) => executor.drop_intention(mode, reason),
            None => {
                // Never scheduled; conclude immediately.
                self.finish_desire(desire_id, FinishState::Dropped, ctx);
            }
        }
    }

    /// Remove a desire and fan its conclusion out: promise, parent
    /// sub-goal task, delegating team, schedule dirtiness.
    fn finish_desire(&mut self, desire_id: UniqueId, result: FinishState, ctx: &mut EngineCtx) {
        let Some(position) = self.desires.iter().position(|d| d.id() == desire_id) else {
            return;
        };
        let desire = self.desires.remove(position);
        self.executor.remove_by_desire(desire_id);
        self.schedule_dirty |= dirty::GOAL_REMOVED;

        if let Some(promise) = self.promises.remove(&desire_id) {
            promise.fulfill(result);
        }

        if let Some(parent) = desire.parent() {
            // Wake the pursuing task in the parent intention.
            let event = Event::new(
                self.handle.clone(),
                self.handle.clone(),
                EventBody::ActionComplete(ActionCompleteEvent {
                    name: desire.name().to_string(),
                    task_id: parent.plan_task_id,
                    intention_id: UniqueId::INVALID,
                    success: result == FinishState::Success,
                    reply: None,
                    resource_locks: Vec::new(),
                }),
            );
            self.queue_handle.push(event);
            bus::log_sub_goal_finished(ctx, &self.bus_address, desire.handle(), result);
        } else {
            bus::log_goal_finished(ctx, &self.bus_address, desire.handle(), result);
        }

        if let Some(team) = self.delegations_in_progress.remove(&desire_id) {
            let status = if result == FinishState::Success {
                DelegationStatus::Success
            } else {
                DelegationStatus::Failed
            };
            let event = Event::new(
                self.handle.clone(),
                team,
                EventBody::Delegation {
                    goal: desire.name().to_string(),
                    goal_id: desire_id,
                    parameters: None,
                    analyse: false,
                    status,
                    team: self.handle.clone(),
                    team_schedule_id: 0,
                },
            );
            ctx.router.route(event);
        }

        tracing::debug!(agent = %self.handle, goal = %desire.handle(), ?result,
            "Desire concluded");
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_delegation(
        &mut self,
        goal: String,
        goal_id: UniqueId,
        parameters: Option<Message>,
        analyse: bool,
        status: DelegationStatus,
        team: AgentHandle,
        team_schedule_id: u64,
        ctx: &mut EngineCtx,
    ) {
        match status {
            DelegationStatus::Pending => {
                if analyse {
                    self.analyse_delegation(&goal, parameters, team, team_schedule_id, ctx);
                } else {
                    // Execute on behalf of the team.
                    tracing::debug!(agent = %self.handle, goal = %goal, team = %team,
                        "Executing delegated goal");
                    self.delegations_in_progress.insert(goal_id, team);
                    let promise = GoalPromise::new();
                    let event = Event::new(
                        self.handle.clone(),
                        self.handle.clone(),
                        EventBody::Pursue {
                            goal,
                            goal_id,
                            persistent: false,
                            parameters,
                            parent: None,
                            promise: Some(promise),
                        },
                    );
                    self.queue_handle.push(event);
                }
            }
            DelegationStatus::Success | DelegationStatus::Failed => {
                // Response from our delegate about a goal we handed out.
                let result = if status == DelegationStatus::Success {
                    FinishState::Success
                } else {
                    FinishState::Failed
                };
                match self.executor.by_desire_mut(goal_id) {
                    Some(executor) if executor.is_delegated() => {
                        executor.on_delegation_done(result);
                        if result == FinishState::Failed {
                            self.schedule_dirty |= dirty::FORCE;
                        }
                    }
                    _ => {
                        tracing::debug!(agent = %self.handle, goal = %goal,
                            "Delegation result with no matching delegated intention");
                    }
                }
            }
        }
    }

    /// Cost an incoming delegation request with a one-goal schedule; the
    /// bid is returned to the team when it completes.
    fn analyse_delegation(
        &mut self,
        goal: &str,
        parameters: Option<Message>,
        team: AgentHandle,
        team_schedule_id: u64,
        ctx: &mut EngineCtx,
    ) {
        let Some(template) = ctx.registry.goals.get(goal) else {
            tracing::warn!(agent = %self.handle, goal = %goal,
                "Delegation analyse for unknown goal");
            return;
        };
        let mut instance = template.instantiate();
        let agent_context = self.context.clone();
        instance
            .context_mut()
            .set_agent_context(&agent_context, self.handle.clone());
        instance.context_mut().set_goal_message(parameters);

        let candidates = self.plan_candidates(&instance, ctx);
        self.schedule_id_counter += 1;
        let schedule = Schedule::new(
            self.schedule_id_counter,
            self.context.clone(),
            vec![PlannerGoal {
                goal: instance,
                candidates,
                can_delegate: false,
                can_be_planned: true,
            }],
            Some((team, team_schedule_id)),
        );
        self.delegation_backlog.push(schedule);
    }

    fn handle_action(&mut self, action: ActionEvent, ctx: &mut EngineCtx) {
        let name = action.name.clone();
        if let Some(handler) = self.action_handlers.get(&name).cloned() {
            let handle = action.handle.clone();
            let request = action.request.clone();
            let mut reply = action.reply.clone();
            self.pending_actions.insert(handle.id, action);
            let status = handler(self, &request, &mut reply, &handle);
            match status {
                EventStatus::Success => {
                    let reply = reply.valid().then_some(reply);
                    self.finish_action_handle(&handle, true, reply);
                }
                EventStatus::Fail => {
                    let reply = reply.valid().then_some(reply);
                    self.finish_action_handle(&handle, false, reply);
                }
                EventStatus::Pending => {
                    // The handler completes later via the action handle.
                }
            }
            return;
        }

        // No handler on the agent: forward to the first attached,
        // available service that can handle it; optionally fall back to
        // any committed service.
        let attached = self.attached_services.clone();
        let target = ctx
            .services
            .iter()
            .find(|s| attached.contains(&s.handle) && s.available && s.actions.contains(&name))
            .or_else(|| {
                if ctx.settings.unhandled_actions_forwarded_to_first_applicable_service {
                    ctx.services
                        .iter()
                        .find(|s| s.available && s.actions.contains(&name))
                } else {
                    None
                }
            });

        match target {
            Some(service) => {
                tracing::debug!(agent = %self.handle, action = %name,
                    service = %service.handle, "Forwarding action to service");
                let event = Event::new(
                    self.handle.clone(),
                    service.handle.clone(),
                    EventBody::Action(action),
                );
                ctx.router.route(event);
            }
            None => {
                tracing::warn!(agent = %self.handle, action = %name,
                    "Action has no handler, failing");
                let complete = Event::new(
                    self.handle.clone(),
                    action.caller.clone(),
                    EventBody::ActionComplete(ActionCompleteEvent {
                        name,
                        task_id: action.task_id,
                        intention_id: action.intention_id,
                        success: false,
                        reply: None,
                        resource_locks: action.resource_locks,
                    }),
                );
                ctx.router.route(complete);
            }
        }
    }

    // ------------------------------------------------------------------
    // Planning
    // ------------------------------------------------------------------

    fn step_schedule(&mut self, ctx: &mut EngineCtx) {
        let schedule_finished = self
            .schedule
            .as_ref()
            .map(|s| s.is_finished())
            .unwrap_or(true);
        let needs_replacement = self.schedule_dirty != dirty::NONE
            && (self.schedule_dirty & dirty::IMMEDIATE != 0 || schedule_finished);

        if needs_replacement && !self.desires.is_empty() {
            let schedule = self.generate_schedule(ctx);
            self.schedule = Some(schedule);
            self.schedule_dirty = dirty::NONE;
        } else if needs_replacement {
            self.schedule = None;
            self.schedule_dirty = dirty::NONE;
            self.executor.bind_chain(Vec::new());
        }

        let mut auction_requests = Vec::new();
        let mut just_finished = false;
        if let Some(schedule) = self.schedule.as_mut() {
            if !schedule.is_finished() {
                let tick = schedule.tick();
                auction_requests = tick.auction_requests;
                just_finished = schedule.is_finished();
            }
        }
        for goal_index in auction_requests {
            self.start_auction(goal_index, ctx);
        }
        if just_finished {
            self.on_schedule_end(ctx);
        }
    }

    fn generate_schedule(&mut self, ctx: &mut EngineCtx) -> Schedule {
        let mut planner_goals = Vec::new();
        for desire in &self.desires {
            if desire.finish_state().is_terminal() {
                continue;
            }
            let candidates = self.plan_candidates(desire, ctx);
            let can_delegate = match &self.team {
                Some(team) => !team
                    .delegates_for(desire.name(), ctx, &self.current_goal_support(ctx))
                    .is_empty(),
                None => false,
            };
            planner_goals.push(PlannerGoal {
                goal: desire.clone(),
                candidates,
                can_delegate,
                can_be_planned: true,
            });
        }
        self.schedule_id_counter += 1;
        tracing::debug!(agent = %self.handle, schedule = self.schedule_id_counter,
            goals = planner_goals.len(), "Generating schedule");
        Schedule::new(
            self.schedule_id_counter,
            self.context.clone(),
            planner_goals,
            None,
        )
    }

    /// Map of goal name to the roles supporting it, resolved once per
    /// schedule generation.
    fn current_goal_support(&self, ctx: &EngineCtx) -> HashMap<String, Vec<String>> {
        let mut support: HashMap<String, Vec<String>> = HashMap::new();
        for role in ctx.registry.roles.values() {
            for goal in &role.goals {
                support
                    .entry(goal.clone())
                    .or_default()
                    .push(role.name.clone());
            }
        }
        support
    }

    /// Applicable plan instances for a desire under the active tactic and
    /// the desire's plan-selection state.
    fn plan_candidates(&self, desire: &Goal, ctx: &EngineCtx) -> Vec<PlanCandidate> {
        let registry = ctx.registry;
        let tactic = self.current_tactic(registry, desire.name());
        let names = self.tactic_plan_names(registry, desire.name());
        let selection = &desire.plan_selection;

        let chosen: Vec<String> = match tactic.plan_order {
            PlanOrder::Strict if tactic.is_using_plan_list() && !tactic.plans.is_empty() => {
                let index = selection.plan_list_index as usize % tactic.plans.len();
                vec![tactic.plans[index].clone()]
            }
            PlanOrder::ExcludePlanAfterAttempt => names
                .into_iter()
                .filter(|name| {
                    selection
                        .find_history(name)
                        .map(|h| h.last_loop_iteration != selection.plan_loop_iteration)
                        .unwrap_or(true)
                })
                .collect(),
            _ => names,
        };

        chosen
            .iter()
            .filter_map(|name| registry.plans.get(name))
            .map(|template| PlanCandidate {
                plan: template.instantiate(),
                service_unavailable: self.plan_needs_unavailable_service(template, ctx),
            })
            .collect()
    }

    /// True when an action in the plan body has no reachable handler:
    /// not on the agent, not on an attached available service, and not —
    /// when the engine setting allows it — on any committed service.
    fn plan_needs_unavailable_service(&self, plan: &Plan, ctx: &EngineCtx) -> bool {
        plan.body().tasks().iter().any(|task| {
            let volition_bdi::TaskKind::Action { name } = &task.kind else {
                return false;
            };
            if self.action_handlers.contains_key(name) {
                return false;
            }
            let attached_ok = ctx.services.iter().any(|s| {
                self.attached_services.contains(&s.handle)
                    && s.available
                    && s.actions.contains(name)
            });
            if attached_ok {
                return false;
            }
            if ctx.settings.unhandled_actions_forwarded_to_first_applicable_service {
                let global_ok = ctx
                    .services
                    .iter()
                    .any(|s| s.available && s.actions.contains(name));
                if global_ok {
                    return false;
                }
            }
            true
        })
    }

    fn start_auction(&mut self, goal_index: usize, ctx: &mut EngineCtx) {
        let (schedule_id, goal_handle, goal_name, parameters) = {
            let Some(schedule) = self.schedule.as_ref() else {
                return;
            };
            let goal = &schedule.goals()[goal_index].goal;
            (
                schedule.id(),
                goal.handle().clone(),
                goal.name().to_string(),
                goal.context().goal_message().map(|m| m.read().clone()),
            )
        };

        let support = self.current_goal_support(ctx);
        let delegates = match &self.team {
            Some(team) => team.delegates_for(&goal_name, ctx, &support),
            None => Vec::new(),
        };
        if delegates.is_empty() {
            tracing::warn!(agent = %self.handle, goal = %goal_handle,
                "Auction cancelled, no delegates available");
            if let Some(schedule) = self.schedule.as_mut() {
                schedule.cancel_auction(goal_index);
            }
            return;
        }

        let team = self.team.as_mut().expect("delegates imply a team");
        team.open_auction(
            goal_handle.clone(),
            goal_index,
            schedule_id,
            delegates.len(),
            ctx.now_us + ctx.settings.auction_timeout_us,
        );
        tracing::debug!(team = %self.handle, goal = %goal_handle,
            delegates = delegates.len(), "Auction started");

        for delegate in delegates {
            let event = Event::new(
                self.handle.clone(),
                delegate,
                EventBody::Delegation {
                    goal: goal_name.clone(),
                    goal_id: goal_handle.id,
                    parameters: parameters.clone(),
                    analyse: true,
                    status: DelegationStatus::Pending,
                    team: self.handle.clone(),
                    team_schedule_id: schedule_id,
                },
            );
            ctx.router.route(event);
        }
    }

    /// Advance the single-goal schedules costing incoming delegation
    /// requests; reply with a bid when each completes.
    fn step_delegation_backlog(&mut self, ctx: &mut EngineCtx) {
        let mut finished = Vec::new();
        for (index, schedule) in self.delegation_backlog.iter_mut().enumerate() {
            if schedule.is_finished() {
                finished.push(index);
                continue;
            }
            let tick = schedule.tick();
            // Nested delegation auctions are not run while costing a
            // delegation for another team.
            for goal_index in tick.auction_requests {
                schedule.cancel_auction(goal_index);
            }
            if schedule.is_finished() {
                finished.push(index);
            }
        }
        for index in finished.into_iter().rev() {
            let schedule = self.delegation_backlog.remove(index);
            let Some((delegator, delegator_schedule_id)) = schedule.delegator.clone() else {
                continue;
            };
            let goal = schedule.goals().first().map(|g| g.goal.handle().clone());
            let Some(goal) = goal else { continue };
            let score = schedule.best_cost();
            tracing::debug!(agent = %self.handle, goal = %goal, score,
                team = %delegator, "Returning auction bid");
            let event = Event::new(
                self.handle.clone(),
                delegator,
                EventBody::AuctionBid {
                    goal,
                    score,
                    bidder: self.handle.clone(),
                    schedule_id: delegator_schedule_id,
                },
            );
            ctx.router.route(event);
        }
    }

    fn on_schedule_end(&mut self, ctx: &mut EngineCtx) {
        let Some(schedule) = self.schedule.as_ref() else {
            return;
        };
        let chain = schedule.best_chain();
        tracing::debug!(agent = %self.handle, schedule = schedule.id(),
            chain = chain.len(), "Schedule complete, binding intention DAG");

        // Preserved work-around: goals the planner proved structurally
        // unachievable are removed after scheduling; persistent desires
        // stay and are retried on the next dirty tick.
        let unachievable: Vec<UniqueId> = schedule
            .unachievable_goals()
            .iter()
            .map(|g| g.goal.id())
            .collect();

        self.executor.bind_chain(chain);

        for desire_id in unachievable {
            let persistent = self
                .desire(desire_id)
                .map(|d| d.is_persistent())
                .unwrap_or(false);
            if persistent {
                continue;
            }
            if self.desire(desire_id).is_some() {
                tracing::warn!(agent = %self.handle, desire = %desire_id,
                    "Goal cannot be planned or delegated, failing it");
                self.finish_desire(desire_id, FinishState::Failed, ctx);
            }
        }
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    fn step_executors(&mut self, ctx: &mut EngineCtx) {
        self.stage_open_nodes(ctx);

        // One execute() per desire per tick, in open-node order. Dropping
        // executors still make progress when the DAG no longer schedules
        // them, so force drops always run to conclusion.
        let mut order: Vec<UniqueId> = Vec::new();
        for node_index in self.executor.dag.open_nodes() {
            let desire_id = self.executor.dag.node(node_index).entry.desire.id;
            if !order.contains(&desire_id) {
                order.push(desire_id);
            }
        }
        for executor in self.executor.executors() {
            let desire_id = executor.desire_handle().id;
            if executor.is_dropping() && !order.contains(&desire_id) {
                order.push(desire_id);
            }
        }

        let mut batches = Vec::new();
        for desire_id in order {
            let Some(desire_name) = self.desire(desire_id).map(|d| d.name().to_string()) else {
                continue;
            };
            let tactic = self.current_tactic(ctx.registry, &desire_name);
            let tactic_plans = self.tactic_plan_names(ctx.registry, &desire_name);

            let desires = &mut self.desires;
            let Some(executor) = self.executor.by_desire_mut(desire_id) else {
                continue;
            };
            let mut host = ExecutorHost {
                desires,
                tactic: &tactic,
                tactic_plans: &tactic_plans,
            };
            let step = executor.execute(&mut host);

            let meta = EffectMeta {
                executor_id: executor.id(),
                desire: executor.desire_handle().clone(),
                intention_id: executor.intention_id(),
                plan: executor
                    .current_plan_name()
                    .unwrap_or_default()
                    .to_string(),
                resource_locks: executor
                    .current_plan()
                    .map(|p| p.resource_locks().to_vec())
                    .unwrap_or_default(),
                context: executor.goal().context().clone(),
            };
            batches.push((meta, step));
        }

        for (meta, step) in batches {
            for note in &step.notes {
                match note {
                    ExecutorNote::IntentionStarted { plan } => {
                        bus::log_intention_started(ctx, &self.bus_address, &meta.desire, meta.intention_id, plan);
                    }
                    ExecutorNote::IntentionFinished { plan, result } => {
                        bus::log_intention_finished(
                            ctx,
                            &self.bus_address,
                            &meta.desire,
                            meta.intention_id,
                            plan,
                            *result,
                        );
                    }
                    ExecutorNote::Reschedule => {
                        self.schedule_dirty |= dirty::FORCE;
                    }
                    ExecutorNote::GoalConcluded { .. } => {
                        // Handled in conclude_finished.
                    }
                }
            }
            for effect in step.effects {
                self.apply_task_effect(effect, &meta, ctx);
            }
        }

        self.close_completed_nodes();
    }

    /// Make sure every open DAG node has an executor with its intention
    /// staged; dispatch delegation nodes to their delegates.
    fn stage_open_nodes(&mut self, ctx: &mut EngineCtx) {
        for node_index in self.executor.dag.open_nodes() {
            let node = self.executor.dag.node(node_index);
            if node.active {
                continue;
            }
            let entry = node.entry.clone();
            let Some(desire) = self.desires.iter().find(|d| d.id() == entry.desire.id) else {
                self.executor.dag.close(node_index);
                continue;
            };

            if self.executor.by_desire(entry.desire.id).is_none() {
                let mut executor = IntentionExecutor::new(desire, entry.is_delegation());
                let agent_context = self.context.clone();
                let goal_message = desire.context().goal_message().map(|m| m.read().clone());
                executor
                    .goal_mut()
                    .context_mut()
                    .set_agent_context(&agent_context, self.handle.clone());
                executor.goal_mut().context_mut().set_goal_message(goal_message);
                self.executor.add_executor(executor);
            }

            if entry.is_delegation() {
                let Some(delegate) = entry.delegate.clone() else {
                    self.executor.dag.close(node_index);
                    continue;
                };
                // A rebind after rescheduling must not re-dispatch a
                // delegation already in flight with the same delegate.
                let already_dispatched = self
                    .executor
                    .by_desire(entry.desire.id)
                    .map(|e| e.is_delegated() && e.delegate() == Some(&delegate))
                    .unwrap_or(false);
                if let Some(executor) = self.executor.by_desire_mut(entry.desire.id) {
                    executor.set_delegate(delegate.clone());
                }
                if !already_dispatched {
                    self.dispatch_delegation(&entry.desire, &delegate, ctx);
                }
                self.executor.dag.node_mut(node_index).active = true;
                continue;
            }

            let plan_name = entry.plan.clone().expect("non-delegation entry has a plan");
            let executor = self
                .executor
                .by_desire_mut(entry.desire.id)
                .expect("executor created above");
            if executor.is_concluded() {
                continue;
            }
            let already_running = executor.current_plan_name() == Some(plan_name.as_str())
                || executor.target_plan_name() == Some(plan_name.as_str());
            if already_running {
                self.executor.dag.node_mut(node_index).active = true;
                continue;
            }
            if let Some(template) = ctx.registry.plans.get(&plan_name) {
                executor.set_plan(template.instantiate());
                self.executor.dag.node_mut(node_index).active = true;
            } else {
                tracing::warn!(agent = %self.handle, plan = %plan_name,
                    "Scheduled plan is not committed, closing node");
                self.executor.dag.close(node_index);
            }
        }
    }

    /// Hand a goal to the chosen delegate and belt-and-braces drop it
    /// from every other candidate member.
    fn dispatch_delegation(&mut self, goal: &GoalHandle, delegate: &AgentHandle, ctx: &mut EngineCtx) {
        let parameters = self
            .desire(goal.id)
            .and_then(|d| d.context().goal_message())
            .map(|m| m.read().clone());
        let schedule_id = self.schedule.as_ref().map(|s| s.id()).unwrap_or(0);
        tracing::debug!(team = %self.handle, goal = %goal, delegate = %delegate,
            "Goal delegated");
        let event = Event::new(
            self.handle.clone(),
            delegate.clone(),
            EventBody::Delegation {
                goal: goal.name.clone(),
                goal_id: goal.id,
                parameters,
                analyse: false,
                status: DelegationStatus::Pending,
                team: self.handle.clone(),
                team_schedule_id: schedule_id,
            },
        );
        ctx.router.route(event);

        if let Some(team) = &self.team {
            for member in team.members() {
                if member == delegate {
                    continue;
                }
                let drop = Event::new(
                    self.handle.clone(),
                    member.clone(),
                    EventBody::Drop {
                        goal: goal.clone(),
                        mode: DropMode::Force,
                        reason: "delegated to another member".to_string(),
                    },
                );
                ctx.router.route(drop);
            }
        }
    }

    fn close_completed_nodes(&mut self) {
        loop {
            let mut closed_any = false;
            for node_index in self.executor.dag.open_nodes() {
                let node = self.executor.dag.node(node_index);
                if !node.active {
                    continue;
                }
                let desire_id = node.entry.desire.id;
                let done = match self.executor.by_desire(desire_id) {
                    Some(executor) => executor.is_concluded() || executor.is_waiting_for_plan(),
                    None => true,
                };
                if done {
                    self.executor.dag.close(node_index);
                    closed_any = true;
                }
            }
            if !closed_any {
                break;
            }
        }
    }

    fn conclude_finished(&mut self, ctx: &mut EngineCtx) {
        for executor in self.executor.remove_concluded() {
            let desire_id = executor.desire_handle().id;
            let result = executor.goal().finish_state();
            let forced = matches!(executor.drop_request(), Some((DropMode::Force, _)));

            let Some(desire) = self.desire(desire_id) else {
                continue;
            };
            let persistent = desire.is_persistent();

            if persistent && !(forced && result == FinishState::Dropped) {
                // Persistent desires are re-attempted through success and
                // failure; fulfil the pursuer's promise on the first
                // conclusion only.
                if let Some(promise) = self.promises.remove(&desire_id) {
                    promise.fulfill(result);
                }
                tracing::debug!(agent = %self.handle, desire = %desire_id, ?result,
                    "Persistent desire re-attempted");
                self.schedule_dirty |= dirty::GOAL_ADDED | dirty::GOAL_REMOVED;
            } else {
                self.finish_desire(desire_id, result, ctx);
            }
        }
    }

    // ------------------------------------------------------------------
    // Task effects
    // ------------------------------------------------------------------

    fn apply_task_effect(&mut self, effect: TaskEffect, meta: &EffectMeta, ctx: &mut EngineCtx) {
        match effect {
            TaskEffect::EmitAction {
                task_id,
                action,
                wait: _,
                mappings,
                literals,
            } => {
                let Some(template) = ctx.registry.actions.get(&action) else {
                    tracing::warn!(agent = %self.handle, action = %action,
                        "Action task references an action that is missing");
                    self.queue_handle.push(Event::new(
                        self.handle.clone(),
                        self.handle.clone(),
                        EventBody::ActionComplete(ActionCompleteEvent {
                            name: action,
                            task_id,
                            intention_id: meta.intention_id,
                            success: false,
                            reply: None,
                            resource_locks: Vec::new(),
                        }),
                    ));
                    return;
                };

                let mut request = Message::default();
                if let Some(schema_name) = &template.request {
                    if let Some(schema) = ctx.registry.message_schemas.get(schema_name) {
                        match schema.instantiate() {
                            Ok(message) => {
                                request = message;
                                bind_message(
                                    &mut request,
                                    schema,
                                    &meta.context,
                                    &mappings,
                                    &literals,
                                );
                            }
                            Err(err) => {
                                tracing::warn!(agent = %self.handle, action = %action, %err,
                                    "Failed to build action request message");
                            }
                        }
                    }
                }
                let reply = template
                    .reply
                    .as_ref()
                    .and_then(|name| ctx.registry.message_schemas.get(name))
                    .and_then(|schema| schema.instantiate().ok())
                    .unwrap_or_default();

                bus::log_action_started(ctx, &self.bus_address, meta, &action, task_id);
                let event = Event::new(
                    self.handle.clone(),
                    self.handle.clone(),
                    EventBody::Action(ActionEvent {
                        name: action.clone(),
                        handle: ActionHandle::new(action, UniqueId::random()),
                        request,
                        reply,
                        task_id,
                        desire: meta.desire.clone(),
                        intention_id: meta.intention_id,
                        plan: meta.plan.clone(),
                        resource_locks: meta.resource_locks.clone(),
                        caller: self.handle.clone(),
                    }),
                );
                self.queue_handle.push(event);
            }
            TaskEffect::PursueSubGoal {
                task_id,
                goal,
                wait: _,
                mappings,
                literals,
            } => {
                let parameters = ctx
                    .registry
                    .goals
                    .get(&goal)
                    .and_then(|g| g.message_schema().map(|s| s.to_string()))
                    .and_then(|schema_name| ctx.registry.message_schemas.get(&schema_name))
                    .and_then(|schema| {
                        schema.instantiate().ok().map(|mut message| {
                            bind_message(&mut message, schema, &meta.context, &mappings, &literals);
                            message
                        })
                    });
                let promise = GoalPromise::new();
                let event = Event::new(
                    self.handle.clone(),
                    self.handle.clone(),
                    EventBody::Pursue {
                        goal,
                        goal_id: UniqueId::random(),
                        persistent: false,
                        parameters,
                        parent: Some(SubGoalParent {
                            desire: meta.desire.clone(),
                            plan_task_id: task_id,
                            executor_id: meta.executor_id,
                        }),
                        promise: Some(promise),
                    },
                );
                self.queue_handle.push(event);
            }
            TaskEffect::StartTimer {
                task_id,
                duration_ms,
            } => {
                bus::log_sleep_started(ctx, &self.bus_address, meta, task_id, duration_ms);
                self.timers.push(std::cmp::Reverse(TimerEntry {
                    expire_at_us: ctx.now_us + duration_ms * 1000,
                    task_id,
                }));
            }
            TaskEffect::DropGoal { goal, reason } => {
                self.queue_handle.push(Event::new(
                    self.handle.clone(),
                    self.handle.clone(),
                    EventBody::Drop {
                        goal,
                        mode: DropMode::Normal,
                        reason,
                    },
                ));
            }
            TaskEffect::ConditionEvaluated {
                task_id,
                label,
                success,
            } => {
                bus::log_condition(ctx, &self.bus_address, meta, task_id, &label, success);
            }
        }
    }

    // ------------------------------------------------------------------
    // Shared beliefs & proxies
    // ------------------------------------------------------------------

    /// Publish dirty belief messages to every team this agent belongs
    /// to, on the engine's share cadence.
    fn share_beliefs(&mut self, ctx: &mut EngineCtx) {
        if self.team_memberships.is_empty() || self.beliefs_dirty.is_empty() {
            return;
        }
        if ctx.now_us < self.last_share_us + ctx.settings.belief_share_period_us {
            return;
        }
        self.last_share_us = ctx.now_us;
        let dirty: Vec<String> = self.beliefs_dirty.drain().collect();
        for schema in dirty {
            let Some(message) = self.context.message(&schema) else {
                continue;
            };
            let message = message.read().clone();
            for team in &self.team_memberships {
                let event = Event::new(
                    self.handle.clone(),
                    team.clone(),
                    EventBody::ShareBeliefSet {
                        member: self.handle.clone(),
                        message: message.clone(),
                        last_updated_us: ctx.now_us,
                    },
                );
                ctx.router.route(event);
            }
        }
    }

    /// Proxy instances never execute locally: bus-forwardable events are
    /// serialized out to the connected node.
    fn forward_to_bus(&mut self, event: Event, ctx: &mut EngineCtx) {
        match &event.body {
            EventBody::Control { command } => {
                let command = *command;
                self.handle_control(command);
            }
            _ => match bus::to_wire(&event, ctx.node_address) {
                Some(wire) => ctx.bus_out.push(wire),
                None => {
                    tracing::debug!(agent = %self.handle,
                        "Dropping event that cannot be forwarded to the bus");
                }
            },
        }
    }
}

/// Execution context captured per executor tick, used when turning task
/// effects into events.
pub(crate) struct EffectMeta {
    pub executor_id: u64,
    pub desire: GoalHandle,
    pub intention_id: UniqueId,
    pub plan: String,
    pub resource_locks: Vec<String>,
    pub context: BeliefContext,
}
