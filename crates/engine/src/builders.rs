//! Fluent builders for every template kind. Templates are committed to
//! the engine by name; committing a pre-existing name overwrites.
//!
//! ```no_run
//! # use volition_engine::Engine;
//! let mut engine = Engine::new("node");
//! let beliefs = engine
//!     .message("Vehicle")
//!     .field_with_value("tasksCompleted", 0i32)
//!     .commit();
//! let goal = engine
//!     .goal("StartWorkGoal")
//!     .satisfied(|ctx| {
//!         ctx.get("tasksCompleted").and_then(|v| v.as_i32()).unwrap_or(0) >= 10
//!     })
//!     .commit();
//! ```

use volition_bdi::{
    BeliefContext, BeliefQuery, Coroutine, Goal, Heuristic, Plan, PlanOrder, Tactic, TaskKind,
    LOOP_PLANS_INFINITE,
};
use volition_core::{
    ActionHandle, AgentHandle, FieldKind, FieldValue, GoalHandle, Message, MessageSchema,
    Resource, ServiceHandle, TacticHandle, UniqueId,
};

use crate::agent::{Agent, AgentTemplate};
use crate::engine::{ActionTemplate, Engine, Role};
use crate::event::EventStatus;
use crate::service::{Service, ServiceTemplate};

impl Engine {
    pub fn message(&mut self, name: impl Into<String>) -> MessageBuilder<'_> {
        MessageBuilder {
            engine: self,
            schema: MessageSchema::new(name),
        }
    }

    pub fn action(&mut self, name: impl Into<String>) -> ActionBuilder<'_> {
        ActionBuilder {
            engine: self,
            template: ActionTemplate {
                name: name.into(),
                ..Default::default()
            },
        }
    }

    pub fn resource(&mut self, name: impl Into<String>) -> ResourceBuilder<'_> {
        ResourceBuilder {
            engine: self,
            name: name.into(),
            min: 0,
            max: 0,
        }
    }

    pub fn role(&mut self, name: impl Into<String>) -> RoleBuilder<'_> {
        RoleBuilder {
            engine: self,
            role: Role {
                name: name.into(),
                goals: Vec::new(),
            },
        }
    }

    pub fn goal(&mut self, name: impl Into<String>) -> GoalBuilder<'_> {
        GoalBuilder {
            engine: self,
            goal: Goal::new(name),
        }
    }

    pub fn plan(&mut self, name: impl Into<String>) -> PlanBuilder<'_> {
        PlanBuilder {
            engine: self,
            plan: Plan::new(name),
        }
    }

    pub fn tactic(&mut self, name: impl Into<String>) -> TacticBuilder<'_> {
        TacticBuilder {
            engine: self,
            tactic: Tactic {
                handle: TacticHandle::new(name, UniqueId::random()),
                loop_plans_count: LOOP_PLANS_INFINITE,
                ..Default::default()
            },
        }
    }

    pub fn coroutine(&self) -> CoroutineBuilder {
        CoroutineBuilder {
            coroutine: Coroutine::new(),
        }
    }

    pub(crate) fn agent_builder(&mut self, template_name: impl Into<String>) -> AgentBuilder<'_> {
        AgentBuilder {
            engine: self,
            template: AgentTemplate {
                name: template_name.into(),
                ..Default::default()
            },
        }
    }

    /// Starts an [`AgentBuilder`] for `name`, or (given an [`AgentHandle`])
    /// looks up the live [`Agent`] instance. See [`AgentArg`].
    pub fn agent<'e, A: AgentArg<'e>>(&'e mut self, name: A) -> A::Output {
        name.resolve_agent(self)
    }

    pub fn team(&mut self, template_name: impl Into<String>) -> AgentBuilder<'_> {
        let mut builder = self.agent_builder(template_name);
        builder.template.is_team = true;
        builder
    }

    pub(crate) fn service_builder(
        &mut self,
        template_name: impl Into<String>,
    ) -> ServiceBuilder<'_> {
        ServiceBuilder {
            engine: self,
            template: ServiceTemplate {
                name: template_name.into(),
                ..Default::default()
            },
        }
    }

    /// Starts a [`ServiceBuilder`] for `name`, or (given a [`ServiceHandle`])
    /// looks up the live [`Service`] instance. See [`ServiceArg`].
    pub fn service<'e, S: ServiceArg<'e>>(&'e mut self, name: S) -> S::Output {
        name.resolve_service(self)
    }
}

/// What `Engine::agent(..)` accepts: a template name to start building a
/// new agent template, or an [`AgentHandle`] to look up a live instance.
pub trait AgentArg<'e> {
    type Output;
    fn resolve_agent(self, engine: &'e mut Engine) -> Self::Output;
}

impl<'e> AgentArg<'e> for &AgentHandle {
    type Output = Option<&'e Agent>;
    fn resolve_agent(self, engine: &'e mut Engine) -> Self::Output {
        engine.agent_by_handle(self)
    }
}

impl<'e> AgentArg<'e> for &str {
    type Output = AgentBuilder<'e>;
    fn resolve_agent(self, engine: &'e mut Engine) -> Self::Output {
        engine.agent_builder(self)
    }
}

impl<'e> AgentArg<'e> for String {
    type Output = AgentBuilder<'e>;
    fn resolve_agent(self, engine: &'e mut Engine) -> Self::Output {
        engine.agent_builder(self)
    }
}

/// What `Engine::service(..)` accepts: a template name to start building a
/// new service template, or a [`ServiceHandle`] to look up a live instance.
pub trait ServiceArg<'e> {
    type Output;
    fn resolve_service(self, engine: &'e mut Engine) -> Self::Output;
}

impl<'e> ServiceArg<'e> for &ServiceHandle {
    type Output = Option<&'e Service>;
    fn resolve_service(self, engine: &'e mut Engine) -> Self::Output {
        engine.service_by_handle(self)
    }
}

impl<'e> ServiceArg<'e> for &str {
    type Output = ServiceBuilder<'e>;
    fn resolve_service(self, engine: &'e mut Engine) -> Self::Output {
        engine.service_builder(self)
    }
}

impl<'e> ServiceArg<'e> for String {
    type Output = ServiceBuilder<'e>;
    fn resolve_service(self, engine: &'e mut Engine) -> Self::Output {
        engine.service_builder(self)
    }
}

pub struct MessageBuilder<'a> {
    engine: &'a mut Engine,
    schema: MessageSchema,
}

impl MessageBuilder<'_> {
    pub fn field<T: FieldKind>(mut self, name: impl Into<String>) -> Self {
        self.schema = self.schema.with_field(name, T::TYPE_NAME);
        self
    }

    pub fn field_of_type(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.schema = self.schema.with_field(name, type_name.into());
        self
    }

    pub fn field_with_value(
        mut self,
        name: impl Into<String>,
        value: impl Into<FieldValue>,
    ) -> Self {
        self.schema = self.schema.with_field_value(name, value);
        self
    }

    /// Commit the schema to the engine; returns the schema name.
    pub fn commit(self) -> String {
        let name = self.schema.name.clone();
        if let Err(err) = self.engine.commit_message_schema(self.schema) {
            tracing::error!(%err, "Message schema not committed");
        }
        name
    }
}

pub struct ActionBuilder<'a> {
    engine: &'a mut Engine,
    template: ActionTemplate,
}

impl ActionBuilder<'_> {
    pub fn request(mut self, schema: impl Into<String>) -> Self {
        self.template.request = Some(schema.into());
        self
    }

    pub fn reply(mut self, schema: impl Into<String>) -> Self {
        self.template.reply = Some(schema.into());
        self
    }

    pub fn feedback(mut self, schema: impl Into<String>) -> Self {
        self.template.feedback = Some(schema.into());
        self
    }

    pub fn commit(self) -> String {
        let name = self.template.name.clone();
        if let Err(err) = self.engine.commit_action(self.template) {
            tracing::error!(%err, "Action not committed");
        }
        name
    }
}

pub struct ResourceBuilder<'a> {
    engine: &'a mut Engine,
    name: String,
    min: i64,
    max: i64,
}

impl ResourceBuilder<'_> {
    pub fn min(mut self, min: i64) -> Self {
        self.min = min;
        self
    }

    pub fn max(mut self, max: i64) -> Self {
        self.max = max;
        self
    }

    pub fn commit(self) -> String {
        let name = self.name.clone();
        let resource = Resource::new(&self.name, self.min, self.max);
        if let Err(err) = self.engine.commit_resource(resource) {
            tracing::error!(%err, "Resource not committed");
        }
        name
    }
}

pub struct RoleBuilder<'a> {
    engine: &'a mut Engine,
    role: Role,
}

impl RoleBuilder<'_> {
    pub fn goal(mut self, goal: impl Into<String>) -> Self {
        self.role.goals.push(goal.into());
        self
    }

    pub fn goals<I, S>(mut self, goals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.role.goals.extend(goals.into_iter().map(Into::into));
        self
    }

    pub fn commit(self) -> String {
        let name = self.role.name.clone();
        if let Err(err) = self.engine.commit_role(self.role) {
            tracing::error!(%err, "Role not committed");
        }
        name
    }
}

pub struct GoalBuilder<'a> {
    engine: &'a mut Engine,
    goal: Goal,
}

impl GoalBuilder<'_> {
    /// Schema of the message required to pursue this goal.
    pub fn message(mut self, schema: impl Into<String>) -> Self {
        self.goal.set_message_schema(Some(schema.into()));
        self
    }

    pub fn pre(
        mut self,
        func: impl Fn(&BeliefContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.goal.set_precondition(BeliefQuery::new(func));
        self
    }

    /// An achievement goal: re-attempted until this condition holds.
    pub fn satisfied(
        mut self,
        func: impl Fn(&BeliefContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.goal.set_satisfied(BeliefQuery::new(func));
        self
    }

    pub fn drop_when(
        mut self,
        func: impl Fn(&BeliefContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.goal.set_drop_when(BeliefQuery::new(func));
        self
    }

    pub fn heuristic(
        mut self,
        func: impl Fn(&BeliefContext) -> f32 + Send + Sync + 'static,
    ) -> Self {
        self.goal.set_heuristic(Heuristic::new(func));
        self
    }

    pub fn commit(self) -> String {
        let name = self.goal.name().to_string();
        if let Err(err) = self.engine.commit_goal(self.goal) {
            tracing::error!(%err, "Goal not committed");
        }
        name
    }
}

pub struct PlanBuilder<'a> {
    engine: &'a mut Engine,
    plan: Plan,
}

impl PlanBuilder<'_> {
    /// The goal this plan achieves.
    pub fn handles(mut self, goal: impl Into<String>) -> Self {
        self.plan.set_goal(goal);
        self
    }

    pub fn pre(
        mut self,
        func: impl Fn(&BeliefContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.plan.set_precondition(BeliefQuery::new(func));
        self
    }

    pub fn drop_when(
        mut self,
        func: impl Fn(&BeliefContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.plan.set_drop_when(BeliefQuery::new(func));
        self
    }

    /// Deterministic simulation of this plan's outcome; the scheduler
    /// applies it to cloned contexts while searching.
    pub fn effects(mut self, func: impl Fn(&mut BeliefContext) + Send + Sync + 'static) -> Self {
        self.plan.set_effects(func);
        self
    }

    /// A resource locked for the lifetime of the plan's execution.
    pub fn lock(mut self, resource: impl Into<String>) -> Self {
        let mut locks = self.plan.resource_locks().to_vec();
        locks.push(resource.into());
        self.plan.set_resource_locks(locks);
        self
    }

    pub fn body(mut self, body: CoroutineBuilder) -> Self {
        self.plan.set_body(body.build());
        self
    }

    pub fn on_drop(mut self, coroutine: CoroutineBuilder) -> Self {
        self.plan.set_drop_coroutine(coroutine.build());
        self
    }

    pub fn commit(self) -> String {
        let name = self.plan.name().to_string();
        if let Err(err) = self.engine.commit_plan(self.plan) {
            tracing::error!(%err, "Plan not committed");
        }
        name
    }
}

pub struct TacticBuilder<'a> {
    engine: &'a mut Engine,
    tactic: Tactic,
}

impl TacticBuilder<'_> {
    pub fn goal(mut self, goal: impl Into<String>) -> Self {
        self.tactic.goal = goal.into();
        self
    }

    /// Restrict the tactic to an explicit plan list.
    pub fn plans<I, S>(mut self, plans: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tactic.plans = plans.into_iter().map(Into::into).collect();
        self.tactic.use_plan_list = true;
        self
    }

    pub fn plan_order(mut self, order: PlanOrder) -> Self {
        self.tactic.plan_order = order;
        self
    }

    pub fn loop_plans(mut self, count: u32) -> Self {
        self.tactic.loop_plans_count = count;
        self
    }

    pub fn loop_plans_infinitely(mut self) -> Self {
        self.tactic.loop_plans_count = LOOP_PLANS_INFINITE;
        self
    }

    pub fn commit(self) -> String {
        let name = self.tactic.name().to_string();
        if let Err(err) = self.engine.commit_tactic(self.tactic) {
            tracing::error!(%err, "Tactic not committed");
        }
        name
    }
}

/// Builds a plan body or drop sequence: a task graph where each added
/// task chains onto the previous one's success edge by default.
pub struct CoroutineBuilder {
    coroutine: Coroutine,
}

impl Default for CoroutineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CoroutineBuilder {
    pub fn new() -> Self {
        Self {
            coroutine: Coroutine::new(),
        }
    }

    pub fn action(mut self, name: impl Into<String>) -> Self {
        self.coroutine
            .add_task(TaskKind::Action { name: name.into() }, UniqueId::random());
        self
    }

    /// Pursue a sub-goal and wait for it unless `nowait` follows.
    pub fn goal(mut self, name: impl Into<String>) -> Self {
        self.coroutine
            .add_task(TaskKind::Pursue { goal: name.into() }, UniqueId::random());
        self
    }

    pub fn sleep(mut self, duration_ms: u64) -> Self {
        self.coroutine
            .add_task(TaskKind::Sleep { duration_ms }, UniqueId::random());
        self
    }

    pub fn print(mut self, message: impl Into<String>) -> Self {
        self.coroutine.add_task(
            TaskKind::Print {
                message: message.into(),
            },
            UniqueId::random(),
        );
        self
    }

    pub fn cond(
        mut self,
        func: impl Fn(&BeliefContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.coroutine.add_task(
            TaskKind::Conditional {
                query: BeliefQuery::new(func),
            },
            UniqueId::random(),
        );
        self
    }

    pub fn yield_until(
        mut self,
        func: impl Fn(&BeliefContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.coroutine.add_task(
            TaskKind::YieldUntil {
                query: BeliefQuery::new(func),
            },
            UniqueId::random(),
        );
        self
    }

    pub fn drop_goal(mut self, goal: GoalHandle) -> Self {
        self.coroutine
            .add_task(TaskKind::Drop { goal }, UniqueId::random());
        self
    }

    /// Drop every desire of the named goal.
    pub fn drop_goal_by_name(self, name: impl Into<String>) -> Self {
        self.drop_goal(GoalHandle::new(name, UniqueId::INVALID))
    }

    /// Literal parameter on the task added last.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.coroutine.with_last_task(|t| t.literal(name, value));
        self
    }

    /// Bind a field of the last task's message from the belief context by
    /// the same name.
    pub fn param_from(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.coroutine.with_last_task(|t| t.param_from(name, ""));
        self
    }

    /// Bind `param` of the last task's message from a differently named
    /// context key.
    pub fn param_mapped(
        mut self,
        param: impl Into<String>,
        context_param: impl Into<String>,
    ) -> Self {
        self.coroutine
            .with_last_task(|t| t.param_from(param, context_param));
        self
    }

    /// The last task no longer blocks the coroutine; its completion is
    /// awaited before the plan can finish.
    pub fn nowait(mut self) -> Self {
        self.coroutine.with_last_task(|t| t.nowait());
        self
    }

    /// Label of the most recently added task, for explicit edges.
    pub fn label(&self) -> i32 {
        self.coroutine.tasks().len() as i32 - 1
    }

    pub const TERMINAL: i32 = volition_bdi::TERMINAL;

    pub fn success_edge(mut self, from: i32, to: i32) -> Self {
        self.coroutine.set_success_edge(from, to);
        self
    }

    pub fn fail_edge(mut self, from: i32, to: i32) -> Self {
        self.coroutine.set_fail_edge(from, to);
        self
    }

    pub fn build(self) -> Coroutine {
        self.coroutine
    }
}

pub struct AgentBuilder<'a> {
    engine: &'a mut Engine,
    template: AgentTemplate,
}

impl AgentBuilder<'_> {
    pub fn belief(mut self, schema: impl Into<String>) -> Self {
        self.template.beliefs.push(schema.into());
        self
    }

    pub fn beliefs<I, S>(mut self, schemas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.template
            .beliefs
            .extend(schemas.into_iter().map(Into::into));
        self
    }

    pub fn plans<I, S>(mut self, plans: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.template
            .plans
            .extend(plans.into_iter().map(Into::into));
        self
    }

    pub fn roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.template
            .roles
            .extend(roles.into_iter().map(Into::into));
        self
    }

    pub fn resources<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.template
            .resources
            .extend(resources.into_iter().map(Into::into));
        self
    }

    pub fn services<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.template
            .services
            .extend(services.into_iter().map(Into::into));
        self
    }

    /// Goals pursued automatically when the agent starts.
    pub fn desires<I, S>(mut self, goals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.template
            .initial_desires
            .extend(goals.into_iter().map(Into::into));
        self
    }

    pub fn tactics<I, S>(mut self, tactics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.template
            .tactics
            .extend(tactics.into_iter().map(Into::into));
        self
    }

    pub fn handle_action(
        mut self,
        name: impl Into<String>,
        func: impl Fn(&mut Agent, &Message, &mut Message, &ActionHandle) -> EventStatus
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.template
            .action_handlers
            .insert(name.into(), std::sync::Arc::new(func));
        self
    }

    pub fn handle_message(
        mut self,
        schema: impl Into<String>,
        func: impl Fn(&mut Agent, &Message) + Send + Sync + 'static,
    ) -> Self {
        self.template
            .message_handlers
            .insert(schema.into(), std::sync::Arc::new(func));
        self
    }

    /// Pursue `goal` whenever `resource` is violated.
    pub fn resource_to_goal(
        mut self,
        resource: impl Into<String>,
        goal: impl Into<String>,
    ) -> Self {
        self.template
            .resources_to_goals
            .insert(resource.into(), goal.into());
        self
    }

    pub fn commit(self) -> String {
        let name = self.template.name.clone();
        if let Err(err) = self.engine.commit_agent_template(self.template) {
            tracing::error!(%err, "Agent template not committed");
        }
        name
    }

    /// Commit the template and instantiate one agent from it.
    pub fn create(self, agent_name: &str) -> AgentHandle {
        let template_name = self.template.name.clone();
        let is_team = self.template.is_team;
        let engine = self.engine;
        if let Err(err) = engine.commit_agent_template(self.template) {
            tracing::error!(%err, "Agent template not committed");
        }
        let result = if is_team {
            engine.create_team(&template_name, agent_name)
        } else {
            engine.create_agent(&template_name, agent_name)
        };
        match result {
            Ok(handle) => handle,
            Err(err) => {
                tracing::error!(%err, "Agent instantiation failed");
                AgentHandle::default()
            }
        }
    }
}

pub struct ServiceBuilder<'a> {
    engine: &'a mut Engine,
    template: ServiceTemplate,
}

impl ServiceBuilder<'_> {
    pub fn handle_action(
        mut self,
        name: impl Into<String>,
        func: impl Fn(&mut Service, &Message, &mut Message, &ActionHandle) -> EventStatus
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.template
            .action_handlers
            .insert(name.into(), std::sync::Arc::new(func));
        self
    }

    pub fn messages<I, S>(mut self, schemas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.template
            .message_schemas
            .extend(schemas.into_iter().map(Into::into));
        self
    }

    pub fn commit(self) -> String {
        let name = self.template.name.clone();
        if let Err(err) = self.engine.commit_service_template(self.template) {
            tracing::error!(%err, "Service template not committed");
        }
        name
    }

    /// Commit the template and instantiate one service from it.
    pub fn create(self, service_name: &str) -> ServiceHandle {
        let template_name = self.template.name.clone();
        let engine = self.engine;
        if let Err(err) = engine.commit_service_template(self.template) {
            tracing::error!(%err, "Service template not committed");
        }
        match engine.create_service(&template_name, service_name, false) {
            Ok(handle) => handle,
            Err(err) => {
                tracing::error!(%err, "Service instantiation failed");
                ServiceHandle::default()
            }
        }
    }
}
