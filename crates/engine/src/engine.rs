use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use volition_bdi::{Goal, Plan, PlanOrder, Tactic, LOOP_PLANS_INFINITE};
use volition_core::protocol::{WireEvent, WireHeader, WirePayload};
use volition_core::{
    AgentHandle, BusAddress, EventType, MessageSchema, NodeType, Resource, ServiceHandle,
    TacticHandle, UniqueId,
};

use crate::agent::{Agent, AgentTemplate};
use crate::bus::BusAdapter;
use crate::dispatch::{EventQueue, Router};
use crate::error::{EngineError, Result};
use crate::event::{Event, EventBody};
use crate::service::{Service, ServiceTemplate};

/// An action template: the name agents invoke plus the message schemas
/// its request/reply/feedback payloads conform to.
#[derive(Debug, Clone, Default)]
pub struct ActionTemplate {
    pub name: String,
    pub request: Option<String>,
    pub reply: Option<String>,
    pub feedback: Option<String>,
}

/// A role names the goals its bearers support; teams use roles to pick
/// delegation candidates.
#[derive(Debug, Clone, Default)]
pub struct Role {
    pub name: String,
    pub goals: Vec<String>,
}

/// Committed templates, keyed by name. Committing over an existing name
/// overwrites.
#[derive(Default)]
pub struct Registry {
    pub message_schemas: HashMap<String, MessageSchema>,
    pub actions: HashMap<String, ActionTemplate>,
    pub goals: HashMap<String, Goal>,
    pub plans: HashMap<String, Plan>,
    pub tactics: HashMap<String, Tactic>,
    /// Default tactic per goal, created on goal commit.
    pub builtin_tactics: HashMap<String, String>,
    pub resources: HashMap<String, Resource>,
    pub roles: HashMap<String, Role>,
    pub agent_templates: HashMap<String, AgentTemplate>,
    pub service_templates: HashMap<String, ServiceTemplate>,
    /// Plans committed against each goal.
    pub goal_plans: HashMap<String, Vec<String>>,
}

impl Registry {
    pub fn builtin_tactic(&self, goal: &str) -> Option<&Tactic> {
        self.builtin_tactics
            .get(goal)
            .and_then(|name| self.tactics.get(name))
    }
}

/// Engine-wide configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// When an action is not handled by the agent or an attached
    /// service, allow forwarding it to the first committed service that
    /// can handle it.
    pub unhandled_actions_forwarded_to_first_applicable_service: bool,
    /// How long a delegation auction waits for bids against the internal
    /// clock.
    pub auction_timeout_us: u64,
    /// Cadence for publishing dirty beliefsets to teams.
    pub belief_share_period_us: u64,
    /// Cadence for the heartbeat announcement on the bus.
    pub heartbeat_period_us: u64,
    /// Sleep applied by `execute` when no agent did any work this tick.
    pub idle_sleep: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            unhandled_actions_forwarded_to_first_applicable_service: true,
            auction_timeout_us: 2_000_000,
            belief_share_period_us: 1_000_000,
            heartbeat_period_us: 4_000_000,
            idle_sleep: Duration::from_millis(1),
        }
    }
}

/// Directory snapshot of an agent, visible to every entity during a
/// tick.
#[derive(Debug, Clone)]
pub struct AgentInfo {
    pub handle: AgentHandle,
    pub roles: Vec<String>,
    pub available: bool,
    pub running: bool,
    pub team: bool,
}

#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub handle: ServiceHandle,
    pub actions: Vec<String>,
    pub available: bool,
}

/// Per-tick view of the engine handed to agents and services.
pub struct EngineCtx<'a> {
    pub registry: &'a Registry,
    pub router: &'a Router,
    pub settings: &'a Settings,
    pub now_us: u64,
    pub poll_count: u64,
    pub agents: &'a [AgentInfo],
    pub services: &'a [ServiceInfo],
    pub bus_out: &'a mut Vec<WireEvent>,
    pub have_bus: bool,
    pub node_address: &'a BusAddress,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PollResult {
    /// Agents with work outstanding: desires, queued events, live
    /// intentions or pending timers.
    pub agents_running: usize,
    /// Agents that advanced an intention this tick.
    pub agents_executing: usize,
}

/// The BDI engine: registry of templates, owner of every agent and
/// service instance, and the cooperative tick loop that drives them.
pub struct Engine {
    name: String,
    id: UniqueId,
    bus_address: BusAddress,
    pub settings: Settings,
    registry: Registry,
    agents: Vec<Agent>,
    services: Vec<Service>,
    queue: EventQueue,
    router: Router,
    internal_clock_us: u64,
    poll_count: u64,
    exit_flag: Arc<AtomicBool>,
    exit_when_done: bool,
    bus_adapters: Vec<Box<dyn BusAdapter>>,
    last_poll: Option<Instant>,
    next_heartbeat_us: u64,
}

impl Engine {
    pub fn new(name: impl Into<String>) -> Self {
        let queue = EventQueue::new();
        let router = Router::new(queue.handle());
        let id = UniqueId::random();
        let name = name.into();
        Self {
            bus_address: BusAddress::new(NodeType::Node, &name, id),
            name,
            id,
            settings: Settings::default(),
            registry: Registry::default(),
            agents: Vec::new(),
            services: Vec::new(),
            queue,
            router,
            internal_clock_us: 0,
            poll_count: 0,
            exit_flag: Arc::new(AtomicBool::new(false)),
            exit_when_done: false,
            bus_adapters: Vec::new(),
            last_poll: None,
            next_heartbeat_us: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> UniqueId {
        self.id
    }

    pub fn bus_address(&self) -> &BusAddress {
        &self.bus_address
    }

    /// The internal clock only accumulates while the engine is polled.
    pub fn internal_clock(&self) -> Duration {
        Duration::from_micros(self.internal_clock_us)
    }

    pub fn poll_count(&self) -> u64 {
        self.poll_count
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Stop `execute` once no agent has outstanding work.
    pub fn exit_when_done(&mut self) {
        self.exit_when_done = true;
    }

    pub fn exit(&self) {
        self.exit_flag.store(true, Ordering::Relaxed);
    }

    pub fn add_bus_adapter(&mut self, adapter: Box<dyn BusAdapter>) {
        self.bus_adapters.push(adapter);
    }

    pub fn have_bus_adapter(&self) -> bool {
        !self.bus_adapters.is_empty()
    }

    // ------------------------------------------------------------------
    // Commit surface
    // ------------------------------------------------------------------

    pub fn commit_message_schema(&mut self, schema: MessageSchema) -> Result<()> {
        if schema.name.is_empty() {
            return Err(EngineError::TemplateInvalid {
                kind: "message",
                name: schema.name,
                reason: "empty name".into(),
            });
        }
        // Registered so messages of this schema can nest as fields.
        if let Ok(prototype) = schema.instantiate() {
            volition_core::FieldRegistry::global().register_message_type(&schema.name, prototype);
        }
        self.registry
            .message_schemas
            .insert(schema.name.clone(), schema);
        Ok(())
    }

    pub fn commit_action(&mut self, action: ActionTemplate) -> Result<()> {
        for schema in [&action.request, &action.reply, &action.feedback]
            .into_iter()
            .flatten()
        {
            if !self.registry.message_schemas.contains_key(schema) {
                tracing::error!(action = %action.name, schema = %schema,
                    "Action references a message schema that is not committed");
                debug_assert!(false, "action schema missing at commit time");
                return Err(EngineError::TemplateInvalid {
                    kind: "action",
                    name: action.name,
                    reason: format!("schema '{schema}' not committed"),
                });
            }
        }
        self.registry.actions.insert(action.name.clone(), action);
        Ok(())
    }

    pub fn commit_resource(&mut self, resource: Resource) -> Result<()> {
        self.registry
            .resources
            .insert(resource.name().to_string(), resource);
        Ok(())
    }

    pub fn commit_role(&mut self, role: Role) -> Result<()> {
        self.registry.roles.insert(role.name.clone(), role);
        Ok(())
    }

    /// Commit a goal; its builtin tactic `<goal> Tactic` is created
    /// alongside, permitting every applicable plan in best-first order,
    /// looping forever.
    pub fn commit_goal(&mut self, goal: Goal) -> Result<()> {
        let name = goal.name().to_string();
        if name.is_empty() {
            return Err(EngineError::TemplateInvalid {
                kind: "goal",
                name,
                reason: "empty name".into(),
            });
        }
        let tactic_name = format!("{name} Tactic");
        let builtin = Tactic {
            handle: TacticHandle::new(&tactic_name, UniqueId::random()),
            goal: name.clone(),
            plans: Vec::new(),
            use_plan_list: false,
            plan_order: PlanOrder::ChooseBestPlan,
            loop_plans_count: LOOP_PLANS_INFINITE,
        };
        self.registry.tactics.insert(tactic_name.clone(), builtin);
        self.registry
            .builtin_tactics
            .insert(name.clone(), tactic_name);
        self.registry.goals.insert(name, goal);
        Ok(())
    }

    pub fn commit_plan(&mut self, plan: Plan) -> Result<()> {
        let name = plan.name().to_string();
        if plan.body().is_empty() {
            tracing::error!(plan = %name, "Plan committed without a body");
            debug_assert!(false, "plan body missing at commit time");
            return Err(EngineError::TemplateInvalid {
                kind: "plan",
                name,
                reason: "body is empty".into(),
            });
        }
        if plan.goal().is_empty() {
            tracing::error!(plan = %name, "Plan committed without a goal");
            return Err(EngineError::TemplateInvalid {
                kind: "plan",
                name,
                reason: "handles no goal".into(),
            });
        }
        let goal_plans = self.registry.goal_plans.entry(plan.goal().to_string());
        let goal_plans = goal_plans.or_default();
        if !goal_plans.contains(&name) {
            goal_plans.push(name.clone());
        }
        self.registry.plans.insert(name, plan);
        Ok(())
    }

    pub fn commit_tactic(&mut self, mut tactic: Tactic) -> Result<()> {
        if !self.registry.goals.contains_key(&tactic.goal) {
            tracing::error!(tactic = %tactic.name(), goal = %tactic.goal,
                "Tactic references a goal that is not committed");
            return Err(EngineError::TemplateInvalid {
                kind: "tactic",
                name: tactic.name().to_string(),
                reason: format!("goal '{}' not committed", tactic.goal),
            });
        }
        // A non-strict plan list is a set: duplicates carry no meaning.
        if tactic.use_plan_list && tactic.plan_order != PlanOrder::Strict {
            let mut seen = Vec::new();
            tactic.plans.retain(|p| {
                if seen.contains(p) {
                    false
                } else {
                    seen.push(p.clone());
                    true
                }
            });
        }
        self.registry
            .tactics
            .insert(tactic.name().to_string(), tactic);
        Ok(())
    }

    pub fn commit_agent_template(&mut self, template: AgentTemplate) -> Result<()> {
        self.registry
            .agent_templates
            .insert(template.name.clone(), template);
        Ok(())
    }

    pub fn commit_service_template(&mut self, template: ServiceTemplate) -> Result<()> {
        self.registry
            .service_templates
            .insert(template.name.clone(), template);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Instance creation & lookup
    // ------------------------------------------------------------------

    pub fn create_agent(&mut self, template_name: &str, agent_name: &str) -> Result<AgentHandle> {
        self.create_agent_with_id(template_name, agent_name, UniqueId::random())
    }

    pub fn create_agent_with_id(
        &mut self,
        template_name: &str,
        agent_name: &str,
        id: UniqueId,
    ) -> Result<AgentHandle> {
        let template = self.registry.agent_templates.get(template_name).ok_or(
            EngineError::TemplateNotFound {
                kind: "agent",
                name: template_name.to_string(),
            },
        )?;
        let mut agent =
            Agent::from_template(template, agent_name, id, &self.registry, self.router.clone());

        // Attach the service instances this agent depends on.
        for service_template in template.services.clone() {
            match self
                .services
                .iter()
                .find(|s| s.template_name() == service_template.as_str())
            {
                Some(service) => {
                    agent.attach_service(service.handle().clone(), false);
                }
                None => {
                    tracing::warn!(agent = %agent_name, service = %service_template,
                        "No service instance available to attach");
                }
            }
        }

        let handle = agent.handle().clone();
        self.router.register(handle.id, agent.queue_handle());
        self.agents.push(agent);
        tracing::info!(agent = %handle, template = %template_name, "Agent created");
        Ok(handle)
    }

    pub fn create_team(&mut self, template_name: &str, team_name: &str) -> Result<AgentHandle> {
        let template = self.registry.agent_templates.get(template_name).ok_or(
            EngineError::TemplateNotFound {
                kind: "team",
                name: template_name.to_string(),
            },
        )?;
        if !template.is_team {
            return Err(EngineError::TemplateInvalid {
                kind: "team",
                name: template_name.to_string(),
                reason: "template is not a team".into(),
            });
        }
        self.create_agent(template_name, team_name)
    }

    pub fn create_proxy_agent(
        &mut self,
        template_name: &str,
        agent_name: &str,
    ) -> Result<AgentHandle> {
        let handle = self.create_agent(template_name, agent_name)?;
        if let Some(agent) = self.agent_mut(&handle) {
            agent.set_proxy(true);
        }
        Ok(handle)
    }

    pub fn create_service(
        &mut self,
        template_name: &str,
        service_name: &str,
        proxy: bool,
    ) -> Result<ServiceHandle> {
        let template = self.registry.service_templates.get(template_name).ok_or(
            EngineError::TemplateNotFound {
                kind: "service",
                name: template_name.to_string(),
            },
        )?;
        let service = Service::from_template(
            template,
            service_name,
            UniqueId::random(),
            proxy,
            self.router.clone(),
        );
        let handle = service.handle().clone();
        self.router.register(handle.id, service.queue_handle());
        self.services.push(service);
        tracing::info!(service = %handle, template = %template_name, "Service created");
        Ok(handle)
    }

    pub fn destroy_agent(&mut self, handle: &AgentHandle) -> bool {
        let Some(position) = self.agents.iter().position(|a| a.id() == handle.id) else {
            return false;
        };
        self.router.deregister(handle.id);
        self.agents.remove(position);
        true
    }

    pub fn agent_by_handle(&self, handle: &AgentHandle) -> Option<&Agent> {
        self.agents.iter().find(|a| a.id() == handle.id)
    }

    pub fn agent_mut(&mut self, handle: &AgentHandle) -> Option<&mut Agent> {
        self.agents.iter_mut().find(|a| a.id() == handle.id)
    }

    pub fn agent_by_name(&self, name: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.name() == name)
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn service_by_handle(&self, handle: &ServiceHandle) -> Option<&Service> {
        self.services.iter().find(|s| s.handle().id == handle.id)
    }

    pub fn service_mut(&mut self, handle: &ServiceHandle) -> Option<&mut Service> {
        self.services
            .iter_mut()
            .find(|s| s.handle().id == handle.id)
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    pub fn get_goal(&self, name: &str) -> Option<&Goal> {
        self.registry.goals.get(name)
    }

    pub fn get_plan(&self, name: &str) -> Option<&Plan> {
        self.registry.plans.get(name)
    }

    pub fn get_tactic(&self, name: &str) -> Option<&Tactic> {
        self.registry.tactics.get(name)
    }

    pub fn get_builtin_tactic(&self, goal: &str) -> Option<&Tactic> {
        self.registry.builtin_tactic(goal)
    }

    pub fn get_action(&self, name: &str) -> Option<&ActionTemplate> {
        self.registry.actions.get(name)
    }

    pub fn get_role(&self, name: &str) -> Option<&Role> {
        self.registry.roles.get(name)
    }

    /// Deliver a single-field belief update. Without a recipient the
    /// percept fans out to every agent holding the belief on the next
    /// poll.
    pub fn percept(
        &self,
        recipient: Option<&AgentHandle>,
        schema: &str,
        key: &str,
        value: impl Into<volition_core::FieldValue>,
    ) {
        let value = value.into();
        let event = Event::new(
            AgentHandle::default(),
            recipient.cloned().unwrap_or_default(),
            EventBody::Percept {
                schema: schema.to_string(),
                field: volition_core::Field {
                    name: key.to_string(),
                    type_name: value.type_name(),
                    value,
                },
            },
        );
        self.router.route(event);
    }

    // ------------------------------------------------------------------
    // Team membership
    // ------------------------------------------------------------------

    pub fn add_team_member(&mut self, team: &AgentHandle, member: &AgentHandle) -> Result<()> {
        let member_handle = {
            let member_agent =
                self.agent(member)
                    .ok_or_else(|| EngineError::AgentNotFound(member.name.clone()))?;
            if member_agent.roles.is_empty() {
                tracing::warn!(team = %team, member = %member,
                    "Member has no roles, the team cannot delegate goals to it");
            }
            member_agent.handle().clone()
        };
        let team_handle = {
            let team_agent = self
                .agent_mut(team)
                .ok_or_else(|| EngineError::AgentNotFound(team.name.clone()))?;
            let Some(state) = team_agent.team.as_mut() else {
                return Err(EngineError::TemplateInvalid {
                    kind: "team",
                    name: team.name.clone(),
                    reason: "agent is not a team".into(),
                });
            };
            if !state.add_member(member_handle.clone()) {
                return Ok(());
            }
            team_agent.schedule_dirty |= crate::agent::dirty::MEMBER_ADDED;
            team_agent.handle().clone()
        };
        if let Some(member_agent) = self.agent_mut(member) {
            member_agent.team_memberships.push(team_handle.clone());
        }
        self.emit_membership_event(EventType::AgentJoinTeam, &team_handle, &member_handle);
        Ok(())
    }

    pub fn remove_team_member(&mut self, team: &AgentHandle, member: &AgentHandle) -> Result<()> {
        let (team_handle, desires) = {
            let team_agent = self
                .agent_mut(team)
                .ok_or_else(|| EngineError::AgentNotFound(team.name.clone()))?;
            let desires: Vec<volition_core::GoalHandle> = team_agent
                .desires()
                .iter()
                .map(|d| d.handle().clone())
                .collect();
            let Some(state) = team_agent.team.as_mut() else {
                return Err(EngineError::TemplateInvalid {
                    kind: "team",
                    name: team.name.clone(),
                    reason: "agent is not a team".into(),
                });
            };
            if !state.remove_member(member.id) {
                return Ok(());
            }
            team_agent.schedule_dirty |= crate::agent::dirty::MEMBER_REMOVED;
            (team_agent.handle().clone(), desires)
        };
        if let Some(member_agent) = self.agent_mut(member) {
            member_agent.team_memberships.retain(|t| t != &team_handle);
            // Any delegation in flight on the removed member is dropped.
            for goal in desires {
                member_agent.drop_with_mode(
                    goal,
                    volition_core::DropMode::Force,
                    "removed from team",
                );
            }
        }
        self.emit_membership_event(EventType::AgentLeaveTeam, &team_handle, member);
        Ok(())
    }

    fn emit_membership_event(
        &mut self,
        event_type: EventType,
        team: &AgentHandle,
        member: &AgentHandle,
    ) {
        if self.bus_adapters.is_empty() {
            return;
        }
        let team_address = BusAddress::new(NodeType::Team, &team.name, team.id);
        let agent_address = BusAddress::new(NodeType::Agent, &member.name, member.id);
        let payload = match event_type {
            EventType::AgentJoinTeam => WirePayload::AgentJoinTeam {
                team: team_address,
                agent: agent_address,
            },
            _ => WirePayload::AgentLeaveTeam {
                team: team_address,
                agent: agent_address,
            },
        };
        let wire = WireEvent {
            header: WireHeader {
                timestamp_us: self.internal_clock_us,
                event_type,
                sender_node: self.bus_address.clone(),
                sender: self.bus_address.clone(),
                recipient: BusAddress::default(),
                event_id: UniqueId::random(),
            },
            payload,
        };
        for adapter in &mut self.bus_adapters {
            adapter.send(&wire);
        }
    }

    // ------------------------------------------------------------------
    // Tick loop
    // ------------------------------------------------------------------

    /// Process queued events and advance every agent and service one BDI
    /// step. `None` accumulates the wall-clock time since the last poll.
    pub fn poll(&mut self, delta: Option<Duration>) -> PollResult {
        let delta = match delta {
            Some(delta) => delta,
            None => {
                let now = Instant::now();
                let elapsed = self
                    .last_poll
                    .map(|last| now.duration_since(last))
                    .unwrap_or_default();
                self.last_poll = Some(now);
                elapsed
            }
        };
        self.internal_clock_us += delta.as_micros() as u64;
        self.poll_count += 1;

        // Drain the engine's own queue, routing events to their
        // recipients.
        for event in self.queue.drain(1024) {
            self.route_engine_event(event);
        }

        let agent_infos: Vec<AgentInfo> = self
            .agents
            .iter()
            .map(|agent| AgentInfo {
                handle: agent.handle().clone(),
                roles: agent.roles.clone(),
                available: agent.is_available(),
                running: agent.is_running(),
                team: agent.is_team(),
            })
            .collect();
        let service_infos: Vec<ServiceInfo> = self
            .services
            .iter()
            .map(|service| ServiceInfo {
                handle: service.handle().clone(),
                actions: service.action_names(),
                available: service.is_available() && service.running(),
            })
            .collect();

        let mut bus_out: Vec<WireEvent> = Vec::new();
        let have_bus = !self.bus_adapters.is_empty();
        let mut result = PollResult::default();

        for agent in &mut self.agents {
            let mut ctx = EngineCtx {
                registry: &self.registry,
                router: &self.router,
                settings: &self.settings,
                now_us: self.internal_clock_us,
                poll_count: self.poll_count,
                agents: &agent_infos,
                services: &service_infos,
                bus_out: &mut bus_out,
                have_bus,
                node_address: &self.bus_address,
            };
            agent.run(&mut ctx);
            if agent.is_active() {
                result.agents_running += 1;
            }
            if agent.executor.is_executing() {
                result.agents_executing += 1;
            }
        }

        for service in &mut self.services {
            let mut ctx = EngineCtx {
                registry: &self.registry,
                router: &self.router,
                settings: &self.settings,
                now_us: self.internal_clock_us,
                poll_count: self.poll_count,
                agents: &agent_infos,
                services: &service_infos,
                bus_out: &mut bus_out,
                have_bus,
                node_address: &self.bus_address,
            };
            service.run(&mut ctx);
        }

        if have_bus && self.internal_clock_us >= self.next_heartbeat_us {
            self.next_heartbeat_us = self.internal_clock_us + self.settings.heartbeat_period_us;
            bus_out.push(WireEvent {
                header: WireHeader {
                    timestamp_us: self.internal_clock_us,
                    event_type: EventType::Register,
                    sender_node: self.bus_address.clone(),
                    sender: self.bus_address.clone(),
                    recipient: BusAddress::default(),
                    event_id: UniqueId::random(),
                },
                payload: WirePayload::Register {
                    address: self.bus_address.clone(),
                    template: String::new(),
                },
            });
        }

        for adapter in &mut self.bus_adapters {
            for event in &bus_out {
                adapter.send(event);
            }
        }

        result
    }

    /// Events whose recipient the producer could not name are inferred
    /// here: percepts fan out to agents holding the belief, messages go
    /// to interested agents.
    fn route_engine_event(&mut self, event: Event) {
        if event.recipient.id.valid() {
            match self.router.queue_of(event.recipient.id) {
                Some(queue) => queue.push(event),
                None => {
                    tracing::warn!(recipient = %event.recipient,
                        "Event for unknown recipient dropped");
                }
            }
            return;
        }

        match &event.body {
            EventBody::Percept { schema, .. } => {
                for agent in &self.agents {
                    if agent.context().message(schema).is_some() {
                        let mut copy = event.clone();
                        copy.recipient = agent.handle().clone();
                        agent.queue_handle().push(copy);
                    }
                }
            }
            EventBody::Message { message } => {
                for agent in &self.agents {
                    if agent.handles_message(message.schema()) {
                        let mut copy = event.clone();
                        copy.recipient = agent.handle().clone();
                        agent.queue_handle().push(copy);
                    }
                }
            }
            _ => {
                tracing::warn!("Event without a recipient cannot be inferred, dropping");
            }
        }
    }

    /// Loop polling until `exit()` is called or, with `exit_when_done`,
    /// until no agents have outstanding work.
    pub fn execute(&mut self) {
        self.exit_flag.store(false, Ordering::Relaxed);
        self.last_poll = Some(Instant::now());
        loop {
            if self.exit_flag.load(Ordering::Relaxed) {
                break;
            }
            let result = self.poll(None);
            if self.exit_when_done && result.agents_running == 0 {
                break;
            }
            if result.agents_running == 0 {
                std::thread::sleep(self.settings.idle_sleep);
            }
        }
    }

    /// Run `execute` on a dedicated thread.
    pub fn start(self) -> EngineThread {
        let exit = self.exit_flag.clone();
        let join = std::thread::spawn(move || {
            let mut engine = self;
            engine.execute();
            engine
        });
        EngineThread { exit, join }
    }

    /// Remove runtime agents and services and reset clocks; templates
    /// and bus adapters are preserved.
    pub fn reset(&mut self) {
        for agent in &self.agents {
            self.router.deregister(agent.id());
        }
        for service in &self.services {
            self.router.deregister(service.handle().id);
        }
        self.agents.clear();
        self.services.clear();
        self.internal_clock_us = 0;
        self.poll_count = 0;
        self.last_poll = None;
        self.next_heartbeat_us = 0;
        self.exit_flag.store(false, Ordering::Relaxed);
    }
}

/// Handle to an engine running on its own thread.
pub struct EngineThread {
    exit: Arc<AtomicBool>,
    join: std::thread::JoinHandle<Engine>,
}

impl EngineThread {
    pub fn exit(&self) {
        self.exit.store(true, Ordering::Relaxed);
    }

    pub fn join(self) -> Engine {
        self.join.join().expect("engine thread panicked")
    }
}
