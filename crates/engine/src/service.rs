use std::collections::HashMap;
use std::sync::Arc;

use volition_core::{
    ActionHandle, AgentHandle, BusAddress, Field, FieldValue, Message, NodeType, ServiceHandle,
    UniqueId,
};

use crate::dispatch::{EventQueue, QueueHandle, Router};
use crate::engine::EngineCtx;
use crate::event::{
    ActionCompleteEvent, ActionEvent, ControlCommand, Event, EventBody, EventStatus,
};

/// Lifecycle states shared by services and agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    /// All work has been dropped and no new work is accepted.
    Stopped,
    /// Work is being wound down before entering `Stopped`.
    Stopping,
    Running,
    Paused,
}

pub type ServiceActionHandlerFn =
    Arc<dyn Fn(&mut Service, &Message, &mut Message, &ActionHandle) -> EventStatus + Send + Sync>;

/// Completes a pending action from any thread by pushing the completion
/// event back onto the caller's queue.
#[derive(Clone)]
pub struct ActionCompleter {
    queue: QueueHandle,
    sender: AgentHandle,
    event: ActionEvent,
}

impl ActionCompleter {
    pub(crate) fn new(queue: QueueHandle, sender: AgentHandle, event: ActionEvent) -> Self {
        Self {
            queue,
            sender,
            event,
        }
    }

    pub fn handle(&self) -> &ActionHandle {
        &self.event.handle
    }

    pub fn finish(&self, success: bool, reply: Option<Message>) {
        let complete = Event::new(
            self.sender.clone(),
            self.event.caller.clone(),
            EventBody::ActionComplete(ActionCompleteEvent {
                name: self.event.name.clone(),
                task_id: self.event.task_id,
                intention_id: self.event.intention_id,
                success,
                reply,
                resource_locks: self.event.resource_locks.clone(),
            }),
        );
        self.queue.push(complete);
    }
}

/// Committed description of a service.
#[derive(Clone, Default)]
pub struct ServiceTemplate {
    pub name: String,
    pub action_handlers: HashMap<String, ServiceActionHandlerFn>,
    /// Message schemas this service understands and may percept into.
    pub message_schemas: Vec<String>,
}

/// A service interfaces agents with the external environment: it
/// receives action requests, emits percepts, and completes pending work
/// from foreign threads. Services never plan.
pub struct Service {
    handle: ServiceHandle,
    template_name: String,
    bus_address: BusAddress,
    state: EntityState,
    available: bool,
    proxy: bool,
    queue: EventQueue,
    queue_handle: QueueHandle,
    router: Router,
    action_handlers: HashMap<String, ServiceActionHandlerFn>,
    message_schemas: Vec<String>,
    pending_actions: HashMap<UniqueId, ActionEvent>,
}

impl Service {
    pub fn from_template(
        template: &ServiceTemplate,
        name: &str,
        id: UniqueId,
        proxy: bool,
        router: Router,
    ) -> Self {
        let queue = EventQueue::new();
        let queue_handle = queue.handle();
        Self {
            handle: ServiceHandle::new(name, id),
            template_name: template.name.clone(),
            bus_address: BusAddress::new(NodeType::Service, name, id),
            state: EntityState::Stopped,
            available: true,
            proxy,
            queue,
            queue_handle,
            router,
            action_handlers: template.action_handlers.clone(),
            message_schemas: template.message_schemas.clone(),
            pending_actions: HashMap::new(),
        }
    }

    pub fn handle(&self) -> &ServiceHandle {
        &self.handle
    }

    pub fn name(&self) -> &str {
        &self.handle.name
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

    pub fn stopped(&self) -> bool {
        self.state == EntityState::Stopped
    }

    pub fn running(&self) -> bool {
        matches!(self.state, EntityState::Running | EntityState::Stopping)
    }

    pub fn paused(&self) -> bool {
        self.state == EntityState::Paused
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

    pub fn action_names(&self) -> Vec<String> {
        self.action_handlers.keys().cloned().collect()
    }

    pub fn handles_action(&self, action: &str) -> bool {
        self.action_handlers.contains_key(action)
    }

    pub fn message_schemas(&self) -> &[String] {
        &self.message_schemas
    }

    pub fn queue_handle(&self) -> QueueHandle {
        self.queue_handle.clone()
    }

    pub fn start(&mut self) {
        self.push_control(ControlCommand::Start);
    }

    pub fn stop(&mut self) {
        self.push_control(ControlCommand::Stop);
    }

    pub fn pause(&mut self) {
        self.push_control(ControlCommand::Pause);
    }

    fn push_control(&mut self, command: ControlCommand) {
        let sender: AgentHandle = self.handle.clone();
        self.queue_handle
            .push(Event::new(sender.clone(), sender, EventBody::Control { command }));
    }

    /// Send a single-field belief update to every agent subscribed to the
    /// schema. Routing fans it out through the engine.
    pub fn percept(&self, schema: &str, key: &str, value: impl Into<FieldValue>) {
        let value = value.into();
        let event = Event::new(
            self.handle.clone(),
            AgentHandle::default(),
            EventBody::Percept {
                schema: schema.to_string(),
                field: Field {
                    name: key.to_string(),
                    type_name: value.type_name(),
                    value,
                },
            },
        );
        self.router.engine_queue().push(event);
    }

    /// Send a whole belief message, to one agent or broadcast.
    pub fn send_message(&self, message: Message, recipient: Option<AgentHandle>) {
        let event = Event::new(
            self.handle.clone(),
            recipient.unwrap_or_default(),
            EventBody::Message { message },
        );
        self.router.route(event);
    }

    /// Complete a pending action by its handle; callable after a handler
    /// returned [`EventStatus::Pending`].
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

    pub fn action_completer(&self, handle: &ActionHandle) -> Option<ActionCompleter> {
        let event = self.pending_actions.get(&handle.id)?;
        let caller_queue = self.router.queue_of(event.caller.id)?;
        Some(ActionCompleter::new(
            caller_queue,
            self.handle.clone(),
            event.clone(),
        ))
    }

    /// One tick: drain the queue and handle control and action events.
    pub fn run(&mut self, ctx: &mut EngineCtx) {
        for event in self.queue.drain(64) {
            match event.body {
                EventBody::Control { command } => match command {
                    ControlCommand::Start => {
                        self.state = EntityState::Running;
                        tracing::info!(service = %self.handle, "Service started");
                    }
                    ControlCommand::Pause => self.state = EntityState::Paused,
                    ControlCommand::Stop => {
                        self.state = EntityState::Stopped;
                        tracing::info!(service = %self.handle, "Service stopped");
                    }
                },
                EventBody::Action(action) => self.handle_action(action, ctx),
                EventBody::Message { message } => {
                    tracing::debug!(service = %self.handle, schema = %message.schema(),
                        "Service received message");
                }
                other => {
                    tracing::debug!(service = %self.handle, ?other,
                        "Service ignoring unsupported event");
                }
            }
        }
    }

    fn handle_action(&mut self, action: ActionEvent, ctx: &mut EngineCtx) {
        if !self.running() {
            tracing::warn!(service = %self.handle, action = %action.name,
                "Action while service is not running, failing it");
            self.fail_action(&action, ctx);
            return;
        }
        let Some(handler) = self.action_handlers.get(&action.name).cloned() else {
            tracing::warn!(service = %self.handle, action = %action.name,
                "Service has no handler for action");
            self.fail_action(&action, ctx);
            return;
        };

        let handle = action.handle.clone();
        let request = action.request.clone();
        let mut reply = action.reply.clone();
        self.pending_actions.insert(handle.id, action);
        match handler(self, &request, &mut reply, &handle) {
            EventStatus::Success => {
                let reply = reply.valid().then_some(reply);
                self.finish_action_handle(&handle, true, reply);
            }
            EventStatus::Fail => {
                let reply = reply.valid().then_some(reply);
                self.finish_action_handle(&handle, false, reply);
            }
            EventStatus::Pending => {}
        }
    }

    fn fail_action(&self, action: &ActionEvent, ctx: &mut EngineCtx) {
        let complete = Event::new(
            self.handle.clone(),
            action.caller.clone(),
            EventBody::ActionComplete(ActionCompleteEvent {
                name: action.name.clone(),
                task_id: action.task_id,
                intention_id: action.intention_id,
                success: false,
                reply: None,
                resource_locks: action.resource_locks.clone(),
            }),
        );
        ctx.router.route(complete);
    }
}
