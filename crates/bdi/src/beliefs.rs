use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use volition_core::{AgentHandle, FieldValue, Message, MessageSchema, Resource};

pub type SharedMessage = Arc<RwLock<Message>>;
pub type SharedResource = Arc<RwLock<Resource>>;

type MessageMap = Arc<RwLock<BTreeMap<String, SharedMessage>>>;
type ResourceMap = Arc<RwLock<BTreeMap<String, SharedResource>>>;

/// Where a context lookup searches, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchContext {
    /// Reply messages from completed actions in the current plan,
    /// newest first.
    ActionReply,
    /// The parameter message of the currently executing goal.
    Goal,
    /// The agent's belief set.
    Agent,
}

/// Default order for action and sub-goal parameter binding.
pub const DEFAULT_SEARCH_ORDER: [SearchContext; 3] = [
    SearchContext::ActionReply,
    SearchContext::Goal,
    SearchContext::Agent,
];

/// Select a whole message either by schema name or structurally by an
/// exact field-name/type match against a schema.
#[derive(Debug, Clone)]
pub enum MessageQuery {
    ByName(String),
    BySchema(MessageSchema),
}

impl MessageQuery {
    fn matches(&self, message: &Message) -> bool {
        match self {
            MessageQuery::ByName(name) => message.schema() == name,
            MessageQuery::BySchema(schema) => schema.verify_structure(message),
        }
    }
}

/// An agent's view of the world while a plan executes: the agent's shared
/// belief messages and resources, the parameter message of the current
/// goal, and the reply messages of actions completed so far.
///
/// Contexts created for goal instances alias the owning agent's message
/// and resource maps; the planner deep-clones where it needs to simulate
/// effects without touching the live state.
#[derive(Clone, Default)]
pub struct BeliefContext {
    agent: AgentHandle,
    messages: MessageMap,
    resources: ResourceMap,
    goal: Option<SharedMessage>,
    action_replies: Vec<SharedMessage>,
}

impl BeliefContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn agent(&self) -> &AgentHandle {
        &self.agent
    }

    /// Alias this context onto the agent's shared message and resource
    /// maps.
    pub fn set_agent_context(&mut self, agent_context: &BeliefContext, agent: AgentHandle) {
        self.agent = agent;
        self.messages = Arc::clone(&agent_context.messages);
        self.resources = Arc::clone(&agent_context.resources);
    }

    pub fn set_agent(&mut self, agent: AgentHandle) {
        self.agent = agent;
    }

    pub fn set_goal_message(&mut self, message: Option<Message>) {
        self.goal = message.map(|m| Arc::new(RwLock::new(m)));
    }

    pub fn goal_message(&self) -> Option<SharedMessage> {
        self.goal.clone()
    }

    pub fn add_message(&self, message: Message) {
        let name = message.schema().to_string();
        self.messages
            .write()
            .insert(name, Arc::new(RwLock::new(message)));
    }

    pub fn message(&self, name: &str) -> Option<SharedMessage> {
        self.messages.read().get(name).cloned()
    }

    pub fn message_names(&self) -> Vec<String> {
        self.messages.read().keys().cloned().collect()
    }

    pub fn add_resource(&self, resource: Resource) {
        let name = resource.name().to_string();
        self.resources
            .write()
            .insert(name, Arc::new(RwLock::new(resource)));
    }

    pub fn resource(&self, name: &str) -> Option<SharedResource> {
        self.resources.read().get(name).cloned()
    }

    pub fn resource_names(&self) -> Vec<String> {
        self.resources.read().keys().cloned().collect()
    }

    /// Record an action reply. A prior reply of the same schema is
    /// replaced; fresh replies always shadow older ones in lookups.
    pub fn add_action_reply(&mut self, message: Message) {
        self.action_replies
            .retain(|m| m.read().schema() != message.schema());
        self.action_replies.push(Arc::new(RwLock::new(message)));
    }

    pub fn clear_action_replies(&mut self) {
        self.action_replies.clear();
    }

    /// Deep copy: messages and resources are cloned into fresh maps, the
    /// goal message is cloned, action replies are not carried over.
    pub fn clone_deep(&self) -> Self {
        let messages: BTreeMap<String, SharedMessage> = self
            .messages
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::new(RwLock::new(v.read().clone()))))
            .collect();
        let resources: BTreeMap<String, SharedResource> = self
            .resources
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::new(RwLock::new(v.read().clone()))))
            .collect();
        Self {
            agent: self.agent.clone(),
            messages: Arc::new(RwLock::new(messages)),
            resources: Arc::new(RwLock::new(resources)),
            goal: self
                .goal
                .as_ref()
                .map(|g| Arc::new(RwLock::new(g.read().clone()))),
            action_replies: Vec::new(),
        }
    }

    /// Find the first field named `key` scanning the context in the given
    /// order.
    pub fn get_with_order(&self, key: &str, order: &[SearchContext]) -> Option<FieldValue> {
        for search in order {
            match search {
                SearchContext::ActionReply => {
                    for reply in self.action_replies.iter().rev() {
                        if let Some(value) = reply.read().get_field(key) {
                            return Some(value.clone());
                        }
                    }
                }
                SearchContext::Goal => {
                    if let Some(goal) = &self.goal {
                        if let Some(value) = goal.read().get_field(key) {
                            return Some(value.clone());
                        }
                    }
                }
                SearchContext::Agent => {
                    for message in self.messages.read().values() {
                        if let Some(value) = message.read().get_field(key) {
                            return Some(value.clone());
                        }
                    }
                }
            }
        }
        None
    }

    pub fn get(&self, key: &str) -> Option<FieldValue> {
        self.get_with_order(key, &DEFAULT_SEARCH_ORDER)
    }

    /// Find the first whole message matching the query in the given order.
    pub fn get_message_with_order(
        &self,
        query: &MessageQuery,
        order: &[SearchContext],
    ) -> Option<SharedMessage> {
        for search in order {
            match search {
                SearchContext::ActionReply => {
                    for reply in self.action_replies.iter().rev() {
                        if query.matches(&reply.read()) {
                            return Some(Arc::clone(reply));
                        }
                    }
                }
                SearchContext::Goal => {
                    if let Some(goal) = &self.goal {
                        if query.matches(&goal.read()) {
                            return Some(Arc::clone(goal));
                        }
                    }
                }
                SearchContext::Agent => {
                    for message in self.messages.read().values() {
                        if query.matches(&message.read()) {
                            return Some(Arc::clone(message));
                        }
                    }
                }
            }
        }
        None
    }

    pub fn get_message(&self, query: &MessageQuery) -> Option<SharedMessage> {
        self.get_message_with_order(query, &DEFAULT_SEARCH_ORDER)
    }

    /// True if any resource count sits outside its declared bounds.
    /// Violated resource names are appended to `violated` when provided.
    pub fn has_resource_violation(&self, mut violated: Option<&mut Vec<String>>) -> bool {
        let mut result = false;
        for (name, resource) in self.resources.read().iter() {
            if resource.read().is_violated() {
                result = true;
                match violated.as_deref_mut() {
                    Some(list) => list.push(name.clone()),
                    None => break,
                }
            }
        }
        result
    }

    /// True if any of the named resources is violated.
    pub fn has_resource_violation_in(&self, names: &[String]) -> bool {
        names.iter().any(|name| {
            self.resource(name)
                .map(|r| r.read().is_violated())
                .unwrap_or(false)
        })
    }

    /// True if any of the named resources is locked by another plan.
    pub fn any_resource_locked(&self, names: &[String]) -> bool {
        names.iter().any(|name| {
            self.resource(name)
                .map(|r| r.read().locked())
                .unwrap_or(false)
        })
    }

    pub fn lock_resources(&self, names: &[String]) {
        for name in names {
            match self.resource(name) {
                Some(resource) => resource.write().lock(),
                None => tracing::warn!(resource = %name, "Cannot lock unknown resource"),
            }
        }
    }

    pub fn unlock_resources(&self, names: &[String]) {
        for name in names {
            match self.resource(name) {
                Some(resource) => resource.write().unlock(),
                None => tracing::warn!(resource = %name, "Cannot unlock unknown resource"),
            }
        }
    }
}

impl std::fmt::Debug for BeliefContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let messages = self.messages.read();
        let mut out = f.debug_struct("BeliefContext");
        out.field("agent", &self.agent.name);
        out.field("messages", &messages.keys().collect::<Vec<_>>());
        if let Some(goal) = &self.goal {
            out.field("goal", &goal.read().schema().to_string());
        }
        out.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volition_core::MessageSchema;

    fn context() -> BeliefContext {
        let ctx = BeliefContext::new();
        let beliefs = MessageSchema::new("ABC")
            .with_field_value("current_id", -1i32)
            .instantiate()
            .unwrap();
        ctx.add_message(beliefs);
        ctx
    }

    #[test]
    fn test_lookup_order_prefers_action_reply() {
        let mut ctx = context();
        let goal = MessageSchema::new("Params")
            .with_field_value("current_id", 5i32)
            .instantiate()
            .unwrap();
        ctx.set_goal_message(Some(goal));
        assert_eq!(ctx.get("current_id"), Some(FieldValue::I32(5)));

        let reply = MessageSchema::new("Reply")
            .with_field_value("current_id", 9i32)
            .instantiate()
            .unwrap();
        ctx.add_action_reply(reply);
        assert_eq!(ctx.get("current_id"), Some(FieldValue::I32(9)));

        // Agent beliefs are last in the default order.
        assert_eq!(
            ctx.get_with_order("current_id", &[SearchContext::Agent]),
            Some(FieldValue::I32(-1))
        );
    }

    #[test]
    fn test_newest_reply_shadows_older() {
        let mut ctx = context();
        let first = MessageSchema::new("R1")
            .with_field_value("v", 1i32)
            .instantiate()
            .unwrap();
        let second = MessageSchema::new("R2")
            .with_field_value("v", 2i32)
            .instantiate()
            .unwrap();
        ctx.add_action_reply(first);
        ctx.add_action_reply(second);
        assert_eq!(ctx.get("v"), Some(FieldValue::I32(2)));
    }

    #[test]
    fn test_clone_deep_detaches_state() {
        let ctx = context();
        let copy = ctx.clone_deep();
        copy.message("ABC")
            .unwrap()
            .write()
            .set_field("current_id", 42i32)
            .unwrap();
        assert_eq!(ctx.get("current_id"), Some(FieldValue::I32(-1)));
        assert_eq!(copy.get("current_id"), Some(FieldValue::I32(42)));
    }

    #[test]
    fn test_shared_context_aliases_agent_state() {
        let agent_ctx = context();
        let mut goal_ctx = BeliefContext::new();
        goal_ctx.set_agent_context(&agent_ctx, AgentHandle::default());
        agent_ctx
            .message("ABC")
            .unwrap()
            .write()
            .set_field("current_id", 7i32)
            .unwrap();
        assert_eq!(goal_ctx.get("current_id"), Some(FieldValue::I32(7)));
    }

    #[test]
    fn test_structural_message_query() {
        let ctx = context();
        let shape = MessageSchema::new("SomethingElse").with_field("current_id", "I32");
        let found = ctx.get_message(&MessageQuery::BySchema(shape));
        assert!(found.is_some());
        assert_eq!(found.unwrap().read().schema(), "ABC");
    }

    #[test]
    fn test_resource_violation() {
        let ctx = context();
        ctx.add_resource(Resource::new("Battery", 0, 100));
        assert!(!ctx.has_resource_violation(None));
        ctx.resource("Battery").unwrap().write().consume(150);
        let mut violated = Vec::new();
        assert!(ctx.has_resource_violation(Some(&mut violated)));
        assert_eq!(violated, vec!["Battery".to_string()]);
    }
}
