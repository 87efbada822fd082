use std::sync::Arc;

use parking_lot::Mutex;

use volition_core::{
    ActionHandle, AgentHandle, DelegationStatus, DropMode, Field, FinishState, GoalHandle,
    Message, UniqueId,
};

/// Outcome of handling an action request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Success,
    Fail,
    /// The handler will complete the action later through
    /// [`crate::service::ActionCompleter`].
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Start,
    Pause,
    Stop,
}

/// Link carried by a sub-goal pursue back to the intention that spawned
/// it.
#[derive(Debug, Clone)]
pub struct SubGoalParent {
    pub desire: GoalHandle,
    pub plan_task_id: UniqueId,
    pub executor_id: u64,
}

/// An action request travelling from a plan task to an agent or service
/// handler.
#[derive(Debug, Clone)]
pub struct ActionEvent {
    pub name: String,
    pub handle: ActionHandle,
    pub request: Message,
    pub reply: Message,
    pub task_id: UniqueId,
    pub desire: GoalHandle,
    pub intention_id: UniqueId,
    pub plan: String,
    pub resource_locks: Vec<String>,
    /// Where the completion event is sent.
    pub caller: AgentHandle,
}

#[derive(Debug, Clone)]
pub struct ActionCompleteEvent {
    pub name: String,
    pub task_id: UniqueId,
    pub intention_id: UniqueId,
    pub success: bool,
    pub reply: Option<Message>,
    pub resource_locks: Vec<String>,
}

/// Events delivered through per-entity queues. Every event carries the
/// common envelope in [`Event`]; the body is one of these.
#[derive(Debug, Clone)]
pub enum EventBody {
    Control {
        command: ControlCommand,
    },
    /// External update to a single field of a belief message.
    Percept {
        schema: String,
        field: Field,
    },
    /// Whole-message belief update, also offered to message handlers.
    Message {
        message: Message,
    },
    Pursue {
        goal: String,
        goal_id: UniqueId,
        persistent: bool,
        parameters: Option<Message>,
        parent: Option<SubGoalParent>,
        promise: Option<GoalPromise>,
    },
    Drop {
        goal: GoalHandle,
        mode: DropMode,
        reason: String,
    },
    Delegation {
        goal: String,
        goal_id: UniqueId,
        parameters: Option<Message>,
        analyse: bool,
        status: DelegationStatus,
        team: AgentHandle,
        team_schedule_id: u64,
    },
    AuctionBid {
        goal: GoalHandle,
        score: f32,
        bidder: AgentHandle,
        schedule_id: u64,
    },
    Action(ActionEvent),
    ActionComplete(ActionCompleteEvent),
    Timer {
        expire_at_us: u64,
        task_id: UniqueId,
    },
    ShareBeliefSet {
        member: AgentHandle,
        message: Message,
        last_updated_us: u64,
    },
}

#[derive(Debug, Clone)]
pub struct Event {
    pub id: UniqueId,
    pub timestamp_us: u64,
    pub sender: AgentHandle,
    /// Target entity. An invalid handle asks the engine to infer the
    /// recipient from the body.
    pub recipient: AgentHandle,
    pub body: EventBody,
}

impl Event {
    pub fn new(sender: AgentHandle, recipient: AgentHandle, body: EventBody) -> Self {
        Self {
            id: UniqueId::random(),
            timestamp_us: 0,
            sender,
            recipient,
            body,
        }
    }

    pub fn at(mut self, timestamp_us: u64) -> Self {
        self.timestamp_us = timestamp_us;
        self
    }
}

/// Handle returned from a pursue, fulfilled once when the desire first
/// concludes. Poll it from any thread.
#[derive(Clone, Default)]
pub struct GoalPromise {
    state: Arc<Mutex<FinishState>>,
}

impl GoalPromise {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> FinishState {
        *self.state.lock()
    }

    pub fn finished(&self) -> bool {
        self.state().is_terminal()
    }

    pub(crate) fn fulfill(&self, state: FinishState) {
        let mut slot = self.state.lock();
        if !slot.is_terminal() {
            *slot = state;
        }
    }
}

impl std::fmt::Debug for GoalPromise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GoalPromise({:?})", self.state())
    }
}

/// Result of a pursue: the desire's handle plus its promise.
#[derive(Debug, Clone)]
pub struct GoalPursue {
    pub handle: GoalHandle,
    pub promise: GoalPromise,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promise_latches_first_result() {
        let promise = GoalPromise::new();
        assert!(!promise.finished());
        promise.fulfill(FinishState::Success);
        promise.fulfill(FinishState::Failed);
        assert_eq!(promise.state(), FinishState::Success);
    }
}
