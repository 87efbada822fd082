//! Bus adapter seam and BDI-level observability records.
//!
//! The engine does not own a transport: applications attach adapters and
//! the engine serializes protocol events through them, best-effort.

use volition_core::protocol::{
    BdiLog, BdiLogBody, BdiLogLevel, BdiLogResult, WireEvent, WireHeader, WirePayload,
};
use volition_core::{BusAddress, EventType, FinishState, GoalHandle, UniqueId};

use crate::agent::EffectMeta;
use crate::engine::EngineCtx;
use crate::event::{ActionCompleteEvent, Event, EventBody, SubGoalParent};

/// Transport for protocol events between nodes. Implementations are
/// expected to be non-blocking; delivery is best-effort.
pub trait BusAdapter: Send {
    fn name(&self) -> &str;
    fn send(&mut self, event: &WireEvent);
}

pub(crate) fn finish_state_result(state: FinishState) -> BdiLogResult {
    match state {
        FinishState::Success => BdiLogResult::Success,
        FinishState::Dropped => BdiLogResult::Dropped,
        _ => BdiLogResult::Failed,
    }
}

fn push_log(ctx: &mut EngineCtx, sender: &BusAddress, log: BdiLog) {
    if !ctx.have_bus {
        return;
    }
    ctx.bus_out.push(WireEvent {
        header: WireHeader {
            timestamp_us: ctx.now_us,
            event_type: EventType::BdiLog,
            sender_node: ctx.node_address.clone(),
            sender: sender.clone(),
            recipient: BusAddress::default(),
            event_id: UniqueId::random(),
        },
        payload: WirePayload::BdiLog { log },
    });
}

fn log_base(goal: &GoalHandle) -> BdiLog {
    BdiLog {
        level: BdiLogLevel::Normal,
        goal: goal.name.clone(),
        goal_id: goal.id.to_string(),
        intention_id: String::new(),
        plan: String::new(),
        task_id: String::new(),
        body: BdiLogBody::GoalStarted,
    }
}

pub(crate) fn log_goal_started(ctx: &mut EngineCtx, sender: &BusAddress, goal: &GoalHandle) {
    let log = log_base(goal);
    push_log(ctx, sender, log);
}

pub(crate) fn log_goal_finished(
    ctx: &mut EngineCtx,
    sender: &BusAddress,
    goal: &GoalHandle,
    result: FinishState,
) {
    let mut log = log_base(goal);
    log.body = BdiLogBody::GoalFinished {
        result: finish_state_result(result),
        drop_reason: String::new(),
    };
    push_log(ctx, sender, log);
}

pub(crate) fn log_sub_goal_started(
    ctx: &mut EngineCtx,
    sender: &BusAddress,
    goal: &GoalHandle,
    parent: &SubGoalParent,
) {
    let mut log = log_base(goal);
    log.task_id = parent.plan_task_id.to_string();
    log.body = BdiLogBody::SubGoalStarted;
    push_log(ctx, sender, log);
}

pub(crate) fn log_sub_goal_finished(
    ctx: &mut EngineCtx,
    sender: &BusAddress,
    goal: &GoalHandle,
    result: FinishState,
) {
    let mut log = log_base(goal);
    log.body = BdiLogBody::SubGoalFinished {
        result: finish_state_result(result),
        drop_reason: String::new(),
    };
    push_log(ctx, sender, log);
}

pub(crate) fn log_intention_started(
    ctx: &mut EngineCtx,
    sender: &BusAddress,
    desire: &GoalHandle,
    intention_id: UniqueId,
    plan: &str,
) {
    let mut log = log_base(desire);
    log.intention_id = intention_id.to_string();
    log.plan = plan.to_string();
    log.body = BdiLogBody::IntentionStarted;
    push_log(ctx, sender, log);
}

pub(crate) fn log_intention_finished(
    ctx: &mut EngineCtx,
    sender: &BusAddress,
    desire: &GoalHandle,
    intention_id: UniqueId,
    plan: &str,
    result: FinishState,
) {
    let mut log = log_base(desire);
    log.intention_id = intention_id.to_string();
    log.plan = plan.to_string();
    log.body = BdiLogBody::IntentionFinished {
        result: finish_state_result(result),
    };
    push_log(ctx, sender, log);
}

pub(crate) fn log_action_started(
    ctx: &mut EngineCtx,
    sender: &BusAddress,
    meta: &EffectMeta,
    action: &str,
    task_id: UniqueId,
) {
    let mut log = log_base(&meta.desire);
    log.intention_id = meta.intention_id.to_string();
    log.plan = meta.plan.clone();
    log.task_id = task_id.to_string();
    log.body = BdiLogBody::ActionStarted {
        action: action.to_string(),
    };
    push_log(ctx, sender, log);
}

pub(crate) fn log_action_finished(
    ctx: &mut EngineCtx,
    sender: &BusAddress,
    complete: &ActionCompleteEvent,
) {
    if !ctx.have_bus {
        return;
    }
    // Reasoning annotations on the reply surface here.
    let (level, reasoning) = complete
        .reply
        .as_ref()
        .map(|reply| {
            (
                reply.reasoning_level.unwrap_or_default(),
                reply.reasoning.clone().unwrap_or_default(),
            )
        })
        .unwrap_or_default();
    let log = BdiLog {
        level,
        goal: String::new(),
        goal_id: String::new(),
        intention_id: complete.intention_id.to_string(),
        plan: String::new(),
        task_id: complete.task_id.to_string(),
        body: BdiLogBody::ActionFinished {
            action: complete.name.clone(),
            success: complete.success,
            reasoning,
        },
    };
    push_log(ctx, sender, log);
}

pub(crate) fn log_sleep_started(
    ctx: &mut EngineCtx,
    sender: &BusAddress,
    meta: &EffectMeta,
    task_id: UniqueId,
    sleep_ms: u64,
) {
    let mut log = log_base(&meta.desire);
    log.intention_id = meta.intention_id.to_string();
    log.plan = meta.plan.clone();
    log.task_id = task_id.to_string();
    log.body = BdiLogBody::SleepStarted { sleep_ms };
    push_log(ctx, sender, log);
}

pub(crate) fn log_sleep_finished(ctx: &mut EngineCtx, sender: &BusAddress, task_id: UniqueId) {
    if !ctx.have_bus {
        return;
    }
    let log = BdiLog {
        level: BdiLogLevel::Normal,
        goal: String::new(),
        goal_id: String::new(),
        intention_id: String::new(),
        plan: String::new(),
        task_id: task_id.to_string(),
        body: BdiLogBody::SleepFinished,
    };
    push_log(ctx, sender, log);
}

pub(crate) fn log_condition(
    ctx: &mut EngineCtx,
    sender: &BusAddress,
    meta: &EffectMeta,
    task_id: UniqueId,
    condition: &str,
    success: bool,
) {
    let mut log = log_base(&meta.desire);
    log.intention_id = meta.intention_id.to_string();
    log.plan = meta.plan.clone();
    log.task_id = task_id.to_string();
    log.body = BdiLogBody::Condition {
        condition: condition.to_string(),
        success,
    };
    push_log(ctx, sender, log);
}

/// Serialize an internal event for the bus. Only the bus-forwardable
/// subset converts; everything else is node-local.
pub(crate) fn to_wire(event: &Event, node: &BusAddress) -> Option<WireEvent> {
    let (event_type, payload) = match &event.body {
        EventBody::Pursue {
            goal,
            persistent,
            parameters,
            ..
        } => (
            EventType::Pursue,
            WirePayload::Pursue {
                goal: goal.clone(),
                persistent: *persistent,
                message: parameters.clone(),
            },
        ),
        EventBody::Drop { goal, mode, reason } => (
            EventType::Drop,
            WirePayload::Drop {
                goal: goal.name.clone(),
                goal_id: goal.id.to_string(),
                mode: *mode,
                reason: reason.clone(),
            },
        ),
        EventBody::Delegation {
            goal,
            goal_id,
            parameters,
            analyse,
            status,
            team,
            team_schedule_id,
        } => (
            EventType::Delegation,
            WirePayload::Delegation {
                status: *status,
                goal: goal.clone(),
                goal_id: goal_id.to_string(),
                analyse: *analyse,
                score: 0.0,
                team: BusAddress::new(volition_core::NodeType::Team, &team.name, team.id),
                team_schedule_id: *team_schedule_id,
                message: parameters.clone(),
            },
        ),
        EventBody::ActionComplete(complete) => (
            EventType::ActionUpdate,
            WirePayload::ActionUpdate {
                name: complete.name.clone(),
                task_id: complete.task_id.to_string(),
                goal: String::new(),
                goal_id: String::new(),
                intention_id: complete.intention_id.to_string(),
                plan: String::new(),
                success: complete.success,
                reply: complete.reply.clone(),
            },
        ),
        _ => return None,
    };
    Some(WireEvent {
        header: WireHeader {
            timestamp_us: event.timestamp_us,
            event_type,
            sender_node: node.clone(),
            sender: BusAddress::new(
                volition_core::NodeType::Agent,
                &event.sender.name,
                event.sender.id,
            ),
            recipient: BusAddress::new(
                volition_core::NodeType::Agent,
                &event.recipient.name,
                event.recipient.id,
            ),
            event_id: event.id,
        },
        payload,
    })
}
