use volition_core::{FieldValue, GoalHandle, Message, MessageSchema, UniqueId};

use crate::beliefs::{BeliefContext, MessageQuery};
use crate::query::BeliefQuery;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TaskState {
    #[default]
    NotReady,
    Ready,
    /// Suspended until an external completion correlated by task id.
    Wait,
    /// Re-evaluated every tick until the predicate holds.
    Yield,
    /// Side effect emitted; the coroutine continues without blocking but
    /// cannot finish until the effect completes.
    Async,
    Done,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TaskStatus {
    #[default]
    Succeeded,
    Failed,
}

/// Maps a field of a task's request message to a key looked up in the
/// belief context. An empty `context_param` reuses the parameter name.
#[derive(Debug, Clone, Default)]
pub struct ParamMapping {
    pub param: String,
    pub context_param: String,
}

/// Everything a task may ask the surrounding machinery to do. Tasks never
/// reach into the agent directly; the executor turns these into queued
/// events.
#[derive(Debug, Clone)]
pub enum TaskEffect {
    EmitAction {
        task_id: UniqueId,
        action: String,
        wait: bool,
        mappings: Vec<ParamMapping>,
        literals: Vec<(String, FieldValue)>,
    },
    PursueSubGoal {
        task_id: UniqueId,
        goal: String,
        wait: bool,
        mappings: Vec<ParamMapping>,
        literals: Vec<(String, FieldValue)>,
    },
    StartTimer {
        task_id: UniqueId,
        duration_ms: u64,
    },
    DropGoal {
        goal: GoalHandle,
        reason: String,
    },
    ConditionEvaluated {
        task_id: UniqueId,
        label: String,
        success: bool,
    },
}

/// Per-tick inputs available to an executing task.
pub struct TaskTick<'a> {
    pub context: &'a BeliefContext,
    pub desire: &'a GoalHandle,
    pub intention_id: UniqueId,
    pub plan: &'a str,
}

#[derive(Debug, Clone)]
pub enum TaskKind {
    /// Requests an action from the owning agent (or an attached service).
    Action { name: String },
    /// Pursues a sub-goal on the owning agent.
    Pursue { goal: String },
    /// Evaluates a belief predicate once; succeeds or fails on its result.
    Conditional { query: BeliefQuery },
    /// Stays yielded until the predicate holds.
    YieldUntil { query: BeliefQuery },
    /// Suspends until an engine timer fires.
    Sleep { duration_ms: u64 },
    /// Drops the referenced goal.
    Drop { goal: GoalHandle },
    /// Emits a log line.
    Print { message: String },
}

/// One node in a plan's task graph.
#[derive(Debug, Clone)]
pub struct Task {
    /// Stable across clones of the plan so completions and bus records
    /// refer to one consistent task.
    pub id: UniqueId,
    pub kind: TaskKind,
    state: TaskState,
    status: TaskStatus,
    wait: bool,
    success_target: i32,
    fail_target: i32,
    mappings: Vec<ParamMapping>,
    literals: Vec<(String, FieldValue)>,
}

impl Task {
    pub fn new(kind: TaskKind, id: UniqueId) -> Self {
        Self {
            id,
            kind,
            state: TaskState::NotReady,
            status: TaskStatus::Succeeded,
            wait: true,
            success_target: crate::coroutine::TERMINAL,
            fail_target: crate::coroutine::TERMINAL,
            mappings: Vec::new(),
            literals: Vec::new(),
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn set_ready(&mut self) {
        self.state = TaskState::Ready;
    }

    pub fn reset(&mut self) {
        self.state = TaskState::NotReady;
        self.status = TaskStatus::Succeeded;
    }

    pub fn succeed(&mut self) {
        self.status = TaskStatus::Succeeded;
        self.state = TaskState::Done;
    }

    pub fn fail(&mut self) {
        self.status = TaskStatus::Failed;
        self.state = TaskState::Done;
    }

    pub fn nowait(&mut self) {
        self.wait = false;
    }

    pub fn param_from(&mut self, param: impl Into<String>, context_param: impl Into<String>) {
        self.mappings.push(ParamMapping {
            param: param.into(),
            context_param: context_param.into(),
        });
    }

    pub fn literal(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.literals.push((name.into(), value.into()));
    }

    pub fn success_target(&self) -> i32 {
        self.success_target
    }

    pub fn fail_target(&self) -> i32 {
        self.fail_target
    }

    pub fn set_success_target(&mut self, label: i32) {
        self.success_target = label;
    }

    pub fn set_fail_target(&mut self, label: i32) {
        self.fail_target = label;
    }

    /// Advance the task by one tick. Returns true when the coroutine may
    /// move past this task, along with any effect to carry out.
    pub fn tick(&mut self, tick: &TaskTick) -> (bool, Option<TaskEffect>) {
        match self.state {
            TaskState::NotReady | TaskState::Ready => {
                let effect = self.execute(tick);
                let advanced = matches!(self.state, TaskState::Done | TaskState::Async);
                (advanced, effect)
            }
            TaskState::Yield => {
                let TaskKind::YieldUntil { query } = &self.kind else {
                    return (false, None);
                };
                if query.evaluate_or(tick.context, false) {
                    self.succeed();
                    (true, None)
                } else {
                    (false, None)
                }
            }
            TaskState::Wait => (false, None),
            TaskState::Async | TaskState::Done => (true, None),
        }
    }

    fn execute(&mut self, tick: &TaskTick) -> Option<TaskEffect> {
        match &self.kind {
            TaskKind::Action { name } => {
                self.status = TaskStatus::Succeeded;
                self.state = if self.wait {
                    TaskState::Wait
                } else {
                    TaskState::Async
                };
                Some(TaskEffect::EmitAction {
                    task_id: self.id,
                    action: name.clone(),
                    wait: self.wait,
                    mappings: self.mappings.clone(),
                    literals: self.literals.clone(),
                })
            }
            TaskKind::Pursue { goal } => {
                self.status = TaskStatus::Succeeded;
                self.state = if self.wait {
                    TaskState::Wait
                } else {
                    TaskState::Async
                };
                Some(TaskEffect::PursueSubGoal {
                    task_id: self.id,
                    goal: goal.clone(),
                    wait: self.wait,
                    mappings: self.mappings.clone(),
                    literals: self.literals.clone(),
                })
            }
            TaskKind::Conditional { query } => {
                let success = query.evaluate_or(tick.context, false);
                let label = query.label().to_string();
                if success {
                    self.succeed();
                } else {
                    self.fail();
                }
                Some(TaskEffect::ConditionEvaluated {
                    task_id: self.id,
                    label,
                    success,
                })
            }
            TaskKind::YieldUntil { query } => {
                if query.evaluate_or(tick.context, false) {
                    self.succeed();
                } else {
                    self.state = TaskState::Yield;
                }
                None
            }
            TaskKind::Sleep { duration_ms } => {
                let duration_ms = *duration_ms;
                self.status = TaskStatus::Succeeded;
                self.state = TaskState::Wait;
                Some(TaskEffect::StartTimer {
                    task_id: self.id,
                    duration_ms,
                })
            }
            TaskKind::Drop { goal } => {
                let goal = goal.clone();
                self.succeed();
                Some(TaskEffect::DropGoal {
                    goal,
                    reason: format!("dropped by plan {}", tick.plan),
                })
            }
            TaskKind::Print { message } => {
                tracing::info!(
                    desire = %tick.desire,
                    plan = %tick.plan,
                    "{message}"
                );
                self.succeed();
                None
            }
        }
    }
}

/// Bind a request/parameter message from the belief context (§ task
/// parameter binding):
///
/// 1. seed from a whole context message structurally matching the schema,
/// 2. fill each schema field from a same-named context key,
/// 3. apply explicit parameter mappings,
/// 4. apply literal bindings last.
///
/// Type mismatches are logged and skipped; the message keeps its prior
/// value.
pub fn bind_message(
    message: &mut Message,
    schema: &MessageSchema,
    context: &BeliefContext,
    mappings: &[ParamMapping],
    literals: &[(String, FieldValue)],
) {
    if let Some(seed) = context.get_message(&MessageQuery::BySchema(schema.clone())) {
        let seed = seed.read().clone();
        message.merge_from(&seed);
    }

    for spec in &schema.fields {
        if let Some(value) = context.get(&spec.name) {
            if let Err(err) = message.set_field(&spec.name, value) {
                tracing::warn!(field = %spec.name, %err, "Skipping context field binding");
            }
        }
    }

    for mapping in mappings {
        let context_param = if mapping.context_param.is_empty() {
            &mapping.param
        } else {
            &mapping.context_param
        };
        if let Some(value) = context.get(context_param) {
            if let Err(err) = message.set_field(&mapping.param, value) {
                tracing::warn!(
                    param = %mapping.param,
                    from = %context_param,
                    %err,
                    "Skipping parameter mapping"
                );
            }
        }
    }

    for (name, value) in literals {
        if let Err(err) = message.set_field(name, value.clone()) {
            tracing::warn!(field = %name, %err, "Skipping literal binding");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volition_core::MessageSchema;

    fn tick_inputs<'a>(context: &'a BeliefContext, desire: &'a GoalHandle) -> TaskTick<'a> {
        TaskTick {
            context,
            desire,
            intention_id: UniqueId::random(),
            plan: "P",
        }
    }

    #[test]
    fn test_action_task_waits_by_default() {
        let context = BeliefContext::new();
        let desire = GoalHandle::new("G", UniqueId::random());
        let mut task = Task::new(
            TaskKind::Action {
                name: "DoCount".into(),
            },
            UniqueId::random(),
        );
        let (advanced, effect) = task.tick(&tick_inputs(&context, &desire));
        assert!(!advanced);
        assert_eq!(task.state(), TaskState::Wait);
        assert!(matches!(
            effect,
            Some(TaskEffect::EmitAction { wait: true, .. })
        ));

        task.succeed();
        assert_eq!(task.state(), TaskState::Done);
    }

    #[test]
    fn test_nowait_action_is_async() {
        let context = BeliefContext::new();
        let desire = GoalHandle::new("G", UniqueId::random());
        let mut task = Task::new(
            TaskKind::Action {
                name: "DoCount".into(),
            },
            UniqueId::random(),
        );
        task.nowait();
        let (advanced, _) = task.tick(&tick_inputs(&context, &desire));
        assert!(advanced);
        assert_eq!(task.state(), TaskState::Async);
    }

    #[test]
    fn test_conditional_task() {
        let context = BeliefContext::new();
        let desire = GoalHandle::new("G", UniqueId::random());
        let mut task = Task::new(
            TaskKind::Conditional {
                query: BeliefQuery::new(|_| false),
            },
            UniqueId::random(),
        );
        let (advanced, _) = task.tick(&tick_inputs(&context, &desire));
        assert!(advanced);
        assert_eq!(task.status(), TaskStatus::Failed);
    }

    #[test]
    fn test_yield_until_task() {
        let context = BeliefContext::new();
        let desire = GoalHandle::new("G", UniqueId::random());
        let beliefs = MessageSchema::new("B")
            .with_field_value("go", false)
            .instantiate()
            .unwrap();
        context.add_message(beliefs);

        let mut task = Task::new(
            TaskKind::YieldUntil {
                query: BeliefQuery::new(|ctx| {
                    ctx.get("go").and_then(|v| v.as_bool()).unwrap_or(false)
                }),
            },
            UniqueId::random(),
        );
        let (advanced, _) = task.tick(&tick_inputs(&context, &desire));
        assert!(!advanced);
        assert_eq!(task.state(), TaskState::Yield);

        context
            .message("B")
            .unwrap()
            .write()
            .set_field("go", true)
            .unwrap();
        let (advanced, _) = task.tick(&tick_inputs(&context, &desire));
        assert!(advanced);
        assert_eq!(task.status(), TaskStatus::Succeeded);
    }

    #[test]
    fn test_bind_message_precedence() {
        let context = BeliefContext::new();
        let beliefs = MessageSchema::new("ABC")
            .with_field_value("mission_id", 7i32)
            .instantiate()
            .unwrap();
        context.add_message(beliefs);

        let schema = MessageSchema::new("Request").with_field("mission_id", "I32");
        let mut message = schema.instantiate().unwrap();

        // Context key fills the field.
        bind_message(&mut message, &schema, &context, &[], &[]);
        assert_eq!(message.get_field("mission_id"), Some(&FieldValue::I32(7)));

        // Literals take precedence over context bindings.
        bind_message(
            &mut message,
            &schema,
            &context,
            &[],
            &[("mission_id".into(), FieldValue::I32(10))],
        );
        assert_eq!(message.get_field("mission_id"), Some(&FieldValue::I32(10)));
    }
}
