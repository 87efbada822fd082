use volition_core::UniqueId;

use crate::task::{Task, TaskEffect, TaskKind, TaskState, TaskStatus, TaskTick};

/// Edge target marking the end of the coroutine.
pub const TERMINAL: i32 = -1;

/// A labeled task graph with success/fail edges, forming either a plan's
/// body or its drop sequence.
///
/// One task executes per tick at the `current` index. Tasks suspend by
/// entering `Wait`/`Yield`; async tasks let the coroutine continue but
/// hold `finished()` false until their completions arrive.
#[derive(Debug, Clone, Default)]
pub struct Coroutine {
    tasks: Vec<Task>,
    current: usize,
    succeeded: bool,
    async_outstanding: u32,
}

impl Coroutine {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            current: 0,
            succeeded: true,
            async_outstanding: 0,
        }
    }

    /// Append a task. The predecessor's success edge is pointed at the new
    /// task if it still targets [`TERMINAL`]. Returns the new task's label.
    pub fn add_task(&mut self, kind: TaskKind, id: UniqueId) -> i32 {
        let label = self.tasks.len() as i32;
        if let Some(previous) = self.tasks.last_mut() {
            if previous.success_target() == TERMINAL {
                previous.set_success_target(label);
            }
        }
        self.tasks.push(Task::new(kind, id));
        label
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Apply `f` to the most recently added task (builder support).
    pub fn with_last_task(&mut self, f: impl FnOnce(&mut Task)) {
        if let Some(task) = self.tasks.last_mut() {
            f(task);
        }
    }

    pub fn set_success_edge(&mut self, source: i32, target: i32) {
        if let Some(task) = self.task_at_mut(source) {
            task.set_success_target(target);
        }
    }

    pub fn set_fail_edge(&mut self, source: i32, target: i32) {
        if let Some(task) = self.task_at_mut(source) {
            task.set_fail_target(target);
        }
    }

    fn task_at_mut(&mut self, label: i32) -> Option<&mut Task> {
        usize::try_from(label).ok().and_then(|i| self.tasks.get_mut(i))
    }

    pub fn reset(&mut self) {
        self.current = 0;
        self.succeeded = true;
        self.async_outstanding = 0;
        for task in &mut self.tasks {
            task.reset();
        }
    }

    pub fn current_task(&self) -> Option<&Task> {
        self.tasks.get(self.current)
    }

    pub fn is_current_task(&self, id: UniqueId) -> bool {
        self.current_task().map(|t| t.id == id).unwrap_or(false)
    }

    /// True while the current task awaits an external completion.
    pub fn waiting(&self) -> bool {
        self.current_task()
            .map(|t| t.state() == TaskState::Wait)
            .unwrap_or(false)
    }

    /// Terminal outcome of the coroutine: `Some(succeeded)` once every
    /// path has run to a terminal edge and no async work is outstanding.
    pub fn completion(&self) -> Option<bool> {
        if self.async_outstanding > 0 {
            return None;
        }
        if self.current >= self.tasks.len() {
            return Some(self.succeeded);
        }
        let task = &self.tasks[self.current];
        if task.state() == TaskState::Done {
            match task.status() {
                TaskStatus::Succeeded if task.success_target() == TERMINAL => Some(true),
                TaskStatus::Failed if task.fail_target() == TERMINAL => Some(false),
                _ => None,
            }
        } else {
            None
        }
    }

    pub fn finished(&self) -> bool {
        self.completion().is_some()
    }

    /// Execute at most one task at the current index, following its
    /// success or fail edge when it completes.
    pub fn tick(&mut self, tick: &TaskTick) -> Vec<TaskEffect> {
        let mut effects = Vec::new();
        if self.current >= self.tasks.len() {
            return effects;
        }

        let (advanced, effect) = self.tasks[self.current].tick(tick);
        effects.extend(effect);
        if !advanced {
            return effects;
        }

        let task = &self.tasks[self.current];
        if task.state() == TaskState::Async {
            self.async_outstanding += 1;
        }

        let target = match task.status() {
            TaskStatus::Succeeded => task.success_target(),
            TaskStatus::Failed => task.fail_target(),
        };
        if target == TERMINAL {
            self.succeeded = task.status() == TaskStatus::Succeeded;
            self.current = self.tasks.len();
        } else {
            self.current = target as usize;
            if let Some(next) = self.tasks.get_mut(self.current) {
                next.set_ready();
            }
        }
        effects
    }

    /// Complete the current task when the incoming id matches. Returns
    /// true when the completion was routed.
    pub fn on_task_complete(&mut self, task_id: UniqueId, success: bool) -> bool {
        let matches_current = self.is_current_task(task_id);
        if matches_current {
            let task = &mut self.tasks[self.current];
            if success {
                task.succeed();
            } else {
                task.fail();
            }
            return true;
        }
        self.mark_async_done(task_id, success)
    }

    /// Complete an async task that the coroutine has already moved past.
    pub fn mark_async_done(&mut self, task_id: UniqueId, success: bool) -> bool {
        let Some(task) = self
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id && t.state() == TaskState::Async)
        else {
            return false;
        };
        if success {
            task.succeed();
        } else {
            task.fail();
        }
        self.async_outstanding = self.async_outstanding.saturating_sub(1);
        true
    }

    /// True if the task with the given id exists in this coroutine.
    pub fn has_task(&self, task_id: UniqueId) -> bool {
        self.tasks.iter().any(|t| t.id == task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beliefs::BeliefContext;
    use crate::query::BeliefQuery;
    use volition_core::GoalHandle;

    fn print_task(msg: &str) -> TaskKind {
        TaskKind::Print {
            message: msg.to_string(),
        }
    }

    fn run_to_completion(coroutine: &mut Coroutine) -> bool {
        let context = BeliefContext::new();
        let desire = GoalHandle::new("G", UniqueId::random());
        for _ in 0..32 {
            let tick = TaskTick {
                context: &context,
                desire: &desire,
                intention_id: UniqueId::random(),
                plan: "P",
            };
            coroutine.tick(&tick);
            if let Some(result) = coroutine.completion() {
                return result;
            }
        }
        panic!("coroutine did not finish");
    }

    #[test]
    fn test_tasks_chain_by_default() {
        let mut coroutine = Coroutine::new();
        let first = coroutine.add_task(print_task("a"), UniqueId::random());
        let second = coroutine.add_task(print_task("b"), UniqueId::random());
        assert_eq!(first, 0);
        assert_eq!(second, 1);
        assert_eq!(coroutine.tasks()[0].success_target(), 1);
        assert_eq!(coroutine.tasks()[1].success_target(), TERMINAL);
        assert!(run_to_completion(&mut coroutine));
    }

    #[test]
    fn test_fail_edge_routing() {
        let mut coroutine = Coroutine::new();
        let cond = coroutine.add_task(
            TaskKind::Conditional {
                query: BeliefQuery::new(|_| false),
            },
            UniqueId::random(),
        );
        coroutine.add_task(print_task("unreachable"), UniqueId::random());
        let recover = coroutine.add_task(print_task("recover"), UniqueId::random());
        coroutine.set_fail_edge(cond, recover);

        // Conditional fails, jumps to 'recover', which terminates with
        // success.
        assert!(run_to_completion(&mut coroutine));
    }

    #[test]
    fn test_failed_terminal_fails_coroutine() {
        let mut coroutine = Coroutine::new();
        coroutine.add_task(
            TaskKind::Conditional {
                query: BeliefQuery::new(|_| false),
            },
            UniqueId::random(),
        );
        assert!(!run_to_completion(&mut coroutine));
    }

    #[test]
    fn test_wait_task_blocks_until_completed() {
        let mut coroutine = Coroutine::new();
        let task_id = UniqueId::random();
        coroutine.add_task(
            TaskKind::Action {
                name: "Act".into(),
            },
            task_id,
        );

        let context = BeliefContext::new();
        let desire = GoalHandle::new("G", UniqueId::random());
        let tick = TaskTick {
            context: &context,
            desire: &desire,
            intention_id: UniqueId::random(),
            plan: "P",
        };
        let effects = coroutine.tick(&tick);
        assert_eq!(effects.len(), 1);
        assert!(coroutine.waiting());
        assert!(!coroutine.finished());

        assert!(coroutine.on_task_complete(task_id, true));
        coroutine.tick(&tick);
        assert_eq!(coroutine.completion(), Some(true));
    }

    #[test]
    fn test_async_accounting_blocks_finish() {
        let mut coroutine = Coroutine::new();
        let task_id = UniqueId::random();
        coroutine.add_task(
            TaskKind::Action {
                name: "Act".into(),
            },
            task_id,
        );
        coroutine.with_last_task(|t| t.nowait());

        let context = BeliefContext::new();
        let desire = GoalHandle::new("G", UniqueId::random());
        let tick = TaskTick {
            context: &context,
            desire: &desire,
            intention_id: UniqueId::random(),
            plan: "P",
        };
        coroutine.tick(&tick);
        // The async task no longer blocks the cursor, but the coroutine
        // cannot report finished until the completion arrives.
        assert!(coroutine.completion().is_none());

        assert!(coroutine.mark_async_done(task_id, true));
        assert_eq!(coroutine.completion(), Some(true));
    }
}
