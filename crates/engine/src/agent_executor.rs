use volition_core::UniqueId;

use crate::dag::{ChainEntry, IntentionDag};
use crate::executor::{ExecutorId, IntentionExecutor};

/// Rolled-up state of an agent's executors over the last tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunningState {
    Idle,
    Busy,
    Waiting,
    Stopped,
}

/// Multiplexes an agent's intention executors: one executor per live
/// desire, sequenced and parallelised by the intention DAG derived from
/// the current schedule's best chain.
#[derive(Default)]
pub struct AgentExecutor {
    executors: Vec<IntentionExecutor>,
    pub dag: IntentionDag,
}

impl AgentExecutor {
    pub fn executors(&self) -> &[IntentionExecutor] {
        &self.executors
    }

    pub fn executors_mut(&mut self) -> &mut [IntentionExecutor] {
        &mut self.executors
    }

    pub fn add_executor(&mut self, executor: IntentionExecutor) -> ExecutorId {
        let id = executor.id();
        self.executors.push(executor);
        id
    }

    pub fn by_id_mut(&mut self, id: ExecutorId) -> Option<&mut IntentionExecutor> {
        self.executors.iter_mut().find(|e| e.id() == id)
    }

    pub fn by_desire(&self, desire_id: UniqueId) -> Option<&IntentionExecutor> {
        self.executors
            .iter()
            .find(|e| e.desire_handle().id == desire_id)
    }

    pub fn by_desire_mut(&mut self, desire_id: UniqueId) -> Option<&mut IntentionExecutor> {
        self.executors
            .iter_mut()
            .find(|e| e.desire_handle().id == desire_id)
    }

    pub fn by_intention_mut(&mut self, intention_id: UniqueId) -> Option<&mut IntentionExecutor> {
        self.executors
            .iter_mut()
            .find(|e| e.intention_id() == intention_id)
    }

    /// Find the executor whose active coroutine owns the given task.
    pub fn by_task_mut(&mut self, task_id: UniqueId) -> Option<&mut IntentionExecutor> {
        self.executors.iter_mut().find(|e| {
            e.current_plan()
                .map(|p| p.has_task(task_id))
                .unwrap_or(false)
        })
    }

    pub fn remove_concluded(&mut self) -> Vec<IntentionExecutor> {
        let (concluded, live): (Vec<_>, Vec<_>) = std::mem::take(&mut self.executors)
            .into_iter()
            .partition(|e| e.is_concluded());
        self.executors = live;
        concluded
    }

    pub fn remove_by_desire(&mut self, desire_id: UniqueId) {
        self.executors.retain(|e| e.desire_handle().id != desire_id);
    }

    /// Bind a fresh best chain. The DAG is rebuilt; live executors are
    /// kept and re-matched against chain entries as their nodes open.
    pub fn bind_chain(&mut self, chain: Vec<ChainEntry>) {
        self.dag.set_chain(chain);
    }

    pub fn running_state(&self, stopped: bool) -> RunningState {
        if stopped {
            return RunningState::Stopped;
        }
        if self.executors.is_empty() {
            return RunningState::Idle;
        }
        if self.executors.iter().all(|e| e.is_waiting()) {
            return RunningState::Waiting;
        }
        RunningState::Busy
    }

    pub fn is_executing(&self) -> bool {
        self.executors
            .iter()
            .any(|e| !e.is_concluded() && !e.is_waiting())
    }
}
