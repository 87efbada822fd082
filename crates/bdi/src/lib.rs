//! The BDI data model: belief contexts, goals, plans, tactics and the
//! task-graph coroutines that form plan bodies.

pub mod beliefs;
pub mod coroutine;
pub mod error;
pub mod goal;
pub mod plan;
pub mod query;
pub mod tactic;
pub mod task;

pub use beliefs::{BeliefContext, MessageQuery, SearchContext, SharedMessage, SharedResource};
pub use coroutine::{Coroutine, TERMINAL};
pub use error::{BdiError, Result};
pub use goal::{Goal, GoalParent, PlanHistory, PlanSelection};
pub use plan::{DropState, Plan, PlanStatus};
pub use query::{BeliefQuery, Heuristic};
pub use tactic::{PlanOrder, Tactic, LOOP_PLANS_INFINITE};
pub use task::{bind_message, ParamMapping, Task, TaskEffect, TaskKind, TaskState, TaskStatus, TaskTick};
