//! The Volition runtime: event dispatch, the intention executor and
//! agent executor, the forward-planning scheduler, agents, teams,
//! services and the engine that ticks them.

pub mod agent;
pub mod agent_executor;
pub mod builders;
pub mod bus;
pub mod dag;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod event;
pub mod executor;
pub mod schedule;
pub mod service;
pub mod team;

pub use agent::{dirty, Agent, AgentTemplate};
pub use agent_executor::{AgentExecutor, RunningState};
pub use builders::CoroutineBuilder;
pub use bus::BusAdapter;
pub use dag::{ChainEntry, IntentionDag};
pub use dispatch::{EventQueue, QueueHandle, Router};
pub use engine::{
    ActionTemplate, AgentInfo, Engine, EngineCtx, EngineThread, PollResult, Registry, Role,
    ServiceInfo, Settings,
};
pub use error::{EngineError, Result};
pub use event::{
    ActionCompleteEvent, ActionEvent, ControlCommand, Event, EventBody, EventStatus, GoalPromise,
    GoalPursue,
};
pub use executor::{ExecutorNote, ExecutorState, IntentionExecutor};
pub use schedule::{failure, PlanCandidate, PlannerGoal, Schedule, ScheduleState, FAILED_COST};
pub use service::{ActionCompleter, EntityState, Service, ServiceTemplate};
pub use team::{CurrentAuction, SharedBelief, TeamState};

// The data model crates are re-exported so applications depend on one
// crate.
pub use volition_bdi as bdi;
pub use volition_core as core;
