//! Core data model for the Volition BDI runtime: identities, handles,
//! schema-typed messages, resources and the bus wire protocol.

pub mod error;
pub mod field;
pub mod handles;
pub mod id;
pub mod message;
pub mod protocol;
pub mod resource;

pub use error::{CoreError, Result};
pub use field::{Field, FieldKind, FieldRegistry, FieldValue};
pub use handles::{ActionHandle, AgentHandle, GoalHandle, ServiceHandle, TacticHandle};
pub use id::UniqueId;
pub use message::{FieldSpec, Message, MessageSchema};
pub use protocol::{
    BdiLogLevel, BdiLogResult, BusAddress, DelegationStatus, DropMode, EventType, NodeType,
};
pub use resource::Resource;

/// Outcome of a goal, plan or intention.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FinishState {
    #[default]
    NotYet,
    Failed,
    Dropped,
    Success,
}

impl FinishState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FinishState::NotYet)
    }
}
