//! The event wire protocol shared between nodes over an external bus.
//!
//! Every event carries the same header; payloads serialize to JSON via
//! serde. Delivery is best-effort and owned by whatever bus adapter the
//! application attaches to the engine.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::id::UniqueId;
use crate::message::Message;

pub const BUS_ADDRESS_PROTOCOL: &str = "jack";
const BUS_ADDRESS_FIELDS: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    #[default]
    Generic,
    Node,
    Service,
    Agent,
    Team,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Generic => "generic",
            NodeType::Node => "node",
            NodeType::Service => "service",
            NodeType::Agent => "agent",
            NodeType::Team => "team",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "generic" => Ok(NodeType::Generic),
            "node" => Ok(NodeType::Node),
            "service" => Ok(NodeType::Service),
            "agent" => Ok(NodeType::Agent),
            "team" => Ok(NodeType::Team),
            other => Err(CoreError::UnknownNodeType(other.to_string())),
        }
    }
}

/// Address of a bus-reachable entity, serialized as
/// `jack/<node|service|agent|team>/<name>/<uuid>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BusAddress {
    pub node_type: NodeType,
    pub name: String,
    pub id: UniqueId,
}

impl BusAddress {
    pub fn new(node_type: NodeType, name: impl Into<String>, id: UniqueId) -> Self {
        Self {
            node_type,
            name: name.into(),
            id,
        }
    }

    pub fn valid(&self) -> bool {
        !self.name.is_empty() && self.id.valid()
    }

    /// The forward-slash-delimited wire form with exactly four fields.
    pub fn to_wire_string(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            BUS_ADDRESS_PROTOCOL,
            self.node_type.as_str(),
            self.name,
            self.id
        )
    }

    /// Parse the wire form. Any field count other than four is rejected.
    pub fn from_wire_string(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.split('/').collect();
        if fields.len() != BUS_ADDRESS_FIELDS {
            return Err(CoreError::MalformedAddress(format!(
                "expected {} fields, got {} in '{}'",
                BUS_ADDRESS_FIELDS,
                fields.len(),
                s
            )));
        }
        if fields[0] != BUS_ADDRESS_PROTOCOL {
            return Err(CoreError::MalformedAddress(format!(
                "unknown protocol '{}' in '{}'",
                fields[0], s
            )));
        }
        let node_type = NodeType::parse(fields[1])?;
        let id = UniqueId::parse(fields[3])
            .ok_or_else(|| CoreError::MalformedAddress(format!("bad uuid in '{s}'")))?;
        Ok(Self {
            node_type,
            name: fields[2].to_string(),
            id,
        })
    }
}

impl std::fmt::Display for BusAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_wire_string())
    }
}

/// Wire event discriminator. The order is part of the protocol and must
/// stay stable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    #[default]
    None,
    Control,
    Percept,
    Message,
    Pursue,
    Drop,
    Delegation,
    Register,
    Deregister,
    AgentJoinTeam,
    AgentLeaveTeam,
    ActionBegin,
    ActionUpdate,
    BdiLog,
}

impl EventType {
    pub const COUNT: usize = 14;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DropMode {
    #[default]
    Normal,
    Force,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DelegationStatus {
    #[default]
    Pending,
    Failed,
    Success,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BdiLogLevel {
    #[default]
    Normal,
    Important,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BdiLogResult {
    Failed,
    Success,
    Dropped,
}

/// Header shared by every event on the bus.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireHeader {
    pub timestamp_us: u64,
    pub event_type: EventType,
    pub sender_node: BusAddress,
    pub sender: BusAddress,
    pub recipient: BusAddress,
    pub event_id: UniqueId,
}

/// BDI-level observability record pushed onto the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BdiLog {
    pub level: BdiLogLevel,
    pub goal: String,
    pub goal_id: String,
    pub intention_id: String,
    pub plan: String,
    pub task_id: String,
    pub body: BdiLogBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "type")]
pub enum BdiLogBody {
    GoalStarted,
    GoalFinished {
        result: BdiLogResult,
        drop_reason: String,
    },
    SubGoalStarted,
    SubGoalFinished {
        result: BdiLogResult,
        drop_reason: String,
    },
    IntentionStarted,
    IntentionFinished {
        result: BdiLogResult,
    },
    ActionStarted {
        action: String,
    },
    ActionFinished {
        action: String,
        success: bool,
        reasoning: String,
    },
    SleepStarted {
        sleep_ms: u64,
    },
    SleepFinished,
    Condition {
        condition: String,
        success: bool,
    },
}

/// The payloads that cross the bus, one per [`EventType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "payload")]
pub enum WirePayload {
    None,
    Control {
        command: String,
    },
    Percept {
        schema: String,
        field: crate::field::Field,
    },
    Message {
        message: Message,
    },
    Pursue {
        goal: String,
        persistent: bool,
        message: Option<Message>,
    },
    Drop {
        goal: String,
        goal_id: String,
        mode: DropMode,
        reason: String,
    },
    Delegation {
        status: DelegationStatus,
        goal: String,
        goal_id: String,
        analyse: bool,
        score: f32,
        team: BusAddress,
        team_schedule_id: u64,
        message: Option<Message>,
    },
    Register {
        address: BusAddress,
        template: String,
    },
    Deregister {
        address: BusAddress,
    },
    AgentJoinTeam {
        team: BusAddress,
        agent: BusAddress,
    },
    AgentLeaveTeam {
        team: BusAddress,
        agent: BusAddress,
    },
    ActionBegin {
        name: String,
        task_id: String,
        goal: String,
        goal_id: String,
        intention_id: String,
        plan: String,
        message: Option<Message>,
        resource_locks: Vec<String>,
    },
    ActionUpdate {
        name: String,
        task_id: String,
        goal: String,
        goal_id: String,
        intention_id: String,
        plan: String,
        success: bool,
        reply: Option<Message>,
    },
    BdiLog {
        log: BdiLog,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEvent {
    #[serde(flatten)]
    pub header: WireHeader,
    #[serde(flatten)]
    pub payload: WirePayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_address_round_trip() {
        let address = BusAddress::new(NodeType::Team, "Coordinator", UniqueId::random());
        let text = address.to_wire_string();
        assert!(text.starts_with("jack/team/Coordinator/"));
        let parsed = BusAddress::from_wire_string(&text).unwrap();
        assert_eq!(parsed, address);
    }

    #[test]
    fn test_bus_address_rejects_wrong_field_count() {
        assert!(BusAddress::from_wire_string("jack/agent/bob").is_err());
        assert!(BusAddress::from_wire_string("jack/agent/bob/x/y").is_err());
        assert!(BusAddress::from_wire_string("").is_err());
    }

    #[test]
    fn test_bus_address_rejects_bad_protocol_and_type() {
        let id = UniqueId::random();
        assert!(BusAddress::from_wire_string(&format!("mqtt/agent/bob/{id}")).is_err());
        assert!(BusAddress::from_wire_string(&format!("jack/robot/bob/{id}")).is_err());
        assert!(BusAddress::from_wire_string("jack/agent/bob/not-a-uuid").is_err());
    }

    #[test]
    fn test_wire_event_json_round_trip() {
        let event = WireEvent {
            header: WireHeader {
                timestamp_us: 42,
                event_type: EventType::Pursue,
                sender_node: BusAddress::new(NodeType::Node, "n0", UniqueId::random()),
                sender: BusAddress::new(NodeType::Agent, "bob", UniqueId::random()),
                recipient: BusAddress::new(NodeType::Agent, "bob", UniqueId::random()),
                event_id: UniqueId::random(),
            },
            payload: WirePayload::Pursue {
                goal: "AchieveMission".into(),
                persistent: false,
                message: None,
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: WireEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
