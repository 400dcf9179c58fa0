// src/wire/message.rs

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};

/// Node identifier as carried on the wire.
pub type NodeId = u16;
/// Event identifier: index into the event definitions, or a local event slot.
pub type EventId = u16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedVariable {
    pub name: String,
    pub size: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalEvent {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedConstant {
    pub name: String,
    pub value: i16,
}

/// Self-description a node sends in reply to a description request.
/// Variable addresses are implied by declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescription {
    pub name: String,
    pub protocol_version: u16,
    pub bytecode_size: u16,
    pub variables_size: u16,
    pub stack_size: u16,
    #[serde(default)]
    pub named_variables: Vec<NamedVariable>,
    #[serde(default)]
    pub local_events: Vec<LocalEvent>,
    #[serde(default)]
    pub native_constants: Vec<NamedConstant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireMessage {
    /// Node announces itself (wire token: "NODE_PRESENT")
    #[serde(rename = "NODE_PRESENT")]
    NodePresent { source: NodeId, version: u16 },
    /// Broadcast request for every node to describe itself (wire token: "GET_DESCRIPTION")
    #[serde(rename = "GET_DESCRIPTION")]
    GetDescription,
    #[serde(rename = "GET_NODE_DESCRIPTION")]
    GetNodeDescription { dest: NodeId },
    #[serde(rename = "DESCRIPTION")]
    Description {
        source: NodeId,
        description: TargetDescription,
    },
    #[serde(rename = "GET_VARIABLES")]
    GetVariables { dest: NodeId, start: u16, length: u16 },
    /// Reply to GET_VARIABLES (wire token: "VARIABLES")
    #[serde(rename = "VARIABLES")]
    Variables {
        source: NodeId,
        start: u16,
        values: Vec<i16>,
    },
    #[serde(rename = "SET_VARIABLES")]
    SetVariables {
        dest: NodeId,
        start: u16,
        values: Vec<i16>,
    },
    /// Event fired by a node or by the bridge (wire token: "USER_MESSAGE")
    #[serde(rename = "USER_MESSAGE")]
    UserMessage {
        source: NodeId,
        event: EventId,
        data: Vec<i16>,
    },
    #[serde(rename = "BYTECODE")]
    BytecodeChunk {
        dest: NodeId,
        start: u16,
        words: Vec<u16>,
    },
    #[serde(rename = "RESET")]
    Reset { dest: NodeId },
    #[serde(rename = "RUN")]
    Run { dest: NodeId },
    #[serde(rename = "STOP")]
    Stop { dest: NodeId },
}

/// Broad category used by the hub to route inbound traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    Presence,
    Description,
    ValueReply,
    Event,
    Request,
}

impl WireMessage {
    pub fn as_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".into())
    }

    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(json.trim())?)
    }

    /// Short wire token, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::NodePresent { .. } => "NODE_PRESENT",
            WireMessage::GetDescription => "GET_DESCRIPTION",
            WireMessage::GetNodeDescription { .. } => "GET_NODE_DESCRIPTION",
            WireMessage::Description { .. } => "DESCRIPTION",
            WireMessage::GetVariables { .. } => "GET_VARIABLES",
            WireMessage::Variables { .. } => "VARIABLES",
            WireMessage::SetVariables { .. } => "SET_VARIABLES",
            WireMessage::UserMessage { .. } => "USER_MESSAGE",
            WireMessage::BytecodeChunk { .. } => "BYTECODE",
            WireMessage::Reset { .. } => "RESET",
            WireMessage::Run { .. } => "RUN",
            WireMessage::Stop { .. } => "STOP",
        }
    }

    pub fn class(&self) -> MessageClass {
        match self {
            WireMessage::NodePresent { .. } => MessageClass::Presence,
            WireMessage::Description { .. } => MessageClass::Description,
            WireMessage::Variables { .. } => MessageClass::ValueReply,
            WireMessage::UserMessage { .. } => MessageClass::Event,
            _ => MessageClass::Request,
        }
    }

    /// Originating node, for messages sent by nodes.
    pub fn source(&self) -> Option<NodeId> {
        match self {
            WireMessage::NodePresent { source, .. }
            | WireMessage::Description { source, .. }
            | WireMessage::Variables { source, .. }
            | WireMessage::UserMessage { source, .. } => Some(*source),
            _ => None,
        }
    }

    /// Addressed node, for messages sent to a single node.
    pub fn dest(&self) -> Option<NodeId> {
        match self {
            WireMessage::GetNodeDescription { dest }
            | WireMessage::GetVariables { dest, .. }
            | WireMessage::SetVariables { dest, .. }
            | WireMessage::BytecodeChunk { dest, .. }
            | WireMessage::Reset { dest }
            | WireMessage::Run { dest }
            | WireMessage::Stop { dest } => Some(*dest),
            _ => None,
        }
    }

    pub fn set_source(&mut self, id: NodeId) {
        match self {
            WireMessage::NodePresent { source, .. }
            | WireMessage::Description { source, .. }
            | WireMessage::Variables { source, .. }
            | WireMessage::UserMessage { source, .. } => *source = id,
            _ => {}
        }
    }

    pub fn set_dest(&mut self, id: NodeId) {
        match self {
            WireMessage::GetNodeDescription { dest }
            | WireMessage::GetVariables { dest, .. }
            | WireMessage::SetVariables { dest, .. }
            | WireMessage::BytecodeChunk { dest, .. }
            | WireMessage::Reset { dest }
            | WireMessage::Run { dest }
            | WireMessage::Stop { dest } => *dest = id,
            _ => {}
        }
    }
}
