//! Description registry: what each node is, plus the event and constant
//! definitions that apply network-wide or to a single node.

use crate::constants::{LOCAL_EVENT_BASE, UNKNOWN_EVENT_NAME};
use crate::error::ResolutionError;
use crate::wire::message::{EventId, LocalEvent, NamedConstant, NodeId, TargetDescription};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Contiguous range of a node's variable memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariableSlot {
    pub name: String,
    pub address: u16,
    pub length: u16,
}

/// Variables declared by a loaded script, keyed by name.
pub type UserVariables = BTreeMap<String, VariableSlot>;

/// Either a variable name or a raw memory range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableRef {
    Name(String),
    Range { start: u16, length: u16 },
}

impl From<&str> for VariableRef {
    fn from(name: &str) -> Self {
        VariableRef::Name(name.to_string())
    }
}

impl From<String> for VariableRef {
    fn from(name: String) -> Self {
        VariableRef::Name(name)
    }
}

/// A described node. Addresses are the running sum of the preceding sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDescription {
    pub id: NodeId,
    pub name: String,
    pub protocol_version: u16,
    pub bytecode_size: u16,
    pub variables_size: u16,
    pub stack_size: u16,
    pub variables: Vec<VariableSlot>,
    pub local_events: Vec<LocalEvent>,
    pub native_constants: Vec<NamedConstant>,
}

impl NodeDescription {
    pub fn from_target(id: NodeId, target: TargetDescription) -> Self {
        let mut address = 0u16;
        let variables = target
            .named_variables
            .into_iter()
            .map(|v| {
                let slot = VariableSlot {
                    name: v.name,
                    address,
                    length: v.size,
                };
                address = address.saturating_add(v.size);
                slot
            })
            .collect();
        Self {
            id,
            name: target.name,
            protocol_version: target.protocol_version,
            bytecode_size: target.bytecode_size,
            variables_size: target.variables_size,
            stack_size: target.stack_size,
            variables,
            local_events: target.local_events,
            native_constants: target.native_constants,
        }
    }

    pub fn variable(&self, name: &str) -> Option<&VariableSlot> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// First address after the native variables.
    pub fn native_end(&self) -> u16 {
        self.variables
            .last()
            .map(|v| v.address.saturating_add(v.length))
            .unwrap_or(0)
    }

    /// Event id of a node-local event.
    pub fn local_event_id(&self, name: &str) -> Option<EventId> {
        self.local_events
            .iter()
            .position(|e| e.name == name)
            .map(|i| LOCAL_EVENT_BASE - i as u16)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDefinition {
    pub name: String,
    #[serde(default)]
    pub size: u16,
}

/// Events and constants shared by a set of nodes. Event ids are positions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommonDefinitions {
    pub events: Vec<EventDefinition>,
    pub constants: Vec<NamedConstant>,
}

impl CommonDefinitions {
    pub fn event_id(&self, name: &str) -> Option<EventId> {
        self.events
            .iter()
            .position(|e| e.name == name)
            .map(|i| i as EventId)
    }

    pub fn event_name(&self, id: EventId) -> Option<&str> {
        self.events.get(id as usize).map(|e| e.name.as_str())
    }

    pub fn constant(&self, name: &str) -> Option<i16> {
        self.constants
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value)
    }
}

/// Lifecycle of one node id in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptionState {
    Unknown,
    Awaiting,
    Described,
}

#[derive(Debug, Clone)]
enum Entry {
    Awaiting,
    Described(Arc<NodeDescription>),
}

#[derive(Debug, Default)]
pub struct DescriptionRegistry {
    nodes: BTreeMap<NodeId, Entry>,
    network: CommonDefinitions,
    per_node: HashMap<NodeId, CommonDefinitions>,
    user_variables: HashMap<NodeId, UserVariables>,
}

impl DescriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, node: NodeId) -> DescriptionState {
        match self.nodes.get(&node) {
            None => DescriptionState::Unknown,
            Some(Entry::Awaiting) => DescriptionState::Awaiting,
            Some(Entry::Described(_)) => DescriptionState::Described,
        }
    }

    /// Move an unknown node to AWAITING. Returns false if it was already known.
    pub fn mark_awaiting(&mut self, node: NodeId) -> bool {
        if self.nodes.contains_key(&node) {
            return false;
        }
        self.nodes.insert(node, Entry::Awaiting);
        true
    }

    /// Replace whatever is known about `node` with a fresh description.
    pub fn apply(&mut self, node: NodeId, target: TargetDescription) -> Arc<NodeDescription> {
        let desc = Arc::new(NodeDescription::from_target(node, target));
        self.nodes.insert(node, Entry::Described(desc.clone()));
        desc
    }

    /// Forget a node whose link is gone.
    pub fn remove(&mut self, node: NodeId) -> bool {
        self.per_node.remove(&node);
        self.user_variables.remove(&node);
        self.nodes.remove(&node).is_some()
    }

    pub fn describe(&self, node: NodeId) -> Result<Arc<NodeDescription>, ResolutionError> {
        match self.nodes.get(&node) {
            Some(Entry::Described(d)) => Ok(d.clone()),
            Some(Entry::Awaiting) => Err(ResolutionError::NotDescribed(node)),
            None => Err(ResolutionError::UnknownNode(node)),
        }
    }

    /// All described nodes in id order.
    pub fn described(&self) -> Vec<Arc<NodeDescription>> {
        self.nodes
            .values()
            .filter_map(|e| match e {
                Entry::Described(d) => Some(d.clone()),
                Entry::Awaiting => None,
            })
            .collect()
    }

    /// Resolve a variable reference. Script-declared variables shadow native ones.
    pub fn resolve_variable(
        &self,
        node: NodeId,
        var: &VariableRef,
    ) -> Result<VariableSlot, ResolutionError> {
        let desc = self.describe(node)?;
        match var {
            VariableRef::Name(name) => self
                .user_variables
                .get(&node)
                .and_then(|vars| vars.get(name))
                .or_else(|| desc.variable(name))
                .cloned()
                .ok_or_else(|| ResolutionError::UnknownVariable {
                    node,
                    name: name.clone(),
                }),
            VariableRef::Range { start, length } => {
                let end = u32::from(*start) + u32::from(*length);
                if *length == 0 || end > u32::from(desc.variables_size) {
                    return Err(ResolutionError::OutOfRange {
                        node,
                        start: *start,
                        length: *length,
                    });
                }
                Ok(VariableSlot {
                    name: format!("@{}", start),
                    address: *start,
                    length: *length,
                })
            }
        }
    }

    /// Named variables visible on `node`: native ones followed by those the
    /// loaded script declared, in address order.
    pub fn variables(&self, node: NodeId) -> Result<Vec<VariableSlot>, ResolutionError> {
        let desc = self.describe(node)?;
        let mut slots = desc.variables.clone();
        if let Some(vars) = self.user_variables.get(&node) {
            slots.extend(vars.values().cloned());
        }
        slots.sort_by_key(|v| v.address);
        Ok(slots)
    }

    /// Definitions in effect for `scope`: the node's own table if one was
    /// loaded, otherwise the network-wide table.
    pub fn definitions(&self, scope: Option<NodeId>) -> &CommonDefinitions {
        scope
            .and_then(|n| self.per_node.get(&n))
            .unwrap_or(&self.network)
    }

    pub fn network_definitions(&self) -> &CommonDefinitions {
        &self.network
    }

    pub fn set_network_definitions(&mut self, defs: CommonDefinitions) {
        self.network = defs;
    }

    pub fn set_node_definitions(&mut self, node: NodeId, defs: CommonDefinitions) {
        self.per_node.insert(node, defs);
    }

    pub fn user_variables(&self, node: NodeId) -> Option<&UserVariables> {
        self.user_variables.get(&node)
    }

    pub fn set_user_variables(&mut self, node: NodeId, vars: UserVariables) {
        self.user_variables.insert(node, vars);
    }

    pub fn resolve_event(&self, scope: Option<NodeId>, name: &str) -> Result<EventId, ResolutionError> {
        if let Some(id) = self.definitions(scope).event_id(name) {
            return Ok(id);
        }
        scope
            .and_then(|n| self.describe(n).ok())
            .and_then(|d| d.local_event_id(name))
            .ok_or_else(|| ResolutionError::UnknownEvent(name.to_string()))
    }

    /// Name of an event id, or "?" when the id is out of range.
    pub fn event_name(&self, scope: Option<NodeId>, id: EventId) -> String {
        if let Some(name) = self.definitions(scope).event_name(id) {
            return name.to_string();
        }
        if id <= LOCAL_EVENT_BASE && id > LOCAL_EVENT_BASE - 64 {
            if let Some(local) = scope
                .and_then(|n| self.describe(n).ok())
                .and_then(|d| d.local_events.get((LOCAL_EVENT_BASE - id) as usize).cloned())
            {
                return local.name;
            }
        }
        UNKNOWN_EVENT_NAME.to_string()
    }

    pub fn has_event(&self, scope: Option<NodeId>, name: &str) -> bool {
        self.definitions(scope).event_id(name).is_some()
    }
}
