//! Error taxonomy shared by the hub and its front-ends.

use crate::wire::link::LinkId;
use crate::wire::message::NodeId;
use thiserror::Error;

/// Failure to move bytes over a wire link.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{0} is not connected")]
    UnknownLink(LinkId),
    #[error("{0} send queue is full")]
    QueueFull(LinkId),
    #[error("{0} is closed")]
    Closed(LinkId),
    #[error("invalid target '{0}'")]
    InvalidTarget(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A name, id or address that cannot be mapped to a live node entity.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("node {0} is unknown")]
    UnknownNode(NodeId),
    #[error("node {0} has not been described yet")]
    NotDescribed(NodeId),
    #[error("node {node} has no variable '{name}'")]
    UnknownVariable { node: NodeId, name: String },
    #[error("variable range {start}+{length} is outside node {node} memory")]
    OutOfRange { node: NodeId, start: u16, length: u16 },
    #[error("no event named '{0}'")]
    UnknownEvent(String),
}

/// A wire line that does not decode into a known message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed wire message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Compiler diagnostic, surfaced to callers verbatim.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{node}: line {line}: {message}")]
pub struct CompileError {
    pub node: String,
    pub line: usize,
    pub message: String,
}

/// Why a pending variable read will never produce a value.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ReadFailure {
    #[error("link to node {0} was lost")]
    LinkLost(NodeId),
    #[error("request to node {0} could not be queued on its link")]
    SendFailed(NodeId),
    #[error("read was abandoned")]
    Abandoned,
}

/// Script bundle loading failures.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid script bundle: {0}")]
    Bundle(#[from] toml::de::Error),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
}
