use serde::Serialize;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LinkDirection {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventMeta {
    pub ts: SystemTime,
    pub level: LogLevel,
    pub corr_id: Option<String>,
    pub session_id: String,
    pub component: &'static str,
    pub suppress_console: bool,
}

/// Link lifecycle and wire traffic.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkEvent {
    pub meta: EventMeta,
    pub action: String,
    pub link: Option<u64>,
    pub addr: Option<String>,
    pub detail: Option<String>,
}

/// Node lifecycle as seen by the hub (presence, description, link loss).
#[derive(Debug, Clone, Serialize)]
pub struct NodeEvent {
    pub meta: EventMeta,
    pub node: u16,
    pub action: String,
    pub detail: Option<String>,
}

/// One completed front-end request.
#[derive(Debug, Clone, Serialize)]
pub struct RequestEvent {
    pub meta: EventMeta,
    pub client: Option<String>,
    pub method: String,
    pub path: String,
    pub status: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemEvent {
    pub meta: EventMeta,
    pub action: String,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEvent {
    Network(NetworkEvent),
    Node(NodeEvent),
    Request(RequestEvent),
    System(SystemEvent),
}

impl LogEvent {
    pub fn meta(&self) -> &EventMeta {
        match self {
            LogEvent::Network(e) => &e.meta,
            LogEvent::Node(e) => &e.meta,
            LogEvent::Request(e) => &e.meta,
            LogEvent::System(e) => &e.meta,
        }
    }

    pub fn action(&self) -> &str {
        match self {
            LogEvent::Network(e) => &e.action,
            LogEvent::Node(e) => &e.action,
            LogEvent::Request(_) => "request",
            LogEvent::System(e) => &e.action,
        }
    }
}
