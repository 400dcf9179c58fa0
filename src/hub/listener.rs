use crate::events::model::LogLevel;
use crate::wire::events::emit_link_event;
use crate::wire::link::LinkId;
use crate::wire::message::{NodeId, WireMessage};

/// Callbacks a front-end registers with the hub. Invoked outside the hub lock,
/// from the task that read the message.
pub trait HubListener: Send + Sync {
    fn on_connect(&self, _link: LinkId, _target: &str) {}

    /// `message` carries canonical node ids.
    fn on_message(&self, _link: LinkId, _message: &WireMessage) {}

    /// `nodes` lists the canonical ids that disappeared with the link.
    fn on_disconnect(&self, _link: LinkId, _nodes: &[NodeId]) {}
}

/// Logs every wire message (`--dump`).
pub struct DumpListener {
    pub allow_console: bool,
}

impl HubListener for DumpListener {
    fn on_connect(&self, link: LinkId, target: &str) {
        emit_link_event(
            "dump",
            LogLevel::Info,
            "link_up",
            Some(link),
            Some(target.to_string()),
            None,
            self.allow_console,
        );
    }

    fn on_message(&self, link: LinkId, message: &WireMessage) {
        emit_link_event(
            "dump",
            LogLevel::Info,
            "message_dump",
            Some(link),
            None,
            Some(message.as_json()),
            self.allow_console,
        );
    }

    fn on_disconnect(&self, link: LinkId, nodes: &[NodeId]) {
        emit_link_event(
            "dump",
            LogLevel::Info,
            "link_down",
            Some(link),
            None,
            Some(format!("nodes={:?}", nodes)),
            self.allow_console,
        );
    }
}
