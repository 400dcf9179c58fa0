use crate::events::{
    dispatcher,
    model::{LogEvent, LogLevel, NetworkEvent},
};
use crate::wire::link::LinkId;

/// Emit a structured link event; `allow_console = false` keeps it out of the console sink.
pub(crate) fn emit_link_event(
    component: &'static str,
    level: LogLevel,
    action: &str,
    link: Option<LinkId>,
    addr: Option<String>,
    detail: Option<String>,
    allow_console: bool,
) {
    let mut meta = dispatcher::meta(component, level);
    meta.corr_id = Some(dispatcher::correlation_id());
    meta.suppress_console = !allow_console;
    dispatcher::emit(LogEvent::Network(NetworkEvent {
        meta,
        action: action.to_string(),
        link: link.map(|l| l.0),
        addr,
        detail,
    }));
}
