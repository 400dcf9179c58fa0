/// Emit a [`NodeEvent`](crate::events::model::NodeEvent) from the hub component.
#[macro_export]
macro_rules! emit_node_event {
    ($level:expr, $node:expr, $action:expr, $detail:expr) => {{
        use $crate::events::{dispatcher, model::*};
        let mut meta = dispatcher::meta("hub", $level);
        meta.corr_id = Some(dispatcher::correlation_id());
        dispatcher::emit(LogEvent::Node(NodeEvent {
            meta,
            node: $node,
            action: $action.to_string(),
            detail: $detail,
        }));
    }};
}

#[macro_export]
macro_rules! emit_system_event {
    ($component:expr, $level:expr, $action:expr, $detail:expr) => {{
        use $crate::events::{dispatcher, model::*};
        let mut meta = dispatcher::meta($component, $level);
        meta.corr_id = Some(dispatcher::correlation_id());
        dispatcher::emit(LogEvent::System(SystemEvent {
            meta,
            action: $action.to_string(),
            detail: $detail,
        }));
    }};
}
