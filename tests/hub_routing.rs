// tests/hub_routing.rs
// Hub behaviour over fake links: each link is an mpsc receiver standing in
// for the writer task of a real TCP connection.

use nodebridge::config::HubSettings;
use nodebridge::descriptions::{DescriptionState, VariableRef};
use nodebridge::error::{ReadFailure, ResolutionError};
use nodebridge::hub::{Hub, ReadMode};
use nodebridge::subscriptions::EventFilter;
use nodebridge::wire::message::{LocalEvent, NamedVariable, TargetDescription};
use nodebridge::wire::{LinkId, NodeId, WireMessage};
use tokio::sync::mpsc;

struct FakeLink {
    id: LinkId,
    rx: mpsc::Receiver<String>,
}

impl FakeLink {
    fn attach(hub: &Hub, name: &str) -> Self {
        let (tx, rx) = mpsc::channel(64);
        let (id, _closed) = hub.attach_link(name.to_string(), tx);
        let mut link = FakeLink { id, rx };
        assert_eq!(link.drain(), vec![WireMessage::GetDescription]);
        link
    }

    fn drain(&mut self) -> Vec<WireMessage> {
        let mut out = Vec::new();
        while let Ok(line) = self.rx.try_recv() {
            out.push(WireMessage::from_json(&line).unwrap());
        }
        out
    }
}

fn target(name: &str, vars: &[(&str, u16)]) -> TargetDescription {
    TargetDescription {
        name: name.into(),
        protocol_version: 5,
        bytecode_size: 1000,
        variables_size: 100,
        stack_size: 32,
        named_variables: vars
            .iter()
            .map(|(n, s)| NamedVariable {
                name: n.to_string(),
                size: *s,
            })
            .collect(),
        local_events: vec![LocalEvent {
            name: "button".into(),
            description: String::new(),
        }],
        native_constants: vec![],
    }
}

fn describe(hub: &Hub, link: &FakeLink, native: NodeId, name: &str) {
    hub.handle_incoming(
        link.id,
        WireMessage::Description {
            source: native,
            description: target(name, &[("a", 1), ("b", 3)]),
        },
    );
}

fn hub() -> Hub {
    Hub::new(HubSettings::default(), false)
}

#[tokio::test]
async fn concurrent_reads_share_one_request() {
    let hub = hub();
    let mut link = FakeLink::attach(&hub, "node-a");
    describe(&hub, &link, 1, "thymio-II");
    assert!(link.drain().is_empty());

    let first = hub.read(1, &VariableRef::from("b"), ReadMode::Fresh).unwrap();
    let second = hub.read(1, &VariableRef::from("b"), ReadMode::Fresh).unwrap();
    assert_eq!(
        link.drain(),
        vec![WireMessage::GetVariables {
            dest: 1,
            start: 1,
            length: 3
        }]
    );

    hub.handle_incoming(
        link.id,
        WireMessage::Variables {
            source: 1,
            start: 1,
            values: vec![4, 5, 6],
        },
    );
    assert_eq!(first.value().await, Ok(vec![4, 5, 6]));
    assert_eq!(second.value().await, Ok(vec![4, 5, 6]));
    assert_eq!(hub.status().pending_reads, 0);
}

#[tokio::test]
async fn dropped_read_leaves_no_pending_entry() {
    let hub = hub();
    let link = FakeLink::attach(&hub, "node-a");
    describe(&hub, &link, 1, "thymio-II");
    let pending = hub.read(1, &VariableRef::from("a"), ReadMode::Fresh).unwrap();
    assert_eq!(hub.status().pending_reads, 1);
    drop(pending);
    assert_eq!(hub.status().pending_reads, 0);
}

#[tokio::test]
async fn unknown_names_never_reach_the_wire() {
    let hub = hub();
    let mut link = FakeLink::attach(&hub, "node-a");
    describe(&hub, &link, 1, "thymio-II");
    assert!(matches!(
        hub.read(1, &VariableRef::from("nope"), ReadMode::Fresh),
        Err(ResolutionError::UnknownVariable { .. })
    ));
    assert!(matches!(
        hub.read(9, &VariableRef::from("a"), ReadMode::Fresh),
        Err(ResolutionError::UnknownNode(9))
    ));
    assert_eq!(
        hub.fire(None, "nope", vec![]),
        Err(ResolutionError::UnknownEvent("nope".into()))
    );
    assert!(link.drain().is_empty());
    assert_eq!(hub.status().pending_reads, 0);
}

#[tokio::test]
async fn write_then_cached_read_sees_written_value() {
    let hub = hub();
    let mut link = FakeLink::attach(&hub, "node-a");
    describe(&hub, &link, 1, "thymio-II");

    hub.write(1, &VariableRef::from("b"), vec![7, 8, 9]).unwrap();
    assert_eq!(
        link.drain(),
        vec![WireMessage::SetVariables {
            dest: 1,
            start: 1,
            values: vec![7, 8, 9]
        }]
    );

    let cached = hub.read(1, &VariableRef::from("b"), ReadMode::Cached).unwrap();
    assert_eq!(cached.value().await, Ok(vec![7, 8, 9]));
    assert!(link.drain().is_empty());
    assert_eq!(
        hub.cached(1, &VariableRef::from("b")).unwrap(),
        Some(vec![7, 8, 9])
    );
}

#[tokio::test]
async fn firing_without_subscribers_sends_exactly_one_message_per_link() {
    let hub = hub();
    let mut a = FakeLink::attach(&hub, "node-a");
    let mut b = FakeLink::attach(&hub, "node-b");

    hub.fire_id(None, 3, vec![1, 2]);
    let expected = vec![WireMessage::UserMessage {
        source: 0,
        event: 3,
        data: vec![1, 2],
    }];
    assert_eq!(a.drain(), expected);
    assert_eq!(b.drain(), expected);
}

#[tokio::test]
async fn local_events_fire_by_name() {
    let hub = hub();
    let mut link = FakeLink::attach(&hub, "node-a");
    describe(&hub, &link, 1, "thymio-II");
    let id = hub.fire(Some(1), "button", vec![]).unwrap();
    assert_eq!(id, 0xfffe);
    assert_eq!(
        link.drain(),
        vec![WireMessage::UserMessage {
            source: 0,
            event: 0xfffe,
            data: vec![]
        }]
    );
}

#[tokio::test]
async fn node_events_reach_subscribers_with_resolved_names() {
    let hub = hub();
    let link = FakeLink::attach(&hub, "node-a");
    describe(&hub, &link, 1, "thymio-II");
    let mut all = hub.subscribe(EventFilter::all());
    let mut buttons = hub.subscribe(EventFilter::names(["button"]));

    hub.handle_incoming(
        link.id,
        WireMessage::UserMessage {
            source: 1,
            event: 42,
            data: vec![3],
        },
    );
    hub.handle_incoming(
        link.id,
        WireMessage::UserMessage {
            source: 1,
            event: 0xfffe,
            data: vec![],
        },
    );

    let unknown = all.try_recv().unwrap();
    assert_eq!((unknown.source, unknown.name.as_str()), (1, "?"));
    assert_eq!(unknown.to_line(), "? 3");
    assert_eq!(all.try_recv().unwrap().name, "button");
    assert_eq!(buttons.try_recv().unwrap().name, "button");
    assert!(buttons.try_recv().is_none());

    drop(all);
    assert_eq!(hub.status().subscribers, 1);
}

#[tokio::test]
async fn unknown_source_triggers_one_description_request() {
    let hub = hub();
    let mut link = FakeLink::attach(&hub, "node-a");
    hub.handle_incoming(link.id, WireMessage::NodePresent { source: 5, version: 5 });
    assert_eq!(
        link.drain(),
        vec![WireMessage::GetNodeDescription { dest: 5 }]
    );
    assert_eq!(hub.description_state(5), DescriptionState::Awaiting);

    hub.handle_incoming(link.id, WireMessage::NodePresent { source: 5, version: 5 });
    assert!(link.drain().is_empty());

    describe(&hub, &link, 5, "dummynode");
    assert_eq!(hub.description_state(5), DescriptionState::Described);
}

#[tokio::test]
async fn link_loss_fails_pending_reads() {
    let hub = hub();
    let link = FakeLink::attach(&hub, "node-a");
    describe(&hub, &link, 1, "thymio-II");
    let pending = hub.read(1, &VariableRef::from("a"), ReadMode::Fresh).unwrap();

    assert_eq!(hub.drop_link(link.id, "test"), vec![1]);
    assert_eq!(pending.value().await, Err(ReadFailure::LinkLost(1)));
    assert!(hub.nodes().is_empty());
    assert!(hub.drop_link(link.id, "again").is_empty());
}

#[tokio::test]
async fn inbound_messages_are_forwarded_to_other_links_only() {
    let hub = hub();
    let mut a = FakeLink::attach(&hub, "node-a");
    let mut b = FakeLink::attach(&hub, "node-b");
    describe(&hub, &a, 1, "thymio-II");
    assert!(a.drain().is_empty());
    assert!(matches!(
        b.drain().as_slice(),
        [WireMessage::Description { source: 1, .. }]
    ));
}

#[tokio::test]
async fn loop_mode_echoes_to_the_sender() {
    let hub = Hub::new(
        HubSettings {
            forward_to_sender: true,
            ..HubSettings::default()
        },
        false,
    );
    let mut a = FakeLink::attach(&hub, "node-a");
    describe(&hub, &a, 1, "thymio-II");
    assert!(matches!(
        a.drain().as_slice(),
        [WireMessage::Description { source: 1, .. }]
    ));
}

#[tokio::test]
async fn colliding_native_ids_get_distinct_canonical_ids() {
    let hub = hub();
    let mut a = FakeLink::attach(&hub, "node-a");
    let mut b = FakeLink::attach(&hub, "node-b");
    describe(&hub, &a, 1, "thymio-II");
    assert!(matches!(
        b.drain().as_slice(),
        [WireMessage::Description { source: 1, .. }]
    ));
    describe(&hub, &b, 1, "thymio-II");
    assert!(matches!(
        a.drain().as_slice(),
        [WireMessage::Description { source: 2, .. }]
    ));

    let ids: Vec<NodeId> = hub.nodes().iter().map(|d| d.id).collect();
    assert_eq!(ids, vec![1, 2]);

    hub.write(2, &VariableRef::from("a"), vec![5]).unwrap();
    assert!(a.drain().is_empty());
    assert_eq!(
        b.drain(),
        vec![WireMessage::SetVariables {
            dest: 1,
            start: 0,
            values: vec![5]
        }]
    );

    assert_eq!(hub.drop_link(a.id, "test"), vec![1]);
    let ids: Vec<NodeId> = hub.nodes().iter().map(|d| d.id).collect();
    assert_eq!(ids, vec![2]);
}

#[tokio::test]
async fn forwarded_traffic_uses_canonical_ids() {
    let hub = hub();
    let mut a = FakeLink::attach(&hub, "node-a");
    let mut b = FakeLink::attach(&hub, "node-b");
    describe(&hub, &a, 1, "thymio-II");
    describe(&hub, &b, 1, "thymio-II");
    a.drain();
    b.drain();

    hub.handle_incoming(
        b.id,
        WireMessage::UserMessage {
            source: 1,
            event: 4,
            data: vec![9],
        },
    );
    assert_eq!(
        a.drain(),
        vec![WireMessage::UserMessage {
            source: 2,
            event: 4,
            data: vec![9]
        }]
    );

    // A request for canonical node 2 only reaches its owner, in native ids.
    hub.handle_incoming(
        a.id,
        WireMessage::GetVariables {
            dest: 2,
            start: 0,
            length: 1,
        },
    );
    assert!(a.drain().is_empty());
    assert_eq!(
        b.drain(),
        vec![WireMessage::GetVariables {
            dest: 1,
            start: 0,
            length: 1
        }]
    );

    // Unowned destinations are broadcast unchanged.
    hub.handle_incoming(a.id, WireMessage::Reset { dest: 7 });
    assert_eq!(b.drain(), vec![WireMessage::Reset { dest: 7 }]);
}

#[tokio::test]
async fn unqueued_request_fails_its_read_and_frees_the_address() {
    let hub = hub();
    let (tx, mut rx) = mpsc::channel(1);
    let (link, _closed) = hub.attach_link("node-a".into(), tx);
    // The queue is full with the initial GetDescription.
    hub.handle_incoming(
        link,
        WireMessage::Description {
            source: 1,
            description: target("thymio-II", &[("a", 1)]),
        },
    );

    let first = hub.read(1, &VariableRef::from("a"), ReadMode::Fresh).unwrap();
    assert_eq!(first.value().await, Err(ReadFailure::SendFailed(1)));
    assert_eq!(hub.status().pending_reads, 0);

    assert_eq!(
        WireMessage::from_json(&rx.try_recv().unwrap()).unwrap(),
        WireMessage::GetDescription
    );
    let second = hub.read(1, &VariableRef::from("a"), ReadMode::Fresh).unwrap();
    assert_eq!(
        WireMessage::from_json(&rx.try_recv().unwrap()).unwrap(),
        WireMessage::GetVariables {
            dest: 1,
            start: 0,
            length: 1
        }
    );
    hub.handle_incoming(
        link,
        WireMessage::Variables {
            source: 1,
            start: 0,
            values: vec![3],
        },
    );
    assert_eq!(second.value().await, Ok(vec![3]));
}

#[tokio::test]
async fn full_link_does_not_disturb_a_healthy_one() {
    let hub = hub();
    let (full_tx, _full_rx) = mpsc::channel(1);
    let (full, _closed) = hub.attach_link("stalled".into(), full_tx);
    let mut healthy = FakeLink::attach(&hub, "node-b");

    hub.handle_incoming(
        full,
        WireMessage::Description {
            source: 1,
            description: target("stalled-node", &[("a", 1)]),
        },
    );
    describe(&hub, &healthy, 2, "thymio-II");
    healthy.drain();

    let stuck = hub.read(1, &VariableRef::from("a"), ReadMode::Fresh).unwrap();
    let live = hub.read(2, &VariableRef::from("b"), ReadMode::Fresh).unwrap();
    assert_eq!(
        healthy.drain(),
        vec![WireMessage::GetVariables {
            dest: 2,
            start: 1,
            length: 3
        }]
    );
    hub.handle_incoming(
        healthy.id,
        WireMessage::Variables {
            source: 2,
            start: 1,
            values: vec![1, 2, 3],
        },
    );

    let stuck = tokio::time::timeout(std::time::Duration::from_secs(1), stuck.value())
        .await
        .expect("read on the full link settles");
    assert_eq!(stuck, Err(ReadFailure::SendFailed(1)));
    assert_eq!(live.value().await, Ok(vec![1, 2, 3]));
    assert_eq!(hub.status().pending_reads, 0);
    assert_eq!(hub.links().len(), 2);
}

#[tokio::test]
async fn reset_all_resets_and_restarts_every_node() {
    let hub = hub();
    let mut link = FakeLink::attach(&hub, "node-a");
    describe(&hub, &link, 1, "thymio-II");
    assert_eq!(hub.reset_all(), vec![1]);
    assert_eq!(
        link.drain(),
        vec![WireMessage::Reset { dest: 1 }, WireMessage::Run { dest: 1 }]
    );
}
