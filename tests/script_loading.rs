// tests/script_loading.rs
// Loading script bundles onto described nodes through the hub.

use nodebridge::config::HubSettings;
use nodebridge::descriptions::VariableRef;
use nodebridge::error::LoadError;
use nodebridge::hub::{Hub, ReadMode};
use nodebridge::script::{DeclarationCompiler, ScriptBundle};
use nodebridge::subscriptions::EventFilter;
use nodebridge::wire::message::{LocalEvent, NamedVariable, TargetDescription};
use nodebridge::wire::{LinkId, WireMessage};
use tokio::sync::mpsc;

const BUMP_BUNDLE: &str = r#"
[[event]]
name = "bump"
size = 1

[[constant]]
name = "LEN"
value = 4

[[node]]
name = "thymio-II"
code = """
var counter
var history[LEN]
onevent button
    emit bump
"""
"#;

fn setup(node_name: &str) -> (Hub, LinkId, mpsc::Receiver<String>) {
    let hub = Hub::new(HubSettings::default(), false);
    let (tx, mut rx) = mpsc::channel(64);
    let (link, _closed) = hub.attach_link("node".into(), tx);
    hub.handle_incoming(
        link,
        WireMessage::Description {
            source: 1,
            description: TargetDescription {
                name: node_name.into(),
                protocol_version: 5,
                bytecode_size: 1000,
                variables_size: 100,
                stack_size: 32,
                named_variables: vec![
                    NamedVariable {
                        name: "id".into(),
                        size: 1,
                    },
                    NamedVariable {
                        name: "x".into(),
                        size: 2,
                    },
                ],
                local_events: vec![LocalEvent {
                    name: "button".into(),
                    description: String::new(),
                }],
                native_constants: vec![],
            },
        },
    );
    while rx.try_recv().is_ok() {}
    (hub, link, rx)
}

fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<WireMessage> {
    let mut out = Vec::new();
    while let Ok(line) = rx.try_recv() {
        out.push(WireMessage::from_json(&line).unwrap());
    }
    out
}

#[tokio::test]
async fn bundle_loads_and_its_events_round_trip() {
    let (hub, link, mut rx) = setup("thymio-II");
    let bundle = ScriptBundle::parse(BUMP_BUNDLE).unwrap();

    let report = hub.load_bundle(&[1], &bundle, &DeclarationCompiler).unwrap();
    assert_eq!(report.loaded, vec![1]);
    assert!(report.unmatched.is_empty());

    let sent = drain(&mut rx);
    assert!(matches!(
        sent.first(),
        Some(WireMessage::BytecodeChunk { dest: 1, start: 0, .. })
    ));
    assert_eq!(sent.last(), Some(&WireMessage::Run { dest: 1 }));

    // Script variables live after the native ones.
    let names: Vec<String> = hub.variables(1).unwrap().into_iter().map(|v| v.name).collect();
    assert_eq!(names, vec!["id", "x", "counter", "history"]);
    hub.write(1, &VariableRef::from("history"), vec![1, 2, 3, 4]).unwrap();
    assert_eq!(
        drain(&mut rx),
        vec![WireMessage::SetVariables {
            dest: 1,
            start: 4,
            values: vec![1, 2, 3, 4]
        }]
    );
    let cached = hub.read(1, &VariableRef::from("history"), ReadMode::Cached).unwrap();
    assert_eq!(cached.value().await, Ok(vec![1, 2, 3, 4]));

    // The node emits the bundle's event; subscribers see it by name.
    assert!(hub.has_event(Some(1), "bump"));
    let mut bumps = hub.subscribe(EventFilter::names(["bump"]));
    hub.handle_incoming(
        link,
        WireMessage::UserMessage {
            source: 1,
            event: 0,
            data: vec![5],
        },
    );
    assert_eq!(bumps.try_recv().unwrap().to_line(), "bump 5");

    assert_eq!(hub.fire(Some(1), "bump", vec![2]), Ok(0));
    assert_eq!(
        drain(&mut rx),
        vec![WireMessage::UserMessage {
            source: 0,
            event: 0,
            data: vec![2]
        }]
    );
}

#[tokio::test]
async fn compile_error_sends_nothing_and_keeps_definitions() {
    let (hub, _link, mut rx) = setup("thymio-II");
    let bundle = ScriptBundle::parse(
        r#"
[[event]]
name = "bump"
size = 0

[[node]]
name = "thymio-II"
code = "onevent nosuch"
"#,
    )
    .unwrap();

    let err = hub
        .load_bundle(&[1], &bundle, &DeclarationCompiler)
        .unwrap_err();
    match err {
        LoadError::Compile(e) => {
            assert_eq!(e.line, 1);
            assert!(e.message.contains("nosuch"), "{}", e);
        }
        other => panic!("expected a compile error, got {:?}", other),
    }
    assert!(drain(&mut rx).is_empty());
    assert!(!hub.has_event(Some(1), "bump"));
    assert!(!hub.has_event(None, "bump"));
}

#[tokio::test]
async fn nodes_without_a_matching_script_are_reported() {
    let (hub, _link, mut rx) = setup("dummynode");
    let bundle = ScriptBundle::parse(
        r#"
[[node]]
name = "a"
code = ""

[[node]]
name = "b"
code = ""
"#,
    )
    .unwrap();
    let report = hub.load_bundle(&[1], &bundle, &DeclarationCompiler).unwrap();
    assert!(report.loaded.is_empty());
    assert_eq!(report.unmatched, vec![1]);
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn malformed_bundles_are_rejected() {
    assert!(matches!(
        ScriptBundle::parse("[[node]]\nname = "),
        Err(LoadError::Bundle(_))
    ));
}
