// tests/http_api.rs
// HTTP front-end driven in-process through tower's `oneshot`.

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use futures_util::StreamExt;
use nodebridge::config::HubSettings;
use nodebridge::http::{router, AppState};
use nodebridge::hub::Hub;
use nodebridge::script::DeclarationCompiler;
use nodebridge::wire::message::{NamedVariable, TargetDescription};
use nodebridge::wire::{LinkId, WireMessage};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tower::ServiceExt;

struct Fixture {
    hub: Hub,
    link: LinkId,
    rx: mpsc::Receiver<String>,
}

fn fixture() -> Fixture {
    let hub = Hub::new(HubSettings::default(), false);
    let (tx, mut rx) = mpsc::channel(64);
    let (link, _closed) = hub.attach_link("node".into(), tx);
    hub.handle_incoming(
        link,
        WireMessage::Description {
            source: 1,
            description: TargetDescription {
                name: "thymio-II".into(),
                protocol_version: 5,
                bytecode_size: 1000,
                variables_size: 100,
                stack_size: 32,
                named_variables: vec![
                    NamedVariable {
                        name: "a".into(),
                        size: 1,
                    },
                    NamedVariable {
                        name: "b".into(),
                        size: 3,
                    },
                ],
                local_events: vec![],
                native_constants: vec![],
            },
        },
    );
    while rx.try_recv().is_ok() {}
    Fixture { hub, link, rx }
}

fn app(hub: &Hub, read_timeout: Option<Duration>) -> Router {
    router(AppState::new(
        hub.clone(),
        Arc::new(DeclarationCompiler),
        read_timeout,
    ))
}

fn request(method: Method, uri: &str, body: &str) -> Request<Body> {
    let mut req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::from(body.to_string()))
        .unwrap();
    req.extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));
    req
}

async fn call(app: Router, method: Method, uri: &str, body: &str) -> (StatusCode, Value) {
    let response = app.oneshot(request(method, uri, body)).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn lists_and_describes_nodes() {
    let f = fixture();
    let (status, body) = call(app(&f.hub, None), Method::GET, "/nodes", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!([{ "node": 1, "name": "thymio-II", "protocolVersion": 5 }])
    );

    let (status, body) = call(app(&f.hub, None), Method::GET, "/nodes/thymio", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["bytecodeSize"], 1000);
    assert_eq!(body["namedVariables"], json!({ "a": 1, "b": 3 }));
}

#[tokio::test]
async fn unmatched_selector_and_unknown_path_are_404() {
    let f = fixture();
    let (status, _) = call(app(&f.hub, None), Method::GET, "/nodes/robot", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(app(&f.hub, None), Method::GET, "/nodes/1/nope", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(app(&f.hub, None), Method::GET, "/elsewhere", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn other_methods_are_not_implemented() {
    let f = fixture();
    let (status, _) = call(app(&f.hub, None), Method::DELETE, "/nodes", "").await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    let (status, _) = call(app(&f.hub, None), Method::PATCH, "/nodes/1/a", "").await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn post_writes_json_arrays_and_rejects_anything_else() {
    let mut f = fixture();
    let (status, _) = call(app(&f.hub, None), Method::POST, "/nodes/1/b", "[1,2,\"x\"]").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(f.rx.try_recv().is_err());

    let (status, _) = call(app(&f.hub, None), Method::POST, "/nodes/1/b", "[1, 2, 3]").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let line = f.rx.try_recv().unwrap();
    assert_eq!(
        WireMessage::from_json(&line).unwrap(),
        WireMessage::SetVariables {
            dest: 1,
            start: 1,
            values: vec![1, 2, 3]
        }
    );

    let (status, body) = call(app(&f.hub, None), Method::GET, "/nodes/1/b?cached", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([1, 2, 3]));
}

#[tokio::test]
async fn reads_wait_for_the_node_reply() {
    let Fixture { hub, link, mut rx } = fixture();
    let responder = hub.clone();
    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if let Ok(WireMessage::GetVariables { start, length, .. }) = WireMessage::from_json(&line) {
                responder.handle_incoming(
                    link,
                    WireMessage::Variables {
                        source: 1,
                        start,
                        values: vec![9; length as usize],
                    },
                );
            }
        }
    });
    let (status, body) = call(app(&hub, None), Method::GET, "/nodes/thymio-II/b", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([9, 9, 9]));
}

#[tokio::test]
async fn silent_node_times_out_with_504() {
    let f = fixture();
    let (status, _) = call(
        app(&f.hub, Some(Duration::from_millis(50))),
        Method::GET,
        "/nodes/1/a",
        "",
    )
    .await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(f.hub.status().pending_reads, 0);
}

#[tokio::test]
async fn load_requires_a_file_field() {
    let f = fixture();
    let (status, _) = call(app(&f.hub, None), Method::PUT, "/nodes/1", "code=x").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let bundle = "file=[[node]]\nname = \"thymio-II\"\ncode = \"var c\"\n";
    let (status, body) = call(app(&f.hub, None), Method::PUT, "/nodes/1", bundle).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "loaded": [1], "unmatched": [] }));
}

#[tokio::test]
async fn reset_answers_no_content() {
    let mut f = fixture();
    let (status, _) = call(app(&f.hub, None), Method::GET, "/reset_all", "").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(f.rx.try_recv().is_ok());
}

#[tokio::test]
async fn event_stream_delivers_data_frames() {
    let f = fixture();
    let response = app(&f.hub, None)
        .oneshot(request(Method::GET, "/events", ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );

    f.hub.fire_id(None, 7, vec![5, -1]);
    let mut body = response.into_body().into_data_stream();
    let frame = tokio::time::timeout(Duration::from_secs(1), body.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(std::str::from_utf8(&frame).unwrap(), "data: ? 5 -1\n\n");
}

#[tokio::test]
async fn pipelined_responses_keep_submission_order() {
    let f = fixture();
    f.hub.handle_incoming(
        f.link,
        WireMessage::Description {
            source: 2,
            description: TargetDescription {
                name: "fastnode".into(),
                protocol_version: 5,
                bytecode_size: 100,
                variables_size: 10,
                stack_size: 10,
                named_variables: vec![NamedVariable {
                    name: "a".into(),
                    size: 1,
                }],
                local_events: vec![],
                native_constants: vec![],
            },
        },
    );
    let app = app(&f.hub, None);
    let finished = Arc::new(Mutex::new(Vec::new()));

    let spawn_get = |uri: &'static str, tag: &'static str| {
        let app = app.clone();
        let finished = finished.clone();
        tokio::spawn(async move {
            let response = app.oneshot(request(Method::GET, uri, "")).await.unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            finished.lock().push(tag);
            (status, serde_json::from_slice::<Value>(&bytes).unwrap())
        })
    };

    let slow = spawn_get("/nodes/1/a", "slow");
    while f.hub.status().pending_reads < 1 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let fast = spawn_get("/nodes/2/a", "fast");
    while f.hub.status().pending_reads < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // The later request's value arrives first but its response is held back.
    f.hub.handle_incoming(
        f.link,
        WireMessage::Variables {
            source: 2,
            start: 0,
            values: vec![2],
        },
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!fast.is_finished());
    assert!(finished.lock().is_empty());

    f.hub.handle_incoming(
        f.link,
        WireMessage::Variables {
            source: 1,
            start: 0,
            values: vec![1],
        },
    );
    let slow = tokio::time::timeout(Duration::from_secs(1), slow)
        .await
        .unwrap()
        .unwrap();
    let fast = tokio::time::timeout(Duration::from_secs(1), fast)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(slow, (StatusCode::OK, json!([1])));
    assert_eq!(fast, (StatusCode::OK, json!([2])));
    assert_eq!(*finished.lock(), vec!["slow", "fast"]);
}

#[tokio::test]
async fn abandoned_requests_release_their_connection_queue() {
    let f = fixture();
    let app = app(&f.hub, Some(Duration::from_secs(5)));

    // Two in-flight reads on one connection; the client goes away.
    let first = tokio::spawn(app.clone().oneshot(request(Method::GET, "/nodes/1/a", "")));
    let second = tokio::spawn(app.clone().oneshot(request(Method::GET, "/nodes/1/b", "")));
    while f.hub.status().pending_reads < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    first.abort();
    second.abort();
    let _ = first.await;
    let _ = second.await;
    assert_eq!(f.hub.status().pending_reads, 0);

    // A new request on the same connection is not stuck behind them.
    let (status, body) = call(app, Method::GET, "/nodes", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(1));
}
