//! HTTP front-end: REST access to nodes, variables and events, plus
//! server-sent event streams.
//!
//! | route | GET | PUT | POST |
//! |---|---|---|---|
//! | `/nodes` | node list | | |
//! | `/nodes/{sel}` | node details | load bundle (`file=...`) | |
//! | `/nodes/{sel}/{name}[/args]` | read, or write/emit with args | | write or emit |
//! | `/nodes/{sel}/events[/names]` | SSE | | |
//! | `/events[/names]` | SSE | | |
//! | `/reset`, `/reset_all` | reset every node | | reset every node |

pub mod error;
pub mod handlers;
pub mod response_queue;
pub mod selector;

use crate::events::dispatcher;
use crate::events::model::{LogEvent, LogLevel, RequestEvent};
use crate::hub::Hub;
use crate::script::ScriptCompiler;
use axum::extract::{ConnectInfo, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use response_queue::ResponseQueues;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub queues: Arc<ResponseQueues>,
    pub compiler: Arc<dyn ScriptCompiler>,
    /// Upper bound on waiting for a node's reply; `None` waits indefinitely.
    pub read_timeout: Option<Duration>,
}

impl AppState {
    pub fn new(hub: Hub, compiler: Arc<dyn ScriptCompiler>, read_timeout: Option<Duration>) -> Self {
        Self {
            hub,
            queues: ResponseQueues::new(),
            compiler,
            read_timeout,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/nodes", get(handlers::list_nodes).fallback(handlers::not_implemented))
        .route(
            "/nodes/{selector}",
            get(handlers::node_info)
                .put(handlers::load_script)
                .fallback(handlers::not_implemented),
        )
        .route(
            "/nodes/{selector}/{*rest}",
            get(handlers::node_operation)
                .post(handlers::node_operation)
                .fallback(handlers::not_implemented),
        )
        .route("/events", get(handlers::events_all).fallback(handlers::not_implemented))
        .route(
            "/events/{*names}",
            get(handlers::events_named).fallback(handlers::not_implemented),
        )
        .route(
            "/reset",
            get(handlers::reset_all)
                .post(handlers::reset_all)
                .fallback(handlers::not_implemented),
        )
        .route(
            "/reset_all",
            get(handlers::reset_all)
                .post(handlers::reset_all)
                .fallback(handlers::not_implemented),
        )
        .fallback(handlers::not_found)
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

async fn log_request(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let client = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|c| c.0.to_string());
    let response = next.run(req).await;
    let status = response.status();
    let level = if status.is_server_error() {
        LogLevel::Warn
    } else {
        LogLevel::Debug
    };
    dispatcher::emit(LogEvent::Request(RequestEvent {
        meta: dispatcher::meta("http", level),
        client,
        method,
        path,
        status: status.as_u16(),
    }));
    response
}

/// Bind `port` and serve until the process exits.
pub async fn serve(port: u16, state: AppState) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    serve_on(listener, state).await
}

pub async fn serve_on(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}
