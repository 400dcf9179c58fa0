use super::error::HttpError;
use super::selector::{parse_args, parse_values, Selector};
use super::AppState;
use crate::descriptions::{NodeDescription, VariableRef};
use crate::hub::{Hub, LoadReport, ReadMode};
use crate::script::ScriptBundle;
use crate::subscriptions::EventFilter;
use crate::wire::message::NodeId;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{Method, StatusCode, Uri};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream::{self, Stream};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

type HttpResult<T> = Result<T, HttpError>;

#[derive(Debug, Default, Deserialize)]
pub struct ReadQuery {
    /// Present (`?cached`) to answer from the last known value when there is one.
    pub cached: Option<String>,
}

/// Run `work`, then hold its response until earlier requests on the same
/// connection have been answered.
async fn ordered<F, R>(state: &AppState, client: SocketAddr, work: F) -> Response
where
    F: Future<Output = HttpResult<R>>,
    R: IntoResponse,
{
    let ticket = state.queues.schedule(client);
    let result = work.await;
    ticket.wait_turn().await;
    result.into_response()
}

fn summary(desc: &NodeDescription) -> Value {
    json!({
        "node": desc.id,
        "name": desc.name,
        "protocolVersion": desc.protocol_version,
    })
}

fn details(hub: &Hub, desc: &NodeDescription) -> Value {
    let mut variables = Map::new();
    for v in hub.variables(desc.id).unwrap_or_default() {
        variables.insert(v.name, json!(v.length));
    }
    let mut local_events = Map::new();
    for e in &desc.local_events {
        local_events.insert(e.name.clone(), json!(e.description));
    }
    let defs = hub.definitions(Some(desc.id));
    let mut constants = Map::new();
    for c in desc.native_constants.iter().chain(defs.constants.iter()) {
        constants.insert(c.name.clone(), json!(c.value));
    }
    let mut events = Map::new();
    for e in &defs.events {
        events.insert(e.name.clone(), json!(e.size));
    }
    json!({
        "node": desc.id,
        "name": desc.name,
        "protocolVersion": desc.protocol_version,
        "bytecodeSize": desc.bytecode_size,
        "variablesSize": desc.variables_size,
        "stackSize": desc.stack_size,
        "namedVariables": variables,
        "localEvents": local_events,
        "constants": constants,
        "events": events,
    })
}

pub async fn list_nodes(
    State(state): State<AppState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
) -> Response {
    let list: Vec<Value> = state.hub.nodes().iter().map(|d| summary(d)).collect();
    ordered(&state, client, async move { Ok::<_, HttpError>(Json(list)) }).await
}

pub async fn node_info(
    State(state): State<AppState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    Path(selector): Path<String>,
) -> Response {
    let info = describe_selected(&state.hub, &selector);
    ordered(&state, client, async move { info }).await
}

fn describe_selected(hub: &Hub, selector: &str) -> HttpResult<Json<Value>> {
    let selector = Selector::parse(selector);
    let matched = selector.require(&hub.nodes())?;
    let body = match selector {
        Selector::All => Value::Array(matched.iter().map(|d| details(hub, d)).collect()),
        _ => details(hub, &matched[0]),
    };
    Ok(Json(body))
}

pub async fn load_script(
    State(state): State<AppState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    Path(selector): Path<String>,
    body: String,
) -> Response {
    let report = load_selected(&state, &selector, &body);
    ordered(&state, client, async move { report }).await
}

fn load_selected(state: &AppState, selector: &str, body: &str) -> HttpResult<Json<LoadReport>> {
    let Some(pos) = body.find("file=") else {
        return Err(HttpError::BadRequest(
            "expected 'file=' followed by a script bundle".into(),
        ));
    };
    let bundle = ScriptBundle::parse(&body[pos + "file=".len()..])?;
    let ids: Vec<NodeId> = Selector::parse(selector)
        .require(&state.hub.nodes())?
        .iter()
        .map(|d| d.id)
        .collect();
    let report = state
        .hub
        .load_bundle(&ids, &bundle, state.compiler.as_ref())?;
    Ok(Json(report))
}

/// `/nodes/{selector}/{name}[/args..]` and `/nodes/{selector}/events[/names..]`.
pub async fn node_operation(
    State(state): State<AppState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    method: Method,
    Path((selector, rest)): Path<(String, String)>,
    Query(query): Query<ReadQuery>,
    body: String,
) -> Response {
    let mut parts: Vec<String> = rest
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if parts.is_empty() {
        return HttpError::NotFound(format!("nothing to address on '{}'", selector)).into_response();
    }
    let name = parts.remove(0);
    if name == "events" {
        if method != Method::GET {
            return HttpError::NotImplemented.into_response();
        }
        return match Selector::parse(&selector).require(&state.hub.nodes()) {
            Ok(nodes) => {
                let filter = names_filter(&parts).from_sources(nodes.iter().map(|d| d.id));
                event_stream(&state.hub, filter).into_response()
            }
            Err(e) => e.into_response(),
        };
    }
    let work = variable_or_event(
        state.hub.clone(),
        state.read_timeout,
        selector,
        name,
        parts,
        method,
        query,
        body,
    );
    ordered(&state, client, work).await
}

/// Fire `name` if it is a known event, otherwise write (POST body or path
/// args) or read the variable on every selected node.
#[allow(clippy::too_many_arguments)]
async fn variable_or_event(
    hub: Hub,
    read_timeout: Option<Duration>,
    selector: String,
    name: String,
    args: Vec<String>,
    method: Method,
    query: ReadQuery,
    body: String,
) -> HttpResult<Response> {
    let targets = Selector::parse(&selector).require(&hub.nodes())?;
    let mut args = parse_args(args.iter().map(String::as_str))?;
    if method == Method::POST && !body.trim().is_empty() {
        args = parse_values(&body)?;
    }

    if let Some(first) = targets.iter().find(|d| hub.has_event(Some(d.id), &name)) {
        hub.fire(Some(first.id), &name, args)?;
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let var = VariableRef::from(name.as_str());
    if method == Method::POST || !args.is_empty() {
        if args.is_empty() {
            return Err(HttpError::BadRequest(format!("no values given for '{}'", name)));
        }
        let mut first_err = None;
        let mut written = 0;
        for d in &targets {
            match hub.write(d.id, &var, args.clone()) {
                Ok(_) => written += 1,
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        return match (written, first_err) {
            (0, Some(e)) => Err(e.into()),
            _ => Ok(StatusCode::NO_CONTENT.into_response()),
        };
    }

    let mode = if query.cached.is_some() {
        ReadMode::Cached
    } else {
        ReadMode::Fresh
    };
    let mut pending = Vec::new();
    let mut first_err = None;
    for d in &targets {
        match hub.read(d.id, &var, mode) {
            Ok(p) => pending.push(p),
            Err(e) => {
                first_err.get_or_insert(e);
            }
        }
    }
    if pending.is_empty() {
        return Err(first_err
            .map(HttpError::from)
            .unwrap_or_else(|| HttpError::NotFound(name.clone())));
    }
    let reads = futures_util::future::join_all(pending.into_iter().map(|p| p.value()));
    let results = match read_timeout {
        Some(limit) => tokio::time::timeout(limit, reads)
            .await
            .map_err(|_| HttpError::Timeout)?,
        None => reads.await,
    };
    let mut values = results
        .into_iter()
        .collect::<Result<Vec<Vec<i16>>, _>>()?;
    // One node answers with its values, several with one array per node.
    if values.len() == 1 {
        Ok(Json(json!(values.remove(0))).into_response())
    } else {
        Ok(Json(json!(values)).into_response())
    }
}

fn names_filter(names: &[String]) -> EventFilter {
    if names.is_empty() {
        EventFilter::all()
    } else {
        EventFilter::names(names.iter().cloned())
    }
}

/// Server-sent events for every notice matching `filter`, until the client goes away.
pub fn event_stream(
    hub: &Hub,
    filter: EventFilter,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = hub.subscribe(filter);
    let events = stream::unfold(subscription, |mut sub| async move {
        let notice = sub.recv().await?;
        Some((Ok(Event::default().data(notice.to_line())), sub))
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

pub async fn events_all(State(state): State<AppState>) -> impl IntoResponse {
    event_stream(&state.hub, EventFilter::all())
}

pub async fn events_named(
    State(state): State<AppState>,
    Path(names): Path<String>,
) -> impl IntoResponse {
    let names: Vec<String> = names
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    event_stream(&state.hub, names_filter(&names))
}

pub async fn reset_all(
    State(state): State<AppState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
) -> Response {
    state.hub.reset_all();
    ordered(&state, client, async { Ok::<_, HttpError>(StatusCode::NO_CONTENT) }).await
}

pub async fn not_implemented() -> HttpError {
    HttpError::NotImplemented
}

pub async fn not_found(uri: Uri) -> HttpError {
    HttpError::NotFound(format!("no route for {}", uri.path()))
}
