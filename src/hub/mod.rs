//! The hub: owns every wire link, routes inbound traffic into the registries
//! and gives front-ends one consistent view of the network.
//!
//! All registry state sits behind a single lock. Outbound messages are queued
//! without blocking while that lock is held, so a wire request and the
//! bookkeeping that expects its reply are always committed together.

pub mod listener;
pub mod substitution;

pub use listener::{DumpListener, HubListener};
pub use substitution::IdSubstitution;

use crate::config::HubSettings;
use crate::constants::{BRIDGE_SOURCE_ID, RESET_EVENT_NAME};
use crate::descriptions::{
    CommonDefinitions, DescriptionRegistry, DescriptionState, NodeDescription, VariableRef,
    VariableSlot,
};
use crate::emit_node_event;
use crate::error::{LoadError, ReadFailure, ResolutionError, TransportError};
use crate::events::model::LogLevel;
use crate::script::{bytecode_chunks, ScriptBundle, ScriptCompiler};
use crate::subscriptions::{EventFilter, EventNotice, EventRegistry, SubscriberId};
use crate::variables::{
    Attach, ConsumerId, ReadResult, VariableAddress, VariableCorrelator,
};
use crate::wire::events::emit_link_event;
use crate::wire::link::{LinkHandle, LinkId, LinkStats};
use crate::wire::message::{EventId, NodeId, WireMessage};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;

/// Registries and links, guarded together by the hub lock.
pub struct CoreState {
    links: BTreeMap<LinkId, LinkHandle>,
    substitution: IdSubstitution,
    pub descriptions: DescriptionRegistry,
    pub variables: VariableCorrelator,
    pub events: EventRegistry,
}

/// Sends that failed while the lock was held; settled once it is released.
#[derive(Default)]
struct Outbox {
    failed: Vec<(LinkId, TransportError)>,
}

impl CoreState {
    fn new() -> Self {
        Self {
            links: BTreeMap::new(),
            substitution: IdSubstitution::new(),
            descriptions: DescriptionRegistry::new(),
            variables: VariableCorrelator::new(),
            events: EventRegistry::new(),
        }
    }

    fn send_on(&self, link: LinkId, msg: &WireMessage, out: &mut Outbox) {
        match self.links.get(&link) {
            Some(handle) => {
                if let Err(e) = handle.send(msg) {
                    out.failed.push((link, e));
                }
            }
            None => out.failed.push((link, TransportError::UnknownLink(link))),
        }
    }

    fn broadcast(&self, msg: &WireMessage, skip: Option<LinkId>, out: &mut Outbox) {
        for (id, handle) in &self.links {
            if Some(*id) == skip {
                continue;
            }
            if let Err(e) = handle.send(msg) {
                out.failed.push((*id, e));
            }
        }
    }

    /// Relay traffic to the other links. Sources are already canonical; a
    /// node-addressed message only goes to the link owning that node, with
    /// the id translated back to the native one.
    fn forward(&self, msg: &WireMessage, skip: Option<LinkId>, out: &mut Outbox) {
        match msg.dest().and_then(|dest| self.substitution.route(dest)) {
            Some((owner, native)) => {
                if Some(owner) != skip {
                    let mut msg = msg.clone();
                    msg.set_dest(native);
                    self.send_on(owner, &msg, out);
                }
            }
            None => self.broadcast(msg, skip, out),
        }
    }

    /// Address `msg` to a canonical node, translating to its native id.
    fn send_to_node(
        &self,
        node: NodeId,
        mut msg: WireMessage,
        out: &mut Outbox,
    ) -> Result<(), ResolutionError> {
        let (link, native) = self
            .substitution
            .route(node)
            .ok_or(ResolutionError::UnknownNode(node))?;
        msg.set_dest(native);
        self.send_on(link, &msg, out);
        Ok(())
    }

    /// Broadcast an event on the wire and deliver it to local subscribers.
    fn fire(&mut self, scope: Option<NodeId>, event: EventId, data: Vec<i16>, out: &mut Outbox) {
        let msg = WireMessage::UserMessage {
            source: BRIDGE_SOURCE_ID,
            event,
            data: data.clone(),
        };
        self.broadcast(&msg, None, out);
        let notice = EventNotice {
            source: scope.unwrap_or(BRIDGE_SOURCE_ID),
            event,
            name: self.descriptions.event_name(scope, event),
            data,
        };
        self.events.dispatch(&notice);
    }
}

/// How a read may be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Always ask the node.
    #[default]
    Fresh,
    /// Use the last known value when there is one.
    Cached,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkInfo {
    pub id: LinkId,
    pub target: String,
    pub nodes: Vec<NodeId>,
    pub stats: LinkStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct HubStatus {
    pub links: Vec<LinkInfo>,
    pub described_nodes: usize,
    pub pending_reads: usize,
    pub subscribers: usize,
}

/// Result of loading a script bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub loaded: Vec<NodeId>,
    /// Targeted nodes for which the bundle had no matching script.
    pub unmatched: Vec<NodeId>,
}

struct HubInner {
    state: Mutex<CoreState>,
    listeners: RwLock<Vec<Arc<dyn HubListener>>>,
    settings: HubSettings,
    next_link: AtomicU64,
    allow_console: bool,
}

#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    pub fn new(settings: HubSettings, allow_console: bool) -> Self {
        let hub = Self {
            inner: Arc::new(HubInner {
                state: Mutex::new(CoreState::new()),
                listeners: RwLock::new(Vec::new()),
                settings,
                next_link: AtomicU64::new(1),
                allow_console,
            }),
        };
        if settings.dump {
            hub.add_listener(Arc::new(DumpListener { allow_console }));
        }
        hub
    }

    pub fn settings(&self) -> HubSettings {
        self.inner.settings
    }

    pub fn allow_console(&self) -> bool {
        self.inner.allow_console
    }

    pub fn add_listener(&self, listener: Arc<dyn HubListener>) {
        self.inner.listeners.write().push(listener);
    }

    fn listeners(&self) -> Vec<Arc<dyn HubListener>> {
        self.inner.listeners.read().clone()
    }

    fn log(&self, level: LogLevel, action: &str, link: Option<LinkId>, detail: Option<String>) {
        emit_link_event(
            "hub",
            level,
            action,
            link,
            None,
            detail,
            self.inner.allow_console,
        );
    }

    fn settle(&self, out: Outbox) {
        for (link, err) in out.failed {
            match err {
                TransportError::Closed(_) => {
                    self.drop_link(link, "send_closed");
                }
                other => self.log(LogLevel::Warn, "send_failed", Some(link), Some(other.to_string())),
            }
        }
    }

    // ---- link lifecycle -------------------------------------------------

    /// Register a freshly connected link whose writer drains `sender`.
    /// Returns its id and the signal raised when the hub drops it.
    pub fn attach_link(&self, target: String, sender: mpsc::Sender<String>) -> (LinkId, Arc<Notify>) {
        let id = LinkId(self.inner.next_link.fetch_add(1, Ordering::Relaxed));
        let handle = LinkHandle::new(id, target.clone(), sender);
        let closed = handle.closed_signal();
        let mut out = Outbox::default();
        {
            let mut state = self.inner.state.lock();
            state.links.insert(id, handle);
            state.send_on(id, &WireMessage::GetDescription, &mut out);
        }
        self.log(LogLevel::Info, "link_attached", Some(id), Some(target.clone()));
        for l in self.listeners() {
            l.on_connect(id, &target);
        }
        self.settle(out);
        (id, closed)
    }

    /// Tear down a link: its nodes vanish and their pending reads fail.
    /// Returns the canonical ids that were owned by the link.
    pub fn drop_link(&self, link: LinkId, reason: &str) -> Vec<NodeId> {
        let (nodes, failed) = {
            let mut state = self.inner.state.lock();
            if state.links.remove(&link).is_none() {
                return Vec::new();
            }
            let nodes = state.substitution.remove_link(link);
            let mut failed = 0;
            for node in &nodes {
                state.descriptions.remove(*node);
                failed += state
                    .variables
                    .fail_node(*node, ReadFailure::LinkLost(*node));
            }
            (nodes, failed)
        };
        self.log(
            LogLevel::Info,
            "link_dropped",
            Some(link),
            Some(format!("reason={} nodes={:?} failed_reads={}", reason, nodes, failed)),
        );
        for node in &nodes {
            emit_node_event!(LogLevel::Info, *node, "node_lost", Some(link.to_string()));
        }
        for l in self.listeners() {
            l.on_disconnect(link, &nodes);
        }
        nodes
    }

    /// Process one message read from `link`.
    pub fn handle_incoming(&self, link: LinkId, mut message: WireMessage) {
        let settings = self.inner.settings;
        let mut out = Outbox::default();
        {
            let mut state = self.inner.state.lock();
            match state.links.get(&link) {
                Some(handle) => handle.note_received(),
                None => return,
            }
            if let Some(native) = message.source() {
                let node = state.substitution.canonical(link, native);
                message.set_source(node);
                self.route_inbound(&mut state, link, native, node, &message, &mut out);
            }
            if settings.forward {
                let skip = (!settings.forward_to_sender).then_some(link);
                state.forward(&message, skip, &mut out);
            }
        }
        self.settle(out);
        for l in self.listeners() {
            l.on_message(link, &message);
        }
    }

    fn route_inbound(
        &self,
        state: &mut CoreState,
        link: LinkId,
        native: NodeId,
        node: NodeId,
        message: &WireMessage,
        out: &mut Outbox,
    ) {
        if let WireMessage::Description { description, .. } = message {
            let desc = state.descriptions.apply(node, description.clone());
            emit_node_event!(
                LogLevel::Info,
                node,
                "node_described",
                Some(format!("name={} variables={}", desc.name, desc.variables.len()))
            );
            return;
        }
        if state.descriptions.mark_awaiting(node) {
            emit_node_event!(LogLevel::Info, node, "node_discovered", Some(format!("native={}", native)));
            state.send_on(link, &WireMessage::GetNodeDescription { dest: native }, out);
        }
        match message {
            WireMessage::Variables { start, values, .. } => {
                state
                    .variables
                    .resolve(VariableAddress::new(node, *start), values.clone());
            }
            WireMessage::UserMessage { event, data, .. } => {
                let notice = EventNotice {
                    source: node,
                    event: *event,
                    name: state.descriptions.event_name(Some(node), *event),
                    data: data.clone(),
                };
                state.events.dispatch(&notice);
            }
            _ => {}
        }
    }

    /// Ask every link's nodes to describe themselves.
    pub fn broadcast_discovery(&self) {
        let mut out = Outbox::default();
        self.inner
            .state
            .lock()
            .broadcast(&WireMessage::GetDescription, None, &mut out);
        self.settle(out);
    }

    /// Periodic discovery broadcast.
    pub fn spawn_discovery(&self, interval: Duration) -> JoinHandle<()> {
        let hub = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                hub.broadcast_discovery();
                hub.log(LogLevel::Debug, "discovery_broadcast", None, None);
            }
        })
    }

    // ---- introspection --------------------------------------------------

    pub fn links(&self) -> Vec<LinkInfo> {
        let state = self.inner.state.lock();
        state
            .links
            .values()
            .map(|h| LinkInfo {
                id: h.id,
                target: h.target.clone(),
                nodes: state.substitution.nodes_on(h.id),
                stats: h.stats(),
            })
            .collect()
    }

    pub fn status(&self) -> HubStatus {
        let links = self.links();
        let state = self.inner.state.lock();
        HubStatus {
            links,
            described_nodes: state.descriptions.described().len(),
            pending_reads: state.variables.pending_count(),
            subscribers: state.events.len(),
        }
    }

    /// Described nodes in id order.
    pub fn nodes(&self) -> Vec<Arc<NodeDescription>> {
        self.inner.state.lock().descriptions.described()
    }

    pub fn describe(&self, node: NodeId) -> Result<Arc<NodeDescription>, ResolutionError> {
        self.inner.state.lock().descriptions.describe(node)
    }

    pub fn description_state(&self, node: NodeId) -> DescriptionState {
        self.inner.state.lock().descriptions.state(node)
    }

    pub fn variables(&self, node: NodeId) -> Result<Vec<VariableSlot>, ResolutionError> {
        self.inner.state.lock().descriptions.variables(node)
    }

    /// Definitions in effect for a node (or network-wide for `None`).
    pub fn definitions(&self, scope: Option<NodeId>) -> CommonDefinitions {
        self.inner.state.lock().descriptions.definitions(scope).clone()
    }

    pub fn has_event(&self, scope: Option<NodeId>, name: &str) -> bool {
        self.inner.state.lock().descriptions.has_event(scope, name)
    }

    pub fn event_name(&self, scope: Option<NodeId>, id: EventId) -> String {
        self.inner.state.lock().descriptions.event_name(scope, id)
    }

    // ---- variables ------------------------------------------------------

    /// Start reading a variable. Concurrent reads of the same address share
    /// one wire request.
    pub fn read(
        &self,
        node: NodeId,
        var: &VariableRef,
        mode: ReadMode,
    ) -> Result<PendingValue, ResolutionError> {
        let mut out = Outbox::default();
        let pending = {
            let mut state = self.inner.state.lock();
            let slot = state.descriptions.resolve_variable(node, var)?;
            let address = VariableAddress::new(node, slot.address);
            if mode == ReadMode::Cached {
                if let Some(values) = state.variables.cached(address) {
                    return Ok(PendingValue {
                        hub: self.clone(),
                        address,
                        state: PendingState::Ready(values.to_vec()),
                    });
                }
            }
            if state.substitution.route(node).is_none() {
                return Err(ResolutionError::UnknownNode(node));
            }
            let (tx, rx) = oneshot::channel();
            let attach = state.variables.attach(address, slot.length, tx);
            if let Attach::NewRequest(_) = attach {
                let queued = out.failed.len();
                state.send_to_node(
                    node,
                    WireMessage::GetVariables {
                        dest: node,
                        start: slot.address,
                        length: slot.length,
                    },
                    &mut out,
                )?;
                // No request on the wire: nobody may join this address.
                if out.failed.len() > queued {
                    state
                        .variables
                        .fail_address(address, ReadFailure::SendFailed(node));
                }
            }
            PendingValue {
                hub: self.clone(),
                address,
                state: PendingState::Waiting {
                    consumer: attach.consumer(),
                    rx,
                },
            }
        };
        self.settle(out);
        Ok(pending)
    }

    /// Write a variable. The cache is updated immediately.
    pub fn write(
        &self,
        node: NodeId,
        var: &VariableRef,
        values: Vec<i16>,
    ) -> Result<VariableSlot, ResolutionError> {
        let mut out = Outbox::default();
        let slot = {
            let mut state = self.inner.state.lock();
            let slot = state.descriptions.resolve_variable(node, var)?;
            state.send_to_node(
                node,
                WireMessage::SetVariables {
                    dest: node,
                    start: slot.address,
                    values: values.clone(),
                },
                &mut out,
            )?;
            state
                .variables
                .store(VariableAddress::new(node, slot.address), values);
            slot
        };
        self.settle(out);
        Ok(slot)
    }

    pub fn cached(&self, node: NodeId, var: &VariableRef) -> Result<Option<Vec<i16>>, ResolutionError> {
        let state = self.inner.state.lock();
        let slot = state.descriptions.resolve_variable(node, var)?;
        Ok(state
            .variables
            .cached(VariableAddress::new(node, slot.address))
            .map(<[i16]>::to_vec))
    }

    fn detach_read(&self, address: VariableAddress, consumer: ConsumerId) {
        self.inner.state.lock().variables.detach(address, consumer);
    }

    // ---- events ---------------------------------------------------------

    /// Fire a named event: one wire broadcast plus local delivery.
    pub fn fire(&self, scope: Option<NodeId>, name: &str, data: Vec<i16>) -> Result<EventId, ResolutionError> {
        let mut out = Outbox::default();
        let id = {
            let mut state = self.inner.state.lock();
            let id = state.descriptions.resolve_event(scope, name)?;
            state.fire(scope, id, data, &mut out);
            id
        };
        self.settle(out);
        Ok(id)
    }

    /// Fire an event by id; unknown ids are delivered locally as "?".
    pub fn fire_id(&self, scope: Option<NodeId>, id: EventId, data: Vec<i16>) {
        let mut out = Outbox::default();
        self.inner.state.lock().fire(scope, id, data, &mut out);
        self.settle(out);
    }

    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.state.lock().events.register(filter, tx);
        Subscription {
            hub: self.clone(),
            id,
            rx,
        }
    }

    fn unsubscribe(&self, id: SubscriberId) {
        self.inner.state.lock().events.unsubscribe(id);
    }

    // ---- node control ---------------------------------------------------

    pub fn send_to(&self, node: NodeId, msg: WireMessage) -> Result<(), ResolutionError> {
        let mut out = Outbox::default();
        self.inner.state.lock().send_to_node(node, msg, &mut out)?;
        self.settle(out);
        Ok(())
    }

    /// Reset then restart a node's program, firing the "reset" event if defined.
    pub fn reset_node(&self, node: NodeId) -> Result<(), ResolutionError> {
        let mut out = Outbox::default();
        {
            let mut state = self.inner.state.lock();
            state.send_to_node(node, WireMessage::Reset { dest: node }, &mut out)?;
            state.send_to_node(node, WireMessage::Run { dest: node }, &mut out)?;
            if let Ok(id) = state.descriptions.resolve_event(Some(node), RESET_EVENT_NAME) {
                state.fire(Some(node), id, Vec::new(), &mut out);
            }
        }
        emit_node_event!(LogLevel::Info, node, "node_reset", None);
        self.settle(out);
        Ok(())
    }

    /// Reset every described node.
    pub fn reset_all(&self) -> Vec<NodeId> {
        let ids: Vec<NodeId> = self.nodes().iter().map(|d| d.id).collect();
        ids.into_iter()
            .filter(|id| self.reset_node(*id).is_ok())
            .collect()
    }

    /// Compile and load a bundle onto `nodes`. Every targeted script is
    /// compiled before anything is sent; a compile error leaves all nodes as they were.
    pub fn load_bundle(
        &self,
        nodes: &[NodeId],
        bundle: &ScriptBundle,
        compiler: &dyn ScriptCompiler,
    ) -> Result<LoadReport, LoadError> {
        let defs = bundle.definitions();
        let mut out = Outbox::default();
        let report = {
            let mut state = self.inner.state.lock();
            let mut compiled = Vec::new();
            let mut unmatched = Vec::new();
            for node in nodes {
                let desc = state.descriptions.describe(*node)?;
                match bundle.script_for(&desc.name) {
                    Some(source) => compiled.push((*node, compiler.compile(source, &desc, &defs)?)),
                    None => unmatched.push(*node),
                }
            }

            state.descriptions.set_network_definitions(defs.clone());
            for node in nodes {
                state.descriptions.set_node_definitions(*node, defs.clone());
            }
            let mut loaded = Vec::new();
            for (node, script) in compiled {
                for chunk in bytecode_chunks(node, &script.bytecode) {
                    state.send_to_node(node, chunk, &mut out)?;
                }
                state.send_to_node(node, WireMessage::Run { dest: node }, &mut out)?;
                state.descriptions.set_user_variables(node, script.variables);
                loaded.push(node);
            }
            LoadReport { loaded, unmatched }
        };
        for node in &report.loaded {
            emit_node_event!(LogLevel::Info, *node, "script_loaded", None);
        }
        self.settle(out);
        Ok(report)
    }
}

enum PendingState {
    Ready(Vec<i16>),
    Waiting {
        consumer: ConsumerId,
        rx: oneshot::Receiver<ReadResult>,
    },
    Done,
}

/// A variable read in progress. Dropping it before the value arrives
/// detaches it from the pending request.
pub struct PendingValue {
    hub: Hub,
    address: VariableAddress,
    state: PendingState,
}

impl PendingValue {
    pub fn address(&self) -> VariableAddress {
        self.address
    }

    pub async fn value(mut self) -> ReadResult {
        let result = match &mut self.state {
            PendingState::Ready(values) => Ok(std::mem::take(values)),
            PendingState::Waiting { rx, .. } => rx.await.unwrap_or(Err(ReadFailure::Abandoned)),
            PendingState::Done => Err(ReadFailure::Abandoned),
        };
        self.state = PendingState::Done;
        result
    }
}

impl Drop for PendingValue {
    fn drop(&mut self) {
        if let PendingState::Waiting { consumer, .. } = self.state {
            self.hub.detach_read(self.address, consumer);
        }
    }
}

/// Live event subscription; unsubscribes on drop.
pub struct Subscription {
    hub: Hub,
    id: SubscriberId,
    rx: mpsc::UnboundedReceiver<EventNotice>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Widen the subscription.
    pub fn listen(&self, filter: &EventFilter) {
        self.hub.inner.state.lock().events.subscribe(self.id, filter);
    }

    pub fn ignore(&self, filter: &EventFilter) {
        self.hub.inner.state.lock().events.ignore(self.id, filter);
    }

    pub async fn recv(&mut self) -> Option<EventNotice> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<EventNotice> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}
