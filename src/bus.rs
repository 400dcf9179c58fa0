//! Bus-style front-end: remote-callable node, variable and event operations
//! with one object per event filter. The console drives it directly.

use crate::descriptions::VariableRef;
use crate::error::{ReadFailure, ResolutionError};
use crate::hub::{Hub, ReadMode, Subscription};
use crate::subscriptions::{EventFilter, EventNotice};
use crate::wire::message::{EventId, NodeId};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("failed: {0}")]
    Failed(String),
}

impl From<ResolutionError> for BusError {
    fn from(e: ResolutionError) -> Self {
        BusError::InvalidArgs(e.to_string())
    }
}

impl From<ReadFailure> for BusError {
    fn from(e: ReadFailure) -> Self {
        BusError::Failed(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeEntry {
    pub id: NodeId,
    pub name: String,
}

#[derive(Clone)]
pub struct BusInterface {
    hub: Hub,
    next_filter: Arc<AtomicU64>,
}

impl BusInterface {
    pub fn new(hub: Hub) -> Self {
        Self {
            hub,
            next_filter: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Nodes are addressed by name, or by numeric id when names collide.
    fn resolve_node(&self, node: &str) -> Result<NodeId, BusError> {
        let nodes = self.hub.nodes();
        if let Some(d) = nodes.iter().find(|d| d.name == node) {
            return Ok(d.id);
        }
        match node.parse::<NodeId>() {
            Ok(id) if nodes.iter().any(|d| d.id == id) => Ok(id),
            _ => Err(BusError::InvalidArgs(format!("node '{}' does not exist", node))),
        }
    }

    pub fn nodes_list(&self) -> Vec<NodeEntry> {
        self.hub
            .nodes()
            .iter()
            .map(|d| NodeEntry {
                id: d.id,
                name: d.name.clone(),
            })
            .collect()
    }

    pub fn variables_list(&self, node: &str) -> Result<Vec<String>, BusError> {
        let id = self.resolve_node(node)?;
        Ok(self
            .hub
            .variables(id)?
            .into_iter()
            .map(|v| v.name)
            .collect())
    }

    pub async fn get_variable(&self, node: &str, variable: &str) -> Result<Vec<i16>, BusError> {
        self.read(node, variable, ReadMode::Fresh).await
    }

    /// Like [`get_variable`](Self::get_variable), answered from the cache when possible.
    pub async fn peek_variable(&self, node: &str, variable: &str) -> Result<Vec<i16>, BusError> {
        self.read(node, variable, ReadMode::Cached).await
    }

    async fn read(&self, node: &str, variable: &str, mode: ReadMode) -> Result<Vec<i16>, BusError> {
        let id = self.resolve_node(node)?;
        let pending = self.hub.read(id, &VariableRef::from(variable), mode)?;
        Ok(pending.value().await?)
    }

    pub fn set_variable(&self, node: &str, variable: &str, values: Vec<i16>) -> Result<(), BusError> {
        if values.is_empty() {
            return Err(BusError::InvalidArgs("no values".into()));
        }
        let id = self.resolve_node(node)?;
        self.hub.write(id, &VariableRef::from(variable), values)?;
        Ok(())
    }

    pub fn send_event(&self, event: EventId, data: Vec<i16>) {
        self.hub.fire_id(None, event, data);
    }

    pub fn send_event_name(&self, name: &str, data: Vec<i16>) -> Result<EventId, BusError> {
        Ok(self.hub.fire(None, name, data)?)
    }

    /// Create an empty filter object; widen it with `listen_*`.
    pub fn create_event_filter(&self) -> BusEventFilter {
        let n = self.next_filter.fetch_add(1, Ordering::Relaxed);
        BusEventFilter {
            path: format!("/events_filters/{}", n),
            subscription: Some(self.hub.subscribe(EventFilter::none())),
        }
    }
}

/// One event filter object. Dropping it frees the subscription.
pub struct BusEventFilter {
    path: String,
    subscription: Option<Subscription>,
}

impl BusEventFilter {
    pub fn path(&self) -> &str {
        &self.path
    }

    fn subscription(&self) -> Result<&Subscription, BusError> {
        self.subscription
            .as_ref()
            .ok_or_else(|| BusError::Failed(format!("{} was freed", self.path)))
    }

    pub fn listen_event(&self, event: EventId) -> Result<(), BusError> {
        self.subscription()?.listen(&EventFilter::ids([event]));
        Ok(())
    }

    pub fn listen_event_name(&self, name: &str) -> Result<(), BusError> {
        self.subscription()?.listen(&EventFilter::names([name]));
        Ok(())
    }

    pub fn ignore_event(&self, event: EventId) -> Result<(), BusError> {
        self.subscription()?.ignore(&EventFilter::ids([event]));
        Ok(())
    }

    pub fn ignore_event_name(&self, name: &str) -> Result<(), BusError> {
        self.subscription()?.ignore(&EventFilter::names([name]));
        Ok(())
    }

    /// Next matching event; `None` once freed.
    pub async fn recv(&mut self) -> Option<EventNotice> {
        self.subscription.as_mut()?.recv().await
    }

    pub fn try_recv(&mut self) -> Option<EventNotice> {
        self.subscription.as_mut()?.try_recv()
    }

    pub fn free(&mut self) {
        self.subscription = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubSettings;

    #[tokio::test]
    async fn unknown_node_is_invalid_args() {
        let bus = BusInterface::new(Hub::new(HubSettings::default(), false));
        assert!(bus.nodes_list().is_empty());
        assert!(matches!(
            bus.variables_list("thymio"),
            Err(BusError::InvalidArgs(_))
        ));
        assert!(matches!(
            bus.get_variable("1", "x").await,
            Err(BusError::InvalidArgs(_))
        ));
        assert!(matches!(
            bus.send_event_name("nope", vec![]),
            Err(BusError::InvalidArgs(_))
        ));
    }

    #[tokio::test]
    async fn filters_get_distinct_paths_and_free() {
        let bus = BusInterface::new(Hub::new(HubSettings::default(), false));
        let mut a = bus.create_event_filter();
        let b = bus.create_event_filter();
        assert_ne!(a.path(), b.path());
        assert!(a.path().starts_with("/events_filters/"));

        a.listen_event(3).unwrap();
        bus.send_event(3, vec![7]);
        let notice = a.try_recv().unwrap();
        assert_eq!((notice.event, notice.data), (3, vec![7]));

        a.free();
        assert!(a.listen_event(3).is_err());
        assert!(a.recv().await.is_none());
    }
}
