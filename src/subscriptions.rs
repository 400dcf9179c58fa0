//! Event registry: which consumer wants which named events.

use crate::wire::message::{EventId, NodeId};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::mpsc;

pub type SubscriberId = u64;

/// One event occurrence, already resolved to its name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventNotice {
    pub source: NodeId,
    pub event: EventId,
    pub name: String,
    pub data: Vec<i16>,
}

impl EventNotice {
    /// `name v1 v2 ...` as written on server-sent-event lines.
    pub fn to_line(&self) -> String {
        let mut line = self.name.clone();
        for v in &self.data {
            line.push(' ');
            line.push_str(&v.to_string());
        }
        line
    }
}

/// Selection of events a subscriber receives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    all: bool,
    names: BTreeSet<String>,
    ids: BTreeSet<EventId>,
    /// Restrict to events from these nodes; empty means any node.
    sources: BTreeSet<NodeId>,
}

impl EventFilter {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            all: true,
            ..Self::default()
        }
    }

    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut filter = Self::default();
        for name in names {
            let name = name.into();
            if name == "*" {
                filter.all = true;
            } else {
                filter.names.insert(name);
            }
        }
        filter
    }

    pub fn ids<I: IntoIterator<Item = EventId>>(ids: I) -> Self {
        Self {
            ids: ids.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn from_sources<I: IntoIterator<Item = NodeId>>(mut self, sources: I) -> Self {
        self.sources.extend(sources);
        self
    }

    pub fn union(&mut self, other: &EventFilter) {
        self.all |= other.all;
        self.names.extend(other.names.iter().cloned());
        self.ids.extend(other.ids.iter().copied());
        self.sources.extend(other.sources.iter().copied());
    }

    /// Remove names and ids listed in `other`. A wildcard in `other` clears everything.
    pub fn subtract(&mut self, other: &EventFilter) {
        if other.all {
            self.all = false;
            self.names.clear();
            self.ids.clear();
            return;
        }
        for name in &other.names {
            self.names.remove(name);
        }
        for id in &other.ids {
            self.ids.remove(id);
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.all && self.names.is_empty() && self.ids.is_empty()
    }

    pub fn matches(&self, notice: &EventNotice) -> bool {
        if !self.sources.is_empty() && !self.sources.contains(&notice.source) {
            return false;
        }
        self.all || self.names.contains(&notice.name) || self.ids.contains(&notice.event)
    }
}

struct Subscriber {
    filter: EventFilter,
    sink: mpsc::UnboundedSender<EventNotice>,
}

#[derive(Default)]
pub struct EventRegistry {
    subscribers: BTreeMap<SubscriberId, Subscriber>,
    next_id: SubscriberId,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer with `filter`; notices are pushed into `sink`.
    pub fn register(
        &mut self,
        filter: EventFilter,
        sink: mpsc::UnboundedSender<EventNotice>,
    ) -> SubscriberId {
        self.next_id += 1;
        self.subscribers
            .insert(self.next_id, Subscriber { filter, sink });
        self.next_id
    }

    /// Add to an existing subscription. Subscribing twice unions the filters.
    pub fn subscribe(&mut self, id: SubscriberId, filter: &EventFilter) -> bool {
        match self.subscribers.get_mut(&id) {
            Some(sub) => {
                sub.filter.union(filter);
                true
            }
            None => false,
        }
    }

    pub fn ignore(&mut self, id: SubscriberId, filter: &EventFilter) -> bool {
        match self.subscribers.get_mut(&id) {
            Some(sub) => {
                sub.filter.subtract(filter);
                true
            }
            None => false,
        }
    }

    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    /// Push `notice` to every matching subscriber. Subscribers whose receiving
    /// side is gone are dropped. Returns how many were notified.
    pub fn dispatch(&mut self, notice: &EventNotice) -> usize {
        let mut delivered = 0;
        let mut gone = Vec::new();
        for (id, sub) in &self.subscribers {
            if !sub.filter.matches(notice) {
                continue;
            }
            if sub.sink.send(notice.clone()).is_ok() {
                delivered += 1;
            } else {
                gone.push(*id);
            }
        }
        for id in gone {
            self.subscribers.remove(&id);
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice(source: NodeId, name: &str) -> EventNotice {
        EventNotice {
            source,
            event: 0,
            name: name.into(),
            data: vec![1, 2],
        }
    }

    #[test]
    fn subscribing_twice_unions_filters() {
        let mut reg = EventRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = reg.register(EventFilter::names(["a"]), tx);
        reg.subscribe(id, &EventFilter::names(["b"]));
        assert_eq!(reg.dispatch(&notice(1, "a")), 1);
        assert_eq!(reg.dispatch(&notice(1, "b")), 1);
        assert_eq!(reg.dispatch(&notice(1, "c")), 0);
        assert_eq!(rx.try_recv().unwrap().name, "a");
        assert_eq!(rx.try_recv().unwrap().name, "b");
    }

    #[test]
    fn wildcard_and_source_restriction() {
        let mut reg = EventRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        reg.register(EventFilter::names(["*"]).from_sources([2]), tx);
        assert_eq!(reg.dispatch(&notice(1, "x")), 0);
        assert_eq!(reg.dispatch(&notice(2, "x")), 1);
    }

    #[test]
    fn closed_receivers_are_pruned() {
        let mut reg = EventRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        reg.register(EventFilter::all(), tx);
        drop(rx);
        assert_eq!(reg.dispatch(&notice(1, "x")), 0);
        assert!(reg.is_empty());
    }

    #[test]
    fn ignore_removes_names() {
        let mut reg = EventRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = reg.register(EventFilter::names(["a", "b"]), tx);
        reg.ignore(id, &EventFilter::names(["a"]));
        assert_eq!(reg.dispatch(&notice(1, "a")), 0);
        assert_eq!(reg.dispatch(&notice(1, "b")), 1);
    }

    #[test]
    fn sse_line_format() {
        assert_eq!(notice(1, "bump").to_line(), "bump 1 2");
    }
}
