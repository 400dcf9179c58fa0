//! Node id substitution across links: two links may both carry a node with
//! the same native id; the later one is remapped to a free canonical id.

use crate::wire::link::LinkId;
use crate::wire::message::NodeId;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
pub struct IdSubstitution {
    canonical: HashMap<(LinkId, NodeId), NodeId>,
    owners: BTreeMap<NodeId, (LinkId, NodeId)>,
}

impl IdSubstitution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical id for a native id seen on `link`, allocating one on first sight.
    pub fn canonical(&mut self, link: LinkId, native: NodeId) -> NodeId {
        if let Some(id) = self.canonical.get(&(link, native)) {
            return *id;
        }
        let id = if self.owners.contains_key(&native) {
            self.lowest_free()
        } else {
            native
        };
        self.canonical.insert((link, native), id);
        self.owners.insert(id, (link, native));
        id
    }

    fn lowest_free(&self) -> NodeId {
        let mut candidate: NodeId = 1;
        for id in self.owners.keys() {
            if *id < candidate {
                continue;
            }
            if *id != candidate {
                break;
            }
            candidate = candidate.saturating_add(1);
        }
        candidate
    }

    /// Link and native id to address a canonical node on the wire.
    pub fn route(&self, canonical: NodeId) -> Option<(LinkId, NodeId)> {
        self.owners.get(&canonical).copied()
    }

    pub fn nodes_on(&self, link: LinkId) -> Vec<NodeId> {
        self.owners
            .iter()
            .filter(|(_, (l, _))| *l == link)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Forget every mapping of `link`; returns the canonical ids it owned.
    pub fn remove_link(&mut self, link: LinkId) -> Vec<NodeId> {
        let nodes = self.nodes_on(link);
        for id in &nodes {
            if let Some(key) = self.owners.remove(id) {
                self.canonical.remove(&key);
            }
        }
        nodes
    }
}
