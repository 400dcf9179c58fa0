//! Variable correlation: matches asynchronous value replies to the consumers
//! waiting on them and keeps the last known value of each variable.

use crate::error::ReadFailure;
use crate::wire::message::NodeId;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::oneshot;

/// Memory location of a variable on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct VariableAddress {
    pub node: NodeId,
    pub start: u16,
}

impl VariableAddress {
    pub fn new(node: NodeId, start: u16) -> Self {
        Self { node, start }
    }
}

pub type ReadResult = Result<Vec<i16>, ReadFailure>;
pub type ConsumerId = u64;

/// Outcome of attaching a consumer to an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attach {
    /// First waiter on this address: the caller must send the wire request.
    NewRequest(ConsumerId),
    /// A request is already in flight; the consumer shares its reply.
    Joined(ConsumerId),
}

impl Attach {
    pub fn consumer(self) -> ConsumerId {
        match self {
            Attach::NewRequest(id) | Attach::Joined(id) => id,
        }
    }
}

struct PendingRead {
    length: u16,
    waiters: BTreeMap<ConsumerId, oneshot::Sender<ReadResult>>,
}

#[derive(Default)]
pub struct VariableCorrelator {
    pending: BTreeMap<VariableAddress, PendingRead>,
    cache: HashMap<VariableAddress, Vec<i16>>,
    next_consumer: ConsumerId,
}

impl VariableCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(
        &mut self,
        address: VariableAddress,
        length: u16,
        reply: oneshot::Sender<ReadResult>,
    ) -> Attach {
        self.next_consumer += 1;
        let id = self.next_consumer;
        match self.pending.get_mut(&address) {
            Some(entry) => {
                entry.length = entry.length.max(length);
                entry.waiters.insert(id, reply);
                Attach::Joined(id)
            }
            None => {
                let mut waiters = BTreeMap::new();
                waiters.insert(id, reply);
                self.pending.insert(address, PendingRead { length, waiters });
                Attach::NewRequest(id)
            }
        }
    }

    /// Remove a consumer that no longer wants the value.
    pub fn detach(&mut self, address: VariableAddress, consumer: ConsumerId) -> bool {
        let Some(entry) = self.pending.get_mut(&address) else {
            return false;
        };
        let removed = entry.waiters.remove(&consumer).is_some();
        if entry.waiters.is_empty() {
            self.pending.remove(&address);
        }
        removed
    }

    /// Deliver a value reply to every waiter on `address`, exactly once each.
    /// Returns the number of consumers notified.
    pub fn resolve(&mut self, address: VariableAddress, values: Vec<i16>) -> usize {
        let delivered = match self.pending.remove(&address) {
            Some(entry) => {
                let count = entry.waiters.len();
                for (_, waiter) in entry.waiters {
                    let _ = waiter.send(Ok(values.clone()));
                }
                count
            }
            None => 0,
        };
        self.cache.insert(address, values);
        delivered
    }

    /// Fail the pending read on one address, e.g. when its wire request
    /// could not be sent. Returns the number of consumers notified.
    pub fn fail_address(&mut self, address: VariableAddress, failure: ReadFailure) -> usize {
        match self.pending.remove(&address) {
            Some(entry) => {
                let count = entry.waiters.len();
                for (_, waiter) in entry.waiters {
                    let _ = waiter.send(Err(failure));
                }
                count
            }
            None => 0,
        }
    }

    /// Fail every pending read on `node`. Cached values for it are dropped.
    pub fn fail_node(&mut self, node: NodeId, failure: ReadFailure) -> usize {
        let addresses: Vec<VariableAddress> = self
            .pending
            .keys()
            .filter(|a| a.node == node)
            .copied()
            .collect();
        let mut failed = 0;
        for address in addresses {
            if let Some(entry) = self.pending.remove(&address) {
                failed += entry.waiters.len();
                for (_, waiter) in entry.waiters {
                    let _ = waiter.send(Err(failure));
                }
            }
        }
        self.cache.retain(|a, _| a.node != node);
        failed
    }

    /// Record a locally written value.
    pub fn store(&mut self, address: VariableAddress, values: Vec<i16>) {
        self.cache.insert(address, values);
    }

    pub fn cached(&self, address: VariableAddress) -> Option<&[i16]> {
        self.cache.get(&address).map(Vec::as_slice)
    }

    pub fn is_pending(&self, address: VariableAddress) -> bool {
        self.pending.contains_key(&address)
    }

    pub fn waiters(&self, address: VariableAddress) -> usize {
        self.pending
            .get(&address)
            .map(|e| e.waiters.len())
            .unwrap_or(0)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
