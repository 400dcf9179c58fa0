//! Per-connection response ordering. Requests on one connection may finish
//! out of order; each waits for its turn before its response is released.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

pub type RequestId = u64;

struct ConnectionQueue {
    order: VecDeque<RequestId>,
    turn: Arc<Notify>,
}

#[derive(Default)]
pub struct ResponseQueues {
    queues: Mutex<HashMap<SocketAddr, ConnectionQueue>>,
    next_id: AtomicU64,
}

impl ResponseQueues {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Append a request to the tail of its connection's queue.
    pub fn schedule(self: &Arc<Self>, client: SocketAddr) -> ResponseTicket {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut queues = self.queues.lock();
        let queue = queues.entry(client).or_insert_with(|| ConnectionQueue {
            order: VecDeque::new(),
            turn: Arc::new(Notify::new()),
        });
        queue.order.push_back(id);
        ResponseTicket {
            queues: self.clone(),
            client,
            id,
            turn: queue.turn.clone(),
        }
    }

    /// Remove one request wherever it sits in the queue. Idempotent.
    pub fn unschedule(&self, client: SocketAddr, id: RequestId) -> bool {
        let mut queues = self.queues.lock();
        let Some(queue) = queues.get_mut(&client) else {
            return false;
        };
        let Some(pos) = queue.order.iter().position(|r| *r == id) else {
            return false;
        };
        queue.order.remove(pos);
        queue.turn.notify_waiters();
        if queue.order.is_empty() {
            queues.remove(&client);
        }
        true
    }

    pub fn pending(&self, client: SocketAddr) -> Vec<RequestId> {
        self.queues
            .lock()
            .get(&client)
            .map(|q| q.order.iter().copied().collect())
            .unwrap_or_default()
    }

    /// True when `id` is at the head of its queue, or no longer queued at all.
    pub fn is_turn(&self, client: SocketAddr, id: RequestId) -> bool {
        match self.queues.lock().get(&client) {
            Some(queue) => match queue.order.front() {
                Some(head) => *head == id || !queue.order.contains(&id),
                None => true,
            },
            None => true,
        }
    }
}

/// A scheduled response. Dropping the ticket removes it from the queue,
/// letting the next response on the connection go.
pub struct ResponseTicket {
    queues: Arc<ResponseQueues>,
    client: SocketAddr,
    id: RequestId,
    turn: Arc<Notify>,
}

impl ResponseTicket {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Wait until every response scheduled before this one has been released.
    pub async fn wait_turn(&self) {
        loop {
            let notified = self.turn.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.queues.is_turn(self.client, self.id) {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for ResponseTicket {
    fn drop(&mut self) {
        self.queues.unschedule(self.client, self.id);
    }
}
