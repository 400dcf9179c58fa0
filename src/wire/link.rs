use crate::error::TransportError;
use crate::wire::message::WireMessage;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;

/// Opaque handle for one live wire connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LinkId(pub u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub messages_received: u64,
}

/// Sending side of a link as held by the hub. The writer task owns the socket;
/// dropping the handle closes the queue and ends that task.
pub struct LinkHandle {
    pub id: LinkId,
    pub target: String,
    sender: mpsc::Sender<String>,
    closed: Arc<Notify>,
    messages_sent: AtomicU64,
    bytes_sent: AtomicU64,
    messages_received: AtomicU64,
}

impl LinkHandle {
    pub fn new(id: LinkId, target: String, sender: mpsc::Sender<String>) -> Self {
        Self {
            id,
            target,
            sender,
            closed: Arc::new(Notify::new()),
            messages_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
        }
    }

    /// Signalled once when the hub drops this link; the reader loop listens on it.
    pub fn closed_signal(&self) -> Arc<Notify> {
        self.closed.clone()
    }

    /// Queue one message without blocking.
    pub fn send(&self, msg: &WireMessage) -> Result<(), TransportError> {
        let line = msg.as_json();
        let len = line.len() as u64 + 1;
        match self.sender.try_send(line) {
            Ok(()) => {
                self.messages_sent.fetch_add(1, Ordering::Relaxed);
                self.bytes_sent.fetch_add(len, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(TransportError::QueueFull(self.id)),
            Err(TrySendError::Closed(_)) => Err(TransportError::Closed(self.id)),
        }
    }

    pub fn note_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> LinkStats {
        LinkStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
        }
    }
}

impl Drop for LinkHandle {
    fn drop(&mut self) {
        self.closed.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_counts_bytes_including_newline() {
        let (tx, mut rx) = mpsc::channel(4);
        let link = LinkHandle::new(LinkId(1), "test".into(), tx);
        link.send(&WireMessage::Run { dest: 2 }).unwrap();
        let line = rx.recv().await.unwrap();
        let stats = link.stats();
        assert_eq!(stats.messages_sent, 1);
        assert_eq!(stats.bytes_sent, line.len() as u64 + 1);
    }

    #[tokio::test]
    async fn closed_queue_is_reported() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let link = LinkHandle::new(LinkId(3), "test".into(), tx);
        assert!(matches!(
            link.send(&WireMessage::GetDescription),
            Err(TransportError::Closed(LinkId(3)))
        ));
    }

    #[tokio::test]
    async fn full_queue_is_reported() {
        let (tx, _rx) = mpsc::channel(1);
        let link = LinkHandle::new(LinkId(4), "test".into(), tx);
        link.send(&WireMessage::GetDescription).unwrap();
        assert!(matches!(
            link.send(&WireMessage::GetDescription),
            Err(TransportError::QueueFull(LinkId(4)))
        ));
    }
}
