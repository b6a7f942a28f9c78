//! Fire-and-forget delivery of trade events to a user's sessions
use tokio::sync::broadcast;

use crate::trade::TradeStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    TradeCreated { trade: String },
    TradeUpdated { trade: String, status: TradeStatus },
    MessagePosted { trade: String, message: String },
}

/// An event addressed to every session of `username`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub username: String,
    pub event: Event,
}

pub trait Notifier: Send + Sync {
    /// Must not block and must not fail the calling operation.
    fn deliver(&self, username: &str, event: Event);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn deliver(&self, _username: &str, _event: Event) {}
}

/// Fans deliveries out to any number of in-process subscribers.
pub struct BroadcastNotifier {
    sender: broadcast::Sender<Delivery>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Delivery> {
        self.sender.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn deliver(&self, username: &str, event: Event) {
        let delivery = Delivery {
            username: username.to_owned(),
            event,
        };
        // no subscribers is not an error
        if self.sender.send(delivery).is_err() {
            tracing::trace!(username, "notification dropped, nobody listening");
        }
    }
}
