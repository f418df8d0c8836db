//! Outbound delivery to connected clients.
//!
//! The router only sees [`DeliverySink`]. [`Hub`] is the in-process
//! implementation used by the WebSocket transport: one broadcast channel
//! carries public and presence frames to every connection, and each user
//! gets unbounded private queues (one per open connection).

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace};

use parlor_shared::{ChatMessage, ServerFrame, UserId};

/// Fire-and-forget publishing surface the router emits into.
pub trait DeliverySink: Send + Sync {
    /// Deliver to every subscriber of the public channel.
    fn publish_public(&self, message: &ChatMessage);

    /// Deliver the full roster to every subscriber of the presence channel.
    fn publish_presence(&self, roster: &[UserId]);

    /// Deliver to one user's private channel.
    fn publish_private(&self, target: &UserId, message: &ChatMessage);
}

/// Receivers handed to a single connection.
pub struct Subscription {
    pub broadcast: broadcast::Receiver<ServerFrame>,
    pub private: mpsc::UnboundedReceiver<ServerFrame>,
}

pub struct Hub {
    broadcast: broadcast::Sender<ServerFrame>,
    private: DashMap<UserId, Vec<mpsc::UnboundedSender<ServerFrame>>>,
}

impl Hub {
    /// `capacity` bounds how far a slow connection may lag on the
    /// broadcast channel before it starts skipping frames.
    pub fn new(capacity: usize) -> Self {
        let (broadcast, _) = broadcast::channel(capacity.max(1));
        Self {
            broadcast,
            private: DashMap::new(),
        }
    }

    /// Open a subscription for a connection belonging to `user`.
    pub fn subscribe(&self, user: &UserId) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.private.entry(user.clone()).or_default().push(tx);

        debug!(user = %user, "Connection subscribed");

        Subscription {
            broadcast: self.broadcast.subscribe(),
            private: rx,
        }
    }

    /// Forget closed private queues for `user`.
    pub fn prune(&self, user: &UserId) {
        if let Some(mut queues) = self.private.get_mut(user) {
            queues.retain(|tx| !tx.is_closed());
        }
        self.private.remove_if(user, |_, queues| queues.is_empty());
    }

    /// Number of open private queues for `user`.
    pub fn connection_count(&self, user: &UserId) -> usize {
        self.private
            .get(user)
            .map(|queues| queues.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    fn send_broadcast(&self, frame: ServerFrame) {
        // Err only means nobody is subscribed right now.
        if self.broadcast.send(frame).is_err() {
            trace!("No broadcast subscribers");
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(256)
    }
}

impl DeliverySink for Hub {
    fn publish_public(&self, message: &ChatMessage) {
        self.send_broadcast(ServerFrame::Public(message.clone()));
    }

    fn publish_presence(&self, roster: &[UserId]) {
        self.send_broadcast(ServerFrame::Presence(roster.to_vec()));
    }

    fn publish_private(&self, target: &UserId, message: &ChatMessage) {
        let delivered = match self.private.get_mut(target) {
            Some(mut queues) => {
                queues.retain(|tx| tx.send(ServerFrame::Private(message.clone())).is_ok());
                queues.len()
            }
            None => 0,
        };

        if delivered == 0 {
            self.private.remove_if(target, |_, queues| queues.is_empty());
            debug!(target = %target, "Private message for user with no open connection");
        }
    }
}
