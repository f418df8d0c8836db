//! Message routing.
//!
//! The router classifies each inbound chat event, updates presence,
//! records conversation history and emits deliveries through the injected
//! [`DeliverySink`]. Every call is a short in-memory step; a rejected event
//! leaves all shared state untouched.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};

use parlor_shared::{ChatMessage, ConversationKey, MessageKind, Recipient, UserId};

use crate::delivery::DeliverySink;
use crate::error::RouteError;
use crate::history::ChatHistory;
use crate::presence::PresenceRegistry;

/// Who receives a direct message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EchoPolicy {
    /// Only the addressed user.
    #[default]
    ReceiverOnly,
    /// The addressed user, plus a confirmation copy on the sender's own
    /// private channel.
    ReceiverAndSender,
}

/// Hands out non-decreasing timestamps even if the wall clock steps back.
#[derive(Debug, Default)]
struct MonotonicClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        let mut last = self.last.lock();
        let now = match *last {
            Some(prev) => Utc::now().max(prev),
            None => Utc::now(),
        };
        *last = Some(now);
        now
    }
}

pub struct Router {
    presence: Arc<PresenceRegistry>,
    history: Arc<ChatHistory>,
    sink: Arc<dyn DeliverySink>,
    echo: EchoPolicy,
    clock: MonotonicClock,
    /// Serializes presence changes with their roster publish, so subscribers
    /// see rosters in the order the changes happened.
    presence_order: Mutex<()>,
}

impl Router {
    pub fn new(
        presence: Arc<PresenceRegistry>,
        history: Arc<ChatHistory>,
        sink: Arc<dyn DeliverySink>,
        echo: EchoPolicy,
    ) -> Self {
        Self {
            presence,
            history,
            sink,
            echo,
            clock: MonotonicClock::default(),
            presence_order: Mutex::new(()),
        }
    }

    /// Route by the message's own kind.
    pub fn dispatch(&self, message: ChatMessage) -> Result<ChatMessage, RouteError> {
        match message.kind {
            MessageKind::Join => self.handle_join(message),
            MessageKind::Leave => self.handle_leave(message),
            _ => self.handle_message(message),
        }
    }

    /// Mark the sender online, announce it publicly and publish the roster.
    pub fn handle_join(&self, message: ChatMessage) -> Result<ChatMessage, RouteError> {
        let sender = parse_sender(&message.sender)?;
        let _ordered = self.presence_order.lock();
        let roster = self.presence.mark_online(&sender);

        let announcement =
            self.announce(message, MessageKind::Join, format!("{sender} joined the chat"));
        info!(user = %sender, online = roster.len(), "User joined");

        self.sink.publish_public(&announcement);
        self.sink.publish_presence(&roster);
        Ok(announcement)
    }

    /// Mark the sender offline, announce it publicly and publish the roster.
    pub fn handle_leave(&self, message: ChatMessage) -> Result<ChatMessage, RouteError> {
        let sender = parse_sender(&message.sender)?;
        let _ordered = self.presence_order.lock();
        let roster = self.presence.mark_offline(&sender);

        let announcement =
            self.announce(message, MessageKind::Leave, format!("{sender} left the chat"));
        info!(user = %sender, online = roster.len(), "User left");

        self.sink.publish_public(&announcement);
        self.sink.publish_presence(&roster);
        Ok(announcement)
    }

    /// Record and deliver a chat message.
    ///
    /// Absent or `"everyone"` receivers broadcast on the public channel and
    /// land in the sender's broadcast conversation; anything else is a
    /// direct message recorded under the two-party key.
    pub fn handle_message(&self, mut message: ChatMessage) -> Result<ChatMessage, RouteError> {
        let sender = parse_sender(&message.sender)?;
        let recipient = Recipient::parse(message.receiver.as_deref())
            .map_err(RouteError::InvalidReceiver)?;

        message.timestamp = Some(self.clock.now());
        if !message.kind.is_attachment() {
            message.strip_attachment();
        }

        if !message.kind.is_presence() {
            let key = ConversationKey::for_route(&sender, &recipient);
            let len = self.history.append(&key, message.clone());
            debug!(
                conversation = %key,
                kind = ?message.kind,
                retained = len,
                "Recorded message"
            );
        }

        match &recipient {
            Recipient::Everyone => self.sink.publish_public(&message),
            Recipient::User(target) => {
                self.sink.publish_private(target, &message);
                if self.echo == EchoPolicy::ReceiverAndSender && *target != sender {
                    self.sink.publish_private(&sender, &message);
                }
            }
        }

        Ok(message)
    }

    pub fn online_users(&self) -> Vec<UserId> {
        self.presence.snapshot()
    }

    /// Messages exchanged between two participants, oldest first.
    pub fn history(&self, a: &Recipient, b: &Recipient) -> Vec<ChatMessage> {
        self.history.get(&ConversationKey::between(a.token(), b.token()))
    }

    /// Drop a conversation. Clearing an unknown conversation is a no-op.
    pub fn clear_history(&self, a: &Recipient, b: &Recipient) {
        let key = ConversationKey::between(a.token(), b.token());
        if self.history.clear(&key) {
            info!(conversation = %key, "Cleared conversation history");
        }
    }

    fn announce(&self, mut message: ChatMessage, kind: MessageKind, content: String) -> ChatMessage {
        message.kind = kind;
        message.timestamp = Some(self.clock.now());
        message.content = content;
        message.strip_attachment();
        message
    }
}

fn parse_sender(raw: &str) -> Result<UserId, RouteError> {
    UserId::parse(raw).map_err(RouteError::InvalidSender)
}
