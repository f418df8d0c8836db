//! WebSocket transport.
//!
//! Each connection names its user in the `username` query parameter. Inbound
//! text frames are decoded as [`ClientFrame`]s and handed to the router;
//! outbound frames come from the connection's [`Subscription`] plus any
//! error replies meant for this connection only.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tracing::{debug, info, warn};

use parlor_shared::{ChatMessage, ClientFrame, MessageKind, ServerFrame, UserId};

use crate::api::AppState;
use crate::delivery::Subscription;
use crate::error::{RouteError, ServerError};
use crate::router::Router;

#[derive(Deserialize)]
pub struct ConnectParams {
    username: String,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Result<Response, ServerError> {
    let user = UserId::parse(&params.username).map_err(RouteError::InvalidSender)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, user, state)))
}

async fn handle_socket(socket: WebSocket, user: UserId, state: AppState) {
    let (mut outbound, mut inbound) = socket.split();
    let Subscription {
        mut broadcast,
        mut private,
    } = state.hub.subscribe(&user);

    info!(
        user = %user,
        connections = state.hub.connection_count(&user),
        "WebSocket connected"
    );

    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ServerFrame>();

    let writer_user = user.clone();
    let writer = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                received = broadcast.recv() => match received {
                    Ok(frame) => frame,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(user = %writer_user, skipped, "Connection lagging, frames skipped");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
                Some(frame) = private.recv() => frame,
                Some(frame) = reply_rx.recv() => frame,
            };

            let text = match frame.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Failed to encode frame");
                    continue;
                }
            };

            if outbound.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut session = Session::new(user.clone(), state.sessions.clone());

    while let Some(received) = inbound.next().await {
        let message = match received {
            Ok(message) => message,
            Err(e) => {
                debug!(user = %user, error = %e, "WebSocket read error");
                break;
            }
        };

        match message {
            Message::Text(text) => {
                if let Err(reason) = session.on_text(&state.router, text.as_str()) {
                    let _ = reply_tx.send(ServerFrame::Error(reason));
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    session.on_close(&state.router);
    writer.abort();
    // The writer owns the private receiver; wait for it to drop before pruning.
    let _ = writer.await;
    state.hub.prune(&user);

    info!(user = %user, "WebSocket disconnected");
}

/// Joined connections per user.
///
/// A user may hold several connections. Only the last joined one to drop
/// takes the user offline.
#[derive(Debug, Default)]
pub struct JoinedSessions {
    counts: DashMap<UserId, usize>,
}

impl JoinedSessions {
    /// Run `f` while holding exclusive access to `user`'s count.
    fn with_count<T>(&self, user: &UserId, f: impl FnOnce(&mut usize) -> T) -> T {
        let mut count = self.counts.entry(user.clone()).or_insert(0);
        let out = f(&mut count);
        let empty = *count == 0;
        drop(count);

        if empty {
            self.counts.remove_if(user, |_, count| *count == 0);
        }
        out
    }
}

/// Per-connection routing state.
struct Session {
    user: UserId,
    sessions: Arc<JoinedSessions>,
    joined: bool,
}

impl Session {
    fn new(user: UserId, sessions: Arc<JoinedSessions>) -> Self {
        Self {
            user,
            sessions,
            joined: false,
        }
    }

    /// Decode and route one inbound frame. The sender is always the
    /// connection's user; an empty sender is filled in, any other is
    /// rejected.
    fn on_text(&mut self, router: &Router, text: &str) -> Result<ChatMessage, String> {
        let mut frame: ClientFrame =
            serde_json::from_str(text).map_err(|e| format!("Malformed frame: {e}"))?;

        let message = frame.message_mut();
        if message.sender.is_empty() {
            message.sender = self.user.to_string();
        } else if message.sender != self.user.as_str() {
            warn!(
                user = %self.user,
                claimed = %message.sender,
                "Rejected frame with foreign sender"
            );
            return Err(format!("Sender must be {}", self.user));
        }

        match frame {
            ClientFrame::Join(m) => self.join(router, m),
            ClientFrame::Leave(m) => self.leave(router, m),
            ClientFrame::Message(m) => router.handle_message(m),
        }
        .map_err(|e| {
            warn!(user = %self.user, error = %e, "Rejected frame");
            e.to_string()
        })
    }

    fn join(&mut self, router: &Router, message: ChatMessage) -> Result<ChatMessage, RouteError> {
        let counted = self.joined;
        let routed = self
            .sessions
            .with_count(&self.user, |count| -> Result<ChatMessage, RouteError> {
                let routed = router.handle_join(message)?;
                if !counted {
                    *count += 1;
                }
                Ok(routed)
            })?;
        self.joined = true;
        Ok(routed)
    }

    fn leave(&mut self, router: &Router, message: ChatMessage) -> Result<ChatMessage, RouteError> {
        let counted = self.joined;
        let routed = self
            .sessions
            .with_count(&self.user, |count| -> Result<ChatMessage, RouteError> {
                let routed = router.handle_leave(message)?;
                if counted {
                    *count = count.saturating_sub(1);
                }
                Ok(routed)
            })?;
        self.joined = false;
        Ok(routed)
    }

    /// Issue the leave a client never sent, unless another joined
    /// connection still holds the user online.
    fn on_close(&mut self, router: &Router) {
        if !self.joined {
            return;
        }
        self.joined = false;

        let user = &self.user;
        self.sessions.with_count(user, |count| {
            *count = count.saturating_sub(1);
            if *count > 0 {
                debug!(
                    user = %user,
                    remaining = *count,
                    "Connection closed, user still joined elsewhere"
                );
                return;
            }

            let mut leave = ChatMessage::text(user.as_str(), None, "");
            leave.kind = MessageKind::Leave;
            if let Err(e) = router.handle_leave(leave) {
                warn!(user = %user, error = %e, "Implicit leave failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::delivery::Hub;
    use crate::history::ChatHistory;
    use crate::presence::PresenceRegistry;
    use crate::router::EchoPolicy;

    fn router() -> Router {
        Router::new(
            Arc::new(PresenceRegistry::new()),
            Arc::new(ChatHistory::new(100)),
            Arc::new(Hub::default()),
            EchoPolicy::ReceiverOnly,
        )
    }

    fn session(sessions: &Arc<JoinedSessions>, name: &str) -> Session {
        Session::new(UserId::parse(name).unwrap(), Arc::clone(sessions))
    }

    const JOIN: &str = r#"{"action":"join","message":{}}"#;
    const LEAVE: &str = r#"{"action":"leave","message":{}}"#;

    #[test]
    fn test_join_fills_sender_from_connection() {
        let router = router();
        let sessions = Arc::new(JoinedSessions::default());
        let mut alice = session(&sessions, "alice");

        let routed = alice.on_text(&router, JOIN).unwrap();

        assert_eq!(routed.sender, "alice");
        assert_eq!(routed.kind, MessageKind::Join);
        assert_eq!(router.online_users().len(), 1);
    }

    #[test]
    fn test_message_frame_routes() {
        let router = router();
        let sessions = Arc::new(JoinedSessions::default());
        let mut alice = session(&sessions, "alice");

        let routed = alice
            .on_text(
                &router,
                r#"{"action":"message","message":{"sender":"alice","receiver":"bob","content":"hey"}}"#,
            )
            .unwrap();
        assert_eq!(routed.kind, MessageKind::Text);

        let bob = parlor_shared::Recipient::parse(Some("bob")).unwrap();
        let alice_party = parlor_shared::Recipient::parse(Some("alice")).unwrap();
        assert_eq!(router.history(&bob, &alice_party).len(), 1);
    }

    #[test]
    fn test_malformed_and_rejected_frames() {
        let router = router();
        let sessions = Arc::new(JoinedSessions::default());
        let mut alice = session(&sessions, "alice");

        let err = alice.on_text(&router, "not json").unwrap_err();
        assert!(err.starts_with("Malformed frame"));

        let err = alice
            .on_text(
                &router,
                r#"{"action":"message","message":{"receiver":"a\u0000b","content":"x"}}"#,
            )
            .unwrap_err();
        assert!(err.starts_with("Invalid receiver"));
    }

    #[test]
    fn test_foreign_sender_rejected() {
        let router = router();
        let sessions = Arc::new(JoinedSessions::default());
        let mut alice = session(&sessions, "alice");

        let err = alice
            .on_text(&router, r#"{"action":"join","message":{"sender":"bob"}}"#)
            .unwrap_err();
        assert!(err.contains("alice"));
        assert!(router.online_users().is_empty());

        let err = alice
            .on_text(
                &router,
                r#"{"action":"message","message":{"sender":"bob","content":"spoof"}}"#,
            )
            .unwrap_err();
        assert!(err.starts_with("Sender must be"));

        alice.on_close(&router);
        assert!(router.online_users().is_empty());
    }

    #[test]
    fn test_close_after_join_marks_offline() {
        let router = router();
        let sessions = Arc::new(JoinedSessions::default());
        let mut alice = session(&sessions, "alice");
        alice.on_text(&router, JOIN).unwrap();

        alice.on_close(&router);
        assert!(router.online_users().is_empty());
        assert!(sessions.counts.is_empty());
    }

    #[test]
    fn test_close_keeps_user_online_while_another_connection_joined() {
        let router = router();
        let sessions = Arc::new(JoinedSessions::default());
        let mut tab1 = session(&sessions, "alice");
        let mut tab2 = session(&sessions, "alice");
        tab1.on_text(&router, JOIN).unwrap();
        tab2.on_text(&router, JOIN).unwrap();
        // A repeated join on one connection counts once.
        tab2.on_text(&router, JOIN).unwrap();

        tab1.on_close(&router);
        assert_eq!(router.online_users().len(), 1);

        tab2.on_close(&router);
        assert!(router.online_users().is_empty());
        assert!(sessions.counts.is_empty());
    }

    #[test]
    fn test_close_after_explicit_leave_is_quiet() {
        let router = router();
        let sessions = Arc::new(JoinedSessions::default());
        let mut alice = session(&sessions, "alice");
        let mut bob = session(&sessions, "bob");
        alice.on_text(&router, JOIN).unwrap();
        alice.on_text(&router, LEAVE).unwrap();
        bob.on_text(&router, JOIN).unwrap();

        alice.on_close(&router);
        assert_eq!(router.online_users().len(), 1);

        bob.on_close(&router);
        assert!(router.online_users().is_empty());

        let mut carol = session(&sessions, "carol");
        carol.on_close(&router);
        assert!(sessions.counts.is_empty());
    }
}
