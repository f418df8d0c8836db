use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::UserId;

/// What a chat message carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageKind {
    #[default]
    Text,
    File,
    Image,
    Join,
    Leave,
}

impl MessageKind {
    /// Attachment kind for a declared MIME type.
    pub fn for_mime(mime: &str) -> Self {
        if mime.starts_with("image/") {
            Self::Image
        } else {
            Self::File
        }
    }

    pub fn is_attachment(self) -> bool {
        matches!(self, Self::File | Self::Image)
    }

    pub fn is_presence(self) -> bool {
        matches!(self, Self::Join | Self::Leave)
    }
}

/// The unit of routed data.
///
/// Constructed by the transport with `sender`, `receiver` and `content`
/// populated; the router completes `kind` and `timestamp`. For attachments
/// `content` is a download reference, never the bytes themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub sender: String,
    /// `None` or `"everyone"` addresses every connected user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Declared MIME type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    /// Size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn text(
        sender: impl Into<String>,
        receiver: Option<&str>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            kind: MessageKind::Text,
            sender: sender.into(),
            receiver: receiver.map(str::to_string),
            content: content.into(),
            file_name: None,
            file_type: None,
            file_size: None,
            timestamp: None,
        }
    }

    /// A message announcing a stored upload. The kind follows the MIME type.
    pub fn attachment(
        sender: impl Into<String>,
        receiver: Option<&str>,
        reference: impl Into<String>,
        file_name: impl Into<String>,
        file_type: impl Into<String>,
        file_size: u64,
    ) -> Self {
        let file_type = file_type.into();
        Self {
            kind: MessageKind::for_mime(&file_type),
            sender: sender.into(),
            receiver: receiver.map(str::to_string),
            content: reference.into(),
            file_name: Some(file_name.into()),
            file_type: Some(file_type),
            file_size: Some(file_size),
            timestamp: None,
        }
    }

    /// Clear the attachment fields.
    pub fn strip_attachment(&mut self) {
        self.file_name = None;
        self.file_type = None;
        self.file_size = None;
    }
}

/// Frames a client sends over the WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "message", rename_all = "lowercase")]
pub enum ClientFrame {
    Join(ChatMessage),
    Leave(ChatMessage),
    Message(ChatMessage),
}

impl ClientFrame {
    pub fn message_mut(&mut self) -> &mut ChatMessage {
        match self {
            Self::Join(m) | Self::Leave(m) | Self::Message(m) => m,
        }
    }
}

/// Frames the server pushes to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel", content = "payload", rename_all = "lowercase")]
pub enum ServerFrame {
    /// Broadcast chat traffic and join/leave announcements
    Public(ChatMessage),
    /// Full roster of online users
    Presence(Vec<UserId>),
    /// Direct message addressed to this connection's user
    Private(ChatMessage),
    /// A frame from this connection was rejected
    Error(String),
}

impl ServerFrame {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
