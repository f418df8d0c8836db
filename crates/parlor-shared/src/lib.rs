//! # parlor-shared
//!
//! Value types shared between the Parlor server and its clients: user
//! identifiers, the chat message entity, canonical conversation keys, and the
//! JSON frames exchanged over the WebSocket transport.

pub mod constants;
pub mod conversation;
pub mod error;
pub mod protocol;
pub mod types;

pub use conversation::ConversationKey;
pub use error::IdentifierError;
pub use protocol::{ChatMessage, ClientFrame, MessageKind, ServerFrame};
pub use types::{Recipient, UserId};
