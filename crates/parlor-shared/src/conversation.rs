//! Canonical conversation identity.
//!
//! Two participants share one history no matter which of them sent a given
//! message, so the key orders both tokens before joining them. Broadcast
//! history is kept apart by treating `"everyone"` as an ordinary token.

use serde::{Deserialize, Serialize};

use crate::constants::KEY_SEPARATOR;
use crate::types::{Recipient, UserId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ConversationKey(String);

impl ConversationKey {
    /// Key for a pair of raw participant tokens.
    ///
    /// Tokens must not contain [`KEY_SEPARATOR`]; [`UserId`] guarantees
    /// this for real users.
    pub fn between(a: &str, b: &str) -> Self {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };

        let mut key = String::with_capacity(first.len() + second.len() + 1);
        key.push_str(first);
        key.push(KEY_SEPARATOR);
        key.push_str(second);
        Self(key)
    }

    /// Key for the conversation a message from `sender` to `recipient` belongs to.
    pub fn for_route(sender: &UserId, recipient: &Recipient) -> Self {
        Self::between(sender.as_str(), recipient.token())
    }

    /// The two participants in canonical order.
    pub fn participants(&self) -> (&str, &str) {
        self.0
            .split_once(KEY_SEPARATOR)
            .unwrap_or((self.0.as_str(), ""))
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (a, b) = self.participants();
        write!(f, "{a} & {b}")
    }
}
