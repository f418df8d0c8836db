//! Online user tracking.
//!
//! The registry is a set: marking a user online twice leaves a single
//! entry, and a user with several connections shares that entry.

use std::collections::BTreeSet;

use parking_lot::RwLock;
use tracing::debug;

use parlor_shared::UserId;

/// Tracks which users are currently connected.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    online: RwLock<BTreeSet<UserId>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `user` if absent. Returns the roster after the change.
    pub fn mark_online(&self, user: &UserId) -> Vec<UserId> {
        let mut online = self.online.write();
        if online.insert(user.clone()) {
            debug!(user = %user, online = online.len(), "User marked online");
        }
        online.iter().cloned().collect()
    }

    /// Remove `user` if present. Returns the roster after the change.
    pub fn mark_offline(&self, user: &UserId) -> Vec<UserId> {
        let mut online = self.online.write();
        if online.remove(user) {
            debug!(user = %user, online = online.len(), "User marked offline");
        }
        online.iter().cloned().collect()
    }

    /// Sorted copy of the current roster.
    pub fn snapshot(&self) -> Vec<UserId> {
        self.online.read().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn user(name: &str) -> UserId {
        UserId::parse(name).unwrap()
    }

    #[test]
    fn test_mark_online_is_idempotent() {
        let registry = PresenceRegistry::new();
        registry.mark_online(&user("alice"));
        let roster = registry.mark_online(&user("alice"));

        assert_eq!(roster, vec![user("alice")]);
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn test_mark_offline_absent_is_noop() {
        let registry = PresenceRegistry::new();
        registry.mark_online(&user("alice"));

        let roster = registry.mark_offline(&user("bob"));
        assert_eq!(roster, vec![user("alice")]);
    }

    #[test]
    fn test_snapshot_sorted() {
        let registry = PresenceRegistry::new();
        registry.mark_online(&user("carol"));
        registry.mark_online(&user("alice"));
        registry.mark_online(&user("bob"));

        assert_eq!(
            registry.snapshot(),
            vec![user("alice"), user("bob"), user("carol")]
        );

        let roster = registry.mark_offline(&user("bob"));
        assert_eq!(roster, vec![user("alice"), user("carol")]);
    }

    #[test]
    fn test_concurrent_mark_online() {
        let registry = Arc::new(PresenceRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for j in 0..50 {
                        registry.mark_online(&user(&format!("user-{}", (i * 50 + j) % 100)));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.snapshot().len(), 100);
    }
}
