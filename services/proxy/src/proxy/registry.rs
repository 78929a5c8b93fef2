//! The IDE-key registry.
//!
//! Maps each registered IDE key to the endpoint the IDE listens on for
//! debugger sessions. Mutated by the command listener (register/deregister)
//! and by sessions (stale-endpoint eviction after a failed dial); read by
//! every session that routes an init packet.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use tokio::sync::RwLock;
use tracing::debug;

/// A single IDE registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdeRegistration {
    /// The key engines use to select this IDE. Unique within the registry.
    pub key: String,
    /// Host the IDE reached us from; sessions dial back to it.
    pub host: IpAddr,
    /// Port the IDE listens on for debugger sessions.
    pub port: u16,
    /// Multi-session hint from `proxyinit -m`, stored but not interpreted.
    pub multi: Option<String>,
}

impl IdeRegistration {
    /// The endpoint sessions dial to reach this IDE.
    pub fn endpoint(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Shared registry of IDE-key bindings.
///
/// All access goes through one lock; insert-if-absent is a single critical
/// section, so two racing `proxyinit` commands for the same key resolve to
/// exactly one winner.
#[derive(Debug, Default)]
pub struct Registry {
    entries: RwLock<HashMap<String, IdeRegistration>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `registration` unless its key is already present.
    ///
    /// Returns `false` on collision, leaving the existing entry untouched.
    pub async fn add(&self, registration: IdeRegistration) -> bool {
        let mut entries = self.entries.write().await;
        match entries.entry(registration.key.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                debug!(
                    key = %registration.key,
                    endpoint = %registration.endpoint(),
                    "IDE registered"
                );
                slot.insert(registration);
                true
            }
        }
    }

    /// Remove the registration for `key`, returning it if present.
    pub async fn remove(&self, key: &str) -> Option<IdeRegistration> {
        let removed = self.entries.write().await.remove(key);
        if let Some(registration) = &removed {
            debug!(key = %key, endpoint = %registration.endpoint(), "IDE deregistered");
        }
        removed
    }

    /// Look up the registration for `key`.
    pub async fn lookup(&self, key: &str) -> Option<IdeRegistration> {
        self.entries.read().await.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn reg(key: &str, port: u16) -> IdeRegistration {
        IdeRegistration {
            key: key.to_string(),
            host: "127.0.0.1".parse().unwrap(),
            port,
            multi: None,
        }
    }

    #[tokio::test]
    async fn add_lookup_remove() {
        let registry = Registry::new();

        assert!(registry.add(reg("alice", 9010)).await);
        let found = registry.lookup("alice").await.unwrap();
        assert_eq!(found.endpoint(), "127.0.0.1:9010".parse().unwrap());

        assert_eq!(registry.remove("alice").await, Some(reg("alice", 9010)));
        assert!(registry.lookup("alice").await.is_none());
        assert!(registry.remove("alice").await.is_none());
    }

    #[tokio::test]
    async fn add_rejects_duplicate_key() {
        let registry = Registry::new();

        assert!(registry.add(reg("dave", 9010)).await);
        assert!(!registry.add(reg("dave", 9011)).await);

        // The first registration wins and survives the collision.
        assert_eq!(registry.lookup("dave").await.unwrap().port, 9010);
    }

    #[tokio::test]
    async fn register_then_deregister_restores_initial_state() {
        let registry = Registry::new();

        assert!(registry.add(reg("carol", 9010)).await);
        assert!(registry.remove("carol").await.is_some());

        // The key is free again.
        assert!(registry.add(reg("carol", 9011)).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_adds_have_one_winner() {
        let registry = Arc::new(Registry::new());

        let tasks: Vec<_> = (0..16u16)
            .map(|i| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.add(reg("shared", 9000 + i)).await })
            })
            .collect();

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(registry.lookup("shared").await.is_some());
    }
}
