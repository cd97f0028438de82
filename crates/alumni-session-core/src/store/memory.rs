use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use tokio::sync::broadcast;

use super::events::{StorageEnvelope, StorageEvent, StorageNotifier, StorageSubscription};
use super::TokenStore;

/// Capacity of the shared change channel.
const EVENT_CHANNEL_CAPACITY: usize = 16;

struct Backend {
    entries: Mutex<HashMap<String, String>>,
    events: broadcast::Sender<StorageEnvelope>,
    next_context: AtomicU64,
}

/// In-process storage shared between contexts.
///
/// Every handle belongs to one context (think: one browser tab). Cloning a
/// handle stays in the same context; `open_context` creates a sibling that
/// sees the same data and is notified of the other contexts' writes.
#[derive(Clone)]
pub struct MemoryTokenStore {
    backend: Arc<Backend>,
    context: u64,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            backend: Arc::new(Backend {
                entries: Mutex::new(HashMap::new()),
                events,
                next_context: AtomicU64::new(1),
            }),
            context: 0,
        }
    }

    /// A new context over the same storage.
    pub fn open_context(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            context: self.backend.next_context.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.backend
            .entries
            .lock()
            .map_err(|_| anyhow!("Memory store lock poisoned"))
    }

    fn announce(&self, key: &str, new_value: Option<String>) {
        // No subscribers is fine
        let _ = self.backend.events.send(StorageEnvelope {
            origin: Some(self.context),
            event: StorageEvent {
                key: key.to_string(),
                new_value,
            },
        });
    }
}

impl Default for MemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let previous = self.entries()?.insert(key.to_string(), value.to_string());
        if previous.as_deref() != Some(value) {
            self.announce(key, Some(value.to_string()));
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let previous = self.entries()?.remove(key);
        if previous.is_some() {
            self.announce(key, None);
        }
        Ok(())
    }
}

impl StorageNotifier for MemoryTokenStore {
    fn subscribe(&self) -> StorageSubscription {
        StorageSubscription::new(self.backend.events.subscribe(), Some(self.context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_contexts_share_data() {
        let tab_a = MemoryTokenStore::new();
        let tab_b = tab_a.open_context();

        tab_a.set("auth", "v1").unwrap();
        assert_eq!(tab_b.get("auth").unwrap().as_deref(), Some("v1"));

        tab_b.remove("auth").unwrap();
        assert_eq!(tab_a.get("auth").unwrap(), None);
    }

    #[tokio::test]
    async fn test_writer_is_not_notified_of_its_own_change() {
        let tab_a = MemoryTokenStore::new();
        let tab_b = tab_a.open_context();
        let mut sub_a = tab_a.subscribe();
        let mut sub_b = tab_b.subscribe();

        tab_a.set("auth", "v1").unwrap();

        let event = sub_b.next().await.unwrap();
        assert_eq!(event.new_value.as_deref(), Some("v1"));

        let own = tokio::time::timeout(Duration::from_millis(50), sub_a.next()).await;
        assert!(own.is_err());
    }

    #[tokio::test]
    async fn test_unchanged_writes_are_silent() {
        let tab_a = MemoryTokenStore::new();
        let tab_b = tab_a.open_context();
        let mut sub_b = tab_b.subscribe();

        tab_a.set("auth", "v1").unwrap();
        tab_a.set("auth", "v1").unwrap();
        tab_a.remove("missing").unwrap();
        tab_a.remove("auth").unwrap();

        assert_eq!(sub_b.next().await.unwrap().new_value.as_deref(), Some("v1"));
        assert_eq!(sub_b.next().await.unwrap().new_value, None);
    }
}
