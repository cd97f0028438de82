//! Change notification for persisted values.
//!
//! A `StorageEvent` announces that a key was written or removed by another
//! execution context. Notifiers publish `StorageEnvelope`s on a broadcast
//! channel; each `StorageSubscription` drops the envelopes its own context
//! produced, mirroring browser storage events which never fire in the tab
//! that made the change.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::TokenStore;

/// Capacity of the notification channel.
/// Storage writes are rare; a slow subscriber only needs the latest change.
const EVENT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    /// `None` when the key was removed.
    pub new_value: Option<String>,
}

/// A storage event tagged with the context that caused it.
#[derive(Debug, Clone)]
pub struct StorageEnvelope {
    /// `None` when the writer is unknown (e.g. detected by polling).
    pub origin: Option<u64>,
    pub event: StorageEvent,
}

/// Something that can announce external storage changes.
pub trait StorageNotifier: Send + Sync {
    fn subscribe(&self) -> StorageSubscription;
}

/// Receiving end of a notifier, filtered to changes made elsewhere.
pub struct StorageSubscription {
    rx: broadcast::Receiver<StorageEnvelope>,
    context: Option<u64>,
}

impl StorageSubscription {
    pub fn new(rx: broadcast::Receiver<StorageEnvelope>, context: Option<u64>) -> Self {
        Self { rx, context }
    }

    /// Wait for the next external change. `None` once the notifier is gone.
    pub async fn next(&mut self) -> Option<StorageEvent> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) => {
                    if self.context.is_some() && envelope.origin == self.context {
                        continue;
                    }
                    return Some(envelope.event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Storage subscriber lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Detects changes by polling a store for one key.
///
/// File and keychain storage have no native change feed, so another process
/// rewriting the session is only noticed by comparing snapshots.
pub struct PollingNotifier {
    sender: broadcast::Sender<StorageEnvelope>,
    task: JoinHandle<()>,
}

impl PollingNotifier {
    /// Start polling `key` every `period`. Must be called inside a Tokio runtime.
    pub fn spawn(store: Arc<dyn TokenStore>, key: impl Into<String>, period: Duration) -> Self {
        let key = key.into();
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        // Snapshot before spawning so writes made right after `spawn` are seen
        let mut last = match store.get(&key) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, key = %key, "Initial storage poll failed");
                None
            }
        };

        let tx = sender.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let current = match store.get(&key) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(error = %e, key = %key, "Storage poll failed");
                        continue;
                    }
                };
                if current != last {
                    debug!(key = %key, removed = current.is_none(), "Storage change detected");
                    last = current.clone();
                    // No subscribers is fine
                    let _ = tx.send(StorageEnvelope {
                        origin: None,
                        event: StorageEvent {
                            key: key.clone(),
                            new_value: current,
                        },
                    });
                }
            }
        });

        Self { sender, task }
    }
}

impl StorageNotifier for PollingNotifier {
    fn subscribe(&self) -> StorageSubscription {
        StorageSubscription::new(self.sender.subscribe(), None)
    }
}

impl Drop for PollingNotifier {
    fn drop(&mut self) {
        self.task.abort();
    }
}
