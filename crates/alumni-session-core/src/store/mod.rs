//! Persisted key-value storage for the session bundle.
//!
//! This module provides:
//! - `TokenStore`: the get/set/remove contract the session manager relies on
//! - `FileTokenStore`: one JSON file per key in the cache directory
//! - `KeychainTokenStore`: values kept in the OS keychain
//! - `MemoryTokenStore`: shared in-process storage with per-context handles
//! - `events`: change notification for values written by someone else
//!
//! The manager keeps its whole session under a single key (`"auth"` by
//! default) as a JSON document.

pub mod events;
pub mod file;
pub mod keychain;
pub mod memory;

use anyhow::Result;

pub use events::{PollingNotifier, StorageEnvelope, StorageEvent, StorageNotifier, StorageSubscription};
pub use file::FileTokenStore;
pub use keychain::KeychainTokenStore;
pub use memory::MemoryTokenStore;

/// Default storage key for the session bundle.
pub const AUTH_KEY: &str = "auth";

/// Origin-scoped string storage.
pub trait TokenStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removing a key that is not present is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}
