use anyhow::{bail, Context, Result};
use keyring::Entry;

use super::TokenStore;

/// Default keychain service name.
pub const DEFAULT_SERVICE_NAME: &str = "alumni-session";

/// Keeps each key as a secret in the OS keychain.
pub struct KeychainTokenStore {
    service: String,
}

impl KeychainTokenStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service, key).context("Failed to create keyring entry")
    }
}

impl Default for KeychainTokenStore {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE_NAME)
    }
}

impl TokenStore for KeychainTokenStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve value from keychain"),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entry(key)?
            .set_password(value)
            .context("Failed to store value in keychain")?;

        // A backend without persistence accepts the write and forgets it
        match self.get(key)? {
            Some(stored) if stored == value => Ok(()),
            _ => bail!("Keychain did not retain the value for {:?}; no usable credential store", key),
        }
    }

    fn remove(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete value from keychain"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_persistent_backend_is_reported() {
        // Every mock entry is independent, so nothing written survives a re-open
        keyring::set_default_credential_builder(keyring::mock::default_credential_builder());
        let store = KeychainTokenStore::new("alumni-session-test");

        assert_eq!(store.get("auth").unwrap(), None);
        assert!(store.set("auth", "v1").is_err());
        assert!(store.remove("auth").is_ok());
    }
}
