//! API key storage.
//!
//! The OpenAI key lives in the OS keychain, never in the settings
//! file. The store is behind a trait so tests and headless hosts can
//! substitute an in-memory implementation.

use log::{debug, error};

const SERVICE_NAME: &str = "dev.taptype.app";
pub const OPENAI_API_KEY: &str = "openai_api_key";

/// Secret storage keyed by account name. Absence is `Ok(None)`, not an
/// error.
pub trait CredentialStore: Send + Sync {
    fn load(&self, account: &str) -> Result<Option<String>, String>;
    fn save(&self, account: &str, secret: &str) -> Result<(), String>;
    fn delete(&self, account: &str) -> Result<(), String>;
}

/// Masked preview of a stored secret for display: bullets plus the
/// last four characters.
pub fn secret_hint(store: &dyn CredentialStore, account: &str) -> Result<Option<String>, String> {
    let Some(secret) = store.load(account)? else {
        return Ok(None);
    };
    let chars: Vec<char> = secret.chars().collect();
    let last4: String = if chars.len() >= 4 {
        chars[chars.len() - 4..].iter().collect()
    } else {
        secret
    };
    Ok(Some(format!("\u{2022}\u{2022}\u{2022}\u{2022}\u{2022}\u{2022}\u{2022}\u{2022}{last4}")))
}

/// [`CredentialStore`] backed by the platform keychain.
pub struct KeychainStore;

impl KeychainStore {
    fn entry_for(account: &str) -> Result<keyring::Entry, String> {
        keyring::Entry::new(SERVICE_NAME, account).map_err(|e| {
            error!("Failed to create keyring entry for '{account}': {e}");
            e.to_string()
        })
    }
}

impl CredentialStore for KeychainStore {
    fn load(&self, account: &str) -> Result<Option<String>, String> {
        let entry = Self::entry_for(account)?;
        match entry.get_password() {
            Ok(secret) if secret.is_empty() => Ok(None),
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => {
                debug!("No keychain entry found for '{account}'");
                Ok(None)
            }
            Err(e) => {
                error!("Failed to read '{account}' from keychain: {e}");
                Err(e.to_string())
            }
        }
    }

    fn save(&self, account: &str, secret: &str) -> Result<(), String> {
        let entry = Self::entry_for(account)?;
        entry.set_password(secret).map_err(|e| {
            error!("Failed to store '{account}' in keychain: {e}");
            e.to_string()
        })
    }

    fn delete(&self, account: &str) -> Result<(), String> {
        let entry = Self::entry_for(account)?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => {
                error!("Failed to delete '{account}' from keychain: {e}");
                Err(e.to_string())
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory store for tests.
    #[derive(Default)]
    pub struct MemoryStore {
        secrets: Mutex<HashMap<String, String>>,
    }

    impl CredentialStore for MemoryStore {
        fn load(&self, account: &str) -> Result<Option<String>, String> {
            Ok(self.secrets.lock().unwrap().get(account).cloned())
        }

        fn save(&self, account: &str, secret: &str) -> Result<(), String> {
            self.secrets
                .lock()
                .unwrap()
                .insert(account.to_string(), secret.to_string());
            Ok(())
        }

        fn delete(&self, account: &str) -> Result<(), String> {
            self.secrets.lock().unwrap().remove(account);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MemoryStore;
    use super::*;

    #[test]
    fn missing_secret_is_none() {
        let store = MemoryStore::default();
        assert_eq!(store.load(OPENAI_API_KEY).unwrap(), None);
        assert_eq!(secret_hint(&store, OPENAI_API_KEY).unwrap(), None);
    }

    #[test]
    fn hint_masks_all_but_the_tail() {
        let store = MemoryStore::default();
        store.save(OPENAI_API_KEY, "sk-test-12345678").unwrap();
        let hint = secret_hint(&store, OPENAI_API_KEY).unwrap().unwrap();
        assert!(hint.ends_with("5678"));
        assert!(!hint.contains("sk-test"));
    }

    #[test]
    fn delete_then_load_is_none() {
        let store = MemoryStore::default();
        store.save(OPENAI_API_KEY, "sk-abc").unwrap();
        store.delete(OPENAI_API_KEY).unwrap();
        assert_eq!(store.load(OPENAI_API_KEY).unwrap(), None);
    }
}
