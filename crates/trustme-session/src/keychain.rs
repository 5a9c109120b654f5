//! Platform keychain token store.
//!
//! Uses the `keyring` crate for cross-platform access:
//! - macOS: Keychain Services
//! - Linux: kernel keyutils (user keyring)
//! - Windows: Credential Manager (DPAPI)

use zeroize::Zeroize;

use trustme_core::{TrustmeError, TrustmeResult};

use crate::token_store::{decode_session, encode_session, PersistedSession, SessionToken, TokenStore};

const SERVICE_NAME: &str = "trustme";

/// Well-known keychain entry names
pub mod keys {
    /// Username + backend session token (JSON)
    pub const SESSION: &str = "session-token";
}

/// One keychain credential, opened once and reused for every load, save
/// and clear.
#[derive(Debug)]
pub struct KeychainTokenStore {
    service: String,
    entry: keyring::Entry,
}

impl KeychainTokenStore {
    pub fn new() -> TrustmeResult<Self> {
        Self::with_service(SERVICE_NAME)
    }

    /// Separate service name, e.g. one per backend deployment.
    pub fn with_service(service: impl Into<String>) -> TrustmeResult<Self> {
        let service = service.into();
        let entry = keyring::Entry::new(&service, keys::SESSION)
            .map_err(|e| TrustmeError::TokenStore(format!("keychain entry creation: {e}")))?;
        Ok(Self { service, entry })
    }
}

impl TokenStore for KeychainTokenStore {
    fn load(&self) -> TrustmeResult<Option<PersistedSession>> {
        match self.entry.get_password() {
            Ok(mut raw) => {
                let session = decode_session(&raw);
                raw.zeroize();
                session.map(Some)
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(TrustmeError::TokenStore(format!("keychain get: {e}"))),
        }
    }

    fn save(&self, username: &str, token: &SessionToken) -> TrustmeResult<()> {
        let mut json = encode_session(username, token)?;
        let stored = self.entry.set_password(&json);
        json.zeroize();
        stored.map_err(|e| TrustmeError::TokenStore(format!("keychain store: {e}")))?;
        tracing::debug!(service = %self.service, "stored session token in platform keychain");
        Ok(())
    }

    fn clear(&self) -> TrustmeResult<()> {
        match self.entry.delete_credential() {
            Ok(()) => {
                tracing::debug!(service = %self.service, "deleted session token from platform keychain");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(TrustmeError::TokenStore(format!("keychain delete: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // CI has no unlocked keychain; run against keyring's in-memory store.
    fn store() -> KeychainTokenStore {
        keyring::set_default_credential_builder(keyring::mock::default_credential_builder());
        KeychainTokenStore::with_service("trustme-test").unwrap()
    }

    #[test]
    fn test_missing_entry_loads_as_none() {
        assert!(store().load().unwrap().is_none());
    }

    #[test]
    fn test_clear_missing_entry_is_ok() {
        store().clear().unwrap();
    }

    #[test]
    fn test_save_then_load_returns_same_session() {
        let store = store();
        store.save("alice", &SessionToken::new("tok-123")).unwrap();

        let session = store.load().unwrap().expect("session persisted");
        assert_eq!(session.username, "alice");
        assert_eq!(session.token.expose(), "tok-123");
    }

    #[test]
    fn test_clear_removes_saved_session() {
        let store = store();
        store.save("alice", &SessionToken::new("tok")).unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }
}
