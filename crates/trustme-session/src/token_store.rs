//! Session-token persistence.
//!
//! Only the backend session token may outlive the process. The derived key
//! has no store and no serialized form.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use trustme_core::config::{SessionConfig, TokenStoreKind};
use trustme_core::{TrustmeError, TrustmeResult};

use crate::keychain::KeychainTokenStore;

/// Opaque bearer token issued by the backend at login.
pub struct SessionToken(SecretString);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }

    /// Raw token, for the `Authorization` header only.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken([REDACTED])")
    }
}

/// What survives a restart: who was signed in, and their token.
#[derive(Debug)]
pub struct PersistedSession {
    pub username: String,
    pub token: SessionToken,
}

pub trait TokenStore: Send + Sync {
    fn load(&self) -> TrustmeResult<Option<PersistedSession>>;

    fn save(&self, username: &str, token: &SessionToken) -> TrustmeResult<()>;

    /// Remove the persisted token. Clearing an empty store succeeds.
    fn clear(&self) -> TrustmeResult<()>;
}

#[derive(Serialize)]
struct SessionDocRef<'a> {
    username: &'a str,
    token: &'a str,
}

#[derive(Deserialize, Zeroize, ZeroizeOnDrop)]
struct SessionDoc {
    username: String,
    token: String,
}

/// JSON form shared by the file and keychain stores.
pub(crate) fn encode_session(username: &str, token: &SessionToken) -> TrustmeResult<String> {
    serde_json::to_string(&SessionDocRef {
        username,
        token: token.expose(),
    })
    .map_err(|e| TrustmeError::TokenStore(format!("encode session: {e}")))
}

pub(crate) fn decode_session(raw: &str) -> TrustmeResult<PersistedSession> {
    let mut doc: SessionDoc = serde_json::from_str(raw)
        .map_err(|e| TrustmeError::TokenStore(format!("decode session: {e}")))?;
    if doc.token.is_empty() {
        return Err(TrustmeError::TokenStore("persisted session has an empty token".into()));
    }
    Ok(PersistedSession {
        username: std::mem::take(&mut doc.username),
        token: SessionToken::new(std::mem::take(&mut doc.token)),
    })
}

/// Process-lifetime store. Nothing reaches disk, so a restart signs out.
#[derive(Default)]
pub struct MemoryTokenStore {
    slot: Mutex<Option<(String, SecretString)>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> TrustmeResult<Option<PersistedSession>> {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(slot.as_ref().map(|(username, token)| PersistedSession {
            username: username.clone(),
            token: SessionToken::new(token.expose_secret()),
        }))
    }

    fn save(&self, username: &str, token: &SessionToken) -> TrustmeResult<()> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some((username.to_string(), SecretString::from(token.expose())));
        Ok(())
    }

    fn clear(&self) -> TrustmeResult<()> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        Ok(())
    }
}

/// Token persisted as a small JSON document, readable by the owner only.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn err(&self, op: &str, e: impl std::fmt::Display) -> TrustmeError {
        TrustmeError::TokenStore(format!("{op} {}: {e}", self.path.display()))
    }

    fn write_owner_only(&self, contents: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&self.path)?;
            // mode() only applies on creation
            file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
            file.write_all(contents)?;
            file.sync_all()
        }

        #[cfg(not(unix))]
        {
            let mut file = std::fs::File::create(&self.path)?;
            file.write_all(contents)?;
            file.sync_all()
        }
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> TrustmeResult<Option<PersistedSession>> {
        match std::fs::read_to_string(&self.path) {
            Ok(mut raw) => {
                let session = decode_session(&raw);
                raw.zeroize();
                session.map(Some)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.err("read", e)),
        }
    }

    fn save(&self, username: &str, token: &SessionToken) -> TrustmeResult<()> {
        let mut json = encode_session(username, token)?;
        let written = self.write_owner_only(json.as_bytes());
        json.zeroize();
        written.map_err(|e| self.err("write", e))?;
        tracing::debug!(path = %self.path.display(), "session token persisted");
        Ok(())
    }

    fn clear(&self) -> TrustmeResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "session token file removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.err("remove", e)),
        }
    }
}

/// Build the store selected by `[session] token_store`.
pub fn token_store_from_config(config: &SessionConfig) -> TrustmeResult<Arc<dyn TokenStore>> {
    let store: Arc<dyn TokenStore> = match config.token_store {
        TokenStoreKind::Memory => Arc::new(MemoryTokenStore::new()),
        TokenStoreKind::File => {
            let path = config.token_file.as_ref().ok_or_else(|| {
                TrustmeError::Config("session.token_file is required for the file token store".into())
            })?;
            Arc::new(FileTokenStore::new(path))
        }
        TokenStoreKind::Keychain => Arc::new(KeychainTokenStore::new()?),
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_token_debug_redacted() {
        let token = SessionToken::new("eyJhbGciOi.secret");
        let debug = format!("{token:?}");
        assert!(!debug.contains("secret"));
        assert_eq!(token.expose(), "eyJhbGciOi.secret");
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryTokenStore::new();
        assert!(store.load().unwrap().is_none());

        store.save("alice", &SessionToken::new("tok-1")).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.username, "alice");
        assert_eq!(loaded.token.expose(), "tok-1");

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        store.clear().unwrap();
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("nested").join("session.json"));
        assert!(store.load().unwrap().is_none());

        store.save("alice", &SessionToken::new("tok-1")).unwrap();
        store.save("alice", &SessionToken::new("tok-2")).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.username, "alice");
        assert_eq!(loaded.token.expose(), "tok-2");

        store.clear().unwrap();
        assert!(!store.path().exists());
        store.clear().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{}").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        FileTokenStore::new(&path)
            .save("alice", &SessionToken::new("tok"))
            .unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_file_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            FileTokenStore::new(&path).load(),
            Err(TrustmeError::TokenStore(_))
        ));

        std::fs::write(&path, r#"{"username":"alice","token":""}"#).unwrap();
        assert!(FileTokenStore::new(&path).load().is_err());
    }

    #[test]
    fn test_store_from_config() {
        let config = SessionConfig {
            token_store: TokenStoreKind::File,
            token_file: None,
            ..Default::default()
        };
        assert!(matches!(
            token_store_from_config(&config),
            Err(TrustmeError::Config(_))
        ));

        let store = token_store_from_config(&SessionConfig::default()).unwrap();
        assert!(store.load().unwrap().is_none());
    }
}
