use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{TrustmeError, TrustmeResult};

/// Top-level client configuration (loaded from trustme.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustmeConfig {
    pub client: ClientConfig,
    pub session: SessionConfig,
    pub crypto: CryptoConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Collaborator REST API base URL (consumed by the network layer)
    pub api_base_url: String,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

/// Where the session token survives a restart. The derived key never does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStoreKind {
    /// Nothing persists; every restart signs out
    #[default]
    Memory,
    /// JSON file with owner-only permissions
    File,
    /// Platform keychain (Keychain / Secret Service / Credential Manager)
    Keychain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Drop the key after this many idle seconds (0 = never)
    pub idle_timeout_secs: u64,
    /// Session token persistence backend
    pub token_store: TokenStoreKind,
    /// Token file path for `token_store = "file"`
    pub token_file: Option<PathBuf>,
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

/// Client-side crypto tuning. The PBKDF2 iteration count is a contract with
/// the backend and intentionally has no knob here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Worker threads for batch decryption (0 = one per CPU)
    pub decrypt_concurrency: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3030/api/v1".into(),
            log_level: "info".into(),
            log_format: "text".into(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 900,
            token_store: TokenStoreKind::Memory,
            token_file: None,
        }
    }
}

impl TrustmeConfig {
    /// Load from a TOML file, falling back to defaults if it does not exist.
    pub fn load(path: &Path) -> TrustmeResult<Self> {
        if !path.exists() {
            tracing::warn!(
                "config file not found: {}  (using defaults)",
                path.display()
            );
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
            .map_err(|e| TrustmeError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml(content: &str) -> TrustmeResult<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| TrustmeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TrustmeResult<()> {
        if self.session.token_store == TokenStoreKind::File && self.session.token_file.is_none() {
            return Err(TrustmeError::Config(
                "session.token_store = \"file\" requires session.token_file".into(),
            ));
        }
        match self.client.log_format.as_str() {
            "json" | "text" => Ok(()),
            other => Err(TrustmeError::Config(format!(
                "client.log_format must be \"json\" or \"text\", got {other:?}"
            ))),
        }
    }
}
