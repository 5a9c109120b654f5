use thiserror::Error;

pub type TrustmeResult<T> = Result<T, TrustmeError>;

#[derive(Debug, Error)]
pub enum TrustmeError {
    /// Malformed salt, empty password, bad Base64, wrong-length IV or tag.
    /// A programming or data-integrity bug, not a user-facing condition.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// GCM tag verification failed. Deliberately carries no detail: a wrong
    /// master password and corrupted data are indistinguishable here.
    #[error("please re-enter your master password (data may be corrupted)")]
    TamperedOrWrongKey,

    /// An operation needed the derived key while none is held.
    #[error("encryption key unavailable: master password required")]
    KeyUnavailable,

    #[error("operation cancelled")]
    Cancelled,

    #[error("session token store error: {0}")]
    TokenStore(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TrustmeError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether the caller should route the user back to master-password entry.
    pub fn requires_reauth(&self) -> bool {
        matches!(self, Self::TamperedOrWrongKey | Self::KeyUnavailable)
    }
}
