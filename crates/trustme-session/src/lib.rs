//! trustme-session: lifecycle of the derived key for one signed-in user
//!
//! The key lives only in memory, in a single slot owned by
//! [`SessionKeyManager`]. Only the backend session token may be persisted,
//! through a [`TokenStore`]:
//! - [`MemoryTokenStore`]: nothing survives a restart
//! - [`FileTokenStore`]: owner-only JSON file
//! - [`KeychainTokenStore`]: platform keychain

pub mod credentials;
pub mod keychain;
pub mod manager;
pub mod token_store;

pub use credentials::{MasterCredential, SessionGrant};
pub use keychain::KeychainTokenStore;
pub use manager::{SessionKeyManager, SessionState};
pub use token_store::{
    token_store_from_config, FileTokenStore, MemoryTokenStore, PersistedSession, SessionToken,
    TokenStore,
};
pub use tokio_util::sync::CancellationToken;
