//! Inputs to a session transition.

use secrecy::SecretString;

use trustme_core::types::{LoginResponse, TwoFaLoginResponse};
use trustme_core::{TrustmeError, TrustmeResult};
use trustme_crypto::Salt;

use crate::token_store::SessionToken;

/// Username and master password, consumed by `login`.
pub struct MasterCredential {
    pub username: String,
    pub master_password: SecretString,
}

impl MasterCredential {
    pub fn new(username: impl Into<String>, master_password: SecretString) -> Self {
        Self {
            username: username.into(),
            master_password,
        }
    }
}

impl std::fmt::Debug for MasterCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterCredential")
            .field("username", &self.username)
            .field("master_password", &"[REDACTED]")
            .finish()
    }
}

/// What the backend hands back after authenticating: a session token and
/// the account's PBKDF2 salt.
#[derive(Debug)]
pub struct SessionGrant {
    pub token: SessionToken,
    pub salt: Salt,
}

impl SessionGrant {
    pub fn new(token: SessionToken, salt: Salt) -> Self {
        Self { token, salt }
    }

    fn from_wire(token: String, salt: &str) -> TrustmeResult<Self> {
        let salt = Salt::from_base64(salt)?;
        Ok(Self::new(SessionToken::new(token), salt))
    }
}

impl TryFrom<LoginResponse> for SessionGrant {
    type Error = TrustmeError;

    fn try_from(resp: LoginResponse) -> TrustmeResult<Self> {
        if resp.token.is_empty() {
            return Err(TrustmeError::invalid_input(if resp.two_fa_enabled {
                "login response has no token: complete two-factor verification first"
            } else {
                "login response has no token"
            }));
        }
        Self::from_wire(resp.token, &resp.salt)
    }
}

impl TryFrom<TwoFaLoginResponse> for SessionGrant {
    type Error = TrustmeError;

    fn try_from(resp: TwoFaLoginResponse) -> TrustmeResult<Self> {
        if resp.token.is_empty() {
            return Err(TrustmeError::invalid_input("2FA response has no token"));
        }
        Self::from_wire(resp.token, &resp.salt)
    }
}
