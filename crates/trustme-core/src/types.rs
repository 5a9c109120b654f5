//! Collaborator REST shapes.
//!
//! Every encrypted field travels as three sibling Base64 strings:
//! `encrypted_X`, `X_iv`, `X_tag`. Notes are optional; an absent or empty
//! notes triple means "no notes".

use serde::{Deserialize, Serialize};

/// Backend-assigned record identifier
pub type RecordId = u64;

/// A stored credential record as returned by `GET /passwords`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordResponse {
    pub id: RecordId,
    #[serde(default)]
    pub user_id: u64,
    pub website_url: String,
    pub encrypted_username: String,
    pub username_iv: String,
    pub username_tag: String,
    pub encrypted_password: String,
    pub password_iv: String,
    pub password_tag: String,
    #[serde(default)]
    pub encrypted_notes: Option<String>,
    #[serde(default)]
    pub notes_iv: Option<String>,
    #[serde(default)]
    pub notes_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Body of `POST /passwords`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePasswordRequest {
    pub website_url: String,
    pub encrypted_username: String,
    pub username_iv: String,
    pub username_tag: String,
    pub encrypted_password: String,
    pub password_iv: String,
    pub password_tag: String,
    #[serde(default)]
    pub encrypted_notes: String,
    #[serde(default)]
    pub notes_iv: String,
    #[serde(default)]
    pub notes_tag: String,
}

/// Body of `POST /passwords/batch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCreatePasswordRequest {
    pub passwords: Vec<CreatePasswordRequest>,
}

/// Body of `PUT /passwords/{id}`. Only present fields are changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePasswordRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_iv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_iv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes_iv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes_tag: Option<String>,
}

/// Response of `POST /auth/login`.
///
/// Two backend generations exist; the aliases accept either spelling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    /// Empty while a two-factor check is still pending
    #[serde(default, alias = "access_token")]
    pub token: String,
    #[serde(default)]
    pub user_id: u64,
    #[serde(default)]
    pub username: String,
    #[serde(default, alias = "two_factor_enabled")]
    pub two_fa_enabled: bool,
    /// Base64 PBKDF2 salt issued at registration
    pub salt: String,
}

/// Response of `POST /auth/2fa/verify` after a successful TOTP check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwoFaLoginResponse {
    pub token: String,
    pub salt: String,
}
