//! Record codec: the envelope applied across a credential record
//!
//! username, password and notes are each sealed with their own fresh IV.
//! The website URL stays plaintext. Empty notes are carried as the empty
//! triple (`""`, `""`, `""`) and decoded to `""` without touching the cipher.

use rayon::prelude::*;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use zeroize::Zeroize;

use trustme_core::types::{
    BatchCreatePasswordRequest, CreatePasswordRequest, PasswordResponse, RecordId,
    UpdatePasswordRequest,
};
use trustme_core::{TrustmeError, TrustmeResult};

use crate::engine::{CryptoEngine, Pbkdf2AesGcm};
use crate::envelope::EncryptedField;
use crate::kdf::DerivedKey;

/// Shown in place of every secret field of a record that failed to decrypt.
pub const DECRYPTION_FAILED_MARKER: &str = "[decryption failed]";

/// A new credential, before it has been sealed or stored.
#[derive(Deserialize)]
pub struct PlainRecord {
    pub website_url: String,
    pub username: String,
    pub password: SecretString,
    #[serde(default)]
    pub notes: String,
}

impl PlainRecord {
    pub fn new(
        website_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            website_url: website_url.into(),
            username: username.into(),
            password: SecretString::from(password.into()),
            notes: String::new(),
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }
}

impl Drop for PlainRecord {
    fn drop(&mut self) {
        self.username.zeroize();
        self.notes.zeroize();
    }
}

impl std::fmt::Debug for PlainRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlainRecord")
            .field("website_url", &self.website_url)
            .field("username", &"[REDACTED]")
            .field("password", &"[REDACTED]")
            .field("notes", &"[REDACTED]")
            .finish()
    }
}

/// A sealed record ready for `POST /passwords` (no id yet).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedRecord {
    pub website_url: String,
    pub username: EncryptedField,
    pub password: EncryptedField,
    /// `None` is the empty-notes sentinel
    pub notes: Option<EncryptedField>,
}

impl SealedRecord {
    /// The record as the backend stores it once it has assigned an id.
    pub fn with_id(self, id: RecordId) -> CredentialRecord {
        CredentialRecord {
            id,
            website_url: self.website_url,
            username: self.username,
            password: self.password,
            notes: self.notes,
        }
    }
}

impl From<SealedRecord> for CreatePasswordRequest {
    fn from(sealed: SealedRecord) -> Self {
        let notes = sealed.notes.unwrap_or_default();
        Self {
            website_url: sealed.website_url,
            encrypted_username: sealed.username.ciphertext,
            username_iv: sealed.username.iv,
            username_tag: sealed.username.tag,
            encrypted_password: sealed.password.ciphertext,
            password_iv: sealed.password.iv,
            password_tag: sealed.password.tag,
            encrypted_notes: notes.ciphertext,
            notes_iv: notes.iv,
            notes_tag: notes.tag,
        }
    }
}

/// A stored record as fetched from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub id: RecordId,
    pub website_url: String,
    pub username: EncryptedField,
    pub password: EncryptedField,
    /// `None` is the empty-notes sentinel
    pub notes: Option<EncryptedField>,
}

impl From<PasswordResponse> for CredentialRecord {
    fn from(resp: PasswordResponse) -> Self {
        let notes = EncryptedField {
            ciphertext: resp.encrypted_notes.unwrap_or_default(),
            iv: resp.notes_iv.unwrap_or_default(),
            tag: resp.notes_tag.unwrap_or_default(),
        };
        Self {
            id: resp.id,
            website_url: resp.website_url,
            username: EncryptedField {
                ciphertext: resp.encrypted_username,
                iv: resp.username_iv,
                tag: resp.username_tag,
            },
            password: EncryptedField {
                ciphertext: resp.encrypted_password,
                iv: resp.password_iv,
                tag: resp.password_tag,
            },
            notes: (!notes.is_empty_marker()).then_some(notes),
        }
    }
}

/// A decrypted credential, for the active view only.
pub struct PlainCredential {
    pub id: RecordId,
    pub website_url: String,
    pub username: String,
    pub password: SecretString,
    pub notes: String,
}

impl Drop for PlainCredential {
    fn drop(&mut self) {
        self.username.zeroize();
        self.notes.zeroize();
    }
}

impl std::fmt::Debug for PlainCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlainCredential")
            .field("id", &self.id)
            .field("website_url", &self.website_url)
            .field("username", &"[REDACTED]")
            .field("password", &"[REDACTED]")
            .field("notes", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Authentication failed: wrong key or corrupted data
    TamperedOrWrongKey,
    /// Bad Base64, wrong IV/tag length, or non-UTF-8 plaintext
    Malformed,
}

/// A record whose fields could not be opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedRecord {
    pub id: RecordId,
    pub website_url: String,
    pub reason: FailureReason,
}

impl FailedRecord {
    /// A renderable stand-in with every secret field set to the failure marker.
    pub fn placeholder(&self) -> PlainCredential {
        PlainCredential {
            id: self.id,
            website_url: self.website_url.clone(),
            username: DECRYPTION_FAILED_MARKER.to_string(),
            password: SecretString::from(DECRYPTION_FAILED_MARKER),
            notes: DECRYPTION_FAILED_MARKER.to_string(),
        }
    }
}

/// Per-record outcome of a batch decrypt.
#[derive(Debug)]
pub enum DecryptedRecord {
    Plain(PlainCredential),
    Failed(FailedRecord),
}

impl DecryptedRecord {
    pub fn id(&self) -> RecordId {
        match self {
            Self::Plain(p) => p.id,
            Self::Failed(f) => f.id,
        }
    }

    pub fn website_url(&self) -> &str {
        match self {
            Self::Plain(p) => &p.website_url,
            Self::Failed(f) => &f.website_url,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn as_plain(&self) -> Option<&PlainCredential> {
        match self {
            Self::Plain(p) => Some(p),
            Self::Failed(_) => None,
        }
    }

    /// The credential to render: the plaintext, or the failure placeholder.
    pub fn into_view(self) -> PlainCredential {
        match self {
            Self::Plain(p) => p,
            Self::Failed(f) => f.placeholder(),
        }
    }
}

/// Edits to an existing record. `None` leaves a field untouched;
/// `notes: Some("")` clears the notes.
#[derive(Default)]
pub struct RecordChanges {
    pub website_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub notes: Option<String>,
}

impl RecordChanges {
    pub fn is_empty(&self) -> bool {
        self.website_url.is_none()
            && self.username.is_none()
            && self.password.is_none()
            && self.notes.is_none()
    }
}

/// Seal a new record with the default engine.
pub fn encrypt_record(record: &PlainRecord, key: &DerivedKey) -> TrustmeResult<SealedRecord> {
    seal_with(&Pbkdf2AesGcm::default(), record, key)
}

/// Open one record with the default engine. Fails on the first bad field.
pub fn decrypt_record(record: &CredentialRecord, key: &DerivedKey) -> TrustmeResult<PlainCredential> {
    open_with(&Pbkdf2AesGcm::default(), record, key)
}

/// Open a batch with the default engine. Output order matches input order.
pub fn decrypt_records(records: &[CredentialRecord], key: &DerivedKey) -> Vec<DecryptedRecord> {
    open_all_with(&Pbkdf2AesGcm::default(), records, key)
}

pub(crate) fn seal_with<E: CryptoEngine + ?Sized>(
    engine: &E,
    record: &PlainRecord,
    key: &DerivedKey,
) -> TrustmeResult<SealedRecord> {
    Ok(SealedRecord {
        website_url: record.website_url.clone(),
        username: engine.encrypt_field(&record.username, key)?,
        password: engine.encrypt_field(record.password.expose_secret(), key)?,
        notes: seal_optional(engine, &record.notes, key)?,
    })
}

pub(crate) fn open_with<E: CryptoEngine + ?Sized>(
    engine: &E,
    record: &CredentialRecord,
    key: &DerivedKey,
) -> TrustmeResult<PlainCredential> {
    let username = engine.decrypt_field(&record.username, key)?;
    let password = SecretString::from(engine.decrypt_field(&record.password, key)?);
    let notes = match &record.notes {
        Some(field) if !field.is_empty_marker() => engine.decrypt_field(field, key)?,
        _ => String::new(),
    };
    Ok(PlainCredential {
        id: record.id,
        website_url: record.website_url.clone(),
        username,
        password,
        notes,
    })
}

pub(crate) fn open_all_with<E: CryptoEngine + ?Sized>(
    engine: &E,
    records: &[CredentialRecord],
    key: &DerivedKey,
) -> Vec<DecryptedRecord> {
    let opened: Vec<DecryptedRecord> = records
        .par_iter()
        .map(|record| match open_with(engine, record, key) {
            Ok(plain) => DecryptedRecord::Plain(plain),
            Err(e) => {
                let reason = match e {
                    TrustmeError::TamperedOrWrongKey => FailureReason::TamperedOrWrongKey,
                    _ => FailureReason::Malformed,
                };
                tracing::warn!(record_id = record.id, ?reason, "record failed to decrypt");
                DecryptedRecord::Failed(FailedRecord {
                    id: record.id,
                    website_url: record.website_url.clone(),
                    reason,
                })
            }
        })
        .collect();

    let failed = opened.iter().filter(|r| r.is_failed()).count();
    tracing::debug!(total = opened.len(), failed, "decrypted record batch");
    opened
}

pub(crate) fn seal_changes_with<E: CryptoEngine + ?Sized>(
    engine: &E,
    changes: &RecordChanges,
    key: &DerivedKey,
) -> TrustmeResult<UpdatePasswordRequest> {
    if changes.is_empty() {
        return Err(TrustmeError::invalid_input("record update has no changes"));
    }

    let mut req = UpdatePasswordRequest {
        website_url: changes.website_url.clone(),
        ..Default::default()
    };
    if let Some(username) = &changes.username {
        let field = engine.encrypt_field(username, key)?;
        req.encrypted_username = Some(field.ciphertext);
        req.username_iv = Some(field.iv);
        req.username_tag = Some(field.tag);
    }
    if let Some(password) = &changes.password {
        let field = engine.encrypt_field(password.expose_secret(), key)?;
        req.encrypted_password = Some(field.ciphertext);
        req.password_iv = Some(field.iv);
        req.password_tag = Some(field.tag);
    }
    if let Some(notes) = &changes.notes {
        let field = seal_optional(engine, notes, key)?.unwrap_or_default();
        req.encrypted_notes = Some(field.ciphertext);
        req.notes_iv = Some(field.iv);
        req.notes_tag = Some(field.tag);
    }
    Ok(req)
}

pub(crate) fn seal_batch_with<E: CryptoEngine + ?Sized>(
    engine: &E,
    records: &[PlainRecord],
    key: &DerivedKey,
) -> TrustmeResult<BatchCreatePasswordRequest> {
    if records.is_empty() {
        return Err(TrustmeError::invalid_input("batch create needs at least one record"));
    }
    let passwords = records
        .iter()
        .map(|record| seal_with(engine, record, key).map(CreatePasswordRequest::from))
        .collect::<TrustmeResult<Vec<_>>>()?;
    Ok(BatchCreatePasswordRequest { passwords })
}

/// Empty optional values become the sentinel instead of an encrypted `""`.
fn seal_optional<E: CryptoEngine + ?Sized>(
    engine: &E,
    value: &str,
    key: &DerivedKey,
) -> TrustmeResult<Option<EncryptedField>> {
    if value.is_empty() {
        Ok(None)
    } else {
        engine.encrypt_field(value, key).map(Some)
    }
}
