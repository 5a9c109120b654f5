//! The `CryptoEngine` capability: the one door through which callers reach
//! key derivation and field encryption.

use secrecy::SecretString;

use trustme_core::types::{BatchCreatePasswordRequest, UpdatePasswordRequest};
use trustme_core::TrustmeResult;

use crate::envelope::{self, EncryptedField};
use crate::kdf::{self, DerivedKey, KdfParams, Salt};
use crate::record::{
    self, CredentialRecord, DecryptedRecord, PlainCredential, PlainRecord, RecordChanges,
    SealedRecord,
};

pub trait CryptoEngine: Send + Sync {
    fn derive_key(&self, master_password: &SecretString, salt: &Salt) -> TrustmeResult<DerivedKey>;

    fn encrypt_field(&self, plaintext: &str, key: &DerivedKey) -> TrustmeResult<EncryptedField>;

    fn decrypt_field(&self, field: &EncryptedField, key: &DerivedKey) -> TrustmeResult<String>;

    fn encrypt_record(&self, record: &PlainRecord, key: &DerivedKey) -> TrustmeResult<SealedRecord> {
        record::seal_with(self, record, key)
    }

    fn decrypt_record(
        &self,
        record: &CredentialRecord,
        key: &DerivedKey,
    ) -> TrustmeResult<PlainCredential> {
        record::open_with(self, record, key)
    }

    /// Decrypt a batch. Never fails as a whole; bad records come back as
    /// [`DecryptedRecord::Failed`].
    fn decrypt_records(&self, records: &[CredentialRecord], key: &DerivedKey) -> Vec<DecryptedRecord> {
        record::open_all_with(self, records, key)
    }

    fn seal_changes(
        &self,
        changes: &RecordChanges,
        key: &DerivedKey,
    ) -> TrustmeResult<UpdatePasswordRequest> {
        record::seal_changes_with(self, changes, key)
    }

    fn seal_batch(
        &self,
        records: &[PlainRecord],
        key: &DerivedKey,
    ) -> TrustmeResult<BatchCreatePasswordRequest> {
        record::seal_batch_with(self, records, key)
    }
}

/// PBKDF2-HMAC-SHA256 + AES-256-GCM, the only scheme this client speaks.
#[derive(Debug, Clone, Default)]
pub struct Pbkdf2AesGcm {
    kdf: KdfParams,
}

impl Pbkdf2AesGcm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the KDF parameters. Production code keeps the default; the
    /// iteration count is fixed by the backend.
    pub fn with_params(kdf: KdfParams) -> Self {
        Self { kdf }
    }

    pub fn params(&self) -> &KdfParams {
        &self.kdf
    }
}

impl CryptoEngine for Pbkdf2AesGcm {
    fn derive_key(&self, master_password: &SecretString, salt: &Salt) -> TrustmeResult<DerivedKey> {
        kdf::derive_key(master_password, salt, &self.kdf)
    }

    fn encrypt_field(&self, plaintext: &str, key: &DerivedKey) -> TrustmeResult<EncryptedField> {
        envelope::encrypt_field(plaintext, key)
    }

    fn decrypt_field(&self, field: &EncryptedField, key: &DerivedKey) -> TrustmeResult<String> {
        envelope::decrypt_field(field, key)
    }
}
