//! trustme-crypto: client-side envelope encryption for TrustMe credentials
//!
//! Scheme: PBKDF2-HMAC-SHA256 → AES-256-GCM, one envelope per field.
//!
//! Pipeline: master password + server salt → derived key (memory only)
//! → per-field encrypt with a fresh 96-bit IV → `{ciphertext, iv, tag}` Base64 triple.
//!
//! ```text
//! Derived Key (256-bit, PBKDF2-HMAC-SHA256, 250 000 iterations, 16-byte salt)
//!   └── Field AEAD: AES-256-GCM (key=derived, iv=random_96bit, no AAD)
//!       ├── username  → encrypted_username / username_iv / username_tag
//!       ├── password  → encrypted_password / password_iv / password_tag
//!       └── notes     → encrypted_notes / notes_iv / notes_tag  (all empty = no notes)
//! ```
//!
//! The website URL stays in plaintext so the backend and the browser extension
//! can match records to domains.

pub mod domain;
pub mod encoding;
pub mod engine;
pub mod envelope;
pub mod generator;
pub mod kdf;
pub mod record;

pub use domain::{filter_for_domain, matches_domain};
pub use engine::{CryptoEngine, Pbkdf2AesGcm};
pub use envelope::{decrypt_field, encrypt_field, EncryptedField};
pub use generator::generate_password;
pub use kdf::{derive_key, derive_key_b64, DerivedKey, KdfParams, Salt};
pub use record::{
    decrypt_record, decrypt_records, encrypt_record, CredentialRecord, DecryptedRecord,
    FailedRecord, FailureReason, PlainCredential, PlainRecord, RecordChanges, SealedRecord,
    DECRYPTION_FAILED_MARKER,
};

/// Size of a derived key in bytes (AES-256)
pub const KEY_SIZE: usize = 32;

/// Size of a PBKDF2 salt in bytes
pub const SALT_SIZE: usize = 16;

/// Size of an AES-GCM IV (96-bit)
pub const IV_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// PBKDF2 iteration count shared with the backend. Changing it orphans every
/// record already stored.
pub const PBKDF2_ITERATIONS: u32 = 250_000;
