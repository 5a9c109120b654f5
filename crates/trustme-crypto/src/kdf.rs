//! Key derivation: master password + server salt → AES-256 key via PBKDF2-HMAC-SHA256

use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use zeroize::Zeroize;

use trustme_core::{TrustmeError, TrustmeResult};

use crate::{encoding, KEY_SIZE, PBKDF2_ITERATIONS, SALT_SIZE};

/// A 256-bit key derived from the master password.
///
/// Lives only in memory: no `Clone`, no `Serialize`, zeroized on drop.
/// Share it as `Arc<DerivedKey>`.
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A per-account PBKDF2 salt, issued by the backend at registration.
///
/// Public but stable: regenerating it for an existing account makes every
/// stored record undecryptable.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self(bytes)
    }

    /// Decode the wire form. Anything but exactly 16 bytes is rejected.
    pub fn from_base64(s: &str) -> TrustmeResult<Self> {
        encoding::decode_array::<SALT_SIZE>(s, "salt").map(Self)
    }

    /// A fresh random salt, for registering a NEW account only.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn to_base64(&self) -> String {
        encoding::encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for Salt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Salt").field(&self.to_base64()).finish()
    }
}

/// PBKDF2 parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// HMAC-SHA256 iterations (default: 250 000, must match the backend)
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: PBKDF2_ITERATIONS,
        }
    }
}

/// Derive the 256-bit field key from the master password and the account salt.
///
/// Deterministic and side-effect free. This is the expensive call: run it on
/// login or unlock, never per render.
pub fn derive_key(
    master_password: &SecretString,
    salt: &Salt,
    params: &KdfParams,
) -> TrustmeResult<DerivedKey> {
    let password = master_password.expose_secret();
    if password.is_empty() {
        return Err(TrustmeError::invalid_input("master password is empty"));
    }
    if params.iterations == 0 {
        return Err(TrustmeError::invalid_input("PBKDF2 iterations must be > 0"));
    }

    // written in place, so no unzeroized copy is left behind
    let mut key = DerivedKey::from_bytes([0u8; KEY_SIZE]);
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), params.iterations, &mut key.bytes);

    tracing::debug!(iterations = params.iterations, "derived field key");
    Ok(key)
}

/// [`derive_key`] taking the salt in its Base64 wire form.
pub fn derive_key_b64(
    master_password: &SecretString,
    salt_b64: &str,
    params: &KdfParams,
) -> TrustmeResult<DerivedKey> {
    let salt = Salt::from_base64(salt_b64)?;
    derive_key(master_password, &salt, params)
}
