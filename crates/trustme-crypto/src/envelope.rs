//! Per-field AES-256-GCM encryption/decryption
//!
//! Wire format (three sibling Base64 strings, never concatenated):
//! ```text
//! ciphertext: N bytes   (same length as the UTF-8 plaintext, GCM has no padding)
//! iv:         12 bytes  (fresh from the OS CSPRNG on every call)
//! tag:        16 bytes  (GCM authentication tag)
//! ```
//!
//! No AAD is bound: the backend stores fields independently and the web
//! client never did, so adding one would break every existing record.

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce, Tag};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use trustme_core::{TrustmeError, TrustmeResult};

use crate::kdf::DerivedKey;
use crate::{encoding, IV_SIZE, TAG_SIZE};

/// One encrypted field as it crosses the collaborator boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedField {
    pub ciphertext: String,
    pub iv: String,
    pub tag: String,
}

impl EncryptedField {
    /// The "no value" sentinel: all three parts empty. Only meaningful for
    /// optional fields; never produced by [`encrypt_field`].
    pub fn empty_marker() -> Self {
        Self::default()
    }

    pub fn is_empty_marker(&self) -> bool {
        self.ciphertext.is_empty() && self.iv.is_empty() && self.tag.is_empty()
    }
}

/// Encrypt one field with AES-256-GCM under a fresh random IV.
pub fn encrypt_field(plaintext: &str, key: &DerivedKey) -> TrustmeResult<EncryptedField> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);

    let mut buffer = plaintext.as_bytes().to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&iv), b"", &mut buffer)
        .map_err(|e| {
            buffer.zeroize();
            TrustmeError::Other(anyhow::anyhow!("field encryption failed: {e}"))
        })?;

    Ok(EncryptedField {
        ciphertext: encoding::encode(&buffer),
        iv: encoding::encode(&iv),
        tag: encoding::encode(tag.as_slice()),
    })
}

/// Decrypt and authenticate one field.
///
/// Malformed encodings or lengths fail with `InvalidInput`. Any authentication
/// failure is `TamperedOrWrongKey`, whatever the cause.
pub fn decrypt_field(field: &EncryptedField, key: &DerivedKey) -> TrustmeResult<String> {
    let iv = encoding::decode_array::<IV_SIZE>(&field.iv, "iv")?;
    let tag = encoding::decode_array::<TAG_SIZE>(&field.tag, "tag")?;
    let mut buffer = encoding::decode(&field.ciphertext, "ciphertext")?;

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    if cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(&iv),
            b"",
            &mut buffer,
            Tag::from_slice(&tag),
        )
        .is_err()
    {
        buffer.zeroize();
        return Err(TrustmeError::TamperedOrWrongKey);
    }

    String::from_utf8(buffer).map_err(|e| {
        let mut bytes = e.into_bytes();
        bytes.zeroize();
        TrustmeError::invalid_input("decrypted field is not valid UTF-8")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KEY_SIZE;

    fn test_key() -> DerivedKey {
        DerivedKey::from_bytes([42u8; KEY_SIZE])
    }

    /// Flip one bit of the decoded value and re-encode it.
    fn flip_bit(b64: &str, byte: usize, bit: u8) -> String {
        let mut bytes = encoding::decode(b64, "test").unwrap();
        bytes[byte] ^= 1 << bit;
        encoding::encode(&bytes)
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = test_key();
        let field = encrypt_field("alice@example.com", &key).unwrap();
        assert_eq!(decrypt_field(&field, &key).unwrap(), "alice@example.com");
    }

    #[test]
    fn test_encrypt_decrypt_empty() {
        let key = test_key();
        let field = encrypt_field("", &key).unwrap();

        assert!(field.ciphertext.is_empty());
        assert!(!field.is_empty_marker(), "an encrypted empty string still has iv and tag");
        assert_eq!(decrypt_field(&field, &key).unwrap(), "");
    }

    #[test]
    fn test_encrypt_decrypt_unicode_and_long() {
        let key = test_key();
        let long = "x".repeat(100_000);
        for plaintext in ["pässwörd ✓ 密码 🔐", long.as_str()] {
            let field = encrypt_field(plaintext, &key).unwrap();
            assert_eq!(decrypt_field(&field, &key).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_wire_sizes() {
        let key = test_key();
        let field = encrypt_field("0123456789", &key).unwrap();

        assert_eq!(encoding::decode(&field.ciphertext, "ct").unwrap().len(), 10);
        assert_eq!(encoding::decode(&field.iv, "iv").unwrap().len(), IV_SIZE);
        assert_eq!(encoding::decode(&field.tag, "tag").unwrap().len(), TAG_SIZE);
    }

    #[test]
    fn test_fresh_iv_per_call() {
        let key = test_key();
        let a = encrypt_field("same plaintext", &key).unwrap();
        let b = encrypt_field("same plaintext", &key).unwrap();

        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
        assert_ne!(a.tag, b.tag);
    }

    #[test]
    fn test_decrypt_wrong_key() {
        let field = encrypt_field("secret data", &DerivedKey::from_bytes([1u8; KEY_SIZE])).unwrap();
        let result = decrypt_field(&field, &DerivedKey::from_bytes([2u8; KEY_SIZE]));
        assert!(matches!(result, Err(TrustmeError::TamperedOrWrongKey)));
    }

    #[test]
    fn test_tampered_ciphertext() {
        let key = test_key();
        let mut field = encrypt_field("secret data", &key).unwrap();
        field.ciphertext = flip_bit(&field.ciphertext, 3, 0);

        assert!(matches!(
            decrypt_field(&field, &key),
            Err(TrustmeError::TamperedOrWrongKey)
        ));
    }

    #[test]
    fn test_tampered_iv() {
        let key = test_key();
        let mut field = encrypt_field("secret data", &key).unwrap();
        field.iv = flip_bit(&field.iv, 11, 7);

        assert!(matches!(
            decrypt_field(&field, &key),
            Err(TrustmeError::TamperedOrWrongKey)
        ));
    }

    #[test]
    fn test_tampered_tag() {
        let key = test_key();
        let mut field = encrypt_field("secret data", &key).unwrap();
        field.tag = flip_bit(&field.tag, 0, 4);

        assert!(matches!(
            decrypt_field(&field, &key),
            Err(TrustmeError::TamperedOrWrongKey)
        ));
    }

    #[test]
    fn test_tag_is_not_optional() {
        let key = test_key();
        let mut field = encrypt_field("secret data", &key).unwrap();
        field.tag.clear();

        assert!(matches!(
            decrypt_field(&field, &key),
            Err(TrustmeError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_wrong_length_iv_is_invalid_input() {
        let key = test_key();
        let mut field = encrypt_field("secret data", &key).unwrap();
        // 16-byte IV (the old CBC layout)
        field.iv = encoding::encode(&[0u8; 16]);

        assert!(matches!(
            decrypt_field(&field, &key),
            Err(TrustmeError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_tag_appended_to_ciphertext_is_rejected() {
        let key = test_key();
        let field = encrypt_field("secret data", &key).unwrap();
        let mut combined = encoding::decode(&field.ciphertext, "ct").unwrap();
        combined.extend(encoding::decode(&field.tag, "tag").unwrap());

        let merged = EncryptedField {
            ciphertext: encoding::encode(&combined),
            iv: field.iv.clone(),
            tag: field.tag.clone(),
        };
        assert!(decrypt_field(&merged, &key).is_err());
    }

    #[test]
    fn test_bad_base64_is_invalid_input() {
        let key = test_key();
        let mut field = encrypt_field("secret data", &key).unwrap();
        field.ciphertext = "not base64!".into();

        assert!(matches!(
            decrypt_field(&field, &key),
            Err(TrustmeError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_empty_marker_is_not_decryptable() {
        let key = test_key();
        let marker = EncryptedField::empty_marker();
        assert!(marker.is_empty_marker());
        assert!(matches!(
            decrypt_field(&marker, &key),
            Err(TrustmeError::InvalidInput(_))
        ));
    }
}
