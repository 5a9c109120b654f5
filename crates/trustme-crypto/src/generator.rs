//! Random password generation for new entries

use rand::rngs::OsRng;
use rand::Rng;
use secrecy::SecretString;

use trustme_core::{TrustmeError, TrustmeResult};

pub const DEFAULT_LENGTH: usize = 16;

const CHARSET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%^&*()_+-=[]{}|;:,.<>?";

/// Generate a password of `length` characters drawn uniformly from the
/// charset with the OS CSPRNG.
pub fn generate_password(length: usize) -> TrustmeResult<SecretString> {
    if length == 0 {
        return Err(TrustmeError::invalid_input("password length must be > 0"));
    }
    let password: String = (0..length)
        .map(|_| CHARSET[OsRng.gen_range(0..CHARSET.len())] as char)
        .collect();
    Ok(SecretString::from(password))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_length_and_charset() {
        let pw = generate_password(DEFAULT_LENGTH).unwrap();
        assert_eq!(pw.expose_secret().len(), DEFAULT_LENGTH);
        assert!(pw.expose_secret().bytes().all(|b| CHARSET.contains(&b)));
    }

    #[test]
    fn test_passwords_differ() {
        let a = generate_password(32).unwrap();
        let b = generate_password(32).unwrap();
        assert_ne!(a.expose_secret(), b.expose_secret());
    }

    #[test]
    fn test_zero_length_rejected() {
        assert!(matches!(generate_password(0), Err(TrustmeError::InvalidInput(_))));
    }

    #[test]
    fn test_all_classes_reachable() {
        let pw = generate_password(2_000).unwrap();
        let s = pw.expose_secret();
        assert!(s.bytes().any(|b| b.is_ascii_lowercase()));
        assert!(s.bytes().any(|b| b.is_ascii_uppercase()));
        assert!(s.bytes().any(|b| b.is_ascii_digit()));
        assert!(s.bytes().any(|b| b.is_ascii_punctuation()));
    }
}
