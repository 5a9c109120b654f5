//! The single Base64 flavour used at every serialization boundary.
//!
//! Standard alphabet (not URL-safe). Output is always padded; input may omit
//! padding, because the backend issues salts unpadded.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;

use trustme_core::{TrustmeError, TrustmeResult};

pub const B64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub fn encode(data: &[u8]) -> String {
    B64.encode(data)
}

/// Decode a Base64 value; `what` names the field in the error.
pub fn decode(s: &str, what: &str) -> TrustmeResult<Vec<u8>> {
    B64.decode(s)
        .map_err(|e| TrustmeError::invalid_input(format!("{what}: base64 decode: {e}")))
}

/// Decode a Base64 value that must be exactly `N` bytes long.
pub fn decode_array<const N: usize>(s: &str, what: &str) -> TrustmeResult<[u8; N]> {
    let bytes = decode(s, what)?;
    bytes.as_slice().try_into().map_err(|_| {
        TrustmeError::invalid_input(format!(
            "{what} must be {} bytes, got {}",
            N,
            bytes.len()
        ))
    })
}
