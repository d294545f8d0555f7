//! Canonical JSON form used as signing input.
//!
//! A structure is signed over its compact JSON serialization with keys in
//! lexicographic order and the `signatures` and `unsigned` fields removed.
//! Both signer and verifier rebuild this form independently, so it must be
//! byte-stable across devices.

use base64::Engine as _;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::Serialize;

use crate::error::CryptoError;
use crate::types::Ed25519PublicKey;

/// Serialize a signable structure to its canonical JSON form.
///
/// serde_json already emits compact JSON with ordered object keys, so the
/// only extra work is stripping the fields excluded from signing.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<String, CryptoError> {
    let mut value =
        serde_json::to_value(value).map_err(|e| CryptoError::Serialization(e.to_string()))?;
    if let Some(object) = value.as_object_mut() {
        object.remove("signatures");
        object.remove("unsigned");
    }
    serde_json::to_string(&value).map_err(|e| CryptoError::Serialization(e.to_string()))
}

/// Verify an Ed25519 signature over the canonical JSON form of `value`.
///
/// This is the receiving side of the protocol: devices run it against
/// every key announcement and one-time key record they download before
/// trusting the keys inside.
pub fn verify_canonical<T: Serialize>(
    public_key: &Ed25519PublicKey,
    value: &T,
    signature: &str,
) -> Result<(), CryptoError> {
    let key_bytes = base64::engine::general_purpose::STANDARD_NO_PAD
        .decode(public_key.as_str())
        .map_err(|e| CryptoError::InvalidKey(format!("invalid public key base64: {e}")))?;
    let key_array: [u8; 32] = key_bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("public key must be 32 bytes".to_string()))?;
    let verifying_key = VerifyingKey::from_bytes(&key_array)
        .map_err(|e| CryptoError::InvalidKey(format!("invalid Ed25519 public key: {e}")))?;

    let sig_bytes = base64::engine::general_purpose::STANDARD_NO_PAD
        .decode(signature)
        .map_err(|e| CryptoError::VerificationError(format!("invalid signature base64: {e}")))?;
    let sig_array: [u8; 64] = sig_bytes
        .try_into()
        .map_err(|_| CryptoError::VerificationError("signature must be 64 bytes".to_string()))?;
    let signature = Signature::from_bytes(&sig_array);

    let canonical = to_canonical_json(value)?;
    verifying_key
        .verify(canonical.as_bytes(), &signature)
        .map_err(|e| CryptoError::VerificationError(e.to_string()))
}
