//! The key engine seam and its in-process implementation.
//!
//! `KeyEngine` is the interface the account core needs from whatever holds
//! the actual key material. `LocalKeyEngine` keeps everything in process
//! memory; a hardware-backed engine would implement the same trait.

use std::collections::BTreeMap;

use base64::Engine as _;
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;
use crate::types::{Curve25519PublicKey, Ed25519PublicKey, IdentityPublicKeys};

/// Default ceiling on keys the engine will hold unpublished at once.
pub const DEFAULT_MAX_ONE_TIME_KEYS: usize = 100;

/// Interface to the cryptographic engine holding a device's key material.
///
/// The handle is exclusively owned by one `DeviceAccount`; components that
/// need key operations borrow the account, they never get their own copy.
pub trait KeyEngine: Send {
    /// Derive both public halves of the long-term identity key pair.
    ///
    /// Infallible: the key pair exists from engine construction onward and
    /// is never rotated in place.
    fn identity_keys(&self) -> IdentityPublicKeys;

    /// Maximum number of unpublished one-time keys the engine can hold.
    fn max_one_time_keys(&self) -> usize;

    /// Generate `count` fresh one-time key pairs.
    ///
    /// Fails if the unpublished pool would exceed the engine's capacity.
    fn generate_one_time_keys(&mut self, count: usize) -> Result<(), CryptoError>;

    /// The currently unpublished one-time keys, by short key id.
    fn unpublished_one_time_keys(&self) -> BTreeMap<String, Curve25519PublicKey>;

    /// Mark every held one-time key as published.
    ///
    /// One-way: keys marked here are never returned by
    /// `unpublished_one_time_keys` again, and their ids are never reused.
    fn mark_one_time_keys_published(&mut self);

    /// Sign a message with the identity's Ed25519 key, returning the
    /// signature as unpadded base64. Fails only on corrupted key state.
    fn sign(&self, message: &[u8]) -> Result<String, CryptoError>;
}

/// Software key engine holding key material in process memory.
#[derive(ZeroizeOnDrop)]
pub struct LocalKeyEngine {
    signing_key: SigningKey,
    /// Unpublished one-time secrets by numeric id. The secrets zeroize
    /// themselves on drop.
    #[zeroize(skip)]
    one_time_keys: BTreeMap<u32, StaticSecret>,
    next_key_id: u32,
    max_one_time_keys: usize,
}

impl LocalKeyEngine {
    /// Generate a fresh engine with a new random identity key pair.
    pub fn new() -> Self {
        Self::with_max_one_time_keys(DEFAULT_MAX_ONE_TIME_KEYS)
    }

    /// Generate a fresh engine with a custom one-time key capacity.
    pub fn with_max_one_time_keys(max_one_time_keys: usize) -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
            one_time_keys: BTreeMap::new(),
            next_key_id: 1,
            max_one_time_keys,
        }
    }

    /// Wire form of a numeric key id: unpadded base64 of the big-endian
    /// counter bytes (id 1 becomes `AAAAAQ`).
    fn short_key_id(id: u32) -> String {
        base64::engine::general_purpose::STANDARD_NO_PAD.encode(id.to_be_bytes())
    }
}

impl Default for LocalKeyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyEngine for LocalKeyEngine {
    fn identity_keys(&self) -> IdentityPublicKeys {
        // The Curve25519 half reuses the Ed25519 scalar so one seed yields
        // both keys (standard Edwards to Montgomery derivation).
        let curve_secret = StaticSecret::from(self.signing_key.to_scalar_bytes());
        let curve_public = X25519Public::from(&curve_secret);
        IdentityPublicKeys {
            ed25519: Ed25519PublicKey::new(
                base64::engine::general_purpose::STANDARD_NO_PAD
                    .encode(self.signing_key.verifying_key().to_bytes()),
            ),
            curve25519: Curve25519PublicKey::new(
                base64::engine::general_purpose::STANDARD_NO_PAD.encode(curve_public.as_bytes()),
            ),
        }
    }

    fn max_one_time_keys(&self) -> usize {
        self.max_one_time_keys
    }

    fn generate_one_time_keys(&mut self, count: usize) -> Result<(), CryptoError> {
        if self.one_time_keys.len() + count > self.max_one_time_keys {
            return Err(CryptoError::KeyGeneration(format!(
                "one-time key pool exhausted: {} held + {} requested > {} capacity",
                self.one_time_keys.len(),
                count,
                self.max_one_time_keys
            )));
        }
        for _ in 0..count {
            let id = self.next_key_id;
            self.next_key_id += 1;
            self.one_time_keys
                .insert(id, StaticSecret::random_from_rng(OsRng));
        }
        Ok(())
    }

    fn unpublished_one_time_keys(&self) -> BTreeMap<String, Curve25519PublicKey> {
        self.one_time_keys
            .iter()
            .map(|(id, secret)| {
                let public = X25519Public::from(secret);
                (
                    Self::short_key_id(*id),
                    Curve25519PublicKey::new(
                        base64::engine::general_purpose::STANDARD_NO_PAD.encode(public.as_bytes()),
                    ),
                )
            })
            .collect()
    }

    fn mark_one_time_keys_published(&mut self) {
        // Ids keep counting up, so published ids can never reappear.
        self.one_time_keys.clear();
    }

    fn sign(&self, message: &[u8]) -> Result<String, CryptoError> {
        let signature = self.signing_key.sign(message);
        Ok(base64::engine::general_purpose::STANDARD_NO_PAD.encode(signature.to_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical;

    #[test]
    fn short_key_ids_follow_the_counter() {
        let mut engine = LocalKeyEngine::new();
        engine.generate_one_time_keys(2).unwrap();

        let ids: Vec<String> = engine.unpublished_one_time_keys().into_keys().collect();
        assert_eq!(ids, vec!["AAAAAQ".to_string(), "AAAAAg".to_string()]);
    }

    #[test]
    fn capacity_guard_rejects_oversized_requests() {
        let mut engine = LocalKeyEngine::with_max_one_time_keys(3);
        engine.generate_one_time_keys(2).unwrap();
        assert!(engine.generate_one_time_keys(2).is_err());
        // The failed request generated nothing.
        assert_eq!(engine.unpublished_one_time_keys().len(), 2);
    }

    #[test]
    fn publishing_clears_the_pool_without_reusing_ids() {
        let mut engine = LocalKeyEngine::new();
        engine.generate_one_time_keys(2).unwrap();
        engine.mark_one_time_keys_published();
        assert!(engine.unpublished_one_time_keys().is_empty());

        engine.generate_one_time_keys(1).unwrap();
        let ids: Vec<String> = engine.unpublished_one_time_keys().into_keys().collect();
        assert_eq!(ids, vec!["AAAAAw".to_string()]);
    }

    #[test]
    fn signatures_verify_against_the_identity_key() {
        let engine = LocalKeyEngine::new();
        let keys = engine.identity_keys();

        let value = serde_json::json!({ "key": "abc" });
        let canonical_form = canonical::to_canonical_json(&value).unwrap();
        let signature = engine.sign(canonical_form.as_bytes()).unwrap();

        assert!(canonical::verify_canonical(&keys.ed25519, &value, &signature).is_ok());
    }

    #[test]
    fn identity_keys_are_stable() {
        let engine = LocalKeyEngine::new();
        assert_eq!(engine.identity_keys(), engine.identity_keys());
    }
}
