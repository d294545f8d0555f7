//! The device account: one per device, owner of all its key material.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use serde::Serialize;
use tracing::debug;

use crate::canonical;
use crate::engine::{KeyEngine, LocalKeyEngine};
use crate::error::CryptoError;
use crate::types::{
    Curve25519PublicKey, DeviceId, DeviceKeyId, DeviceKeys, Ed25519PublicKey, IdentityPublicKeys,
    KeyAlgorithm, OneTimeKeyBundle, OneTimeKeyId, SessionAlgorithm, SignedOneTimeKey, Signatures,
    UserId,
};

/// A device's cryptographic account: the long-term identity key pair plus
/// the replenishable pool of one-time keys other devices claim to open
/// pairwise sessions with us.
///
/// One account per device. The engine handle is exclusively owned and not
/// safe for concurrent mutation, so every operation that reads then writes
/// engine state takes `&mut self`; the borrow checker is the
/// mutual-exclusion boundary. Accessors cache through a `OnceLock` and
/// stay `&self`. Distinct accounts share nothing and run in parallel
/// freely.
pub struct DeviceAccount {
    engine: Box<dyn KeyEngine>,
    identity_cache: OnceLock<IdentityPublicKeys>,
    /// Whether the owning client has uploaded this account's keys to the
    /// directory. Maintained by the client, not by the operations below.
    pub published: bool,
}

impl DeviceAccount {
    /// Create an account with a freshly generated in-process key engine.
    pub fn new() -> Self {
        Self::with_engine(Box::new(LocalKeyEngine::new()))
    }

    /// Create an account around an existing engine (alternate backends,
    /// test doubles).
    pub fn with_engine(engine: Box<dyn KeyEngine>) -> Self {
        Self {
            engine,
            identity_cache: OnceLock::new(),
            published: false,
        }
    }

    /// Both public halves of the identity key pair.
    ///
    /// The first call queries the engine once and caches both values
    /// together; the pair is derived as a unit and is never rotated in
    /// place, so the cache can never go stale. Later calls are pure reads.
    pub fn identity_keys(&self) -> &IdentityPublicKeys {
        self.identity_cache
            .get_or_init(|| self.engine.identity_keys())
    }

    /// The Curve25519 (key-exchange) half of the identity.
    pub fn signing_key(&self) -> &Curve25519PublicKey {
        &self.identity_keys().curve25519
    }

    /// The Ed25519 (signing) half of the identity.
    pub fn identity_key(&self) -> &Ed25519PublicKey {
        &self.identity_keys().ed25519
    }

    /// Build the self-signed device-key announcement published once at
    /// registration.
    ///
    /// A signing failure here means the engine's key state is corrupted.
    /// The whole operation aborts: an unsigned or mis-signed announcement
    /// accepted by the directory would let other devices trust unverified
    /// keys.
    pub fn initial_device_keys(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
    ) -> Result<DeviceKeys, CryptoError> {
        let mut device_keys = DeviceKeys {
            user_id: user_id.clone(),
            device_id: device_id.clone(),
            algorithms: vec![SessionAlgorithm::MegolmV1, SessionAlgorithm::OlmV1],
            keys: BTreeMap::from([
                (
                    DeviceKeyId::new(KeyAlgorithm::Curve25519, device_id.clone()),
                    self.signing_key().as_str().to_string(),
                ),
                (
                    DeviceKeyId::new(KeyAlgorithm::Ed25519, device_id.clone()),
                    self.identity_key().as_str().to_string(),
                ),
            ]),
            signatures: Signatures::new(),
        };

        let signature = self.sign_json(&device_keys)?;
        device_keys.signatures = self_signature(user_id, device_id, signature);
        Ok(device_keys)
    }

    /// Top up the one-time key pool and return every unpublished key,
    /// signed and ready for upload.
    ///
    /// `server_count` is how many unused one-time keys the directory
    /// currently holds for this device. The pool is topped up to half the
    /// engine's capacity; the halving leaves headroom for keys that are
    /// generated but not yet uploaded. A non-positive deficit generates
    /// nothing, but any keys still pending from an earlier call are signed
    /// and returned regardless.
    ///
    /// Completing this call marks every returned key as published inside
    /// the engine. That transition is one-way: call this at most once per
    /// upload attempt, because keys marked published are withheld from
    /// every future bundle even if the upload never happens.
    pub fn replenish_one_time_keys(
        &mut self,
        user_id: &UserId,
        device_id: &DeviceId,
        server_count: usize,
    ) -> Result<OneTimeKeyBundle, CryptoError> {
        let target = self.engine.max_one_time_keys() / 2;
        let deficit = target.saturating_sub(server_count);
        if deficit > 0 {
            debug!(deficit, server_count, "generating one-time keys");
            self.engine.generate_one_time_keys(deficit)?;
        }

        let mut bundle = OneTimeKeyBundle::new();
        for (key_id, key) in self.engine.unpublished_one_time_keys() {
            let mut record = SignedOneTimeKey {
                key,
                signatures: Signatures::new(),
                is_signed: false,
            };
            // Each record is signed over its key value alone, not over the
            // whole bundle. Any failure aborts before publication-marking,
            // so no half-signed bundle can escape.
            let signature = self.sign_json(&record)?;
            record.signatures = self_signature(user_id, device_id, signature);
            record.is_signed = true;
            bundle.insert(
                OneTimeKeyId::new(KeyAlgorithm::SignedCurve25519, key_id),
                record,
            );
        }

        self.engine.mark_one_time_keys_published();
        debug!(count = bundle.len(), "one-time keys signed and marked published");
        Ok(bundle)
    }

    /// Sign the canonical JSON form of a signable structure.
    fn sign_json<T: Serialize>(&self, value: &T) -> Result<String, CryptoError> {
        let canonical_form = canonical::to_canonical_json(value)?;
        self.engine.sign(canonical_form.as_bytes())
    }
}

impl Default for DeviceAccount {
    fn default() -> Self {
        Self::new()
    }
}

/// Signature block containing exactly our own signature, keyed by the
/// Ed25519 key id of the signing device.
fn self_signature(user_id: &UserId, device_id: &DeviceId, signature: String) -> Signatures {
    Signatures::from([(
        user_id.clone(),
        BTreeMap::from([(
            DeviceKeyId::new(KeyAlgorithm::Ed25519, device_id.clone()),
            signature,
        )]),
    )])
}
