//! Identifier and wire-value types for the device key directory.
//!
//! Everything here serializes to the JSON shapes the key directory
//! expects: composite key ids are flat `"algorithm:id"` strings so they
//! can be used directly as JSON object keys.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CryptoError;

/// A user's directory identifier (e.g. `@alice:emberwire.net`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A device identifier, unique per user.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key algorithms that appear in composite key ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyAlgorithm {
    /// X25519 key-exchange key.
    Curve25519,
    /// Ed25519 signing key.
    Ed25519,
    /// X25519 one-time key carrying an Ed25519 self-signature.
    SignedCurve25519,
}

impl KeyAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Curve25519 => "curve25519",
            Self::Ed25519 => "ed25519",
            Self::SignedCurve25519 => "signed_curve25519",
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "curve25519" => Ok(Self::Curve25519),
            "ed25519" => Ok(Self::Ed25519),
            "signed_curve25519" => Ok(Self::SignedCurve25519),
            other => Err(CryptoError::InvalidKey(format!(
                "unknown key algorithm: {other}"
            ))),
        }
    }
}

/// Composite id for a device-scoped key, wire form `"algorithm:device_id"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceKeyId {
    pub algorithm: KeyAlgorithm,
    pub device_id: DeviceId,
}

impl DeviceKeyId {
    pub fn new(algorithm: KeyAlgorithm, device_id: DeviceId) -> Self {
        Self {
            algorithm,
            device_id,
        }
    }
}

impl fmt::Display for DeviceKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.device_id)
    }
}

impl FromStr for DeviceKeyId {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, device_id) = s
            .split_once(':')
            .ok_or_else(|| CryptoError::InvalidKey(format!("malformed device key id: {s}")))?;
        Ok(Self {
            algorithm: algorithm.parse()?,
            device_id: DeviceId::new(device_id),
        })
    }
}

impl Serialize for DeviceKeyId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeviceKeyId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Composite id for a one-time key, wire form `"algorithm:short_id"`.
///
/// The short id is assigned by the key engine and is opaque to everything
/// above it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OneTimeKeyId {
    pub algorithm: KeyAlgorithm,
    pub key_id: String,
}

impl OneTimeKeyId {
    pub fn new(algorithm: KeyAlgorithm, key_id: impl Into<String>) -> Self {
        Self {
            algorithm,
            key_id: key_id.into(),
        }
    }
}

impl fmt::Display for OneTimeKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.key_id)
    }
}

impl FromStr for OneTimeKeyId {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, key_id) = s
            .split_once(':')
            .ok_or_else(|| CryptoError::InvalidKey(format!("malformed one-time key id: {s}")))?;
        Ok(Self {
            algorithm: algorithm.parse()?,
            key_id: key_id.to_string(),
        })
    }
}

impl Serialize for OneTimeKeyId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OneTimeKeyId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// An Ed25519 public key, unpadded base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ed25519PublicKey(String);

impl Ed25519PublicKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ed25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An X25519 public key, unpadded base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Curve25519PublicKey(String);

impl Curve25519PublicKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Curve25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The two public halves of a device's long-term identity.
///
/// They are derived from one key pair and only ever produced together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityPublicKeys {
    pub ed25519: Ed25519PublicKey,
    pub curve25519: Curve25519PublicKey,
}

/// Signature block: signing user to signing key id to signature.
pub type Signatures = BTreeMap<UserId, BTreeMap<DeviceKeyId, String>>;

/// Session-establishment algorithms a device can announce support for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionAlgorithm {
    /// Group sessions.
    #[serde(rename = "megolm.v1.aes-sha2")]
    MegolmV1,
    /// Pairwise sessions.
    #[serde(rename = "olm.v1.curve25519-aes-sha2")]
    OlmV1,
}

/// A device's self-signed key announcement, published at registration so
/// other devices can discover its identity keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceKeys {
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub algorithms: Vec<SessionAlgorithm>,
    pub keys: BTreeMap<DeviceKeyId, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub signatures: Signatures,
}

/// A single one-time key record, self-signed over its `key` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedOneTimeKey {
    pub key: Curve25519PublicKey,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub signatures: Signatures,
    /// True for every record this core produces. Not part of the wire form.
    #[serde(skip)]
    pub is_signed: bool,
}

/// A batch of signed one-time keys ready for upload to the directory.
pub type OneTimeKeyBundle = BTreeMap<OneTimeKeyId, SignedOneTimeKey>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_key_id_display_and_parse() {
        let id = DeviceKeyId::new(KeyAlgorithm::Ed25519, DeviceId::new("PHONE"));
        assert_eq!(id.to_string(), "ed25519:PHONE");
        assert_eq!("ed25519:PHONE".parse::<DeviceKeyId>().unwrap(), id);
    }

    #[test]
    fn one_time_key_id_roundtrip() {
        let id = OneTimeKeyId::new(KeyAlgorithm::SignedCurve25519, "AAAAAQ");
        assert_eq!(id.to_string(), "signed_curve25519:AAAAAQ");
        assert_eq!("signed_curve25519:AAAAAQ".parse::<OneTimeKeyId>().unwrap(), id);
    }

    #[test]
    fn malformed_key_ids_rejected() {
        assert!("ed25519PHONE".parse::<DeviceKeyId>().is_err());
        assert!("rsa:PHONE".parse::<DeviceKeyId>().is_err());
    }

    #[test]
    fn key_ids_serialize_as_json_map_keys() {
        let mut keys = BTreeMap::new();
        keys.insert(
            DeviceKeyId::new(KeyAlgorithm::Curve25519, DeviceId::new("PHONE")),
            "key".to_string(),
        );
        let json = serde_json::to_string(&keys).unwrap();
        assert_eq!(json, r#"{"curve25519:PHONE":"key"}"#);
    }

    #[test]
    fn session_algorithm_wire_names() {
        let json = serde_json::to_string(&vec![SessionAlgorithm::MegolmV1, SessionAlgorithm::OlmV1])
            .unwrap();
        assert_eq!(
            json,
            r#"["megolm.v1.aes-sha2","olm.v1.curve25519-aes-sha2"]"#
        );
    }

    #[test]
    fn empty_signatures_omitted_from_wire_form() {
        let record = SignedOneTimeKey {
            key: Curve25519PublicKey::new("otk"),
            signatures: Signatures::new(),
            is_signed: false,
        };
        assert_eq!(serde_json::to_string(&record).unwrap(), r#"{"key":"otk"}"#);
    }
}
