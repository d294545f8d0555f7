pub mod account;
pub mod canonical;
pub mod engine;
pub mod error;
pub mod types;

pub use account::DeviceAccount;
pub use engine::{KeyEngine, LocalKeyEngine};
pub use error::CryptoError;
pub use types::{
    Curve25519PublicKey, DeviceId, DeviceKeyId, DeviceKeys, Ed25519PublicKey, IdentityPublicKeys,
    KeyAlgorithm, OneTimeKeyBundle, OneTimeKeyId, SessionAlgorithm, SignedOneTimeKey, Signatures,
    UserId,
};
