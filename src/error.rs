use thiserror::Error;

/// Errors surfaced by the device account core.
///
/// There are no recoverable variants here: every failure is either a
/// malformed input on a decode path or a defect in the engine's key
/// material. Callers must treat engine-level failures as fatal for the
/// account — retrying against corrupted key state risks producing
/// signatures other devices would trust.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("signing failed: {0}")]
    SigningError(String),

    #[error("verification failed: {0}")]
    VerificationError(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("serialization failed: {0}")]
    Serialization(String),
}
