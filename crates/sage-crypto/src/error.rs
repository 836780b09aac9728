use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("AEAD decryption failed (authentication tag mismatch)")]
    DecryptFailed,

    #[error("AEAD encryption failed")]
    EncryptFailed,

    #[error("HPKE operation failed: {0}")]
    Hpke(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("randomness source failure")]
    RandomnessFailure,
}
