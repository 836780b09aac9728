use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found")]
    SessionNotFound,

    #[error("session expired or closed")]
    SessionExpired,

    #[error("sequence number outside the replay window")]
    SequenceOutOfWindow,

    #[error("replayed record detected")]
    ReplayDetected,

    #[error("record decryption failed")]
    DecryptFailed,

    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("send sequence exhausted")]
    SequenceExhausted,

    #[error(transparent)]
    Crypto(#[from] sage_crypto::CryptoError),
}
