use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("message signature verification failed")]
    InvalidSignature,

    #[error("nonce already observed from this peer")]
    NonceReuse,

    #[error("message timestamp outside the allowed skew")]
    TimestampOutOfRange,

    #[error("peer identity key changed during the handshake")]
    IdentityChanged,

    #[error("handshake state mismatch: {0}")]
    StateMismatch(String),

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u32),

    #[error("confirmation tag mismatch")]
    ConfirmationMismatch,

    #[error("peer declined the handshake: {0}")]
    PeerRejected(String),

    #[error("malformed handshake message: {0}")]
    Malformed(String),

    #[error("handshake timed out")]
    Timeout,

    #[error(transparent)]
    Identity(#[from] sage_did::DidError),

    #[error(transparent)]
    Crypto(#[from] sage_crypto::CryptoError),

    #[error(transparent)]
    Session(#[from] sage_session::SessionError),

    #[error(transparent)]
    Transport(#[from] crate::transport::TransportError),
}

impl HandshakeError {
    /// Retryable failures may succeed with a fresh attempt (new context id
    /// and ephemerals); everything else is fatal for this peer/configuration.
    pub fn is_retryable(&self) -> bool {
        match self {
            HandshakeError::Identity(e) => e.is_retryable(),
            HandshakeError::Transport(e) => e.is_retryable(),
            HandshakeError::Timeout => true,
            _ => false,
        }
    }
}
