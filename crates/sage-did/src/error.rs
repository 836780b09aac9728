use thiserror::Error;

/// Registry-level failures, surfaced by [`crate::registry::RegistryClient`]
/// implementations and the commit-reveal wrapper.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("DID is already registered on this chain")]
    DuplicateDid,

    #[error("agent not found")]
    NotFound,

    #[error("caller is not the record owner")]
    NotOwner,

    #[error("nonce mismatch: expected {expected}, got {got}")]
    NonceMismatch { expected: u64, got: u64 },

    #[error("agent is deactivated")]
    AgentInactive,

    #[error("owner holds the maximum number of agents")]
    RateLimitExceeded,

    #[error("registration stake missing or insufficient")]
    StakeMissing,

    #[error("ownership proof does not verify against the owner address")]
    OwnershipProofInvalid,

    #[error("registration hook rejected: {0}")]
    HookRejected(String),

    #[error("invalid registration input: {0}")]
    InvalidInput(String),

    #[error("commit-reveal state mismatch: {0}")]
    StateMismatch(String),

    #[error("chain unavailable: {0}")]
    ChainUnavailable(String),

    #[error("chain error: {0}")]
    ChainError(String),

    #[error(transparent)]
    Crypto(#[from] sage_crypto::CryptoError),
}

impl RegistryError {
    /// Only transient chain failures are worth retrying; everything else is
    /// deterministic for the same inputs.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RegistryError::ChainUnavailable(_))
    }
}

/// Identity and resolution failures.
#[derive(Debug, Error)]
pub enum DidError {
    #[error("malformed DID: {0}")]
    Malformed(String),

    #[error("unsupported chain: {0}")]
    UnsupportedChain(String),

    #[error("DID not found: {0}")]
    NotFound(String),

    #[error("DID is deactivated: {0}")]
    Deactivated(String),

    #[error("no key of the requested type on this DID")]
    KeyTypeMismatch,

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl DidError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DidError::Registry(e) if e.is_retryable())
    }
}
