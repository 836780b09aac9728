//! The local agent's view of itself: a DID plus the identity keypair the
//! registry binds to it.

use sage_crypto::{CryptoError, KeyAlgorithm, KeyPair};
use sage_did::Did;

pub struct AgentIdentity {
    pub did: Did,
    keypair: KeyPair,
}

impl AgentIdentity {
    pub fn new(did: Did, keypair: KeyPair) -> Self {
        Self { did, keypair }
    }

    /// Generate a fresh Ed25519 identity for `did`. The public half still
    /// has to be registered on chain before peers will accept handshakes.
    pub fn generate(did: Did) -> Result<Self, CryptoError> {
        Ok(Self {
            did,
            keypair: KeyPair::generate(KeyAlgorithm::Ed25519)?,
        })
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.keypair.algorithm()
    }

    pub fn public_key_bytes(&self) -> &[u8] {
        &self.keypair.public().bytes
    }

    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.keypair.sign(message)
    }

    pub(crate) fn keypair(&self) -> &KeyPair {
        &self.keypair
    }
}
