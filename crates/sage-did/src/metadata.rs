//! On-chain agent records and the inputs that create or mutate them.

use chrono::{DateTime, Utc};
use sage_crypto::{KeyAlgorithm, PublicKey};
use serde::{Deserialize, Serialize};

use crate::did::Did;

/// The registry record for one agent, as read back from a chain.
///
/// Invariants enforced by every registry implementation:
/// - `did` → record is 1:1 within a chain;
/// - `owner` is set at registration and never changes;
/// - `public_key` is immutable after registration (rotation requires
///   deactivation plus a fresh registration, or governance approval of an
///   additional key);
/// - `nonce` strictly increases on every owner-authorized mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMetadata {
    pub did: Did,
    pub name: String,
    pub description: String,
    /// URL or transport-specific locator for reaching the agent.
    pub endpoint: String,
    /// Primary identity key.
    pub public_key: PublicKey,
    /// Governance-approved additional keys (multi-key variant).
    #[serde(default)]
    pub additional_keys: Vec<ApprovedKey>,
    /// Opaque capability JSON, interpreted by applications.
    pub capabilities: String,
    /// Chain-native owner address.
    pub owner: String,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub active: bool,
    /// Update-replay protection counter.
    pub nonce: u64,
    /// Cross-chain replay protection.
    #[serde(default)]
    pub chain_id: Option<u64>,
}

impl AgentMetadata {
    /// Key bytes of the requested algorithm, if the agent lists one that is
    /// currently approved.
    pub fn key_of_type(&self, algorithm: KeyAlgorithm) -> Option<&[u8]> {
        if self.public_key.algorithm == algorithm {
            return Some(&self.public_key.bytes);
        }
        self.additional_keys
            .iter()
            .find(|k| k.key.algorithm == algorithm && k.approved)
            .map(|k| k.key.bytes.as_slice())
    }
}

/// An additional key bound to an agent under the multi-key variant.
/// TEE-attested keys require the governance approval flag before the
/// resolver will hand them out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovedKey {
    pub key: PublicKey,
    pub approved: bool,
}

/// Everything needed to create a record on chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub did: Did,
    pub name: String,
    pub description: String,
    pub endpoint: String,
    pub public_key: PublicKey,
    pub capabilities: String,
    pub owner: String,
    #[serde(default)]
    pub chain_id: Option<u64>,
    /// Owner signature over the registration payload
    /// (see [`crate::ownership`]).
    pub signature: Vec<u8>,
}

/// Outcome of a successful on-chain registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationResult {
    pub agent_id: String,
    pub tx_hash: String,
    pub block_number: u64,
    pub gas_used: u64,
}

/// Owner-authorized mutation of the mutable record fields. Immutable fields
/// (did, owner, public_key) have no representation here on purpose.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateFields {
    pub name: Option<String>,
    pub description: Option<String>,
    pub endpoint: Option<String>,
    pub capabilities: Option<String>,
}

impl UpdateFields {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.endpoint.is_none()
            && self.capabilities.is_none()
    }
}
