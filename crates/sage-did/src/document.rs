//! DID documents: the resolver's view of an agent record.
//!
//! A document is derived from [`AgentMetadata`] on read and cached; it lists
//! verification methods (typed public keys) and service endpoints in the
//! W3C shape, without dragging in the full JSON-LD machinery.

use chrono::{DateTime, Utc};
use sage_crypto::KeyAlgorithm;
use serde::{Deserialize, Serialize};

use crate::{did::Did, error::DidError, metadata::AgentMetadata};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationMethod {
    /// `<did>#keys-<n>`
    pub id: String,
    pub algorithm: KeyAlgorithm,
    /// Raw public key bytes (no multibase wrapping).
    pub public_key: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub id: String,
    pub service_type: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DidDocument {
    pub id: Did,
    pub verification_methods: Vec<VerificationMethod>,
    pub services: Vec<ServiceEndpoint>,
    pub owner: String,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

impl DidDocument {
    /// Build the resolver view of a registry record.
    pub fn from_metadata(meta: &AgentMetadata) -> Self {
        let mut verification_methods = vec![VerificationMethod {
            id: format!("{}#keys-1", meta.did),
            algorithm: meta.public_key.algorithm,
            public_key: meta.public_key.bytes.clone(),
        }];
        // Only governance-approved additional keys become visible.
        for (i, extra) in meta.additional_keys.iter().filter(|k| k.approved).enumerate() {
            verification_methods.push(VerificationMethod {
                id: format!("{}#keys-{}", meta.did, i + 2),
                algorithm: extra.key.algorithm,
                public_key: extra.key.bytes.clone(),
            });
        }

        let services = if meta.endpoint.is_empty() {
            Vec::new()
        } else {
            vec![ServiceEndpoint {
                id: format!("{}#agent-endpoint", meta.did),
                service_type: "AgentEndpoint".to_string(),
                endpoint: meta.endpoint.clone(),
            }]
        };

        Self {
            id: meta.did.clone(),
            verification_methods,
            services,
            owner: meta.owner.clone(),
            active: meta.active,
            updated_at: meta.updated_at,
        }
    }

    /// First verification key of the requested algorithm.
    pub fn public_key(&self, algorithm: KeyAlgorithm) -> Result<&[u8], DidError> {
        self.verification_methods
            .iter()
            .find(|m| m.algorithm == algorithm)
            .map(|m| m.public_key.as_slice())
            .ok_or(DidError::KeyTypeMismatch)
    }

    /// Primary agent endpoint, if the record published one.
    pub fn endpoint(&self) -> Option<&str> {
        self.services.first().map(|s| s.endpoint.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ApprovedKey;
    use sage_crypto::PublicKey;

    fn sample_meta() -> AgentMetadata {
        AgentMetadata {
            did: Did::parse("did:sage:ethereum:0xAAAA").unwrap(),
            name: "alice".into(),
            description: "test agent".into(),
            endpoint: "https://alice.example/agent".into(),
            public_key: PublicKey::new(KeyAlgorithm::Ed25519, vec![1u8; 32]),
            additional_keys: vec![
                ApprovedKey {
                    key: PublicKey::new(KeyAlgorithm::X25519, vec![2u8; 32]),
                    approved: true,
                },
                ApprovedKey {
                    key: PublicKey::new(KeyAlgorithm::Secp256k1, vec![3u8; 33]),
                    approved: false,
                },
            ],
            capabilities: "{}".into(),
            owner: "0xowner".into(),
            registered_at: Utc::now(),
            updated_at: Utc::now(),
            active: true,
            nonce: 0,
            chain_id: Some(1),
        }
    }

    #[test]
    fn document_lists_only_approved_keys() {
        let doc = DidDocument::from_metadata(&sample_meta());
        assert_eq!(doc.verification_methods.len(), 2);
        assert!(doc.public_key(KeyAlgorithm::Ed25519).is_ok());
        assert!(doc.public_key(KeyAlgorithm::X25519).is_ok());
        assert!(matches!(
            doc.public_key(KeyAlgorithm::Secp256k1),
            Err(DidError::KeyTypeMismatch)
        ));
    }

    #[test]
    fn document_exposes_endpoint() {
        let doc = DidDocument::from_metadata(&sample_meta());
        assert_eq!(doc.endpoint(), Some("https://alice.example/agent"));
    }
}
