//! Owner signatures over registry mutations.
//!
//! The payload is a domain-separated packed encoding of
//! `did ‖ name ‖ description ‖ endpoint ‖ public_key ‖ capabilities ‖
//! owner ‖ nonce ‖ chain_id`; string fields are NUL-delimited so field
//! boundaries cannot be shifted. Ethereum-family chains sign with
//! secp256k1 over the Keccak-256 digest and verify by address recovery
//! (the on-chain contract does the same with `ecrecover`); Solana signs
//! the packed payload with Ed25519.
//!
//! Clients verify locally before submitting, so a bad signature never
//! costs gas.

use sage_crypto::{keys, KeyAlgorithm, KeyPair};

use crate::{
    did::{Chain, Did},
    error::RegistryError,
    metadata::{RegistrationRequest, UpdateFields},
};

/// Packed payload for a registration signature. `nonce` is 0 at
/// registration time.
pub fn registration_payload(req: &RegistrationRequest) -> Vec<u8> {
    packed_payload(
        &req.did,
        &req.name,
        &req.description,
        &req.endpoint,
        &req.public_key.bytes,
        &req.capabilities,
        &req.owner,
        0,
        req.chain_id,
    )
}

/// Packed payload for an update signature; binds the current record nonce.
pub fn update_payload(
    did: &Did,
    fields: &UpdateFields,
    owner: &str,
    nonce: u64,
    chain_id: Option<u64>,
) -> Vec<u8> {
    packed_payload(
        did,
        fields.name.as_deref().unwrap_or(""),
        fields.description.as_deref().unwrap_or(""),
        fields.endpoint.as_deref().unwrap_or(""),
        &[],
        fields.capabilities.as_deref().unwrap_or(""),
        owner,
        nonce,
        chain_id,
    )
}

/// Packed payload for a deactivation signature.
pub fn deactivation_payload(did: &Did, owner: &str, nonce: u64) -> Vec<u8> {
    packed_payload(did, "deactivate", "", "", &[], "", owner, nonce, None)
}

#[allow(clippy::too_many_arguments)]
fn packed_payload(
    did: &Did,
    name: &str,
    description: &str,
    endpoint: &str,
    public_key: &[u8],
    capabilities: &str,
    owner: &str,
    nonce: u64,
    chain_id: Option<u64>,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(128);
    out.extend_from_slice(b"sage-registry-v1\x00");
    for field in [&did.to_string(), name, description, endpoint] {
        out.extend_from_slice(field.as_bytes());
        out.push(0);
    }
    out.extend_from_slice(&(public_key.len() as u32).to_be_bytes());
    out.extend_from_slice(public_key);
    for field in [capabilities, owner] {
        out.extend_from_slice(field.as_bytes());
        out.push(0);
    }
    out.extend_from_slice(&nonce.to_be_bytes());
    out.extend_from_slice(&chain_id.unwrap_or(0).to_be_bytes());
    out
}

/// Sign a payload with the owner keypair appropriate for the chain.
pub fn sign_payload(owner_key: &KeyPair, payload: &[u8]) -> Result<Vec<u8>, RegistryError> {
    Ok(owner_key.sign(payload)?)
}

/// Verify that `signature` over `payload` was produced by `owner`.
///
/// On Ethereum/Kaia the owner is an address and verification is recovery:
/// the recovered address must equal `owner` (case-insensitive hex). On
/// Solana the owner address encodes an Ed25519 key; the caller decodes it
/// and passes the raw key bytes in `owner_public_key`.
pub fn verify_owner_signature(
    chain: Chain,
    owner: &str,
    owner_public_key: Option<&[u8]>,
    payload: &[u8],
    signature: &[u8],
) -> Result<(), RegistryError> {
    match chain {
        Chain::Ethereum | Chain::Kaia => {
            let recovered = keys::recover_ethereum_address(payload, signature)
                .map_err(|_| RegistryError::OwnershipProofInvalid)?;
            if recovered.eq_ignore_ascii_case(owner) {
                Ok(())
            } else {
                Err(RegistryError::OwnershipProofInvalid)
            }
        }
        Chain::Solana => {
            let key = owner_public_key.ok_or(RegistryError::OwnershipProofInvalid)?;
            sage_crypto::PublicKey::new(KeyAlgorithm::Ed25519, key.to_vec())
                .verify(payload, signature)
                .map_err(|_| RegistryError::OwnershipProofInvalid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sage_crypto::PublicKey;

    fn sample_request(owner: &str, key: &KeyPair) -> RegistrationRequest {
        RegistrationRequest {
            did: Did::parse("did:sage:ethereum:0xAAAA").unwrap(),
            name: "alice".into(),
            description: "agent".into(),
            endpoint: "https://alice.example".into(),
            public_key: PublicKey::new(KeyAlgorithm::Ed25519, vec![1u8; 32]),
            capabilities: "{}".into(),
            owner: owner.to_string(),
            chain_id: Some(1),
            signature: {
                let payload = packed_payload(
                    &Did::parse("did:sage:ethereum:0xAAAA").unwrap(),
                    "alice",
                    "agent",
                    "https://alice.example",
                    &[1u8; 32],
                    "{}",
                    owner,
                    0,
                    Some(1),
                );
                key.sign(&payload).unwrap()
            },
        }
    }

    #[test]
    fn ethereum_owner_signature_recovers() {
        let key = KeyPair::generate(KeyAlgorithm::Secp256k1).unwrap();
        let owner = key.ethereum_address().unwrap();
        let req = sample_request(&owner, &key);
        let payload = registration_payload(&req);
        verify_owner_signature(Chain::Ethereum, &owner, None, &payload, &req.signature).unwrap();
    }

    #[test]
    fn wrong_signer_is_rejected() {
        let key = KeyPair::generate(KeyAlgorithm::Secp256k1).unwrap();
        let other = KeyPair::generate(KeyAlgorithm::Secp256k1).unwrap();
        let owner = key.ethereum_address().unwrap();
        let req = sample_request(&owner, &other);
        let payload = registration_payload(&req);
        assert!(matches!(
            verify_owner_signature(Chain::Ethereum, &owner, None, &payload, &req.signature),
            Err(RegistryError::OwnershipProofInvalid)
        ));
    }

    #[test]
    fn solana_owner_signature_verifies() {
        let key = KeyPair::generate(KeyAlgorithm::Ed25519).unwrap();
        let owner = hex::encode(&key.public().bytes);
        let payload = packed_payload(
            &Did::parse("did:sage:solana:agent1").unwrap(),
            "alice",
            "",
            "",
            &[],
            "{}",
            &owner,
            0,
            None,
        );
        let sig = key.sign(&payload).unwrap();
        verify_owner_signature(
            Chain::Solana,
            &owner,
            Some(&key.public().bytes),
            &payload,
            &sig,
        )
        .unwrap();
    }

    #[test]
    fn update_payload_binds_nonce() {
        let did = Did::parse("did:sage:ethereum:0xAAAA").unwrap();
        let fields = UpdateFields {
            endpoint: Some("https://new.example".into()),
            ..Default::default()
        };
        let p1 = update_payload(&did, &fields, "0xowner", 1, Some(1));
        let p2 = update_payload(&did, &fields, "0xowner", 2, Some(1));
        assert_ne!(p1, p2);
    }
}
