//! From DH output to session seed.
//!
//! The transcript binds the context id and both ephemeral publics in
//! lexicographic order, so initiator and responder derive identical seeds:
//!
//! ```text
//! transcript   = "sage-handshake-v1" ‖ context_id ‖ min(EK_A, EK_B) ‖ max(EK_A, EK_B)
//! session_seed = HKDF-Extract(salt = SHA-256(transcript), ikm = shared)
//! ```
//!
//! The completion tag the initiator sends in Complete is
//! `HMAC-SHA256(shared, "complete" ‖ context_id)`.

use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use sage_crypto::kdf;
use sage_session::SessionSeed;

const TRANSCRIPT_LABEL: &[u8] = b"sage-handshake-v1";
const COMPLETE_LABEL: &[u8] = b"complete";

/// Derive the session seed shared by both roles.
pub fn derive_session_seed(
    context_id: &[u8],
    local_ephemeral: &[u8; 32],
    peer_ephemeral: &[u8; 32],
    shared: &Zeroizing<[u8; 32]>,
) -> SessionSeed {
    let (lo, hi) = if local_ephemeral <= peer_ephemeral {
        (local_ephemeral, peer_ephemeral)
    } else {
        (peer_ephemeral, local_ephemeral)
    };

    let mut hasher = Sha256::new();
    hasher.update(TRANSCRIPT_LABEL);
    hasher.update(context_id);
    hasher.update(lo);
    hasher.update(hi);
    let salt: [u8; 32] = hasher.finalize().into();

    SessionSeed::new(kdf::hkdf_extract(&salt, shared.as_ref()))
}

/// Key-confirmation tag carried by the Complete message.
pub fn complete_tag(shared: &Zeroizing<[u8; 32]>, context_id: &[u8]) -> [u8; 32] {
    let mut message = Vec::with_capacity(COMPLETE_LABEL.len() + context_id.len());
    message.extend_from_slice(COMPLETE_LABEL);
    message.extend_from_slice(context_id);
    kdf::hmac_sha256(shared.as_ref(), &message)
}

pub fn verify_complete_tag(
    shared: &Zeroizing<[u8; 32]>,
    context_id: &[u8],
    tag: &[u8],
) -> bool {
    let mut message = Vec::with_capacity(COMPLETE_LABEL.len() + context_id.len());
    message.extend_from_slice(COMPLETE_LABEL);
    message.extend_from_slice(context_id);
    kdf::hmac_verify(shared.as_ref(), &message, tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_is_role_symmetric() {
        let shared = Zeroizing::new([7u8; 32]);
        let a = [1u8; 32];
        let b = [2u8; 32];
        let ctx = [9u8; 16];

        let seed_initiator = derive_session_seed(&ctx, &a, &b, &shared);
        let seed_responder = derive_session_seed(&ctx, &b, &a, &shared);
        assert_eq!(seed_initiator.as_bytes(), seed_responder.as_bytes());
    }

    #[test]
    fn seed_depends_on_context() {
        let shared = Zeroizing::new([7u8; 32]);
        let a = [1u8; 32];
        let b = [2u8; 32];
        let seed_1 = derive_session_seed(&[1u8; 16], &a, &b, &shared);
        let seed_2 = derive_session_seed(&[2u8; 16], &a, &b, &shared);
        assert_ne!(seed_1.as_bytes(), seed_2.as_bytes());
    }

    #[test]
    fn complete_tag_verifies_only_with_the_right_secret() {
        let shared = Zeroizing::new([7u8; 32]);
        let other = Zeroizing::new([8u8; 32]);
        let ctx = [9u8; 16];
        let tag = complete_tag(&shared, &ctx);
        assert!(verify_complete_tag(&shared, &ctx, &tag));
        assert!(!verify_complete_tag(&other, &ctx, &tag));
        assert!(!verify_complete_tag(&shared, &[0u8; 16], &tag));
    }
}
