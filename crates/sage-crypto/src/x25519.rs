//! X25519 key agreement.
//!
//! References:
//!   - RFC 7748 (X25519): <https://datatracker.ietf.org/doc/html/rfc7748>
//!   - RFC 8032 §5.1.5 (Ed25519 key expansion / clamping)
//!
//! Ephemeral keypairs are generated once per handshake attempt and destroyed
//! with the handshake; the secret half zeroizes on drop. A Diffie-Hellman
//! output of all zeroes means the peer sent a low-order point and MUST be
//! rejected before any key derivation.

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroize;

use crate::error::CryptoError;

/// X25519 keypair for one handshake attempt. Secret clears on drop
/// (`StaticSecret` zeroizes internally).
pub struct EphemeralKeyPair {
    secret: StaticSecret,
    public: X25519Public,
}

impl EphemeralKeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519Public::from(&secret);
        Self { secret, public }
    }

    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = X25519Public::from(&secret);
        Self { secret, public }
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        *self.public.as_bytes()
    }

    /// Raw secret bytes, for handing this keypair to the HPKE recipient
    /// side. Callers must not copy these beyond the HPKE call.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// DH against a peer public key; rejects low-order peer points.
    pub fn diffie_hellman(&self, peer_public: &[u8; 32]) -> Result<[u8; 32], CryptoError> {
        diffie_hellman(&self.secret, peer_public)
    }
}

/// Raw X25519 DH. The all-zero output check rejects the identity and other
/// low-order points (contributory behavior).
pub fn diffie_hellman(
    secret: &StaticSecret,
    peer_public: &[u8; 32],
) -> Result<[u8; 32], CryptoError> {
    let shared = secret.diffie_hellman(&X25519Public::from(*peer_public));
    if shared.as_bytes().iter().all(|&b| b == 0) {
        return Err(CryptoError::InvalidPublicKey(
            "low-order X25519 point (all-zero shared secret)".into(),
        ));
    }
    Ok(*shared.as_bytes())
}

/// Convert an Ed25519 verifying key (32 bytes) to an X25519 public key via
/// the birational Edwards→Montgomery map.
pub fn ed25519_public_to_x25519(ed_public: &[u8; 32]) -> Result<[u8; 32], CryptoError> {
    use curve25519_dalek::edwards::CompressedEdwardsY;
    let compressed = CompressedEdwardsY::from_slice(ed_public)
        .map_err(|_| CryptoError::InvalidPublicKey("invalid Ed25519 public key".into()))?;
    let point = compressed.decompress().ok_or_else(|| {
        CryptoError::InvalidPublicKey("Ed25519 public key decompression failed".into())
    })?;
    Ok(point.to_montgomery().to_bytes())
}

/// Convert an Ed25519 seed (32 bytes) to an X25519 static secret: the
/// clamped lower half of the SHA-512 expansion, per RFC 8032 §5.1.5 and
/// RFC 7748 §5.
pub fn ed25519_secret_to_x25519(ed_secret: &[u8; 32]) -> StaticSecret {
    use sha2::{Digest, Sha512};
    let mut h = Sha512::digest(ed_secret);
    h[0] &= 248;
    h[31] &= 127;
    h[31] |= 64;
    let mut key = [0u8; 32];
    key.copy_from_slice(&h[..32]);
    h.as_mut_slice().zeroize();
    StaticSecret::from(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    #[test]
    fn dh_is_symmetric() {
        let a = EphemeralKeyPair::generate();
        let b = EphemeralKeyPair::generate();
        let ab = a.diffie_hellman(&b.public_bytes()).unwrap();
        let ba = b.diffie_hellman(&a.public_bytes()).unwrap();
        assert_eq!(ab, ba);
    }

    #[test]
    fn dh_rejects_low_order_point() {
        let a = EphemeralKeyPair::generate();
        let err = a.diffie_hellman(&[0u8; 32]).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidPublicKey(_)));
    }

    #[test]
    fn ed25519_conversion_agrees_both_directions() {
        // DH over converted keys must agree regardless of which side converts
        // the public and which the secret.
        let alice = SigningKey::generate(&mut rand::rngs::OsRng);
        let bob = SigningKey::generate(&mut rand::rngs::OsRng);

        let alice_x_secret = ed25519_secret_to_x25519(&alice.to_bytes());
        let bob_x_secret = ed25519_secret_to_x25519(&bob.to_bytes());
        let alice_x_public = ed25519_public_to_x25519(&alice.verifying_key().to_bytes()).unwrap();
        let bob_x_public = ed25519_public_to_x25519(&bob.verifying_key().to_bytes()).unwrap();

        let ab = diffie_hellman(&alice_x_secret, &bob_x_public).unwrap();
        let ba = diffie_hellman(&bob_x_secret, &alice_x_public).unwrap();
        assert_eq!(ab, ba);
    }

    #[test]
    fn converted_public_matches_derived_secret() {
        let ed = SigningKey::generate(&mut rand::rngs::OsRng);
        let x_secret = ed25519_secret_to_x25519(&ed.to_bytes());
        let derived_public = x25519_dalek::PublicKey::from(&x_secret);
        let converted_public =
            ed25519_public_to_x25519(&ed.verifying_key().to_bytes()).unwrap();
        assert_eq!(*derived_public.as_bytes(), converted_public);
    }
}
