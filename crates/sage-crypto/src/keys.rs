//! Identity keypairs.
//!
//! Each agent has one long-term identity signing key, either Ed25519 or
//! secp256k1 depending on the chain it registers on:
//!   - Ed25519: 64-byte signatures, `verify_strict`.
//!   - secp256k1: 65-byte r‖s‖v recoverable signatures over a Keccak-256
//!     digest, compatible with `ecrecover` on Ethereum-family chains.
//!
//! X25519 keypairs can be generated here (registry records may carry them)
//! but are key-agreement-only: `sign`/`verify` refuse them. Per-handshake
//! ephemeral pairs live in [`crate::x25519`].

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ed25519_dalek::{Signature as EdSignature, Signer, SigningKey, VerifyingKey};
use k256::ecdsa::{
    signature::hazmat::PrehashVerifier, RecoveryId, Signature as EcdsaSignature,
    SigningKey as Secp256k1SigningKey, VerifyingKey as Secp256k1VerifyingKey,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

/// Signature algorithms an agent identity key can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAlgorithm {
    Ed25519,
    Secp256k1,
    /// Key agreement only; never signs.
    X25519,
}

impl KeyAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyAlgorithm::Ed25519 => "ed25519",
            KeyAlgorithm::Secp256k1 => "secp256k1",
            KeyAlgorithm::X25519 => "x25519",
        }
    }
}

impl std::fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw public key bytes tagged with their algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    pub algorithm: KeyAlgorithm,
    pub bytes: Vec<u8>,
}

impl PublicKey {
    pub fn new(algorithm: KeyAlgorithm, bytes: Vec<u8>) -> Self {
        Self { algorithm, bytes }
    }

    pub fn to_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.bytes)
    }

    /// Verify `signature` over `message` with this key.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        match self.algorithm {
            KeyAlgorithm::Ed25519 => verify_ed25519(&self.bytes, message, signature),
            KeyAlgorithm::Secp256k1 => verify_secp256k1(&self.bytes, message, signature),
            KeyAlgorithm::X25519 => Err(CryptoError::UnsupportedAlgorithm(
                "x25519 keys cannot verify signatures".into(),
            )),
        }
    }
}

/// Long-term identity signing key. Secret bytes are cleared on drop.
#[derive(ZeroizeOnDrop)]
pub struct KeyPair {
    #[zeroize(skip)]
    algorithm: KeyAlgorithm,
    #[zeroize(skip)]
    public: PublicKey,
    secret_bytes: Vec<u8>,
}

impl KeyPair {
    /// Generate a fresh signing keypair for `algorithm`.
    pub fn generate(algorithm: KeyAlgorithm) -> Result<Self, CryptoError> {
        match algorithm {
            KeyAlgorithm::Ed25519 => {
                let signing = SigningKey::generate(&mut OsRng);
                Ok(Self {
                    algorithm,
                    public: PublicKey::new(
                        algorithm,
                        signing.verifying_key().to_bytes().to_vec(),
                    ),
                    secret_bytes: signing.to_bytes().to_vec(),
                })
            }
            KeyAlgorithm::Secp256k1 => {
                let signing = Secp256k1SigningKey::random(&mut OsRng);
                // Compressed SEC1 by default; verify() accepts all encodings.
                Ok(Self {
                    algorithm,
                    public: PublicKey::new(
                        algorithm,
                        signing
                            .verifying_key()
                            .to_encoded_point(true)
                            .as_bytes()
                            .to_vec(),
                    ),
                    secret_bytes: signing.to_bytes().to_vec(),
                })
            }
            KeyAlgorithm::X25519 => {
                let secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
                let public = x25519_dalek::PublicKey::from(&secret);
                Ok(Self {
                    algorithm,
                    public: PublicKey::new(algorithm, public.as_bytes().to_vec()),
                    secret_bytes: secret.to_bytes().to_vec(),
                })
            }
        }
    }

    pub fn from_secret_bytes(
        algorithm: KeyAlgorithm,
        bytes: &[u8],
    ) -> Result<Self, CryptoError> {
        match algorithm {
            KeyAlgorithm::Ed25519 => {
                let arr: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| CryptoError::InvalidKey("ed25519 secret must be 32 bytes".into()))?;
                let signing = SigningKey::from_bytes(&arr);
                Ok(Self {
                    algorithm,
                    public: PublicKey::new(
                        algorithm,
                        signing.verifying_key().to_bytes().to_vec(),
                    ),
                    secret_bytes: arr.to_vec(),
                })
            }
            KeyAlgorithm::Secp256k1 => {
                let signing = Secp256k1SigningKey::from_slice(bytes)
                    .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
                Ok(Self {
                    algorithm,
                    public: PublicKey::new(
                        algorithm,
                        signing
                            .verifying_key()
                            .to_encoded_point(true)
                            .as_bytes()
                            .to_vec(),
                    ),
                    secret_bytes: bytes.to_vec(),
                })
            }
            KeyAlgorithm::X25519 => {
                let arr: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| CryptoError::InvalidKey("x25519 secret must be 32 bytes".into()))?;
                let secret = x25519_dalek::StaticSecret::from(arr);
                let public = x25519_dalek::PublicKey::from(&secret);
                Ok(Self {
                    algorithm,
                    public: PublicKey::new(algorithm, public.as_bytes().to_vec()),
                    secret_bytes: arr.to_vec(),
                })
            }
        }
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    pub fn secret_bytes(&self) -> &[u8] {
        &self.secret_bytes
    }

    /// Sign `message`.
    ///
    /// Ed25519 returns the raw 64-byte signature. secp256k1 hashes the
    /// message with Keccak-256 and returns 65 bytes r‖s‖v with v ∈ {27, 28}.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match self.algorithm {
            KeyAlgorithm::Ed25519 => {
                let arr: [u8; 32] = self.secret_bytes.as_slice().try_into().expect("checked len");
                Ok(SigningKey::from_bytes(&arr).sign(message).to_bytes().to_vec())
            }
            KeyAlgorithm::Secp256k1 => {
                let signing = Secp256k1SigningKey::from_slice(&self.secret_bytes)
                    .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
                let digest = Keccak256::digest(message);
                let (sig, recid) = signing
                    .sign_prehash_recoverable(&digest)
                    .map_err(|_| CryptoError::InvalidKey("secp256k1 signing failed".into()))?;
                let mut out = sig.to_bytes().to_vec();
                out.push(recid.to_byte() + 27);
                Ok(out)
            }
            KeyAlgorithm::X25519 => Err(CryptoError::UnsupportedAlgorithm(
                "x25519 keys cannot sign".into(),
            )),
        }
    }

    /// Ethereum-style address of a secp256k1 keypair:
    /// last 20 bytes of Keccak-256 over the uncompressed point (without the
    /// 0x04 prefix), hex with 0x prefix.
    pub fn ethereum_address(&self) -> Result<String, CryptoError> {
        if self.algorithm != KeyAlgorithm::Secp256k1 {
            return Err(CryptoError::UnsupportedAlgorithm(
                "addresses are derived from secp256k1 keys".into(),
            ));
        }
        let signing = Secp256k1SigningKey::from_slice(&self.secret_bytes)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(address_of(signing.verifying_key()))
    }
}

fn verify_ed25519(public: &[u8], message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
    let key_arr: [u8; 32] = public
        .try_into()
        .map_err(|_| CryptoError::InvalidPublicKey("ed25519 key must be 32 bytes".into()))?;
    let vk = VerifyingKey::from_bytes(&key_arr)
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
    let sig_arr: [u8; 64] = signature
        .try_into()
        .map_err(|_| CryptoError::InvalidSignature)?;
    vk.verify_strict(message, &EdSignature::from_bytes(&sig_arr))
        .map_err(|_| CryptoError::InvalidSignature)
}

fn verify_secp256k1(public: &[u8], message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
    let vk = parse_secp256k1_public(public)?;
    if signature.len() != 64 && signature.len() != 65 {
        return Err(CryptoError::InvalidSignature);
    }
    let sig = EcdsaSignature::from_slice(&signature[..64])
        .map_err(|_| CryptoError::InvalidSignature)?;
    let digest = Keccak256::digest(message);
    vk.verify_prehash(&digest, &sig)
        .map_err(|_| CryptoError::InvalidSignature)
}

/// Accepts SEC1 compressed (33 B), SEC1 uncompressed (65 B, 0x04 prefix) and
/// raw 64-byte X‖Y encodings. Registries that store raw 64-byte keys avoid
/// on-chain decompression cost.
pub fn parse_secp256k1_public(bytes: &[u8]) -> Result<Secp256k1VerifyingKey, CryptoError> {
    let sec1: Vec<u8> = match bytes.len() {
        33 | 65 => bytes.to_vec(),
        64 => {
            let mut v = Vec::with_capacity(65);
            v.push(0x04);
            v.extend_from_slice(bytes);
            v
        }
        n => {
            return Err(CryptoError::InvalidPublicKey(format!(
                "secp256k1 key must be 33, 64 or 65 bytes, got {n}"
            )))
        }
    };
    Secp256k1VerifyingKey::from_sec1_bytes(&sec1)
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}

/// Recover the Ethereum address that produced a 65-byte r‖s‖v signature over
/// the Keccak-256 digest of `message`. Mirrors on-chain `ecrecover`.
pub fn recover_ethereum_address(message: &[u8], signature: &[u8]) -> Result<String, CryptoError> {
    if signature.len() != 65 {
        return Err(CryptoError::InvalidSignature);
    }
    let sig = EcdsaSignature::from_slice(&signature[..64])
        .map_err(|_| CryptoError::InvalidSignature)?;
    let v = signature[64];
    let recid = RecoveryId::from_byte(if v >= 27 { v - 27 } else { v })
        .ok_or(CryptoError::InvalidSignature)?;
    let digest = Keccak256::digest(message);
    let vk = Secp256k1VerifyingKey::recover_from_prehash(&digest, &sig, recid)
        .map_err(|_| CryptoError::InvalidSignature)?;
    Ok(address_of(&vk))
}

fn address_of(vk: &Secp256k1VerifyingKey) -> String {
    let point = vk.to_encoded_point(false);
    let hash = Keccak256::digest(&point.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ed25519_sign_verify_roundtrip() {
        let kp = KeyPair::generate(KeyAlgorithm::Ed25519).unwrap();
        let msg = b"agent handshake invitation";
        let sig = kp.sign(msg).unwrap();
        assert_eq!(sig.len(), 64);
        kp.public().verify(msg, &sig).unwrap();
    }

    #[test]
    fn ed25519_rejects_bit_flips() {
        let kp = KeyPair::generate(KeyAlgorithm::Ed25519).unwrap();
        let msg = b"agent handshake invitation";
        let sig = kp.sign(msg).unwrap();

        let mut bad_msg = msg.to_vec();
        bad_msg[0] ^= 0x01;
        assert!(matches!(
            kp.public().verify(&bad_msg, &sig),
            Err(CryptoError::InvalidSignature)
        ));

        let mut bad_sig = sig.clone();
        bad_sig[10] ^= 0x01;
        assert!(matches!(
            kp.public().verify(msg, &bad_sig),
            Err(CryptoError::InvalidSignature)
        ));
    }

    #[test]
    fn secp256k1_sign_verify_roundtrip() {
        let kp = KeyPair::generate(KeyAlgorithm::Secp256k1).unwrap();
        let msg = b"register agent did:sage:ethereum:0xabc";
        let sig = kp.sign(msg).unwrap();
        assert_eq!(sig.len(), 65);
        kp.public().verify(msg, &sig).unwrap();
    }

    #[test]
    fn secp256k1_accepts_all_public_encodings() {
        let kp = KeyPair::generate(KeyAlgorithm::Secp256k1).unwrap();
        let msg = b"encoding test";
        let sig = kp.sign(msg).unwrap();

        let compressed = kp.public().bytes.clone();
        assert_eq!(compressed.len(), 33);
        let vk = parse_secp256k1_public(&compressed).unwrap();
        let uncompressed = vk.to_encoded_point(false).as_bytes().to_vec();
        assert_eq!(uncompressed.len(), 65);
        let raw = uncompressed[1..].to_vec();
        assert_eq!(raw.len(), 64);

        for encoding in [compressed, uncompressed, raw] {
            PublicKey::new(KeyAlgorithm::Secp256k1, encoding)
                .verify(msg, &sig)
                .unwrap();
        }
    }

    #[test]
    fn secp256k1_recover_matches_signer_address() {
        let kp = KeyPair::generate(KeyAlgorithm::Secp256k1).unwrap();
        let msg = b"ownership proof";
        let sig = kp.sign(msg).unwrap();
        let recovered = recover_ethereum_address(msg, &sig).unwrap();
        assert_eq!(recovered, kp.ethereum_address().unwrap());
    }

    #[test]
    fn x25519_generates_but_cannot_sign() {
        let kp = KeyPair::generate(KeyAlgorithm::X25519).unwrap();
        assert_eq!(kp.public().bytes.len(), 32);
        assert!(matches!(
            kp.sign(b"anything"),
            Err(CryptoError::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(
            kp.public().verify(b"m", &[0u8; 64]),
            Err(CryptoError::UnsupportedAlgorithm(_))
        ));
    }
}
