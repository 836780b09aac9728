//! sage-crypto — SAGE cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - Algorithm details stay behind the `KeyPair` facade; callers never touch
//!   dalek or k256 types directly.
//!
//! # Module layout
//! - `keys`   — identity keypairs (Ed25519, secp256k1), sign/verify
//! - `x25519` — ephemeral keypairs, Diffie-Hellman, Ed25519→X25519 conversion
//! - `hpke`   — RFC 9180 seal/open with exporter secrets
//! - `kdf`    — HKDF-SHA256 extract/expand, HMAC-SHA256
//! - `aead`   — ChaCha20-Poly1305 encrypt/decrypt helpers
//! - `error`  — unified error type

pub mod aead;
pub mod error;
pub mod hpke;
pub mod kdf;
pub mod keys;
pub mod x25519;

pub use error::CryptoError;
pub use keys::{KeyAlgorithm, KeyPair, PublicKey};
pub use x25519::EphemeralKeyPair;
