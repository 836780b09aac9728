//! Authenticated encryption with associated data.
//!
//! ChaCha20-Poly1305 (RFC 8439). Key: 32 bytes. Nonce: 12 bytes, supplied by
//! the caller (the session layer uses counter nonces). Tag: 16 bytes,
//! appended to the ciphertext.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use zeroize::Zeroizing;

use crate::error::CryptoError;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// AEAD instance bound to one key. Construct once per direction, reuse for
/// every record in that direction.
pub struct AeadKey {
    cipher: ChaCha20Poly1305,
}

impl AeadKey {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new_from_slice(key).expect("32-byte key"),
        }
    }

    /// Encrypt; returns `ciphertext ‖ tag`.
    pub fn seal(
        &self,
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        self.cipher
            .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
            .map_err(|_| CryptoError::EncryptFailed)
    }

    /// Decrypt `ciphertext ‖ tag`; fails on any tag mismatch.
    pub fn open(
        &self,
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        if ciphertext.len() < TAG_LEN {
            return Err(CryptoError::DecryptFailed);
        }
        self.cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::DecryptFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let key = AeadKey::new(&[7u8; 32]);
        let nonce = [1u8; NONCE_LEN];
        let ct = key.seal(&nonce, b"aad", b"hello").unwrap();
        assert_eq!(ct.len(), 5 + TAG_LEN);
        let pt = key.open(&nonce, b"aad", &ct).unwrap();
        assert_eq!(&pt[..], b"hello");
    }

    #[test]
    fn open_rejects_wrong_aad() {
        let key = AeadKey::new(&[7u8; 32]);
        let nonce = [1u8; NONCE_LEN];
        let ct = key.seal(&nonce, b"aad", b"hello").unwrap();
        assert!(matches!(
            key.open(&nonce, b"other", &ct),
            Err(CryptoError::DecryptFailed)
        ));
    }

    #[test]
    fn open_rejects_tampered_ciphertext() {
        let key = AeadKey::new(&[7u8; 32]);
        let nonce = [1u8; NONCE_LEN];
        let mut ct = key.seal(&nonce, b"aad", b"hello").unwrap();
        ct[0] ^= 0x01;
        assert!(key.open(&nonce, b"aad", &ct).is_err());
    }
}
