//! Hybrid Public Key Encryption (RFC 9180).
//!
//! Fixed suite: DHKEM(X25519, HKDF-SHA256) + HKDF-SHA256 + ChaCha20-Poly1305,
//! base mode. Used by the handshake to bind a confirmation blob to the
//! freshly agreed secret, and to bootstrap-encrypt the first Request when
//! configured. Both sides additionally export a secret from the HPKE context
//! so the channel binding can feed key derivation.
//!
//! Packet layout: `enc (32 bytes) ‖ ciphertext+tag`.

use hpke::{
    aead::ChaCha20Poly1305, kdf::HkdfSha256, kem::X25519HkdfSha256, Deserializable,
    Kem as KemTrait, OpModeR, OpModeS, Serializable,
};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::error::CryptoError;

type Kem = X25519HkdfSha256;

/// Encapsulated-key length for DHKEM(X25519).
pub const ENC_LEN: usize = 32;

/// Seal `plaintext` to `peer_public` (raw X25519, 32 bytes).
///
/// Returns the wire packet (`enc ‖ ciphertext`) and the exporter secret of
/// length `export_len` bound to `export_ctx`.
pub fn seal(
    peer_public: &[u8],
    info: &[u8],
    aad: &[u8],
    plaintext: &[u8],
    export_ctx: &[u8],
    export_len: usize,
) -> Result<(Vec<u8>, Zeroizing<Vec<u8>>), CryptoError> {
    let pk = <Kem as KemTrait>::PublicKey::from_bytes(peer_public)
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
    let (encapped, mut ctx) = hpke::setup_sender::<ChaCha20Poly1305, HkdfSha256, Kem, _>(
        &OpModeS::Base,
        &pk,
        info,
        &mut OsRng,
    )
    .map_err(|e| CryptoError::Hpke(e.to_string()))?;

    let ciphertext = ctx
        .seal(plaintext, aad)
        .map_err(|e| CryptoError::Hpke(e.to_string()))?;

    let mut exporter = Zeroizing::new(vec![0u8; export_len]);
    ctx.export(export_ctx, &mut exporter)
        .map_err(|e| CryptoError::Hpke(e.to_string()))?;

    let mut packet = Vec::with_capacity(ENC_LEN + ciphertext.len());
    packet.extend_from_slice(&encapped.to_bytes());
    packet.extend_from_slice(&ciphertext);
    Ok((packet, exporter))
}

/// Open a packet produced by [`seal`] with the recipient's X25519 secret.
pub fn open(
    my_secret: &[u8],
    packet: &[u8],
    info: &[u8],
    aad: &[u8],
    export_ctx: &[u8],
    export_len: usize,
) -> Result<(Zeroizing<Vec<u8>>, Zeroizing<Vec<u8>>), CryptoError> {
    if packet.len() < ENC_LEN {
        return Err(CryptoError::DecryptFailed);
    }
    let (enc_bytes, ciphertext) = packet.split_at(ENC_LEN);

    let sk = <Kem as KemTrait>::PrivateKey::from_bytes(my_secret)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let encapped = <Kem as KemTrait>::EncappedKey::from_bytes(enc_bytes)
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;

    let mut ctx = hpke::setup_receiver::<ChaCha20Poly1305, HkdfSha256, Kem>(
        &OpModeR::Base,
        &sk,
        &encapped,
        info,
    )
    .map_err(|e| CryptoError::Hpke(e.to_string()))?;

    let plaintext = Zeroizing::new(
        ctx.open(ciphertext, aad)
            .map_err(|_| CryptoError::DecryptFailed)?,
    );

    let mut exporter = Zeroizing::new(vec![0u8; export_len]);
    ctx.export(export_ctx, &mut exporter)
        .map_err(|e| CryptoError::Hpke(e.to_string()))?;

    Ok((plaintext, exporter))
}

/// Generate an X25519 keypair in the KEM's encoding (secret, public).
pub fn generate_keypair() -> ([u8; 32], [u8; 32]) {
    let (sk, pk) = Kem::gen_keypair(&mut OsRng);
    let mut secret = [0u8; 32];
    secret.copy_from_slice(&sk.to_bytes());
    let mut public = [0u8; 32];
    public.copy_from_slice(&pk.to_bytes());
    (secret, public)
}
