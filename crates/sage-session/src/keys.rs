//! The session key schedule.
//!
//! Both handshake roles end up with the same 32-byte session seed. From it:
//!
//! ```text
//! key_{d,p}   = HKDF-Expand(seed, "<d>|<p>|v1", 32)        d ∈ {c2s, s2c}, p ∈ {enc, auth}
//! session_id  = base58(HKDF-Expand(seed, "session-id-v1", 16))
//! salt_d      = HKDF-Expand(seed, "nonce-salt|<d>", 4)
//! rekey step n > 0 replaces the info with "rekey|<n>|<d>|<p>"
//! ```
//!
//! The initiator sends with the c2s keys and receives with s2c; the
//! responder is mirrored. Seeds are unique per handshake, so directional
//! keys are never shared across sessions.

use sage_crypto::{kdf, CryptoError};
use zeroize::ZeroizeOnDrop;

/// Seed agreed during the handshake. Never persisted, cleared on drop.
#[derive(ZeroizeOnDrop)]
pub struct SessionSeed([u8; 32]);

impl SessionSeed {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Derive the session identifier: 16 raw bytes (used as AAD prefix) and
    /// its base58 form (used as the table key).
    pub fn session_id(&self) -> Result<([u8; 16], String), CryptoError> {
        let mut raw = [0u8; 16];
        kdf::hkdf_expand(&self.0, b"session-id-v1", &mut raw)?;
        Ok((raw, bs58::encode(raw).into_string()))
    }

    /// Directional key set for rekey step `step` (0 = initial keys).
    pub fn directional_keys(&self, step: u32) -> Result<DirectionalKeys, CryptoError> {
        let mut keys = DirectionalKeys::default();
        for (slot, direction, purpose) in [
            (0usize, "c2s", "enc"),
            (1, "c2s", "auth"),
            (2, "s2c", "enc"),
            (3, "s2c", "auth"),
        ] {
            let info = if step == 0 {
                format!("{direction}|{purpose}|v1")
            } else {
                format!("rekey|{step}|{direction}|{purpose}")
            };
            let key = match slot {
                0 => &mut keys.c2s_enc,
                1 => &mut keys.c2s_auth,
                2 => &mut keys.s2c_enc,
                _ => &mut keys.s2c_auth,
            };
            kdf::hkdf_expand(&self.0, info.as_bytes(), key)?;
        }
        Ok(keys)
    }

    /// 4-byte nonce salt for one direction.
    pub fn nonce_salt(&self, direction: &str) -> Result<[u8; 4], CryptoError> {
        let mut salt = [0u8; 4];
        kdf::hkdf_expand(&self.0, format!("nonce-salt|{direction}").as_bytes(), &mut salt)?;
        Ok(salt)
    }
}

/// The four per-direction keys. Cleared on drop.
#[derive(Default, ZeroizeOnDrop)]
pub struct DirectionalKeys {
    pub c2s_enc: [u8; 32],
    pub c2s_auth: [u8; 32],
    pub s2c_enc: [u8; 32],
    pub s2c_auth: [u8; 32],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic_and_direction_separated() {
        let seed = SessionSeed::new([42u8; 32]);
        let a = seed.directional_keys(0).unwrap();
        let b = seed.directional_keys(0).unwrap();
        assert_eq!(a.c2s_enc, b.c2s_enc);
        assert_eq!(a.s2c_auth, b.s2c_auth);
        assert_ne!(a.c2s_enc, a.s2c_enc);
        assert_ne!(a.c2s_enc, a.c2s_auth);
    }

    #[test]
    fn rekey_steps_produce_fresh_keys() {
        let seed = SessionSeed::new([42u8; 32]);
        let step0 = seed.directional_keys(0).unwrap();
        let step1 = seed.directional_keys(1).unwrap();
        let step2 = seed.directional_keys(2).unwrap();
        assert_ne!(step0.c2s_enc, step1.c2s_enc);
        assert_ne!(step1.c2s_enc, step2.c2s_enc);
    }

    #[test]
    fn session_id_is_stable_for_a_seed() {
        let seed = SessionSeed::new([7u8; 32]);
        let (raw_a, id_a) = seed.session_id().unwrap();
        let (raw_b, id_b) = seed.session_id().unwrap();
        assert_eq!(raw_a, raw_b);
        assert_eq!(id_a, id_b);

        let other = SessionSeed::new([8u8; 32]);
        let (_, id_c) = other.session_id().unwrap();
        assert_ne!(id_a, id_c);
    }
}
