//! One established session.
//!
//! # Wire format
//!
//! `12-byte nonce ‖ ciphertext ‖ 16-byte tag`, where the nonce is the
//! 4-byte direction salt followed by the 8-byte big-endian send sequence.
//! Counter nonces are the documented choice for this implementation: the
//! replay window already tracks sequence numbers, so the wire stays
//! self-describing and nonce uniqueness per key falls out of sequence
//! monotonicity. AAD on every record is
//! `session_id (16 raw bytes) ‖ seq (8 bytes BE) ‖ caller AAD`.
//!
//! # Rekey
//!
//! `rekey` swaps both directions to the next key-schedule step. The send
//! sequence is never reset, so nonces stay unique under every key. Because
//! the wire carries no key epoch, decryption tolerates one step of skew:
//! a record that fails under the current inbound key is tried under the
//! previous step (late records) and the next step (peer rekeyed first; on
//! success this side advances too).

use std::time::Instant;

use tracing::debug;
use zeroize::Zeroize;

use sage_crypto::aead::{AeadKey, NONCE_LEN, TAG_LEN};

use crate::{
    config::SessionConfig,
    error::SessionError,
    keys::SessionSeed,
    replay::ReplayWindow,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Expiring,
    Closed,
}

pub struct SecureSession {
    session_id: String,
    session_id_bytes: [u8; 16],
    local_did: String,
    remote_did: String,
    role: Role,
    seed: SessionSeed,

    rekey_step: u32,
    outbound: AeadKey,
    inbound: AeadKey,
    /// Previous-step inbound key, kept one step for late records.
    prev_inbound: Option<AeadKey>,
    outbound_salt: [u8; 4],
    inbound_salt: [u8; 4],

    send_seq: u64,
    recv_window: ReplayWindow,

    created_at: Instant,
    last_used_at: Instant,
    last_rekey_at: Instant,
    message_count: u64,
    records_since_rekey: u64,

    config: SessionConfig,
    state: SessionState,
}

impl SecureSession {
    pub fn new(
        seed: SessionSeed,
        role: Role,
        local_did: String,
        remote_did: String,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let (session_id_bytes, session_id) = seed.session_id()?;
        let (outbound, inbound) = Self::aeads_for(&seed, role, 0)?;
        let (outbound_salt, inbound_salt) = match role {
            Role::Initiator => (seed.nonce_salt("c2s")?, seed.nonce_salt("s2c")?),
            Role::Responder => (seed.nonce_salt("s2c")?, seed.nonce_salt("c2s")?),
        };

        let now = Instant::now();
        Ok(Self {
            session_id,
            session_id_bytes,
            local_did,
            remote_did,
            role,
            seed,
            rekey_step: 0,
            outbound,
            inbound,
            prev_inbound: None,
            outbound_salt,
            inbound_salt,
            send_seq: 0,
            recv_window: ReplayWindow::new(),
            created_at: now,
            last_used_at: now,
            last_rekey_at: now,
            message_count: 0,
            records_since_rekey: 0,
            config,
            state: SessionState::Active,
        })
    }

    /// Build the (outbound, inbound) AEAD pair for a key-schedule step.
    /// The initiator sends client-to-server.
    fn aeads_for(
        seed: &SessionSeed,
        role: Role,
        step: u32,
    ) -> Result<(AeadKey, AeadKey), SessionError> {
        let keys = seed.directional_keys(step)?;
        let pair = match role {
            Role::Initiator => (AeadKey::new(&keys.c2s_enc), AeadKey::new(&keys.s2c_enc)),
            Role::Responder => (AeadKey::new(&keys.s2c_enc), AeadKey::new(&keys.c2s_enc)),
        };
        Ok(pair)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn session_id_bytes(&self) -> &[u8; 16] {
        &self.session_id_bytes
    }

    pub fn local_did(&self) -> &str {
        &self.local_did
    }

    pub fn remote_did(&self) -> &str {
        &self.remote_did
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn send_seq(&self) -> u64 {
        self.send_seq
    }

    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    pub fn rekey_step(&self) -> u32 {
        self.rekey_step
    }

    /// Why this session should be closed, if any policy bound is exceeded.
    pub fn expiry_reason(&self) -> Option<ExpiryReason> {
        if self.state == SessionState::Closed {
            return None;
        }
        if self.created_at.elapsed() >= self.config.max_age {
            return Some(ExpiryReason::MaxAge);
        }
        if self.last_used_at.elapsed() >= self.config.idle_timeout {
            return Some(ExpiryReason::Idle);
        }
        if self.message_count >= self.config.max_messages {
            return Some(ExpiryReason::MessageLimit);
        }
        None
    }

    fn ensure_usable(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Closed {
            return Err(SessionError::SessionExpired);
        }
        if self.expiry_reason().is_some() {
            // Mark for the sweeper; the close event is the manager's job.
            self.state = SessionState::Expiring;
            return Err(SessionError::SessionExpired);
        }
        Ok(())
    }

    fn full_aad(&self, seq: u64, aad: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + 8 + aad.len());
        out.extend_from_slice(&self.session_id_bytes);
        out.extend_from_slice(&seq.to_be_bytes());
        out.extend_from_slice(aad);
        out
    }

    /// Encrypt one record. Sequence numbers are strictly monotone; the
    /// record is `nonce ‖ ciphertext ‖ tag`.
    pub fn encrypt(&mut self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, SessionError> {
        self.ensure_usable()?;
        if self.send_seq == u64::MAX {
            return Err(SessionError::SequenceExhausted);
        }
        if self.should_rekey() {
            self.rekey()?;
        }

        let seq = self.send_seq;
        let mut nonce = [0u8; NONCE_LEN];
        nonce[..4].copy_from_slice(&self.outbound_salt);
        nonce[4..].copy_from_slice(&seq.to_be_bytes());

        let ciphertext = self
            .outbound
            .seal(&nonce, &self.full_aad(seq, aad), plaintext)?;

        self.send_seq += 1;
        self.message_count += 1;
        self.records_since_rekey += 1;
        self.last_used_at = Instant::now();

        let mut wire = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        wire.extend_from_slice(&nonce);
        wire.extend_from_slice(&ciphertext);
        Ok(wire)
    }

    /// Decrypt one record, enforcing the replay window.
    pub fn decrypt(&mut self, wire: &[u8], aad: &[u8]) -> Result<Vec<u8>, SessionError> {
        self.ensure_usable()?;
        if wire.len() < NONCE_LEN + TAG_LEN {
            return Err(SessionError::MalformedRecord("record too short".into()));
        }
        let (nonce_bytes, ciphertext) = wire.split_at(NONCE_LEN);
        if nonce_bytes[..4] != self.inbound_salt {
            return Err(SessionError::MalformedRecord(
                "direction salt mismatch".into(),
            ));
        }
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(nonce_bytes);
        let seq = u64::from_be_bytes(nonce[4..].try_into().expect("8 bytes"));

        self.recv_window.check(seq)?;
        let full_aad = self.full_aad(seq, aad);

        let plaintext = match self.inbound.open(&nonce, &full_aad, ciphertext) {
            Ok(pt) => pt,
            Err(_) => self.open_with_step_skew(&nonce, &full_aad, ciphertext)?,
        };

        self.recv_window.mark(seq);
        self.message_count += 1;
        self.records_since_rekey += 1;
        self.last_used_at = Instant::now();
        Ok(plaintext.to_vec())
    }

    /// One step of rekey skew is tolerated in each direction.
    fn open_with_step_skew(
        &mut self,
        nonce: &[u8; NONCE_LEN],
        full_aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<zeroize::Zeroizing<Vec<u8>>, SessionError> {
        if let Some(prev) = &self.prev_inbound {
            if let Ok(pt) = prev.open(nonce, full_aad, ciphertext) {
                return Ok(pt);
            }
        }
        // Peer may have rekeyed first; on success, catch up.
        let (_, next_inbound) = Self::aeads_for(&self.seed, self.role, self.rekey_step + 1)?;
        match next_inbound.open(nonce, full_aad, ciphertext) {
            Ok(pt) => {
                self.rekey()?;
                Ok(pt)
            }
            Err(_) => Err(SessionError::DecryptFailed),
        }
    }

    fn should_rekey(&self) -> bool {
        self.records_since_rekey >= self.config.rekey_messages
            || self.last_rekey_at.elapsed() >= self.config.rekey_interval
    }

    /// Advance both directions to the next key-schedule step.
    pub fn rekey(&mut self) -> Result<(), SessionError> {
        let next = self.rekey_step + 1;
        let (outbound, inbound) = Self::aeads_for(&self.seed, self.role, next)?;
        self.prev_inbound = Some(std::mem::replace(&mut self.inbound, inbound));
        self.outbound = outbound;
        self.rekey_step = next;
        self.records_since_rekey = 0;
        self.last_rekey_at = Instant::now();
        debug!(session_id = %self.session_id, step = next, "session rekeyed");
        Ok(())
    }

    /// Zero the seed-derived state and refuse all further records.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
        self.prev_inbound = None;
        self.session_id_bytes.zeroize();
        // seed and directional keys zeroize when the session drops; the
        // AEAD instances are overwritten with throwaway keys here so the
        // closed session cannot be used even through a stale handle.
        self.outbound = AeadKey::new(&[0u8; 32]);
        self.inbound = AeadKey::new(&[0u8; 32]);
    }
}

/// Which lifecycle bound a session exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryReason {
    MaxAge,
    Idle,
    MessageLimit,
}
