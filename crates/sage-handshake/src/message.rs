//! Handshake message envelopes.
//!
//! Every protocol message is a versioned envelope signed by the sender's
//! identity key. The canonical signing bytes are the deterministic JSON of
//! the envelope with keys sorted alphabetically and the signature field
//! empty; this encoding is part of protocol version 1. Binary fields ride
//! as base64url (no padding).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use sage_crypto::{KeyAlgorithm, PublicKey};

use crate::error::HandshakeError;

pub const PROTOCOL_VERSION: u32 = 1;

/// Context ids and nonces are 16 random bytes.
pub const CONTEXT_ID_LEN: usize = 16;
pub const NONCE_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Invitation,
    Request,
    Response,
    Complete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u32,
    pub message_type: MessageType,
    /// Chosen by the initiator, echoed unchanged (base64url).
    pub context_id: String,
    pub from_did: String,
    pub to_did: String,
    /// Unix seconds at the sender.
    pub timestamp: i64,
    /// Fresh 16-byte random per message (base64url).
    pub nonce: String,
    /// Type-specific payload.
    pub payload: Value,
    /// Sender identity signature over [`Envelope::canonical_bytes`]
    /// (base64url).
    pub signature: String,
}

impl Envelope {
    pub fn build(
        message_type: MessageType,
        context_id: &[u8],
        from_did: &str,
        to_did: &str,
        payload: Value,
    ) -> Self {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        Self {
            version: PROTOCOL_VERSION,
            message_type,
            context_id: URL_SAFE_NO_PAD.encode(context_id),
            from_did: from_did.to_string(),
            to_did: to_did.to_string(),
            timestamp: Utc::now().timestamp(),
            nonce: URL_SAFE_NO_PAD.encode(nonce),
            payload,
            signature: String::new(),
        }
    }

    /// Deterministic signing bytes: JSON with alphabetically ordered keys
    /// and an empty signature field.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, HandshakeError> {
        let value = serde_json::json!({
            "context_id": self.context_id,
            "from_did": self.from_did,
            "message_type": self.message_type,
            "nonce": self.nonce,
            "payload": self.payload,
            "signature": "",
            "timestamp": self.timestamp,
            "to_did": self.to_did,
            "version": self.version,
        });
        serde_json::to_vec(&value).map_err(|e| HandshakeError::Malformed(e.to_string()))
    }

    pub fn sign_with(&mut self, identity: &crate::identity::AgentIdentity) -> Result<(), HandshakeError> {
        let bytes = self.canonical_bytes()?;
        self.signature = URL_SAFE_NO_PAD.encode(identity.sign(&bytes)?);
        Ok(())
    }

    /// Verify the envelope signature against the sender's registry key.
    pub fn verify_signature(
        &self,
        algorithm: KeyAlgorithm,
        public_key: &[u8],
    ) -> Result<(), HandshakeError> {
        let bytes = self.canonical_bytes()?;
        let signature = URL_SAFE_NO_PAD
            .decode(&self.signature)
            .map_err(|_| HandshakeError::InvalidSignature)?;
        PublicKey::new(algorithm, public_key.to_vec())
            .verify(&bytes, &signature)
            .map_err(|_| HandshakeError::InvalidSignature)
    }

    pub fn encode(&self) -> Result<Vec<u8>, HandshakeError> {
        serde_json::to_vec(self).map_err(|e| HandshakeError::Malformed(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, HandshakeError> {
        let envelope: Envelope = serde_json::from_slice(bytes)
            .map_err(|e| HandshakeError::Malformed(e.to_string()))?;
        if envelope.version != PROTOCOL_VERSION {
            return Err(HandshakeError::UnsupportedVersion(envelope.version));
        }
        Ok(envelope)
    }

    pub fn context_id_bytes(&self) -> Result<Vec<u8>, HandshakeError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(&self.context_id)
            .map_err(|_| HandshakeError::Malformed("bad context id encoding".into()))?;
        if bytes.len() < CONTEXT_ID_LEN {
            return Err(HandshakeError::Malformed("context id too short".into()));
        }
        Ok(bytes)
    }

    pub fn nonce_bytes(&self) -> Result<Vec<u8>, HandshakeError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(&self.nonce)
            .map_err(|_| HandshakeError::Malformed("bad nonce encoding".into()))?;
        if bytes.len() < NONCE_LEN {
            return Err(HandshakeError::Malformed("nonce too short".into()));
        }
        Ok(bytes)
    }

    /// Reject timestamps outside the skew window.
    pub fn check_timestamp(&self, max_skew: std::time::Duration) -> Result<(), HandshakeError> {
        let skew = (Utc::now().timestamp() - self.timestamp).unsigned_abs();
        if skew > max_skew.as_secs() {
            return Err(HandshakeError::TimestampOutOfRange);
        }
        Ok(())
    }
}

// ── Type-specific payloads ───────────────────────────────────────────────────

/// Invitation: announce intent; no key material yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvitationPayload {
    /// Identity key algorithm hint so the responder resolves the right key.
    pub key_algorithm: KeyAlgorithm,
    /// Verification method id within the sender's DID document.
    pub key_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Value>,
}

/// Request: the initiator's ephemeral. When request encryption is enabled
/// the whole payload is replaced by `{"sealed": <hpke packet>}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPayload {
    /// Initiator ephemeral X25519 public key (base64url).
    pub ephemeral_public: String,
}

/// Response: the responder's ephemeral plus an HPKE confirmation sealed to
/// the initiator's ephemeral, proving the responder derived the secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsePayload {
    pub ephemeral_public: String,
    /// HPKE packet (base64url); plaintext is the raw context id.
    pub confirmation: String,
}

/// Complete: the initiator's key-confirmation tag,
/// `HMAC-SHA256(shared, "complete" ‖ context_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletePayload {
    pub confirmation_tag: String,
}

/// Transport-level reply to Invitation and Complete. Not part of the signed
/// protocol; acceptance is only meaningful because the messages that follow
/// are signed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Ack {
    Accepted,
    Rejected { reason: String },
    Complete,
}

impl Ack {
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("ack serialization is infallible")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, HandshakeError> {
        serde_json::from_slice(bytes).map_err(|e| HandshakeError::Malformed(e.to_string()))
    }
}

pub fn decode_payload<T: serde::de::DeserializeOwned>(value: &Value) -> Result<T, HandshakeError> {
    serde_json::from_value(value.clone()).map_err(|e| HandshakeError::Malformed(e.to_string()))
}

pub fn b64_decode(field: &str, value: &str) -> Result<Vec<u8>, HandshakeError> {
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|_| HandshakeError::Malformed(format!("bad base64 in {field}")))
}

pub fn b64_encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}
