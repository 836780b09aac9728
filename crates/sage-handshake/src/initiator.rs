//! The initiating side of the handshake.
//!
//! `initiate` drives all four phases against one peer: resolve and pin the
//! peer's identity key, announce with Invitation, send the ephemeral in
//! Request, verify the signed Response (recomputing the shared secret and
//! opening the HPKE confirmation), then prove key possession with Complete.
//! Success registers an initiator-role session with the manager; any
//! failure drops the ephemeral (zeroized) and surfaces a typed reason.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use sage_crypto::{hpke, x25519, EphemeralKeyPair, KeyAlgorithm};
use sage_did::{Did, Resolver};
use sage_session::{Role, SecureSession, SessionHandle, SessionManager};

use crate::{
    config::HandshakeConfig,
    error::HandshakeError,
    identity::AgentIdentity,
    key_schedule,
    message::{
        b64_decode, b64_encode, decode_payload, Ack, CompletePayload, Envelope, InvitationPayload,
        MessageType, RequestPayload, ResponsePayload, CONTEXT_ID_LEN,
    },
    nonce_cache::NonceCache,
    transport::Transport,
};

pub(crate) const CONFIRM_INFO: &[u8] = b"sage/handshake/confirm";
pub(crate) const REQUEST_INFO: &[u8] = b"sage/handshake/request";

/// A session freshly agreed with a peer, already owned by the manager.
pub struct EstablishedSession {
    pub session_id: String,
    pub handle: SessionHandle,
}

impl std::fmt::Debug for EstablishedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EstablishedSession")
            .field("session_id", &self.session_id)
            .finish()
    }
}

pub struct Initiator {
    identity: Arc<AgentIdentity>,
    resolver: Arc<Resolver>,
    manager: Arc<SessionManager>,
    nonces: NonceCache,
    config: HandshakeConfig,
}

impl Initiator {
    pub fn new(
        identity: Arc<AgentIdentity>,
        resolver: Arc<Resolver>,
        manager: Arc<SessionManager>,
        config: HandshakeConfig,
    ) -> Self {
        let nonces = NonceCache::new(config.nonce_cache_capacity, config.nonce_cache_ttl);
        Self {
            identity,
            resolver,
            manager,
            nonces,
            config,
        }
    }

    /// Run a full handshake with `peer` over `transport`.
    pub async fn initiate(
        &self,
        peer: &Did,
        transport: &dyn Transport,
    ) -> Result<EstablishedSession, HandshakeError> {
        match tokio::time::timeout(self.config.overall_timeout, self.run(peer, transport)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(peer = %peer, "handshake exceeded the overall deadline");
                Err(HandshakeError::Timeout)
            }
        }
    }

    async fn run(
        &self,
        peer: &Did,
        transport: &dyn Transport,
    ) -> Result<EstablishedSession, HandshakeError> {
        let local_did = self.identity.did.to_string();
        let peer_did = peer.to_string();

        // Pin the peer's identity material before the first message.
        let peer_doc = self.resolver.resolve(peer).await?;
        if !peer_doc.active {
            return Err(sage_did::DidError::Deactivated(peer_did).into());
        }
        let pinned_key = peer_doc.public_key(KeyAlgorithm::Ed25519)?.to_vec();
        let endpoint = peer_doc
            .endpoint()
            .ok_or_else(|| HandshakeError::StateMismatch("peer record has no endpoint".into()))?
            .to_string();

        let context_id: [u8; CONTEXT_ID_LEN] = {
            use rand::RngCore;
            let mut id = [0u8; CONTEXT_ID_LEN];
            rand::rngs::OsRng.fill_bytes(&mut id);
            id
        };
        debug!(peer = %peer_did, context = %hex::encode(context_id), "handshake start");

        // ── Phase 1: Invitation ─────────────────────────────────────────
        let invitation = InvitationPayload {
            key_algorithm: self.identity.algorithm(),
            key_id: format!("{local_did}#keys-1"),
            capabilities: None,
        };
        let mut envelope = Envelope::build(
            MessageType::Invitation,
            &context_id,
            &local_did,
            &peer_did,
            serde_json::to_value(invitation)
                .map_err(|e| HandshakeError::Malformed(e.to_string()))?,
        );
        envelope.sign_with(&self.identity)?;
        let reply = self
            .roundtrip(transport, &endpoint, &envelope, self.config.phase_timeout)
            .await?;
        match Ack::decode(&reply)? {
            Ack::Accepted => {}
            Ack::Rejected { reason } => return Err(HandshakeError::PeerRejected(reason)),
            Ack::Complete => {
                return Err(HandshakeError::StateMismatch(
                    "unexpected completion ack to an invitation".into(),
                ))
            }
        }

        // ── Phase 2: Request ────────────────────────────────────────────
        let ephemeral = EphemeralKeyPair::generate();
        let request = RequestPayload {
            ephemeral_public: b64_encode(&ephemeral.public_bytes()),
        };
        let payload: Value = if self.config.encrypt_request {
            // Bootstrap confidentiality: seal the payload to the responder's
            // X25519 key derived from its Ed25519 identity key.
            let ed_key: [u8; 32] = pinned_key
                .as_slice()
                .try_into()
                .map_err(|_| HandshakeError::InvalidSignature)?;
            let peer_x25519 = x25519::ed25519_public_to_x25519(&ed_key)?;
            let plaintext = serde_json::to_vec(&request)
                .map_err(|e| HandshakeError::Malformed(e.to_string()))?;
            let (packet, _) =
                hpke::seal(&peer_x25519, REQUEST_INFO, &context_id, &plaintext, b"", 0)?;
            serde_json::json!({ "sealed": b64_encode(&packet) })
        } else {
            serde_json::to_value(request).map_err(|e| HandshakeError::Malformed(e.to_string()))?
        };
        let mut envelope =
            Envelope::build(MessageType::Request, &context_id, &local_did, &peer_did, payload);
        envelope.sign_with(&self.identity)?;
        let reply = self
            .roundtrip(transport, &endpoint, &envelope, self.config.phase_timeout)
            .await?;

        // ── Phase 3: verify Response ────────────────────────────────────
        let response = Envelope::decode(&reply)?;
        if response.message_type != MessageType::Response {
            return Err(HandshakeError::StateMismatch(
                "expected a Response message".into(),
            ));
        }
        if response.context_id_bytes()? != context_id {
            return Err(HandshakeError::StateMismatch(
                "response context id does not match".into(),
            ));
        }
        if response.from_did != peer_did || response.to_did != local_did {
            return Err(HandshakeError::StateMismatch(
                "response addressing does not match".into(),
            ));
        }
        response.check_timestamp(self.config.max_clock_skew)?;
        self.nonces
            .observe(&response.from_did, &response.nonce_bytes()?)?;

        // Event-driven cache invalidation may have replaced the peer's key
        // mid-handshake; a changed key is an abort, not a re-pin.
        let current_key = self
            .resolver
            .resolve_public_key(peer, KeyAlgorithm::Ed25519)
            .await?;
        if current_key != pinned_key {
            return Err(HandshakeError::IdentityChanged);
        }
        response.verify_signature(KeyAlgorithm::Ed25519, &current_key)?;

        let payload: ResponsePayload = decode_payload(&response.payload)?;
        let peer_ephemeral: [u8; 32] = b64_decode("ephemeral_public", &payload.ephemeral_public)?
            .try_into()
            .map_err(|_| HandshakeError::Malformed("ephemeral key must be 32 bytes".into()))?;
        let shared = Zeroizing::new(ephemeral.diffie_hellman(&peer_ephemeral)?);

        // The confirmation proves the responder derived the same secret and
        // can reach our ephemeral.
        let confirmation = b64_decode("confirmation", &payload.confirmation)?;
        let (plaintext, _) = hpke::open(
            &ephemeral.secret_bytes(),
            &confirmation,
            CONFIRM_INFO,
            &context_id,
            b"",
            0,
        )?;
        if plaintext.as_slice() != context_id.as_slice() {
            return Err(HandshakeError::ConfirmationMismatch);
        }

        // ── Phase 4: Complete ───────────────────────────────────────────
        let tag = key_schedule::complete_tag(&shared, &context_id);
        let complete = CompletePayload {
            confirmation_tag: b64_encode(&tag),
        };
        let mut envelope = Envelope::build(
            MessageType::Complete,
            &context_id,
            &local_did,
            &peer_did,
            serde_json::to_value(complete).map_err(|e| HandshakeError::Malformed(e.to_string()))?,
        );
        envelope.sign_with(&self.identity)?;
        let reply = self
            .roundtrip(transport, &endpoint, &envelope, self.config.phase_timeout)
            .await?;
        if !matches!(Ack::decode(&reply)?, Ack::Complete) {
            return Err(HandshakeError::StateMismatch(
                "peer did not acknowledge completion".into(),
            ));
        }

        let seed = key_schedule::derive_session_seed(
            &context_id,
            &ephemeral.public_bytes(),
            &peer_ephemeral,
            &shared,
        );
        let session = SecureSession::new(
            seed,
            Role::Initiator,
            local_did,
            peer_did.clone(),
            self.config.session.clone(),
        )?;
        let session_id = session.session_id().to_string();
        let handle = self.manager.add(session);
        info!(peer = %peer_did, session_id = %session_id, "handshake complete");
        Ok(EstablishedSession { session_id, handle })
    }

    async fn roundtrip(
        &self,
        transport: &dyn Transport,
        endpoint: &str,
        envelope: &Envelope,
        deadline: Duration,
    ) -> Result<Vec<u8>, HandshakeError> {
        let bytes = envelope.encode()?;
        match tokio::time::timeout(deadline, transport.send(endpoint, &bytes)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(HandshakeError::Timeout),
        }
    }
}
