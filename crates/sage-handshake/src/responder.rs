//! The accepting side of the handshake.
//!
//! The responder is transport-agnostic: the host application receives bytes
//! on whatever channel it serves and passes them to [`Responder::handle_message`],
//! sending the returned bytes back as the reply. One in-flight context per
//! `context_id`; a handshake is atomic, so any failure tears its context
//! down (ephemeral material zeroizes on drop) before the error surfaces.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use sage_crypto::{hpke, x25519, EphemeralKeyPair, KeyAlgorithm};
use sage_did::{Did, Resolver};
use sage_session::{Role, SecureSession, SessionManager};

use crate::{
    config::HandshakeConfig,
    error::HandshakeError,
    identity::AgentIdentity,
    initiator::{CONFIRM_INFO, REQUEST_INFO},
    key_schedule,
    message::{
        b64_decode, b64_encode, decode_payload, Ack, CompletePayload, Envelope, InvitationPayload,
        MessageType, RequestPayload, ResponsePayload,
    },
    nonce_cache::NonceCache,
};

/// Application veto over incoming invitations.
pub type AcceptPolicy = dyn Fn(&Did, &InvitationPayload) -> Result<(), String> + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    InvitationReceived,
    ResponseSent,
}

struct HandshakeContext {
    peer_did: Did,
    peer_key_algorithm: KeyAlgorithm,
    pinned_key: Vec<u8>,
    phase: Phase,
    local_ephemeral_public: Option<[u8; 32]>,
    peer_ephemeral: Option<[u8; 32]>,
    shared: Option<Zeroizing<[u8; 32]>>,
    deadline: Instant,
}

pub struct Responder {
    identity: Arc<AgentIdentity>,
    resolver: Arc<Resolver>,
    manager: Arc<SessionManager>,
    nonces: NonceCache,
    contexts: Mutex<HashMap<String, HandshakeContext>>,
    accept_policy: Option<Box<AcceptPolicy>>,
    config: HandshakeConfig,
}

impl Responder {
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
            contexts: Mutex::new(HashMap::new()),
            accept_policy: None,
            config,
        }
    }

    pub fn with_accept_policy(mut self, policy: Box<AcceptPolicy>) -> Self {
        self.accept_policy = Some(policy);
        self
    }

    /// Process one incoming handshake message and produce the reply bytes.
    pub async fn handle_message(&self, bytes: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        let envelope = Envelope::decode(bytes)?;
        if envelope.to_did != self.identity.did.to_string() {
            return Err(HandshakeError::StateMismatch(
                "message not addressed to this agent".into(),
            ));
        }
        envelope.context_id_bytes()?;
        envelope.check_timestamp(self.config.max_clock_skew)?;
        self.nonces
            .observe(&envelope.from_did, &envelope.nonce_bytes()?)?;

        let context_key = envelope.context_id.clone();
        let result = match envelope.message_type {
            MessageType::Invitation => self.on_invitation(envelope).await,
            MessageType::Request => self.on_request(envelope).await,
            MessageType::Complete => self.on_complete(envelope).await,
            MessageType::Response => Err(HandshakeError::StateMismatch(
                "a responder never receives Response".into(),
            )),
        };

        // Atomic failure: a broken handshake leaves no partial state.
        if result.is_err() {
            self.contexts.lock().remove(&context_key);
        }
        result
    }

    /// Drop in-flight contexts that outlived the handshake deadline.
    pub fn prune_expired(&self) {
        let now = Instant::now();
        self.contexts.lock().retain(|_, ctx| ctx.deadline > now);
    }

    pub fn pending_handshakes(&self) -> usize {
        self.contexts.lock().len()
    }

    async fn on_invitation(&self, envelope: Envelope) -> Result<Vec<u8>, HandshakeError> {
        let peer_did = Did::parse(&envelope.from_did)?;
        let payload: InvitationPayload = decode_payload(&envelope.payload)?;

        let peer_key = self
            .resolver
            .resolve_public_key(&peer_did, payload.key_algorithm)
            .await?;
        envelope.verify_signature(payload.key_algorithm, &peer_key)?;

        if let Some(policy) = &self.accept_policy {
            if let Err(reason) = policy(&peer_did, &payload) {
                info!(peer = %peer_did, reason = %reason, "invitation declined");
                return Ok(Ack::Rejected { reason }.encode());
            }
        }

        debug!(peer = %peer_did, context = %envelope.context_id, "invitation accepted");
        self.contexts.lock().insert(
            envelope.context_id.clone(),
            HandshakeContext {
                peer_did,
                peer_key_algorithm: payload.key_algorithm,
                pinned_key: peer_key,
                phase: Phase::InvitationReceived,
                local_ephemeral_public: None,
                peer_ephemeral: None,
                shared: None,
                deadline: Instant::now() + self.config.overall_timeout,
            },
        );
        Ok(Ack::Accepted.encode())
    }

    async fn on_request(&self, envelope: Envelope) -> Result<Vec<u8>, HandshakeError> {
        let (peer_did, algorithm, pinned_key) = {
            let contexts = self.contexts.lock();
            let ctx = contexts.get(&envelope.context_id).ok_or_else(|| {
                HandshakeError::StateMismatch("request without a prior invitation".into())
            })?;
            if ctx.phase != Phase::InvitationReceived {
                return Err(HandshakeError::StateMismatch(
                    "request received out of order".into(),
                ));
            }
            if ctx.deadline <= Instant::now() {
                return Err(HandshakeError::Timeout);
            }
            if envelope.from_did != ctx.peer_did.to_string() {
                return Err(HandshakeError::StateMismatch(
                    "request sender does not match the invitation".into(),
                ));
            }
            (ctx.peer_did.clone(), ctx.peer_key_algorithm, ctx.pinned_key.clone())
        };

        // The pinned key must still be the registry's answer.
        let current_key = self
            .resolver
            .resolve_public_key(&peer_did, algorithm)
            .await?;
        if current_key != pinned_key {
            warn!(peer = %peer_did, "identity key changed mid-handshake");
            return Err(HandshakeError::IdentityChanged);
        }
        envelope.verify_signature(algorithm, &current_key)?;

        let request: RequestPayload = self.decode_request_payload(&envelope)?;
        let peer_ephemeral: [u8; 32] = b64_decode("ephemeral_public", &request.ephemeral_public)?
            .try_into()
            .map_err(|_| HandshakeError::Malformed("ephemeral key must be 32 bytes".into()))?;

        // Our ephemeral secret is only needed for this one DH; it drops
        // (and zeroizes) at the end of this call.
        let local_ephemeral = EphemeralKeyPair::generate();
        let shared = Zeroizing::new(local_ephemeral.diffie_hellman(&peer_ephemeral)?);
        let context_id = envelope.context_id_bytes()?;

        let (confirmation, _) = hpke::seal(
            &peer_ephemeral,
            CONFIRM_INFO,
            &context_id,
            &context_id,
            b"",
            0,
        )?;

        let payload = ResponsePayload {
            ephemeral_public: b64_encode(&local_ephemeral.public_bytes()),
            confirmation: b64_encode(&confirmation),
        };
        let mut response = Envelope::build(
            MessageType::Response,
            &context_id,
            &self.identity.did.to_string(),
            &envelope.from_did,
            serde_json::to_value(payload).map_err(|e| HandshakeError::Malformed(e.to_string()))?,
        );
        response.sign_with(&self.identity)?;

        {
            let mut contexts = self.contexts.lock();
            let ctx = contexts.get_mut(&envelope.context_id).ok_or_else(|| {
                HandshakeError::StateMismatch("context vanished during request".into())
            })?;
            ctx.phase = Phase::ResponseSent;
            ctx.local_ephemeral_public = Some(local_ephemeral.public_bytes());
            ctx.peer_ephemeral = Some(peer_ephemeral);
            ctx.shared = Some(shared);
        }

        debug!(peer = %envelope.from_did, context = %envelope.context_id, "response sent");
        response.encode()
    }

    async fn on_complete(&self, envelope: Envelope) -> Result<Vec<u8>, HandshakeError> {
        let (peer_did, algorithm, pinned_key) = {
            let contexts = self.contexts.lock();
            let ctx = contexts.get(&envelope.context_id).ok_or_else(|| {
                HandshakeError::StateMismatch("completion without a pending response".into())
            })?;
            if ctx.phase != Phase::ResponseSent {
                return Err(HandshakeError::StateMismatch(
                    "completion received out of order".into(),
                ));
            }
            if ctx.deadline <= Instant::now() {
                return Err(HandshakeError::Timeout);
            }
            if envelope.from_did != ctx.peer_did.to_string() {
                return Err(HandshakeError::StateMismatch(
                    "completion sender does not match the invitation".into(),
                ));
            }
            (ctx.peer_did.clone(), ctx.peer_key_algorithm, ctx.pinned_key.clone())
        };

        let current_key = self
            .resolver
            .resolve_public_key(&peer_did, algorithm)
            .await?;
        if current_key != pinned_key {
            return Err(HandshakeError::IdentityChanged);
        }
        envelope.verify_signature(algorithm, &current_key)?;

        let payload: CompletePayload = decode_payload(&envelope.payload)?;
        let tag = b64_decode("confirmation_tag", &payload.confirmation_tag)?;
        let context_id = envelope.context_id_bytes()?;

        let ctx = self
            .contexts
            .lock()
            .remove(&envelope.context_id)
            .ok_or_else(|| {
                HandshakeError::StateMismatch("context vanished during completion".into())
            })?;
        let shared = ctx.shared.expect("ResponseSent phase always has a secret");
        if !key_schedule::verify_complete_tag(&shared, &context_id, &tag) {
            return Err(HandshakeError::ConfirmationMismatch);
        }

        let local_ephemeral = ctx
            .local_ephemeral_public
            .expect("ResponseSent phase always has an ephemeral");
        let peer_ephemeral = ctx.peer_ephemeral.expect("ResponseSent phase always has a peer key");
        let seed = key_schedule::derive_session_seed(
            &context_id,
            &local_ephemeral,
            &peer_ephemeral,
            &shared,
        );
        let session = SecureSession::new(
            seed,
            Role::Responder,
            self.identity.did.to_string(),
            envelope.from_did.clone(),
            self.config.session.clone(),
        )?;
        let session_id = session.session_id().to_string();
        self.manager.add(session);
        info!(peer = %envelope.from_did, session_id = %session_id, "handshake complete");
        Ok(Ack::Complete.encode())
    }

    fn decode_request_payload(&self, envelope: &Envelope) -> Result<RequestPayload, HandshakeError> {
        if let Some(sealed) = envelope.payload.get("sealed").and_then(|v| v.as_str()) {
            // Bootstrap-encrypted request: open with our identity key
            // converted to X25519.
            let packet = b64_decode("sealed", sealed)?;
            let context_id = envelope.context_id_bytes()?;
            let ed_secret: [u8; 32] = self
                .identity
                .keypair()
                .secret_bytes()
                .try_into()
                .map_err(|_| HandshakeError::Malformed("identity key length".into()))?;
            let x_secret = x25519::ed25519_secret_to_x25519(&ed_secret);
            let (plaintext, _) = hpke::open(
                &x_secret.to_bytes(),
                &packet,
                REQUEST_INFO,
                &context_id,
                b"",
                0,
            )?;
            serde_json::from_slice(&plaintext)
                .map_err(|e| HandshakeError::Malformed(e.to_string()))
        } else {
            decode_payload(&envelope.payload)
        }
    }
}
