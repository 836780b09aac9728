use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::broadcast;

use sage_crypto::{KeyAlgorithm, KeyPair, PublicKey};
use sage_did::registry::memory::InMemoryRegistry;
use sage_did::registry::{RegistryClient, RegistryEvent};
use sage_did::resolver::ResolverConfig;
use sage_did::{
    ownership, AgentMetadata, Chain, Did, RegistrationRequest, RegistrationResult, RegistryError,
    RegistryRouter, Resolver, UpdateFields,
};
use sage_handshake::message::{b64_encode, Envelope, MessageType, RequestPayload};
use sage_handshake::{
    AgentIdentity, HandshakeConfig, HandshakeError, Initiator, Responder, Transport,
    TransportError,
};
use sage_session::SessionManager;

// ── Test plumbing ────────────────────────────────────────────────────────────

fn install_test_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Routes every request straight into a responder.
struct LoopbackTransport {
    responder: Arc<Responder>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, _endpoint: &str, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.responder
            .handle_message(payload)
            .await
            .map_err(|e| TransportError::ConnectionLost(e.to_string()))
    }
}

/// Records every outbound frame for later replay.
struct RecordingTransport {
    inner: LoopbackTransport,
    frames: Mutex<Vec<Vec<u8>>>,
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, endpoint: &str, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.frames.lock().push(payload.to_vec());
        self.inner.send(endpoint, payload).await
    }
}

/// Registry double whose records can be swapped under a live handshake.
struct MutableRegistry {
    records: Mutex<std::collections::HashMap<Did, AgentMetadata>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl MutableRegistry {
    fn new() -> Self {
        Self {
            records: Mutex::new(std::collections::HashMap::new()),
            events: broadcast::channel(16).0,
        }
    }

    fn put(&self, record: AgentMetadata) {
        self.records.lock().insert(record.did.clone(), record);
    }

    fn swap_key(&self, did: &Did, key: PublicKey) {
        let mut records = self.records.lock();
        let record = records.get_mut(did).expect("record exists");
        record.public_key = key;
        record.nonce += 1;
        let _ = self.events.send(RegistryEvent::Updated {
            agent_id: "test".into(),
            did: did.clone(),
            nonce: record.nonce,
        });
    }
}

#[async_trait]
impl RegistryClient for MutableRegistry {
    fn chain(&self) -> Chain {
        Chain::Ethereum
    }

    async fn register(
        &self,
        _request: RegistrationRequest,
    ) -> Result<RegistrationResult, RegistryError> {
        unimplemented!("test double")
    }

    async fn resolve(&self, did: &Did) -> Result<AgentMetadata, RegistryError> {
        self.records
            .lock()
            .get(did)
            .cloned()
            .ok_or(RegistryError::NotFound)
    }

    async fn list_by_owner(&self, _owner: &str) -> Result<Vec<String>, RegistryError> {
        Ok(vec![])
    }

    async fn update(
        &self,
        _agent_id: &str,
        _fields: UpdateFields,
        _nonce: u64,
        _signature: &[u8],
    ) -> Result<String, RegistryError> {
        unimplemented!("test double")
    }

    async fn deactivate(&self, _agent_id: &str, _signature: &[u8]) -> Result<String, RegistryError> {
        unimplemented!("test double")
    }

    fn watch_events(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    fn verify_owner_signature(&self, _request: &RegistrationRequest) -> Result<(), RegistryError> {
        Ok(())
    }
}

async fn register_agent(registry: &InMemoryRegistry, did: &str, identity: &AgentIdentity) {
    let owner_key = KeyPair::generate(KeyAlgorithm::Secp256k1).unwrap();
    let mut request = RegistrationRequest {
        did: Did::parse(did).unwrap(),
        name: did.rsplit(':').next().unwrap().to_string(),
        description: "test agent".into(),
        endpoint: format!("mem://{did}"),
        public_key: PublicKey::new(KeyAlgorithm::Ed25519, identity.public_key_bytes().to_vec()),
        capabilities: "{}".into(),
        owner: owner_key.ethereum_address().unwrap(),
        chain_id: Some(1),
        signature: Vec::new(),
    };
    let payload = ownership::registration_payload(&request);
    request.signature = owner_key.sign(&payload).unwrap();
    registry.register(request).await.unwrap();
}

struct Peer {
    identity: Arc<AgentIdentity>,
    resolver: Arc<Resolver>,
    manager: Arc<SessionManager>,
}

fn peer_stack(identity: AgentIdentity, registry: Arc<dyn RegistryClient>) -> Peer {
    let router = Arc::new(RegistryRouter::new().with_client(registry));
    Peer {
        identity: Arc::new(identity),
        resolver: Arc::new(Resolver::new(router, ResolverConfig::default())),
        manager: Arc::new(SessionManager::new()),
    }
}

async fn standard_pair(config: HandshakeConfig) -> (Peer, Peer, Arc<Responder>, Arc<InMemoryRegistry>) {
    install_test_subscriber();
    let registry = Arc::new(InMemoryRegistry::new(Chain::Ethereum));
    let alice_id = AgentIdentity::generate(Did::parse("did:sage:ethereum:0xAAAA").unwrap()).unwrap();
    let bob_id = AgentIdentity::generate(Did::parse("did:sage:ethereum:0xBBBB").unwrap()).unwrap();
    register_agent(&registry, "did:sage:ethereum:0xAAAA", &alice_id).await;
    register_agent(&registry, "did:sage:ethereum:0xBBBB", &bob_id).await;

    let alice = peer_stack(alice_id, registry.clone());
    let bob = peer_stack(bob_id, registry.clone());
    let responder = Arc::new(Responder::new(
        bob.identity.clone(),
        bob.resolver.clone(),
        bob.manager.clone(),
        config,
    ));
    (alice, bob, responder, registry)
}

// ── Scenarios ────────────────────────────────────────────────────────────────

/// Happy path: both sides end with the same session id and can exchange one
/// message in each direction.
#[tokio::test]
async fn handshake_establishes_matching_sessions() {
    let (alice, bob, responder, _) = standard_pair(HandshakeConfig::default()).await;
    let transport = LoopbackTransport { responder };
    let initiator = Initiator::new(
        alice.identity.clone(),
        alice.resolver.clone(),
        alice.manager.clone(),
        HandshakeConfig::default(),
    );

    let bob_did = Did::parse("did:sage:ethereum:0xBBBB").unwrap();
    let established = initiator.initiate(&bob_did, &transport).await.unwrap();

    // Responder registered the same session id.
    let bob_sessions = bob.manager.find_by_peer("did:sage:ethereum:0xAAAA");
    assert_eq!(bob_sessions.len(), 1);
    assert_eq!(
        bob_sessions[0].lock().session_id(),
        established.session_id.as_str()
    );

    let id = &established.session_id;
    let wire = alice.manager.encrypt(id, b"hello", b"").unwrap();
    assert_eq!(bob.manager.decrypt(id, &wire, b"").unwrap(), b"hello");

    let wire = bob.manager.encrypt(id, b"world", b"").unwrap();
    assert_eq!(alice.manager.decrypt(id, &wire, b"").unwrap(), b"world");

    assert_eq!(alice.manager.get(id).unwrap().lock().send_seq(), 1);
    assert_eq!(bob.manager.get(id).unwrap().lock().send_seq(), 1);
}

/// Replaying the captured Request hits the responder's nonce cache.
#[tokio::test]
async fn replayed_request_is_rejected() {
    let (alice, _bob, responder, _) = standard_pair(HandshakeConfig::default()).await;
    let transport = RecordingTransport {
        inner: LoopbackTransport {
            responder: responder.clone(),
        },
        frames: Mutex::new(Vec::new()),
    };
    let initiator = Initiator::new(
        alice.identity.clone(),
        alice.resolver.clone(),
        alice.manager.clone(),
        HandshakeConfig::default(),
    );

    let bob_did = Did::parse("did:sage:ethereum:0xBBBB").unwrap();
    initiator.initiate(&bob_did, &transport).await.unwrap();

    let frames = transport.frames.lock().clone();
    let request = frames
        .iter()
        .find(|f| {
            Envelope::decode(f)
                .map(|e| e.message_type == MessageType::Request)
                .unwrap_or(false)
        })
        .expect("request frame recorded")
        .clone();

    assert!(matches!(
        responder.handle_message(&request).await,
        Err(HandshakeError::NonceReuse)
    ));
}

/// Replaying the Invitation is equally a replay; sending it to an agent it
/// was never addressed to is refused outright.
#[tokio::test]
async fn replayed_or_misrouted_invitation_is_rejected() {
    let (alice, bob, responder, registry) = standard_pair(HandshakeConfig::default()).await;
    let transport = RecordingTransport {
        inner: LoopbackTransport {
            responder: responder.clone(),
        },
        frames: Mutex::new(Vec::new()),
    };
    let initiator = Initiator::new(
        alice.identity.clone(),
        alice.resolver.clone(),
        alice.manager.clone(),
        HandshakeConfig::default(),
    );
    let bob_did = Did::parse("did:sage:ethereum:0xBBBB").unwrap();
    initiator.initiate(&bob_did, &transport).await.unwrap();

    let frames = transport.frames.lock().clone();
    let invitation = frames
        .iter()
        .find(|f| {
            Envelope::decode(f)
                .map(|e| e.message_type == MessageType::Invitation)
                .unwrap_or(false)
        })
        .unwrap()
        .clone();

    assert!(matches!(
        responder.handle_message(&invitation).await,
        Err(HandshakeError::NonceReuse)
    ));

    // A third agent refuses a message addressed to Bob.
    let carol_id =
        AgentIdentity::generate(Did::parse("did:sage:ethereum:0xCCCC").unwrap()).unwrap();
    register_agent(&registry, "did:sage:ethereum:0xCCCC", &carol_id).await;
    let carol = peer_stack(carol_id, registry.clone());
    let carol_responder = Responder::new(
        carol.identity,
        carol.resolver,
        carol.manager,
        HandshakeConfig::default(),
    );
    assert!(matches!(
        carol_responder.handle_message(&invitation).await,
        Err(HandshakeError::StateMismatch(_))
    ));
    let _ = bob;
}

/// Key rotated mid-handshake: the initiator pins the key before Invitation;
/// when the registry serves a different key at Response verification the
/// attempt aborts with IdentityChanged.
#[tokio::test]
async fn key_rotation_mid_handshake_aborts() {
    let registry = Arc::new(MutableRegistry::new());
    let alice_id = AgentIdentity::generate(Did::parse("did:sage:ethereum:0xAAAA").unwrap()).unwrap();
    let bob_id = AgentIdentity::generate(Did::parse("did:sage:ethereum:0xBBBB").unwrap()).unwrap();

    let record = |did: &str, identity: &AgentIdentity| AgentMetadata {
        did: Did::parse(did).unwrap(),
        name: "agent".into(),
        description: String::new(),
        endpoint: format!("mem://{did}"),
        public_key: PublicKey::new(KeyAlgorithm::Ed25519, identity.public_key_bytes().to_vec()),
        additional_keys: Vec::new(),
        capabilities: "{}".into(),
        owner: "0xowner".into(),
        registered_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
        active: true,
        nonce: 0,
        chain_id: Some(1),
    };
    registry.put(record("did:sage:ethereum:0xAAAA", &alice_id));
    registry.put(record("did:sage:ethereum:0xBBBB", &bob_id));

    let alice = peer_stack(alice_id, registry.clone());
    let bob = peer_stack(bob_id, registry.clone());
    let _pump = alice.resolver.spawn_event_pump();

    let responder = Arc::new(Responder::new(
        bob.identity.clone(),
        bob.resolver.clone(),
        bob.manager.clone(),
        HandshakeConfig::default(),
    ));

    /// Swaps Bob's registry key the moment the Request goes out.
    struct RotatingTransport {
        inner: LoopbackTransport,
        registry: Arc<MutableRegistry>,
        rotated: Mutex<bool>,
    }

    #[async_trait]
    impl Transport for RotatingTransport {
        async fn send(&self, endpoint: &str, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
            let is_request = Envelope::decode(payload)
                .map(|e| e.message_type == MessageType::Request)
                .unwrap_or(false);
            if is_request && !*self.rotated.lock() {
                *self.rotated.lock() = true;
                let rotated = KeyPair::generate(KeyAlgorithm::Ed25519).unwrap();
                self.registry.swap_key(
                    &Did::parse("did:sage:ethereum:0xBBBB").unwrap(),
                    PublicKey::new(KeyAlgorithm::Ed25519, rotated.public().bytes.clone()),
                );
                // Let the event pump invalidate the initiator's cache.
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
            self.inner.send(endpoint, payload).await
        }
    }

    let transport = RotatingTransport {
        inner: LoopbackTransport { responder },
        registry: registry.clone(),
        rotated: Mutex::new(false),
    };
    let initiator = Initiator::new(
        alice.identity.clone(),
        alice.resolver.clone(),
        alice.manager.clone(),
        HandshakeConfig::default(),
    );

    let bob_did = Did::parse("did:sage:ethereum:0xBBBB").unwrap();
    assert!(matches!(
        initiator.initiate(&bob_did, &transport).await,
        Err(HandshakeError::IdentityChanged)
    ));
    assert!(alice.manager.is_empty(), "no session on a failed handshake");
}

/// Low-order ephemeral from the peer aborts before any key derivation.
#[tokio::test]
async fn low_order_ephemeral_is_rejected() {
    let (alice, _bob, responder, _) = standard_pair(HandshakeConfig::default()).await;

    // Valid, signed Invitation to open a context.
    let context_id = [7u8; 16];
    let mut invitation = Envelope::build(
        MessageType::Invitation,
        &context_id,
        "did:sage:ethereum:0xAAAA",
        "did:sage:ethereum:0xBBBB",
        json!({"key_algorithm": "ed25519", "key_id": "did:sage:ethereum:0xAAAA#keys-1"}),
    );
    invitation.sign_with(&alice.identity).unwrap();
    responder
        .handle_message(&invitation.encode().unwrap())
        .await
        .unwrap();

    // Request carrying the all-zero point.
    let payload = RequestPayload {
        ephemeral_public: b64_encode(&[0u8; 32]),
    };
    let mut request = Envelope::build(
        MessageType::Request,
        &context_id,
        "did:sage:ethereum:0xAAAA",
        "did:sage:ethereum:0xBBBB",
        serde_json::to_value(payload).unwrap(),
    );
    request.sign_with(&alice.identity).unwrap();

    match responder.handle_message(&request.encode().unwrap()).await {
        Err(HandshakeError::Crypto(sage_crypto::CryptoError::InvalidPublicKey(_))) => {}
        other => panic!("expected InvalidPublicKey, got {other:?}"),
    }
    assert_eq!(responder.pending_handshakes(), 0, "context must be torn down");
}

/// The optional HPKE bootstrap keeps the Request confidential end to end.
#[tokio::test]
async fn encrypted_request_variant_completes() {
    let config = HandshakeConfig {
        encrypt_request: true,
        ..HandshakeConfig::default()
    };
    let (alice, bob, responder, _) = standard_pair(config.clone()).await;
    let transport = LoopbackTransport { responder };
    let initiator = Initiator::new(
        alice.identity.clone(),
        alice.resolver.clone(),
        alice.manager.clone(),
        config,
    );

    let bob_did = Did::parse("did:sage:ethereum:0xBBBB").unwrap();
    let established = initiator.initiate(&bob_did, &transport).await.unwrap();

    let wire = alice
        .manager
        .encrypt(&established.session_id, b"confidential", b"")
        .unwrap();
    assert_eq!(
        bob.manager.decrypt(&established.session_id, &wire, b"").unwrap(),
        b"confidential"
    );
}

#[tokio::test]
async fn accept_policy_rejection_surfaces_to_the_initiator() {
    let (alice, bob, _, registry) = standard_pair(HandshakeConfig::default()).await;
    let responder = Arc::new(
        Responder::new(
            bob.identity.clone(),
            bob.resolver.clone(),
            bob.manager.clone(),
            HandshakeConfig::default(),
        )
        .with_accept_policy(Box::new(|_, _| Err("not accepting peers today".into()))),
    );
    let transport = LoopbackTransport { responder };
    let initiator = Initiator::new(
        alice.identity.clone(),
        alice.resolver.clone(),
        alice.manager.clone(),
        HandshakeConfig::default(),
    );

    let bob_did = Did::parse("did:sage:ethereum:0xBBBB").unwrap();
    match initiator.initiate(&bob_did, &transport).await {
        Err(HandshakeError::PeerRejected(reason)) => {
            assert_eq!(reason, "not accepting peers today")
        }
        other => panic!("expected PeerRejected, got {other:?}"),
    }
    let _ = registry;
}

#[tokio::test]
async fn deactivated_peer_cannot_be_dialed() {
    let (alice, _bob, responder, registry) = standard_pair(HandshakeConfig::default()).await;
    let _ = responder;

    // Deactivate Bob through a fresh owner is impossible (NotOwner), so
    // register a throwaway agent we control and deactivate it.
    let owner = KeyPair::generate(KeyAlgorithm::Secp256k1).unwrap();
    let mallory_id =
        AgentIdentity::generate(Did::parse("did:sage:ethereum:0xDDDD").unwrap()).unwrap();
    let mut request = RegistrationRequest {
        did: Did::parse("did:sage:ethereum:0xDDDD").unwrap(),
        name: "mallory".into(),
        description: String::new(),
        endpoint: "mem://mallory".into(),
        public_key: PublicKey::new(
            KeyAlgorithm::Ed25519,
            mallory_id.public_key_bytes().to_vec(),
        ),
        capabilities: "{}".into(),
        owner: owner.ethereum_address().unwrap(),
        chain_id: Some(1),
        signature: Vec::new(),
    };
    let payload = ownership::registration_payload(&request);
    request.signature = owner.sign(&payload).unwrap();
    let did = request.did.clone();
    let result = registry.register(request).await.unwrap();

    let payload =
        ownership::deactivation_payload(&did, &owner.ethereum_address().unwrap(), 0);
    let sig = owner.sign(&payload).unwrap();
    registry.deactivate(&result.agent_id, &sig).await.unwrap();

    let initiator = Initiator::new(
        alice.identity.clone(),
        alice.resolver.clone(),
        alice.manager.clone(),
        HandshakeConfig::default(),
    );
    struct NoTransport;
    #[async_trait]
    impl Transport for NoTransport {
        async fn send(&self, _: &str, _: &[u8]) -> Result<Vec<u8>, TransportError> {
            panic!("transport must not be reached for a deactivated peer");
        }
    }
    match initiator.initiate(&did, &NoTransport).await {
        Err(HandshakeError::Identity(sage_did::DidError::Deactivated(_))) => {}
        other => panic!("expected Deactivated, got {other:?}"),
    }
}
