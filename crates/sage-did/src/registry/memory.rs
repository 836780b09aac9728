//! In-process registry implementing the V4 direct contract's observable
//! behavior: unique DID per chain, immutable owner and public key, strictly
//! increasing nonce, per-owner agent cap, ownership signatures that must
//! recover to the caller, registration hooks, and the event feed.
//!
//! This is the backend for tests and local development and the executable
//! reference for the invariants the chain adapters expect from their
//! contracts.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::{
    did::{Chain, Did},
    error::RegistryError,
    metadata::{AgentMetadata, RegistrationRequest, RegistrationResult, UpdateFields},
    ownership,
};

use super::{agent_id_for, validate_request_inputs, RegistryClient, RegistryEvent};

/// Gas charged by the V4 contract for a direct registration.
pub const REGISTER_GAS: u64 = 650_000;

/// Per-owner registration cap enforced by the contract.
pub const MAX_AGENTS_PER_OWNER: usize = 100;

/// External validator invoked around registration, mirroring the contract's
/// `beforeRegister`/`afterRegister` hook points. Rejections surface verbatim
/// as [`RegistryError::HookRejected`].
pub trait RegistrationHook: Send + Sync {
    fn before_register(&self, request: &RegistrationRequest) -> Result<(), String>;
    fn after_register(&self, _agent_id: &str, _request: &RegistrationRequest) {}
}

#[derive(Default)]
struct State {
    agents: HashMap<String, AgentMetadata>,
    by_did: HashMap<Did, String>,
    by_owner: HashMap<String, Vec<String>>,
    block_number: u64,
}

pub struct InMemoryRegistry {
    chain: Chain,
    state: Mutex<State>,
    events: broadcast::Sender<RegistryEvent>,
    hooks: Vec<Arc<dyn RegistrationHook>>,
    /// When set, `resolve` refuses deactivated records instead of returning
    /// them with `active = false`.
    reject_inactive_reads: bool,
}

impl InMemoryRegistry {
    pub fn new(chain: Chain) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            chain,
            state: Mutex::new(State::default()),
            events,
            hooks: Vec::new(),
            reject_inactive_reads: false,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn RegistrationHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn reject_inactive_reads(mut self) -> Self {
        self.reject_inactive_reads = true;
        self
    }

    fn emit(&self, event: RegistryEvent) {
        // Nobody listening is fine; the send error carries no information.
        let _ = self.events.send(event);
    }

    fn fake_tx_hash() -> String {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        format!("0x{}", hex::encode(bytes))
    }

    /// Decode the owner address into the key bytes signature verification
    /// needs. Ethereum-family owners are recovered, so no key is required.
    fn owner_key_bytes(&self, owner: &str) -> Option<Vec<u8>> {
        match self.chain {
            Chain::Ethereum | Chain::Kaia => None,
            Chain::Solana => bs58::decode(owner).into_vec().ok(),
        }
    }

    /// Store a record that passed all registration checks but is not yet
    /// active. Used by the commit-reveal variant; no event is emitted until
    /// activation.
    pub(crate) fn insert_pending(
        &self,
        request: &RegistrationRequest,
    ) -> Result<RegistrationResult, RegistryError> {
        validate_request_inputs(request)?;
        self.verify_owner_signature(request)?;

        let agent_id = agent_id_for(&request.did);
        let mut state = self.state.lock();
        if state.by_did.contains_key(&request.did) {
            return Err(RegistryError::DuplicateDid);
        }
        let owned = state.by_owner.entry(request.owner.clone()).or_default();
        if owned.len() >= MAX_AGENTS_PER_OWNER {
            return Err(RegistryError::RateLimitExceeded);
        }
        owned.push(agent_id.clone());

        let now = Utc::now();
        let record = AgentMetadata {
            did: request.did.clone(),
            name: request.name.clone(),
            description: request.description.clone(),
            endpoint: request.endpoint.clone(),
            public_key: request.public_key.clone(),
            additional_keys: Vec::new(),
            capabilities: request.capabilities.clone(),
            owner: request.owner.clone(),
            registered_at: now,
            updated_at: now,
            active: false,
            nonce: 0,
            chain_id: request.chain_id,
        };
        state.by_did.insert(request.did.clone(), agent_id.clone());
        state.agents.insert(agent_id.clone(), record);
        state.block_number += 1;

        Ok(RegistrationResult {
            agent_id,
            tx_hash: Self::fake_tx_hash(),
            block_number: state.block_number,
            gas_used: REGISTER_GAS,
        })
    }

    /// Flip a pending record active and announce it.
    pub(crate) fn set_active(&self, agent_id: &str) -> Result<(), RegistryError> {
        let event = {
            let mut state = self.state.lock();
            let record = state
                .agents
                .get_mut(agent_id)
                .ok_or(RegistryError::NotFound)?;
            if record.active {
                return Err(RegistryError::StateMismatch("agent already active".into()));
            }
            record.active = true;
            record.updated_at = Utc::now();
            let event = RegistryEvent::Registered {
                did: record.did.clone(),
                owner: record.owner.clone(),
                agent_id: agent_id.to_string(),
            };
            state.block_number += 1;
            event
        };
        self.emit(event);
        Ok(())
    }

    fn verify_update_signature(
        &self,
        record: &AgentMetadata,
        fields: &UpdateFields,
        nonce: u64,
        signature: &[u8],
    ) -> Result<(), RegistryError> {
        let payload =
            ownership::update_payload(&record.did, fields, &record.owner, nonce, record.chain_id);
        ownership::verify_owner_signature(
            self.chain,
            &record.owner,
            self.owner_key_bytes(&record.owner).as_deref(),
            &payload,
            signature,
        )
        .map_err(|_| RegistryError::NotOwner)
    }
}

#[async_trait]
impl RegistryClient for InMemoryRegistry {
    fn chain(&self) -> Chain {
        self.chain
    }

    async fn register(
        &self,
        request: RegistrationRequest,
    ) -> Result<RegistrationResult, RegistryError> {
        if request.did.chain() != self.chain {
            return Err(RegistryError::InvalidInput(format!(
                "DID chain {} does not match registry chain {}",
                request.did.chain(),
                self.chain
            )));
        }
        validate_request_inputs(&request)?;
        self.verify_owner_signature(&request)?;

        for hook in &self.hooks {
            hook.before_register(&request)
                .map_err(RegistryError::HookRejected)?;
        }

        let agent_id = agent_id_for(&request.did);
        let result = {
            let mut state = self.state.lock();
            if state.by_did.contains_key(&request.did) {
                return Err(RegistryError::DuplicateDid);
            }
            let owned = state.by_owner.entry(request.owner.clone()).or_default();
            if owned.len() >= MAX_AGENTS_PER_OWNER {
                return Err(RegistryError::RateLimitExceeded);
            }
            owned.push(agent_id.clone());

            let now = Utc::now();
            let record = AgentMetadata {
                did: request.did.clone(),
                name: request.name.clone(),
                description: request.description.clone(),
                endpoint: request.endpoint.clone(),
                public_key: request.public_key.clone(),
                additional_keys: Vec::new(),
                capabilities: request.capabilities.clone(),
                owner: request.owner.clone(),
                registered_at: now,
                updated_at: now,
                active: true,
                nonce: 0,
                chain_id: request.chain_id,
            };
            state.by_did.insert(request.did.clone(), agent_id.clone());
            state.agents.insert(agent_id.clone(), record);
            state.block_number += 1;

            RegistrationResult {
                agent_id: agent_id.clone(),
                tx_hash: Self::fake_tx_hash(),
                block_number: state.block_number,
                gas_used: REGISTER_GAS,
            }
        };

        for hook in &self.hooks {
            hook.after_register(&agent_id, &request);
        }

        info!(did = %request.did, agent_id = %agent_id, "agent registered");
        self.emit(RegistryEvent::Registered {
            did: request.did,
            owner: request.owner,
            agent_id,
        });
        Ok(result)
    }

    async fn resolve(&self, did: &Did) -> Result<AgentMetadata, RegistryError> {
        let state = self.state.lock();
        let agent_id = state.by_did.get(did).ok_or(RegistryError::NotFound)?;
        let record = state.agents.get(agent_id).ok_or(RegistryError::NotFound)?;
        if self.reject_inactive_reads && !record.active {
            return Err(RegistryError::AgentInactive);
        }
        debug!(did = %did, "registry read");
        Ok(record.clone())
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<String>, RegistryError> {
        Ok(self
            .state
            .lock()
            .by_owner
            .get(owner)
            .cloned()
            .unwrap_or_default())
    }

    async fn update(
        &self,
        agent_id: &str,
        fields: UpdateFields,
        nonce: u64,
        signature: &[u8],
    ) -> Result<String, RegistryError> {
        let event = {
            let mut state = self.state.lock();
            let record = state
                .agents
                .get_mut(agent_id)
                .ok_or(RegistryError::NotFound)?;
            if !record.active {
                return Err(RegistryError::AgentInactive);
            }
            if nonce != record.nonce {
                return Err(RegistryError::NonceMismatch {
                    expected: record.nonce,
                    got: nonce,
                });
            }
            // Signature check before any mutation; NotOwner must not burn
            // the nonce.
            let record_snapshot = record.clone();
            self.verify_update_signature(&record_snapshot, &fields, nonce, signature)?;

            if let Some(name) = fields.name {
                record.name = name;
            }
            if let Some(description) = fields.description {
                record.description = description;
            }
            if let Some(endpoint) = fields.endpoint {
                record.endpoint = endpoint;
            }
            if let Some(capabilities) = fields.capabilities {
                record.capabilities = capabilities;
            }
            record.nonce += 1;
            record.updated_at = Utc::now();
            let event = RegistryEvent::Updated {
                agent_id: agent_id.to_string(),
                did: record.did.clone(),
                nonce: record.nonce,
            };
            state.block_number += 1;
            event
        };

        info!(agent_id = %agent_id, "agent updated");
        self.emit(event);
        Ok(Self::fake_tx_hash())
    }

    async fn deactivate(&self, agent_id: &str, signature: &[u8]) -> Result<String, RegistryError> {
        let event = {
            let mut state = self.state.lock();
            let record = state
                .agents
                .get_mut(agent_id)
                .ok_or(RegistryError::NotFound)?;
            if !record.active {
                return Err(RegistryError::AgentInactive);
            }
            let payload =
                ownership::deactivation_payload(&record.did, &record.owner, record.nonce);
            ownership::verify_owner_signature(
                self.chain,
                &record.owner,
                self.owner_key_bytes(&record.owner).as_deref(),
                &payload,
                signature,
            )
            .map_err(|_| RegistryError::NotOwner)?;

            record.active = false;
            record.nonce += 1;
            record.updated_at = Utc::now();
            let event = RegistryEvent::Deactivated {
                agent_id: agent_id.to_string(),
                did: record.did.clone(),
            };
            state.block_number += 1;
            event
        };

        info!(agent_id = %agent_id, "agent deactivated");
        self.emit(event);
        Ok(Self::fake_tx_hash())
    }

    fn watch_events(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    fn verify_owner_signature(&self, request: &RegistrationRequest) -> Result<(), RegistryError> {
        let payload = ownership::registration_payload(request);
        ownership::verify_owner_signature(
            self.chain,
            &request.owner,
            self.owner_key_bytes(&request.owner).as_deref(),
            &payload,
            &request.signature,
        )
    }
}
