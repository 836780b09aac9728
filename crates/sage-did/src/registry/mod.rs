//! The polymorphic agent registry.
//!
//! One [`RegistryClient`] per chain, all behind the same async interface:
//! `register`, `resolve`, `list_by_owner`, `update`, `deactivate`,
//! `watch_events`, `verify_owner_signature`. A [`RegistryRouter`] maps the
//! chain segment of a DID to the right client.
//!
//! Implementations:
//! - [`memory::InMemoryRegistry`] — in-process model of the V4 direct
//!   contract's observable behavior; the normative reference for the
//!   registry invariants and the backend for tests and local development.
//! - [`ethereum::EthereumRegistry`] — Ethereum/Kaia adapter over an
//!   injected [`ChainRpc`].
//! - [`solana::SolanaRegistry`] — Solana adapter over the same capability.
//! - [`commit_reveal::CommitRevealRegistry`] — the three-phase
//!   commit/register/activate variant with stake and enforced delays.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use crate::{
    did::{Chain, Did},
    error::{DidError, RegistryError},
    metadata::{AgentMetadata, RegistrationRequest, RegistrationResult, UpdateFields},
};

pub mod commit_reveal;
pub mod ethereum;
pub mod memory;
pub mod solana;

/// Contract events, also used for resolver cache invalidation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RegistryEvent {
    Registered {
        did: Did,
        owner: String,
        agent_id: String,
    },
    Updated {
        agent_id: String,
        did: Did,
        nonce: u64,
    },
    Deactivated {
        agent_id: String,
        did: Did,
    },
}

impl RegistryEvent {
    pub fn did(&self) -> &Did {
        match self {
            RegistryEvent::Registered { did, .. }
            | RegistryEvent::Updated { did, .. }
            | RegistryEvent::Deactivated { did, .. } => did,
        }
    }
}

/// Client-side event filter; empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub did: Option<Did>,
    pub owner: Option<String>,
}

impl EventFilter {
    pub fn matches(&self, event: &RegistryEvent) -> bool {
        if let Some(did) = &self.did {
            if event.did() != did {
                return false;
            }
        }
        if let Some(owner) = &self.owner {
            match event {
                RegistryEvent::Registered { owner: o, .. } => return o == owner,
                _ => return false,
            }
        }
        true
    }
}

/// Per-chain registry interface consumed by the resolver and by
/// registration tooling.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    fn chain(&self) -> Chain;

    /// Write a new record on chain. The DID must be unique within the chain
    /// and the request signature must prove ownership of `request.owner`.
    async fn register(
        &self,
        request: RegistrationRequest,
    ) -> Result<RegistrationResult, RegistryError>;

    /// Read-only record fetch; no gas cost.
    async fn resolve(&self, did: &Did) -> Result<AgentMetadata, RegistryError>;

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<String>, RegistryError>;

    /// Owner-authorized mutation of the mutable fields. `nonce` must equal
    /// the record's current nonce; it increments on success. Returns the
    /// transaction id.
    async fn update(
        &self,
        agent_id: &str,
        fields: UpdateFields,
        nonce: u64,
        signature: &[u8],
    ) -> Result<String, RegistryError>;

    /// Owner-authorized deactivation. Returns the transaction id.
    async fn deactivate(&self, agent_id: &str, signature: &[u8]) -> Result<String, RegistryError>;

    /// Raw contract event stream.
    fn watch_events(&self) -> broadcast::Receiver<RegistryEvent>;

    /// Client-side ownership pre-check, run before any transaction is
    /// submitted so an invalid signature never costs gas.
    fn verify_owner_signature(&self, request: &RegistrationRequest) -> Result<(), RegistryError>;
}

/// Subscribe to a client's events through a filter. A forwarding task owns
/// the broadcast subscription; it exits when the returned receiver drops.
pub fn filtered_events(
    client: &dyn RegistryClient,
    filter: EventFilter,
) -> mpsc::Receiver<RegistryEvent> {
    let mut raw = client.watch_events();
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        while let Ok(event) = raw.recv().await {
            if filter.matches(&event) && tx.send(event).await.is_err() {
                break;
            }
        }
    });
    rx
}

/// Maps the chain segment of a DID to a registry client.
#[derive(Default)]
pub struct RegistryRouter {
    clients: HashMap<Chain, Arc<dyn RegistryClient>>,
}

impl RegistryRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(mut self, client: Arc<dyn RegistryClient>) -> Self {
        self.clients.insert(client.chain(), client);
        self
    }

    pub fn client_for(&self, chain: Chain) -> Result<Arc<dyn RegistryClient>, DidError> {
        self.clients
            .get(&chain)
            .cloned()
            .ok_or_else(|| DidError::UnsupportedChain(chain.as_str().to_string()))
    }

    pub fn chains(&self) -> impl Iterator<Item = Chain> + '_ {
        self.clients.keys().copied()
    }
}

/// Registry-defined agent id: truncated Keccak-256 of the DID string,
/// deterministic so clients can compute it without a read-back.
pub fn agent_id_for(did: &Did) -> String {
    let digest = Keccak256::digest(did.to_string().as_bytes());
    hex::encode(&digest[..16])
}

/// Input length caps enforced by every registry variant.
pub(crate) fn validate_request_inputs(req: &RegistrationRequest) -> Result<(), RegistryError> {
    if req.name.is_empty() || req.name.len() > 128 {
        return Err(RegistryError::InvalidInput("name must be 1..=128 bytes".into()));
    }
    if req.description.len() > 512 {
        return Err(RegistryError::InvalidInput("description exceeds 512 bytes".into()));
    }
    if req.endpoint.len() > 512 {
        return Err(RegistryError::InvalidInput("endpoint exceeds 512 bytes".into()));
    }
    if req.capabilities.len() > 2048 {
        return Err(RegistryError::InvalidInput("capabilities exceed 2048 bytes".into()));
    }
    if req.public_key.bytes.is_empty() || req.public_key.bytes.len() > 128 {
        return Err(RegistryError::InvalidInput("public key must be 1..=128 bytes".into()));
    }
    Ok(())
}
