//! Ethereum-family registry adapter.
//!
//! Wraps an injected [`ChainRpc`] (the application owns the actual RPC
//! stack) and translates between registry operations and the V4 contract's
//! methods. Ownership signatures are pre-verified locally by address
//! recovery before any transaction is submitted; the contract repeats the
//! check with `ecrecover` against `msg.sender`.
//!
//! Kaia shares the contract ABI and signature scheme, so a Kaia client is
//! this adapter constructed with [`Chain::Kaia`].

use async_trait::async_trait;
use serde_json::{json, Value};
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

/// Receipt of a mined state-changing transaction.
#[derive(Debug, Clone)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub block_number: u64,
    pub gas_used: u64,
}

/// Narrow blockchain capability the adapters require. Implementations wrap
/// a JSON-RPC endpoint, a test double, or a relayer; the registry core
/// never opens sockets itself.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Read-only contract call.
    async fn query(&self, method: &str, params: Value) -> Result<Value, RegistryError>;

    /// Submit a transaction and wait for it to be mined.
    async fn transact(&self, method: &str, params: Value) -> Result<TxReceipt, RegistryError>;

    /// Decoded contract event stream.
    fn events(&self) -> broadcast::Receiver<RegistryEvent>;
}

pub struct EthereumRegistry {
    chain: Chain,
    rpc: Arc<dyn ChainRpc>,
}

impl EthereumRegistry {
    pub fn new(chain: Chain, rpc: Arc<dyn ChainRpc>) -> Self {
        debug_assert!(matches!(chain, Chain::Ethereum | Chain::Kaia));
        Self { chain, rpc }
    }

    fn parse_record(&self, value: Value) -> Result<AgentMetadata, RegistryError> {
        serde_json::from_value(value)
            .map_err(|e| RegistryError::ChainError(format!("malformed agent record: {e}")))
    }
}

#[async_trait]
impl RegistryClient for EthereumRegistry {
    fn chain(&self) -> Chain {
        self.chain
    }

    async fn register(
        &self,
        request: RegistrationRequest,
    ) -> Result<RegistrationResult, RegistryError> {
        validate_request_inputs(&request)?;
        self.verify_owner_signature(&request)?;

        let receipt = self
            .rpc
            .transact(
                "registerAgent",
                json!({
                    "did": request.did.to_string(),
                    "name": request.name,
                    "description": request.description,
                    "endpoint": request.endpoint,
                    "publicKey": hex::encode(&request.public_key.bytes),
                    "keyType": request.public_key.algorithm.as_str(),
                    "capabilities": request.capabilities,
                    "signature": hex::encode(&request.signature),
                    "chainId": request.chain_id,
                }),
            )
            .await?;

        info!(did = %request.did, tx = %receipt.tx_hash, "registration submitted");
        Ok(RegistrationResult {
            agent_id: agent_id_for(&request.did),
            tx_hash: receipt.tx_hash,
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
        })
    }

    async fn resolve(&self, did: &Did) -> Result<AgentMetadata, RegistryError> {
        debug!(did = %did, "contract read");
        let value = self
            .rpc
            .query("getAgentByDid", json!({ "did": did.to_string() }))
            .await?;
        if value.is_null() {
            return Err(RegistryError::NotFound);
        }
        self.parse_record(value)
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<String>, RegistryError> {
        let value = self
            .rpc
            .query("getAgentsByOwner", json!({ "owner": owner }))
            .await?;
        serde_json::from_value(value)
            .map_err(|e| RegistryError::ChainError(format!("malformed agent id list: {e}")))
    }

    async fn update(
        &self,
        agent_id: &str,
        fields: UpdateFields,
        nonce: u64,
        signature: &[u8],
    ) -> Result<String, RegistryError> {
        if fields.is_empty() {
            return Err(RegistryError::InvalidInput("no fields to update".into()));
        }
        let receipt = self
            .rpc
            .transact(
                "updateAgent",
                json!({
                    "agentId": agent_id,
                    "fields": fields,
                    "nonce": nonce,
                    "signature": hex::encode(signature),
                }),
            )
            .await?;
        Ok(receipt.tx_hash)
    }

    async fn deactivate(&self, agent_id: &str, signature: &[u8]) -> Result<String, RegistryError> {
        let receipt = self
            .rpc
            .transact(
                "deactivateAgent",
                json!({
                    "agentId": agent_id,
                    "signature": hex::encode(signature),
                }),
            )
            .await?;
        Ok(receipt.tx_hash)
    }

    fn watch_events(&self) -> broadcast::Receiver<RegistryEvent> {
        self.rpc.events()
    }

    fn verify_owner_signature(&self, request: &RegistrationRequest) -> Result<(), RegistryError> {
        let payload = ownership::registration_payload(request);
        ownership::verify_owner_signature(
            self.chain,
            &request.owner,
            None,
            &payload,
            &request.signature,
        )
    }
}
