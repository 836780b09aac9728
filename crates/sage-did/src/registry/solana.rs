//! Solana registry adapter.
//!
//! Same shape as the Ethereum adapter, but the owner address is the base58
//! encoding of an Ed25519 key and ownership proofs are plain Ed25519
//! signatures over the packed payload (no recovery on Solana).

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

use super::{
    agent_id_for, ethereum::ChainRpc, validate_request_inputs, RegistryClient, RegistryEvent,
};

pub struct SolanaRegistry {
    rpc: Arc<dyn ChainRpc>,
}

impl SolanaRegistry {
    pub fn new(rpc: Arc<dyn ChainRpc>) -> Self {
        Self { rpc }
    }
}

#[async_trait]
impl RegistryClient for SolanaRegistry {
    fn chain(&self) -> Chain {
        Chain::Solana
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
                "register_agent",
                json!({
                    "did": request.did.to_string(),
                    "name": request.name,
                    "description": request.description,
                    "endpoint": request.endpoint,
                    "public_key": hex::encode(&request.public_key.bytes),
                    "key_type": request.public_key.algorithm.as_str(),
                    "capabilities": request.capabilities,
                    "signature": hex::encode(&request.signature),
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
        debug!(did = %did, "program account read");
        let value = self
            .rpc
            .query("get_agent_by_did", json!({ "did": did.to_string() }))
            .await?;
        if value.is_null() {
            return Err(RegistryError::NotFound);
        }
        serde_json::from_value::<AgentMetadata>(value)
            .map_err(|e| RegistryError::ChainError(format!("malformed agent record: {e}")))
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<String>, RegistryError> {
        let value = self
            .rpc
            .query("get_agents_by_owner", json!({ "owner": owner }))
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
                "update_agent",
                json!({
                    "agent_id": agent_id,
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
                "deactivate_agent",
                json!({
                    "agent_id": agent_id,
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
        let owner_key = bs58::decode(&request.owner)
            .into_vec()
            .map_err(|_| RegistryError::OwnershipProofInvalid)?;
        let payload = ownership::registration_payload(request);
        ownership::verify_owner_signature(
            Chain::Solana,
            &request.owner,
            Some(&owner_key),
            &payload,
            &request.signature,
        )
    }
}
