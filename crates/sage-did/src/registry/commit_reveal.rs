//! Commit-reveal registration.
//!
//! The AgentCardRegistry variant resists front-running by splitting
//! registration into three on-chain phases:
//!
//! 1. `commit(commit_hash, stake)` where
//!    `commit_hash = Keccak-256(did ‖ Keccak-256(public_key) ‖ owner ‖ salt ‖ chain_id)`;
//! 2. after `min_commit_delay` and before `max_commit_age`,
//!    `register_with_params` reveals the parameters, which must hash back to
//!    the commitment; the record is stored *pending*;
//! 3. after `activation_delay`, `activate` flips the record active and
//!    refunds the stake.
//!
//! The client tracks each commitment locally (`Committed → Registered →
//! Activated`) so an interrupted flow can be resumed, and
//! [`CommitRevealRegistry::run_full_flow`] drives all three phases with the
//! required waits.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

use crate::{
    did::{Chain, Did},
    error::RegistryError,
    metadata::{RegistrationRequest, RegistrationResult},
};

use super::{memory::InMemoryRegistry, RegistryClient, RegistryEvent};

/// Phase timing and stake parameters. The defaults are the representative
/// contract values; tests compress them.
#[derive(Debug, Clone)]
pub struct CommitRevealConfig {
    pub min_commit_delay: Duration,
    pub max_commit_age: Duration,
    pub activation_delay: Duration,
    /// Fixed stake escrowed at commit time, refunded at activation.
    pub stake: u64,
}

impl Default for CommitRevealConfig {
    fn default() -> Self {
        Self {
            min_commit_delay: Duration::from_secs(60),
            max_commit_age: Duration::from_secs(3600),
            activation_delay: Duration::from_secs(3600),
            stake: 1_000_000_000,
        }
    }
}

/// Where a commitment sits in the three-phase flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitmentPhase {
    Committed,
    Registered,
    Activated,
}

#[derive(Debug, Clone)]
struct Commitment {
    stake: u64,
    committed_at: DateTime<Utc>,
    registered_at: Option<DateTime<Utc>>,
    agent_id: Option<String>,
    phase: CommitmentPhase,
}

/// Compute the commitment hash for a registration request and salt.
pub fn commit_hash(request: &RegistrationRequest, salt: &[u8; 16]) -> String {
    let key_digest = Keccak256::digest(&request.public_key.bytes);
    let mut hasher = Keccak256::new();
    hasher.update(request.did.to_string().as_bytes());
    hasher.update(key_digest);
    hasher.update(request.owner.as_bytes());
    hasher.update(salt);
    hasher.update(request.chain_id.unwrap_or(0).to_be_bytes());
    hex::encode(hasher.finalize())
}

/// Commit-reveal registry: the three-phase contract model over the shared
/// record store. Reads, updates, deactivation and events behave exactly as
/// in the direct registry.
pub struct CommitRevealRegistry {
    records: InMemoryRegistry,
    config: CommitRevealConfig,
    commitments: Mutex<HashMap<String, Commitment>>,
}

impl CommitRevealRegistry {
    pub fn new(chain: Chain, config: CommitRevealConfig) -> Self {
        Self {
            records: InMemoryRegistry::new(chain),
            config,
            commitments: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CommitRevealConfig {
        &self.config
    }

    /// Phase of a commitment, if the hash is known.
    pub fn commitment_phase(&self, hash: &str) -> Option<CommitmentPhase> {
        self.commitments.lock().get(hash).map(|c| c.phase)
    }

    /// Stake currently escrowed for a commitment (0 after refund).
    pub fn escrowed_stake(&self, hash: &str) -> u64 {
        self.commitments.lock().get(hash).map_or(0, |c| c.stake)
    }

    /// Phase (a): escrow the stake against a parameter hash.
    pub async fn commit(&self, hash: &str, stake: u64) -> Result<(), RegistryError> {
        if stake < self.config.stake {
            return Err(RegistryError::StakeMissing);
        }
        let mut commitments = self.commitments.lock();
        if commitments.contains_key(hash) {
            return Err(RegistryError::StateMismatch("commitment already exists".into()));
        }
        commitments.insert(
            hash.to_string(),
            Commitment {
                stake,
                committed_at: Utc::now(),
                registered_at: None,
                agent_id: None,
                phase: CommitmentPhase::Committed,
            },
        );
        info!(commit_hash = %hash, "commitment escrowed");
        Ok(())
    }

    /// Phase (b): reveal the parameters. The hash must match the commitment,
    /// the minimum delay must have elapsed, and the commitment must not have
    /// expired. The record is stored pending (inactive).
    pub async fn register_with_params(
        &self,
        hash: &str,
        request: RegistrationRequest,
        salt: &[u8; 16],
    ) -> Result<RegistrationResult, RegistryError> {
        if commit_hash(&request, salt) != hash {
            return Err(RegistryError::StateMismatch(
                "parameters do not match commitment".into(),
            ));
        }
        {
            let commitments = self.commitments.lock();
            let commitment = commitments
                .get(hash)
                .ok_or_else(|| RegistryError::StateMismatch("unknown commitment".into()))?;
            if commitment.phase != CommitmentPhase::Committed {
                return Err(RegistryError::StateMismatch("commitment already revealed".into()));
            }
            let age = Utc::now() - commitment.committed_at;
            if age < chrono_duration(self.config.min_commit_delay) {
                return Err(RegistryError::StateMismatch(
                    "minimum commit delay not elapsed".into(),
                ));
            }
            if age > chrono_duration(self.config.max_commit_age) {
                return Err(RegistryError::StateMismatch("commitment expired".into()));
            }
        }

        // Lock released across the store insert; re-entry with the same hash
        // is caught by the phase check above.
        let result = self.records.insert_pending(&request)?;

        let mut commitments = self.commitments.lock();
        if let Some(commitment) = commitments.get_mut(hash) {
            commitment.phase = CommitmentPhase::Registered;
            commitment.registered_at = Some(Utc::now());
            commitment.agent_id = Some(result.agent_id.clone());
        }
        info!(commit_hash = %hash, agent_id = %result.agent_id, "parameters revealed, record pending");
        Ok(result)
    }

    /// Phase (c): after the activation delay, flip the record active and
    /// refund the stake.
    pub async fn activate(&self, hash: &str) -> Result<u64, RegistryError> {
        let agent_id = {
            let commitments = self.commitments.lock();
            let commitment = commitments
                .get(hash)
                .ok_or_else(|| RegistryError::StateMismatch("unknown commitment".into()))?;
            if commitment.phase != CommitmentPhase::Registered {
                return Err(RegistryError::StateMismatch(
                    "commitment is not in the registered phase".into(),
                ));
            }
            let registered_at = commitment
                .registered_at
                .expect("registered phase always has registered_at");
            if Utc::now() - registered_at < chrono_duration(self.config.activation_delay) {
                return Err(RegistryError::StateMismatch(
                    "activation delay not elapsed".into(),
                ));
            }
            commitment.agent_id.clone().expect("registered phase has agent id")
        };

        self.records.set_active(&agent_id)?;

        let refund = {
            let mut commitments = self.commitments.lock();
            let commitment = commitments.get_mut(hash).expect("checked above");
            commitment.phase = CommitmentPhase::Activated;
            std::mem::take(&mut commitment.stake)
        };
        info!(commit_hash = %hash, agent_id = %agent_id, refund, "agent activated, stake refunded");
        Ok(refund)
    }

    /// Drive all three phases, sleeping through the configured delays.
    /// Completed side effects survive a failure in a later phase; the caller
    /// can resume from the recorded commitment phase.
    pub async fn run_full_flow(
        &self,
        request: RegistrationRequest,
        salt: &[u8; 16],
    ) -> Result<RegistrationResult, RegistryError> {
        let hash = commit_hash(&request, salt);
        self.commit(&hash, self.config.stake).await?;
        tokio::time::sleep(self.config.min_commit_delay).await;
        let result = self.register_with_params(&hash, request, salt).await?;
        tokio::time::sleep(self.config.activation_delay).await;
        self.activate(&hash).await?;
        Ok(result)
    }

    /// The underlying record store, for reads/updates/events.
    pub fn records(&self) -> &impl RegistryClient {
        &self.records
    }

    pub fn watch_events(&self) -> broadcast::Receiver<RegistryEvent> {
        self.records.watch_events()
    }

    /// Lookup helper mirroring the direct registry.
    pub async fn resolve(&self, did: &Did) -> Result<crate::metadata::AgentMetadata, RegistryError> {
        self.records.resolve(did).await
    }
}

fn chrono_duration(d: Duration) -> ChronoDuration {
    ChronoDuration::from_std(d).expect("phase delays fit in chrono range")
}
