//! Cached DID resolution.
//!
//! `resolve` serves from the in-process cache when fresh, then the durable
//! store, then the chain registry. Registry reads are wrapped in
//! exponential backoff and a per-chain circuit breaker so a dead chain
//! degrades to fast `ChainUnavailable` errors instead of pile-ups. Registry
//! events (update/deactivate) invalidate cache entries through a single
//! invalidation task.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use sage_crypto::KeyAlgorithm;

use crate::{
    cache::{store_key, DocumentCache, DocumentStore, StoredDocument},
    did::{Chain, Did},
    document::DidDocument,
    error::{DidError, RegistryError},
    registry::{RegistryEvent, RegistryRouter},
};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub factor: u32,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(200),
            factor: 2,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * self.factor.saturating_pow(attempt)
    }
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
    pub retry: RetryPolicy,
    /// Consecutive failures before the breaker opens.
    pub breaker_threshold: u32,
    /// How long an open breaker rejects calls before a probe is allowed.
    pub breaker_cooldown: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 1024,
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            retry: RetryPolicy::default(),
            breaker_threshold: 5,
            breaker_cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Default)]
struct CircuitBreaker {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    /// Err while open; after the cooldown one probe call is let through.
    fn check(&mut self, cooldown: Duration) -> Result<(), DidError> {
        if let Some(opened) = self.opened_at {
            if opened.elapsed() < cooldown {
                return Err(DidError::Registry(RegistryError::ChainUnavailable(
                    "circuit breaker open".into(),
                )));
            }
            // Half-open: allow the caller through; on_failure re-opens.
            self.opened_at = None;
        }
        Ok(())
    }

    fn on_success(&mut self) {
        self.consecutive_failures = 0;
        self.opened_at = None;
    }

    fn on_failure(&mut self, threshold: u32) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= threshold {
            self.opened_at = Some(Instant::now());
        }
    }
}

pub struct Resolver {
    router: Arc<RegistryRouter>,
    cache: DocumentCache,
    store: Option<Arc<dyn DocumentStore>>,
    breakers: Mutex<HashMap<Chain, CircuitBreaker>>,
    config: ResolverConfig,
}

impl Resolver {
    pub fn new(router: Arc<RegistryRouter>, config: ResolverConfig) -> Self {
        let cache = DocumentCache::new(config.cache_capacity, config.cache_ttl);
        Self {
            router,
            cache,
            store: None,
            breakers: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Resolve a DID to its document, serving cached copies when fresh.
    pub async fn resolve(&self, did: &Did) -> Result<DidDocument, DidError> {
        if let Some(document) = self.cache.get(did) {
            debug!(did = %did, "cache hit");
            return Ok(document);
        }

        if let Some(store) = &self.store {
            match store.get(&store_key(did)).await {
                Ok(Some(stored)) if stored.is_fresh() => {
                    debug!(did = %did, "durable store hit");
                    self.cache.insert(stored.document.clone());
                    return Ok(stored.document);
                }
                Ok(_) => {}
                // A broken store tier must never stall resolution.
                Err(e) => warn!(did = %did, error = %e, "durable store read failed"),
            }
        }

        let document = self.resolve_from_chain(did).await?;
        self.cache.insert(document.clone());
        if let Some(store) = &self.store {
            let stored = StoredDocument {
                document: document.clone(),
                expires_at: chrono::Utc::now()
                    + chrono::Duration::from_std(self.config.cache_ttl)
                        .unwrap_or_else(|_| chrono::Duration::hours(24)),
            };
            if let Err(e) = store.put(&store_key(did), &stored).await {
                warn!(did = %did, error = %e, "durable store write failed");
            }
        }
        Ok(document)
    }

    /// Convenience used during handshake: the record must be active and
    /// carry a key of the requested algorithm.
    pub async fn resolve_public_key(
        &self,
        did: &Did,
        algorithm: KeyAlgorithm,
    ) -> Result<Vec<u8>, DidError> {
        let document = self.resolve(did).await?;
        if !document.active {
            return Err(DidError::Deactivated(did.to_string()));
        }
        Ok(document.public_key(algorithm)?.to_vec())
    }

    /// Drop a cached document; the next resolve re-queries the chain.
    pub async fn invalidate(&self, did: &Did) {
        self.cache.invalidate(did);
        if let Some(store) = &self.store {
            if let Err(e) = store.remove(&store_key(did)).await {
                warn!(did = %did, error = %e, "durable store eviction failed");
            }
        }
    }

    async fn resolve_from_chain(&self, did: &Did) -> Result<DidDocument, DidError> {
        let chain = did.chain();
        self.breakers
            .lock()
            .entry(chain)
            .or_default()
            .check(self.config.breaker_cooldown)?;

        let client = self.router.client_for(chain)?;
        let mut attempt = 0u32;
        loop {
            match client.resolve(did).await {
                Ok(metadata) => {
                    self.breakers.lock().entry(chain).or_default().on_success();
                    return Ok(DidDocument::from_metadata(&metadata));
                }
                Err(RegistryError::NotFound) => {
                    // A missing record is an answer, not a chain failure.
                    self.breakers.lock().entry(chain).or_default().on_success();
                    return Err(DidError::NotFound(did.to_string()));
                }
                Err(RegistryError::AgentInactive) => {
                    self.breakers.lock().entry(chain).or_default().on_success();
                    return Err(DidError::Deactivated(did.to_string()));
                }
                Err(e) if e.is_retryable() && attempt + 1 < self.config.retry.max_attempts => {
                    let delay = self.config.retry.delay_for(attempt);
                    warn!(did = %did, error = %e, attempt, "registry read failed, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        self.breakers
                            .lock()
                            .entry(chain)
                            .or_default()
                            .on_failure(self.config.breaker_threshold);
                    }
                    return Err(e.into());
                }
            }
        }
    }

    /// Subscribe to every routed chain's events and invalidate matching
    /// cache entries. Per-chain forwarders feed one invalidation task so
    /// cache write locks are taken from a single place.
    pub fn spawn_event_pump(self: &Arc<Self>) -> EventPump {
        let (tx, mut rx) = mpsc::channel::<RegistryEvent>(256);

        let mut handles = Vec::new();
        for chain in self.router.chains() {
            let client = match self.router.client_for(chain) {
                Ok(c) => c,
                Err(_) => continue,
            };
            let mut events = client.watch_events();
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                while let Ok(event) = events.recv().await {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(tx);

        let resolver = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match &event {
                    RegistryEvent::Updated { did, .. } | RegistryEvent::Deactivated { did, .. } => {
                        info!(did = %did, "registry event, invalidating cache entry");
                        resolver.invalidate(did).await;
                    }
                    RegistryEvent::Registered { .. } => {}
                }
            }
        }));

        EventPump { handles }
    }
}

/// Handles for the resolver's background tasks; aborted on drop.
pub struct EventPump {
    handles: Vec<JoinHandle<()>>,
}

impl Drop for EventPump {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}
