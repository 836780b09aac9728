//! DID document caching.
//!
//! Two tiers: a bounded in-process LRU behind a readers-preferred lock, and
//! an optional durable [`DocumentStore`] KV (logical keys `did:<did>`).
//! Stale reads within the TTL are acceptable while the registry event
//! stream is healthy; events invalidate entries out of band.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use crate::{did::Did, document::DidDocument, error::DidError};

/// In-process tier.
pub struct DocumentCache {
    inner: RwLock<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

struct CacheEntry {
    document: DidDocument,
    expires_at: Instant,
}

impl DocumentCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("max(1) is non-zero");
        Self {
            inner: RwLock::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn get(&self, did: &Did) -> Option<DidDocument> {
        let key = did.to_string();
        // peek() keeps this a shared-lock read; LRU order only changes on
        // insert, which is fine for a cache where reads dominate.
        let guard = self.inner.read();
        let entry = guard.peek(&key)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(entry.document.clone())
    }

    pub fn insert(&self, document: DidDocument) {
        let key = document.id.to_string();
        let entry = CacheEntry {
            document,
            expires_at: Instant::now() + self.ttl,
        };
        self.inner.write().put(key, entry);
    }

    pub fn invalidate(&self, did: &Did) {
        self.inner.write().pop(&did.to_string());
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Serialized form held by the durable tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument {
    pub document: DidDocument,
    pub expires_at: DateTime<Utc>,
}

impl StoredDocument {
    pub fn is_fresh(&self) -> bool {
        self.expires_at > Utc::now()
    }
}

/// Durable cache tier. Implementations wrap whatever KV the host
/// application has; errors are logged and never block resolution.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<StoredDocument>, DidError>;
    async fn put(&self, key: &str, value: &StoredDocument) -> Result<(), DidError>;
    async fn remove(&self, key: &str) -> Result<(), DidError>;
}

/// Logical key for the durable tier.
pub fn store_key(did: &Did) -> String {
    format!("did:{did}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::AgentMetadata;
    use sage_crypto::{KeyAlgorithm, PublicKey};

    fn doc(did: &str) -> DidDocument {
        DidDocument::from_metadata(&AgentMetadata {
            did: Did::parse(did).unwrap(),
            name: "a".into(),
            description: String::new(),
            endpoint: String::new(),
            public_key: PublicKey::new(KeyAlgorithm::Ed25519, vec![1u8; 32]),
            additional_keys: Vec::new(),
            capabilities: "{}".into(),
            owner: "0x1".into(),
            registered_at: Utc::now(),
            updated_at: Utc::now(),
            active: true,
            nonce: 0,
            chain_id: None,
        })
    }

    #[test]
    fn insert_get_invalidate() {
        let cache = DocumentCache::new(8, Duration::from_secs(60));
        let did = Did::parse("did:sage:ethereum:0xAAAA").unwrap();
        assert!(cache.get(&did).is_none());

        cache.insert(doc("did:sage:ethereum:0xAAAA"));
        assert!(cache.get(&did).is_some());

        cache.invalidate(&did);
        assert!(cache.get(&did).is_none());
    }

    #[test]
    fn ttl_expires_entries() {
        let cache = DocumentCache::new(8, Duration::from_millis(0));
        let did = Did::parse("did:sage:ethereum:0xAAAA").unwrap();
        cache.insert(doc("did:sage:ethereum:0xAAAA"));
        assert!(cache.get(&did).is_none());
    }

    #[test]
    fn capacity_evicts_oldest() {
        let cache = DocumentCache::new(2, Duration::from_secs(60));
        cache.insert(doc("did:sage:ethereum:0x01"));
        cache.insert(doc("did:sage:ethereum:0x02"));
        cache.insert(doc("did:sage:ethereum:0x03"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&Did::parse("did:sage:ethereum:0x01").unwrap()).is_none());
    }
}
