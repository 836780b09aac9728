//! Bounded replay cache for handshake nonces.
//!
//! Stores `(peer_did, nonce)` pairs with a TTL. A repeat observation inside
//! the window is a replay. The cache is shared by all concurrent handshakes
//! of one agent; critical sections are O(1) under a coarse lock.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use crate::error::HandshakeError;

pub struct NonceCache {
    inner: Mutex<LruCache<(String, Vec<u8>), Instant>>,
    ttl: Duration,
}

impl NonceCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("max(1) is non-zero");
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Record a nonce observation; errs if it was already seen inside the
    /// TTL window.
    pub fn observe(&self, peer_did: &str, nonce: &[u8]) -> Result<(), HandshakeError> {
        let key = (peer_did.to_string(), nonce.to_vec());
        let now = Instant::now();
        let mut cache = self.inner.lock();
        if let Some(seen_at) = cache.get(&key) {
            if now.duration_since(*seen_at) < self.ttl {
                return Err(HandshakeError::NonceReuse);
            }
        }
        cache.put(key, now);
        Ok(())
    }

    /// Roll back a tentative observation (cancelled handshake).
    pub fn forget(&self, peer_did: &str, nonce: &[u8]) {
        self.inner
            .lock()
            .pop(&(peer_did.to_string(), nonce.to_vec()));
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
