//! The session table.
//!
//! The manager owns every live session (arena-by-id: callers hold
//! `Arc<Mutex<SecureSession>>` handles, the table holds the authoritative
//! reference). Lookups go through 16 shards keyed by the session-id hash so
//! concurrent traffic on different sessions never contends on one lock. A
//! background sweeper closes expired and idle sessions; lifecycle events go
//! out on a broadcast channel.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{
    error::SessionError,
    session::{ExpiryReason, SecureSession, SessionState},
};

const SHARD_COUNT: usize = 16;

/// Why a session left the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Explicit,
    Expired,
    Idle,
    MessageLimit,
    DecryptFailed,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Created { session_id: String },
    Expired { session_id: String },
    Closed { session_id: String, reason: CloseReason },
    Rekeyed { session_id: String, step: u32 },
}

/// Borrow-style reference to a managed session: the manager keeps the
/// authoritative copy, callers lock the handle per operation.
pub type SessionHandle = Arc<Mutex<SecureSession>>;

pub struct SessionManager {
    shards: Vec<Mutex<HashMap<String, SessionHandle>>>,
    by_peer: Mutex<HashMap<String, Vec<String>>>,
    events: broadcast::Sender<SessionEvent>,
    sweep_interval: Duration,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::with_sweep_interval(Duration::from_secs(30))
    }

    pub fn with_sweep_interval(sweep_interval: Duration) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
            by_peer: Mutex::new(HashMap::new()),
            events,
            sweep_interval,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn shard_for(&self, session_id: &str) -> &Mutex<HashMap<String, SessionHandle>> {
        let mut hasher = DefaultHasher::new();
        session_id.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % SHARD_COUNT]
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Take ownership of a freshly established session and hand back a
    /// borrowable handle.
    pub fn add(&self, session: SecureSession) -> SessionHandle {
        let session_id = session.session_id().to_string();
        let peer = session.remote_did().to_string();
        let handle = Arc::new(Mutex::new(session));

        self.shard_for(&session_id)
            .lock()
            .insert(session_id.clone(), Arc::clone(&handle));
        self.by_peer
            .lock()
            .entry(peer)
            .or_default()
            .push(session_id.clone());

        info!(session_id = %session_id, "session registered");
        self.emit(SessionEvent::Created { session_id });
        handle
    }

    pub fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.shard_for(session_id).lock().get(session_id).cloned()
    }

    pub fn find_by_peer(&self, peer_did: &str) -> Vec<SessionHandle> {
        let ids = self
            .by_peer
            .lock()
            .get(peer_did)
            .cloned()
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.get(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encrypt through a managed session, reporting rekeys.
    pub fn encrypt(
        &self,
        session_id: &str,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, SessionError> {
        let handle = self.get(session_id).ok_or(SessionError::SessionNotFound)?;
        let (result, rekeyed_to) = {
            let mut session = handle.lock();
            let step_before = session.rekey_step();
            let result = session.encrypt(plaintext, aad);
            let step_after = session.rekey_step();
            (result, (step_after > step_before).then_some(step_after))
        };
        if let Some(step) = rekeyed_to {
            self.emit(SessionEvent::Rekeyed {
                session_id: session_id.to_string(),
                step,
            });
        }
        result
    }

    /// Decrypt through a managed session. An authentication failure closes
    /// the session; the application must re-handshake.
    pub fn decrypt(
        &self,
        session_id: &str,
        wire: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, SessionError> {
        let handle = self.get(session_id).ok_or(SessionError::SessionNotFound)?;
        let (result, rekeyed_to) = {
            let mut session = handle.lock();
            let step_before = session.rekey_step();
            let result = session.decrypt(wire, aad);
            let step_after = session.rekey_step();
            (result, (step_after > step_before).then_some(step_after))
        };
        if let Some(step) = rekeyed_to {
            self.emit(SessionEvent::Rekeyed {
                session_id: session_id.to_string(),
                step,
            });
        }
        if matches!(result, Err(SessionError::DecryptFailed)) {
            self.close_with_reason(session_id, CloseReason::DecryptFailed);
        }
        result
    }

    /// Explicitly close and remove a session.
    pub fn close(&self, session_id: &str) -> Result<(), SessionError> {
        if self.close_with_reason(session_id, CloseReason::Explicit) {
            Ok(())
        } else {
            Err(SessionError::SessionNotFound)
        }
    }

    fn close_with_reason(&self, session_id: &str, reason: CloseReason) -> bool {
        let handle = {
            let mut shard = self.shard_for(session_id).lock();
            shard.remove(session_id)
        };
        let Some(handle) = handle else {
            return false;
        };

        let (peer, was_open) = {
            let mut session = handle.lock();
            let was_open = session.state() != SessionState::Closed;
            session.close();
            (session.remote_did().to_string(), was_open)
        };

        let mut by_peer = self.by_peer.lock();
        if let Some(ids) = by_peer.get_mut(&peer) {
            ids.retain(|id| id != session_id);
            if ids.is_empty() {
                by_peer.remove(&peer);
            }
        }
        drop(by_peer);

        // Exactly one close notification per session.
        if was_open {
            if matches!(reason, CloseReason::Expired | CloseReason::Idle) {
                self.emit(SessionEvent::Expired {
                    session_id: session_id.to_string(),
                });
            }
            self.emit(SessionEvent::Closed {
                session_id: session_id.to_string(),
                reason,
            });
        }
        true
    }

    /// Close every session that exceeded a lifecycle bound. Shards are
    /// walked sequentially so the sweeper never holds more than one shard
    /// lock at a time.
    pub fn sweep(&self) {
        let mut to_close: Vec<(String, CloseReason)> = Vec::new();
        for shard in &self.shards {
            let guard = shard.lock();
            for (id, handle) in guard.iter() {
                let session = handle.lock();
                if let Some(reason) = session.expiry_reason() {
                    let reason = match reason {
                        ExpiryReason::MaxAge => CloseReason::Expired,
                        ExpiryReason::Idle => CloseReason::Idle,
                        ExpiryReason::MessageLimit => CloseReason::MessageLimit,
                    };
                    to_close.push((id.clone(), reason));
                }
            }
        }
        for (id, reason) in to_close {
            debug!(session_id = %id, ?reason, "sweeper closing session");
            self.close_with_reason(&id, reason);
        }
    }

    /// Run `sweep` on an interval until the manager is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        let interval = self.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.sweep();
            }
        })
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
