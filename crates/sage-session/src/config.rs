//! Session lifecycle policy.

use std::time::Duration;

/// Liveness and rekey bounds. All fields are hard limits except the rekey
/// interval, which triggers a soft key rotation without closing the session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Hard expiry measured from creation.
    pub max_age: Duration,
    /// Expiry measured from the last successful encrypt/decrypt.
    pub idle_timeout: Duration,
    /// Total records (both directions) before the session must close.
    pub max_messages: u64,
    /// Soft rekey after this much elapsed time.
    pub rekey_interval: Duration,
    /// Soft rekey after this many records.
    pub rekey_messages: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(60 * 60),
            idle_timeout: Duration::from_secs(15 * 60),
            max_messages: 10_000,
            rekey_interval: Duration::from_secs(10 * 60),
            rekey_messages: 1_000,
        }
    }
}
