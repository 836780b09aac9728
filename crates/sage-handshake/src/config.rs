//! Handshake tuning knobs.

use std::time::Duration;

use sage_session::SessionConfig;

#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Deadline for each message round trip.
    pub phase_timeout: Duration,
    /// Deadline for the whole handshake.
    pub overall_timeout: Duration,
    /// Accepted clock skew on message timestamps.
    pub max_clock_skew: Duration,
    /// Entries held by the nonce replay cache.
    pub nonce_cache_capacity: usize,
    /// How long an observed nonce stays in the cache.
    pub nonce_cache_ttl: Duration,
    /// HPKE-seal the Request payload to the responder's identity key
    /// (derived Ed25519→X25519). Off by default; both sides must agree
    /// out of band before enabling.
    pub encrypt_request: bool,
    /// Lifecycle policy for sessions created by successful handshakes.
    pub session: SessionConfig,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            phase_timeout: Duration::from_secs(30),
            overall_timeout: Duration::from_secs(60),
            max_clock_skew: Duration::from_secs(60),
            nonce_cache_capacity: 10_000,
            nonce_cache_ttl: Duration::from_secs(5 * 60),
            encrypt_request: false,
            session: SessionConfig::default(),
        }
    }
}
