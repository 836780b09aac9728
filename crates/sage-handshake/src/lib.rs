//! sage-handshake — authenticated key agreement between SAGE agents
//!
//! Four signed messages over any unary byte transport turn two registered
//! DIDs into one forward-secret session:
//!
//! ```text
//! A (initiator)                         B (responder)
//!   Invitation ───────────────────────▶   resolve A, verify, accept?
//!   Request {EK_A} ────────────────────▶   verify, make EK_B, DH
//!   ◀─────────── Response {EK_B, HPKE confirmation to EK_A}
//!   Complete {HMAC(shared, ...)} ──────▶   verify tag, register session
//! ```
//!
//! Every message is signed by the sender's registry-published identity key
//! and carries a context id, a timestamp (±60 s skew) and a fresh nonce
//! checked against a bounded replay cache. Ephemeral X25519 keys live only
//! for the attempt and zeroize on drop. Both sides derive the same session
//! seed from the DH output and a role-symmetric transcript, hand it to
//! `sage-session`, and register the session with their manager.
//!
//! - `message`     — envelopes, payloads, canonical signing bytes
//! - `initiator`   — the driving side
//! - `responder`   — the accepting side, one state machine per context id
//! - `key_schedule`— transcript and seed derivation
//! - `nonce_cache` — bounded (peer, nonce) replay cache
//! - `transport`   — the byte-channel capability the handshake runs over
//! - `identity`    — a DID plus its identity keypair
//! - `error`       — typed failure reasons, retryable or fatal

pub mod config;
pub mod error;
pub mod identity;
pub mod initiator;
pub mod key_schedule;
pub mod message;
pub mod nonce_cache;
pub mod responder;
pub mod transport;

pub use config::HandshakeConfig;
pub use error::HandshakeError;
pub use identity::AgentIdentity;
pub use initiator::{EstablishedSession, Initiator};
pub use message::{Envelope, MessageType, PROTOCOL_VERSION};
pub use responder::Responder;
pub use transport::{Transport, TransportError};
