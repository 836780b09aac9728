//! sage-session — the SAGE record layer
//!
//! A session turns the seed agreed during a handshake into four directional
//! AEAD keys and encrypts application messages with replay protection and
//! liveness bounds. The manager owns every live session, indexed by id and
//! by peer DID, sweeps out expired ones and publishes lifecycle events.
//!
//! - `keys`    — HKDF key schedule (directional keys, session id, rekey steps)
//! - `replay`  — sliding-window duplicate/ordering check
//! - `session` — encrypt/decrypt, rekey, lifecycle state
//! - `manager` — session table, sweeper task, event hooks
//! - `config`  — lifecycle policy knobs
//! - `error`   — unified error type

pub mod config;
pub mod error;
pub mod keys;
pub mod manager;
pub mod replay;
pub mod session;

pub use config::SessionConfig;
pub use error::SessionError;
pub use keys::{DirectionalKeys, SessionSeed};
pub use manager::{CloseReason, SessionEvent, SessionHandle, SessionManager};
pub use session::{Role, SecureSession, SessionState};
