//! sage-did — decentralized identity for SAGE agents
//!
//! A DID of the form `did:sage:<chain>:<identifier>` names an agent whose
//! identity key and endpoint live in an on-chain registry. This crate owns:
//!
//! - `did`       — DID syntax, chain routing
//! - `metadata`  — on-chain agent records and registration inputs
//! - `document`  — W3C-style DID documents derived from records
//! - `ownership` — owner-signature construction and verification
//! - `registry`  — the polymorphic registry client: in-memory contract
//!                 model, Ethereum/Kaia and Solana adapters, commit-reveal
//!                 variant, chain router
//! - `resolver`  — cached DID resolution with retry, circuit breaker and
//!                 event-driven invalidation
//!
//! The crate never opens sockets itself; chain I/O goes through the
//! injected [`registry::ChainRpc`] capability.

pub mod cache;
pub mod did;
pub mod document;
pub mod error;
pub mod metadata;
pub mod ownership;
pub mod registry;
pub mod resolver;

pub use did::{Chain, Did};
pub use document::{DidDocument, ServiceEndpoint, VerificationMethod};
pub use error::{DidError, RegistryError};
pub use metadata::{AgentMetadata, RegistrationRequest, RegistrationResult, UpdateFields};
pub use registry::{RegistryClient, RegistryEvent, RegistryRouter};
pub use resolver::{Resolver, ResolverConfig};
