//! DID syntax: `did:sage:<chain>:<identifier>`.
//!
//! `<chain>` is lowercase and routes to a registry client; `<identifier>` is
//! chain-appropriate (hex address, base58 fingerprint) and case-sensitive.
//! A DID is immutable once created and unique within its chain.

use serde::{Deserialize, Serialize};

use crate::error::DidError;

/// Maximum encoded DID length on the wire.
pub const MAX_DID_LEN: usize = 256;

const METHOD_PREFIX: &str = "did:sage:";

/// Chains a SAGE registry can live on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Ethereum,
    Kaia,
    Solana,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::Kaia => "kaia",
            Chain::Solana => "solana",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DidError> {
        match s {
            "ethereum" => Ok(Chain::Ethereum),
            "kaia" => Ok(Chain::Kaia),
            "solana" => Ok(Chain::Solana),
            other => Err(DidError::UnsupportedChain(other.to_string())),
        }
    }
}

impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed agent DID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Did {
    chain: Chain,
    identifier: String,
}

impl Did {
    pub fn new(chain: Chain, identifier: impl Into<String>) -> Result<Self, DidError> {
        let identifier = identifier.into();
        if identifier.is_empty() {
            return Err(DidError::Malformed("empty identifier".into()));
        }
        let did = Self { chain, identifier };
        if did.to_string().len() > MAX_DID_LEN {
            return Err(DidError::Malformed("DID exceeds 256 bytes".into()));
        }
        Ok(did)
    }

    /// Parse `did:sage:<chain>:<identifier>`.
    pub fn parse(s: &str) -> Result<Self, DidError> {
        if s.len() > MAX_DID_LEN {
            return Err(DidError::Malformed("DID exceeds 256 bytes".into()));
        }
        let rest = s
            .strip_prefix(METHOD_PREFIX)
            .ok_or_else(|| DidError::Malformed(format!("missing `{METHOD_PREFIX}` prefix")))?;
        let (chain_str, identifier) = rest
            .split_once(':')
            .ok_or_else(|| DidError::Malformed("missing chain segment".into()))?;
        if identifier.is_empty() {
            return Err(DidError::Malformed("empty identifier".into()));
        }
        Ok(Self {
            chain: Chain::parse(chain_str)?,
            identifier: identifier.to_string(),
        })
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl std::fmt::Display for Did {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{METHOD_PREFIX}{}:{}", self.chain.as_str(), self.identifier)
    }
}

impl TryFrom<String> for Did {
    type Error = DidError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Did::parse(&s)
    }
}

impl From<Did> for String {
    fn from(did: Did) -> Self {
        did.to_string()
    }
}

impl std::str::FromStr for Did {
    type Err = DidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Did::parse(s)
    }
}
