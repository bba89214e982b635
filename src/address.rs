use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type Amount = u128;

/// Identity of an account or of a deployed instance.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Deterministic instance address: first 20 bytes of
    /// `sha256(kind || creator || nonce)`, hex encoded with a `0x` prefix.
    pub fn derive(kind: &str, creator: &Address, nonce: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(kind.as_bytes());
        hasher.update(creator.0.as_bytes());
        hasher.update(nonce.to_le_bytes());
        let digest = hasher.finalize();
        Self(format!("0x{}", hex::encode(&digest[..20])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for Address {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::str::FromStr for Address {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_addresses_depend_on_kind_creator_and_nonce() {
        let alice = Address::from("alice");
        let a = Address::derive("ledger", &alice, 0);
        assert_eq!(a, Address::derive("ledger", &alice, 0));
        assert_ne!(a, Address::derive("ledger", &alice, 1));
        assert_ne!(a, Address::derive("stimulus", &alice, 0));
        assert_ne!(a, Address::derive("ledger", &"bob".into(), 0));
        assert!(a.as_str().starts_with("0x"));
        assert_eq!(a.as_str().len(), 42);
    }
}
