//! Cluster identity derived from settings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

const PREFIX: &str = "cl_";
const DIGEST_BYTES: usize = 16;

/// Errors parsing an identity read back from a container label.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("cluster identity must start with 'cl_'")]
    MissingPrefix,

    #[error("cluster identity must have 32 hex characters, got {0}")]
    InvalidLength(usize),

    #[error("cluster identity is not lowercase hex")]
    InvalidHex,
}

/// Stable identifier for a cluster configuration.
///
/// Computed as the first 128 bits of SHA-256 over a length-prefixed
/// encoding of the settings in key order. Two settings maps with the same
/// pairs always produce the same identity, on any host and across restarts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClusterIdentity(String);

impl ClusterIdentity {
    /// Compute the identity of a settings map.
    pub fn of(settings: &BTreeMap<String, String>) -> Self {
        Self::from_pairs(settings.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    /// Compute the identity of arbitrary key/value pairs.
    ///
    /// Pairs are sorted before hashing; for duplicate keys the last value wins,
    /// matching what collecting into a map would do.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let normalized: BTreeMap<&str, &str> = pairs.into_iter().collect();

        let mut hasher = Sha256::new();
        for (key, value) in normalized {
            hasher.update((key.len() as u64).to_be_bytes());
            hasher.update(key.as_bytes());
            hasher.update((value.len() as u64).to_be_bytes());
            hasher.update(value.as_bytes());
        }
        let digest = hasher.finalize();

        Self(format!("{PREFIX}{}", hex::encode(&digest[..DIGEST_BYTES])))
    }

    /// Parse an identity previously produced by [`ClusterIdentity::of`].
    pub fn parse(s: &str) -> Result<Self, IdentityError> {
        let hex_part = s.strip_prefix(PREFIX).ok_or(IdentityError::MissingPrefix)?;
        if hex_part.len() != DIGEST_BYTES * 2 {
            return Err(IdentityError::InvalidLength(hex_part.len()));
        }
        if !hex_part
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(IdentityError::InvalidHex);
        }
        Ok(Self(s.to_string()))
    }

    /// Get the identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClusterIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ClusterIdentity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ClusterIdentity> for String {
    fn from(value: ClusterIdentity) -> Self {
        value.0
    }
}
