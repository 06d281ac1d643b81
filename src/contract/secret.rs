//! Swap secrets and their committed hashes
//!
//! Both ledger models commit to RIPEMD160(secret), so one 20-byte hash ties
//! the two legs of a swap together.

use crate::error::{SwapError, SwapResult};

use rand::rngs::OsRng;
use rand::RngCore;
use ripemd::{Digest, Ripemd160};
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub const SECRET_SIZE: usize = 32;
pub const SECRET_HASH_SIZE: usize = 20;

/// Preimage revealed by a redemption
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Secret([u8; SECRET_SIZE]);

impl Secret {
    /// Fresh secret from the OS random source
    pub fn generate() -> Self {
        let mut bytes = [0u8; SECRET_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> SwapResult<Self> {
        let bytes: [u8; SECRET_SIZE] = bytes.try_into().map_err(|_| {
            SwapError::Codec(format!(
                "secret must be {} bytes, got {}",
                SECRET_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; SECRET_SIZE] {
        &self.0
    }

    pub fn hash(&self) -> SecretHash {
        SecretHash::of(self)
    }
}

impl From<[u8; SECRET_SIZE]> for Secret {
    fn from(bytes: [u8; SECRET_SIZE]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({})", self)
    }
}

impl FromStr for Secret {
    type Err = SwapError;

    fn from_str(s: &str) -> SwapResult<Self> {
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|e| SwapError::Codec(format!("secret: {}", e)))?;
        Self::from_slice(&bytes)
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Hash committed to by both legs of a swap
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SecretHash([u8; SECRET_HASH_SIZE]);

impl SecretHash {
    pub fn of(secret: &Secret) -> Self {
        let digest = Ripemd160::digest(secret.as_bytes());
        let mut bytes = [0u8; SECRET_HASH_SIZE];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> SwapResult<Self> {
        let bytes: [u8; SECRET_HASH_SIZE] = bytes.try_into().map_err(|_| {
            SwapError::Codec(format!(
                "secret hash must be {} bytes, got {}",
                SECRET_HASH_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; SECRET_HASH_SIZE] {
        &self.0
    }

    pub fn matches(&self, secret: &Secret) -> bool {
        SecretHash::of(secret) == *self
    }

    /// Fail fast before building a transaction the ledger would reject
    pub fn verify(&self, secret: &Secret) -> SwapResult<()> {
        if self.matches(secret) {
            Ok(())
        } else {
            Err(SwapError::SecretMismatch {
                secret_hash: self.to_string(),
            })
        }
    }
}

impl From<[u8; SECRET_HASH_SIZE]> for SecretHash {
    fn from(bytes: [u8; SECRET_HASH_SIZE]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for SecretHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for SecretHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretHash({})", self)
    }
}

impl FromStr for SecretHash {
    type Err = SwapError;

    fn from_str(s: &str) -> SwapResult<Self> {
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|e| SwapError::Codec(format!("secret hash: {}", e)))?;
        Self::from_slice(&bytes)
    }
}

impl Serialize for SecretHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
