//! Address encodings for both ledger models

use crate::config::Base58Prefixes;
use crate::error::{SwapError, SwapResult};

use ethers::types::Address;
use ethers::utils::to_checksum;
use std::str::FromStr;

/// Kind of base58check address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    PubkeyHash,
    ScriptHash,
}

/// Base58check codec for one chain's version bytes
#[derive(Debug, Clone, Copy)]
pub struct Base58Codec {
    prefixes: Base58Prefixes,
}

impl Base58Codec {
    pub fn new(prefixes: Base58Prefixes) -> Self {
        Self { prefixes }
    }

    pub fn encode(&self, kind: AddressKind, hash: &[u8; 20]) -> String {
        let version = match kind {
            AddressKind::PubkeyHash => self.prefixes.pubkey_addr,
            AddressKind::ScriptHash => self.prefixes.script_addr,
        };
        let mut payload = Vec::with_capacity(21);
        payload.push(version);
        payload.extend_from_slice(hash);
        bs58::encode(payload).with_check().into_string()
    }

    pub fn decode(&self, address: &str) -> SwapResult<(AddressKind, [u8; 20])> {
        let payload = bs58::decode(address)
            .with_check(None)
            .into_vec()
            .map_err(|e| SwapError::malformed_address(address, e.to_string()))?;

        if payload.len() != 21 {
            return Err(SwapError::malformed_address(
                address,
                format!("expected 21 byte payload, got {}", payload.len()),
            ));
        }

        let kind = if payload[0] == self.prefixes.pubkey_addr {
            AddressKind::PubkeyHash
        } else if payload[0] == self.prefixes.script_addr {
            AddressKind::ScriptHash
        } else {
            return Err(SwapError::malformed_address(
                address,
                format!("unexpected version byte {}", payload[0]),
            ));
        };

        let mut hash = [0u8; 20];
        hash.copy_from_slice(&payload[1..]);
        Ok((kind, hash))
    }

    /// Decode an address that must be pay-to-pubkey-hash
    pub fn pubkey_hash(&self, address: &str) -> SwapResult<[u8; 20]> {
        match self.decode(address)? {
            (AddressKind::PubkeyHash, hash) => Ok(hash),
            (AddressKind::ScriptHash, _) => Err(SwapError::malformed_address(
                address,
                "expected a pubkey hash address",
            )),
        }
    }
}

/// Parse a 40 or 42 character hex account address
pub fn parse_account_address(address: &str) -> SwapResult<Address> {
    let hex_part = match address.len() {
        42 if address.starts_with("0x") || address.starts_with("0X") => &address[2..],
        40 => address,
        _ => {
            return Err(SwapError::malformed_address(
                address,
                "Provided address is not properly formatted.",
            ))
        }
    };
    Address::from_str(hex_part).map_err(|e| SwapError::malformed_address(address, e.to_string()))
}

/// EIP-55 checksummed form of an account address
pub fn unify_account_address(address: &str) -> SwapResult<String> {
    parse_account_address(address).map(|a| to_checksum(&a, None))
}
