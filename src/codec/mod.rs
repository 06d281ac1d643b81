//! Ledger codec boundary
//!
//! Encodes and decodes the contract-bearing parts of ledger-native
//! transactions:
//! - Account-model call data (method selectors + ABI arguments)
//! - UTXO HTLC scripts and their spending scriptSigs
//! - Address encodings for both models

pub mod abi;
pub mod address;
pub mod script;

pub use abi::{method_of, SwapCall, SwapMethod};
pub use address::Base58Codec;
pub use script::HtlcTemplate;
