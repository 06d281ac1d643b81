//! Tesseract HTLC - hash-time-locked atomic swaps across UTXO and account-model chains
//!
//! Builds, audits, redeems and refunds swap contracts on either ledger model
//! through one set of operations, independent of the block-data backend a
//! chain is reached through.

pub mod chain;
pub mod codec;
pub mod config;
pub mod contract;
pub mod coordination;
pub mod error;
pub mod tx;

pub use config::Settings;
pub use coordination::{LegRequest, SwapController};
pub use error::{SwapError, SwapResult};
