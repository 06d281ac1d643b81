//! Transaction building blocks: amounts, coin selection, fees and unsigned forms

pub mod amount;
pub mod coin_selection;
pub mod fees;
pub mod unsigned;

pub use amount::{Amount, Scale};
pub use coin_selection::CoinSelector;
pub use fees::{FeeEstimate, FeeEstimator, FeeParams, TxFee};
pub use unsigned::{HtlcUnlock, UnsignedTransaction, UnsignedUtxoTransaction};
