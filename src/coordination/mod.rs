//! Coordination of the two legs of a cross-chain swap
//!
//! The controller:
//! 1. Proposes a swap by locking the initiator's leg behind a fresh secret
//! 2. Audits counterparty contracts and resolves their stage
//! 3. Participates with the counter-leg, reusing the audited secret hash
//! 4. Redeems, refunds and recovers revealed secrets

pub mod controller;

pub use controller::{LegRequest, SwapController};
