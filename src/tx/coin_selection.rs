//! Greedy largest-first coin selection

use crate::chain::UnspentOutput;

use rust_decimal::Decimal;
use tracing::debug;

/// Picks unspent outputs to cover a target amount
pub struct CoinSelector;

impl CoinSelector {
    /// Sort by value descending. Stable, so equal values keep their input order.
    pub fn sort_descending(unspent: &mut [UnspentOutput]) {
        unspent.sort_by(|a, b| b.value.cmp(&a.value));
    }

    /// Take the shortest prefix of `unspent` whose total strictly exceeds `target`.
    ///
    /// `unspent` must already be sorted by value descending. Returns `None` when
    /// the whole set is exhausted without exceeding the target.
    pub fn select(
        unspent: &[UnspentOutput],
        target: Decimal,
    ) -> Option<(Vec<UnspentOutput>, Decimal)> {
        let mut selected = Vec::new();
        let mut total = Decimal::ZERO;

        for output in unspent {
            selected.push(output.clone());
            total += output.value;
            if total > target {
                return Some((selected, total));
            }
        }

        debug!("Cannot find enough unspent outputs. Found {} from {}.", total, target);
        None
    }
}
