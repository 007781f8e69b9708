//! Unrealized PnL of the open position at the bucket's close-out marks.

use super::converter::{DecomposedBucket, MissingQuote};
use super::position_tracker::PositionState;
use crate::domain::Decimal;

/// Unrealized PnL per leg. `None` marks a leg that could not be valued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unrealized {
    pub native: Option<Decimal>,
    pub usd: Option<Decimal>,
    pub base: Option<Decimal>,
    pub quote: Option<Decimal>,
    pub missing: Vec<MissingQuote>,
}

impl Unrealized {
    /// Exactly zero in every leg.
    pub fn flat() -> Self {
        Self {
            native: Some(Decimal::zero()),
            usd: Some(Decimal::zero()),
            base: Some(Decimal::zero()),
            quote: Some(Decimal::zero()),
            missing: Vec::new(),
        }
    }
}

/// `units * price - cost`, unless an input is unresolved.
fn value(units: Decimal, price: Option<Decimal>, cost: Option<Decimal>) -> Option<Decimal> {
    Some(units * price? - cost?)
}

/// Value `state` (already updated for this bucket) at the bucket's marks: bid for
/// a long, ask for a short. A flat position needs no quote at all.
pub fn mark_to_market(state: &PositionState, bucket: &DecomposedBucket) -> Unrealized {
    if state.is_flat() {
        return Unrealized::flat();
    }

    let mut missing = Vec::new();
    let marks = match bucket.close_out_marks(state.cum_amt) {
        Ok(legs) => legs.resolve(&mut missing),
        Err(cause) => {
            return Unrealized {
                native: None,
                usd: None,
                base: None,
                quote: None,
                missing: vec![cause],
            };
        }
    };

    let amt = state.cum_amt;
    missing.sort();
    missing.dedup();
    Unrealized {
        native: value(amt, Some(marks.native), Some(state.cum_cost_native)),
        usd: value(amt, marks.usd, state.cum_cost_usd),
        base: value(amt, marks.base, state.cum_cost_base),
        quote: value(state.quote_amt(), marks.quote_rate, state.cum_cost_quote),
        missing,
    }
}
