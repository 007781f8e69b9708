//! Stable fill ordering for deterministic processing.

use crate::domain::{Decimal, Fill, Instrument, Side, TimeMs};

/// Stable ordering key for fills.
///
/// Ordering: instrument -> time_ms -> side -> price -> amount.
/// Fills that compare equal are interchangeable for bucket aggregation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FillOrderingKey {
    pub instrument: Instrument,
    pub time_ms: TimeMs,
    pub side: Side,
    pub price: Decimal,
    pub amount: Decimal,
}

impl FillOrderingKey {
    /// Create an ordering key from a Fill.
    pub fn from_fill(fill: &Fill) -> Self {
        FillOrderingKey {
            instrument: fill.instrument.clone(),
            time_ms: fill.time_ms,
            side: fill.side,
            price: fill.price,
            amount: fill.amount,
        }
    }
}

/// Sort fills deterministically, grouping each instrument's fills in time order.
pub fn sort_fills_deterministic(fills: &mut [Fill]) {
    fills.sort_by_cached_key(FillOrderingKey::from_fill);
}
