//! Fill type representing a single matched trade execution.

use crate::domain::{Decimal, Instrument, Side, TimeMs};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single trade fill/execution, produced upstream and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    /// Time of the fill in milliseconds since Unix epoch.
    pub time_ms: TimeMs,
    /// Instrument being traded.
    pub instrument: Instrument,
    /// Trade side (Buy or Sell).
    pub side: Side,
    /// Quantity traded; must be > 0.
    pub amount: Decimal,
    /// Price per unit in the instrument's native currency; must be > 0.
    pub price: Decimal,
}

/// Data-contract violation on a single fill.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidFill {
    #[error("fill amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),
    #[error("fill price must be positive, got {0}")]
    NonPositivePrice(Decimal),
}

impl Fill {
    /// Create a new Fill.
    pub fn new(
        time_ms: TimeMs,
        instrument: Instrument,
        side: Side,
        amount: Decimal,
        price: Decimal,
    ) -> Self {
        Fill {
            time_ms,
            instrument,
            side,
            amount,
            price,
        }
    }

    /// Reject fills with a non-positive amount or price. Values are never clamped.
    pub fn validate(&self) -> Result<(), InvalidFill> {
        if !self.amount.is_positive() {
            return Err(InvalidFill::NonPositiveAmount(self.amount));
        }
        if !self.price.is_positive() {
            return Err(InvalidFill::NonPositivePrice(self.price));
        }
        Ok(())
    }

    /// Native-currency notional (amount * price).
    pub fn notional(&self) -> Decimal {
        self.amount * self.price
    }
}
