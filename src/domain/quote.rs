//! Top-of-book quote observations.

use crate::domain::{Decimal, Instrument, TimeMs};
use serde::{Deserialize, Serialize};

/// Best bid/ask for an instrument at an observed instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub time_ms: TimeMs,
    pub instrument: Instrument,
    pub bid: Decimal,
    pub ask: Decimal,
}

/// Which side of a quote to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSide {
    Bid,
    Ask,
    Mid,
}

impl PriceSide {
    /// Close-out side for an open position: a long exits by selling into the bid,
    /// a short exits by buying from the ask.
    pub fn close_out(position: Decimal) -> Self {
        if position.is_positive() {
            PriceSide::Bid
        } else {
            PriceSide::Ask
        }
    }
}

impl Quote {
    pub fn new(time_ms: TimeMs, instrument: Instrument, bid: Decimal, ask: Decimal) -> Self {
        Self {
            time_ms,
            instrument,
            bid,
            ask,
        }
    }

    /// Both sides strictly positive.
    pub fn is_valid(&self) -> bool {
        self.bid.is_positive() && self.ask.is_positive()
    }

    pub fn price(&self, side: PriceSide) -> Decimal {
        match side {
            PriceSide::Bid => self.bid,
            PriceSide::Ask => self.ask,
            PriceSide::Mid => Decimal::mid(self.bid, self.ask),
        }
    }
}
