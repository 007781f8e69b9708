use crate::domain::{Decimal, Instrument, Side, TimeMs};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::converter::{take_priced, DecomposedBucket, MissingQuote, ResolvedPrices};

/// Fatal, per-instrument failures of the accounting fold.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("corrupt position state for {instrument} at {bucket_time}: {detail}")]
    CorruptPositionState {
        instrument: Instrument,
        bucket_time: TimeMs,
        detail: String,
    },
}

/// Price at which the closed part of a position is realized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RealizationPrice {
    /// Weighted trade price of the bucket on the closing side.
    ///
    /// The default: summed realized PnL of a round trip then equals proceeds
    /// minus cost taken straight from the fills, so a sell of 1 @ 105 against
    /// an entry @ 100 realizes exactly 5 whatever the book showed.
    #[default]
    Trade,
    /// Forward-filled quote on the close-out side (bid for a long, ask for a short).
    Mark,
}

/// How a bucket moved the position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Flat before and after.
    Flat,
    Open,
    Increase,
    /// Open position, zero net traded amount.
    Hold,
    Reduce,
    Close,
    /// Crossed through zero.
    Flip,
}

impl Transition {
    pub fn classify(prev: Decimal, new: Decimal) -> Self {
        match (prev.is_zero(), new.is_zero()) {
            (true, true) => Transition::Flat,
            (true, false) => Transition::Open,
            (false, true) => Transition::Close,
            _ if prev.is_positive() != new.is_positive() => Transition::Flip,
            _ if new.abs() > prev.abs() => Transition::Increase,
            _ if new.abs() < prev.abs() => Transition::Reduce,
            _ => Transition::Hold,
        }
    }
}

/// Running position and cost basis of one instrument.
///
/// Cost legs are `None` once a quote they depended on was unavailable; they stay
/// unresolved until the position is closed or flipped. Realized running totals
/// never recover: once a bucket's term is unknown, so is every later sum.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PositionState {
    /// Signed: positive = long, negative = short, zero = flat.
    pub cum_amt: Decimal,
    pub cum_cost_native: Decimal,
    pub cum_cost_usd: Option<Decimal>,
    pub cum_cost_base: Option<Decimal>,
    /// USD value, at entry rates, of the quote currency held against the position.
    pub cum_cost_quote: Option<Decimal>,
    pub cum_realized_pnl_native: Option<Decimal>,
    pub cum_realized_pnl_usd: Option<Decimal>,
    pub cum_realized_pnl_base: Option<Decimal>,
    pub cum_realized_pnl_quote: Option<Decimal>,
}

impl PositionState {
    /// All-zero state before an instrument's first bucket.
    pub fn new() -> Self {
        Self {
            cum_cost_usd: Some(Decimal::zero()),
            cum_cost_base: Some(Decimal::zero()),
            cum_cost_quote: Some(Decimal::zero()),
            cum_realized_pnl_native: Some(Decimal::zero()),
            cum_realized_pnl_usd: Some(Decimal::zero()),
            cum_realized_pnl_base: Some(Decimal::zero()),
            cum_realized_pnl_quote: Some(Decimal::zero()),
            ..Self::default()
        }
    }

    pub fn is_flat(&self) -> bool {
        self.cum_amt.is_zero()
    }

    /// Quote currency held against the position (negative for a long).
    pub fn quote_amt(&self) -> Decimal {
        -self.cum_cost_native
    }

    fn cost_basis(&self) -> CostBasis {
        CostBasis {
            native: self.cum_cost_native,
            usd: self.cum_cost_usd,
            base: self.cum_cost_base,
            quote: self.cum_cost_quote,
        }
    }

    fn set_cost_basis(&mut self, cost: CostBasis) {
        self.cum_cost_native = cost.native;
        self.cum_cost_usd = cost.usd;
        self.cum_cost_base = cost.base;
        self.cum_cost_quote = cost.quote;
    }
}

#[derive(Debug, Clone, Copy)]
struct CostBasis {
    native: Decimal,
    usd: Option<Decimal>,
    base: Option<Decimal>,
    quote: Option<Decimal>,
}

impl CostBasis {
    fn flat() -> Self {
        Self {
            native: Decimal::zero(),
            usd: Some(Decimal::zero()),
            base: Some(Decimal::zero()),
            quote: Some(Decimal::zero()),
        }
    }

    /// Cost of `amount` units bought (or sold, if negative) at `px`.
    fn seed(amount: Decimal, px: &ResolvedPrices) -> Self {
        let native = amount * px.native;
        Self {
            native,
            usd: px.usd.map(|p| amount * p),
            base: px.base.map(|p| amount * p),
            quote: px.quote_rate.map(|rate| -native * rate),
        }
    }

    fn add(self, other: Self) -> Self {
        Self {
            native: self.native + other.native,
            usd: self.usd.zip(other.usd).map(|(a, b)| a + b),
            base: self.base.zip(other.base).map(|(a, b)| a + b),
            quote: self.quote.zip(other.quote).map(|(a, b)| a + b),
        }
    }

    fn scale(self, factor: Decimal) -> Self {
        Self {
            native: self.native * factor,
            usd: self.usd.map(|c| c * factor),
            base: self.base.map(|c| c * factor),
            quote: self.quote.map(|c| c * factor),
        }
    }
}

/// Realized PnL of one bucket. `None` marks a leg that could not be converted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketPnl {
    pub transition: Transition,
    pub realized_native: Option<Decimal>,
    pub realized_usd: Option<Decimal>,
    pub realized_base: Option<Decimal>,
    pub realized_quote: Option<Decimal>,
    /// Quotes that were needed but unavailable, sorted and deduplicated.
    pub missing: Vec<MissingQuote>,
}

/// `fraction * (units * exit - cost)`.
fn realize_leg(
    fraction: Decimal,
    units: Decimal,
    exit: Option<Decimal>,
    cost: Option<Decimal>,
) -> Option<Decimal> {
    Some(fraction * (units * exit? - cost?))
}

pub(crate) fn add_opt(a: Option<Decimal>, b: Option<Decimal>) -> Option<Decimal> {
    Some(a? + b?)
}

/// Weighted-average-cost position accounting for one instrument.
///
/// Buckets must be stepped in strictly increasing bucket time.
pub struct PositionTracker {
    instrument: Instrument,
    state: PositionState,
}

impl PositionTracker {
    pub fn new(instrument: Instrument) -> Self {
        Self::with_state(instrument, PositionState::new())
    }

    /// Resume from a previously computed state.
    pub fn with_state(instrument: Instrument, state: PositionState) -> Self {
        Self { instrument, state }
    }

    pub fn state(&self) -> &PositionState {
        &self.state
    }

    pub fn into_state(self) -> PositionState {
        self.state
    }

    fn corrupt(&self, bucket_time: TimeMs, detail: impl Into<String>) -> EngineError {
        EngineError::CorruptPositionState {
            instrument: self.instrument.clone(),
            bucket_time,
            detail: detail.into(),
        }
    }

    /// A flat position must carry no cost basis.
    fn check_invariant(&self, bucket_time: TimeMs) -> Result<(), EngineError> {
        let state = &self.state;
        if !state.is_flat() {
            return Ok(());
        }
        let stray = [
            Some(state.cum_cost_native),
            state.cum_cost_usd,
            state.cum_cost_base,
            state.cum_cost_quote,
        ]
        .into_iter()
        .flatten()
        .find(|cost| !cost.is_zero());
        match stray {
            Some(cost) => Err(self.corrupt(
                bucket_time,
                format!("flat position carries cost basis {}", cost),
            )),
            None => Ok(()),
        }
    }

    /// Trade prices on `side`, which the merged row guarantees when that side
    /// moved the position.
    fn trade_prices(
        &self,
        bucket: &DecomposedBucket,
        side: Side,
        missing: &mut Vec<MissingQuote>,
    ) -> Result<ResolvedPrices, EngineError> {
        bucket
            .trade_prices(side)
            .map(|legs| legs.resolve(missing))
            .ok_or_else(|| {
                self.corrupt(
                    bucket.bucket_time(),
                    format!("position moved without {} trades", side),
                )
            })
    }

    fn exit_prices(
        &self,
        bucket: &DecomposedBucket,
        realize: RealizationPrice,
        missing: &mut Vec<MissingQuote>,
    ) -> Result<Option<ResolvedPrices>, EngineError> {
        let position = self.state.cum_amt;
        match realize {
            RealizationPrice::Trade => {
                let closing = if position.is_positive() {
                    Side::Sell
                } else {
                    Side::Buy
                };
                self.trade_prices(bucket, closing, missing).map(Some)
            }
            RealizationPrice::Mark => match bucket.close_out_marks(position) {
                Ok(legs) => Ok(Some(legs.resolve(missing))),
                Err(cause) => {
                    missing.push(cause);
                    Ok(None)
                }
            },
        }
    }

    /// Apply one bucket to the position and return its realized PnL.
    ///
    /// On error the state is left untouched.
    pub fn step(
        &mut self,
        bucket: &DecomposedBucket,
        realize: RealizationPrice,
    ) -> Result<BucketPnl, EngineError> {
        let bucket_time = bucket.bucket_time();
        self.check_invariant(bucket_time)?;

        let row = &bucket.row;
        let prev_amt = self.state.cum_amt;
        let new_amt = prev_amt + row.amt_signed;
        let transition = Transition::classify(prev_amt, new_amt);
        let prev_cost = self.state.cost_basis();
        let mut missing = Vec::new();

        // Volume offsetting inside the bucket, independent of the running position.
        let (intra_native, intra_usd) = match (&bucket.buy, &bucket.sell) {
            (Some(buy), Some(sell)) if row.amt_matched.is_positive() => {
                let matched = row.amt_matched;
                let usd_spread = take_priced(&sell.usd, &mut missing)
                    .zip(take_priced(&buy.usd, &mut missing))
                    .map(|(s, b)| matched * (s - b));
                (matched * (sell.native - buy.native), usd_spread)
            }
            _ => (Decimal::zero(), Some(Decimal::zero())),
        };

        let fraction = match transition {
            Transition::Close | Transition::Flip => Decimal::one(),
            Transition::Reduce => (prev_amt - new_amt)
                .checked_div(prev_amt)
                .ok_or_else(|| self.corrupt(bucket_time, "reduction of a flat position"))?,
            _ => Decimal::zero(),
        };

        let zero = Some(Decimal::zero());
        let (closed_native, closed_usd, closed_base, closed_quote) = if fraction.is_zero() {
            (zero, zero, zero, zero)
        } else {
            match self.exit_prices(bucket, realize, &mut missing)? {
                Some(exit) => (
                    realize_leg(fraction, prev_amt, Some(exit.native), Some(prev_cost.native)),
                    realize_leg(fraction, prev_amt, exit.usd, prev_cost.usd),
                    realize_leg(fraction, prev_amt, exit.base, prev_cost.base),
                    realize_leg(
                        fraction,
                        self.state.quote_amt(),
                        exit.quote_rate,
                        prev_cost.quote,
                    ),
                ),
                None => (None, None, None, None),
            }
        };

        let entry_side = if new_amt.is_positive() {
            Side::Buy
        } else {
            Side::Sell
        };
        let next_cost = match transition {
            Transition::Flat | Transition::Hold => prev_cost,
            Transition::Close => CostBasis::flat(),
            Transition::Open | Transition::Flip => {
                let px = self.trade_prices(bucket, entry_side, &mut missing)?;
                CostBasis::seed(new_amt, &px)
            }
            Transition::Increase => {
                let px = self.trade_prices(bucket, entry_side, &mut missing)?;
                prev_cost.add(CostBasis::seed(row.amt_signed, &px))
            }
            Transition::Reduce => {
                let remaining = new_amt
                    .checked_div(prev_amt)
                    .ok_or_else(|| self.corrupt(bucket_time, "reduction of a flat position"))?;
                prev_cost.scale(remaining)
            }
        };

        let realized_native = closed_native.map(|c| c + intra_native);
        let realized_usd = add_opt(closed_usd, intra_usd);

        let state = &mut self.state;
        state.cum_amt = new_amt;
        state.set_cost_basis(next_cost);
        state.cum_realized_pnl_native = add_opt(state.cum_realized_pnl_native, realized_native);
        state.cum_realized_pnl_usd = add_opt(state.cum_realized_pnl_usd, realized_usd);
        state.cum_realized_pnl_base = add_opt(state.cum_realized_pnl_base, closed_base);
        state.cum_realized_pnl_quote = add_opt(state.cum_realized_pnl_quote, closed_quote);

        missing.sort();
        missing.dedup();

        Ok(BucketPnl {
            transition,
            realized_native,
            realized_usd,
            realized_base: closed_base,
            realized_quote: closed_quote,
            missing,
        })
    }
}
