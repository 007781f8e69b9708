//! Currency decomposer: converts native prices into USD, base-leg and quote-leg
//! terms using forward-filled quotes.
//!
//! Rate-side conventions:
//! - buy trade prices convert at the reference bid, sell trade prices at its ask;
//! - marks and volume convert at the reference mid;
//! - base-leg prices read the base instrument's bid for buys and long marks, its
//!   ask for sells and short marks;
//! - the quote-currency rate for a long mark uses the ask (the long owes quote
//!   currency), a short mark uses the bid.
//!
//! Every converted figure is a [`Priced`]; a missing input is reported only when a
//! consumer actually needs that figure.

use super::diagnostics::MissingReason;
use super::merger::MergedBucketRow;
use super::quote_book::QuoteBook;
use crate::domain::{
    ConversionMode, CurrencyDecomposition, Decimal, Instrument, PriceSide, Quote, Side, TimeMs,
    UsdConversion,
};
use thiserror::Error;

/// A conversion could not be performed for lack of a usable quote.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Error)]
#[error("missing quote for {instrument} ({reason:?})")]
pub struct MissingQuote {
    pub instrument: Instrument,
    pub reason: MissingReason,
}

impl MissingQuote {
    fn no_observation(instrument: &Instrument) -> Self {
        Self {
            instrument: instrument.clone(),
            reason: MissingReason::NoObservation,
        }
    }
}

pub type Priced = Result<Decimal, MissingQuote>;

/// Price of one unit of the instrument in each leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegPrices {
    pub native: Decimal,
    pub usd: Priced,
    /// USD value of one unit of the base asset.
    pub base: Priced,
    /// USD per unit of quote currency.
    pub quote_rate: Priced,
}

/// [`LegPrices`] after consumption: unavailable figures are `None` and their
/// causes have been recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPrices {
    pub native: Decimal,
    pub usd: Option<Decimal>,
    pub base: Option<Decimal>,
    pub quote_rate: Option<Decimal>,
}

impl LegPrices {
    pub fn resolve(&self, missing: &mut Vec<MissingQuote>) -> ResolvedPrices {
        ResolvedPrices {
            native: self.native,
            usd: take_priced(&self.usd, missing),
            base: take_priced(&self.base, missing),
            quote_rate: take_priced(&self.quote_rate, missing),
        }
    }
}

/// Unwrap a converted figure, recording why it is unavailable.
pub fn take_priced(priced: &Priced, missing: &mut Vec<MissingQuote>) -> Option<Decimal> {
    match priced {
        Ok(value) => Some(*value),
        Err(cause) => {
            missing.push(cause.clone());
            None
        }
    }
}

/// A merged row with every price the tracker and evaluator may need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecomposedBucket {
    pub row: MergedBucketRow,
    pub buy: Option<LegPrices>,
    pub sell: Option<LegPrices>,
    /// Bid-side marks, used to value or close a long.
    pub mark_long: Result<LegPrices, MissingQuote>,
    /// Ask-side marks, used to value or close a short.
    pub mark_short: Result<LegPrices, MissingQuote>,
    /// Gross traded notional in USD at the reference mid.
    pub vol_usd: Priced,
}

impl DecomposedBucket {
    pub fn bucket_time(&self) -> TimeMs {
        self.row.bucket_time
    }

    pub fn trade_prices(&self, side: Side) -> Option<&LegPrices> {
        match side {
            Side::Buy => self.buy.as_ref(),
            Side::Sell => self.sell.as_ref(),
        }
    }

    /// Marks on the close-out side of `position` (bid for a long, ask for a short).
    pub fn close_out_marks(&self, position: Decimal) -> Result<&LegPrices, MissingQuote> {
        let marks = match PriceSide::close_out(position) {
            PriceSide::Ask => &self.mark_short,
            _ => &self.mark_long,
        };
        marks.as_ref().map_err(|missing| missing.clone())
    }
}

/// A quote-currency to USD conversion resolved at one instant.
#[derive(Debug, Clone)]
enum Rate<'a> {
    One,
    Quoted(&'a Quote, ConversionMode),
    Missing(MissingQuote),
}

impl Rate<'_> {
    fn convert(&self, value: Decimal, side: PriceSide) -> Priced {
        match self {
            Rate::One => Ok(value),
            Rate::Quoted(quote, mode) => mode
                .apply(value, quote.price(side))
                .ok_or_else(|| MissingQuote::no_observation(&quote.instrument)),
            Rate::Missing(missing) => Err(missing.clone()),
        }
    }
}

#[derive(Debug, Clone)]
enum BaseRef<'a> {
    /// The instrument prices its own base asset.
    Own,
    Quoted(&'a Quote),
    Missing(MissingQuote),
}

/// All reference quotes for one instrument at one bucket time.
#[derive(Debug, Clone)]
pub struct BucketRates<'a> {
    instrument: &'a Instrument,
    own: Option<&'a Quote>,
    usd: Rate<'a>,
    quote_ccy: Rate<'a>,
    base: BaseRef<'a>,
}

impl<'a> BucketRates<'a> {
    /// Native price converted to USD.
    pub fn to_usd(&self, native: Decimal, side: PriceSide) -> Priced {
        self.usd.convert(native, side)
    }

    /// USD per unit of quote currency.
    pub fn quote_rate(&self, side: PriceSide) -> Priced {
        self.quote_ccy.convert(Decimal::one(), side)
    }

    fn base_price(&self, side: PriceSide, own_usd: &Priced) -> Priced {
        match &self.base {
            BaseRef::Own => own_usd.clone(),
            BaseRef::Quoted(quote) => Ok(quote.price(side)),
            BaseRef::Missing(missing) => Err(missing.clone()),
        }
    }

    fn trade_prices(&self, side: Side, native: Decimal) -> LegPrices {
        let rate_side = match side {
            Side::Buy => PriceSide::Bid,
            Side::Sell => PriceSide::Ask,
        };
        let usd = self.to_usd(native, rate_side);
        LegPrices {
            native,
            base: self.base_price(rate_side, &usd),
            quote_rate: self.quote_rate(rate_side),
            usd,
        }
    }

    fn marks(&self, side: PriceSide) -> Result<LegPrices, MissingQuote> {
        let own = self
            .own
            .ok_or_else(|| MissingQuote::no_observation(self.instrument))?;
        let native = own.price(side);
        let usd = self.to_usd(native, PriceSide::Mid);
        let quote_side = match side {
            PriceSide::Bid => PriceSide::Ask,
            _ => PriceSide::Bid,
        };
        Ok(LegPrices {
            native,
            base: self.base_price(side, &usd),
            quote_rate: self.quote_rate(quote_side),
            usd,
        })
    }
}

pub struct CurrencyDecomposer<'a> {
    book: &'a QuoteBook,
    decomposition: &'a CurrencyDecomposition,
}

impl<'a> CurrencyDecomposer<'a> {
    pub fn new(book: &'a QuoteBook, decomposition: &'a CurrencyDecomposition) -> Self {
        Self {
            book,
            decomposition,
        }
    }

    fn lookup(&self, instrument: &Instrument, at: TimeMs) -> Result<&'a Quote, MissingQuote> {
        self.book
            .latest_at(instrument, at)
            .ok_or_else(|| MissingQuote::no_observation(instrument))
    }

    fn quoted_rate(&self, instrument: &Instrument, at: TimeMs) -> Rate<'a> {
        match self.lookup(instrument, at) {
            Ok(quote) => Rate::Quoted(quote, self.decomposition.mode()),
            Err(missing) => Rate::Missing(missing),
        }
    }

    /// Resolve every reference quote at `at` (forward-filled).
    pub fn rates_at(&self, at: TimeMs) -> BucketRates<'a> {
        let decomposition = self.decomposition;
        let instrument = &decomposition.instrument;

        let usd = match &decomposition.usd {
            UsdConversion::Native => Rate::One,
            UsdConversion::Quoted { instrument, .. } => self.quoted_rate(instrument, at),
            UsdConversion::Unresolved => Rate::Missing(MissingQuote {
                instrument: instrument.clone(),
                reason: MissingReason::UnresolvedRoute,
            }),
        };

        let quote_ccy = match &decomposition.quote_instrument {
            Some(reference) if !matches!(decomposition.usd, UsdConversion::Unresolved) => {
                self.quoted_rate(reference, at)
            }
            _ => usd.clone(),
        };

        let base = match &decomposition.base_instrument {
            Some(reference) if reference != instrument => match self.lookup(reference, at) {
                Ok(quote) => BaseRef::Quoted(quote),
                Err(missing) => BaseRef::Missing(missing),
            },
            _ => BaseRef::Own,
        };

        BucketRates {
            instrument,
            own: self.book.latest_at(instrument, at),
            usd,
            quote_ccy,
            base,
        }
    }

    /// Attach converted trade prices, marks and USD volume to a merged row.
    pub fn decompose(&self, row: MergedBucketRow) -> DecomposedBucket {
        let rates = self.rates_at(row.bucket_time);
        let buy = row.wavg_buy_px.map(|px| rates.trade_prices(Side::Buy, px));
        let sell = row.wavg_sell_px.map(|px| rates.trade_prices(Side::Sell, px));
        let vol_usd = rates.to_usd(row.gross_notional(), PriceSide::Mid);

        DecomposedBucket {
            mark_long: rates.marks(PriceSide::Bid),
            mark_short: rates.marks(PriceSide::Ask),
            buy,
            sell,
            vol_usd,
            row,
        }
    }
}
