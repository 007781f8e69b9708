//! Assembles per-bucket output records with running totals.

use super::converter::{take_priced, DecomposedBucket, MissingQuote};
use super::mark_to_market::Unrealized;
use super::position_tracker::{add_opt, BucketPnl, PositionState};
use crate::domain::{Decimal, Instrument, TimeMs};
use serde::{Deserialize, Serialize};

/// One row of the output stream, keyed by (instrument, bucket_time).
///
/// Converted fields are empty when a quote they needed was unavailable; native
/// position fields are always populated. Running totals stay empty from the
/// first bucket whose term was unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub bucket_time: TimeMs,
    pub instrument: Instrument,
    pub amt_buy: Decimal,
    pub amt_sell: Decimal,
    pub amt_signed: Decimal,
    pub amt_matched: Decimal,
    pub wavg_buy_px: Option<Decimal>,
    pub wavg_sell_px: Option<Decimal>,
    pub num_deals: u32,

    pub realized_pnl_native: Option<Decimal>,
    pub realized_pnl_usd: Option<Decimal>,
    pub realized_pnl_base: Option<Decimal>,
    pub realized_pnl_quote: Option<Decimal>,
    pub vol_usd: Option<Decimal>,

    pub cum_amt: Decimal,
    pub cum_cost_native: Decimal,
    pub cum_cost_usd: Option<Decimal>,
    pub cum_cost_base: Option<Decimal>,
    pub cum_cost_quote: Option<Decimal>,
    pub cum_quote_amt: Decimal,
    pub cum_vol_usd: Option<Decimal>,
    pub cum_realized_pnl_native: Option<Decimal>,
    pub cum_realized_pnl_usd: Option<Decimal>,
    pub cum_realized_pnl_base: Option<Decimal>,
    pub cum_realized_pnl_quote: Option<Decimal>,

    pub unrealized_pnl_native: Option<Decimal>,
    pub unrealized_pnl_usd: Option<Decimal>,
    pub unrealized_pnl_base: Option<Decimal>,
    pub unrealized_pnl_quote: Option<Decimal>,
    pub total_pnl_usd: Option<Decimal>,
    pub total_pnl_quote: Option<Decimal>,

    /// Every converted field is populated.
    pub complete: bool,
}

impl OutputRecord {
    /// Position state as of the end of this bucket.
    pub fn position_state(&self) -> PositionState {
        PositionState {
            cum_amt: self.cum_amt,
            cum_cost_native: self.cum_cost_native,
            cum_cost_usd: self.cum_cost_usd,
            cum_cost_base: self.cum_cost_base,
            cum_cost_quote: self.cum_cost_quote,
            cum_realized_pnl_native: self.cum_realized_pnl_native,
            cum_realized_pnl_usd: self.cum_realized_pnl_usd,
            cum_realized_pnl_base: self.cum_realized_pnl_base,
            cum_realized_pnl_quote: self.cum_realized_pnl_quote,
        }
    }

    fn converted_fields(&self) -> [Option<Decimal>; 19] {
        [
            self.realized_pnl_native,
            self.realized_pnl_usd,
            self.realized_pnl_base,
            self.realized_pnl_quote,
            self.vol_usd,
            self.cum_cost_usd,
            self.cum_cost_base,
            self.cum_cost_quote,
            self.cum_vol_usd,
            self.cum_realized_pnl_native,
            self.cum_realized_pnl_usd,
            self.cum_realized_pnl_base,
            self.cum_realized_pnl_quote,
            self.unrealized_pnl_native,
            self.unrealized_pnl_usd,
            self.unrealized_pnl_base,
            self.unrealized_pnl_quote,
            self.total_pnl_usd,
            self.total_pnl_quote,
        ]
    }
}

/// Prefix-sum fold over one instrument's ordered buckets.
#[derive(Debug, Clone)]
pub struct TimeSeriesEmitter {
    cum_vol_usd: Option<Decimal>,
}

impl Default for TimeSeriesEmitter {
    fn default() -> Self {
        Self::with_cum_vol_usd(Some(Decimal::zero()))
    }
}

impl TimeSeriesEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume the running volume from a previous run.
    pub fn with_cum_vol_usd(cum_vol_usd: Option<Decimal>) -> Self {
        Self { cum_vol_usd }
    }

    /// Build the record for `bucket`. `state` is the position after the bucket.
    /// A missing USD volume is recorded in `missing`.
    pub fn emit(
        &mut self,
        bucket: &DecomposedBucket,
        pnl: &BucketPnl,
        state: &PositionState,
        unrealized: &Unrealized,
        missing: &mut Vec<MissingQuote>,
    ) -> OutputRecord {
        let row = &bucket.row;
        let vol_usd = if row.has_trades() {
            take_priced(&bucket.vol_usd, missing)
        } else {
            Some(Decimal::zero())
        };
        self.cum_vol_usd = add_opt(self.cum_vol_usd, vol_usd);

        let mut record = OutputRecord {
            bucket_time: row.bucket_time,
            instrument: row.instrument.clone(),
            amt_buy: row.amt_buy,
            amt_sell: row.amt_sell,
            amt_signed: row.amt_signed,
            amt_matched: row.amt_matched,
            wavg_buy_px: row.wavg_buy_px,
            wavg_sell_px: row.wavg_sell_px,
            num_deals: row.num_deals,
            realized_pnl_native: pnl.realized_native,
            realized_pnl_usd: pnl.realized_usd,
            realized_pnl_base: pnl.realized_base,
            realized_pnl_quote: pnl.realized_quote,
            vol_usd,
            cum_amt: state.cum_amt,
            cum_cost_native: state.cum_cost_native,
            cum_cost_usd: state.cum_cost_usd,
            cum_cost_base: state.cum_cost_base,
            cum_cost_quote: state.cum_cost_quote,
            cum_quote_amt: state.quote_amt(),
            cum_vol_usd: self.cum_vol_usd,
            cum_realized_pnl_native: state.cum_realized_pnl_native,
            cum_realized_pnl_usd: state.cum_realized_pnl_usd,
            cum_realized_pnl_base: state.cum_realized_pnl_base,
            cum_realized_pnl_quote: state.cum_realized_pnl_quote,
            unrealized_pnl_native: unrealized.native,
            unrealized_pnl_usd: unrealized.usd,
            unrealized_pnl_base: unrealized.base,
            unrealized_pnl_quote: unrealized.quote,
            total_pnl_usd: add_opt(state.cum_realized_pnl_usd, unrealized.usd),
            total_pnl_quote: add_opt(state.cum_realized_pnl_quote, unrealized.quote),
            complete: false,
        };
        record.complete = pnl.missing.is_empty()
            && unrealized.missing.is_empty()
            && record.converted_fields().iter().all(Option::is_some);
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CurrencyDecomposition, Quote};
    use crate::engine::converter::CurrencyDecomposer;
    use crate::engine::mark_to_market::mark_to_market;
    use crate::engine::merger::MergedBucketRow;
    use crate::engine::position_tracker::{PositionTracker, RealizationPrice};
    use crate::engine::quote_book::QuoteBook;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn traded(t: i64, amt: &str, px: &str) -> MergedBucketRow {
        let mut row = MergedBucketRow::empty(Instrument::new("X"), TimeMs::new(t));
        row.amt_buy = d(amt);
        row.amt_signed = d(amt);
        row.wavg_buy_px = Some(d(px));
        row.num_deals = 1;
        row
    }

    fn run(rows: Vec<MergedBucketRow>, book: &QuoteBook) -> (Vec<OutputRecord>, Vec<MissingQuote>) {
        let decomposition = CurrencyDecomposition::usd_native(Instrument::new("X"));
        let decomposer = CurrencyDecomposer::new(book, &decomposition);
        let mut tracker = PositionTracker::new(Instrument::new("X"));
        let mut emitter = TimeSeriesEmitter::new();
        let mut missing = Vec::new();
        let records = rows
            .into_iter()
            .map(|row| {
                let bucket = decomposer.decompose(row);
                let pnl = tracker.step(&bucket, RealizationPrice::Trade).unwrap();
                let unrealized = mark_to_market(tracker.state(), &bucket);
                emitter.emit(&bucket, &pnl, tracker.state(), &unrealized, &mut missing)
            })
            .collect();
        (records, missing)
    }

    #[test]
    fn test_running_volume_and_totals() {
        let (book, _) = QuoteBook::from_quotes(vec![Quote::new(
            TimeMs::new(0),
            Instrument::new("X"),
            d("110"),
            d("111"),
        )]);
        let (records, missing) = run(
            vec![traded(0, "1", "100"), traded(60_000, "2", "105")],
            &book,
        );
        assert!(missing.is_empty());

        assert_eq!(records[0].vol_usd, Some(d("100")));
        assert_eq!(records[1].cum_vol_usd, Some(d("310")));
        assert_eq!(records[1].cum_amt, d("3"));
        assert_eq!(records[1].cum_quote_amt, d("-310"));
        // 3 * 110 - 310
        assert_eq!(records[1].unrealized_pnl_usd, Some(d("20")));
        assert_eq!(records[1].total_pnl_usd, Some(d("20")));
        assert!(records.iter().all(|r| r.complete));
    }

    #[test]
    fn test_missing_mark_marks_record_incomplete() {
        let (records, missing) = run(vec![traded(0, "1", "100")], &QuoteBook::default());
        let record = &records[0];
        assert!(missing.is_empty());
        assert_eq!(record.realized_pnl_native, Some(d("0")));
        assert_eq!(record.unrealized_pnl_usd, None);
        assert_eq!(record.total_pnl_usd, None);
        assert!(!record.complete);
    }

    #[test]
    fn test_position_state_round_trips_through_record() {
        let (book, _) = QuoteBook::from_quotes(vec![Quote::new(
            TimeMs::new(0),
            Instrument::new("X"),
            d("99"),
            d("101"),
        )]);
        let (records, _) = run(vec![traded(0, "2", "100")], &book);
        let state = records[0].position_state();
        assert_eq!(state.cum_amt, d("2"));
        assert_eq!(state.cum_cost_usd, Some(d("200")));
        assert_eq!(state.cum_cost_quote, Some(d("-200")));
    }
}
