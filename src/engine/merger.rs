//! Full outer join of buy-side and sell-side bucket aggregates.

use super::bucketizer::BucketAggregate;
use crate::domain::{Decimal, Instrument, Side, TimeMs};
use std::collections::BTreeMap;

/// One row per (instrument, bucket) combining both sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedBucketRow {
    pub bucket_time: TimeMs,
    pub instrument: Instrument,
    pub amt_buy: Decimal,
    pub amt_sell: Decimal,
    /// `amt_buy - amt_sell`.
    pub amt_signed: Decimal,
    /// `min(amt_buy, amt_sell)`: volume that nets out inside the bucket.
    pub amt_matched: Decimal,
    /// `None` means no trade on this side, distinct from a zero price.
    pub wavg_buy_px: Option<Decimal>,
    pub wavg_sell_px: Option<Decimal>,
    pub num_deals: u32,
}

impl MergedBucketRow {
    /// Row for a bucket without any trades.
    pub fn empty(instrument: Instrument, bucket_time: TimeMs) -> Self {
        Self {
            bucket_time,
            instrument,
            amt_buy: Decimal::zero(),
            amt_sell: Decimal::zero(),
            amt_signed: Decimal::zero(),
            amt_matched: Decimal::zero(),
            wavg_buy_px: None,
            wavg_sell_px: None,
            num_deals: 0,
        }
    }

    pub fn has_trades(&self) -> bool {
        self.num_deals > 0
    }

    /// Gross native notional traded on both sides.
    pub fn gross_notional(&self) -> Decimal {
        let buy = self.wavg_buy_px.map_or(Decimal::zero(), |px| px * self.amt_buy);
        let sell = self.wavg_sell_px.map_or(Decimal::zero(), |px| px * self.amt_sell);
        buy + sell
    }

    fn absorb(&mut self, agg: BucketAggregate) {
        match agg.side {
            Side::Buy => {
                self.amt_buy = agg.total_amount;
                self.wavg_buy_px = agg.weighted_avg_price;
            }
            Side::Sell => {
                self.amt_sell = agg.total_amount;
                self.wavg_sell_px = agg.weighted_avg_price;
            }
        }
        self.num_deals += agg.fill_count;
        self.amt_signed = self.amt_buy - self.amt_sell;
        self.amt_matched = self.amt_buy.min(self.amt_sell);
    }
}

/// Merge aggregates into rows ordered by (instrument, bucket_time). A bucket with
/// only one side still yields a row, with the other side at zero amount.
pub fn merge_buckets(aggregates: Vec<BucketAggregate>) -> Vec<MergedBucketRow> {
    let mut rows: BTreeMap<(Instrument, TimeMs), MergedBucketRow> = BTreeMap::new();
    for agg in aggregates {
        rows.entry((agg.instrument.clone(), agg.bucket_time))
            .or_insert_with(|| MergedBucketRow::empty(agg.instrument.clone(), agg.bucket_time))
            .absorb(agg);
    }
    rows.into_values().collect()
}
