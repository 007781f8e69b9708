//! Groups fills into fixed-width time buckets per instrument and side.

use crate::domain::{Decimal, Fill, Instrument, InvalidFill, Side, TimeMs};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where bucket boundaries are anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BucketAlignment {
    /// Boundaries are multiples of the width since the Unix epoch.
    Calendar,
    /// Boundaries are offset from the earliest valid fill in the batch.
    FirstFill,
}

/// Resolved bucket grid: `origin + k * width`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketSpec {
    pub width_ms: i64,
    pub origin_ms: i64,
}

impl BucketSpec {
    /// Calendar-aligned grid of the given width.
    pub fn calendar(width_ms: i64) -> Self {
        Self {
            width_ms,
            origin_ms: 0,
        }
    }

    /// Resolve an alignment against a batch of fills. Invalid fills are ignored
    /// when looking for the first fill.
    pub fn resolve(width_ms: i64, alignment: BucketAlignment, fills: &[Fill]) -> Self {
        let origin_ms = match alignment {
            BucketAlignment::Calendar => 0,
            BucketAlignment::FirstFill => fills
                .iter()
                .filter(|f| f.validate().is_ok())
                .map(|f| f.time_ms.as_ms())
                .min()
                .unwrap_or(0),
        };
        Self {
            width_ms,
            origin_ms,
        }
    }

    /// Truncate a timestamp down to its bucket boundary.
    pub fn bucket_of(&self, time: TimeMs) -> TimeMs {
        let offset = (time.as_ms() - self.origin_ms).div_euclid(self.width_ms);
        TimeMs::new(self.origin_ms + offset * self.width_ms)
    }

    /// First bucket boundary at or after `time`.
    pub fn boundary_at_or_after(&self, time: TimeMs) -> TimeMs {
        let start = self.bucket_of(time);
        if start == time {
            start
        } else {
            TimeMs::new(start.as_ms() + self.width_ms)
        }
    }
}

/// One side's aggregate within a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketAggregate {
    pub bucket_time: TimeMs,
    pub instrument: Instrument,
    pub side: Side,
    pub total_amount: Decimal,
    pub notional: Decimal,
    /// `notional / total_amount`; `None` when nothing traded.
    pub weighted_avg_price: Option<Decimal>,
    pub fill_count: u32,
}

#[derive(Debug, Default)]
struct SideAccumulator {
    amount: Decimal,
    notional: Decimal,
    count: u32,
}

pub struct Bucketizer {
    spec: BucketSpec,
    buckets: BTreeMap<(Instrument, TimeMs, Side), SideAccumulator>,
}

impl Bucketizer {
    pub fn new(spec: BucketSpec) -> Self {
        Self {
            spec,
            buckets: BTreeMap::new(),
        }
    }

    /// Add one fill. Invalid fills are rejected and leave no trace in the buckets.
    pub fn add(&mut self, fill: &Fill) -> Result<(), InvalidFill> {
        fill.validate()?;
        let bucket_time = self.spec.bucket_of(fill.time_ms);
        let acc = self
            .buckets
            .entry((fill.instrument.clone(), bucket_time, fill.side))
            .or_default();
        acc.amount += fill.amount;
        acc.notional += fill.notional();
        acc.count += 1;
        Ok(())
    }

    /// Aggregates ordered by (instrument, bucket_time, side).
    pub fn finish(self) -> Vec<BucketAggregate> {
        self.buckets
            .into_iter()
            .map(|((instrument, bucket_time, side), acc)| BucketAggregate {
                bucket_time,
                instrument,
                side,
                total_amount: acc.amount,
                notional: acc.notional,
                weighted_avg_price: acc.notional.checked_div(acc.amount),
                fill_count: acc.count,
            })
            .collect()
    }
}
