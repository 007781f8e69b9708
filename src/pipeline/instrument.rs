//! The sequential per-instrument fold.

use super::{CancelFlag, PreparedBatch};
use crate::domain::{Instrument, TimeMs};
use crate::engine::{
    mark_to_market, CurrencyDecomposer, Diagnostic, Diagnostics, EngineError, MergedBucketRow,
    OutputRecord, PositionTracker, RealizationPrice, TimeSeriesEmitter,
};
use std::collections::BTreeSet;

#[derive(Debug)]
pub(super) enum InstrumentStatus {
    Completed {
        records: Vec<OutputRecord>,
        diagnostics: Diagnostics,
    },
    Failed(EngineError),
    Aborted {
        instrument: Instrument,
    },
}

/// Walk one instrument's buckets in time order.
///
/// The timeline is every bucket with trades plus every bucket in which a new own
/// quote becomes visible. A bucket is emitted when it has trades or the position
/// is open; flat quiet buckets are skipped.
pub(super) fn run_instrument(
    prepared: &PreparedBatch,
    instrument: &Instrument,
    realize: RealizationPrice,
    cancel: &CancelFlag,
) -> InstrumentStatus {
    let decomposition = prepared.decompositions.resolve(instrument);
    let decomposer = CurrencyDecomposer::new(&prepared.book, &decomposition);
    let trade_rows = prepared.rows.get(instrument);

    let (mut tracker, mut emitter, resume_after) = match prepared.carry_over.get(instrument) {
        Some(seed) => (
            PositionTracker::with_state(instrument.clone(), seed.state.clone()),
            TimeSeriesEmitter::with_cum_vol_usd(seed.cum_vol_usd),
            Some(seed.last_bucket_time),
        ),
        None => (
            PositionTracker::new(instrument.clone()),
            TimeSeriesEmitter::new(),
            None,
        ),
    };

    let mut timeline: BTreeSet<TimeMs> = prepared.book.bucket_times(instrument, &prepared.spec);
    if let Some(rows) = trade_rows {
        timeline.extend(rows.keys().copied());
    }
    if let Some(after) = resume_after {
        timeline = timeline.split_off(&TimeMs::new(after.as_ms().saturating_add(1)));
    }

    let mut records = Vec::new();
    let mut diagnostics = Diagnostics::new();

    for bucket_time in timeline {
        if cancel.is_cancelled() {
            return InstrumentStatus::Aborted {
                instrument: instrument.clone(),
            };
        }

        let row = trade_rows
            .and_then(|rows| rows.get(&bucket_time))
            .cloned()
            .unwrap_or_else(|| MergedBucketRow::empty(instrument.clone(), bucket_time));
        if !row.has_trades() && tracker.state().is_flat() {
            continue;
        }

        let bucket = decomposer.decompose(row);
        let pnl = match tracker.step(&bucket, realize) {
            Ok(pnl) => pnl,
            Err(err) => return InstrumentStatus::Failed(err),
        };
        let unrealized = mark_to_market(tracker.state(), &bucket);
        let mut missing = Vec::new();
        let record = emitter.emit(&bucket, &pnl, tracker.state(), &unrealized, &mut missing);

        for cause in pnl
            .missing
            .iter()
            .chain(unrealized.missing.iter())
            .chain(missing.iter())
        {
            diagnostics.push(Diagnostic::MissingQuote {
                instrument: instrument.clone(),
                bucket_time,
                missing: cause.instrument.clone(),
                reason: cause.reason,
            });
        }
        records.push(record);
    }

    tracing::debug!(
        instrument = %instrument,
        records = records.len(),
        cum_amt = %tracker.state().cum_amt,
        "Instrument folded"
    );
    InstrumentStatus::Completed {
        records,
        diagnostics,
    }
}
