//! Batch runner: prepares a batch once, then folds every instrument independently.

mod instrument;

use crate::config::EngineConfig;
use crate::domain::{
    sort_fills_deterministic, Decimal, DecompositionMap, Fill, Instrument, Quote, TimeMs,
};
use crate::engine::{
    merge_buckets, BucketSpec, Bucketizer, Diagnostic, Diagnostics, EngineError, MergedBucketRow,
    OutputRecord, PositionState, QuoteBook,
};
use crate::output::{self, OutputError};
use futures::future::join_all;
use instrument::InstrumentStatus;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative abort signal shared between the caller and running instruments.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Where an instrument resumes from a previous run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarrySeed {
    /// Buckets at or before this time were already accounted for.
    pub last_bucket_time: TimeMs,
    pub state: PositionState,
    pub cum_vol_usd: Option<Decimal>,
}

/// Per-instrument seeds taken from the tail of a previous output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CarryOver {
    seeds: BTreeMap<Instrument, CarrySeed>,
}

impl CarryOver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the latest record per instrument.
    pub fn from_records(records: &[OutputRecord]) -> Self {
        let mut seeds: BTreeMap<Instrument, CarrySeed> = BTreeMap::new();
        for record in records {
            let newer = seeds
                .get(&record.instrument)
                .map_or(true, |seed| record.bucket_time > seed.last_bucket_time);
            if newer {
                seeds.insert(
                    record.instrument.clone(),
                    CarrySeed {
                        last_bucket_time: record.bucket_time,
                        state: record.position_state(),
                        cum_vol_usd: record.cum_vol_usd,
                    },
                );
            }
        }
        Self { seeds }
    }

    pub fn insert(&mut self, instrument: Instrument, seed: CarrySeed) {
        self.seeds.insert(instrument, seed);
    }

    pub fn get(&self, instrument: &Instrument) -> Option<&CarrySeed> {
        self.seeds.get(instrument)
    }

    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }

    /// Instruments that enter the batch with an open position.
    fn open_instruments(&self) -> impl Iterator<Item = &Instrument> {
        self.seeds
            .iter()
            .filter(|(_, seed)| !seed.state.is_flat())
            .map(|(instrument, _)| instrument)
    }
}

/// Everything one run consumes, fully materialized.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub fills: Vec<Fill>,
    pub quotes: Vec<Quote>,
    pub decompositions: DecompositionMap,
    pub carry_over: CarryOver,
    /// Fill rows the source could not read; reported with the run's diagnostics.
    pub rejected_fills: Vec<Diagnostic>,
}

/// Result of a run. Records are ordered by (instrument, bucket_time).
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub records: Vec<OutputRecord>,
    pub diagnostics: Diagnostics,
    /// Instruments stopped by a fatal accounting error; none of their records are emitted.
    pub failures: Vec<EngineError>,
    /// Instruments whose processing was cancelled; their partial output was discarded.
    pub aborted: Vec<Instrument>,
}

impl RunOutput {
    /// SHA-256 of the records' CSV encoding.
    pub fn digest(&self) -> Result<String, OutputError> {
        output::digest_records(&self.records)
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.aborted.is_empty()
    }
}

/// Batch data after bucketing, shared read-only by every instrument fold.
#[derive(Debug)]
struct PreparedBatch {
    spec: BucketSpec,
    book: QuoteBook,
    decompositions: DecompositionMap,
    carry_over: CarryOver,
    rows: BTreeMap<Instrument, BTreeMap<TimeMs, MergedBucketRow>>,
    instruments: Vec<Instrument>,
    diagnostics: Diagnostics,
}

impl PreparedBatch {
    fn prepare(batch: Batch, config: &EngineConfig) -> Self {
        let Batch {
            mut fills,
            quotes,
            decompositions,
            carry_over,
            rejected_fills,
        } = batch;
        let mut diagnostics = Diagnostics::new();
        for diagnostic in rejected_fills {
            diagnostics.push(diagnostic);
        }

        let (book, rejected) = QuoteBook::from_quotes(quotes);
        for diagnostic in rejected {
            diagnostics.push(diagnostic);
        }

        let spec = BucketSpec::resolve(config.bucket_width_ms, config.alignment, &fills);
        sort_fills_deterministic(&mut fills);
        let mut bucketizer = Bucketizer::new(spec);
        for fill in &fills {
            if let Err(err) = bucketizer.add(fill) {
                diagnostics.push(Diagnostic::InvalidFill {
                    instrument: fill.instrument.clone(),
                    time_ms: Some(fill.time_ms),
                    line: None,
                    reason: err.to_string(),
                });
            }
        }

        let mut rows: BTreeMap<Instrument, BTreeMap<TimeMs, MergedBucketRow>> = BTreeMap::new();
        for row in merge_buckets(bucketizer.finish()) {
            rows.entry(row.instrument.clone())
                .or_default()
                .insert(row.bucket_time, row);
        }

        let instruments: BTreeSet<Instrument> = rows
            .keys()
            .chain(carry_over.open_instruments())
            .cloned()
            .collect();
        tracing::debug!(
            instruments = instruments.len(),
            quoted_instruments = book.instrument_count(),
            width_ms = spec.width_ms,
            origin_ms = spec.origin_ms,
            "Batch prepared"
        );

        Self {
            spec,
            book,
            decompositions,
            carry_over,
            rows,
            instruments: instruments.into_iter().collect(),
            diagnostics,
        }
    }
}

pub struct Pipeline {
    config: EngineConfig,
    cancel: CancelFlag,
}

impl Pipeline {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_cancel(config, CancelFlag::new())
    }

    pub fn with_cancel(config: EngineConfig, cancel: CancelFlag) -> Self {
        Self { config, cancel }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Fold every instrument on the calling thread.
    pub fn run(&self, batch: &Batch) -> RunOutput {
        let prepared = PreparedBatch::prepare(batch.clone(), &self.config);
        let statuses = prepared
            .instruments
            .iter()
            .map(|instrument| {
                instrument::run_instrument(
                    &prepared,
                    instrument,
                    self.config.realize_at,
                    &self.cancel,
                )
            })
            .collect();
        assemble(&prepared, statuses)
    }

    /// Fold instruments concurrently on the blocking pool. Output is identical to
    /// [`Pipeline::run`] for the same batch.
    pub async fn run_parallel(&self, batch: Batch) -> RunOutput {
        let prepared = Arc::new(PreparedBatch::prepare(batch, &self.config));
        let realize = self.config.realize_at;

        let handles = prepared.instruments.iter().cloned().map(|instrument| {
            let prepared = Arc::clone(&prepared);
            let cancel = self.cancel.clone();
            tokio::task::spawn_blocking(move || {
                instrument::run_instrument(&prepared, &instrument, realize, &cancel)
            })
        });

        let statuses = join_all(handles)
            .await
            .into_iter()
            .zip(prepared.instruments.iter())
            .map(|(joined, instrument)| {
                joined.unwrap_or_else(|err| {
                    tracing::error!(
                        instrument = %instrument,
                        error = %err,
                        "Instrument task failed"
                    );
                    InstrumentStatus::Aborted {
                        instrument: instrument.clone(),
                    }
                })
            })
            .collect();
        assemble(&prepared, statuses)
    }
}

/// Combine per-instrument results in instrument order.
fn assemble(prepared: &PreparedBatch, statuses: Vec<InstrumentStatus>) -> RunOutput {
    let mut output = RunOutput {
        diagnostics: prepared.diagnostics.clone(),
        ..RunOutput::default()
    };

    for status in statuses {
        match status {
            InstrumentStatus::Completed {
                records,
                diagnostics,
            } => {
                output.records.extend(records);
                output.diagnostics.extend(diagnostics);
            }
            InstrumentStatus::Failed(err) => {
                tracing::error!(error = %err, "Instrument stopped, records discarded");
                output.failures.push(err);
            }
            InstrumentStatus::Aborted { instrument } => {
                tracing::warn!(instrument = %instrument, "Instrument aborted, records discarded");
                output.aborted.push(instrument);
            }
        }
    }

    output.diagnostics.normalize();
    tracing::info!(
        instruments = prepared.instruments.len(),
        records = output.records.len(),
        diagnostics = output.diagnostics.len(),
        failures = output.failures.len(),
        aborted = output.aborted.len(),
        "Run complete"
    );
    output
}
