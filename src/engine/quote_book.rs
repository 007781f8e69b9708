//! Forward-filled quote lookup per instrument.

use super::bucketizer::BucketSpec;
use super::diagnostics::Diagnostic;
use crate::domain::{Instrument, Quote, TimeMs};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Read-only quote history. A quote observed at `t` applies to every later
/// lookup until superseded.
#[derive(Debug, Clone, Default)]
pub struct QuoteBook {
    series: HashMap<Instrument, BTreeMap<TimeMs, Quote>>,
}

impl QuoteBook {
    /// Build a book, dropping quotes with a non-positive side so forward-fill
    /// skips over them. For duplicate timestamps the later input wins.
    pub fn from_quotes(quotes: Vec<Quote>) -> (Self, Vec<Diagnostic>) {
        let mut book = Self::default();
        let mut rejected = Vec::new();
        for quote in quotes {
            if !quote.is_valid() {
                rejected.push(Diagnostic::InvalidQuote {
                    instrument: quote.instrument.clone(),
                    time_ms: quote.time_ms,
                });
                continue;
            }
            book.series
                .entry(quote.instrument.clone())
                .or_default()
                .insert(quote.time_ms, quote);
        }
        (book, rejected)
    }

    /// Most recent quote at or before `at`.
    pub fn latest_at(&self, instrument: &Instrument, at: TimeMs) -> Option<&Quote> {
        self.series
            .get(instrument)?
            .range(..=at)
            .next_back()
            .map(|(_, quote)| quote)
    }

    /// Bucket times at which a new quote of the instrument first becomes visible.
    /// Lookups happen at the bucket start, so a quote inside a bucket shows from
    /// the next boundary on.
    pub fn bucket_times(&self, instrument: &Instrument, spec: &BucketSpec) -> BTreeSet<TimeMs> {
        self.series
            .get(instrument)
            .map(|series| {
                series
                    .keys()
                    .map(|t| spec.boundary_at_or_after(*t))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn instrument_count(&self) -> usize {
        self.series.len()
    }
}
