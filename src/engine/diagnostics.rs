//! Recoverable data-quality conditions collected during a run.
//!
//! Fatal conditions live in [`super::EngineError`]; everything here was handled
//! locally (fill skipped, quote ignored, bucket fields nulled).

use crate::domain::{Instrument, TimeMs};
use serde::Serialize;
use std::collections::BTreeMap;

/// Why a quote could not be used for a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingReason {
    /// No quote at or before the bucket time.
    NoObservation,
    /// The decomposition has no one-hop USD route.
    UnresolvedRoute,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Rejected fill. `time_ms` is empty when the time itself did not parse;
    /// `line` is set for rows rejected while reading a file.
    InvalidFill {
        instrument: Instrument,
        time_ms: Option<TimeMs>,
        line: Option<u64>,
        reason: String,
    },
    InvalidQuote {
        instrument: Instrument,
        time_ms: TimeMs,
    },
    MissingQuote {
        instrument: Instrument,
        bucket_time: TimeMs,
        missing: Instrument,
        reason: MissingReason,
    },
}

impl Diagnostic {
    pub fn kind(&self) -> &'static str {
        match self {
            Diagnostic::InvalidFill { .. } => "invalid_fill",
            Diagnostic::InvalidQuote { .. } => "invalid_quote",
            Diagnostic::MissingQuote { .. } => "missing_quote",
        }
    }
}

/// Ordered collection of diagnostics for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.entries.push(diagnostic);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    /// Sort and drop exact duplicates so reports are independent of scheduling.
    pub fn normalize(&mut self) {
        self.entries.sort();
        self.entries.dedup();
    }

    /// Count per diagnostic kind, in kind order.
    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(entry.kind()).or_insert(0) += 1;
        }
        counts
    }
}
