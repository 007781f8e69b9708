//! Output record CSV encoding, digest, and the diagnostics report.

use crate::domain::Instrument;
use crate::engine::{Diagnostic, OutputRecord};
use crate::pipeline::RunOutput;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode records as CSV with a header row. Empty input encodes to no bytes.
pub fn records_to_csv(records: &[OutputRecord]) -> Result<Vec<u8>, OutputError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for record in records {
        writer.serialize(record)?;
    }
    writer
        .into_inner()
        .map_err(|e| OutputError::Io(e.into_error()))
}

pub fn parse_records(bytes: &[u8]) -> Result<Vec<OutputRecord>, OutputError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(bytes);
    let mut records = Vec::new();
    for record in reader.deserialize::<OutputRecord>() {
        records.push(record?);
    }
    Ok(records)
}

/// Lowercase hex SHA-256 of the bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Digest of the CSV encoding; equal record streams give equal digests.
pub fn digest_records(records: &[OutputRecord]) -> Result<String, OutputError> {
    Ok(sha256_hex(&records_to_csv(records)?))
}

/// Write records to `path` and return the digest of the written bytes.
pub fn write_records(path: &Path, records: &[OutputRecord]) -> Result<String, OutputError> {
    let bytes = records_to_csv(records)?;
    std::fs::write(path, &bytes)?;
    Ok(sha256_hex(&bytes))
}

pub fn read_records(path: &Path) -> Result<Vec<OutputRecord>, OutputError> {
    let bytes = std::fs::read(path)?;
    parse_records(&bytes)
}

/// Machine-readable summary of everything a run recovered from or gave up on.
#[derive(Debug, Serialize)]
pub struct DiagnosticsReport<'a> {
    pub run_id: Uuid,
    pub digest: &'a str,
    pub records: usize,
    pub counts: BTreeMap<&'static str, usize>,
    pub failures: Vec<String>,
    pub aborted: &'a [Instrument],
    pub unresolved_decompositions: &'a [Instrument],
    pub entries: Vec<&'a Diagnostic>,
}

impl<'a> DiagnosticsReport<'a> {
    pub fn new(
        run_id: Uuid,
        digest: &'a str,
        output: &'a RunOutput,
        unresolved_decompositions: &'a [Instrument],
    ) -> Self {
        Self {
            run_id,
            digest,
            records: output.records.len(),
            counts: output.diagnostics.counts(),
            failures: output.failures.iter().map(ToString::to_string).collect(),
            aborted: &output.aborted,
            unresolved_decompositions,
            entries: output.diagnostics.iter().collect(),
        }
    }
}

pub fn write_diagnostics(path: &Path, report: &DiagnosticsReport<'_>) -> Result<(), OutputError> {
    let json = serde_json::to_vec_pretty(report)?;
    std::fs::write(path, json)?;
    Ok(())
}
