//! Data source abstraction for loading one batch of fills, quotes, and
//! currency decompositions.

use crate::domain::{CurrencyDecomposition, Fill, Quote};
use crate::engine::Diagnostic;
use async_trait::async_trait;
use std::fmt;

pub mod csv_file;
pub mod mock;

pub use csv_file::CsvBatchSource;
pub use mock::MockBatchSource;

/// Fills read from a source, plus the rows that could not be turned into fills.
#[derive(Debug, Clone, Default)]
pub struct LoadedFills {
    pub fills: Vec<Fill>,
    pub rejected: Vec<Diagnostic>,
}

impl From<Vec<Fill>> for LoadedFills {
    fn from(fills: Vec<Fill>) -> Self {
        Self {
            fills,
            rejected: Vec::new(),
        }
    }
}

/// Supplier of a complete, materialized batch.
///
/// Implementations return rows in input order; the pipeline does its own
/// deterministic ordering.
#[async_trait]
pub trait BatchSource: Send + Sync + fmt::Debug {
    /// Load every fill of the batch. Unreadable rows are rejected individually;
    /// only a structurally broken source is an error.
    async fn load_fills(&self) -> Result<LoadedFills, DataSourceError>;

    /// Load every quote of the batch, including observations before the analysis
    /// window that forward-fill into it.
    async fn load_quotes(&self) -> Result<Vec<Quote>, DataSourceError>;

    /// Load the decomposition table. Empty when the source has none.
    async fn load_decompositions(&self) -> Result<Vec<CurrencyDecomposition>, DataSourceError>;
}

/// Error type for data source operations.
#[derive(Debug, Clone)]
pub enum DataSourceError {
    /// Underlying file could not be read.
    Io(String),
    /// lz4 frame could not be decoded.
    Decompression(String),
    /// Malformed row or field.
    ParseError { source: String, message: String },
}

impl DataSourceError {
    pub fn parse(source: impl Into<String>, message: impl Into<String>) -> Self {
        DataSourceError::ParseError {
            source: source.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for DataSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSourceError::Io(msg) => write!(f, "IO error: {}", msg),
            DataSourceError::Decompression(msg) => write!(f, "lz4 decode error: {}", msg),
            DataSourceError::ParseError { source, message } => {
                write!(f, "Parse error in {}: {}", source, message)
            }
        }
    }
}

impl std::error::Error for DataSourceError {}
