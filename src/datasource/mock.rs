//! Mock data source for testing without files.

use super::{BatchSource, DataSourceError, LoadedFills};
use crate::domain::{CurrencyDecomposition, Fill, Quote};
use async_trait::async_trait;

/// Mock data source that returns predefined test data.
#[derive(Debug, Clone, Default)]
pub struct MockBatchSource {
    fills: Vec<Fill>,
    quotes: Vec<Quote>,
    decompositions: Vec<CurrencyDecomposition>,
    failure: Option<DataSourceError>,
}

impl MockBatchSource {
    /// Create a new mock data source with empty data.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fill to the mock data source.
    pub fn with_fill(mut self, fill: Fill) -> Self {
        self.fills.push(fill);
        self
    }

    /// Add multiple fills to the mock data source.
    pub fn with_fills(mut self, fills: Vec<Fill>) -> Self {
        self.fills.extend(fills);
        self
    }

    pub fn with_quotes(mut self, quotes: Vec<Quote>) -> Self {
        self.quotes.extend(quotes);
        self
    }

    pub fn with_decomposition(mut self, decomposition: CurrencyDecomposition) -> Self {
        self.decompositions.push(decomposition);
        self
    }

    /// Make every load fail with `error`.
    pub fn failing(mut self, error: DataSourceError) -> Self {
        self.failure = Some(error);
        self
    }

    fn check(&self) -> Result<(), DataSourceError> {
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BatchSource for MockBatchSource {
    async fn load_fills(&self) -> Result<LoadedFills, DataSourceError> {
        self.check()?;
        Ok(self.fills.clone().into())
    }

    async fn load_quotes(&self) -> Result<Vec<Quote>, DataSourceError> {
        self.check()?;
        Ok(self.quotes.clone())
    }

    async fn load_decompositions(&self) -> Result<Vec<CurrencyDecomposition>, DataSourceError> {
        self.check()?;
        Ok(self.decompositions.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Decimal, Instrument, Side, TimeMs};

    fn fill(t: i64) -> Fill {
        Fill::new(
            TimeMs::new(t),
            Instrument::new("X"),
            Side::Buy,
            Decimal::from_str_canonical("1").unwrap(),
            Decimal::from_str_canonical("100").unwrap(),
        )
    }

    #[test]
    fn test_mock_returns_configured_data() {
        let mock = MockBatchSource::new()
            .with_fill(fill(1_000))
            .with_fills(vec![fill(2_000), fill(3_000)])
            .with_decomposition(CurrencyDecomposition::usd_native(Instrument::new("X")));

        let loaded = tokio_test::block_on(mock.load_fills()).unwrap();
        assert_eq!(loaded.fills.len(), 3);
        assert!(loaded.rejected.is_empty());
        assert!(tokio_test::block_on(mock.load_quotes()).unwrap().is_empty());
        assert_eq!(tokio_test::block_on(mock.load_decompositions()).unwrap().len(), 1);
    }

    #[test]
    fn test_mock_failure() {
        let mock = MockBatchSource::new().failing(DataSourceError::Io("boom".to_string()));
        let err = tokio_test::block_on(mock.load_quotes()).unwrap_err();
        assert_eq!(err.to_string(), "IO error: boom");
    }
}
