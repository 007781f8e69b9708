//! CSV batch files, optionally lz4-framed (`.lz4` suffix).

use super::{BatchSource, DataSourceError, LoadedFills};
use crate::domain::{CurrencyDecomposition, Decimal, Fill, Instrument, Quote, Side, TimeMs};
use crate::engine::Diagnostic;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct CsvBatchSource {
    fills_path: PathBuf,
    quotes_path: PathBuf,
    decomposition_path: Option<PathBuf>,
}

#[derive(Debug, serde::Deserialize)]
struct FillRow {
    time: String,
    instrument: String,
    side: String,
    amount: String,
    price: String,
}

#[derive(Debug, serde::Deserialize)]
struct QuoteRow {
    time: String,
    instrument: String,
    bid: String,
    ask: String,
}

#[derive(Debug, serde::Deserialize)]
struct DecompositionRow {
    instrument: String,
    base_instrument: Option<String>,
    quote_instrument: Option<String>,
    usd_instrument: Option<String>,
    inverted: Option<String>,
}

impl CsvBatchSource {
    pub fn new(fills_path: impl Into<PathBuf>, quotes_path: impl Into<PathBuf>) -> Self {
        Self {
            fills_path: fills_path.into(),
            quotes_path: quotes_path.into(),
            decomposition_path: None,
        }
    }

    pub fn with_decompositions(mut self, path: impl Into<PathBuf>) -> Self {
        self.decomposition_path = Some(path.into());
        self
    }

    /// Read a file, transparently decoding an lz4 frame when the name ends in `.lz4`.
    pub async fn read_bytes(path: &Path) -> Result<Vec<u8>, DataSourceError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| DataSourceError::Io(format!("{}: {}", path.display(), e)))?;
        if path.extension().is_some_and(|ext| ext == "lz4") {
            Self::decompress_lz4_frame(&bytes)
        } else {
            Ok(bytes)
        }
    }

    pub fn decompress_lz4_frame(lz4_bytes: &[u8]) -> Result<Vec<u8>, DataSourceError> {
        let mut decoder = lz4_flex::frame::FrameDecoder::new(lz4_bytes);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| DataSourceError::Decompression(e.to_string()))?;
        Ok(out)
    }

    /// Deserialize every row, reporting the 1-based line of the first bad one.
    fn read_rows<T: DeserializeOwned>(
        csv_bytes: &[u8],
        source: &str,
    ) -> Result<Vec<(u64, T)>, DataSourceError> {
        let to_error = |e: csv::Error| DataSourceError::parse(source, e.to_string());
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(csv_bytes);
        let headers = reader.headers().map_err(to_error)?.clone();

        let mut rows = Vec::new();
        let mut record = csv::StringRecord::new();
        while reader.read_record(&mut record).map_err(to_error)? {
            let line = record.position().map_or(0, |p| p.line());
            let row = record.deserialize::<T>(Some(&headers)).map_err(to_error)?;
            rows.push((line, row));
        }
        Ok(rows)
    }

    /// Parse fills. A row whose time, side, amount or price does not parse is
    /// rejected on its own. Non-positive amounts and prices are kept here and
    /// rejected by the bucketizer.
    pub fn parse_fills(csv_bytes: &[u8]) -> Result<LoadedFills, DataSourceError> {
        let mut loaded = LoadedFills::default();
        for (line, row) in Self::read_rows::<FillRow>(csv_bytes, "fills")? {
            match Self::fill_from_row(&row) {
                Ok(fill) => loaded.fills.push(fill),
                Err(reason) => {
                    tracing::warn!(line, reason = %reason, "Rejected fill row");
                    loaded.rejected.push(Diagnostic::InvalidFill {
                        instrument: Instrument::new(row.instrument.as_str()),
                        time_ms: TimeMs::parse(&row.time),
                        line: Some(line),
                        reason,
                    });
                }
            }
        }
        Ok(loaded)
    }

    fn fill_from_row(row: &FillRow) -> Result<Fill, String> {
        let bad = |what: &str, value: &str| format!("invalid {}: {}", what, value);
        let time_ms = TimeMs::parse(&row.time).ok_or_else(|| bad("time", &row.time))?;
        let side = row.side.parse::<Side>().map_err(|_| bad("side", &row.side))?;
        let amount =
            Decimal::from_str_canonical(&row.amount).map_err(|_| bad("amount", &row.amount))?;
        let price =
            Decimal::from_str_canonical(&row.price).map_err(|_| bad("price", &row.price))?;
        Ok(Fill::new(
            time_ms,
            Instrument::new(row.instrument.as_str()),
            side,
            amount,
            price,
        ))
    }

    pub fn parse_quotes(csv_bytes: &[u8]) -> Result<Vec<Quote>, DataSourceError> {
        let source = "quotes";
        Self::read_rows::<QuoteRow>(csv_bytes, source)?
            .into_iter()
            .map(|(line, row)| {
                let bad = |what: &str, value: &str| {
                    DataSourceError::parse(
                        source,
                        format!("line {}: invalid {}: {}", line, what, value),
                    )
                };
                let time_ms = TimeMs::parse(&row.time).ok_or_else(|| bad("time", &row.time))?;
                let bid = Decimal::from_str_canonical(&row.bid).map_err(|_| bad("bid", &row.bid))?;
                let ask = Decimal::from_str_canonical(&row.ask).map_err(|_| bad("ask", &row.ask))?;
                Ok(Quote::new(time_ms, Instrument::new(row.instrument), bid, ask))
            })
            .collect()
    }

    pub fn parse_decompositions(
        csv_bytes: &[u8],
    ) -> Result<Vec<CurrencyDecomposition>, DataSourceError> {
        let source = "decompositions";
        Self::read_rows::<DecompositionRow>(csv_bytes, source)?
            .into_iter()
            .map(|(line, row)| {
                let inverted = row.inverted.as_deref().map(str::to_ascii_lowercase);
                let inverted = match inverted.as_deref() {
                    None | Some("") | Some("false") | Some("0") => false,
                    Some("true") | Some("1") => true,
                    Some(other) => {
                        return Err(DataSourceError::parse(
                            source,
                            format!("line {}: invalid inverted: {}", line, other),
                        ))
                    }
                };
                let non_empty = |cell: Option<String>| {
                    cell.filter(|s| !s.is_empty()).map(Instrument::new)
                };
                Ok(CurrencyDecomposition::from_row(
                    Instrument::new(row.instrument),
                    non_empty(row.base_instrument),
                    non_empty(row.quote_instrument),
                    non_empty(row.usd_instrument),
                    inverted,
                ))
            })
            .collect()
    }
}

#[async_trait]
impl BatchSource for CsvBatchSource {
    async fn load_fills(&self) -> Result<LoadedFills, DataSourceError> {
        let bytes = Self::read_bytes(&self.fills_path).await?;
        Self::parse_fills(&bytes)
    }

    async fn load_quotes(&self) -> Result<Vec<Quote>, DataSourceError> {
        let bytes = Self::read_bytes(&self.quotes_path).await?;
        Self::parse_quotes(&bytes)
    }

    async fn load_decompositions(&self) -> Result<Vec<CurrencyDecomposition>, DataSourceError> {
        match &self.decomposition_path {
            Some(path) => {
                let bytes = Self::read_bytes(path).await?;
                Self::parse_decompositions(&bytes)
            }
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConversionMode, UsdConversion};
    use std::io::Write;

    fn compress_lz4_frame(input: &[u8]) -> Vec<u8> {
        let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::new());
        encoder.write_all(input).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn lz4_decompress_fixture_roundtrip() {
        let csv = b"time,instrument,bid,ask\n0,X,1,2\n";
        let lz4 = compress_lz4_frame(csv);

        let out = CsvBatchSource::decompress_lz4_frame(&lz4).unwrap();
        assert_eq!(out, csv);
    }

    #[test]
    fn fills_accept_millis_and_rfc3339() {
        let csv = b"time,instrument,side,amount,price\n\
            1760918460000,ETH/EUR,buy,1.5,3000.25\n\
            2025-10-20T00:01:00Z, ETH/EUR ,S,2,3001\n";
        let fills = CsvBatchSource::parse_fills(csv).unwrap().fills;
        assert_eq!(fills.len(), 2);
        assert_eq!(fills[0].time_ms, fills[1].time_ms);
        assert_eq!(fills[1].instrument.as_str(), "ETH/EUR");
        assert_eq!(fills[1].side, Side::Sell);
        assert_eq!(fills[0].price.to_canonical_string(), "3000.25");
    }

    #[test]
    fn fills_keep_non_positive_values_for_validation() {
        let csv = b"time,instrument,side,amount,price\n0,X,buy,-1,100\n";
        let fills = CsvBatchSource::parse_fills(csv).unwrap().fills;
        assert!(fills[0].validate().is_err());
    }

    #[test]
    fn fills_unreadable_rows_are_rejected_with_line() {
        let csv = b"time,instrument,side,amount,price\n\
            0,X,buy,1,100\n\
            0,X,hold,1,100\n\
            soon,Y,sell,1,100\n\
            60000,X,sell,1,105\n";
        let loaded = CsvBatchSource::parse_fills(csv).unwrap();

        assert_eq!(loaded.fills.len(), 2);
        assert_eq!(loaded.fills[1].time_ms, TimeMs::new(60_000));
        assert_eq!(
            loaded.rejected[0],
            Diagnostic::InvalidFill {
                instrument: Instrument::new("X"),
                time_ms: Some(TimeMs::new(0)),
                line: Some(3),
                reason: "invalid side: hold".to_string(),
            }
        );
        assert!(matches!(
            &loaded.rejected[1],
            Diagnostic::InvalidFill { time_ms: None, line: Some(4), .. }
        ));
    }

    #[test]
    fn fills_with_ragged_rows_fail_the_load() {
        let csv = b"time,instrument,side,amount,price\n0,X,buy,1\n";
        let err = CsvBatchSource::parse_fills(csv).unwrap_err();
        assert!(matches!(err, DataSourceError::ParseError { ref source, .. } if source == "fills"));
    }

    #[test]
    fn quotes_parse() {
        let csv = b"time,instrument,bid,ask\n60000,EUR/USD,1.1,1.2\n";
        let quotes = CsvBatchSource::parse_quotes(csv).unwrap();
        assert_eq!(quotes[0].time_ms, TimeMs::new(60_000));
        assert_eq!(quotes[0].ask.to_canonical_string(), "1.2");
    }

    #[test]
    fn decompositions_parse_nulls_and_inverted() {
        let csv = b"instrument,base_instrument,quote_instrument,usd_instrument,inverted\n\
            ETH/CHF,ETH/USD,USD/CHF,USD/CHF,true\n\
            BTC/USD,,,,\n";
        let rows = CsvBatchSource::parse_decompositions(csv).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0].usd,
            UsdConversion::Quoted {
                instrument: Instrument::new("USD/CHF"),
                mode: ConversionMode::Inverted,
            }
        );
        assert_eq!(rows[1].usd, UsdConversion::Native);
        assert_eq!(rows[1].base_instrument, None);
    }

    #[tokio::test]
    async fn load_from_lz4_and_plain_files() {
        let dir = tempfile::tempdir().unwrap();
        let fills_path = dir.path().join("fills.csv.lz4");
        let quotes_path = dir.path().join("quotes.csv");
        std::fs::write(
            &fills_path,
            compress_lz4_frame(b"time,instrument,side,amount,price\n0,X,buy,1,100\n"),
        )
        .unwrap();
        std::fs::write(&quotes_path, b"time,instrument,bid,ask\n0,X,99,101\n").unwrap();

        let source = CsvBatchSource::new(&fills_path, &quotes_path);
        assert_eq!(source.load_fills().await.unwrap().fills.len(), 1);
        assert_eq!(source.load_quotes().await.unwrap().len(), 1);
        assert!(source.load_decompositions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let source = CsvBatchSource::new("/nonexistent/fills.csv", "/nonexistent/quotes.csv");
        let err = source.load_fills().await.unwrap_err();
        assert!(matches!(err, DataSourceError::Io(_)));
    }
}
