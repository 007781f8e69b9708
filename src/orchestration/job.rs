use crate::config::Config;
use crate::datasource::{BatchSource, CsvBatchSource, DataSourceError, LoadedFills};
use crate::domain::{CurrencyDecomposition, DecompositionMap, Fill, Instrument, Quote};
use crate::engine::EngineError;
use crate::output::{self, DiagnosticsReport, OutputError};
use crate::pipeline::{Batch, CancelFlag, CarryOver, Pipeline};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    DataSource(#[from] DataSourceError),
    #[error(transparent)]
    Output(#[from] OutputError),
}

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub run_id: Uuid,
    pub records: usize,
    pub digest: String,
    pub diagnostic_counts: BTreeMap<String, usize>,
    pub failures: Vec<EngineError>,
    pub aborted: Vec<Instrument>,
    pub unresolved_decompositions: Vec<Instrument>,
}

impl JobReport {
    /// No instrument failed or was aborted.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.aborted.is_empty()
    }
}

pub struct PnlFlowJob {
    config: Config,
    source: Arc<dyn BatchSource>,
    cancel: CancelFlag,
}

impl PnlFlowJob {
    pub fn new(config: Config, source: Arc<dyn BatchSource>) -> Self {
        Self {
            config,
            source,
            cancel: CancelFlag::new(),
        }
    }

    /// Job reading the CSV files named in the config.
    pub fn from_config(config: Config) -> Self {
        let mut source = CsvBatchSource::new(&config.fills_path, &config.quotes_path);
        if let Some(path) = &config.decomposition_path {
            source = source.with_decompositions(path);
        }
        Self::new(config, Arc::new(source))
    }

    /// Flag that aborts the running batch when set.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub async fn run(&self) -> Result<JobReport, JobError> {
        let run_id = Uuid::new_v4();
        tracing::info!(
            run_id = %run_id,
            fills = %self.config.fills_path.display(),
            quotes = %self.config.quotes_path.display(),
            "Starting PnL run"
        );

        let (loaded, quotes, table) = tokio::try_join!(
            self.source.load_fills(),
            self.source.load_quotes(),
            self.source.load_decompositions(),
        )?;
        let LoadedFills { fills, rejected } = loaded;
        tracing::info!(
            fills = fills.len(),
            rejected_fills = rejected.len(),
            quotes = quotes.len(),
            decompositions = table.len(),
            "Batch loaded"
        );

        let (decompositions, unresolved) = self.decomposition_map(table, &fills, &quotes);
        for instrument in &unresolved {
            tracing::warn!(
                instrument = %instrument,
                "No one-hop USD route, conversions will be missing"
            );
        }

        let carry_over = self.load_carry_over().await?;

        let batch = Batch {
            fills,
            quotes,
            decompositions,
            carry_over,
            rejected_fills: rejected,
        };
        let pipeline = Pipeline::with_cancel(self.config.engine, self.cancel.clone());
        let run_output = pipeline.run_parallel(batch).await;

        let digest = output::write_records(&self.config.output_path, &run_output.records)?;
        if let Some(path) = &self.config.diagnostics_path {
            let report = DiagnosticsReport::new(run_id, &digest, &run_output, &unresolved);
            output::write_diagnostics(path, &report)?;
        }

        let diagnostic_counts: BTreeMap<String, usize> = run_output
            .diagnostics
            .counts()
            .into_iter()
            .map(|(kind, count)| (kind.to_string(), count))
            .collect();
        for (kind, count) in &diagnostic_counts {
            tracing::warn!(kind = %kind, count, "Recovered data-quality conditions");
        }
        tracing::info!(
            run_id = %run_id,
            records = run_output.records.len(),
            digest = %digest,
            output = %self.config.output_path.display(),
            "PnL run finished"
        );

        Ok(JobReport {
            run_id,
            records: run_output.records.len(),
            digest,
            diagnostic_counts,
            failures: run_output.failures,
            aborted: run_output.aborted,
            unresolved_decompositions: unresolved,
        })
    }

    /// A loaded table wins; otherwise derive from the batch's symbols when enabled,
    /// else treat every instrument as USD-native.
    fn decomposition_map(
        &self,
        table: Vec<CurrencyDecomposition>,
        fills: &[Fill],
        quotes: &[Quote],
    ) -> (DecompositionMap, Vec<Instrument>) {
        if !table.is_empty() {
            return (DecompositionMap::from_entries(table), Vec::new());
        }
        if !self.config.derive_decomposition {
            return (DecompositionMap::new(), Vec::new());
        }
        let symbols: BTreeSet<&Instrument> = fills
            .iter()
            .map(|f| &f.instrument)
            .chain(quotes.iter().map(|q| &q.instrument))
            .collect();
        let symbols: Vec<Instrument> = symbols.into_iter().cloned().collect();
        let (map, unresolved) = DecompositionMap::from_symbols(&symbols);
        tracing::info!(
            instruments = map.len(),
            unresolved = unresolved.len(),
            "Derived decompositions from symbols"
        );
        (map, unresolved)
    }

    async fn load_carry_over(&self) -> Result<CarryOver, JobError> {
        let Some(path) = &self.config.carryover_path else {
            return Ok(CarryOver::new());
        };
        let bytes = tokio::fs::read(path).await.map_err(OutputError::from)?;
        let records = output::parse_records(&bytes)?;
        let carry_over = CarryOver::from_records(&records);
        tracing::info!(
            path = %path.display(),
            instruments = carry_over.len(),
            "Loaded carry-over state"
        );
        Ok(carry_over)
    }
}
