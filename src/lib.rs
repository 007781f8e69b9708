pub mod config;
pub mod datasource;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;
pub mod output;
pub mod pipeline;

pub use config::{Config, EngineConfig};
pub use datasource::{
    BatchSource, CsvBatchSource, DataSourceError, LoadedFills, MockBatchSource,
};
pub use domain::{
    ConversionMode, CurrencyDecomposition, Decimal, DecompositionMap, Fill, Instrument, PriceSide,
    Quote, Side, TimeMs, UsdConversion,
};
pub use engine::{
    BucketAlignment, Diagnostic, Diagnostics, EngineError, OutputRecord, PositionState,
    RealizationPrice,
};
pub use error::AppError;
pub use orchestration::{JobReport, PnlFlowJob};
pub use pipeline::{Batch, CancelFlag, CarryOver, Pipeline, RunOutput};
