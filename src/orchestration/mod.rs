//! Batch job wiring: load → carry-over → run → write.

pub mod job;

pub use job::{JobError, JobReport, PnlFlowJob};
