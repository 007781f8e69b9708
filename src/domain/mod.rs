//! Domain types for the PnL flow engine.
//!
//! This module provides:
//! - Lossless numeric handling via Decimal wrapper
//! - Domain primitives: TimeMs, Instrument, Side
//! - Fill and Quote inputs, currency decomposition reference data
//! - Stable fill ordering key helper for deterministic processing

pub mod decimal;
pub mod decomposition;
pub mod fill;
pub mod ordering;
pub mod primitives;
pub mod quote;

pub use decimal::Decimal;
pub use decomposition::{ConversionMode, CurrencyDecomposition, DecompositionMap, UsdConversion};
pub use fill::{Fill, InvalidFill};
pub use ordering::{sort_fills_deterministic, FillOrderingKey};
pub use primitives::{Instrument, Side, TimeMs};
pub use quote::{PriceSide, Quote};
