//! Pure computation engine for deterministic per-instrument PnL accounting.
//!
//! Data flow: fills → [`Bucketizer`] → [`merge_buckets`] → [`CurrencyDecomposer`]
//! → [`PositionTracker`] → [`mark_to_market`] → [`TimeSeriesEmitter`].

pub mod bucketizer;
pub mod converter;
pub mod diagnostics;
pub mod emitter;
pub mod mark_to_market;
pub mod merger;
pub mod position_tracker;
pub mod quote_book;

pub use bucketizer::{BucketAggregate, BucketAlignment, BucketSpec, Bucketizer};
pub use converter::{
    BucketRates, CurrencyDecomposer, DecomposedBucket, LegPrices, MissingQuote, Priced,
    ResolvedPrices,
};
pub use diagnostics::{Diagnostic, Diagnostics, MissingReason};
pub use emitter::{OutputRecord, TimeSeriesEmitter};
pub use mark_to_market::{mark_to_market, Unrealized};
pub use merger::{merge_buckets, MergedBucketRow};
pub use position_tracker::{
    BucketPnl, EngineError, PositionState, PositionTracker, RealizationPrice, Transition,
};
pub use quote_book::QuoteBook;
