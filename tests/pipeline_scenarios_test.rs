//! End-to-end batch runs through the pipeline, from raw fills and quotes to
//! the output record stream.

use pnl_flow::engine::{BucketAlignment, Diagnostic, MissingReason, PositionState};
use pnl_flow::pipeline::CarrySeed;
use pnl_flow::{
    Batch, CarryOver, CurrencyDecomposition, Decimal, DecompositionMap, EngineConfig, EngineError,
    Fill, Instrument, OutputRecord, Pipeline, Quote, RealizationPrice, Side, TimeMs,
};

// =============================================================================
// Test Infrastructure
// =============================================================================

const MINUTE: i64 = 60_000;

fn d(s: &str) -> Decimal {
    Decimal::from_str_canonical(s).unwrap()
}

fn fill(instrument: &str, side: Side, amount: &str, price: &str, time_ms: i64) -> Fill {
    Fill::new(
        TimeMs::new(time_ms),
        Instrument::new(instrument),
        side,
        d(amount),
        d(price),
    )
}

fn buy(amount: &str, price: &str, time_ms: i64) -> Fill {
    fill("X", Side::Buy, amount, price, time_ms)
}

fn sell(amount: &str, price: &str, time_ms: i64) -> Fill {
    fill("X", Side::Sell, amount, price, time_ms)
}

fn quote(instrument: &str, bid: &str, ask: &str, time_ms: i64) -> Quote {
    Quote::new(TimeMs::new(time_ms), Instrument::new(instrument), d(bid), d(ask))
}

fn batch(fills: Vec<Fill>, quotes: Vec<Quote>) -> Batch {
    Batch {
        fills,
        quotes,
        ..Batch::default()
    }
}

fn run(batch: &Batch) -> Vec<OutputRecord> {
    let output = Pipeline::new(EngineConfig::default()).run(batch);
    assert!(output.is_clean());
    output.records
}

fn times(records: &[OutputRecord]) -> Vec<i64> {
    records.iter().map(|r| r.bucket_time.as_ms()).collect()
}

/// Two instruments, one of them cross-currency, with an open position at the end.
fn mixed_batch() -> Batch {
    let mut fills = vec![
        buy("4", "100", 1_000),
        buy("1", "110", MINUTE + 5_000),
        sell("3", "120", MINUTE + 6_000),
        sell("2", "90", 2 * MINUTE),
    ];
    fills.extend([
        fill("ETH/EUR", Side::Buy, "2", "2000", 10_000),
        fill("ETH/EUR", Side::Sell, "1", "2050", 3 * MINUTE + 1),
    ]);
    let quotes = vec![
        quote("X", "100", "101", 0),
        quote("ETH/EUR", "1990", "2010", 0),
        quote("ETH/EUR", "2040", "2060", 2 * MINUTE + 30_000),
        quote("EUR/USD", "1.10", "1.12", 0),
    ];
    let mut batch = batch(fills, quotes);
    batch.decompositions = DecompositionMap::from_entries([CurrencyDecomposition::from_row(
        Instrument::new("ETH/EUR"),
        None,
        Some(Instrument::new("EUR/USD")),
        Some(Instrument::new("EUR/USD")),
        false,
    )]);
    batch
}

// =============================================================================
// Accounting Scenarios
// =============================================================================

#[test]
fn test_entry_then_exit_realizes_trade_spread() {
    let records = run(&batch(
        vec![buy("1", "100", 0), sell("1", "105", MINUTE)],
        vec![quote("X", "101", "102", 0)],
    ));

    assert_eq!(times(&records), vec![0, MINUTE]);

    let entry = &records[0];
    assert_eq!(entry.realized_pnl_native, Some(Decimal::zero()));
    assert_eq!(entry.cum_amt, d("1"));
    assert_eq!(entry.cum_cost_native, d("100"));
    assert_eq!(entry.cum_quote_amt, d("-100"));
    // Long marked at the bid.
    assert_eq!(entry.unrealized_pnl_native, Some(d("1")));
    assert!(entry.complete);

    let exit = &records[1];
    assert_eq!(exit.realized_pnl_native, Some(d("5")));
    assert_eq!(exit.realized_pnl_usd, Some(d("5")));
    assert_eq!(exit.cum_amt, Decimal::zero());
    assert_eq!(exit.cum_cost_native, Decimal::zero());
    assert_eq!(exit.unrealized_pnl_usd, Some(Decimal::zero()));
    assert_eq!(exit.total_pnl_usd, Some(d("5")));
    assert_eq!(exit.cum_vol_usd, Some(d("205")));
}

#[test]
fn test_reduction_keeps_average_entry() {
    let records = run(&batch(
        vec![buy("10", "50", 0), sell("4", "55", MINUTE)],
        vec![quote("X", "55", "55", 0)],
    ));

    let reduce = &records[1];
    assert_eq!(reduce.realized_pnl_native, Some(d("20")));
    assert_eq!(reduce.cum_amt, d("6"));
    assert_eq!(reduce.cum_cost_native, d("300"));
    assert_eq!(reduce.unrealized_pnl_native, Some(d("30")));
}

#[test]
fn test_mark_realization_uses_close_out_quote() {
    let config = EngineConfig {
        realize_at: RealizationPrice::Mark,
        ..EngineConfig::default()
    };
    let output = Pipeline::new(config).run(&batch(
        vec![buy("1", "100", 0), sell("3", "90", MINUTE)],
        vec![quote("X", "100", "101", 0), quote("X", "80", "82", MINUTE)],
    ));

    let flip = &output.records[1];
    // The long closes at the bid, not at the 90 trade price.
    assert_eq!(flip.realized_pnl_native, Some(d("-20")));
    assert_eq!(flip.cum_amt, d("-2"));
    assert_eq!(flip.cum_cost_native, d("-180"));
    assert_eq!(flip.cum_quote_amt, d("180"));
}

#[test]
fn test_flat_round_trip_conserves_cash() {
    let records = run(&mixed_batch());
    let x: Vec<&OutputRecord> = records
        .iter()
        .filter(|r| r.instrument == Instrument::new("X"))
        .collect();

    let realized: Decimal = x.iter().filter_map(|r| r.realized_pnl_native).sum();
    // Sells 3 * 120 + 2 * 90 against buys 4 * 100 + 1 * 110.
    assert_eq!(realized, d("30"));

    let last = x[x.len() - 1];
    assert_eq!(last.cum_amt, Decimal::zero());
    assert_eq!(last.cum_cost_native, Decimal::zero());
    assert_eq!(last.cum_realized_pnl_native, Some(d("30")));
    assert_eq!(last.cum_realized_pnl_usd, Some(d("30")));
    assert_eq!(x[1].amt_matched, d("1"));
    assert_eq!(x[1].realized_pnl_native, Some(d("50")));
}

#[test]
fn test_open_position_is_revalued_when_quotes_move() {
    let records = run(&batch(
        vec![buy("1", "100", 0)],
        vec![quote("X", "100", "101", 0), quote("X", "110", "111", 130_000)],
    ));

    // The second quote becomes visible at the next boundary.
    assert_eq!(times(&records), vec![0, 3 * MINUTE]);
    let quiet = &records[1];
    assert_eq!(quiet.num_deals, 0);
    assert_eq!(quiet.realized_pnl_native, Some(Decimal::zero()));
    assert_eq!(quiet.unrealized_pnl_native, Some(d("10")));
    assert_eq!(quiet.vol_usd, Some(Decimal::zero()));
}

#[test]
fn test_flat_quiet_buckets_are_not_emitted() {
    let records = run(&batch(
        vec![buy("1", "100", 0), sell("1", "105", MINUTE)],
        vec![quote("X", "101", "102", 0), quote("X", "120", "121", 5 * MINUTE)],
    ));

    assert_eq!(times(&records), vec![0, MINUTE]);
}

#[test]
fn test_cross_currency_instrument_reports_every_leg() {
    let records = run(&mixed_batch());
    let eth: Vec<&OutputRecord> = records
        .iter()
        .filter(|r| r.instrument == Instrument::new("ETH/EUR"))
        .collect();

    // Trades at 0 and 180000, revaluation at 180000 after the quote at 150000.
    assert_eq!(eth.len(), 2);
    let entry = eth[0];
    assert_eq!(entry.cum_cost_native, d("4000"));
    assert_eq!(entry.cum_cost_usd, Some(d("4400")));
    assert_eq!(entry.cum_cost_quote, Some(d("-4400")));
    assert!(entry.complete);

    let reduce = eth[1];
    assert_eq!(reduce.realized_pnl_native, Some(d("50")));
    // Sold at 2050 * 1.12, entry 2000 * 1.10.
    assert_eq!(reduce.realized_pnl_usd, Some(d("96")));
    assert_eq!(reduce.cum_amt, d("1"));
}

// =============================================================================
// Data-Quality Handling
// =============================================================================

#[test]
fn test_missing_quote_nulls_converted_fields_only() {
    let mut batch = batch(
        vec![fill("ETH/EUR", Side::Buy, "1", "2000", 0)],
        vec![quote("ETH/EUR", "1990", "2010", 0)],
    );
    batch.decompositions = DecompositionMap::from_entries([CurrencyDecomposition::from_row(
        Instrument::new("ETH/EUR"),
        None,
        Some(Instrument::new("EUR/USD")),
        Some(Instrument::new("EUR/USD")),
        false,
    )]);

    let output = Pipeline::new(EngineConfig::default()).run(&batch);

    let record = &output.records[0];
    assert_eq!(record.cum_cost_native, d("2000"));
    assert_eq!(record.unrealized_pnl_native, Some(d("-10")));
    assert_eq!(record.cum_cost_usd, None);
    assert_eq!(record.unrealized_pnl_usd, None);
    assert_eq!(record.vol_usd, None);
    assert!(!record.complete);

    assert!(output.diagnostics.iter().any(|diag| matches!(
        diag,
        Diagnostic::MissingQuote { missing, reason: MissingReason::NoObservation, .. }
            if *missing == Instrument::new("EUR/USD")
    )));
}

#[test]
fn test_unconverted_realized_pnl_keeps_later_totals_incomplete() {
    let mut batch = batch(
        vec![
            fill("ETH/EUR", Side::Buy, "1", "2000", MINUTE + 1_000),
            fill("ETH/EUR", Side::Sell, "1", "2010", MINUTE + 2_000),
            fill("ETH/EUR", Side::Buy, "1", "2000", 4 * MINUTE + 1_000),
            fill("ETH/EUR", Side::Sell, "1", "2005", 4 * MINUTE + 2_000),
        ],
        vec![quote("EUR/USD", "1", "1", 3 * MINUTE)],
    );
    batch.decompositions = DecompositionMap::from_entries([CurrencyDecomposition::from_row(
        Instrument::new("ETH/EUR"),
        None,
        Some(Instrument::new("EUR/USD")),
        Some(Instrument::new("EUR/USD")),
        false,
    )]);

    let records = run(&batch);
    assert_eq!(times(&records), vec![MINUTE, 4 * MINUTE]);

    let first = &records[0];
    assert_eq!(first.realized_pnl_native, Some(d("10")));
    assert_eq!(first.realized_pnl_usd, None);
    assert_eq!(first.cum_realized_pnl_usd, None);
    assert_eq!(first.total_pnl_usd, None);
    assert_eq!(first.cum_vol_usd, None);
    assert!(!first.complete);

    // Every conversion of the second round trip succeeds, but the running totals
    // still include the unconverted first one.
    let second = &records[1];
    assert_eq!(second.realized_pnl_usd, Some(d("5")));
    assert_eq!(second.vol_usd, Some(d("4005")));
    assert_eq!(second.cum_realized_pnl_native, Some(d("15")));
    assert_eq!(second.cum_realized_pnl_usd, None);
    assert_eq!(second.total_pnl_usd, None);
    assert_eq!(second.cum_vol_usd, None);
    assert!(!second.complete);
}

#[test]
fn test_rejected_source_rows_join_the_diagnostics() {
    let mut batch = batch(vec![buy("1", "100", 0)], vec![quote("X", "100", "101", 0)]);
    batch.rejected_fills.push(Diagnostic::InvalidFill {
        instrument: Instrument::new("X"),
        time_ms: None,
        line: Some(7),
        reason: "invalid time: soon".to_string(),
    });

    let output = Pipeline::new(EngineConfig::default()).run(&batch);

    assert_eq!(output.records.len(), 1);
    assert_eq!(output.diagnostics.counts().get("invalid_fill"), Some(&1));
}

#[test]
fn test_invalid_fill_is_reported_and_skipped() {
    let output = Pipeline::new(EngineConfig::default()).run(&batch(
        vec![buy("1", "100", 0), buy("0", "100", 1_000), buy("1", "-5", 2_000)],
        vec![quote("X", "100", "101", 0)],
    ));

    assert_eq!(output.records.len(), 1);
    assert_eq!(output.records[0].cum_amt, d("1"));
    assert_eq!(output.diagnostics.counts().get("invalid_fill"), Some(&2));
}

#[test]
fn test_corrupt_carry_over_fails_only_that_instrument() {
    let mut batch = mixed_batch();
    batch.carry_over.insert(
        Instrument::new("X"),
        CarrySeed {
            last_bucket_time: TimeMs::new(-MINUTE),
            state: PositionState {
                cum_cost_native: d("5"),
                ..PositionState::new()
            },
            cum_vol_usd: Some(Decimal::zero()),
        },
    );

    let output = Pipeline::new(EngineConfig::default()).run(&batch);

    assert!(!output.is_clean());
    assert_eq!(output.failures.len(), 1);
    assert!(matches!(
        &output.failures[0],
        EngineError::CorruptPositionState { instrument, .. } if *instrument == Instrument::new("X")
    ));
    assert!(output
        .records
        .iter()
        .all(|r| r.instrument == Instrument::new("ETH/EUR")));
    assert!(!output.records.is_empty());
}

// =============================================================================
// Determinism & Execution
// =============================================================================

#[test]
fn test_rerun_is_byte_identical() {
    let batch = mixed_batch();
    let pipeline = Pipeline::new(EngineConfig::default());

    let first = pipeline.run(&batch).digest().unwrap();
    let second = pipeline.run(&batch).digest().unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_input_order_does_not_change_output() {
    let batch = mixed_batch();
    let mut shuffled = batch.clone();
    shuffled.fills.reverse();
    shuffled.quotes.reverse();

    let pipeline = Pipeline::new(EngineConfig::default());
    assert_eq!(pipeline.run(&batch).records, pipeline.run(&shuffled).records);
}

#[tokio::test]
async fn test_parallel_run_matches_sequential() {
    let batch = mixed_batch();
    let pipeline = Pipeline::new(EngineConfig::default());

    let sequential = pipeline.run(&batch);
    let parallel = pipeline.run_parallel(batch).await;

    assert_eq!(sequential.records, parallel.records);
    assert_eq!(sequential.diagnostics, parallel.diagnostics);
    assert_eq!(sequential.digest().unwrap(), parallel.digest().unwrap());
}

#[tokio::test]
async fn test_cancelled_run_discards_partial_output() {
    let pipeline = Pipeline::new(EngineConfig::default());
    pipeline.cancel_flag().cancel();

    let output = pipeline.run_parallel(mixed_batch()).await;

    assert!(output.records.is_empty());
    assert_eq!(
        output.aborted,
        vec![Instrument::new("ETH/EUR"), Instrument::new("X")]
    );
}

#[test]
fn test_first_fill_alignment_offsets_buckets() {
    let config = EngineConfig {
        alignment: BucketAlignment::FirstFill,
        ..EngineConfig::default()
    };
    let output = Pipeline::new(config).run(&batch(
        vec![buy("1", "100", 15_000), buy("1", "100", 80_000)],
        vec![quote("X", "100", "101", 0)],
    ));

    assert_eq!(times(&output.records), vec![15_000, 75_000]);
    assert_eq!(output.records[1].cum_amt, d("2"));
}

#[test]
fn test_resume_from_carry_over_matches_single_run() {
    let quotes = vec![quote("X", "101", "102", 0)];
    let full = run(&batch(
        vec![buy("1", "100", 0), sell("1", "105", MINUTE)],
        quotes.clone(),
    ));

    let first = run(&batch(vec![buy("1", "100", 0)], quotes.clone()));
    let mut second = batch(vec![sell("1", "105", MINUTE)], quotes);
    second.carry_over = CarryOver::from_records(&first);
    let resumed = run(&second);

    assert_eq!(resumed.len(), 1);
    assert_eq!(resumed[0], full[1]);
}

#[test]
fn test_carried_open_position_is_revalued_without_trades() {
    let first = run(&batch(vec![buy("1", "100", 0)], vec![quote("X", "100", "101", 0)]));

    let mut next = batch(Vec::new(), vec![quote("X", "104", "105", MINUTE)]);
    next.carry_over = CarryOver::from_records(&first);
    let records = run(&next);

    assert_eq!(times(&records), vec![MINUTE]);
    assert_eq!(records[0].cum_amt, d("1"));
    assert_eq!(records[0].unrealized_pnl_native, Some(d("4")));
}
