use anyhow::Context;
use pnl_flow::{config::Config, AppError, JobReport, PnlFlowJob};

async fn run(config: Config) -> Result<JobReport, AppError> {
    let job = PnlFlowJob::from_config(config);

    let cancel = job.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, aborting in-flight instruments");
            cancel.cancel();
        }
    });

    let report = job.run().await?;
    if !report.is_clean() {
        return Err(AppError::Internal(format!(
            "{} instrument(s) failed, {} aborted (output digest {})",
            report.failures.len(),
            report.aborted.len(),
            report.digest
        )));
    }
    Ok(report)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = Config::from_env().context("Configuration error")?;
    let output_path = config.output_path.clone();

    let report = run(config).await.with_context(|| {
        format!(
            "PnL run writing {} did not finish cleanly",
            output_path.display()
        )
    })?;

    tracing::info!(
        run_id = %report.run_id,
        records = report.records,
        digest = %report.digest,
        "Done"
    );
    Ok(())
}
