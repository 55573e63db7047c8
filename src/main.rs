//! # Redis vs KeyDB Benchmark Suite - Main Entry Point
//!
//! 1. **Parse arguments**: process command-line configuration
//! 2. **Create run config**: validate arguments and TLS credentials
//! 3. **Initialize logging**: console plus `harness.log` in the results directory
//! 4. **Run the suite**: every target, every scenario, one server at a time
//! 5. **Generate reports**: summary, comparison and charts
//!
//! With `--report-only DIR` only step 5 runs, against an existing directory.
//!
//! ## Exit Status
//!
//! Missing TLS credentials, an unreclaimable port, or a load generator
//! failure under `--fail-on-benchmark-error` end the process with a non-zero
//! status. Targets that could not be started are reported but do not change
//! the exit status.

use anyhow::{Context, Result};
use clap::Parser;
use kv_benchmark::{
    cli::{Args, RunConfig},
    logging,
    report::SUMMARY_FILE,
    suite::{generate_reports, BenchmarkSuite},
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(dir) = &args.report_only {
        let _guard = logging::init(args.verbose, None)?;
        info!("Reporting on existing results in {}", dir.display());
        let (table, artifacts) = generate_reports(dir, None)
            .with_context(|| format!("failed to report on {}", dir.display()))?;
        info!(
            "{} result(s), {} file(s) written",
            table.len(),
            artifacts.len()
        );
        return Ok(());
    }

    // Nothing touches the disk until the configuration is valid.
    let config = RunConfig::from_args(&args)?;
    // Keep the guard alive so buffered file log lines are flushed on exit.
    let _guard = logging::init(args.verbose, Some(config.results_dir.as_path()))?;

    let suite = BenchmarkSuite::new(config);

    match suite.run().await {
        Ok(outcome) => {
            for failure in &outcome.failed_targets {
                error!("{} failed: {}", failure.target, failure.reason);
            }
            info!(
                "Check {} for a quick overview",
                outcome.results_dir.join(SUMMARY_FILE).display()
            );
            Ok(())
        }
        Err(e) => Err(e).context("benchmark suite aborted"),
    }
}
