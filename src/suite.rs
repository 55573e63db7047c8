//! # Suite Orchestration
//!
//! Runs every scenario against every target, one server at a time, and
//! produces the reports at the end.
//!
//! For each target, in order:
//!
//! 1. reclaim the port if something already listens on it
//! 2. start the server and wait until it answers
//! 3. run each scenario, pausing for the cooldown in between
//! 4. stop the server and reclaim its port
//!
//! A target that fails to start or never becomes ready is recorded and
//! skipped; the remaining targets still run. Port reclamation failures and
//! missing credentials abort the run.

use crate::benchmark::BenchmarkRunner;
use crate::cli::{RunConfig, TargetSpec};
use crate::error::{HarnessError, HarnessResult};
use crate::plot::plot;
use crate::port;
use crate::report::{write_comparison, write_summary};
use crate::results::{collect, ResultTable};
use crate::scenario::{scenarios, Scenario};
use crate::server::{ReadinessCheck, ServerCommand, ServerHandle};
use crate::utils::{create_progress_indicator, format_duration};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// A target that was not benchmarked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetFailure {
    pub target: String,
    pub reason: String,
}

/// A scenario that produced no report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedScenario {
    pub target: String,
    pub scenario: String,
    pub reason: String,
}

/// What a completed run produced.
#[derive(Debug)]
pub struct SuiteOutcome {
    pub results_dir: PathBuf,
    pub table: ResultTable,
    pub failed_targets: Vec<TargetFailure>,
    pub skipped_scenarios: Vec<SkippedScenario>,
    /// Summary, comparison and chart files.
    pub artifacts: Vec<PathBuf>,
}

/// Aggregate `dir` and write the summary, comparison and charts into it.
///
/// `config` is recorded in the comparison when the directory comes from the
/// current run.
pub fn generate_reports(
    dir: &Path,
    config: Option<&RunConfig>,
) -> HarnessResult<(ResultTable, Vec<PathBuf>)> {
    info!("Generating summary report...");
    let table = collect(dir);
    if table.is_empty() {
        warn!("No benchmark reports found in {}", dir.display());
    }

    let mut artifacts = vec![write_summary(dir, &table)?];
    artifacts.push(write_comparison(dir, &table, config)?);
    artifacts.extend(plot(&table, dir));

    Ok((table, artifacts))
}

pub struct BenchmarkSuite {
    config: RunConfig,
}

impl BenchmarkSuite {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run the whole suite.
    ///
    /// Returns `Err` only for fatal errors, or for a load generator failure
    /// when `fail_on_benchmark_error` is set.
    pub async fn run(&self) -> HarnessResult<SuiteOutcome> {
        let config = &self.config;
        std::fs::create_dir_all(&config.results_dir)?;

        info!("Starting benchmark suite...");
        info!("{}", config);

        let scenarios = scenarios(config);
        let mut failed_targets = Vec::new();
        let mut skipped_scenarios = Vec::new();
        let started = Instant::now();

        for (index, target) in config.targets.iter().enumerate() {
            info!(
                "Testing {}... [{}] {}/{}",
                target.kind,
                create_progress_indicator(index, config.targets.len(), 20),
                index + 1,
                config.targets.len()
            );

            match self.run_target(target, &scenarios, &mut skipped_scenarios).await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    error!("Aborting: {}", e);
                    return Err(e);
                }
                Err(e @ HarnessError::BenchmarkInvocation { .. }) => {
                    error!("Aborting: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    error!("{} was not benchmarked: {}", target.kind, e);
                    failed_targets.push(TargetFailure {
                        target: target.name().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            "All targets finished in {}",
            format_duration(started.elapsed())
        );

        let (table, artifacts) = generate_reports(&config.results_dir, Some(config))?;

        if !failed_targets.is_empty() {
            warn!(
                "Failed targets: {}",
                failed_targets
                    .iter()
                    .map(|f| f.target.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        if !skipped_scenarios.is_empty() {
            warn!("{} scenario(s) produced no report", skipped_scenarios.len());
        }
        info!(
            "Benchmarks complete! Results are in {}",
            config.results_dir.display()
        );

        Ok(SuiteOutcome {
            results_dir: config.results_dir.clone(),
            table,
            failed_targets,
            skipped_scenarios,
            artifacts,
        })
    }

    /// Start `target`, run every scenario against it, and stop it.
    async fn run_target(
        &self,
        target: &TargetSpec,
        scenarios: &[Scenario],
        skipped: &mut Vec<SkippedScenario>,
    ) -> HarnessResult<()> {
        let config = &self.config;

        if port::port_in_use(&config.host, target.port) {
            warn!("Port {} is already bound; reclaiming", target.port);
            port::reclaim_port(&config.host, target.port).await?;
        }

        let command = ServerCommand::for_target(target, config);
        let log_path = config
            .results_dir
            .join(format!("{}-server.log", target.name()));
        let name = target.kind.to_string();
        let mut server = ServerHandle::start(
            &command,
            &name,
            config.startup_grace,
            Some(log_path.as_path()),
        )
        .await?;

        let check = ReadinessCheck::for_target(target, config);
        if let Err(e) = server.wait_ready(&check).await {
            server.stop(&config.host, config.stop_timeout).await?;
            return Err(e);
        }

        let runner = BenchmarkRunner::new(config);
        let mut outcome = Ok(());
        for (index, scenario) in scenarios.iter().enumerate() {
            match runner.run(target.name(), target.port, scenario).await {
                Ok(_) => {}
                Err(e) if config.fail_on_benchmark_error => {
                    outcome = Err(e);
                    break;
                }
                Err(e) => {
                    warn!("Skipping scenario: {}", e);
                    skipped.push(SkippedScenario {
                        target: target.name().to_string(),
                        scenario: scenario.label.clone(),
                        reason: e.to_string(),
                    });
                }
            }

            if index + 1 < scenarios.len() && !config.cooldown.is_zero() {
                info!("Cooling down for {}", format_duration(config.cooldown));
                sleep(config.cooldown).await;
            }
        }

        server.stop(&config.host, config.stop_timeout).await?;
        outcome
    }
}
