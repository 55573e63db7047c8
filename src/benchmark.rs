//! # Benchmark Runner Module
//!
//! Drives the external load generator (`memtier_benchmark`) against one
//! running server for one scenario and leaves a JSON report behind.
//!
//! ## Report naming
//!
//! Every run writes `<results_dir>/<target>_<label>.json`. The result
//! aggregator recovers the target and scenario from that name, so scenario
//! labels never contain an underscore.
//!
//! ## Failure handling
//!
//! The runner waits for the tool to exit; the run length is bounded by
//! `--test-time`. A spawn failure, a non-zero exit, or a missing report is a
//! [`HarnessError::BenchmarkInvocation`]. Whether that aborts the suite is
//! decided by the caller.

use crate::cli::{RunConfig, TlsCredentials};
use crate::error::{HarnessError, HarnessResult};
use crate::scenario::Scenario;
use crate::utils::format_duration;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, info};

/// Key range used by every scenario.
pub const KEY_MINIMUM: u32 = 1;
pub const KEY_MAXIMUM: u32 = 100_000;

/// Percentiles requested from the load generator.
pub const PRINT_PERCENTILES: &str = "50,90,95,99,99.9";

/// Key access pattern for SET:GET.
const KEY_PATTERN: &str = "P:P";

/// Subdirectory receiving HDR histogram files when enabled.
pub const HDR_DIR: &str = "hdr";

/// Report path for one target/scenario pair.
pub fn report_path(results_dir: &Path, target: &str, scenario: &Scenario) -> PathBuf {
    results_dir.join(format!("{}_{}.json", target, scenario.label))
}

/// Load generator output log for one target/scenario pair.
///
/// Uses dashes only, so it can never be mistaken for a report.
pub fn output_log_path(results_dir: &Path, target: &str, scenario: &Scenario) -> PathBuf {
    results_dir.join(format!("{}-{}-memtier.log", target, scenario.label))
}

/// A fully built load generator command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemtierCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl MemtierCommand {
    pub fn new(
        config: &RunConfig,
        target: &str,
        port: u16,
        scenario: &Scenario,
        report_path: &Path,
    ) -> Self {
        let mut args: Vec<String> = vec![
            "--server".into(),
            config.host.clone(),
            "--port".into(),
            port.to_string(),
            "--threads".into(),
            config.threads.to_string(),
            "--clients".into(),
            scenario.clients.to_string(),
            "--test-time".into(),
            config.test_time.as_secs().to_string(),
            "--data-size".into(),
            config.key_size.to_string(),
            "--key-pattern".into(),
            KEY_PATTERN.into(),
            "--key-minimum".into(),
            KEY_MINIMUM.to_string(),
            "--key-maximum".into(),
            KEY_MAXIMUM.to_string(),
            "--ratio".into(),
            scenario.ratio.clone(),
            "--print-percentiles".into(),
            PRINT_PERCENTILES.into(),
            "--hide-histogram".into(),
            "--json-out-file".into(),
            report_path.display().to_string(),
        ];

        if let Some(TlsCredentials { cert, key, ca }) = &config.tls {
            args.push("--tls".into());
            args.push("--cert".into());
            args.push(cert.display().to_string());
            args.push("--key".into());
            args.push(key.display().to_string());
            args.push("--cacert".into());
            args.push(ca.display().to_string());
        }

        if let Some(rate) = scenario.rate_limit {
            args.push("--rate-limit".into());
            args.push(rate.to_string());
        }

        if config.simulate_latency_ms > 0 {
            args.push("--latency".into());
            args.push(config.simulate_latency_ms.to_string());
        }

        if config.hdr_histograms {
            let prefix = config
                .results_dir
                .join(HDR_DIR)
                .join(format!("{}-{}", target, scenario.label));
            args.push("--hdr-file-prefix".into());
            args.push(prefix.display().to_string());
        }

        Self {
            program: config.memtier_bin.clone(),
            args,
        }
    }
}

impl std::fmt::Display for MemtierCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Runs scenarios against a live server.
pub struct BenchmarkRunner<'a> {
    config: &'a RunConfig,
}

impl<'a> BenchmarkRunner<'a> {
    pub fn new(config: &'a RunConfig) -> Self {
        Self { config }
    }

    /// Run `scenario` against `target` on `port`.
    ///
    /// Returns the path of the written report.
    pub async fn run(
        &self,
        target: &str,
        port: u16,
        scenario: &Scenario,
    ) -> HarnessResult<PathBuf> {
        let dir = &self.config.results_dir;
        let report = report_path(dir, target, scenario);
        let command = MemtierCommand::new(self.config, target, port, scenario, &report);

        if self.config.hdr_histograms {
            std::fs::create_dir_all(dir.join(HDR_DIR))?;
        }

        info!("Running {} against {}", scenario, target);
        debug!("Load generator command: {}", command);

        let invocation_error = |reason: String, status| HarnessError::BenchmarkInvocation {
            target: target.to_string(),
            scenario: scenario.label.clone(),
            reason,
            status,
        };

        let log = File::create(output_log_path(dir, target, scenario))?;
        let log_err = log.try_clone()?;

        let started = Instant::now();
        let status = Command::new(&command.program)
            .args(&command.args)
            .kill_on_drop(true)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .status()
            .await
            .map_err(|e| {
                invocation_error(
                    format!("failed to run {}: {}", command.program.display(), e),
                    None,
                )
            })?;

        if !status.success() {
            return Err(invocation_error(format!("exited with {}", status), Some(status)));
        }
        if !report.exists() {
            return Err(invocation_error(
                format!("no report written to {}", report.display()),
                Some(status),
            ));
        }

        info!(
            "{} / {} finished in {}, report: {}",
            target,
            scenario.label,
            format_duration(started.elapsed()),
            report.display()
        );
        Ok(report)
    }
}
