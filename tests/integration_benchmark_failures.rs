#![cfg(unix)]

use anyhow::Result;
use clap::Parser;
use kv_benchmark::{Args, BenchmarkSuite, HarnessError, RunConfig};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

const FAKE_SERVER: &str = "#!/bin/sh
trap 'exit 0' TERM
while true; do sleep 0.05; done
";

fn config(server: &Path, results_dir: &Path, fail_fast: bool) -> Result<RunConfig> {
    let port = std::net::TcpListener::bind("127.0.0.1:0")?.local_addr()?.port().to_string();
    let mut argv = vec![
        "kv-benchmark",
        "--targets",
        "redis",
        "--redis-server-bin",
        server.to_str().unwrap(),
        "--memtier-bin",
        "false",
        "--redis-port",
        port.as_str(),
        "--readiness-probe",
        "none",
        "--startup-grace",
        "0s",
        "--cooldown",
        "0s",
        "--test-time",
        "1s",
        "--workload",
        "balanced",
        "read-heavy",
        "--results-dir",
        results_dir.to_str().unwrap(),
    ];
    if fail_fast {
        argv.push("--fail-on-benchmark-error");
    }
    RunConfig::from_args(&Args::parse_from(argv))
}

/// Load generator failures skip scenarios by default and abort on request.
#[tokio::test]
async fn benchmark_failure_policy() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let server = dir.path().join("fake-server");
    std::fs::write(&server, FAKE_SERVER)?;
    std::fs::set_permissions(&server, std::fs::Permissions::from_mode(0o755))?;

    let lenient = dir.path().join("lenient");
    let outcome = BenchmarkSuite::new(config(&server, &lenient, false)?).run().await?;
    assert!(outcome.failed_targets.is_empty());
    let skipped: Vec<&str> = outcome
        .skipped_scenarios
        .iter()
        .map(|s| s.scenario.as_str())
        .collect();
    assert_eq!(skipped, vec!["balanced", "readheavy"]);
    assert!(outcome.table.is_empty());
    assert!(lenient.join("summary.txt").exists());

    let strict = dir.path().join("strict");
    let err = BenchmarkSuite::new(config(&server, &strict, true)?)
        .run()
        .await
        .unwrap_err();
    match err {
        HarnessError::BenchmarkInvocation { target, scenario, .. } => {
            assert_eq!(target, "redis");
            assert_eq!(scenario, "balanced");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!strict.join("summary.txt").exists());
    Ok(())
}
