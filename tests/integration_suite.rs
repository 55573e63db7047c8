#![cfg(unix)]

//! End-to-end run against fake server and load generator scripts.

use anyhow::Result;
use clap::Parser;
use kv_benchmark::{Args, BenchmarkSuite, RunConfig};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const FAKE_SERVER: &str = "#!/bin/sh
trap 'exit 0' TERM
while true; do sleep 0.05; done
";

const FAKE_MEMTIER: &str = r#"#!/bin/sh
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "--json-out-file" ]; then out="$2"; fi
  shift
done
printf '{"ALL STATS":{"Totals":{"Ops/sec":1234.5,"Average Latency":0.5,"Max Latency":2.0,"Percentile Latencies":{"p50.00":0.4,"p99.00":1.1}}}}' > "$out"
"#;

fn script(dir: &Path, name: &str, body: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, body)?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    Ok(path)
}

fn free_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// KeyDB cannot start; Redis still runs every scenario and is reported.
#[tokio::test]
async fn failed_target_does_not_stop_the_suite() -> Result<()> {
    let bin = tempfile::TempDir::new()?;
    let out = tempfile::TempDir::new()?;
    let server = script(bin.path(), "fake-redis-server", FAKE_SERVER)?;
    let memtier = script(bin.path(), "fake-memtier", FAKE_MEMTIER)?;
    let missing = bin.path().join("keydb-server-not-installed");

    let redis_port = free_port()?.to_string();
    let keydb_port = free_port()?.to_string();
    let results_dir = out.path().join("run");

    let args = Args::parse_from([
        "kv-benchmark",
        "--redis-server-bin",
        server.to_str().unwrap(),
        "--keydb-server-bin",
        missing.to_str().unwrap(),
        "--memtier-bin",
        memtier.to_str().unwrap(),
        "--redis-port",
        redis_port.as_str(),
        "--keydb-port",
        keydb_port.as_str(),
        "--readiness-probe",
        "none",
        "--startup-grace",
        "0s",
        "--cooldown",
        "0s",
        "--stop-timeout",
        "2s",
        "--test-time",
        "1s",
        "--workload",
        "balanced",
        "write-heavy",
        "--results-dir",
        results_dir.to_str().unwrap(),
    ]);
    let config = RunConfig::from_args(&args)?;

    let outcome = BenchmarkSuite::new(config).run().await?;

    assert_eq!(outcome.failed_targets.len(), 1);
    assert_eq!(outcome.failed_targets[0].target, "keydb");
    assert!(outcome.skipped_scenarios.is_empty());

    assert_eq!(outcome.table.len(), 2);
    assert_eq!(outcome.table.targets(), vec!["redis"]);
    let balanced = outcome.table.get("redis", "balanced").unwrap();
    assert_eq!(balanced.ops_per_sec, 1234.5);
    assert_eq!(balanced.percentile(99.0), Some(1.1));
    assert!(outcome.table.get("redis", "writeheavy").is_some());

    assert!(results_dir.join("redis_balanced.json").exists());
    assert!(results_dir.join("redis-server.log").exists());
    assert!(results_dir.join("comparison.json").exists());
    assert!(results_dir.join("throughput_comparison.svg").exists());
    assert!(outcome.artifacts.contains(&results_dir.join("summary.txt")));

    let summary = std::fs::read_to_string(results_dir.join("summary.txt"))?;
    let blocks: Vec<&str> = summary
        .lines()
        .filter(|line| line.starts_with("Results from "))
        .collect();
    assert_eq!(
        blocks,
        vec![
            "Results from redis_balanced.json:",
            "Results from redis_writeheavy.json:"
        ]
    );
    assert_eq!(
        summary.lines().filter(|line| *line == "  Ops/sec: 1234.5").count(),
        2
    );
    Ok(())
}
