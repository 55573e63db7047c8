//! Text summary and JSON comparison written into the results directory.

use crate::cli::RunConfig;
use crate::results::{BenchmarkResult, ResultTable, COMPARISON_FILE};
use crate::utils::{format_latency_ms, format_ops_rate, format_table_row, format_table_separator};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

pub const SUMMARY_FILE: &str = "summary.txt";

/// Best target per scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioWinner {
    pub scenario: String,
    pub highest_throughput: Option<String>,
    pub ops_per_sec: Option<f64>,
    pub lowest_latency: Option<String>,
    pub average_latency_ms: Option<f64>,
}

/// System information for reproducibility
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub architecture: String,
    pub cpu_cores: usize,
    pub harness_version: String,
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_cores: num_cpus::get(),
            harness_version: crate::VERSION.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub total_results: usize,
    pub system_info: SystemInfo,
}

/// Contents of `comparison.json`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub metadata: ReportMetadata,
    /// Absent when the directory was only re-reported.
    pub config: Option<RunConfig>,
    pub results: Vec<BenchmarkResult>,
    pub winners: Vec<ScenarioWinner>,
}

/// Per-scenario winners. Results without an average latency do not compete
/// for the latency title.
pub fn compare(table: &ResultTable) -> Vec<ScenarioWinner> {
    table
        .scenarios()
        .into_iter()
        .map(|scenario| {
            let contenders: Vec<&BenchmarkResult> = table
                .targets()
                .into_iter()
                .filter_map(|target| table.get(target, scenario))
                .collect();

            let fastest = contenders
                .iter()
                .max_by(|a, b| a.ops_per_sec.total_cmp(&b.ops_per_sec));
            let lowest = contenders
                .iter()
                .filter_map(|r| r.average_latency_ms.map(|avg| (r, avg)))
                .min_by(|(_, a), (_, b)| a.total_cmp(b));

            ScenarioWinner {
                scenario: scenario.to_string(),
                highest_throughput: fastest.map(|r| r.target.clone()),
                ops_per_sec: fastest.map(|r| r.ops_per_sec),
                lowest_latency: lowest.map(|(r, _)| r.target.clone()),
                average_latency_ms: lowest.map(|(_, avg)| avg),
            }
        })
        .collect()
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render the summary with an explicit timestamp line.
pub fn render_summary(table: &ResultTable, timestamp: &str) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = writeln!(out, "Benchmark Results Summary");
    let _ = writeln!(out, "=======================");
    let _ = writeln!(out, "Timestamp: {}", timestamp);
    let _ = writeln!(out);

    for result in table.reports() {
        let _ = writeln!(out, "Results from {}:", result.file_name());
        let _ = writeln!(out, "Totals:");
        let _ = writeln!(out, "  Ops/sec: {}", result.ops_per_sec);
        let _ = writeln!(out, "  Latency:");
        for (key, value) in &result.latency {
            let _ = writeln!(out, "    {}: {}", key, value_text(value));
        }
        let _ = writeln!(out);
    }

    if table.targets().len() > 1 {
        let widths = [16, 24, 24];
        let _ = writeln!(out, "Comparison:");
        let _ = writeln!(out, "{}", format_table_separator(&widths));
        let _ = writeln!(
            out,
            "{}",
            format_table_row(&["Scenario", "Highest throughput", "Lowest avg latency"], &widths)
        );
        let _ = writeln!(out, "{}", format_table_separator(&widths));
        for winner in compare(table) {
            let throughput = match (&winner.highest_throughput, winner.ops_per_sec) {
                (Some(target), Some(ops)) => format!("{} ({})", target, format_ops_rate(ops)),
                _ => "-".to_string(),
            };
            let latency = match (&winner.lowest_latency, winner.average_latency_ms) {
                (Some(target), Some(avg)) => format!("{} ({})", target, format_latency_ms(avg)),
                _ => "-".to_string(),
            };
            let _ = writeln!(
                out,
                "{}",
                format_table_row(&[winner.scenario.as_str(), throughput.as_str(), latency.as_str()], &widths)
            );
        }
        let _ = writeln!(out, "{}", format_table_separator(&widths));
    }

    out
}

/// Render the summary, stamped with the local time.
pub fn summarize(table: &ResultTable) -> String {
    let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string();
    render_summary(table, &timestamp)
}

/// Write `summary.txt` into `dir`.
pub fn write_summary(dir: &Path, table: &ResultTable) -> std::io::Result<PathBuf> {
    let path = dir.join(SUMMARY_FILE);
    std::fs::write(&path, summarize(table))?;
    info!("Summary written to {}", path.display());
    Ok(path)
}

/// Write `comparison.json` into `dir`.
pub fn write_comparison(
    dir: &Path,
    table: &ResultTable,
    config: Option<&RunConfig>,
) -> crate::error::HarnessResult<PathBuf> {
    let report = ComparisonReport {
        metadata: ReportMetadata {
            version: crate::VERSION.to_string(),
            timestamp: chrono::Utc::now(),
            total_results: table.len(),
            system_info: SystemInfo::default(),
        },
        config: config.cloned(),
        results: table.by_source().into_iter().cloned().collect(),
        winners: compare(table),
    };

    let path = dir.join(COMPARISON_FILE);
    std::fs::write(&path, serde_json::to_string_pretty(&report)?)?;
    info!("Comparison written to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::collect;
    use tempfile::TempDir;

    fn table(files: &[(&str, &str)]) -> (TempDir, ResultTable) {
        let dir = TempDir::new().unwrap();
        for (name, body) in files {
            std::fs::write(dir.path().join(name), body).unwrap();
        }
        let table = collect(dir.path());
        (dir, table)
    }

    #[test]
    fn test_summary_blocks_in_file_order() {
        let (_dir, table) = table(&[
            ("redis_writeheavy.json", r#"{"Totals":[{"Ops/sec":800,"Latency":{"Average":1.5}}]}"#),
            ("redis_balanced.json", r#"{"Totals":[{"Ops/sec":1000}]}"#),
        ]);

        let summary = render_summary(&table, "2026-01-01 00:00:00");
        assert!(summary.starts_with(
            "Benchmark Results Summary\n=======================\nTimestamp: 2026-01-01 00:00:00\n\n"
        ));

        let balanced = summary.find("Results from redis_balanced.json:").unwrap();
        let writeheavy = summary.find("Results from redis_writeheavy.json:").unwrap();
        assert!(balanced < writeheavy);

        let ops_lines: Vec<&str> = summary
            .lines()
            .filter(|line| line.starts_with("  Ops/sec: "))
            .collect();
        assert_eq!(ops_lines, vec!["  Ops/sec: 1000", "  Ops/sec: 800"]);
        assert!(summary.contains("    Average: 1.5\n"));
        // Single target: no comparison table.
        assert!(!summary.contains("Comparison:"));
    }

    #[test]
    fn test_summary_lists_replaced_reports() {
        let (_dir, table) = table(&[
            ("redis_balanced.json", r#"{"Totals":{"Ops/sec":100}}"#),
            ("redis_balanced_rerun.json", r#"{"Totals":{"Ops/sec":200}}"#),
        ]);
        assert_eq!(table.len(), 1);

        let summary = render_summary(&table, "now");
        assert_eq!(summary.matches("Results from ").count(), 2);
        let first = summary.find("Results from redis_balanced.json:").unwrap();
        let rerun = summary.find("Results from redis_balanced_rerun.json:").unwrap();
        assert!(first < rerun);
        assert!(summary.contains("  Ops/sec: 100\n"));
        assert!(summary.contains("  Ops/sec: 200\n"));
    }

    #[test]
    fn test_empty_summary_has_header_only() {
        let summary = render_summary(&ResultTable::default(), "now");
        assert_eq!(
            summary,
            "Benchmark Results Summary\n=======================\nTimestamp: now\n\n"
        );
    }

    #[test]
    fn test_compare_picks_winners() {
        let (_dir, table) = table(&[
            ("redis_balanced.json", r#"{"Totals":{"Ops/sec":1000,"Average Latency":0.9}}"#),
            ("keydb_balanced.json", r#"{"Totals":{"Ops/sec":1500,"Average Latency":1.1}}"#),
            ("keydb_readheavy.json", r#"{"Totals":{"Ops/sec":1200}}"#),
        ]);

        let winners = compare(&table);
        assert_eq!(winners.len(), 2);
        assert_eq!(winners[0].scenario, "balanced");
        assert_eq!(winners[0].highest_throughput.as_deref(), Some("keydb"));
        assert_eq!(winners[0].lowest_latency.as_deref(), Some("redis"));
        assert_eq!(winners[1].scenario, "readheavy");
        assert_eq!(winners[1].highest_throughput.as_deref(), Some("keydb"));
        assert_eq!(winners[1].lowest_latency, None);

        let summary = render_summary(&table, "now");
        assert!(summary.contains("Comparison:"));
        assert!(summary.contains("keydb (1.50K ops/s)"));
    }

    #[test]
    fn test_write_comparison_is_ignored_by_collect() {
        let (dir, table) = table(&[("redis_balanced.json", r#"{"Totals":{"Ops/sec":10}}"#)]);

        let path = write_comparison(dir.path(), &table, None).unwrap();
        let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["metadata"]["total_results"], 1);
        assert_eq!(written["results"][0]["target"], "redis");
        assert!(written["config"].is_null());

        assert_eq!(collect(dir.path()).len(), 1);

        let summary = write_summary(dir.path(), &table).unwrap();
        assert!(summary.ends_with(SUMMARY_FILE));
    }
}
