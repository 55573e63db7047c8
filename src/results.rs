//! # Result Aggregator
//!
//! Reads the load generator's JSON reports from a results directory into a
//! [`ResultTable`] keyed by target and scenario.
//!
//! Three report shapes are accepted and normalized when parsed:
//!
//! - `{"ALL STATS": {"Totals": {...}}}`, the generator's native layout
//! - `{"Totals": {...}}`
//! - `{"Totals": [{...}, ...]}`, where the first element is used
//!
//! Aggregation never fails as a whole. Unreadable or unnamed files are logged
//! and skipped.

use crate::error::{HarnessError, HarnessResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name of the comparison written back into the results directory.
/// It is JSON too, so the aggregator skips it.
pub const COMPARISON_FILE: &str = "comparison.json";

/// A single latency percentile, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentileValue {
    pub percentile: f64,
    pub value_ms: f64,
}

/// Normalized metrics from one report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub target: String,
    pub scenario: String,
    pub ops_per_sec: f64,
    pub average_latency_ms: Option<f64>,
    pub max_latency_ms: Option<f64>,
    /// Sorted by percentile.
    pub percentiles: Vec<PercentileValue>,
    /// Latency mapping as the report carried it, for the text summary.
    pub latency: BTreeMap<String, Value>,
    pub source: PathBuf,
}

impl BenchmarkResult {
    /// Latency at `percentile`, matched to within 0.01.
    pub fn percentile(&self, percentile: f64) -> Option<f64> {
        self.percentiles
            .iter()
            .find(|p| (p.percentile - percentile).abs() < 0.01)
            .map(|p| p.value_ms)
    }

    /// Zero throughput and no percentiles.
    pub fn is_empty(&self) -> bool {
        self.ops_per_sec == 0.0 && self.percentiles.is_empty()
    }

    /// Name of the report file this result came from.
    pub fn file_name(&self) -> String {
        self.source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReportFormat {
    Memtier {
        #[serde(rename = "ALL STATS")]
        all_stats: TotalsSection,
    },
    Flat(TotalsSection),
}

#[derive(Debug, Deserialize)]
struct TotalsSection {
    #[serde(rename = "Totals")]
    totals: TotalsShape,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TotalsShape {
    List(Vec<RawTotals>),
    Single(RawTotals),
}

#[derive(Debug, Default, Deserialize)]
struct RawTotals {
    #[serde(rename = "Ops/sec")]
    ops_per_sec: Option<Value>,
    #[serde(rename = "Average Latency")]
    average_latency: Option<Value>,
    #[serde(rename = "Max Latency")]
    max_latency: Option<Value>,
    #[serde(rename = "Latency")]
    latency: Option<LatencyField>,
    #[serde(rename = "Percentile Latencies")]
    percentile_latencies: Option<BTreeMap<String, Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LatencyField {
    Scalar(f64),
    Table(BTreeMap<String, Value>),
}

impl ReportFormat {
    fn into_totals(self) -> RawTotals {
        let section = match self {
            ReportFormat::Memtier { all_stats } => all_stats,
            ReportFormat::Flat(section) => section,
        };
        match section.totals {
            TotalsShape::List(list) => list.into_iter().next().unwrap_or_default(),
            TotalsShape::Single(totals) => totals,
        }
    }
}

/// Numbers, and numbers written as strings, are accepted.
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// `"p99.90"`, `"99.9"` and `"99"` all name a percentile.
fn percentile_key(key: &str) -> Option<f64> {
    key.trim()
        .trim_start_matches(['p', 'P'])
        .parse::<f64>()
        .ok()
        .filter(|p| (0.0..=100.0).contains(p))
}

fn collect_percentiles(map: &BTreeMap<String, Value>, into: &mut Vec<PercentileValue>) {
    for (key, value) in map {
        if let (Some(percentile), Some(value_ms)) = (percentile_key(key), number(value)) {
            if !into.iter().any(|p| (p.percentile - percentile).abs() < f64::EPSILON) {
                into.push(PercentileValue { percentile, value_ms });
            }
        }
    }
}

/// Recover `(target, scenario)` from `<target>_<scenario>[_...].json`.
pub fn labels_from_file_name(path: &Path) -> Option<(String, String)> {
    let stem = path.file_stem()?.to_str()?;
    let mut tokens = stem.split('_');
    let target = tokens.next().filter(|t| !t.is_empty())?;
    let scenario = tokens.next().filter(|s| !s.is_empty())?;
    Some((target.to_string(), scenario.to_string()))
}

/// Parse one report file.
pub fn parse_report(path: &Path) -> HarnessResult<BenchmarkResult> {
    let malformed = |reason: String| HarnessError::MalformedReport {
        path: path.to_path_buf(),
        reason,
    };

    let (target, scenario) = labels_from_file_name(path)
        .ok_or_else(|| malformed("file name is not <target>_<scenario>.json".to_string()))?;

    let contents = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&contents).map_err(|e| malformed(e.to_string()))?;

    let totals = match ReportFormat::deserialize(&value) {
        Ok(format) => format.into_totals(),
        Err(e) => {
            warn!(
                "{} has no recognizable Totals section ({}); using empty metrics",
                path.display(),
                e
            );
            RawTotals::default()
        }
    };

    let mut percentiles = Vec::new();
    let mut average_latency_ms = totals.average_latency.as_ref().and_then(number);
    let mut latency = BTreeMap::new();

    match totals.latency {
        Some(LatencyField::Scalar(avg)) => {
            average_latency_ms = average_latency_ms.or(Some(avg));
            latency.insert("Average".to_string(), Value::from(avg));
        }
        Some(LatencyField::Table(table)) => {
            if let Some(Value::Object(inner)) = table.get("Percentiles") {
                let inner: BTreeMap<String, Value> =
                    inner.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                collect_percentiles(&inner, &mut percentiles);
            }
            if average_latency_ms.is_none() {
                average_latency_ms = table.get("Average").and_then(number);
            }
            latency = table;
        }
        None => {}
    }

    if let Some(map) = &totals.percentile_latencies {
        collect_percentiles(map, &mut percentiles);
        if latency.is_empty() {
            latency = map.clone();
        }
    }
    percentiles.sort_by(|a, b| a.percentile.total_cmp(&b.percentile));

    let result = BenchmarkResult {
        target,
        scenario,
        ops_per_sec: totals.ops_per_sec.as_ref().and_then(number).unwrap_or(0.0),
        average_latency_ms,
        max_latency_ms: totals.max_latency.as_ref().and_then(number),
        percentiles,
        latency,
        source: path.to_path_buf(),
    };
    if result.is_empty() {
        warn!(
            "{} reports no throughput and no latency percentiles",
            path.display()
        );
    }

    Ok(result)
}

/// Report files in `dir`, sorted by file name.
pub fn report_files(dir: &Path) -> HarnessResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_json = path.extension().map_or(false, |ext| ext == "json");
        let reserved = path
            .file_name()
            .map_or(false, |name| name == COMPARISON_FILE);
        if path.is_file() && is_json && !reserved {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Every well-formed report in `dir`.
///
/// A missing directory yields an empty table with a warning. For two files
/// mapping to the same target and scenario, the later file name wins.
pub fn collect(dir: &Path) -> ResultTable {
    let mut table = ResultTable::default();

    if !dir.is_dir() {
        warn!("Results directory {} does not exist", dir.display());
        return table;
    }

    let files = match report_files(dir) {
        Ok(files) => files,
        Err(e) => {
            warn!("Failed to list {}: {}", dir.display(), e);
            return table;
        }
    };

    for path in files {
        match parse_report(&path) {
            Ok(result) => {
                debug!(
                    "Loaded {} / {} from {}",
                    result.target,
                    result.scenario,
                    path.display()
                );
                if let Some(previous) = table.insert(result) {
                    warn!(
                        "{} / {} from {} replaced by {}",
                        previous.target,
                        previous.scenario,
                        previous.source.display(),
                        path.display()
                    );
                }
            }
            Err(e) => warn!("Skipping report: {}", e),
        }
    }

    table
}

/// `target -> scenario -> result`.
///
/// Every inserted report is also kept in insertion order, including those
/// later replaced in the table, so the summary can show each file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    results: BTreeMap<String, BTreeMap<String, BenchmarkResult>>,
    #[serde(skip)]
    reports: Vec<BenchmarkResult>,
}

impl ResultTable {
    /// Insert `result`, returning the one it replaces.
    pub fn insert(&mut self, result: BenchmarkResult) -> Option<BenchmarkResult> {
        self.reports.push(result.clone());
        self.results
            .entry(result.target.clone())
            .or_default()
            .insert(result.scenario.clone(), result)
    }

    pub fn get(&self, target: &str, scenario: &str) -> Option<&BenchmarkResult> {
        self.results.get(target)?.get(scenario)
    }

    pub fn targets(&self) -> Vec<&str> {
        self.results.keys().map(String::as_str).collect()
    }

    /// Every scenario seen for any target, sorted and de-duplicated.
    pub fn scenarios(&self) -> Vec<&str> {
        let mut scenarios: Vec<&str> = self
            .results
            .values()
            .flat_map(|by_scenario| by_scenario.keys().map(String::as_str))
            .collect();
        scenarios.sort_unstable();
        scenarios.dedup();
        scenarios
    }

    /// Results in target, then scenario order.
    pub fn iter(&self) -> impl Iterator<Item = &BenchmarkResult> {
        self.results.values().flat_map(|by_scenario| by_scenario.values())
    }

    /// Every inserted report ordered by file name, replaced ones included.
    pub fn reports(&self) -> Vec<&BenchmarkResult> {
        let mut reports: Vec<_> = self.reports.iter().collect();
        reports.sort_by_key(|result| result.file_name());
        reports
    }

    /// Table results ordered by report file name.
    pub fn by_source(&self) -> Vec<&BenchmarkResult> {
        let mut results: Vec<_> = self.iter().collect();
        results.sort_by_key(|result| result.file_name());
        results
    }

    pub fn len(&self) -> usize {
        self.results.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-scenario results of `target`.
///
/// Panics if the table has no results for `target`; use
/// [`ResultTable::get`] when unsure.
impl std::ops::Index<&str> for ResultTable {
    type Output = BTreeMap<String, BenchmarkResult>;

    fn index(&self, target: &str) -> &Self::Output {
        &self.results[target]
    }
}
