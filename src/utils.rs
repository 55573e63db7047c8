//! # Utility Functions and Helper Module
//!
//! Small helpers shared by the harness components: human-readable formatting
//! for durations, throughput and latency, command-line parameter validation,
//! results directory naming, and plain-text table rendering for the summary.
//!
//! ## Usage Examples
//!
//! ```rust
//! use kv_benchmark::utils::*;
//! use std::time::Duration;
//!
//! # fn main() -> anyhow::Result<()> {
//! assert_eq!(format_duration(Duration::from_micros(1500)), "1.50ms");
//! assert_eq!(format_ops_rate(125_000.0), "125.00K ops/s");
//!
//! validate_port(6379)?;
//! # Ok(())
//! # }
//! ```

use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;

/// Format a duration in a human-readable way
///
/// Selects the unit from the magnitude of the value:
///
/// - **Nanoseconds**: < 1,000 ns (e.g., "500ns")
/// - **Microseconds**: < 1,000,000 ns (e.g., "1.50μs")
/// - **Milliseconds**: < 1,000,000,000 ns (e.g., "25.75ms")
/// - **Seconds**: < 60 seconds (e.g., "5.25s")
/// - **Minutes and Hours**: For longer durations (e.g., "5m 30s", "2h 15m 30s")
///
/// ## Examples
///
/// ```rust
/// # use kv_benchmark::utils::format_duration;
/// # use std::time::Duration;
/// assert_eq!(format_duration(Duration::from_nanos(750)), "750ns");
/// assert_eq!(format_duration(Duration::from_micros(2500)), "2.50ms");
/// assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let total_ns = duration.as_nanos();

    if total_ns < 1_000 {
        format!("{}ns", total_ns)
    } else if total_ns < 1_000_000 {
        format!("{:.2}μs", total_ns as f64 / 1_000.0)
    } else if total_ns < 1_000_000_000 {
        format!("{:.2}ms", total_ns as f64 / 1_000_000.0)
    } else if total_ns < 60_000_000_000 {
        format!("{:.2}s", total_ns as f64 / 1_000_000_000.0)
    } else {
        let seconds = duration.as_secs();
        let minutes = seconds / 60;
        let remaining_seconds = seconds % 60;

        if minutes < 60 {
            format!("{}m {}s", minutes, remaining_seconds)
        } else {
            let hours = minutes / 60;
            let remaining_minutes = minutes % 60;
            format!("{}h {}m {}s", hours, remaining_minutes, remaining_seconds)
        }
    }
}

/// Format an operations-per-second figure
///
/// Uses K and M suffixes above one thousand and one million operations.
///
/// ```rust
/// # use kv_benchmark::utils::format_ops_rate;
/// assert_eq!(format_ops_rate(500.0), "500 ops/s");
/// assert_eq!(format_ops_rate(1500.0), "1.50K ops/s");
/// assert_eq!(format_ops_rate(2_250_000.0), "2.25M ops/s");
/// ```
pub fn format_ops_rate(ops_per_second: f64) -> String {
    if ops_per_second < 1_000.0 {
        format!("{:.0} ops/s", ops_per_second)
    } else if ops_per_second < 1_000_000.0 {
        format!("{:.2}K ops/s", ops_per_second / 1_000.0)
    } else {
        format!("{:.2}M ops/s", ops_per_second / 1_000_000.0)
    }
}

/// Format a latency reported in milliseconds by the load generator.
pub fn format_latency_ms(latency_ms: f64) -> String {
    format_duration(Duration::from_secs_f64(latency_ms.max(0.0) / 1_000.0))
}

/// Validate that a port number is suitable for a server under test
///
/// Privileged ports (below 1024) are rejected: the harness starts servers as
/// the invoking user.
pub fn validate_port(port: u16) -> Result<()> {
    if port < 1024 {
        anyhow::bail!("Port number {} is too low (below 1024)", port);
    }
    Ok(())
}

/// Validate that a numeric command-line parameter is non-zero.
pub fn validate_positive(name: &str, value: u64) -> Result<()> {
    if value == 0 {
        anyhow::bail!("{} must be greater than 0", name);
    }
    Ok(())
}

/// Default results directory, named after the local start time
/// (`benchmark_results_YYYYmmdd_HHMMSS`).
pub fn timestamped_results_dir() -> PathBuf {
    PathBuf::from(format!(
        "benchmark_results_{}",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    ))
}

/// Render a table row
///
/// Columns are left-aligned within their widths and separated by pipes. A
/// missing width falls back to 10 characters.
///
/// ```rust
/// # use kv_benchmark::utils::{format_table_row, format_table_separator};
/// let widths = [8, 6];
/// assert_eq!(format_table_separator(&widths), "+----------+--------+");
/// assert_eq!(format_table_row(&["redis", "1.2K"], &widths), "| redis    | 1.2K   |");
/// ```
pub fn format_table_row(columns: &[&str], widths: &[usize]) -> String {
    let mut row = String::from("|");
    for (i, column) in columns.iter().enumerate() {
        let width = widths.get(i).copied().unwrap_or(10);
        row.push_str(&format!(" {:width$} |", column, width = width));
    }
    row
}

/// Render a horizontal table separator matching [`format_table_row`].
pub fn format_table_separator(widths: &[usize]) -> String {
    let mut line = String::from("+");
    for &width in widths {
        line.push_str(&"-".repeat(width + 2));
        line.push('+');
    }
    line
}

/// Create a progress bar-like indicator
///
/// Used in suite progress logs. Zero total renders as complete; progress is
/// capped at 100%.
///
/// ```rust
/// # use kv_benchmark::utils::create_progress_indicator;
/// assert_eq!(create_progress_indicator(0, 4, 8), "░░░░░░░░");
/// assert_eq!(create_progress_indicator(2, 4, 8), "████░░░░");
/// assert_eq!(create_progress_indicator(4, 4, 8), "████████");
/// ```
pub fn create_progress_indicator(current: usize, total: usize, width: usize) -> String {
    if total == 0 {
        return "█".repeat(width);
    }

    let progress = (current as f64 / total as f64).min(1.0);
    let filled = ((progress * width as f64) as usize).min(width);
    let empty = width - filled;

    format!("{}{}", "█".repeat(filled), "░".repeat(empty))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_nanos(500)), "500ns");
        assert_eq!(format_duration(Duration::from_nanos(1500)), "1.50μs");
        assert_eq!(format_duration(Duration::from_micros(1500)), "1.50ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }

    #[test]
    fn test_format_ops_rate() {
        assert_eq!(format_ops_rate(0.0), "0 ops/s");
        assert_eq!(format_ops_rate(999.0), "999 ops/s");
        assert_eq!(format_ops_rate(125_000.0), "125.00K ops/s");
        assert_eq!(format_ops_rate(1_500_000.0), "1.50M ops/s");
    }

    #[test]
    fn test_format_latency_ms() {
        assert_eq!(format_latency_ms(1.5), "1.50ms");
        assert_eq!(format_latency_ms(0.25), "250.00μs");
        assert_eq!(format_latency_ms(-1.0), "0ns");
    }

    #[test]
    fn test_validate_port() {
        assert!(validate_port(1024).is_ok());
        assert!(validate_port(6379).is_ok());
        assert!(validate_port(65535).is_ok());
        assert!(validate_port(1023).is_err());
        assert!(validate_port(0).is_err());
    }

    #[test]
    fn test_validate_positive() {
        assert!(validate_positive("clients", 1).is_ok());
        let err = validate_positive("clients", 0).unwrap_err();
        assert_eq!(err.to_string(), "clients must be greater than 0");
    }

    #[test]
    fn test_timestamped_results_dir() {
        let dir = timestamped_results_dir();
        let name = dir.to_str().unwrap();
        assert!(name.starts_with("benchmark_results_"));
        // benchmark_results_ + YYYYmmdd_HHMMSS
        assert_eq!(name.len(), "benchmark_results_".len() + 15);
    }

    #[test]
    fn test_table_formatting() {
        let widths = [6, 4];
        assert_eq!(format_table_separator(&widths), "+--------+------+");
        assert_eq!(format_table_row(&["keydb", "9"], &widths), "| keydb  | 9    |");
        assert_eq!(format_table_row(&["a", "b", "c"], &widths), "| a      | b    | c          |");
    }
}
