//! # Redis vs KeyDB Benchmark Suite Library
//!
//! Drives comparative load tests of Redis and KeyDB servers on one host. The
//! harness launches each server in turn, drives it with `memtier_benchmark`
//! under a set of workload scenarios, and turns the resulting JSON reports
//! into a text summary, a JSON comparison and SVG charts.
//!
//! ## Architecture Overview
//!
//! - `cli`: command-line parsing and the immutable [`RunConfig`]
//! - `scenario`: workload shapes (SET:GET ratio, rate limit, client count)
//! - `server`: process controller (start, readiness probe, stop)
//! - `port`: port inspection and reclamation after teardown
//! - `benchmark`: load generator invocation
//! - `results`: report parsing and the [`ResultTable`]
//! - `report`: `summary.txt` and `comparison.json`
//! - `plot`: SVG charts
//! - `suite`: orchestration and failure policy
//!
//! Only one server process is alive at any time, and its port is verified
//! free before the next target starts.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use clap::Parser;
//! use kv_benchmark::{Args, BenchmarkSuite, RunConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = Args::parse_from(["kv-benchmark", "--workload", "all", "--clients", "10", "50"]);
//!     let config = RunConfig::from_args(&args)?;
//!
//!     let outcome = BenchmarkSuite::new(config).run().await?;
//!     for result in outcome.table.iter() {
//!         println!("{} {}: {:.0} ops/s", result.target, result.scenario, result.ops_per_sec);
//!     }
//!     Ok(())
//! }
//! ```

/// Load generator invocation
///
/// Builds the `memtier_benchmark` command line for a scenario and runs it to
/// completion against a live server.
pub mod benchmark;

/// Command-line interface and configuration
///
/// Provides argument parsing using clap and converts user-friendly CLI options
/// into the run configuration. Includes:
/// - Duration parsing with human-readable formats (e.g., "30s", "2m")
/// - Workload selection with "all" expansion
/// - TLS credential verification before any process starts
pub mod cli;

pub mod error;
pub mod logging;

/// SVG charts rendered with plotters
pub mod plot;

pub mod port;

/// Summary and comparison output
pub mod report;

/// Report parsing and aggregation
///
/// Normalizes the supported report layouts and builds the result table keyed
/// by target and scenario.
pub mod results;

pub mod scenario;

/// Server process lifecycle
///
/// Starting, readiness probing and bounded shutdown of the servers under
/// test.
pub mod server;

pub mod suite;
pub mod utils;

pub use cli::{Args, RunConfig, TargetKind, Workload};
pub use error::{HarnessError, HarnessResult};
pub use results::{BenchmarkResult, ResultTable};
pub use scenario::Scenario;
pub use server::{ServerCommand, ServerHandle};
pub use suite::{BenchmarkSuite, SuiteOutcome};

/// The current version of the benchmark suite
///
/// Recorded in `comparison.json` for reproducibility.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    /// Server threads and load generator threads
    pub const THREADS: u32 = 4;

    /// Clients per load generator thread
    pub const CLIENTS: u32 = 50;

    /// Value size in bytes
    pub const KEY_SIZE: u32 = 32;

    /// Requests per second per connection in the rate-limited workload
    pub const RATE_LIMIT: u32 = 10_000;

    pub const REDIS_PORT: u16 = 6379;
    pub const KEYDB_PORT: u16 = 6389;

    /// Where the KeyDB source tree keeps its test certificates
    pub const CERT_DIR: &str = "./KeyDB/tests/tls";

    pub const TLS_CERT_FILE: &str = "keydb.crt";
    pub const TLS_KEY_FILE: &str = "keydb.key";
    pub const TLS_CA_FILE: &str = "ca.crt";
}
