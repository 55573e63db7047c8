use crate::error::{HarnessError, HarnessResult};
use crate::utils::{validate_port, validate_positive};
use anyhow::Result;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Redis vs KeyDB Benchmark Suite
#[derive(Parser, Debug, Clone)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Threads for the server and the load generator
    #[clap(long, default_value_t = crate::defaults::THREADS, help_heading = "Workload")]
    pub max_threads: u32,

    /// Number of clients per load generator thread (e.g. 10 50 100)
    #[clap(long, num_args = 1.., default_values_t = vec![crate::defaults::CLIENTS], help_heading = "Workload")]
    pub clients: Vec<u32>,

    /// Workloads to run (space-separated, or all)
    #[clap(long, value_enum, num_args = 1.., default_values_t = vec![Workload::Balanced], help_heading = "Workload")]
    pub workload: Vec<Workload>,

    /// Value size in bytes
    #[clap(long, default_value_t = crate::defaults::KEY_SIZE, help_heading = "Workload")]
    pub key_size: u32,

    /// Duration of each benchmark (e.g. 30s, 2m)
    #[clap(long, value_parser = parse_duration, default_value = "30s", help_heading = "Workload")]
    pub test_time: Duration,

    /// Requests per second per connection for the rate-limited workload
    #[clap(long, default_value_t = crate::defaults::RATE_LIMIT, help_heading = "Workload")]
    pub rate_limit: u32,

    /// Simulated network latency in milliseconds
    #[clap(long, default_value_t = 0, help_heading = "Workload")]
    pub simulate_latency: u32,

    /// Run servers and load generator in TLS mode
    #[clap(long, default_value_t = false, help_heading = "TLS")]
    pub tls: bool,

    /// Directory holding keydb.crt, keydb.key and ca.crt
    #[clap(long, default_value = crate::defaults::CERT_DIR, help_heading = "TLS")]
    pub cert_dir: PathBuf,

    /// Servers to benchmark, in order
    #[clap(long, value_enum, num_args = 1.., default_values_t = vec![TargetKind::Redis, TargetKind::KeyDb], help_heading = "Targets")]
    pub targets: Vec<TargetKind>,

    /// Host the servers listen on
    #[clap(long, default_value = "127.0.0.1", help_heading = "Targets")]
    pub host: String,

    /// Redis server port
    #[clap(long, default_value_t = crate::defaults::REDIS_PORT, help_heading = "Targets")]
    pub redis_port: u16,

    /// KeyDB server port
    #[clap(long, default_value_t = crate::defaults::KEYDB_PORT, help_heading = "Targets")]
    pub keydb_port: u16,

    #[clap(long, default_value = "redis-server", help_heading = "Binaries")]
    pub redis_server_bin: PathBuf,

    #[clap(long, default_value = "keydb-server", help_heading = "Binaries")]
    pub keydb_server_bin: PathBuf,

    #[clap(long, default_value = "memtier_benchmark", help_heading = "Binaries")]
    pub memtier_bin: PathBuf,

    /// CLI client used by the `cli` readiness probe
    #[clap(long, default_value = "redis-cli", help_heading = "Binaries")]
    pub cli_bin: PathBuf,

    /// Results directory (defaults to a timestamped directory)
    #[clap(long, help_heading = "Output")]
    pub results_dir: Option<PathBuf>,

    /// Pass --hdr-file-prefix to the load generator
    #[clap(long, default_value_t = false, help_heading = "Output")]
    pub hdr_histograms: bool,

    /// Only aggregate, summarize and plot an existing results directory
    #[clap(long, value_name = "DIR", help_heading = "Output")]
    pub report_only: Option<PathBuf>,

    /// Settle delay after launching a server, before probing it
    #[clap(long, value_parser = parse_duration, default_value = "1s", help_heading = "Lifecycle")]
    pub startup_grace: Duration,

    /// How a started server is checked for readiness (default: ping, or cli under TLS)
    #[clap(long, value_enum, help_heading = "Lifecycle")]
    pub readiness_probe: Option<ReadinessProbe>,

    /// Upper bound on the readiness probe retry loop
    #[clap(long, value_parser = parse_duration, default_value = "15s", help_heading = "Lifecycle")]
    pub readiness_timeout: Duration,

    /// Time allowed for graceful shutdown before a forced kill
    #[clap(long, value_parser = parse_duration, default_value = "10s", help_heading = "Lifecycle")]
    pub stop_timeout: Duration,

    /// Pause after each scenario
    #[clap(long, value_parser = parse_duration, default_value = "5s", help_heading = "Lifecycle")]
    pub cooldown: Duration,

    /// Abort the suite when the load generator fails instead of skipping the scenario
    #[clap(long, default_value_t = false, help_heading = "Lifecycle")]
    pub fail_on_benchmark_error: bool,

    /// Verbose output
    #[clap(short = 'v', long, default_value_t = false)]
    pub verbose: bool,
}

/// Workload shapes accepted on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum Workload {
    /// 1:1 SET:GET
    #[clap(name = "balanced")]
    Balanced,

    /// 3:1 SET:GET
    #[clap(name = "write-heavy")]
    WriteHeavy,

    /// 1:3 SET:GET
    #[clap(name = "read-heavy")]
    ReadHeavy,

    /// 1:1 SET:GET with a per-connection rate limit
    #[clap(name = "rate-limited")]
    RateLimited,

    /// Every workload above
    #[clap(name = "all")]
    All,
}

impl std::fmt::Display for Workload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Workload::Balanced => write!(f, "Balanced"),
            Workload::WriteHeavy => write!(f, "Write Heavy"),
            Workload::ReadHeavy => write!(f, "Read Heavy"),
            Workload::RateLimited => write!(f, "Rate Limited"),
            Workload::All => write!(f, "All Workloads"),
        }
    }
}

impl Workload {
    /// Expand the "All" variant, dropping duplicates while keeping order.
    pub fn expand_all(workloads: Vec<Workload>) -> Vec<Workload> {
        if workloads.contains(&Workload::All) {
            return vec![
                Workload::Balanced,
                Workload::WriteHeavy,
                Workload::ReadHeavy,
                Workload::RateLimited,
            ];
        }

        let mut expanded = Vec::with_capacity(workloads.len());
        for workload in workloads {
            if !expanded.contains(&workload) {
                expanded.push(workload);
            }
        }
        expanded
    }
}

/// Server implementations under comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
pub enum TargetKind {
    #[clap(name = "redis")]
    Redis,

    #[clap(name = "keydb")]
    KeyDb,
}

impl TargetKind {
    /// Lowercase name used in report file names and result tables.
    pub fn name(&self) -> &'static str {
        match self {
            TargetKind::Redis => "redis",
            TargetKind::KeyDb => "keydb",
        }
    }
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetKind::Redis => write!(f, "Redis"),
            TargetKind::KeyDb => write!(f, "KeyDB"),
        }
    }
}

/// How the process controller decides a server is accepting requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum ReadinessProbe {
    /// Send a RESP PING over plain TCP and expect +PONG
    Ping,
    /// Run `<cli-bin> -p PORT ping`, with TLS credentials when enabled
    Cli,
    /// Only require the port to accept a TCP connection
    Connect,
    /// Rely on the startup grace period alone
    None,
}

/// TLS files expected to pre-exist in the certificate directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsCredentials {
    pub cert: PathBuf,
    pub key: PathBuf,
    pub ca: PathBuf,
}

impl TlsCredentials {
    /// Resolve and verify the credential files in `cert_dir`.
    pub fn locate(cert_dir: &Path) -> HarnessResult<Self> {
        let cert = cert_dir.join(crate::defaults::TLS_CERT_FILE);
        let key = cert_dir.join(crate::defaults::TLS_KEY_FILE);
        let ca = cert_dir.join(crate::defaults::TLS_CA_FILE);

        for path in [&cert, &key, &ca] {
            if !path.exists() {
                return Err(HarnessError::MissingCredential { path: path.clone() });
            }
        }

        Ok(Self { cert, key, ca })
    }
}

/// One server to benchmark: which implementation, which binary, which port.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub kind: TargetKind,
    pub binary: PathBuf,
    pub port: u16,
}

impl TargetSpec {
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

/// Immutable parameters for one harness run.
///
/// Built once from [`Args`] and passed by reference to every component.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunConfig {
    pub threads: u32,
    pub clients: Vec<u32>,
    pub workloads: Vec<Workload>,
    pub key_size: u32,
    pub test_time: Duration,
    pub cert_dir: PathBuf,
    pub tls: Option<TlsCredentials>,
    pub simulate_latency_ms: u32,
    pub rate_limit: u32,
    pub host: String,
    pub targets: Vec<TargetSpec>,
    pub memtier_bin: PathBuf,
    pub cli_bin: PathBuf,
    pub results_dir: PathBuf,
    pub startup_grace: Duration,
    pub readiness_probe: ReadinessProbe,
    pub readiness_timeout: Duration,
    pub stop_timeout: Duration,
    pub cooldown: Duration,
    pub fail_on_benchmark_error: bool,
    pub hdr_histograms: bool,
}

impl RunConfig {
    /// Validate `args` and build the run configuration.
    ///
    /// TLS credentials are verified here so that a missing file aborts the
    /// run before any process is started.
    pub fn from_args(args: &Args) -> Result<Self> {
        validate_positive("max-threads", args.max_threads as u64)?;
        if args.clients.is_empty() {
            anyhow::bail!("At least one client count is required");
        }
        for clients in &args.clients {
            validate_positive("clients", *clients as u64)?;
        }
        validate_positive("key-size", args.key_size as u64)?;
        if args.test_time.as_secs() == 0 {
            anyhow::bail!("test-time must be at least one second");
        }
        // The load generator only takes whole seconds.
        if args.test_time.subsec_nanos() != 0 {
            anyhow::bail!(
                "test-time must be a whole number of seconds, got {:?}",
                args.test_time
            );
        }

        let mut targets = Vec::with_capacity(args.targets.len());
        for kind in &args.targets {
            if targets.iter().any(|t: &TargetSpec| t.kind == *kind) {
                continue;
            }
            let (binary, port) = match kind {
                TargetKind::Redis => (args.redis_server_bin.clone(), args.redis_port),
                TargetKind::KeyDb => (args.keydb_server_bin.clone(), args.keydb_port),
            };
            validate_port(port)?;
            targets.push(TargetSpec {
                kind: *kind,
                binary,
                port,
            });
        }

        let tls = if args.tls {
            Some(TlsCredentials::locate(&args.cert_dir)?)
        } else {
            None
        };

        let readiness_probe = args.readiness_probe.unwrap_or(if tls.is_some() {
            ReadinessProbe::Cli
        } else {
            ReadinessProbe::Ping
        });
        if readiness_probe == ReadinessProbe::Ping && tls.is_some() {
            anyhow::bail!("The ping readiness probe speaks plain TCP; use cli or connect with --tls");
        }

        let results_dir = args
            .results_dir
            .clone()
            .unwrap_or_else(crate::utils::timestamped_results_dir);

        Ok(Self {
            threads: args.max_threads,
            clients: args.clients.clone(),
            workloads: Workload::expand_all(args.workload.clone()),
            key_size: args.key_size,
            test_time: args.test_time,
            cert_dir: args.cert_dir.clone(),
            tls,
            simulate_latency_ms: args.simulate_latency,
            rate_limit: args.rate_limit,
            host: args.host.clone(),
            targets,
            memtier_bin: args.memtier_bin.clone(),
            cli_bin: args.cli_bin.clone(),
            results_dir,
            startup_grace: args.startup_grace,
            readiness_probe,
            readiness_timeout: args.readiness_timeout,
            stop_timeout: args.stop_timeout,
            cooldown: args.cooldown,
            fail_on_benchmark_error: args.fail_on_benchmark_error,
            hdr_histograms: args.hdr_histograms,
        })
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls.is_some()
    }
}

impl std::fmt::Display for RunConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let join = |values: Vec<String>| values.join(", ");

        writeln!(
            f,
            "-----------------------------------------------------------------"
        )?;
        writeln!(f, "Benchmark Configuration:")?;
        writeln!(
            f,
            "  Targets:            {}",
            join(
                self.targets
                    .iter()
                    .map(|t| format!("{} (port {})", t.kind, t.port))
                    .collect()
            )
        )?;
        writeln!(
            f,
            "  Workloads:          {}",
            join(self.workloads.iter().map(|w| w.to_string()).collect())
        )?;
        writeln!(
            f,
            "  Clients:            {}",
            join(self.clients.iter().map(|c| c.to_string()).collect())
        )?;
        writeln!(f, "  Threads:            {}", self.threads)?;
        writeln!(f, "  Data Size:          {} bytes", self.key_size)?;
        writeln!(f, "  Test Time:          {:?}", self.test_time)?;
        if self.workloads.contains(&Workload::RateLimited) {
            writeln!(f, "  Rate Limit:         {} req/s per connection", self.rate_limit)?;
        }
        if self.simulate_latency_ms > 0 {
            writeln!(f, "  Simulated Latency:  {} ms", self.simulate_latency_ms)?;
        }
        let tls = if self.tls_enabled() {
            format!("Enabled ({})", self.cert_dir.display())
        } else {
            "Disabled".to_string()
        };
        writeln!(f, "  TLS:                {}", tls)?;
        writeln!(f, "  Readiness Probe:    {:?}", self.readiness_probe)?;
        writeln!(f, "  Results Directory:  {}", self.results_dir.display())?;
        write!(
            f,
            "-----------------------------------------------------------------"
        )
    }
}

/// Parse duration from string (e.g., "10s", "5m", "1h")
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s") // Default to seconds
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;
    if num < 0.0 {
        return Err(format!("Duration cannot be negative: {}", s));
    }

    let seconds = match unit {
        "ms" => num / 1000.0,
        "s" => num,
        "m" => num * 60.0,
        "h" => num * 3600.0,
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };

    Duration::try_from_secs_f64(seconds).map_err(|e| format!("Invalid duration {}: {}", s, e))
}
