//! # Process Controller
//!
//! Starts a server under test as a child process, confirms it is accepting
//! requests, and tears it down again with a bounded escalation:
//!
//! 1. **Start**: spawn the structured command line (no shell), then wait the
//!    settle delay
//! 2. **Readiness**: probe the port with exponential backoff until the
//!    readiness timeout
//! 3. **Stop**: SIGTERM, wait up to the stop timeout, SIGKILL on expiry
//! 4. **Reclaim**: verify the port is free and kill any leftover listener
//!
//! A [`ServerHandle`] is consumed by [`ServerHandle::stop`] and kills its child
//! when dropped, so at most one server per target is ever alive.

use crate::cli::{ReadinessProbe, RunConfig, TargetKind, TargetSpec, TlsCredentials};
use crate::error::{HarnessError, HarnessResult};
use crate::port;
use crate::utils::format_duration;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// First readiness backoff step; doubles after each failed probe.
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(1);
/// Upper bound on a single probe attempt.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// A server command line built from the run configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub port: u16,
}

impl ServerCommand {
    /// Build the command line for `target`.
    ///
    /// Plain mode listens on `--port`; TLS mode listens on `--tls-port` and
    /// disables the plain port. Thread flags differ per implementation: Redis
    /// uses I/O threads, KeyDB uses pinned server threads.
    pub fn for_target(target: &TargetSpec, config: &RunConfig) -> Self {
        let mut args = Vec::new();
        let port = target.port.to_string();

        match &config.tls {
            Some(tls) => {
                args.extend(["--tls-port".to_string(), port, "--port".to_string(), "0".to_string()]);
                args.push("--tls-cert-file".to_string());
                args.push(tls.cert.display().to_string());
                args.push("--tls-key-file".to_string());
                args.push(tls.key.display().to_string());
                args.push("--tls-ca-cert-file".to_string());
                args.push(tls.ca.display().to_string());
            }
            None => {
                args.extend(["--port".to_string(), port]);
            }
        }

        let threads = config.threads.to_string();
        match target.kind {
            TargetKind::Redis => {
                args.extend(["--io-threads".to_string(), threads]);
            }
            TargetKind::KeyDb => {
                args.extend([
                    "--server-thread-affinity".to_string(),
                    "true".to_string(),
                    "--server-threads".to_string(),
                    threads,
                ]);
            }
        }
        args.extend(["--protected-mode".to_string(), "no".to_string()]);

        Self {
            program: target.binary.clone(),
            args,
            port: target.port,
        }
    }
}

impl std::fmt::Display for ServerCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Everything the readiness loop needs to probe a server.
#[derive(Clone, Debug)]
pub struct ReadinessCheck {
    pub probe: ReadinessProbe,
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
    pub cli_bin: PathBuf,
    pub tls: Option<TlsCredentials>,
}

impl ReadinessCheck {
    pub fn for_target(target: &TargetSpec, config: &RunConfig) -> Self {
        Self {
            probe: config.readiness_probe,
            host: config.host.clone(),
            port: target.port,
            timeout: config.readiness_timeout,
            cli_bin: config.cli_bin.clone(),
            tls: config.tls.clone(),
        }
    }

    /// Run one probe. `Err` carries the reason the server is not ready yet.
    async fn probe_once(&self) -> Result<(), String> {
        match self.probe {
            ReadinessProbe::None => Ok(()),
            ReadinessProbe::Connect => {
                connect(&self.host, self.port).await?;
                Ok(())
            }
            ReadinessProbe::Ping => resp_ping(&self.host, self.port).await,
            ReadinessProbe::Cli => self.cli_ping().await,
        }
    }

    async fn cli_ping(&self) -> Result<(), String> {
        let mut cmd = Command::new(&self.cli_bin);
        cmd.kill_on_drop(true)
            .stdin(Stdio::null())
            .arg("-h")
            .arg(&self.host)
            .arg("-p")
            .arg(self.port.to_string());
        if let Some(tls) = &self.tls {
            cmd.arg("--tls")
                .arg("--cert")
                .arg(&tls.cert)
                .arg("--key")
                .arg(&tls.key)
                .arg("--cacert")
                .arg(&tls.ca);
        }
        cmd.arg("ping");

        let output = timeout(PROBE_TIMEOUT, cmd.output())
            .await
            .map_err(|_| "cli probe timed out".to_string())?
            .map_err(|e| format!("failed to run {}: {}", self.cli_bin.display(), e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if output.status.success() && stdout.contains("PONG") {
            Ok(())
        } else {
            Err(format!(
                "cli probe answered {:?} ({})",
                stdout.trim(),
                output.status
            ))
        }
    }
}

async fn connect(host: &str, port: u16) -> Result<TcpStream, String> {
    timeout(PROBE_TIMEOUT, TcpStream::connect((host, port)))
        .await
        .map_err(|_| "connect timed out".to_string())?
        .map_err(|e| format!("connect failed: {}", e))
}

/// Send a RESP `PING` and accept `+PONG`.
///
/// `-NOAUTH` also counts as ready: the server is up, it only wants a password.
async fn resp_ping(host: &str, port: u16) -> Result<(), String> {
    let mut stream = connect(host, port).await?;
    stream
        .write_all(b"*1\r\n$4\r\nPING\r\n")
        .await
        .map_err(|e| format!("write failed: {}", e))?;

    let mut buf = [0u8; 64];
    let n = timeout(PROBE_TIMEOUT, stream.read(&mut buf))
        .await
        .map_err(|_| "no reply to PING".to_string())?
        .map_err(|e| format!("read failed: {}", e))?;

    let reply = String::from_utf8_lossy(&buf[..n]);
    if reply.starts_with("+PONG") || reply.starts_with("-NOAUTH") {
        Ok(())
    } else {
        Err(format!("unexpected reply {:?}", reply.trim_end()))
    }
}

/// One running server under test.
pub struct ServerHandle {
    name: String,
    port: u16,
    child: Child,
}

impl ServerHandle {
    /// Launch `command` and wait `settle` before returning.
    ///
    /// Server output goes to `log_path` when given, otherwise it is
    /// discarded. Spawn failures are [`HarnessError::Startup`].
    pub async fn start(
        command: &ServerCommand,
        name: &str,
        settle: Duration,
        log_path: Option<&Path>,
    ) -> HarnessResult<Self> {
        info!("Starting {}...", name);
        debug!("Server command: {}", command);

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args).kill_on_drop(true).stdin(Stdio::null());
        configure_stdio(&mut cmd, log_path).map_err(|source| HarnessError::Startup {
            target: name.to_string(),
            source,
        })?;

        let child = cmd.spawn().map_err(|source| HarnessError::Startup {
            target: name.to_string(),
            source,
        })?;
        debug!("{} started with PID {:?}", name, child.id());

        if !settle.is_zero() {
            sleep(settle).await;
        }

        Ok(Self {
            name: name.to_string(),
            port: command.port,
            child,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Probe until the server answers or `check.timeout` expires.
    ///
    /// Returns the number of probes used. A server that exits while being
    /// probed fails immediately.
    pub async fn wait_ready(&mut self, check: &ReadinessCheck) -> HarnessResult<u32> {
        let deadline = Instant::now() + check.timeout;
        let mut backoff = INITIAL_BACKOFF;
        let mut attempts = 0;

        loop {
            if let Some(status) = self.exit_status() {
                return Err(self.not_ready(attempts, format!("process exited ({})", status)));
            }

            attempts += 1;
            let reason = match check.probe_once().await {
                Ok(()) => {
                    info!(
                        "{} is responding on port {} ({} probe(s))",
                        self.name, self.port, attempts
                    );
                    return Ok(attempts);
                }
                Err(reason) => reason,
            };
            debug!("{} not ready yet: {}", self.name, reason);

            let now = Instant::now();
            if now >= deadline {
                return Err(self.not_ready(attempts, reason));
            }
            sleep(backoff.min(deadline - now)).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    fn exit_status(&mut self) -> Option<ExitStatus> {
        match self.child.try_wait() {
            Ok(status) => status,
            Err(e) => {
                warn!("Failed to poll {}: {}", self.name, e);
                None
            }
        }
    }

    fn not_ready(&self, attempts: u32, reason: String) -> HarnessError {
        HarnessError::Readiness {
            target: self.name.clone(),
            port: self.port,
            attempts,
            reason,
        }
    }

    /// Stop the server and reclaim its port.
    ///
    /// Only a port that cannot be freed is an error; shutdown problems are
    /// logged since the reclaim step covers them.
    pub async fn stop(mut self, host: &str, grace: Duration) -> HarnessResult<()> {
        info!("Stopping {}...", self.name);
        self.terminate(grace).await;
        port::reclaim_port(host, self.port).await
    }

    async fn terminate(&mut self, grace: Duration) {
        if let Some(status) = self.exit_status() {
            warn!("{} had already exited ({})", self.name, status);
            return;
        }

        if let Some(pid) = self.child.id() {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!("Failed to send SIGTERM to {}: {}", self.name, e);
            }
        }

        match timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => info!("{} exited ({})", self.name, status),
            Ok(Err(e)) => error!("Error stopping {}: {}", self.name, e),
            Err(_) => {
                warn!(
                    "{} did not exit within {}; forcing kill",
                    self.name,
                    format_duration(grace)
                );
                if let Err(e) = self.child.kill().await {
                    error!("Failed to kill {}: {}", self.name, e);
                }
            }
        }
    }
}

fn configure_stdio(cmd: &mut Command, log_path: Option<&Path>) -> std::io::Result<()> {
    match log_path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let file_err = file.try_clone()?;
            cmd.stdout(Stdio::from(file));
            cmd.stderr(Stdio::from(file_err));
        }
        None => {
            cmd.stdout(Stdio::null());
            cmd.stderr(Stdio::null());
        }
    }
    Ok(())
}
