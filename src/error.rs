//! Error taxonomy for the harness.
//!
//! Two categories of failure exist. Environment failures (missing TLS
//! credentials, a port that cannot be freed) invalidate every later
//! measurement and abort the run. Everything else is scoped to a single
//! target, scenario or report file and is logged while the run continues.

use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

/// Errors raised by the harness components.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The operating system refused to launch a server process.
    #[error("failed to start {target}: {source}")]
    Startup {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// The server launched but never answered the readiness probe.
    #[error("{target} did not become ready on port {port} after {attempts} probe(s): {reason}")]
    Readiness {
        target: String,
        port: u16,
        attempts: u32,
        reason: String,
    },

    /// The load generator could not be spawned or exited unsuccessfully.
    #[error("load generator failed for {target}/{scenario}: {reason}")]
    BenchmarkInvocation {
        target: String,
        scenario: String,
        reason: String,
        status: Option<ExitStatus>,
    },

    /// A report file is not valid JSON or has no usable name.
    #[error("malformed report {}: {reason}", path.display())]
    MalformedReport { path: PathBuf, reason: String },

    /// A port stayed bound after teardown.
    #[error("port {port} is still bound after teardown (holders: {holders:?})")]
    PortReclaim { port: u16, holders: Vec<i32> },

    /// A TLS credential file required at startup is absent.
    #[error("missing TLS credential: {}", path.display())]
    MissingCredential { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl HarnessError {
    /// Whether this error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HarnessError::PortReclaim { .. } | HarnessError::MissingCredential { .. }
        )
    }
}

pub type HarnessResult<T> = std::result::Result<T, HarnessError>;
