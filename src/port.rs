//! Port ownership checks and reclamation.
//!
//! Only one server may hold the benchmark port at a time. After a server is
//! stopped the port is probed, and any process still listening on it is
//! killed. A port that survives every reclaim round is a fatal
//! [`HarnessError::PortReclaim`]: a stale listener would answer the next
//! target's load and corrupt its measurements.

use crate::error::{HarnessError, HarnessResult};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Reclaim rounds before giving up on a port.
pub const RECLAIM_ATTEMPTS: u32 = 5;

/// Pause between reclaim rounds.
pub const RECLAIM_INTERVAL: Duration = Duration::from_millis(200);

const CONNECT_PROBE_TIMEOUT: Duration = Duration::from_millis(200);

/// Whether anything is listening on `port`.
///
/// Combines a bind probe (a listener anywhere on the port makes the bind fail
/// with `AddrInUse`) with a connection probe against `host`.
pub fn port_in_use(host: &str, port: u16) -> bool {
    bind_probe(port) || connect_probe(host, port)
}

fn bind_probe(port: u16) -> bool {
    let socket = match Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)) {
        Ok(socket) => socket,
        Err(e) => {
            debug!("Bind probe socket creation failed: {}", e);
            return false;
        }
    };
    // TIME_WAIT leftovers from the previous run must not count as bound.
    if let Err(e) = socket.set_reuse_address(true) {
        debug!("Failed to set SO_REUSEADDR on probe socket: {}", e);
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    match socket.bind(&addr.into()) {
        Ok(()) => false,
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => true,
        Err(e) => {
            debug!("Bind probe on port {} failed: {}", port, e);
            false
        }
    }
}

fn connect_probe(host: &str, port: u16) -> bool {
    let addrs = match (host, port).to_socket_addrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            debug!("Could not resolve {}:{}: {}", host, port, e);
            return false;
        }
    };

    addrs
        .into_iter()
        .any(|addr| TcpStream::connect_timeout(&addr, CONNECT_PROBE_TIMEOUT).is_ok())
}

/// PIDs of processes holding a listening TCP socket on `port`.
///
/// Matches the socket inodes from `/proc/net/tcp` and `/proc/net/tcp6`
/// against every process's open file descriptors. Processes we may not
/// inspect are skipped.
#[cfg(target_os = "linux")]
pub fn listening_pids(port: u16) -> Vec<i32> {
    use procfs::net::TcpState;
    use procfs::process::FDTarget;
    use std::collections::HashSet;

    let mut inodes = HashSet::new();
    for table in [procfs::net::tcp(), procfs::net::tcp6()] {
        match table {
            Ok(entries) => {
                for entry in entries {
                    if matches!(entry.state, TcpState::Listen) && entry.local_address.port() == port {
                        inodes.insert(entry.inode);
                    }
                }
            }
            Err(e) => debug!("Failed to read TCP socket table: {}", e),
        }
    }

    if inodes.is_empty() {
        return Vec::new();
    }

    let processes = match procfs::process::all_processes() {
        Ok(processes) => processes,
        Err(e) => {
            warn!("Failed to enumerate processes: {}", e);
            return Vec::new();
        }
    };

    let mut pids = Vec::new();
    for process in processes.flatten() {
        let Ok(fds) = process.fd() else {
            continue;
        };
        let holds_socket = fds.flatten().any(|fd| match fd.target {
            FDTarget::Socket(inode) => inodes.contains(&inode),
            _ => false,
        });
        if holds_socket {
            pids.push(process.pid);
        }
    }

    pids.sort_unstable();
    pids.dedup();
    pids
}

/// PIDs of processes holding a listening TCP socket on `port`, via `lsof`.
#[cfg(not(target_os = "linux"))]
pub fn listening_pids(port: u16) -> Vec<i32> {
    let output = std::process::Command::new("lsof")
        .arg("-t")
        .arg(format!("-iTCP:{}", port))
        .arg("-sTCP:LISTEN")
        .output();

    match output {
        Ok(output) => {
            let mut pids: Vec<i32> = String::from_utf8_lossy(&output.stdout)
                .lines()
                .filter_map(|line| line.trim().parse().ok())
                .collect();
            pids.sort_unstable();
            pids.dedup();
            pids
        }
        Err(e) => {
            warn!("Failed to run lsof for port {}: {}", port, e);
            Vec::new()
        }
    }
}

fn force_kill(pid: i32) {
    match kill(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) => info!("Killed PID {} holding the benchmark port", pid),
        Err(nix::errno::Errno::ESRCH) => debug!("PID {} already gone", pid),
        Err(e) => warn!("Failed to kill PID {}: {}", pid, e),
    }
}

/// Make sure nothing listens on `port`, killing leftover holders.
pub async fn reclaim_port(host: &str, port: u16) -> HarnessResult<()> {
    reclaim_port_with(host, port, RECLAIM_ATTEMPTS, RECLAIM_INTERVAL).await
}

/// [`reclaim_port`] with an explicit round count and interval.
///
/// The harness never signals its own process, even if it is the holder.
pub async fn reclaim_port_with(
    host: &str,
    port: u16,
    attempts: u32,
    interval: Duration,
) -> HarnessResult<()> {
    let own_pid = std::process::id() as i32;
    let mut holders = Vec::new();

    for round in 1..=attempts {
        if !port_in_use(host, port) {
            if round > 1 {
                info!("Port {} reclaimed", port);
            } else {
                debug!("Port {} is free", port);
            }
            return Ok(());
        }

        holders = listening_pids(port);
        holders.retain(|pid| *pid != own_pid);
        warn!(
            "Port {} still bound (round {}/{}), holders: {:?}",
            port, round, attempts, holders
        );

        for pid in &holders {
            force_kill(*pid);
        }
        sleep(interval).await;
    }

    if port_in_use(host, port) {
        return Err(HarnessError::PortReclaim { port, holders });
    }

    info!("Port {} reclaimed", port);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn test_port_in_use_detects_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        assert!(port_in_use("127.0.0.1", port));
        drop(listener);
        assert!(!port_in_use("127.0.0.1", port));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_listening_pids_finds_own_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let pids = listening_pids(port);
        assert!(pids.contains(&(std::process::id() as i32)), "{:?}", pids);
    }

    #[tokio::test]
    async fn test_reclaim_free_port() {
        let port = free_port();
        reclaim_port_with("127.0.0.1", port, 2, Duration::from_millis(10))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reclaim_never_kills_self() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let err = reclaim_port_with("127.0.0.1", port, 2, Duration::from_millis(10))
            .await
            .unwrap_err();
        match err {
            HarnessError::PortReclaim { port: p, holders } => {
                assert_eq!(p, port);
                assert!(holders.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
        drop(listener);
    }
}
