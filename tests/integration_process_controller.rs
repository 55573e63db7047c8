#![cfg(unix)]

use anyhow::Result;
use kv_benchmark::cli::ReadinessProbe;
use kv_benchmark::server::{ReadinessCheck, ServerCommand, ServerHandle};
use kv_benchmark::HarnessError;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

fn shell(script: &str, port: u16) -> ServerCommand {
    ServerCommand {
        program: PathBuf::from("sh"),
        args: vec!["-c".to_string(), script.to_string()],
        port,
    }
}

fn check(probe: ReadinessProbe, port: u16, timeout: Duration) -> ReadinessCheck {
    ReadinessCheck {
        probe,
        host: "127.0.0.1".to_string(),
        port,
        timeout,
        cli_bin: PathBuf::from("redis-cli"),
        tls: None,
    }
}

fn alive(pid: u32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}

/// A server that answers the connect probe is stopped with SIGTERM.
#[tokio::test]
async fn start_probe_and_stop() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    let command = shell("trap 'exit 0' TERM; while true; do sleep 0.05; done", port);
    let mut server = ServerHandle::start(&command, "fake", Duration::ZERO, None).await?;
    let pid = server.pid().expect("running child has a pid");

    let attempts = server
        .wait_ready(&check(ReadinessProbe::Connect, port, Duration::from_secs(5)))
        .await?;
    assert_eq!(attempts, 1);

    drop(listener);
    server.stop("127.0.0.1", Duration::from_secs(5)).await?;
    assert!(!alive(pid));
    Ok(())
}

/// A server ignoring SIGTERM is killed once the stop timeout expires.
#[tokio::test]
async fn stop_escalates_to_kill() -> Result<()> {
    let command = shell("trap '' TERM; exec sleep 30", 1);
    let server =
        ServerHandle::start(&command, "stubborn", Duration::from_millis(50), None).await?;
    let pid = server.pid().expect("running child has a pid");

    let started = Instant::now();
    server.stop("127.0.0.1", Duration::from_millis(300)).await?;

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!alive(pid));
    Ok(())
}

#[tokio::test]
async fn exited_server_is_not_ready() -> Result<()> {
    let mut server =
        ServerHandle::start(&shell("exit 3", 1), "crashy", Duration::from_millis(100), None)
            .await?;

    let err = server
        .wait_ready(&check(ReadinessProbe::None, 1, Duration::from_secs(1)))
        .await
        .unwrap_err();
    match err {
        HarnessError::Readiness { reason, .. } => {
            assert!(reason.contains("exited"), "{}", reason)
        }
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[tokio::test]
async fn silent_server_times_out() -> Result<()> {
    // Nothing listens on the port of a just-dropped listener.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        listener.local_addr()?.port()
    };
    let mut server =
        ServerHandle::start(&shell("exec sleep 30", port), "mute", Duration::ZERO, None).await?;

    let started = Instant::now();
    let err = server
        .wait_ready(&check(ReadinessProbe::Ping, port, Duration::from_millis(500)))
        .await
        .unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(500));
    match err {
        HarnessError::Readiness { attempts, port: p, .. } => {
            assert!(attempts >= 2, "{}", attempts);
            assert_eq!(p, port);
        }
        other => panic!("unexpected error: {other}"),
    }

    server.stop("127.0.0.1", Duration::from_secs(2)).await?;
    Ok(())
}

#[tokio::test]
async fn missing_binary_is_a_startup_error() {
    let command = ServerCommand {
        program: PathBuf::from("/nonexistent/keydb-server"),
        args: vec!["--port".to_string(), "6389".to_string()],
        port: 6389,
    };
    let err = ServerHandle::start(&command, "KeyDB", Duration::ZERO, None)
        .await
        .err()
        .expect("spawn must fail");

    assert!(matches!(err, HarnessError::Startup { ref target, .. } if target == "KeyDB"));
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn server_output_goes_to_log_file() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let log = dir.path().join("fake-server.log");

    let mut server = ServerHandle::start(
        &shell("echo 'Ready to accept connections'", 1),
        "fake",
        Duration::from_millis(200),
        Some(log.as_path()),
    )
    .await?;
    // The script has exited by now.
    assert!(server
        .wait_ready(&check(ReadinessProbe::None, 1, Duration::from_millis(100)))
        .await
        .is_err());
    server.stop("127.0.0.1", Duration::from_secs(1)).await?;

    let contents = std::fs::read_to_string(&log)?;
    assert!(contents.contains("Ready to accept connections"));
    Ok(())
}

/// A leftover process listening on the port is killed and the port freed.
#[tokio::test]
async fn reclaim_kills_foreign_holder() -> Result<()> {
    use nix::fcntl::{fcntl, FcntlArg, FdFlag};
    use std::os::unix::io::AsRawFd;
    use std::os::unix::process::{CommandExt, ExitStatusExt};

    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    let fd = listener.as_raw_fd();

    let mut command = std::process::Command::new("sh");
    command.args(["-c", "exec sleep 30"]);
    // Only the forked child keeps the listening socket across exec.
    unsafe {
        command.pre_exec(move || {
            fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty()))
                .map(|_| ())
                .map_err(std::io::Error::from)
        });
    }
    let mut holder = command.spawn()?;
    drop(listener);

    assert!(kv_benchmark::port::port_in_use("127.0.0.1", port));
    #[cfg(target_os = "linux")]
    assert!(kv_benchmark::port::listening_pids(port).contains(&(holder.id() as i32)));

    kv_benchmark::port::reclaim_port_with("127.0.0.1", port, 5, Duration::from_millis(100))
        .await?;

    assert!(!kv_benchmark::port::port_in_use("127.0.0.1", port));
    let status = holder.wait()?;
    assert_eq!(status.signal(), Some(nix::sys::signal::Signal::SIGKILL as i32));
    Ok(())
}
