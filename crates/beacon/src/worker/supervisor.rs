//! Worker process supervision.
//!
//! Each started worker gets three tasks: one per output stream forwarding lines to
//! `tracing`, and one owning the `Child` that waits for exit or a termination
//! request. Termination is SIGTERM, then a kill once the grace period runs out.

use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use beacon_common::{BeaconError, Role};

use super::WorkerCommand;

/// How long to wait for output forwarders to drain after the worker exits
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// How a worker ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The process exited with this status
    Exited(ExitStatus),
    /// The process could not be waited on
    Lost,
}

impl WorkerExit {
    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(status) if status.success())
    }
}

/// Handle to a running worker. Clones refer to the same process.
#[derive(Clone)]
pub struct WorkerHandle {
    role: Role,
    pid: Option<u32>,
    terminate_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
    exit_rx: watch::Receiver<Option<WorkerExit>>,
}

impl WorkerHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit status, if the worker has already exited
    #[cfg(test)]
    pub fn try_exit(&self) -> Option<WorkerExit> {
        *self.exit_rx.borrow()
    }

    /// Wait until the worker exits
    pub async fn join(&self) -> WorkerExit {
        let mut rx = self.exit_rx.clone();
        match rx.wait_for(Option::is_some).await {
            Ok(exit) => (*exit).unwrap_or(WorkerExit::Lost),
            // Supervising task went away without reporting
            Err(_) => WorkerExit::Lost,
        }
    }

    /// Ask the worker to terminate. Only the first request does anything;
    /// requests against an exited worker are ignored.
    pub fn terminate(&self) {
        let sender = self
            .terminate_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(sender) = sender {
            if sender.send(()).is_err() {
                tracing::debug!(role = %self.role, "Worker already exited, nothing to terminate");
            }
        }
    }
}

/// Starts workers and terminates all of them on shutdown
pub struct Supervisor {
    grace: Duration,
    workers: Mutex<Vec<WorkerHandle>>,
}

impl Supervisor {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Launch a worker without waiting for it. Must be called inside a Tokio runtime.
    pub fn start(&self, role: Role, command: &WorkerCommand) -> Result<WorkerHandle, BeaconError> {
        let mut child = Command::new(&command.executable)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BeaconError::Launch {
                path: command.executable.clone(),
                source,
            })?;

        let pid = child.id();
        tracing::info!(
            role = %role,
            pid = ?pid,
            executable = %command.executable.display(),
            args = ?command.args,
            "🚀 Worker started"
        );

        let mut forwarders = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            forwarders.push(tokio::spawn(forward_lines(stdout, role, "stdout")));
        }
        if let Some(stderr) = child.stderr.take() {
            forwarders.push(tokio::spawn(forward_lines(stderr, role, "stderr")));
        }

        let (terminate_tx, terminate_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);

        tokio::spawn(supervise(
            child,
            role,
            self.grace,
            terminate_rx,
            forwarders,
            exit_tx,
        ));

        let handle = WorkerHandle {
            role,
            pid,
            terminate_tx: Arc::new(Mutex::new(Some(terminate_tx))),
            exit_rx,
        };

        self.workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handle.clone());

        Ok(handle)
    }

    /// Terminate every started worker and wait for all of them to exit
    pub async fn shutdown(&self) {
        let workers: Vec<WorkerHandle> = self
            .workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        for worker in &workers {
            worker.terminate();
        }

        let exits = join_all(workers.iter().map(|worker| worker.join())).await;
        tracing::info!(workers = exits.len(), "🛑 All workers stopped");
    }
}

/// Own the child until it exits or termination is requested
async fn supervise(
    mut child: Child,
    role: Role,
    grace: Duration,
    mut terminate_rx: oneshot::Receiver<()>,
    forwarders: Vec<JoinHandle<()>>,
    exit_tx: watch::Sender<Option<WorkerExit>>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        // Fires on an explicit request, or when every handle is gone
        _ = &mut terminate_rx => terminate(&mut child, role, grace).await,
    };

    let exit = match status {
        Ok(status) => {
            tracing::info!(role = %role, status = %status, "Worker exited");
            WorkerExit::Exited(status)
        }
        Err(e) => {
            tracing::error!(role = %role, error = %e, "Failed to wait on worker");
            WorkerExit::Lost
        }
    };

    if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, join_all(forwarders))
        .await
        .is_err()
    {
        tracing::debug!(role = %role, "Worker output still open after exit");
    }

    exit_tx.send_replace(Some(exit));
}

/// SIGTERM, wait out the grace period, then kill
async fn terminate(child: &mut Child, role: Role, grace: Duration) -> std::io::Result<ExitStatus> {
    tracing::info!(role = %role, pid = ?child.id(), "Terminating worker");

    send_sigterm(child, role);

    #[cfg(not(unix))]
    let grace = Duration::ZERO;

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            tracing::warn!(role = %role, grace = ?grace, "Worker ignored SIGTERM, killing");
            if let Err(e) = child.start_kill() {
                tracing::debug!(role = %role, error = %e, "Kill failed (already exited?)");
            }
            child.wait().await
        }
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child, role: Role) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };

    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        // ESRCH: already gone
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!(role = %role, error = %e, "Failed to send SIGTERM"),
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child, _role: Role) {}

/// Forward each line of a worker stream to the log
async fn forward_lines<R>(stream: R, role: Role, name: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                tracing::info!(target: "beacon::worker", role = %role, stream = name, "{}", line);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(role = %role, stream = name, error = %e, "Worker output read failed");
                break;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Instant;

    fn shell(script: &str) -> WorkerCommand {
        WorkerCommand::new("/bin/sh", vec!["-c".to_string(), script.to_string()])
    }

    #[tokio::test]
    async fn test_join_returns_exit_status() {
        let supervisor = Supervisor::new(Duration::from_secs(1));
        let worker = supervisor
            .start(Role::Leader, &shell("echo hello; echo oops >&2; exit 3"))
            .unwrap();

        match worker.join().await {
            WorkerExit::Exited(status) => assert_eq!(status.code(), Some(3)),
            WorkerExit::Lost => panic!("worker lost"),
        }
        assert!(worker.try_exit().is_some());
    }

    #[tokio::test]
    async fn test_terminate_stops_long_running_worker() {
        let supervisor = Supervisor::new(Duration::from_secs(2));
        let worker = supervisor.start(Role::Follower, &shell("sleep 30")).unwrap();

        let started = Instant::now();
        worker.terminate();
        let exit = worker.join().await;

        assert!(!exit.success());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_kill_after_grace_when_sigterm_ignored() {
        let supervisor = Supervisor::new(Duration::from_millis(200));
        let worker = supervisor
            .start(Role::Leader, &shell("trap '' TERM; sleep 30"))
            .unwrap();
        // Give the shell time to install the trap
        tokio::time::sleep(Duration::from_millis(100)).await;

        worker.terminate();
        let exit = worker.join().await;
        assert!(!exit.success());
    }

    #[tokio::test]
    async fn test_repeated_terminate_is_harmless() {
        let supervisor = Supervisor::new(Duration::from_secs(1));
        let worker = supervisor.start(Role::Leader, &shell("exit 0")).unwrap();

        assert!(worker.join().await.success());
        worker.terminate();
        worker.terminate();
        assert!(worker.join().await.success());
    }

    #[tokio::test]
    async fn test_shutdown_terminates_all_workers() {
        let supervisor = Supervisor::new(Duration::from_secs(1));
        let a = supervisor.start(Role::Leader, &shell("sleep 30")).unwrap();
        let b = supervisor.start(Role::Follower, &shell("sleep 30")).unwrap();

        tokio::time::timeout(Duration::from_secs(10), supervisor.shutdown())
            .await
            .expect("shutdown hung");

        assert!(a.try_exit().is_some());
        assert!(b.try_exit().is_some());
        // Second shutdown finds only exited workers
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_executable_fails_to_launch() {
        let supervisor = Supervisor::new(Duration::from_secs(1));
        let command = WorkerCommand::new("/nonexistent/beacon-worker", vec![]);

        match supervisor.start(Role::Leader, &command) {
            Err(BeaconError::Launch { path, .. }) => {
                assert_eq!(path, PathBuf::from("/nonexistent/beacon-worker"))
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("launch should fail"),
        }
    }
}
