//! The supervised child process with stdout and stderr merged into one line channel.
//!
//! On unix the server runs in its own process group, so stopping it also reaches the
//! processes it started (a package manager's script runner and the server under it).

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// How long a server gets to exit after SIGTERM before it is killed.
const TERM_GRACE: Duration = Duration::from_secs(3);

pub(crate) struct ServerProcess {
    child: Child,
    pgid: Option<u32>,
    lines: mpsc::UnboundedReceiver<String>,
    closed: bool,
}

impl ServerProcess {
    pub(crate) fn spawn(command: &str, cwd: &Path) -> std::io::Result<Self> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        let mut child = cmd.spawn()?;
        let pgid = child.id();

        let (tx, lines) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, tx));
        }

        tracing::info!("Spawned `{}` (pid {:?})", command, child.id());
        Ok(Self {
            child,
            pgid,
            lines,
            closed: false,
        })
    }

    /// Waits up to `poll` for the next output line.
    pub(crate) async fn next_line(&mut self, poll: Duration) -> Option<String> {
        if self.closed {
            tokio::time::sleep(poll).await;
            return None;
        }
        match tokio::time::timeout(poll, self.lines.recv()).await {
            Ok(Some(line)) => Some(line),
            Ok(None) => {
                self.closed = true;
                None
            }
            Err(_) => None,
        }
    }

    /// Lines still in flight after the process exited.
    pub(crate) async fn drain(&mut self, grace: Duration) -> Vec<String> {
        let mut rest = Vec::new();
        while !self.closed {
            match tokio::time::timeout(grace, self.lines.recv()).await {
                Ok(Some(line)) => rest.push(line),
                Ok(None) => self.closed = true,
                Err(_) => break,
            }
        }
        rest
    }

    pub(crate) fn exit_status(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// Stops the server: SIGTERM to its process group, then SIGKILL once the grace
    /// period runs out.
    pub(crate) async fn terminate(&mut self) {
        self.terminate_within(TERM_GRACE).await;
    }

    pub(crate) async fn terminate_within(&mut self, grace: Duration) {
        if let Ok(Some(_)) = self.child.try_wait() {
            self.signal_group(Signal::Kill);
            return;
        }
        if self.signal_group(Signal::Term) {
            if let Ok(Ok(status)) = tokio::time::timeout(grace, self.child.wait()).await {
                tracing::debug!("Dev server stopped ({})", describe_status(&status));
                // Stragglers that ignored SIGTERM.
                self.signal_group(Signal::Kill);
                return;
            }
            tracing::warn!("Dev server still running after {:?}, killing it", grace);
        }
        if let Err(e) = self.child.start_kill() {
            tracing::warn!("Failed to kill dev server: {}", e);
        }
        self.signal_group(Signal::Kill);
        let _ = self.child.wait().await;
    }

    /// Signals every process in the server's group. False when nothing was signalled.
    #[cfg(unix)]
    fn signal_group(&self, signal: Signal) -> bool {
        let Some(pgid) = self.pgid.and_then(|id| libc::pid_t::try_from(id).ok()) else {
            return false;
        };
        let signal = match signal {
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        };
        // SAFETY: kill(2) takes plain integers and touches no memory of ours.
        unsafe { libc::kill(-pgid, signal) == 0 }
    }

    #[cfg(not(unix))]
    fn signal_group(&self, _signal: Signal) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

async fn pump<R: AsyncRead + Unpin>(stream: R, tx: mpsc::UnboundedSender<String>) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(line).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("Output stream closed: {}", e);
                break;
            }
        }
    }
}

pub(crate) fn describe_status(status: &ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_merges_stdout_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let mut server =
            ServerProcess::spawn("echo out; echo err 1>&2", dir.path()).unwrap();

        let mut lines = Vec::new();
        for _ in 0..50 {
            if let Some(line) = server.next_line(Duration::from_millis(50)).await {
                lines.push(line);
            }
            if lines.len() == 2 {
                break;
            }
        }
        lines.sort();
        assert_eq!(lines, vec!["err", "out"]);
    }

    #[tokio::test]
    async fn test_exit_status_and_terminate() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = ServerProcess::spawn("exit 3", dir.path()).unwrap();
        let mut status = None;
        for _ in 0..50 {
            if let Some(s) = server.exit_status().unwrap() {
                status = Some(s);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(describe_status(&status.unwrap()), "exit code 3");

        let mut long = ServerProcess::spawn("sleep 30", dir.path()).unwrap();
        long.terminate().await;
        assert!(long.exit_status().unwrap().is_some());
    }

    async fn wait_for_line(server: &mut ServerProcess) -> String {
        for _ in 0..100 {
            if let Some(line) = server.next_line(Duration::from_millis(50)).await {
                return line;
            }
        }
        panic!("no output from server");
    }

    #[tokio::test]
    async fn test_terminate_lets_server_shut_down() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = ServerProcess::spawn(
            "trap 'echo bye > stopped; exit 0' TERM; echo up; while true; do sleep 0.1; done",
            dir.path(),
        )
        .unwrap();
        assert_eq!(wait_for_line(&mut server).await, "up");

        server.terminate_within(Duration::from_secs(5)).await;

        assert!(dir.path().join("stopped").exists());
        let status = server.exit_status().unwrap().unwrap();
        assert_eq!(describe_status(&status), "exit code 0");
    }

    #[tokio::test]
    async fn test_terminate_kills_after_grace() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = ServerProcess::spawn("trap '' TERM; echo up; sleep 30", dir.path()).unwrap();
        assert_eq!(wait_for_line(&mut server).await, "up");

        let started = std::time::Instant::now();
        server.terminate_within(Duration::from_millis(200)).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        let status = server.exit_status().unwrap().unwrap();
        assert_eq!(describe_status(&status), "terminated by signal");
    }

    #[tokio::test]
    async fn test_terminate_reaches_child_processes() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = ServerProcess::spawn("sleep 30 & echo $!; wait", dir.path()).unwrap();
        let pid = wait_for_line(&mut server).await;

        server.terminate_within(Duration::from_secs(2)).await;

        let mut alive = true;
        for _ in 0..50 {
            alive = std::process::Command::new("kill")
                .args(["-0", pid.trim()])
                .stderr(Stdio::null())
                .status()
                .unwrap()
                .success();
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!alive, "background process {pid} outlived the server");
    }
}
