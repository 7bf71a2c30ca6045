use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use super::{Transport, TransportError};
use crate::config::{StdioConfig, TransportKind};

/// Lines of child stderr kept for diagnostics.
const STDERR_TAIL_LINES: usize = 64;

/// How long a closed stdout waits for the stderr reader to drain.
const STDERR_DRAIN_WAIT: Duration = Duration::from_millis(100);

type StderrTail = Arc<Mutex<VecDeque<String>>>;

/// Subprocess transport: records on stdin/stdout, stderr captured on the side.
pub struct StdioTransport {
    service: String,
    command: String,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
    stderr_tail: StderrTail,
    stderr_task: Option<JoinHandle<()>>,
    shutdown_grace: Duration,
    pid: Option<u32>,
}

impl StdioTransport {
    /// Spawn the service process with piped stdio.
    ///
    /// The child is killed if this transport is dropped without `close`.
    pub fn spawn(
        service: &str,
        config: &StdioConfig,
        shutdown_grace: Duration,
    ) -> Result<Self, TransportError> {
        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &config.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|source| TransportError::Spawn {
            command: config.command.clone(),
            source,
        })?;
        let pid = child.id();
        tracing::debug!(service, command = %config.command, pid, "Spawned tool process");

        let stderr_tail: StderrTail =
            Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(pump_stderr(service.to_string(), stderr, Arc::clone(&stderr_tail)))
        });

        Ok(Self {
            service: service.to_string(),
            command: config.command.clone(),
            stdin: child.stdin.take(),
            stdout: child.stdout.take().map(BufReader::new),
            child: Some(child),
            stderr_tail,
            stderr_task,
            shutdown_grace,
            pid,
        })
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn stderr_snapshot(&self) -> Option<String> {
        let tail = self
            .stderr_tail
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if tail.is_empty() {
            None
        } else {
            Some(tail.iter().cloned().collect::<Vec<_>>().join("\n"))
        }
    }

    /// Give the stderr reader a moment to capture the child's last words.
    async fn drain_stderr(&mut self) {
        if let Some(task) = self.stderr_task.as_mut() {
            if tokio::time::timeout(STDERR_DRAIN_WAIT, task).await.is_ok() {
                self.stderr_task = None;
            }
        }
    }

    async fn closed_error(&mut self) -> TransportError {
        self.drain_stderr().await;
        TransportError::Closed {
            stderr: self.stderr_snapshot(),
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn write_line(&mut self, record: &[u8]) -> Result<(), TransportError> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(self.closed_error().await);
        };

        let mut framed = Vec::with_capacity(record.len() + 1);
        framed.extend_from_slice(record);
        framed.push(b'\n');

        let written = match stdin.write_all(&framed).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        match written {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                self.stdin = None;
                Err(self.closed_error().await)
            }
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    async fn read_line(&mut self) -> Result<Vec<u8>, TransportError> {
        loop {
            let Some(stdout) = self.stdout.as_mut() else {
                return Err(self.closed_error().await);
            };

            let mut line = Vec::new();
            let read = stdout.read_until(b'\n', &mut line).await?;
            if read == 0 {
                tracing::debug!(
                    service = %self.service,
                    pid = self.pid,
                    "Tool process closed stdout"
                );
                self.stdout = None;
                return Err(self.closed_error().await);
            }

            while matches!(line.last(), Some(b'\n' | b'\r')) {
                line.pop();
            }
            if !line.iter().all(u8::is_ascii_whitespace) {
                return Ok(line);
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.stdin = None;
        self.stdout = None;

        if let Some(mut child) = self.child.take() {
            terminate(&mut child, self.shutdown_grace, &self.service).await;
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        Ok(())
    }

    fn diagnostics(&self) -> Option<String> {
        self.stderr_snapshot()
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}

/// Keep reading the child's stderr until it closes. Stopping early would
/// leave the child writing into a broken pipe.
async fn pump_stderr(service: String, stderr: ChildStderr, tail: StderrTail) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(service = %service, error = %e, "Tool stderr read failed");
                break;
            }
        }
        let line = String::from_utf8_lossy(&buf)
            .trim_end_matches(['\n', '\r'])
            .to_string();
        tracing::debug!(service = %service, line = %line, "tool stderr");
        let mut tail = tail.lock().unwrap_or_else(PoisonError::into_inner);
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
}

/// SIGTERM, wait out the grace period, then kill and reap.
async fn terminate(child: &mut Child, grace: Duration, service: &str) {
    match child.try_wait() {
        Ok(Some(status)) => {
            tracing::debug!(service, %status, "Tool process already exited");
            return;
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(service, error = %e, "Failed to poll tool process"),
    }

    request_terminate(child);
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => tracing::debug!(service, %status, "Tool process exited"),
        Ok(Err(e)) => tracing::warn!(service, error = %e, "Failed to wait for tool process"),
        Err(_) => {
            tracing::warn!(
                service,
                grace_ms = grace.as_millis() as u64,
                "Tool process ignored SIGTERM, killing"
            );
            if let Err(e) = child.kill().await {
                tracing::warn!(service, error = %e, "Failed to kill tool process");
            }
        }
    }
}

#[cfg(unix)]
fn request_terminate(child: &Child) {
    if let Some(pid) = child.id() {
        // SAFETY: pid belongs to a child we have not yet reaped.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn request_terminate(_child: &Child) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn shell(script: &str) -> StdioConfig {
        StdioConfig {
            command: "sh".into(),
            args: vec!["-c".into(), script.into()],
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    #[tokio::test]
    async fn echoes_records_line_by_line() {
        let mut transport = StdioTransport::spawn("echo", &shell("cat"), Duration::from_millis(200))
            .expect("spawn sh");
        transport.write_line(br#"{"query":"1+1"}"#).await.expect("write");
        let line = transport.read_line().await.expect("read");
        assert_eq!(line, br#"{"query":"1+1"}"#.to_vec());
        transport.close().await.expect("close");
    }

    #[tokio::test]
    async fn eof_reports_closed_with_stderr_tail() {
        let mut transport = StdioTransport::spawn(
            "broken",
            &shell("echo 'Traceback: boom' >&2; exit 3"),
            Duration::from_millis(200),
        )
        .expect("spawn sh");

        let err = transport.read_line().await.expect_err("stdout closes");
        match err {
            TransportError::Closed { stderr } => {
                assert!(stderr.unwrap_or_default().contains("Traceback: boom"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        transport.close().await.expect("close");
    }

    #[tokio::test]
    async fn non_utf8_stderr_keeps_the_child_alive() {
        let mut transport = StdioTransport::spawn(
            "binary-stderr",
            &shell(concat!(
                "printf '\\377\\n' >&2; sleep 0.3; ",
                "echo 'later diagnostics' >&2; sleep 0.2; ",
                "echo '{\"result\":1}'; sleep 5"
            )),
            Duration::from_millis(200),
        )
        .expect("spawn sh");

        let line = transport.read_line().await.expect("record after binary stderr");
        assert_eq!(line, br#"{"result":1}"#.to_vec());
        let diagnostics = transport.diagnostics().unwrap_or_default();
        assert!(diagnostics.contains('\u{FFFD}'), "lossy line recorded: {diagnostics:?}");
        assert!(diagnostics.contains("later diagnostics"));
        transport.close().await.expect("close");
    }

    #[tokio::test]
    async fn blank_lines_and_crlf_are_skipped() {
        let mut transport = StdioTransport::spawn(
            "crlf",
            &shell("printf '\\n\\r\\n{\"result\": 1}\\r\\n'; sleep 5"),
            Duration::from_millis(200),
        )
        .expect("spawn sh");
        let line = transport.read_line().await.expect("read");
        assert_eq!(line, br#"{"result": 1}"#.to_vec());
        transport.close().await.expect("close");
    }

    #[tokio::test]
    async fn close_is_idempotent_and_reaps_child() {
        let mut transport = StdioTransport::spawn(
            "stubborn",
            &shell("trap '' TERM; while true; do sleep 1; done"),
            Duration::from_millis(100),
        )
        .expect("spawn sh");
        let pid = transport.pid().expect("child has a pid");

        transport.close().await.expect("first close");
        transport.close().await.expect("second close");
        assert!(!std::path::Path::new(&format!("/proc/{pid}")).exists());

        let err = transport.write_line(b"{}").await.expect_err("closed");
        assert!(matches!(err, TransportError::Closed { .. }));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let config = StdioConfig {
            command: "/nonexistent/toolgate-test-binary".into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
        };
        let err = StdioTransport::spawn("ghost", &config, Duration::from_millis(100))
            .err()
            .expect("spawn fails");
        assert!(matches!(err, TransportError::Spawn { .. }));
    }
}
