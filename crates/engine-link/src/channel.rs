//! Line-oriented transport to one child process.
//!
//! An [`EngineChannel`] owns the process, its stdin, and one of its output
//! streams. A background task splits the response stream into lines and
//! hands them over a bounded channel so reads can time out without losing
//! the reader. The other output stream is discarded or passed through to the
//! terminal.

use crate::EngineError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How long [`EngineChannel::close`] waits for a voluntary exit by default.
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_millis(200);

/// Lines buffered between the reader task and the client.
const LINE_BUFFER: usize = 256;

/// Which output stream carries the replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseStream {
    #[default]
    Stdout,
    Stderr,
}

/// Everything needed to (re)start an engine process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Executable to run.
    pub program: PathBuf,
    /// Command-line arguments.
    pub args: Vec<String>,
    /// Working directory of the process. Inherited when `None`.
    pub working_dir: Option<PathBuf>,
    /// Stream the replies are read from.
    pub response_stream: ResponseStream,
    /// Pass the unused output stream through instead of discarding it.
    pub show_other_output: bool,
    /// How long closing waits for the process to exit before killing it.
    pub close_grace: Duration,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        LaunchSpec {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            response_stream: ResponseStream::Stdout,
            show_other_output: false,
            close_grace: DEFAULT_CLOSE_GRACE,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn responses_on(mut self, stream: ResponseStream) -> Self {
        self.response_stream = stream;
        self
    }

    pub fn show_other_output(mut self, show: bool) -> Self {
        self.show_other_output = show;
        self
    }

    pub fn close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    fn label(&self) -> String {
        self.program.display().to_string()
    }
}

/// Liveness of an engine session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Running,
    /// The process exited or was closed.
    Exited,
    /// Starting the process or talking to it failed, or a reply went
    /// missing so later lines can no longer be matched to requests.
    Failed,
}

/// A bidirectional line channel.
///
/// Implemented by [`EngineChannel`] for real processes; clients are generic
/// over it so they can be driven by scripted transports in tests.
#[async_trait]
pub trait LineTransport: Send {
    /// Writes `line` plus a newline and flushes.
    async fn send_line(&mut self, line: &str) -> Result<(), EngineError>;

    /// Waits at most `timeout` for the next line and returns it trimmed.
    ///
    /// A timeout leaves the session [`SessionState::Failed`]: the late reply
    /// may still arrive and would be taken as the answer to the next request.
    async fn recv_line(&mut self, timeout: Duration) -> Result<String, EngineError>;

    /// Gives up on the outstanding request. Every later call fails with
    /// [`EngineError::ChannelClosed`] until [`LineTransport::restart`].
    fn abandon(&mut self);

    /// Ends the session. Idempotent.
    async fn close(&mut self) -> Result<(), EngineError>;

    /// Closes the session and starts a fresh one.
    async fn restart(&mut self) -> Result<(), EngineError>;

    fn state(&self) -> SessionState;
}

/// A running child process with line-delimited stdin and response stream.
///
/// The process is killed when the channel is dropped.
pub struct EngineChannel {
    launch: LaunchSpec,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    lines: Option<mpsc::Receiver<String>>,
    state: SessionState,
}

impl EngineChannel {
    /// Spawns the process described by `launch`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Spawn`] if the executable is missing or cannot
    /// be executed.
    pub fn start(launch: LaunchSpec) -> Result<Self, EngineError> {
        let (child, stdin, lines) = spawn_session(&launch)?;
        Ok(EngineChannel {
            launch,
            child: Some(child),
            stdin: Some(stdin),
            lines: Some(lines),
            state: SessionState::Running,
        })
    }

    /// Returns the launch parameters this channel was started with.
    pub fn launch(&self) -> &LaunchSpec {
        &self.launch
    }

    /// Returns the OS process id while the process is running.
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    fn ensure_running(&mut self) -> Result<(), EngineError> {
        if self.state != SessionState::Running {
            return Err(EngineError::ChannelClosed);
        }
        if let Some(child) = self.child.as_mut() {
            if let Ok(Some(status)) = child.try_wait() {
                info!(program = %self.launch.label(), %status, "engine process exited");
                self.state = SessionState::Exited;
                return Err(EngineError::ChannelClosed);
            }
        }
        Ok(())
    }

    /// Drops replies nobody asked for, such as a line that arrived after
    /// its request had already timed out.
    fn discard_stale_lines(&mut self) {
        if let Some(lines) = self.lines.as_mut() {
            while let Ok(stale) = lines.try_recv() {
                warn!(program = %self.launch.label(), line = %stale, "discarding stale engine output");
            }
        }
    }
}

#[async_trait]
impl LineTransport for EngineChannel {
    async fn send_line(&mut self, line: &str) -> Result<(), EngineError> {
        self.ensure_running()?;
        self.discard_stale_lines();
        let stdin = self.stdin.as_mut().ok_or(EngineError::ChannelClosed)?;
        debug!(program = %self.launch.label(), "> {}", line);

        let framed = format!("{line}\n");
        let written = match stdin.write_all(framed.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        match written {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                self.state = SessionState::Exited;
                Err(EngineError::ChannelClosed)
            }
            Err(e) => {
                self.state = SessionState::Failed;
                Err(e.into())
            }
        }
    }

    async fn recv_line(&mut self, timeout: Duration) -> Result<String, EngineError> {
        if self.state != SessionState::Running {
            return Err(EngineError::ChannelClosed);
        }
        let lines = self.lines.as_mut().ok_or(EngineError::ChannelClosed)?;
        match tokio::time::timeout(timeout, lines.recv()).await {
            Ok(Some(line)) => {
                debug!(program = %self.launch.label(), "< {}", line);
                Ok(line.trim().to_string())
            }
            Ok(None) => {
                info!(program = %self.launch.label(), "engine closed its output");
                self.state = SessionState::Exited;
                Err(EngineError::ChannelClosed)
            }
            Err(_) => {
                warn!(program = %self.launch.label(), ?timeout, "engine did not answer in time");
                self.abandon();
                Err(EngineError::Timeout(timeout))
            }
        }
    }

    fn abandon(&mut self) {
        if self.state == SessionState::Running {
            warn!(program = %self.launch.label(), "engine session out of sync, restart required");
            self.state = SessionState::Failed;
        }
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        // Closing stdin is the end-of-input signal every engine understands.
        self.stdin.take();
        self.lines.take();
        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(self.launch.close_grace, child.wait()).await {
                Ok(Ok(status)) => debug!(program = %self.launch.label(), %status, "engine exited"),
                _ => {
                    debug!(program = %self.launch.label(), "killing engine");
                    let _ = child.kill().await;
                }
            }
        }
        if self.state == SessionState::Running {
            self.state = SessionState::Exited;
        }
        Ok(())
    }

    async fn restart(&mut self) -> Result<(), EngineError> {
        self.close().await?;
        match spawn_session(&self.launch) {
            Ok((child, stdin, lines)) => {
                self.child = Some(child);
                self.stdin = Some(stdin);
                self.lines = Some(lines);
                self.state = SessionState::Running;
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Failed;
                Err(e)
            }
        }
    }

    fn state(&self) -> SessionState {
        self.state
    }
}

fn spawn_session(
    launch: &LaunchSpec,
) -> Result<(Child, ChildStdin, mpsc::Receiver<String>), EngineError> {
    let other = || {
        if launch.show_other_output {
            Stdio::inherit()
        } else {
            Stdio::null()
        }
    };

    let mut command = Command::new(&launch.program);
    command
        .args(&launch.args)
        .stdin(Stdio::piped())
        .kill_on_drop(true);
    match launch.response_stream {
        ResponseStream::Stdout => command.stdout(Stdio::piped()).stderr(other()),
        ResponseStream::Stderr => command.stdout(other()).stderr(Stdio::piped()),
    };
    if let Some(dir) = &launch.working_dir {
        command.current_dir(dir);
    }

    let mut child = command.spawn().map_err(|source| EngineError::Spawn {
        program: launch.label(),
        source,
    })?;
    info!(program = %launch.label(), pid = ?child.id(), "engine process started");

    let stdin = child.stdin.take().ok_or(EngineError::ChannelClosed)?;
    let (tx, rx) = mpsc::channel(LINE_BUFFER);
    match launch.response_stream {
        ResponseStream::Stdout => {
            let stdout = child.stdout.take().ok_or(EngineError::ChannelClosed)?;
            forward_lines(stdout, tx, launch.label());
        }
        ResponseStream::Stderr => {
            let stderr = child.stderr.take().ok_or(EngineError::ChannelClosed)?;
            forward_lines(stderr, tx, launch.label());
        }
    }
    Ok((child, stdin, rx))
}

fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>, program: String)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(&['\r', '\n'][..])
                        .to_string();
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(%program, error = %e, "failed to read engine output");
                    break;
                }
            }
        }
        debug!(%program, "response stream ended");
    });
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    const SHORT: Duration = Duration::from_millis(150);
    const LONG: Duration = Duration::from_secs(5);

    fn sh(script: &str) -> LaunchSpec {
        LaunchSpec::new("/bin/sh").arg("-c").arg(script)
    }

    #[tokio::test]
    async fn echoes_on_stderr() {
        let launch = sh(r#"while read line; do echo "got $line" >&2; done"#)
            .responses_on(ResponseStream::Stderr);
        let mut channel = EngineChannel::start(launch).unwrap();
        channel.send_line("hello").await.unwrap();
        assert_eq!(channel.recv_line(LONG).await.unwrap(), "got hello");
        channel.send_line("again").await.unwrap();
        assert_eq!(channel.recv_line(LONG).await.unwrap(), "got again");
        channel.close().await.unwrap();
        assert_eq!(channel.state(), SessionState::Exited);
    }

    #[tokio::test]
    async fn stdout_is_ignored_when_replies_are_on_stderr() {
        let launch = sh(r#"read line; echo noise; echo "e2e4" >&2"#)
            .responses_on(ResponseStream::Stderr);
        let mut channel = EngineChannel::start(launch).unwrap();
        channel.send_line("GET PLAY x").await.unwrap();
        assert_eq!(channel.recv_line(LONG).await.unwrap(), "e2e4");
    }

    #[tokio::test]
    async fn silent_process_times_out() {
        let mut channel = EngineChannel::start(sh("read line; sleep 5")).unwrap();
        channel.send_line("ping").await.unwrap();
        let started = std::time::Instant::now();
        let result = channel.recv_line(SHORT).await;
        assert!(matches!(result, Err(EngineError::Timeout(d)) if d == SHORT));
        assert!(started.elapsed() < LONG);
        assert_eq!(channel.state(), SessionState::Failed);
        channel.close().await.unwrap();
    }

    #[tokio::test]
    async fn late_reply_is_never_read_as_the_next_answer() {
        let launch = sh(r#"while read line; do sleep 0.3; echo "late $line"; done"#);
        let mut channel = EngineChannel::start(launch).unwrap();
        channel.send_line("first").await.unwrap();
        assert!(matches!(
            channel.recv_line(SHORT).await,
            Err(EngineError::Timeout(_))
        ));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(matches!(
            channel.send_line("second").await,
            Err(EngineError::ChannelClosed)
        ));
        assert!(matches!(
            channel.recv_line(LONG).await,
            Err(EngineError::ChannelClosed)
        ));

        channel.restart().await.unwrap();
        channel.send_line("third").await.unwrap();
        assert_eq!(channel.recv_line(LONG).await.unwrap(), "late third");
        channel.close().await.unwrap();
    }

    #[tokio::test]
    async fn invalid_utf8_output_is_still_delivered() {
        let launch = sh(r#"read line; printf 'e2e4\377\n'; echo ok"#);
        let mut channel = EngineChannel::start(launch).unwrap();
        channel.send_line("go").await.unwrap();
        let line = channel.recv_line(LONG).await.unwrap();
        assert!(line.starts_with("e2e4"));
        assert_eq!(channel.recv_line(LONG).await.unwrap(), "ok");
        assert_eq!(channel.state(), SessionState::Running);
    }

    #[tokio::test]
    async fn missing_executable_fails_to_spawn() {
        let result = EngineChannel::start(LaunchSpec::new("/nonexistent/path/to/engine"));
        match result {
            Err(EngineError::Spawn { program, .. }) => {
                assert_eq!(program, "/nonexistent/path/to/engine");
            }
            _ => panic!("Expected Spawn error"),
        }
    }

    #[tokio::test]
    async fn exited_process_reports_closed_channel() {
        let mut channel = EngineChannel::start(sh("exit 0")).unwrap();
        assert!(matches!(
            channel.recv_line(LONG).await,
            Err(EngineError::ChannelClosed)
        ));
        assert_eq!(channel.state(), SessionState::Exited);
        assert!(matches!(
            channel.send_line("anything").await,
            Err(EngineError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn working_directory_is_applied() {
        let launch = sh("pwd").working_dir("/");
        let mut channel = EngineChannel::start(launch).unwrap();
        assert_eq!(channel.recv_line(LONG).await.unwrap(), "/");
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let mut channel = EngineChannel::start(sh("while read line; do :; done")).unwrap();
        assert!(channel.id().is_some());
        channel.close().await.unwrap();
        channel.close().await.unwrap();
        assert!(channel.id().is_none());
        assert_eq!(channel.state(), SessionState::Exited);
    }

    #[tokio::test]
    async fn close_waits_for_a_slow_exit() {
        let launch = sh("while read line; do :; done; sleep 0.3; echo bye >&2")
            .close_grace(LONG);
        let mut channel = EngineChannel::start(launch).unwrap();
        let started = std::time::Instant::now();
        channel.close().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(250));
        assert!(started.elapsed() < LONG);
    }

    #[tokio::test]
    async fn restart_after_exit() {
        let mut channel = EngineChannel::start(sh("read line; echo ok")).unwrap();
        channel.send_line("first").await.unwrap();
        assert_eq!(channel.recv_line(LONG).await.unwrap(), "ok");
        assert!(matches!(
            channel.recv_line(LONG).await,
            Err(EngineError::ChannelClosed)
        ));

        channel.restart().await.unwrap();
        assert_eq!(channel.state(), SessionState::Running);
        channel.send_line("second").await.unwrap();
        assert_eq!(channel.recv_line(LONG).await.unwrap(), "ok");
    }
}
