//! Control process lifecycle.
//!
//! A [`ControlProcess`] owns one spawned tool with all three standard streams
//! piped. Output is pushed by one reader task per stream into a channel that
//! the owner drains through [`OutputLines`]; writes go through
//! [`ControlProcess::send_line`].

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::config::ToolCommand;
use crate::error::{Error, Result};

/// Which output stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// One line of process output with its trailing newline removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    /// The stream the line was read from.
    pub stream: OutputStream,
    /// The line text, lossily decoded as UTF-8.
    pub text: String,
}

/// Receiving side of a process's output.
///
/// Lines from each stream arrive in the order the process wrote them.
#[derive(Debug)]
pub struct OutputLines {
    rx: mpsc::UnboundedReceiver<OutputLine>,
}

impl OutputLines {
    /// Wait for the next line.
    ///
    /// Returns `None` once both stdout and stderr are closed, which happens
    /// when the process exits.
    pub async fn next(&mut self) -> Option<OutputLine> {
        self.rx.recv().await
    }
}

/// A spawned external control process.
#[derive(Debug)]
pub struct ControlProcess {
    program: String,
    child: Child,
    stdin: Option<ChildStdin>,
    exit_status: Option<ExitStatus>,
    interrupted: bool,
}

impl ControlProcess {
    /// Spawn `tool` followed by `args`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ToolNotFound`] or [`Error::PermissionDenied`] when the
    /// program cannot be executed, [`Error::Io`] for other spawn failures.
    pub fn spawn(tool: &ToolCommand, args: &[&str]) -> Result<(Self, OutputLines)> {
        let program = tool.program().display().to_string();

        let mut child = Command::new(tool.program())
            .args(tool.leading_args())
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => Error::ToolNotFound {
                    tool: program.clone(),
                },
                io::ErrorKind::PermissionDenied => Error::PermissionDenied {
                    tool: program.clone(),
                },
                _ => Error::Io(e),
            })?;

        info!(
            "Spawned {} {:?} (pid {:?})",
            program,
            args,
            child.id()
        );

        let (tx, rx) = mpsc::unbounded_channel();

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, OutputStream::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, OutputStream::Stderr, tx));
        }

        let stdin = child.stdin.take();

        Ok((
            Self {
                program,
                child,
                stdin,
                exit_status: None,
                interrupted: false,
            },
            OutputLines { rx },
        ))
    }

    /// The program this process was started from.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// OS process id, while the process has not been reaped.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Whether [`terminate`](Self::terminate) has signalled this process.
    pub fn was_interrupted(&self) -> bool {
        self.interrupted
    }

    /// Write one command line to the process's stdin.
    pub async fn send_line(&mut self, text: &str) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "control process stdin is closed",
            ))
        })?;

        trace!("-> {}", text);

        stdin.write_all(text.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;

        Ok(())
    }

    /// Ask the process to stop with an interrupt signal.
    ///
    /// Calling this more than once, or after the process exited, is a no-op.
    pub fn terminate(&mut self) -> Result<()> {
        if self.interrupted || self.try_exit()?.is_some() {
            return Ok(());
        }

        debug!("Interrupting {} (pid {:?})", self.program, self.child.id());
        self.interrupted = true;
        self.send_interrupt()
    }

    #[cfg(unix)]
    fn send_interrupt(&mut self) -> Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        let pid = i32::try_from(pid)
            .map_err(|_| Error::Internal(format!("pid {} out of range", pid)))?;

        match kill(Pid::from_raw(pid), Signal::SIGINT) {
            // Already gone; the exit is picked up by the next wait.
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(Error::Io(io::Error::from(e))),
        }
    }

    #[cfg(not(unix))]
    fn send_interrupt(&mut self) -> Result<()> {
        self.child.start_kill().map_err(Error::Io)
    }

    /// Check for exit without blocking.
    pub fn try_exit(&mut self) -> Result<Option<ExitStatus>> {
        if self.exit_status.is_none() {
            self.exit_status = self.child.try_wait()?;
        }
        Ok(self.exit_status)
    }

    /// Whether the process is still running.
    pub fn is_running(&mut self) -> bool {
        matches!(self.try_exit(), Ok(None))
    }

    /// Wait for the process to exit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NonZeroExit`] if the process did not exit
    /// successfully.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        let status = self.reap().await?;
        if status.success() {
            Ok(status)
        } else {
            Err(Error::NonZeroExit {
                code: status.code(),
            })
        }
    }

    /// Interrupt the process, give it `grace` to exit, then kill it.
    ///
    /// The process is reaped when this returns.
    pub async fn shutdown(&mut self, grace: Duration) -> Result<ExitStatus> {
        if let Some(status) = self.try_exit()? {
            return Ok(status);
        }

        // Interactive tools also treat EOF on stdin as a request to exit.
        self.close_stdin();
        self.terminate()?;

        let waited = tokio::time::timeout(grace, self.reap()).await;
        match waited {
            Ok(status) => status,
            Err(_) => {
                warn!(
                    "{} did not exit within {:?} of interrupt, killing",
                    self.program, grace
                );
                self.child.kill().await?;
                self.reap().await
            }
        }
    }

    /// Close the process's stdin.
    pub fn close_stdin(&mut self) {
        self.stdin = None;
    }

    async fn reap(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.exit_status {
            return Ok(status);
        }
        let status = self.child.wait().await?;
        debug!("{} exited with {}", self.program, status);
        self.exit_status = Some(status);
        Ok(status)
    }
}

async fn forward_lines<R>(reader: R, stream: OutputStream, tx: mpsc::UnboundedSender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                let text = String::from_utf8_lossy(&buf).into_owned();
                trace!("<- {:?}: {}", stream, text);
                if tx.send(OutputLine { stream, text }).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("Error reading {:?}: {}", stream, e);
                break;
            }
        }
    }

    trace!("{:?} closed", stream);
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sh(script: &str) -> ToolCommand {
        ToolCommand::new("sh").with_leading_args(["-c", script, "fake-tool"])
    }

    #[tokio::test]
    async fn test_lines_and_exit() {
        let (mut process, mut lines) =
            ControlProcess::spawn(&sh("echo first; echo oops >&2; echo \"$1\""), &["arg"]).unwrap();

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        while let Some(line) = lines.next().await {
            match line.stream {
                OutputStream::Stdout => stdout.push(line.text),
                OutputStream::Stderr => stderr.push(line.text),
            }
        }

        assert_eq!(stdout, vec!["first", "arg"]);
        assert_eq!(stderr, vec!["oops"]);
        assert!(process.wait().await.is_ok());
        assert!(!process.is_running());
    }

    #[tokio::test]
    async fn test_send_line_echo() {
        let (mut process, mut lines) =
            ControlProcess::spawn(&sh("while read -r l; do echo \"got $l\"; done"), &[]).unwrap();

        process.send_line("connect").await.unwrap();
        let line = lines.next().await.unwrap();
        assert_eq!(line.text, "got connect");

        process.close_stdin();
        assert!(lines.next().await.is_none());
        assert!(process.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let (mut process, _lines) = ControlProcess::spawn(&sh("exit 3"), &[]).unwrap();
        match process.wait().await {
            Err(Error::NonZeroExit { code }) => assert_eq!(code, Some(3)),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let (mut process, _lines) = ControlProcess::spawn(&sh("exec sleep 30"), &[]).unwrap();
        assert!(process.is_running());

        process.terminate().unwrap();
        process.terminate().unwrap();
        assert!(process.was_interrupted());

        let status = process.shutdown(Duration::from_secs(2)).await.unwrap();
        assert!(!status.success());
        assert!(!process.is_running());
        process.terminate().unwrap();
    }

    #[tokio::test]
    async fn test_terminate_sends_sigint() {
        let (mut process, mut lines) = ControlProcess::spawn(
            &sh("trap 'echo interrupted; exit 0' INT; echo ready; while :; do sleep 0.1; done"),
            &[],
        )
        .unwrap();
        assert_eq!(lines.next().await.unwrap().text, "ready");

        process.terminate().unwrap();
        let line = tokio::time::timeout(Duration::from_secs(2), lines.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line.text, "interrupted");

        // The trap handler ran, so the tool was not killed.
        let status = process.shutdown(Duration::from_secs(2)).await.unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_shutdown_kills_after_grace() {
        let (mut process, _lines) =
            ControlProcess::spawn(&sh("trap '' INT; exec sleep 30"), &[]).unwrap();

        let status = process
            .shutdown(Duration::from_millis(200))
            .await
            .unwrap();
        assert!(!status.success());
        assert!(!process.is_running());
    }

    #[tokio::test]
    async fn test_missing_tool() {
        let tool = ToolCommand::new(PathBuf::from("/nonexistent/gatttool"));
        match ControlProcess::spawn(&tool, &[]) {
            Err(Error::ToolNotFound { tool }) => assert_eq!(tool, "/nonexistent/gatttool"),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
