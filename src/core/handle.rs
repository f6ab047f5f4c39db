//! # Child process handle.
//!
//! [`ProcessHandle`] owns the control side of one spawned OS process: its input
//! pipe, PID, exit status and the channel used to force-kill it. The output side
//! is handed to the reader loop as a single merged line channel.
//!
//! ## Task layout per process
//! ```text
//!   child.stdout ──► pump ──┐
//!                           ├──► mpsc<LogLine> ──► reader loop
//!   child.stderr ──► pump ──┘
//!
//!   exit waiter (owns Child):
//!     select! { child.wait() → watch<Option<ExitInfo>>,
//!               kill_rx      → child.start_kill() }
//! ```
//!
//! ## Rules
//! - The `Child` is owned by the exit waiter alone; everything else talks to it
//!   through the watch/kill channels or by PID.
//! - The merged output channel closes when both pipes reach EOF.
//! - Lines are decoded lossily; invalid UTF-8 never stops a pump.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{Mutex, mpsc, watch};

use super::launcher::LaunchSpec;
use crate::logs::LogLine;

/// Bound of the merged output channel between the pumps and the reader loop.
const OUTPUT_QUEUE: usize = 1024;

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitInfo {
    /// Exit code, when the process exited on its own.
    pub code: Option<i32>,
    /// Terminating signal number (unix).
    pub signal: Option<i32>,
}

impl ExitInfo {
    fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
        }
    }

    /// Short human-readable form (`"code=0"`, `"signal=9"`, `"unknown"`).
    pub fn describe(&self) -> String {
        match (self.code, self.signal) {
            (Some(c), _) => format!("code={c}"),
            (None, Some(s)) => format!("signal={s}"),
            (None, None) => "unknown".to_string(),
        }
    }
}

/// Control side of one running process.
pub struct ProcessHandle {
    pid: u32,
    instance: u64,
    started_at: DateTime<Utc>,
    stdin: Mutex<Option<ChildStdin>>,
    exit: watch::Receiver<Option<ExitInfo>>,
    kill_tx: mpsc::Sender<()>,
}

impl ProcessHandle {
    /// Spawns `spec` with piped stdio and returns the handle plus the merged
    /// output channel.
    ///
    /// `instance` distinguishes successive starts of the same entity.
    pub fn spawn(spec: &LaunchSpec, instance: u64) -> std::io::Result<(Self, mpsc::Receiver<LogLine>)> {
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let pid = child
            .id()
            .ok_or_else(|| std::io::Error::other("process exited before its pid was read"))?;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (out_tx, out_rx) = mpsc::channel(OUTPUT_QUEUE);
        if let Some(stdout) = stdout {
            tokio::spawn(pump(stdout, out_tx.clone()));
        }
        if let Some(stderr) = stderr {
            tokio::spawn(pump(stderr, out_tx.clone()));
        }
        drop(out_tx);

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, mut kill_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            let status = loop {
                tokio::select! {
                    res = child.wait() => break res,
                    Some(()) = kill_rx.recv() => {
                        if let Err(e) = child.start_kill() {
                            tracing::debug!(pid, error = %e, "kill request failed");
                        }
                    }
                }
            };
            let info = match status {
                Ok(status) => ExitInfo::from_status(status),
                Err(e) => {
                    tracing::warn!(pid, error = %e, "waiting for process failed");
                    ExitInfo::default()
                }
            };
            let _ = exit_tx.send(Some(info));
        });

        Ok((
            Self {
                pid,
                instance,
                started_at: Utc::now(),
                stdin: Mutex::new(stdin),
                exit: exit_rx,
                kill_tx,
            },
            out_rx,
        ))
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Writes `text` plus a newline to the process input and flushes.
    pub async fn write_line(&self, text: &str) -> std::io::Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::BrokenPipe))?;
        let mut buf = Vec::with_capacity(text.len() + 1);
        buf.extend_from_slice(text.as_bytes());
        buf.push(b'\n');
        let res = async {
            stdin.write_all(&buf).await?;
            stdin.flush().await
        }
        .await;
        if res.is_err() {
            *guard = None;
        }
        res
    }

    /// Sends the polite termination signal (SIGTERM).
    ///
    /// A process that is already gone is not an error.
    #[cfg(unix)]
    pub fn terminate(&self) -> std::io::Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let pid = i32::try_from(self.pid).map_err(std::io::Error::other)?;
        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Without POSIX signals the polite step degrades to the unconditional kill.
    #[cfg(not(unix))]
    pub fn terminate(&self) -> std::io::Result<()> {
        self.kill();
        Ok(())
    }

    /// Requests the unconditional kill; completes immediately.
    pub fn kill(&self) {
        let _ = self.kill_tx.try_send(());
    }

    /// Exit information if the process has already been reaped.
    pub fn exited(&self) -> Option<ExitInfo> {
        *self.exit.borrow()
    }

    /// Waits up to `limit` for the process to be reaped.
    pub async fn wait_exit(&self, limit: Duration) -> Option<ExitInfo> {
        tokio::time::timeout(limit, self.wait()).await.ok()
    }

    /// Waits until the process is reaped.
    pub async fn wait(&self) -> ExitInfo {
        let mut rx = self.exit.clone();
        match rx.wait_for(Option::is_some).await {
            Ok(info) => (*info).unwrap_or_default(),
            Err(_) => ExitInfo::default(),
        }
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("instance", &self.instance)
            .field("exited", &self.exited())
            .finish_non_exhaustive()
    }
}

/// Forwards one pipe into the merged output channel, line by line.
async fn pump<R: AsyncRead + Unpin>(reader: R, tx: mpsc::Sender<LogLine>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(256);
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if tx.send(LogLine::from_raw(&buf)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "output pipe read failed");
                break;
            }
        }
    }
}
