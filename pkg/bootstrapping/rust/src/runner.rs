// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Runs a shell command and hands its combined output out in bounded chunks.
//!
//! [`ChunkedCommand`] is the producer: every call to
//! [`ChunkedCommand::next_chunk`] yields the next batch of at most
//! `threshold` lines, and the last batch carries the exit code. A full batch
//! is held back until another line arrives, the process exits or the output
//! stays quiet for [`HOLD_TIMEOUT`]. A command that finishes right after its
//! output gets the exit code on its last batch of lines. One that goes quiet
//! first ends with an empty terminal batch.
//!
//! On cancellation the lines already read are handed out before
//! [`Error::Cancelled`].
//!
//! [`run_chunked`] drives a producer into a [`ChunkSink`]. A sink error stops
//! the read loop and terminates the command.

use crate::errors::{Error, Result};
use log::{debug, info, warn};
use std::future::Future;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::{Duration, timeout};
use tokio_stream::wrappers::LinesStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

/// Grace period between SIGTERM and SIGKILL when a command is terminated.
const TERMINATE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a full chunk waits for more output before it is handed out
/// without an exit code.
pub const HOLD_TIMEOUT: Duration = Duration::from_secs(1);

type LineStream = Pin<Box<dyn Stream<Item = io::Result<String>> + Send>>;

enum Event {
    Cancelled,
    Idle,
    Line(Option<io::Result<String>>),
}

/// A batch of output lines. `exit_code` is set on the last chunk only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk {
    pub lines: Vec<String>,
    pub exit_code: Option<i32>,
}

impl Chunk {
    /// The chunk as newline-terminated text.
    pub fn text(&self) -> String {
        let mut text = String::with_capacity(self.lines.iter().map(|l| l.len() + 1).sum());
        for line in &self.lines {
            text.push_str(line);
            text.push('\n');
        }
        text
    }

    pub fn is_terminal(&self) -> bool {
        self.exit_code.is_some()
    }
}

/// Consumer side of the chunk stream. Returning an error stops the command.
pub trait ChunkSink {
    fn accept(&mut self, chunk: &Chunk) -> impl Future<Output = anyhow::Result<()>>;
}

impl ChunkSink for Vec<Chunk> {
    async fn accept(&mut self, chunk: &Chunk) -> anyhow::Result<()> {
        self.push(chunk.clone());
        Ok(())
    }
}

pub struct ChunkedCommand {
    command: String,
    child: Child,
    lines: LineStream,
    threshold: usize,
    buffer: Vec<String>,
    held: Option<Chunk>,
    exit_code: Option<i32>,
    finished: bool,
    cancelled: bool,
    #[cfg(windows)]
    job: Option<job::KillOnCloseJob>,
}

impl ChunkedCommand {
    /// Launch `command` through the host shell with stdout and stderr piped.
    pub fn spawn(command: &str, threshold: usize) -> Result<Self> {
        let mut cmd = shell_command(command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group so termination reaches the tool the shell started.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            command: command.to_string(),
            source,
        })?;

        // Tools the shell starts join the job and die with it, even when this
        // process is killed before it can terminate them.
        #[cfg(windows)]
        let job = match job::KillOnCloseJob::assign(&child) {
            Ok(job) => Some(job),
            Err(e) => {
                warn!("could not attach `{command}` to a job object: {e}");
                None
            }
        };

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.start_kill();
            return Err(Error::Spawn {
                command: command.to_string(),
                source: io::Error::other("output pipes were not captured"),
            });
        };
        let lines = LinesStream::new(BufReader::new(stdout).lines())
            .merge(LinesStream::new(BufReader::new(stderr).lines()));

        info!(
            "spawned `{command}` (pid={})",
            child.id().unwrap_or_default()
        );
        Ok(Self {
            command: command.to_string(),
            child,
            lines: Box::pin(lines),
            threshold: threshold.max(1),
            buffer: Vec::new(),
            held: None,
            exit_code: None,
            finished: false,
            cancelled: false,
            #[cfg(windows)]
            job,
        })
    }

    /// Exit code once the terminal chunk has been produced.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Next chunk of output, or `None` after the terminal chunk. Cancelling
    /// `cancel` terminates the command; the lines read so far still come out
    /// as chunks, then [`Error::Cancelled`] is returned.
    pub async fn next_chunk(&mut self, cancel: &CancellationToken) -> Result<Option<Chunk>> {
        if self.cancelled {
            return self.drain_cancelled();
        }
        if self.finished {
            return Ok(None);
        }
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => Event::Cancelled,
                next = self.lines.next() => Event::Line(next),
                _ = tokio::time::sleep(HOLD_TIMEOUT), if self.held.is_some() => Event::Idle,
            };

            match event {
                Event::Cancelled => return self.cancel().await,
                Event::Idle => {
                    debug!("`{}` is quiet, releasing held chunk", self.command);
                    return Ok(self.held.take());
                }
                Event::Line(Some(Ok(line))) => {
                    self.buffer.push(line);
                    let ready = self.held.take();
                    if self.buffer.len() >= self.threshold {
                        self.held = Some(Chunk {
                            lines: std::mem::take(&mut self.buffer),
                            exit_code: None,
                        });
                    }
                    if ready.is_some() {
                        return Ok(ready);
                    }
                }
                Event::Line(Some(Err(source))) => {
                    self.terminate().await;
                    return Err(Error::Output {
                        command: self.command.clone(),
                        source,
                    });
                }
                Event::Line(None) => return self.finish(cancel).await,
            }
        }
    }

    async fn finish(&mut self, cancel: &CancellationToken) -> Result<Option<Chunk>> {
        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            status = self.child.wait() => Some(status),
        };
        let Some(status) = status else {
            return self.cancel().await;
        };
        let status = status.map_err(|source| Error::Output {
            command: self.command.clone(),
            source,
        })?;

        let code = exit_code(status);
        self.exit_code = Some(code);
        self.finished = true;

        let mut chunk = self.held.take().unwrap_or_else(|| Chunk {
            lines: std::mem::take(&mut self.buffer),
            exit_code: None,
        });
        chunk.exit_code = Some(code);
        Ok(Some(chunk))
    }

    async fn cancel(&mut self) -> Result<Option<Chunk>> {
        info!("cancellation requested, terminating `{}`", self.command);
        self.cancelled = true;
        self.terminate().await;
        self.drain_cancelled()
    }

    /// Held and buffered lines of a cancelled command, in order.
    fn drain_cancelled(&mut self) -> Result<Option<Chunk>> {
        if let Some(chunk) = self.held.take() {
            return Ok(Some(chunk));
        }
        if !self.buffer.is_empty() {
            return Ok(Some(Chunk {
                lines: std::mem::take(&mut self.buffer),
                exit_code: None,
            }));
        }
        Err(Error::Cancelled)
    }

    /// Stop the command: SIGTERM to its process group, SIGKILL after a grace
    /// period. Later calls to `next_chunk` return `None`.
    pub async fn terminate(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        #[cfg(unix)]
        {
            use nix::sys::signal::Signal;

            self.signal_group(Signal::SIGTERM);
            if timeout(TERMINATE_TIMEOUT, self.child.wait()).await.is_ok() {
                return;
            }
            warn!(
                "`{}` still running after {}s, sending SIGKILL",
                self.command,
                TERMINATE_TIMEOUT.as_secs()
            );
            self.signal_group(Signal::SIGKILL);
        }
        #[cfg(windows)]
        {
            let killed = match &self.job {
                Some(job) => job.terminate(),
                None => self.child.start_kill(),
            };
            if let Err(e) = killed {
                warn!("failed to kill `{}`: {e}", self.command);
            }
        }

        if timeout(TERMINATE_TIMEOUT, self.child.wait()).await.is_err() {
            warn!("`{}` did not exit after being killed", self.command);
        }
    }

    #[cfg(unix)]
    fn signal_group(&self, sig: nix::sys::signal::Signal) {
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        let Some(pid) = self.child.id().and_then(|pid| i32::try_from(pid).ok()) else {
            return;
        };
        if let Err(e) = killpg(Pid::from_raw(pid), sig) {
            debug!("failed to send {sig} to process group {pid}: {e}");
        }
    }
}

#[cfg(windows)]
mod job {
    use std::io;
    use tokio::process::Child;
    use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
    use windows_sys::Win32::System::JobObjects::{
        AssignProcessToJobObject, CreateJobObjectW, JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE,
        JOBOBJECT_EXTENDED_LIMIT_INFORMATION, JobObjectExtendedLimitInformation,
        SetInformationJobObject, TerminateJobObject,
    };

    /// Job object whose processes are killed when its last handle closes.
    pub(super) struct KillOnCloseJob(HANDLE);

    // SAFETY: a job handle is a process-wide kernel handle, usable from any thread.
    unsafe impl Send for KillOnCloseJob {}

    impl KillOnCloseJob {
        /// Create the job and put `child` in it. Processes `child` starts
        /// afterwards inherit the job.
        pub(super) fn assign(child: &Child) -> io::Result<Self> {
            let Some(process) = child.raw_handle() else {
                return Err(io::Error::other("process has already exited"));
            };

            // SAFETY: null security attributes and name are accepted.
            let handle = unsafe { CreateJobObjectW(std::ptr::null(), std::ptr::null()) };
            if handle.is_null() {
                return Err(io::Error::last_os_error());
            }
            let job = Self(handle);

            // SAFETY: the struct is plain data; all zeroes is a valid value.
            let mut info: JOBOBJECT_EXTENDED_LIMIT_INFORMATION = unsafe { std::mem::zeroed() };
            info.BasicLimitInformation.LimitFlags = JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;
            // SAFETY: `info` outlives the call and the size matches its type.
            let ok = unsafe {
                SetInformationJobObject(
                    job.0,
                    JobObjectExtendedLimitInformation,
                    (&raw const info).cast(),
                    std::mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as u32,
                )
            };
            if ok == 0 {
                return Err(io::Error::last_os_error());
            }

            // SAFETY: both handles are open; `child` keeps its handle alive.
            if unsafe { AssignProcessToJobObject(job.0, process) } == 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(job)
        }

        /// Kill every process in the job.
        pub(super) fn terminate(&self) -> io::Result<()> {
            // SAFETY: the handle is open until drop.
            if unsafe { TerminateJobObject(self.0, 1) } == 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }
    }

    impl Drop for KillOnCloseJob {
        fn drop(&mut self) {
            // SAFETY: the handle came from CreateJobObjectW and is closed once.
            unsafe { CloseHandle(self.0) };
        }
    }
}

/// Run `command`, feeding every chunk to `sink` in order. Returns the exit
/// code; a non-zero code is not an error at this level.
pub async fn run_chunked<S: ChunkSink>(
    command: &str,
    threshold: usize,
    sink: &mut S,
    cancel: &CancellationToken,
) -> Result<i32> {
    let mut stream = ChunkedCommand::spawn(command, threshold)?;
    let mut reported = 0usize;

    while let Some(chunk) = stream.next_chunk(cancel).await? {
        debug!(
            "chunk #{} of `{command}`: {} line(s)",
            reported + 1,
            chunk.lines.len()
        );
        if let Err(e) = sink.accept(&chunk).await {
            warn!(
                "reporting chunk #{} failed, terminating `{command}`: {e:#}",
                reported + 1
            );
            stream.terminate().await;
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            return Err(Error::Reporting { source: e.into() });
        }
        reported += 1;
        if let Some(code) = chunk.exit_code {
            info!("`{command}` exited with code {code} after {reported} chunk(s)");
            return Ok(code);
        }
    }

    stream.exit_code().ok_or_else(|| Error::Output {
        command: command.to_string(),
        source: io::Error::other("command finished without an exit status"),
    })
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(unix)]
pub fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
pub fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

/// Quote a path for the host shell.
#[cfg(unix)]
pub fn quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', r"'\''"))
}

#[cfg(windows)]
pub fn quote(path: &Path) -> String {
    format!("\"{}\"", path.display())
}

/// `cd` into `dir` and run `command` there.
#[cfg(unix)]
pub fn in_dir(dir: &Path, command: &str) -> String {
    format!("cd {} && {command}", quote(dir))
}

#[cfg(windows)]
pub fn in_dir(dir: &Path, command: &str) -> String {
    format!("cd /d {} && {command}", quote(dir))
}


#[cfg(all(test, windows))]
mod windows_tests {
    use super::*;

    #[tokio::test]
    async fn test_dropping_command_kills_started_tools() {
        let cancel = CancellationToken::new();
        // Prints the pid of a detached grandchild, then waits.
        let command = "powershell -NoProfile -Command \"(Start-Process ping -ArgumentList '-n','60','127.0.0.1' -WindowStyle Hidden -PassThru).Id; Start-Sleep 60\"";
        let mut stream = ChunkedCommand::spawn(command, 1).unwrap();
        assert!(stream.job.is_some());

        let chunk = stream.next_chunk(&cancel).await.unwrap().unwrap();
        let pid: u32 = chunk.lines[0].trim().parse().unwrap();
        assert!(crate::lifecycle::pid_is_alive(pid));

        drop(stream);
        let gone = timeout(Duration::from_secs(10), async {
            while crate::lifecycle::pid_is_alive(pid) {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await;
        assert!(gone.is_ok(), "pid {pid} outlived its job");
    }
}
