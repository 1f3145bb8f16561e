// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! PID file lock held by `start` and the signalling `stop` uses to reach it.

use anyhow::{Context, Result, bail};
use log::{error, info, warn};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How long `stop` waits for a running `start` to exit. Covers the runner's
/// own grace period for the child process group.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(90);

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Exclusive claim on the state directory. Removed on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Create the PID file with this process's id. Fails when another live
    /// process holds it; a file naming a dead process is replaced.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create PID file parent directory")?;
        }

        // Second attempt only happens after a stale file was removed.
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    file.write_all(std::process::id().to_string().as_bytes())
                        .context("Failed to write PID to file")?;
                    info!("Created PID file at {}", path.display());
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => match read_pid(path)? {
                    Some(pid) if pid_is_alive(pid) => {
                        bail!("bootstrapping is already running (pid {pid})")
                    }
                    stale => {
                        warn!(
                            "Removing stale PID file {} (pid {stale:?})",
                            path.display()
                        );
                        remove_if_present(path)?;
                    }
                },
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to create PID file {}", path.display()));
                }
            }
        }
        bail!("could not acquire PID file {}", path.display())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            error!("Failed to remove PID file: {e}");
        } else {
            info!("Removed PID file at {}", self.path.display());
        }
    }
}

/// Read the pid stored at `path`. Missing or unparsable files yield `None`.
pub fn read_pid(path: &Path) -> Result<Option<u32>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(contents.trim().parse::<u32>().ok().filter(|pid| *pid > 0)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read PID file {}", path.display())),
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => {
            Err(e).with_context(|| format!("Failed to remove PID file {}", path.display()))
        }
        _ => Ok(()),
    }
}

/// Ask the `start` process named in the PID file to terminate and wait up to
/// `timeout` for it to exit. Returns the pid that was stopped, or `None` when
/// nothing was running. A stale PID file is removed.
pub async fn stop(path: &Path, timeout: Duration) -> Result<Option<u32>> {
    let Some(pid) = read_pid(path)? else {
        info!("bootstrapping is not running");
        remove_if_present(path)?;
        return Ok(None);
    };
    if !pid_is_alive(pid) {
        info!("bootstrapping is not running, removing stale PID file");
        remove_if_present(path)?;
        return Ok(None);
    }

    info!("stopping bootstrapping (pid {pid})");
    terminate(pid)?;

    let waited = tokio::time::timeout(timeout, async {
        while pid_is_alive(pid) {
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }
    })
    .await;
    if waited.is_err() {
        bail!(
            "bootstrapping (pid {pid}) did not exit within {}s",
            timeout.as_secs()
        );
    }

    // `start` removes its own PID file; a forced kill leaves it behind.
    if read_pid(path)? == Some(pid) {
        remove_if_present(path)?;
    }
    info!("bootstrapping (pid {pid}) stopped");
    Ok(Some(pid))
}

#[cfg(unix)]
pub fn pid_is_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(unix)]
fn terminate(pid: u32) -> Result<()> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).with_context(|| format!("invalid pid {pid}"))?;
    kill(Pid::from_raw(raw), Signal::SIGTERM)
        .with_context(|| format!("Failed to send SIGTERM to pid {pid}"))?;
    Ok(())
}

#[cfg(windows)]
pub fn pid_is_alive(pid: u32) -> bool {
    use windows_sys::Win32::Foundation::{CloseHandle, STILL_ACTIVE};
    use windows_sys::Win32::System::Threading::{
        GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
    };

    // SAFETY: OpenProcess has no preconditions; a null handle means failure.
    let handle = unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid) };
    if handle.is_null() {
        return false;
    }
    let mut code = 0u32;
    // SAFETY: `handle` is a valid process handle and `code` outlives the call.
    let ok = unsafe { GetExitCodeProcess(handle, &mut code) };
    // SAFETY: `handle` was returned by OpenProcess and is closed exactly once.
    unsafe { CloseHandle(handle) };
    ok != 0 && code == STILL_ACTIVE as u32
}

#[cfg(windows)]
fn terminate(pid: u32) -> Result<()> {
    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::System::Threading::{OpenProcess, PROCESS_TERMINATE, TerminateProcess};

    // SAFETY: OpenProcess has no preconditions; a null handle means failure.
    let handle = unsafe { OpenProcess(PROCESS_TERMINATE, 0, pid) };
    if handle.is_null() {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("Failed to open pid {pid}"));
    }
    // SAFETY: `handle` is a valid process handle opened with PROCESS_TERMINATE.
    let ok = unsafe { TerminateProcess(handle, 1) };
    let terminated = if ok == 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    };
    // SAFETY: `handle` was returned by OpenProcess and is closed exactly once.
    unsafe { CloseHandle(handle) };
    terminated.with_context(|| format!("Failed to terminate pid {pid}"))
}
