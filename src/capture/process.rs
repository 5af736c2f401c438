//! Signalling capture processes by pid.
//!
//! Background captures outlive the invocation that started them, so `stop` only has the
//! pid from the session record. Liveness and signals go through `kill(2)`.

use std::io;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use super::{ProcessHandle, StopOutcome};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const KILL_GRACE: Duration = Duration::from_secs(2);

fn to_pid(pid: u32) -> Option<libc::pid_t> {
    // pid 0 / negative pids address whole process groups.
    libc::pid_t::try_from(pid).ok().filter(|p| *p > 0)
}

/// Send `signal`. Returns `Ok(false)` when the process does not exist.
fn send_signal(pid: u32, signal: libc::c_int) -> io::Result<bool> {
    let Some(pid) = to_pid(pid) else {
        return Ok(false);
    };
    let result = unsafe { libc::kill(pid, signal) };
    if result == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(false)
    } else {
        Err(err)
    }
}

pub fn interrupt(pid: u32) -> io::Result<bool> {
    send_signal(pid, libc::SIGINT)
}

pub fn kill(pid: u32) -> io::Result<bool> {
    send_signal(pid, libc::SIGKILL)
}

/// Whether `pid` is alive. Zombies count as exited.
pub fn is_running(pid: u32) -> bool {
    let Some(raw) = to_pid(pid) else {
        return false;
    };

    let alive = unsafe { libc::kill(raw, 0) } == 0
        || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM);
    alive && !is_zombie(pid)
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    // state is the first field after the parenthesised command name
    std::fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| {
            let rest = &stat[stat.rfind(')')? + 1..];
            rest.split_whitespace().next().map(|state| state == "Z")
        })
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: u32) -> bool {
    false
}

/// Command name of `pid`, when the platform exposes it.
#[cfg(target_os = "linux")]
pub fn process_name(pid: u32) -> Option<String> {
    std::fs::read_to_string(format!("/proc/{pid}/comm"))
        .ok()
        .map(|name| name.trim().to_string())
}

#[cfg(not(target_os = "linux"))]
pub fn process_name(_pid: u32) -> Option<String> {
    None
}

/// Guards against pid reuse: a recycled pid running something else is not ours to signal.
pub fn matches_program(handle: &ProcessHandle) -> bool {
    match process_name(handle.pid) {
        // comm is truncated to 15 bytes
        Some(name) => handle.program.starts_with(&name) || name.starts_with(&handle.program),
        None => true,
    }
}

/// Poll until `pid` exits or `timeout` passes. Returns true if it exited.
pub async fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !is_running(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// SIGINT, bounded wait, then SIGKILL if the process is still around.
pub async fn stop_gracefully(handle: &ProcessHandle, timeout: Duration) -> io::Result<StopOutcome> {
    let pid = handle.pid;
    if !is_running(pid) {
        debug!("Process {} already exited", pid);
        return Ok(StopOutcome::AlreadyExited);
    }
    if !matches_program(handle) {
        warn!(
            "Process {} is no longer {} (pid reused); not signalling it",
            pid, handle.program
        );
        return Ok(StopOutcome::AlreadyExited);
    }

    if !interrupt(pid)? {
        return Ok(StopOutcome::AlreadyExited);
    }

    if wait_for_exit(pid, timeout).await {
        debug!("Process {} exited after interrupt", pid);
        return Ok(StopOutcome::Exited);
    }

    warn!(
        "Process {} did not exit within {}s of the interrupt, killing it",
        pid,
        timeout.as_secs()
    );
    kill(pid)?;
    wait_for_exit(pid, KILL_GRACE).await;
    Ok(StopOutcome::Killed)
}
