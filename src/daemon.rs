use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::config;

/// How long `stop` waits for the daemon to exit after SIGTERM
const STOP_GRACE: Duration = Duration::from_secs(10);

/// State of the background daemon according to its pid file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Running(u32),
    /// Pid file left behind by a process that is gone
    Stale(u32),
    Stopped,
}

pub fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn write_pid(path: &Path, pid: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, format!("{}\n", pid))
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn to_pid(pid: u32) -> Option<Pid> {
    i32::try_from(pid).ok().filter(|&raw| raw > 0).map(Pid::from_raw)
}

/// Signal 0 probe. EPERM means the process exists under another user.
fn is_alive(pid: u32) -> bool {
    let Some(pid) = to_pid(pid) else {
        return false;
    };
    match kill(pid, None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

pub fn state_at(path: &Path) -> DaemonState {
    match read_pid(path) {
        Some(pid) if is_alive(pid) => DaemonState::Running(pid),
        Some(pid) => DaemonState::Stale(pid),
        None => DaemonState::Stopped,
    }
}

pub fn state() -> DaemonState {
    state_at(&config::pid_path())
}

/// Spawn `run --daemon` detached from this terminal
pub fn start() -> Result<u32> {
    let pid_path = config::pid_path();
    if let DaemonState::Running(pid) = state_at(&pid_path) {
        anyhow::bail!("couch-relay is already running (pid {})", pid);
    }

    let exe = std::env::current_exe().context("Cannot locate the couch-relay binary")?;
    let child = Command::new(exe)
        .args(["run", "--daemon"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn()
        .context("Failed to spawn the daemon")?;

    let pid = child.id();
    write_pid(&pid_path, pid)?;
    Ok(pid)
}

/// SIGTERM the daemon and wait for it to exit. Returns the stopped pid, if any.
pub fn stop() -> Result<Option<u32>> {
    let pid_path = config::pid_path();
    let pid = match state_at(&pid_path) {
        DaemonState::Running(pid) => pid,
        DaemonState::Stale(_) => {
            let _ = std::fs::remove_file(&pid_path);
            return Ok(None);
        }
        DaemonState::Stopped => return Ok(None),
    };

    let target = to_pid(pid).with_context(|| format!("Invalid pid {}", pid))?;
    match kill(target, Signal::SIGTERM) {
        Ok(()) => {}
        Err(Errno::ESRCH) => {
            let _ = std::fs::remove_file(&pid_path);
            return Ok(None);
        }
        Err(e) => return Err(e).with_context(|| format!("Failed to signal pid {}", pid)),
    }

    let deadline = Instant::now() + STOP_GRACE;
    while is_alive(pid) {
        if Instant::now() >= deadline {
            anyhow::bail!("couch-relay (pid {}) did not exit within {:?}", pid, STOP_GRACE);
        }
        std::thread::sleep(Duration::from_millis(200));
    }

    let _ = std::fs::remove_file(&pid_path);
    Ok(Some(pid))
}

/// Remove the pid file if it still names this process
pub fn release_pid_file() {
    let path = config::pid_path();
    if read_pid(&path) == Some(std::process::id()) {
        let _ = std::fs::remove_file(path);
    }
}
