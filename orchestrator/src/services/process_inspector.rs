//! OS process introspection and signalling
//!
//! Resource snapshots come from `sysinfo`; signals go through `nix` on unix.
//! Workers run in their own process group (the group id is the worker's
//! pid), so stopping a worker signals the whole group.
//!
//! The `System` is kept between calls: CPU usage is the delta since the
//! previous refresh of the same pid, so the first sample of a process is a
//! baseline and reads 0.

use std::sync::Mutex;
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, System, UpdateKind};
use tokio::time::{sleep, Instant};

use shared::{process_debug, process_warn, ProcessId};

use crate::traits::{ProcessInspector, ResourceSnapshot};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Inspector backed by the live process table
pub struct SystemProcessInspector {
    system: Mutex<System>,
}

impl SystemProcessInspector {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn with_process<T>(
        &self,
        pid: u32,
        refresh: ProcessRefreshKind,
        f: impl FnOnce(&sysinfo::Process) -> T,
    ) -> Option<T> {
        let mut system = self.system.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let pid = Pid::from_u32(pid);
        if !system.refresh_process_specifics(pid, refresh) {
            return None;
        }
        system.process(pid).map(f)
    }

}

impl Default for SystemProcessInspector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ProcessInspector for SystemProcessInspector {
    fn snapshot(&self, pid: u32) -> Option<ResourceSnapshot> {
        self.with_process(pid, resource_refresh(), |process| ResourceSnapshot {
            cpu_percent: process.cpu_usage(),
            memory_mb: process.memory() as f64 / (1024.0 * 1024.0),
            threads: process.tasks().map(|tasks| tasks.len()).unwrap_or(1),
        })
    }

    fn prime(&self, pid: u32) {
        self.with_process(pid, resource_refresh(), |_| ());
    }

    fn command_line(&self, pid: u32) -> Option<String> {
        let refresh = ProcessRefreshKind::new().with_cmd(UpdateKind::Always);
        self.with_process(pid, refresh, |process| process.cmd().join(" "))
    }

    async fn terminate(&self, pid: u32, grace: Duration) -> bool {
        if !send_terminate(pid) {
            return !is_alive(pid);
        }
        if wait_gone(pid, grace).await {
            return true;
        }

        process_warn!(
            ProcessId::current(),
            "🔨 Process {} ignored SIGTERM for {:?}, sending SIGKILL",
            pid,
            grace
        );
        send_kill(pid);
        wait_gone(pid, Duration::from_secs(1)).await
    }
}

fn resource_refresh() -> ProcessRefreshKind {
    ProcessRefreshKind::new().with_cpu().with_memory()
}

async fn wait_gone(pid: u32, within: Duration) -> bool {
    let deadline = Instant::now() + within;
    loop {
        if !is_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(POLL_INTERVAL).await;
    }
}

#[cfg(unix)]
mod platform {
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    fn raw(pid: u32) -> Option<Pid> {
        i32::try_from(pid).ok().filter(|p| *p > 0).map(Pid::from_raw)
    }

    /// Deliver `sig` to a single process; `false` if it does not exist
    pub fn send(pid: u32, sig: Signal) -> bool {
        match raw(pid) {
            Some(pid) => signal::kill(pid, sig).is_ok(),
            None => false,
        }
    }

    /// Deliver `sig` to the process group led by `pid`
    pub fn send_group(pid: u32, sig: Signal) -> bool {
        match raw(pid) {
            Some(pgid) => match signal::killpg(pgid, sig) {
                Ok(()) => true,
                Err(Errno::ESRCH) => false,
                Err(_) => signal::kill(pgid, sig).is_ok(),
            },
            None => false,
        }
    }

    pub fn is_alive(pid: u32) -> bool {
        match raw(pid) {
            Some(pid) => !matches!(signal::kill(pid, None), Err(Errno::ESRCH)),
            None => false,
        }
    }
}

#[cfg(unix)]
pub(crate) fn send_terminate(pid: u32) -> bool {
    platform::send(pid, nix::sys::signal::Signal::SIGTERM)
}

#[cfg(unix)]
pub(crate) fn send_kill(pid: u32) -> bool {
    platform::send(pid, nix::sys::signal::Signal::SIGKILL)
}

/// SIGTERM to a worker's whole process group
#[cfg(unix)]
pub(crate) fn terminate_group(pid: u32) -> bool {
    let sent = platform::send_group(pid, nix::sys::signal::Signal::SIGTERM);
    process_debug!(ProcessId::current(), "Sent SIGTERM to process group {} ({})", pid, sent);
    sent
}

/// SIGKILL to a worker's whole process group
#[cfg(unix)]
pub(crate) fn kill_group(pid: u32) -> bool {
    platform::send_group(pid, nix::sys::signal::Signal::SIGKILL)
}

#[cfg(unix)]
pub(crate) fn is_alive(pid: u32) -> bool {
    platform::is_alive(pid)
}

#[cfg(not(unix))]
pub(crate) fn send_terminate(pid: u32) -> bool {
    send_kill(pid)
}

#[cfg(not(unix))]
pub(crate) fn send_kill(pid: u32) -> bool {
    let mut system = System::new();
    let pid = Pid::from_u32(pid);
    system.refresh_process(pid);
    system.process(pid).map(|p| p.kill()).unwrap_or(false)
}

#[cfg(not(unix))]
pub(crate) fn terminate_group(pid: u32) -> bool {
    send_kill(pid)
}

#[cfg(not(unix))]
pub(crate) fn kill_group(pid: u32) -> bool {
    send_kill(pid)
}

#[cfg(not(unix))]
pub(crate) fn is_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_process(Pid::from_u32(pid))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    #[tokio::test]
    async fn test_command_line_and_terminate() {
        let mut child = Command::new("sleep")
            .arg("300")
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        let inspector = SystemProcessInspector::new();

        let cmd = inspector.command_line(pid).unwrap();
        assert!(cmd.contains("sleep"));
        assert!(inspector.snapshot(pid).is_some());

        // reap concurrently so the pid disappears once signalled
        let reaper = tokio::spawn(async move { child.wait().await });
        assert!(inspector.terminate(pid, Duration::from_secs(5)).await);
        reaper.await.unwrap().unwrap();

        assert!(inspector.command_line(pid).is_none());
    }

    #[tokio::test]
    async fn test_cpu_usage_measured_after_baseline() {
        let mut child = Command::new("sh")
            .args(["-c", "while :; do :; done"])
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        let inspector = SystemProcessInspector::new();

        inspector.prime(pid);
        sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL * 3).await;
        let snapshot = inspector.snapshot(pid).unwrap();

        assert!(snapshot.cpu_percent > 0.0, "busy loop should show CPU use: {snapshot:?}");
        assert!(snapshot.memory_mb > 0.0);

        child.kill().await.unwrap();
    }

    #[test]
    fn test_unknown_pid() {
        let inspector = SystemProcessInspector::new();
        assert!(inspector.snapshot(u32::MAX - 1).is_none());
        assert!(!is_alive(u32::MAX - 1));
    }
}
