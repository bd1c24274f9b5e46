//! Per-process capability handle: signal, wait, liveness.
//!
//! Wraps either an owned [`tokio::process::Child`] (spawned by this
//! controller) or a bare PID reclaimed from a persisted record after a
//! controller restart. Signals always target the worker's process group
//! so children it spawned are terminated as a unit.

use std::time::Duration;

use tokio::process::Child;

use crate::proc::is_pid_alive;

/// Signal kinds the supervisor delivers. `Terminate` is the cooperative
/// request; `Kill` is the unconditional escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Terminate,
    Kill,
}

/// Handle to one worker process (group).
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    child: Option<Child>,
}

impl ProcessHandle {
    /// Handle for a child this controller spawned and owns.
    pub(crate) fn owned(pid: u32, child: Child) -> Self {
        Self {
            pid,
            child: Some(child),
        }
    }

    /// Handle reconstructed from a persisted record: the process exists
    /// (or existed) but we hold no `Child`, so exit is confirmed by
    /// polling the OS instead of `wait(2)`.
    pub fn reclaimed(pid: u32) -> Self {
        Self { pid, child: None }
    }

    pub fn id(&self) -> u32 {
        self.pid
    }

    /// Deliver `kind` to the worker's process group.
    ///
    /// A process that is already gone (`ESRCH`) is success: the caller
    /// only cares that the group is not running afterwards.
    #[cfg(unix)]
    pub fn signal(&self, kind: SignalKind) -> Result<(), std::io::Error> {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let signal = match kind {
            SignalKind::Terminate => Signal::SIGTERM,
            SignalKind::Kill => Signal::SIGKILL,
        };
        match killpg(Pid::from_raw(self.pid as i32), signal) {
            Ok(()) => Ok(()),
            Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(errno) => Err(std::io::Error::from_raw_os_error(errno as i32)),
        }
    }

    #[cfg(not(unix))]
    pub fn signal(&self, _kind: SignalKind) -> Result<(), std::io::Error> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "process-group signalling is unix-only",
        ))
    }

    /// Is the process currently alive?
    ///
    /// For owned children this uses `try_wait`, which also reaps the
    /// process on exit (no zombies); for reclaimed PIDs it falls back to
    /// the signal-0 probe.
    pub fn is_alive(&mut self) -> bool {
        match &mut self.child {
            Some(child) => match child.try_wait() {
                Ok(Some(_status)) => false,
                Ok(None) => true,
                Err(_) => is_pid_alive(self.pid),
            },
            None => is_pid_alive(self.pid),
        }
    }

    /// Wait up to `limit` for the process to exit. Returns `true` if exit
    /// was confirmed within the limit.
    pub async fn wait_exit(&mut self, limit: Duration) -> bool {
        match &mut self.child {
            Some(child) => match tokio::time::timeout(limit, child.wait()).await {
                // A wait(2) error means the child is not observable;
                // treat it as exited rather than wedging the caller.
                Ok(_) => true,
                Err(_elapsed) => false,
            },
            None => {
                let deadline = tokio::time::Instant::now() + limit;
                loop {
                    if !is_pid_alive(self.pid) {
                        return true;
                    }
                    if tokio::time::Instant::now() >= deadline {
                        return false;
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    async fn spawn_sleep() -> (u32, Child) {
        let mut cmd = tokio::process::Command::new("sleep");
        cmd.arg("100");
        cmd.process_group(0);
        let child = cmd.spawn().expect("spawn sleep");
        let pid = child.id().expect("pid");
        (pid, child)
    }

    #[tokio::test]
    async fn owned_child_terminates_on_signal() {
        let (pid, child) = spawn_sleep().await;
        let mut handle = ProcessHandle::owned(pid, child);
        assert!(handle.is_alive());

        handle.signal(SignalKind::Terminate).expect("signal");
        assert!(handle.wait_exit(Duration::from_secs(5)).await);
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn signalling_a_dead_group_is_not_an_error() {
        let (pid, child) = spawn_sleep().await;
        let mut handle = ProcessHandle::owned(pid, child);
        handle.signal(SignalKind::Kill).expect("kill");
        assert!(handle.wait_exit(Duration::from_secs(5)).await);

        // Group is gone; a second signal must be a no-op success.
        handle.signal(SignalKind::Terminate).expect("re-signal");
    }

    #[tokio::test]
    async fn reclaimed_handle_confirms_exit_by_polling() {
        let (pid, mut child) = spawn_sleep().await;
        let mut handle = ProcessHandle::reclaimed(pid);
        assert!(handle.is_alive());

        child.start_kill().expect("kill");
        child.wait().await.expect("reap");
        assert!(handle.wait_exit(Duration::from_secs(2)).await);
    }
}
