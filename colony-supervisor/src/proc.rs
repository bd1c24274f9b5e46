//! OS-level process probes and group signalling.

/// Check whether a process with the given PID is alive.
///
/// Uses a signal-0 probe, which tests existence without delivering a
/// signal. `EPERM` means the process exists but belongs to another user,
/// so it counts as alive. PID 0 and negative PIDs address process groups,
/// never an individual process, and are never considered alive here.
///
/// A zombie (exited but unreaped) still passes the signal-0 probe even
/// though it will never run again; treating zombies as alive would make
/// the monitor report a crashed worker as healthy forever, so on Linux
/// the process state is read from `/proc/<pid>/stat` and `Z` counts as
/// dead.
#[cfg(unix)]
pub fn is_pid_alive(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }

    let result = unsafe { libc::kill(pid as i32, 0) };
    if result != 0 {
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        return errno == libc::EPERM;
    }

    #[cfg(target_os = "linux")]
    if is_process_zombie(pid) {
        return false;
    }

    true
}

#[cfg(not(unix))]
pub fn is_pid_alive(_pid: u32) -> bool {
    false
}

/// Read the single-letter process state from `/proc/<pid>/stat`.
///
/// The state field follows the parenthesized command name, which may
/// itself contain spaces and parentheses, so parse from the last `)`.
#[cfg(target_os = "linux")]
fn is_process_zombie(pid: u32) -> bool {
    let stat = match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(contents) => contents,
        Err(_) => return false,
    };
    let Some(rest) = stat.rfind(')').map(|idx| &stat[idx + 1..]) else {
        return false;
    };
    matches!(rest.trim_start().chars().next(), Some('Z'))
}
