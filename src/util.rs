//! Process signalling helpers.

/// Send SIGTERM to a process for a graceful shutdown.
///
/// # Returns
/// * `true` - Signal delivered, or the process is already gone
/// * `false` - Failed to signal (permission denied)
pub(crate) fn terminate_process(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, libc::SIGTERM) == 0 || !is_process_alive(pid) }
}

/// Check if a process with the given PID exists.
///
/// Uses `libc::kill(pid, 0)` which sends a null signal to check existence.
pub(crate) fn is_process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}
