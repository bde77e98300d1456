//! Raw POSIX process-group primitives used by the supervisor's termination
//! state machine and by the spawn path.
#[cfg(unix)]
use std::io;

/// Put the calling process (meant to be called from a `pre_exec` hook, i.e.
/// in the child after `fork` and before `exec`) into a brand new session.
/// `setsid` makes the caller both session leader and process-group leader,
/// so `pgid == pid`: each child is its own group, isolated from the others.
#[cfg(unix)]
pub(crate) fn new_session() -> io::Result<()> {
    let rc = unsafe { libc::setsid() };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(unix)]
pub(crate) fn process_group_id(pid: libc::pid_t) -> io::Result<libc::pid_t> {
    loop {
        let rc = unsafe { libc::getpgid(pid) };
        if rc >= 0 {
            return Ok(rc);
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}

/// `true` if `pid` currently exists (per `kill(pid, 0)`).
#[cfg(unix)]
pub(crate) fn is_alive(pid: libc::pid_t) -> bool {
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

/// Signal a process group. `ProcessLookupError` (ESRCH) is treated as
/// success: the target is already dead, which is the outcome we wanted.
#[cfg(unix)]
pub(crate) fn signal_group(pgid: libc::pid_t, sig: libc::c_int) -> io::Result<()> {
    if pgid <= 0 {
        return Ok(());
    }
    let rc = unsafe { libc::killpg(pgid, sig) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ESRCH) => Ok(()),
        _ => Err(err),
    }
}

/// Signal a single pid. Also treats `ESRCH` as success.
#[cfg(unix)]
pub(crate) fn signal_pid(pid: libc::pid_t, sig: libc::c_int) -> io::Result<()> {
    if pid <= 0 {
        return Ok(());
    }
    let rc = unsafe { libc::kill(pid, sig) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ESRCH) => Ok(()),
        _ => Err(err),
    }
}

/// Signal the process group first, then the bare pid as a fallback, in case
/// the group signal couldn't be delivered but the pid itself still can be.
/// Returns whether at least one delivery attempt succeeded (or the target
/// was already dead); genuine OS errors on both paths surface as `false`
/// and are folded into `terminate()`'s boolean return.
#[cfg(unix)]
pub(crate) fn signal_pgid_and_pid(pgid: libc::pid_t, pid: libc::pid_t, sig: libc::c_int) -> bool {
    let group_ok = signal_group(pgid, sig).is_ok();
    let pid_ok = signal_pid(pid, sig).is_ok();
    group_ok || pid_ok
}

/// Non-blocking `waitpid(WNOHANG)`. `None` means still running; `Some(code)`
/// means reaped (or already gone, in which case `code` is a best-effort 0).
#[cfg(unix)]
pub(crate) fn wait_nonblocking(pid: libc::pid_t) -> Option<i32> {
    let mut raw_status: libc::c_int = 0;
    loop {
        let rc = unsafe { libc::waitpid(pid, &mut raw_status, libc::WNOHANG) };
        if rc == 0 {
            return None;
        }
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            // ECHILD: already reaped elsewhere (or no such child).
            return Some(0);
        }
        return Some(crate::status::exit_code_from_wait_status(raw_status).unwrap_or(0));
    }
}

/// Blocking `waitpid` with no special flags, used once both pipes have hit
/// EOF and the router is ready to reap.
#[cfg(unix)]
pub(crate) fn wait_blocking(pid: libc::pid_t) -> io::Result<i32> {
    let mut raw_status: libc::c_int = 0;
    loop {
        let rc = unsafe { libc::waitpid(pid, &mut raw_status, 0) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ECHILD) => return Ok(0),
                _ => return Err(err),
            }
        }
        return Ok(crate::status::exit_code_from_wait_status(raw_status).unwrap_or(0));
    }
}
