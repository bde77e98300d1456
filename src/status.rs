#[cfg(unix)]
pub fn exit_code_from_wait_status(raw_status: libc::c_int) -> Option<i32> {
    if unsafe { libc::WIFEXITED(raw_status) } {
        return Some(unsafe { libc::WEXITSTATUS(raw_status) });
    }

    if unsafe { libc::WIFSIGNALED(raw_status) } {
        let signal = unsafe { libc::WTERMSIG(raw_status) };
        return Some(128 + signal);
    }

    None
}

/// The exit code synthesized for a child that the OS refused to spawn: no
/// `start` event is emitted, just one synthetic `end` with this
/// distinguished, otherwise-unused code.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 255;
