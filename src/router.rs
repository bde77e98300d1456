//! Output router: drains a child's stdout/stderr via `poll(2)`, fans each
//! chunk out to the stream buffer (for the redirect fabric), the
//! first-output latch, and the formatter.

use std::io::Read;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;

use crate::child::ManagedChild;
use crate::formatter::Formatter;

const READ_CHUNK: usize = 64 * 1024;

enum Slot {
    Stdout,
    Stderr,
}

/// Blocks until both stdout and stderr have hit EOF, fanning out every
/// chunk read along the way. Returns once there is nothing left to drain;
/// the caller is responsible for reaping the process afterward.
pub fn drain(
    child: &Arc<ManagedChild>,
    mut stdout: std::process::ChildStdout,
    mut stderr: std::process::ChildStderr,
    formatter: &Formatter,
) {
    let stdout_fd = stdout.as_raw_fd();
    let stderr_fd = stderr.as_raw_fd();

    let mut watching_stdout = true;
    let mut watching_stderr = true;
    let mut buf = vec![0u8; READ_CHUNK];

    while watching_stdout || watching_stderr {
        let mut pollfds = Vec::with_capacity(2);
        let mut slots = Vec::with_capacity(2);
        if watching_stdout {
            pollfds.push(make_pollfd(stdout_fd));
            slots.push(Slot::Stdout);
        }
        if watching_stderr {
            pollfds.push(make_pollfd(stderr_fd));
            slots.push(Slot::Stderr);
        }

        let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, 100) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            break;
        }
        if rc == 0 {
            continue; // timed out, nothing ready — loop back and re-poll
        }

        for (pollfd, slot) in pollfds.iter().zip(slots.iter()) {
            if pollfd.revents == 0 {
                continue;
            }
            match slot {
                Slot::Stdout => {
                    if !read_and_fan_out(&mut stdout, &mut buf, child, formatter, true) {
                        watching_stdout = false;
                    }
                }
                Slot::Stderr => {
                    if !read_and_fan_out(&mut stderr, &mut buf, child, formatter, false) {
                        watching_stderr = false;
                    }
                }
            }
        }
    }

    child.stdout_buf.mark_ended();
    child.stderr_buf.mark_ended();
}

fn make_pollfd(fd: RawFd) -> libc::pollfd {
    libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    }
}

/// Reads one chunk (up to 64 KiB) and fans it out. Returns `false` on EOF
/// or a read error, signaling the caller to stop watching this fd.
fn read_and_fan_out(
    reader: &mut impl Read,
    buf: &mut [u8],
    child: &Arc<ManagedChild>,
    formatter: &Formatter,
    is_stdout: bool,
) -> bool {
    let n = match reader.read(buf) {
        Ok(0) => return false,
        Ok(n) => n,
        Err(_) => return false,
    };

    let chunk = &buf[..n];
    let key = &child.key;
    let color = child.color();

    if is_stdout {
        if child.stdout_has_consumer.load(std::sync::atomic::Ordering::SeqCst) {
            child.stdout_buf.push(chunk);
        }
        child.first_stdout_latch.fire();
        if !child.spec.is_silent() {
            formatter.out(key, color, chunk);
        }
    } else {
        if child.stderr_has_consumer.load(std::sync::atomic::Ordering::SeqCst) {
            child.stderr_buf.push(chunk);
        }
        child.first_stderr_latch.fire();
        if !child.spec.is_silent() {
            formatter.err(key, color, chunk);
        }
    }

    true
}
