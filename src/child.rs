//! `ManagedChild`: the supervisor's bookkeeping record for one running
//! command, plus the small synchronization primitives (`Latch`, `StopFlag`,
//! `StreamBuffer`) the gate, router, and redirect pump share.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::parser::CommandSpec;

/// Soft cap on a source stream's unread backlog. Past this, the buffer
/// keeps growing rather than dropping bytes a lagging pump hasn't read yet —
/// see DESIGN.md for why eviction isn't implemented.
const STREAM_BUFFER_SOFT_CAP: usize = 8 * 1024 * 1024;

/// Global cooperative-cancellation flag: gate waits and pump loops check
/// this between blocking operations so a termination aborts them cleanly.
#[derive(Default)]
pub struct StopFlag(AtomicBool);

impl StopFlag {
    pub fn new() -> Self {
        StopFlag(AtomicBool::new(false))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A one-shot event latch, pollable with a bounded wait so waiters can also
/// observe a `StopFlag`.
pub struct Latch {
    fired: Mutex<bool>,
    cv: Condvar,
}

impl Latch {
    pub fn new() -> Self {
        Latch {
            fired: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    pub fn fire(&self) {
        let mut guard = self.fired.lock().unwrap();
        if !*guard {
            *guard = true;
            self.cv.notify_all();
        }
    }

    pub fn is_fired(&self) -> bool {
        *self.fired.lock().unwrap()
    }

    /// Block until fired or `stop` is set, polling every 100 ms (spec's
    /// default timeout resolution).
    pub fn wait(&self, stop: &StopFlag) {
        let mut guard = self.fired.lock().unwrap();
        while !*guard && !stop.is_set() {
            let (next, _) = self
                .cv
                .wait_timeout(guard, Duration::from_millis(100))
                .unwrap();
            guard = next;
        }
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

/// Append-only per-stream byte log with independent reader cursors, so
/// several redirect consumers can each drain the same source stream at
/// their own pace.
#[derive(Default)]
pub struct StreamBuffer {
    data: Mutex<VecDeque<u8>>,
    ended: AtomicBool,
}

impl StreamBuffer {
    pub fn push(&self, chunk: &[u8]) {
        let mut data = self.data.lock().unwrap();
        data.extend(chunk.iter().copied());
        if data.len() > STREAM_BUFFER_SOFT_CAP {
            log::warn!(
                "stream buffer exceeds {} bytes; a redirect consumer is falling behind",
                STREAM_BUFFER_SOFT_CAP
            );
        }
    }

    pub fn mark_ended(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }

    pub fn has_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Bytes available at or after absolute offset `from`, and the new
    /// offset to pass on the next call.
    pub fn read_since(&self, from: u64) -> (Vec<u8>, u64) {
        let data = self.data.lock().unwrap();
        let total_len = data.len() as u64;
        if from >= total_len {
            return (Vec::new(), total_len);
        }
        let skip = from as usize;
        let chunk: Vec<u8> = data.iter().skip(skip).copied().collect();
        (chunk, total_len)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    Pending,
    Delayed,
    WaitingDeps,
    Launching,
    Running,
    Ending,
    Ended,
}

/// Supervisor-owned record for one child. Cheap fields use plain `Mutex`es;
/// readers (router, pump) only ever touch their own child's record.
pub struct ManagedChild {
    pub key: String,
    pub spec: CommandSpec,
    pub state: Mutex<ChildState>,
    pub pid: Mutex<Option<libc::pid_t>>,
    pub pgid: Mutex<Option<libc::pid_t>>,
    pub exit_status: Mutex<Option<i32>>,
    pub started_latch: Latch,
    pub ended_latch: Latch,
    pub first_stdout_latch: Latch,
    pub first_stderr_latch: Latch,
    pub stdout_buf: StreamBuffer,
    pub stderr_buf: StreamBuffer,
    /// Set by the supervisor during wiring if some sibling's `Redirect`
    /// reads this child's stdout/stderr — gates whether the router bothers
    /// buffering chunks at all.
    pub stdout_has_consumer: AtomicBool,
    pub stderr_has_consumer: AtomicBool,
    /// Guards which of the gate thread or `Supervisor::join`'s background
    /// reaper actually calls `waitpid` on this child's pid — both would
    /// otherwise race to reap it, and the loser would see `ECHILD` and
    /// report a bogus exit code. Whoever wins `claim_reap` owns the reap;
    /// the other side just waits for `state` to reach `Ended`.
    reap_claimed: AtomicBool,
}

impl ManagedChild {
    pub fn new(key: String, spec: CommandSpec) -> Self {
        ManagedChild {
            key,
            spec,
            state: Mutex::new(ChildState::Pending),
            pid: Mutex::new(None),
            pgid: Mutex::new(None),
            exit_status: Mutex::new(None),
            started_latch: Latch::new(),
            ended_latch: Latch::new(),
            first_stdout_latch: Latch::new(),
            first_stderr_latch: Latch::new(),
            stdout_buf: StreamBuffer::default(),
            stderr_buf: StreamBuffer::default(),
            stdout_has_consumer: AtomicBool::new(false),
            stderr_has_consumer: AtomicBool::new(false),
            reap_claimed: AtomicBool::new(false),
        }
    }

    /// Attempt to become this child's sole reaper. Returns `true` exactly
    /// once per actual exit; a caller that loses must not call `waitpid`
    /// itself, it should wait for the winner to publish `exit_status`.
    pub fn claim_reap(&self) -> bool {
        !self.reap_claimed.swap(true, Ordering::SeqCst)
    }

    /// Give up a claim taken speculatively (e.g. a non-blocking reap attempt
    /// found the child still running) so another caller can try later.
    pub fn release_reap_claim(&self) {
        self.reap_claimed.store(false, Ordering::SeqCst);
    }

    pub fn set_state(&self, state: ChildState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn state(&self) -> ChildState {
        *self.state.lock().unwrap()
    }

    pub fn is_ended(&self) -> bool {
        matches!(self.state(), ChildState::Ended)
    }

    pub fn color(&self) -> Option<&str> {
        self.spec.color.as_deref()
    }
}
