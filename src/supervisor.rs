//! The supervisor: command table, launch sequencing, dependency gate,
//! redirect-fabric wiring, and the two-phase termination state machine.

use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use indexmap::IndexMap;

use crate::child::{ChildState, ManagedChild, StopFlag};
use crate::formatter::Formatter;
use crate::job_control;
use crate::parser::{CommandSpec, Stream};
use crate::probe;
use crate::redirect::{self, PumpSource};
use crate::status::SPAWN_FAILURE_EXIT_CODE;

const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(5);
const FORCE_TIMEOUT: Duration = Duration::from_secs(2);
const POLL_RESOLUTION: Duration = Duration::from_millis(100);

pub struct Supervisor {
    commands: IndexMap<String, Arc<ManagedChild>>,
    formatter: Arc<Formatter>,
    stop: Arc<StopFlag>,
    gate_handles: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl Supervisor {
    /// Registers every spec, wires redirect-consumer flags, then spawns one
    /// gate thread per child. Keys absent from the grammar get the spec's
    /// ordinal in `specs`.
    pub fn launch_batch(specs: Vec<CommandSpec>, formatter: Arc<Formatter>) -> Arc<Supervisor> {
        let mut commands = IndexMap::new();
        for (index, spec) in specs.into_iter().enumerate() {
            let key = spec.key.clone().unwrap_or_else(|| index.to_string());
            commands.insert(key.clone(), Arc::new(ManagedChild::new(key, spec)));
        }

        wire_consumer_flags(&commands);

        let supervisor = Arc::new(Supervisor {
            commands,
            formatter,
            stop: Arc::new(StopFlag::new()),
            gate_handles: Mutex::new(Vec::new()),
        });

        let keys: Vec<String> = supervisor.commands.keys().cloned().collect();
        let mut handles = supervisor.gate_handles.lock().unwrap();
        for key in keys {
            let supervisor = Arc::clone(&supervisor);
            handles.push(std::thread::spawn(move || run_gate(supervisor, key)));
        }
        drop(handles);

        supervisor
    }

    pub fn install_signal_handler(self: &Arc<Self>) -> Result<(), ctrlc::Error> {
        let supervisor = Arc::clone(self);
        ctrlc::set_handler(move || {
            log::info!("signal received, propagating shutdown");
            supervisor.propagate_signal(libc::SIGTERM);
            if !supervisor.terminate(true, GRACEFUL_TIMEOUT) {
                supervisor.terminate(false, FORCE_TIMEOUT);
            }
            supervisor.join(Some(FORCE_TIMEOUT));
            std::process::exit(0);
        })
    }

    fn propagate_signal(&self, sig: libc::c_int) {
        for child in self.commands.values() {
            if let Some(pgid) = *child.pgid.lock().unwrap() {
                let pid = child.pid.lock().unwrap().unwrap_or(pgid);
                job_control::signal_pgid_and_pid(pgid, pid, sig);
            }
        }
    }

    /// Two-phase shutdown. `graceful=false` skips straight to the force
    /// phase. Returns whether every target reached `ended` within budget.
    pub fn terminate(&self, graceful: bool, timeout: Duration) -> bool {
        let sig = if graceful { libc::SIGTERM } else { libc::SIGKILL };
        let deadline = Instant::now() + timeout;

        loop {
            let mut all_ended = true;
            for child in self.commands.values() {
                if child.is_ended() {
                    continue;
                }
                all_ended = false;
                let Some(pgid) = *child.pgid.lock().unwrap() else {
                    continue;
                };
                let pid = child.pid.lock().unwrap().unwrap_or(pgid);
                job_control::signal_pgid_and_pid(pgid, pid, sig);
                for descendant in probe::descendants_of(pgid) {
                    job_control::signal_pid(descendant, sig).ok();
                }
            }
            if all_ended {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(POLL_RESOLUTION);
        }
    }

    /// Waits until every child reaches `ended` or `timeout` elapses, reaping
    /// zombies with non-blocking `waitpid` along the way — a child whose
    /// grandchild inherited its stdio can sit as a zombie long after its
    /// pipes go quiet, and only this loop ever notices. `claim_reap` keeps
    /// this from racing the child's own gate thread over who actually calls
    /// `waitpid` on the same pid. Returns the keys still active when it
    /// gave up.
    pub fn join(&self, timeout: Option<Duration>) -> Vec<String> {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            let mut active = Vec::new();
            for child in self.commands.values() {
                if child.is_ended() {
                    continue;
                }
                if let Some(pid) = *child.pid.lock().unwrap() {
                    if child.claim_reap() {
                        match job_control::wait_nonblocking(pid) {
                            Some(code) => {
                                self.finish_child(child, code);
                                continue;
                            }
                            None => child.release_reap_claim(),
                        }
                    }
                }
                active.push(child.key.clone());
            }
            if active.is_empty() {
                return active;
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return active;
                }
            }
            std::thread::sleep(POLL_RESOLUTION.min(Duration::from_secs(1)));
        }
    }

    pub fn stop_flag(&self) -> Arc<StopFlag> {
        Arc::clone(&self.stop)
    }

    /// Records a child's exit code, flips it to `ended`, emits its `end`
    /// line, and runs the `|end` global-shutdown action if it carries one.
    /// Called exactly once per child, by whichever side won `claim_reap`.
    fn finish_child(&self, child: &Arc<ManagedChild>, exit_code: i32) {
        *child.exit_status.lock().unwrap() = Some(exit_code);
        child.set_state(ChildState::Ended);
        child.ended_latch.fire();
        if !child.spec.is_silent() {
            self.formatter.end(&child.key, child.color(), exit_code);
        }

        if child.spec.ends_supervisor() {
            self.stop.set();
            if !self.terminate(true, GRACEFUL_TIMEOUT) {
                self.terminate(false, FORCE_TIMEOUT);
            }
        }
    }
}

/// Marks, on every child referenced by a sibling's `Redirect`, that its
/// stdout/stderr has a consumer — the router only buffers a stream when
/// this is set.
fn wire_consumer_flags(commands: &IndexMap<String, Arc<ManagedChild>>) {
    for child in commands.values() {
        let Some(redirect) = &child.spec.redirects else {
            continue;
        };
        for source in &redirect.sources {
            let Some(target) = commands.get(&source.key) else {
                log::warn!(
                    "{}: redirect references unknown key '{}'",
                    child.key,
                    source.key
                );
                continue;
            };
            match source.stream {
                Stream::Stdout => target.stdout_has_consumer.store(true, Ordering::SeqCst),
                Stream::Stderr => target.stderr_has_consumer.store(true, Ordering::SeqCst),
            }
        }
    }
}

fn sleep_cancelable(duration: Duration, stop: &StopFlag) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        if stop.is_set() {
            return;
        }
        std::thread::sleep(POLL_RESOLUTION.min(deadline - Instant::now()));
    }
}

/// Blocks until `stop` is set. Used when a dependency/redirect names a key
/// absent from the command table — the referenced state can never arrive.
fn block_forever(stop: &StopFlag) {
    while !stop.is_set() {
        std::thread::sleep(POLL_RESOLUTION);
    }
}

fn wait_start_on_output(
    commands: &IndexMap<String, Arc<ManagedChild>>,
    start_on_output: &crate::parser::StartOnOutput,
    stop: &Arc<StopFlag>,
) {
    if start_on_output.sources.is_empty() {
        return;
    }

    let (tx, rx) = mpsc::channel();
    let mut handles = Vec::new();
    for source in &start_on_output.sources {
        let Some(target) = commands.get(&source.key).cloned() else {
            log::warn!("start-on-output references unknown key '{}'", source.key);
            continue;
        };
        let tx = tx.clone();
        let stop = Arc::clone(stop);
        let stream = source.stream;
        handles.push(std::thread::spawn(move || {
            let latch = match stream {
                Stream::Stdout => &target.first_stdout_latch,
                Stream::Stderr => &target.first_stderr_latch,
            };
            latch.wait(&stop);
            if latch.is_fired() {
                let _ = tx.send(());
            }
        }));
    }
    drop(tx);

    loop {
        if stop.is_set() {
            break;
        }
        match rx.recv_timeout(POLL_RESOLUTION) {
            Ok(()) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    for handle in handles {
        let _ = handle.join();
    }
}

/// One child's full lifecycle: gate, spawn, drain, reap. Runs on its own
/// thread for the lifetime of the child (spec's thread-per-child model).
fn run_gate(supervisor: Arc<Supervisor>, key: String) {
    let child = Arc::clone(&supervisor.commands[&key]);

    if child.spec.start_delay > 0.0 {
        child.set_state(ChildState::Delayed);
        sleep_cancelable(Duration::from_secs_f64(child.spec.start_delay), &supervisor.stop);
    }
    if supervisor.stop.is_set() {
        return;
    }

    if !child.spec.dependencies.is_empty() || child.spec.start_on_output.is_some() {
        child.set_state(ChildState::WaitingDeps);
    }

    for dependency in &child.spec.dependencies {
        match supervisor.commands.get(&dependency.key) {
            Some(target) => {
                let latch = if dependency.wait_for_start {
                    &target.started_latch
                } else {
                    &target.ended_latch
                };
                latch.wait(&supervisor.stop);
            }
            None => {
                log::warn!("{key}: dependency references unknown key '{}'", dependency.key);
                block_forever(&supervisor.stop);
            }
        }
        if supervisor.stop.is_set() {
            return;
        }
        let delay: f64 = dependency.delays.iter().sum();
        if delay > 0.0 {
            sleep_cancelable(Duration::from_secs_f64(delay), &supervisor.stop);
        }
        if supervisor.stop.is_set() {
            return;
        }
    }

    if let Some(start_on_output) = &child.spec.start_on_output {
        wait_start_on_output(&supervisor.commands, start_on_output, &supervisor.stop);
    }
    if supervisor.stop.is_set() {
        return;
    }

    child.set_state(ChildState::Launching);
    spawn_and_run(&supervisor, &child);
}

fn spawn_and_run(supervisor: &Arc<Supervisor>, child: &Arc<ManagedChild>) {
    let stdin_reader = match &child.spec.redirects {
        Some(redirect) => {
            let Ok((reader, writer)) = os_pipe::pipe() else {
                log::error!("{}: failed to create redirect pipe", child.key);
                finish_spawn_failure(supervisor, child);
                return;
            };
            let sources = redirect
                .sources
                .iter()
                .filter_map(|source| {
                    supervisor
                        .commands
                        .get(&source.key)
                        .cloned()
                        .map(|target| PumpSource {
                            child: target,
                            stream: source.stream,
                        })
                })
                .collect::<Vec<_>>();
            let stop = supervisor.stop_flag();
            std::thread::spawn(move || redirect::run_pump(sources, writer, stop));
            Some(reader)
        }
        None => None,
    };

    let mut command = Command::new(&child.spec.argv[0]);
    command.args(&child.spec.argv[1..]);
    command.stdout(Stdio::piped()).stderr(Stdio::piped());
    match stdin_reader {
        Some(reader) => {
            command.stdin(reader);
        }
        None => {
            command.stdin(Stdio::null());
        }
    }

    unsafe {
        command.pre_exec(|| crate::job_control::new_session());
    }

    let mut spawned = match command.spawn() {
        Ok(process) => process,
        Err(err) => {
            log::warn!("{}: failed to spawn: {err}", child.key);
            finish_spawn_failure(supervisor, child);
            return;
        }
    };

    let pid = spawned.id() as libc::pid_t;
    *child.pid.lock().unwrap() = Some(pid);
    *child.pgid.lock().unwrap() = Some(pid); // setsid() makes pgid == pid

    child.set_state(ChildState::Running);
    child.started_latch.fire();
    if !child.spec.is_silent() {
        supervisor
            .formatter
            .start(&child.key, child.color(), &child.spec.argv);
    }

    let stdout = spawned.stdout.take().expect("piped stdout");
    let stderr = spawned.stderr.take().expect("piped stderr");
    crate::router::drain(child, stdout, stderr, &supervisor.formatter);

    child.set_state(ChildState::Ending);
    reap_and_finish(supervisor, child, pid);
}

/// Reaps `pid` if this thread wins the race against `Supervisor::join`'s
/// background reaper, otherwise waits for whoever won to finish instead of
/// calling `waitpid` itself (which would just see `ECHILD`).
fn reap_and_finish(supervisor: &Arc<Supervisor>, child: &Arc<ManagedChild>, pid: libc::pid_t) {
    if child.claim_reap() {
        let exit_code = job_control::wait_blocking(pid).unwrap_or(0);
        supervisor.finish_child(child, exit_code);
    } else {
        while !child.is_ended() {
            std::thread::sleep(POLL_RESOLUTION);
        }
    }
}

fn finish_spawn_failure(supervisor: &Arc<Supervisor>, child: &Arc<ManagedChild>) {
    supervisor.finish_child(child, SPAWN_FAILURE_EXIT_CODE);
}
