//! End-to-end scenarios driving the compiled binary.

use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

fn run(args: &[&str]) -> (std::process::Output, Duration) {
    let start = Instant::now();
    let output = Command::new(env!("CARGO_BIN_EXE_multiplex"))
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .expect("spawn multiplex");
    (output, start.elapsed())
}

#[test]
fn dependency_end_wait_orders_output_after_predecessor_ends() {
    let (output, elapsed) = run(&["A=sleep 0.5", "B:A=echo hi"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    let a_end = stdout.find("=\u{2502}A\u{2502}").expect("A's end line");
    let b_start = stdout.find("$\u{2502}B\u{2502}").expect("B's start line");
    assert!(a_end < b_start, "B started before A ended:\n{stdout}");
    assert!(
        elapsed >= Duration::from_millis(500) && elapsed <= Duration::from_millis(1200),
        "wall time {elapsed:?} outside [0.5s, 1.2s]"
    );
}

#[test]
fn dependency_start_wait_releases_as_soon_as_predecessor_starts() {
    let (output, _) = run(&["A=sh -c 'sleep 1; echo done'", "B:A&=echo hi"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    let a_start = stdout.find("$\u{2502}A\u{2502}").expect("A's start line");
    let b_start = stdout.find("$\u{2502}B\u{2502}").expect("B's start line");
    assert!(a_start < b_start, "B started before A:\n{stdout}");
    assert!(stdout.contains("<\u{2502}B\u{2502}hi"));
    assert!(stdout.contains("<\u{2502}A\u{2502}done"));
}

#[test]
fn redirect_fabric_pipes_source_stdout_into_consumer_stdin() {
    let (output, _) = run(&[r"A=printf 'one\ntwo\n'", "B<A=cat"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    let b_one = stdout.find("<\u{2502}B\u{2502}one").expect("B saw 'one'");
    let b_two = stdout.find("<\u{2502}B\u{2502}two").expect("B saw 'two'");
    assert!(b_one < b_two, "redirected bytes arrived out of order:\n{stdout}");
}

#[test]
fn timeout_flag_terminates_long_running_child() {
    let (output, elapsed) = run(&["-t", "1", "sleep 30"]);
    assert!(
        elapsed <= Duration::from_millis(1500),
        "took too long to terminate: {elapsed:?}"
    );
    assert!(output.status.success());
}

#[test]
fn relative_timestamp_prefixes_the_start_line() {
    let (output, _) = run(&["--time=relative", "echo hi"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let start_line = stdout
        .lines()
        .find(|line| line.contains("\u{2502}$\u{2502}0\u{2502}echo hi") || line.contains("$\u{2502}0\u{2502}echo hi"))
        .expect("start line present");
    assert!(start_line.starts_with("00:00:0"), "line was: {start_line}");
}

#[test]
fn end_action_triggers_global_termination() {
    let (output, elapsed) = run(&["|end=sleep 0.2", "sleep 30"]);
    assert!(
        elapsed <= Duration::from_millis(800),
        "global shutdown took too long: {elapsed:?}"
    );
    assert!(output.status.success());
}

#[test]
fn parse_only_prints_fields_and_exits_without_launching() {
    let start = Instant::now();
    let output = Command::new(env!("CARGO_BIN_EXE_multiplex"))
        .args(["-p", "worker#blue:A+1s|silent=python script.py"])
        .output()
        .expect("spawn multiplex");
    assert!(output.status.success());
    assert!(start.elapsed() < Duration::from_secs(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("worker"));
    assert!(stdout.contains("script.py"));
}
