//! Default idle behavior when nothing can ever become ready.

use std::process::Command;

/// Not a test to run directly: parked here for the parent test to execute in
/// a subprocess, since detecting a deadlock ends the process.
#[test]
#[ignore]
fn deadlock_victim() {
    strand::spawn(|| strand::Signal::new().wait());
    // The waiter parks on a signal nobody will ever send; with no timers and
    // no fd watches there is nothing left to wake anyone.
    strand::schedule();
}

#[test]
fn deadlock_exits_with_status_51() {
    let exe = std::env::current_exe().expect("test binary path");
    let output = Command::new(exe)
        .args(["deadlock_victim", "--exact", "--ignored", "--nocapture"])
        .output()
        .expect("spawn victim");

    assert_eq!(output.status.code(), Some(strand::event::DEADLOCK_EXIT));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("FATAL: deadlock detected"),
        "unexpected stderr: {stderr}"
    );
}
