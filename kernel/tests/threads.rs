//! Every process runs on a host thread of its own; reaping it must end that thread.

#![cfg(target_os = "linux")]

mod common;

use std::fs;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use common::{Machine, recv};

const CYCLES: usize = 300;

/// Live threads of this test process.
fn threads() -> usize {
    let status = fs::read_to_string("/proc/self/status").expect("read /proc/self/status");
    status
        .lines()
        .find_map(|line| line.strip_prefix("Threads:"))
        .and_then(|count| count.trim().parse().ok())
        .expect("Threads: line")
}

#[test]
fn fork_exit_wait_cycles_keep_thread_count_flat() {
    let (tx, rx) = mpsc::channel();
    let (go, wait_for_go) = mpsc::channel();

    let _machine = Machine::boot(2, move |init| {
        // first cycle starts the kernel threads that live for the whole run
        init.fork(|c| c.exit(0)).unwrap();
        init.wait().unwrap();
        tx.send("warm").unwrap();
        wait_for_go.recv().unwrap();

        for _ in 0..CYCLES {
            init.fork(|c| c.exit(0)).unwrap();
            init.wait().unwrap();
        }
        tx.send("done").unwrap();
    });

    assert_eq!(recv(&rx), "warm");
    let baseline = threads();
    go.send(()).unwrap();
    assert_eq!(recv(&rx), "done");

    // retired threads finish unwinding on their own time
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut live = threads();
    while live > baseline + 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
        live = threads();
    }
    assert!(
        live <= baseline + 2,
        "{live} threads after {CYCLES} cycles, {baseline} before"
    );
}
