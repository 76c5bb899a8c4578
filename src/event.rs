//! The event-loop bridge: what runs when nothing is ready.
//!
//! The scheduler's idle hook is replaceable (see [`crate::sched::set_idle`]).
//! External reactor adapters install a hook that drains pending zero-delay
//! callbacks, blocks the reactor until the next timer deadline, and
//! dispatches ready I/O callbacks, each typically calling `ready()` on one
//! coroutine. The dual "prepare" contract: before such a reactor blocks, it
//! must return immediately while [`crate::sched::nready`] is non-zero, so
//! runnable coroutines are never parked behind a sleeping reactor.
//!
//! The built-in default implemented here drives the crate's own timer heap
//! and fd reactor. With neither timers nor watches pending there is nothing
//! that could ever wake a coroutine again: that is a deadlock, reported and
//! escalated to a process exit.

use std::process;
use std::time::Instant;

use log::debug;

use crate::{netpoll, timer};

/// Process exit status used when the runtime detects a deadlock.
pub const DEADLOCK_EXIT: i32 = 51;

/// One round of the built-in idle driver.
///
/// Fires due timers, blocks the reactor until the next deadline (or
/// indefinitely when only fd watches are pending), then fires whatever
/// became due meanwhile. Invoked by `schedule` in a loop until some
/// coroutine is ready.
pub(crate) fn idle_default() {
    timer::fire_due();

    let deadline = timer::next_deadline();
    let has_io = netpoll::has_waiters();

    if deadline.is_none() && !has_io {
        deadlock();
    }

    let timeout_ms = match deadline {
        Some(at) => clamp_timeout(at),
        None => -1,
    };

    if has_io {
        netpoll::poll(timeout_ms);
    } else if timeout_ms > 0 {
        // Timers only; nothing can signal earlier than the deadline.
        std::thread::sleep(std::time::Duration::from_millis(timeout_ms as u64));
    }

    timer::fire_due();
}

/// Milliseconds until `at`, rounded up so a near-deadline never busy-spins,
/// clamped to a bounded poll interval.
fn clamp_timeout(at: Instant) -> i32 {
    let now = Instant::now();
    if at <= now {
        return 0;
    }
    let micros = (at - now).as_micros();
    micros.div_ceil(1000).min(60_000) as i32
}

fn deadlock() -> ! {
    debug!("no ready coroutines, no timers, no watches");
    eprintln!("FATAL: deadlock detected");
    process::exit(DEADLOCK_EXIT);
}
