//! Time-ordered wakeups.
//!
//! A min-heap of `(deadline, coroutine)` entries serviced by the idle driver.
//! `sleep` parks the current coroutine; handle timeouts insert keyed entries
//! they can cancel on the non-timeout exit paths, and coroutine cancellation
//! removes its entry through the park hook.

use std::cell::{Cell, RefCell};
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use log::trace;

use crate::coro::Coro;
use crate::sched;

/// Identifies one heap entry for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimerKey(u64);

struct Entry {
    at: Instant,
    seq: u64,
    coro: Coro,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Entry {}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse order for a min-heap: earliest deadline first, insertion
        // order as the tiebreak.
        (other.at, other.seq).cmp(&(self.at, self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

thread_local! {
    static HEAP: RefCell<BinaryHeap<Entry>> = RefCell::new(BinaryHeap::new());
    static NEXT_SEQ: Cell<u64> = const { Cell::new(0) };
}

/// Register a wakeup for `coro` at `at`.
pub(crate) fn insert(at: Instant, coro: Coro) -> TimerKey {
    let seq = NEXT_SEQ.with(|s| {
        let v = s.get();
        s.set(v + 1);
        v
    });
    HEAP.with(|h| h.borrow_mut().push(Entry { at, seq, coro }));
    TimerKey(seq)
}

/// Remove an entry before it fires; a no-op if it already fired.
pub(crate) fn cancel(key: TimerKey) {
    HEAP.with(|h| h.borrow_mut().retain(|e| e.seq != key.0));
}

/// Earliest pending deadline, if any.
pub(crate) fn next_deadline() -> Option<Instant> {
    HEAP.with(|h| h.borrow().peek().map(|e| e.at))
}

/// Ready every coroutine whose deadline has passed.
pub(crate) fn fire_due() {
    let now = Instant::now();
    let due = HEAP.with(|h| {
        let mut h = h.borrow_mut();
        let mut due = Vec::new();
        while let Some(e) = h.peek() {
            if e.at > now {
                break;
            }
            due.push(h.pop().unwrap().coro);
        }
        due
    });
    // Heap borrow released: `ready` may re-enter through a reactor hook.
    for c in due {
        trace!("timer fired for {:?}", c);
        c.ready();
    }
}

/// Suspend the current coroutine until `deadline`.
pub fn sleep_until(deadline: Instant) {
    let me = sched::current();
    let key = insert(deadline, me);
    sched::park(Some(Box::new(move || cancel(key))));
}

/// Suspend the current coroutine for `duration`.
pub fn sleep(duration: Duration) {
    sleep_until(Instant::now() + duration);
}
