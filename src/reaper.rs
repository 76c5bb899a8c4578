//! The reaper: destroys terminated coroutines and wakes their joiners.
//!
//! A coroutine cannot free its own stack while running on it, so teardown is
//! delegated to this long-lived coroutine in the reserved top-priority
//! bucket. It is spawned on first demand and parks between batches.

use std::cell::RefCell;

use log::trace;

use crate::coro::{self, Coro};
use crate::sched;

thread_local! {
    static REAPER: RefCell<Option<Coro>> = const { RefCell::new(None) };
}

/// Make sure the reaper exists and is scheduled to run.
pub(crate) fn wake() {
    let r = REAPER.with(|slot| {
        let mut slot = slot.borrow_mut();
        slot.get_or_insert_with(spawn_reaper).clone()
    });
    r.ready();
}

fn spawn_reaper() -> Coro {
    let c = Coro::new(run);
    c.set_desc("reaper");
    c.reserved_prio();
    // Transparent with respect to localized slots: passing through the
    // reaper must not disturb values shared between user coroutines.
    c.set_save_flags(crate::locals::SaveFlags::empty());
    trace!("reaper spawned");
    c
}

fn run() {
    loop {
        while let Some(z) = sched::pop_destroy() {
            coro::reap(&z);
        }
        sched::park(None);
    }
}
