//! The scheduler: per-priority ready queues and the transfer machinery.
//!
//! One scheduler instance exists per runtime thread. Exactly one coroutine is
//! `Running` at any time; `schedule` suspends it, picks the head of the
//! highest non-empty priority bucket and transfers there. With nothing ready
//! the idle hook runs, which by default drives the timer heap and the
//! reactor, and aborts the process on a genuine deadlock.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use libc::c_int;
use log::trace;

use crate::coro::{Coro, State};
use crate::event;
use crate::locals;
use crate::reaper;
use crate::value::IntoValues;

/// Lowest selectable priority.
pub const PRIO_MIN: i32 = -4;
/// Background work.
pub const PRIO_IDLE: i32 = -3;
/// Below normal.
pub const PRIO_LOW: i32 = -1;
/// Default priority for new coroutines.
pub const PRIO_NORMAL: i32 = 0;
/// Above normal.
pub const PRIO_HIGH: i32 = 1;
/// Highest selectable priority.
pub const PRIO_MAX: i32 = 3;

/// Internal bucket above `PRIO_MAX`, reserved for the reaper.
pub(crate) const PRIO_RESERVED: i32 = PRIO_MAX + 1;

const NBUCKETS: usize = (PRIO_RESERVED - PRIO_MIN + 1) as usize;

struct Sched {
    /// One FIFO per priority level, `PRIO_MIN` at index 0.
    run_q: RefCell<[VecDeque<Coro>; NBUCKETS]>,
    /// Count of `Ready` coroutines across all buckets.
    nready: Cell<c_int>,
    current: RefCell<Coro>,
    /// Replaceable idle hook; `None` selects the built-in driver.
    idle: RefCell<Option<Box<dyn FnMut()>>>,
    /// Zombies awaiting the reaper.
    destroy: RefCell<Vec<Coro>>,
}

thread_local! {
    static SCHED: Sched = Sched {
        run_q: RefCell::new(std::array::from_fn(|_| VecDeque::new())),
        nready: Cell::new(0),
        current: RefCell::new(Coro::main()),
        idle: RefCell::new(None),
        destroy: RefCell::new(Vec::new()),
    };
}

fn bucket(prio: i32) -> usize {
    (prio - PRIO_MIN) as usize
}

/// The currently running coroutine.
pub fn current() -> Coro {
    SCHED.with(|s| s.current.borrow().clone())
}

/// Number of `Ready` coroutines. An event-loop "prepare" hook must return
/// immediately while this is non-zero so runnable work is never starved by a
/// blocking reactor.
pub fn nready() -> usize {
    SCHED.with(|s| s.nready.get() as usize)
}

pub(crate) fn nready_ptr() -> *const c_int {
    SCHED.with(|s| &s.nready as *const Cell<c_int> as *const c_int)
}

pub(crate) fn enqueue(c: Coro) {
    SCHED.with(|s| {
        let prio = c.inner.borrow().prio;
        s.run_q.borrow_mut()[bucket(prio)].push_back(c);
        s.nready.set(s.nready.get() + 1);
    })
}

/// Remove a `Ready` coroutine from its bucket (cancellation path).
pub(crate) fn dequeue(c: &Coro) {
    SCHED.with(|s| {
        let mut q = s.run_q.borrow_mut();
        for bucket in q.iter_mut() {
            let before = bucket.len();
            bucket.retain(|x| !x.ptr_eq(c));
            if bucket.len() != before {
                s.nready.set(s.nready.get() - 1);
                return;
            }
        }
    })
}

/// Pop the head of the highest non-empty bucket.
fn pop_next() -> Option<Coro> {
    SCHED.with(|s| {
        let mut q = s.run_q.borrow_mut();
        for bucket in q.iter_mut().rev() {
            if let Some(c) = bucket.pop_front() {
                s.nready.set(s.nready.get() - 1);
                return Some(c);
            }
        }
        None
    })
}

/// Pop the highest-priority coroutine other than `skip`.
fn pop_next_skipping(skip: &Coro) -> Option<Coro> {
    SCHED.with(|s| {
        let mut q = s.run_q.borrow_mut();
        for bucket in q.iter_mut().rev() {
            if let Some(pos) = bucket.iter().position(|c| !c.ptr_eq(skip)) {
                let c = bucket.remove(pos).unwrap();
                s.nready.set(s.nready.get() - 1);
                return Some(c);
            }
        }
        None
    })
}

fn run_idle() {
    let hook = SCHED.with(|s| s.idle.borrow_mut().take());
    match hook {
        Some(mut h) => {
            h();
            SCHED.with(|s| {
                let mut slot = s.idle.borrow_mut();
                // Keep the hook unless it replaced itself while running.
                if slot.is_none() {
                    *slot = Some(h);
                }
            });
        }
        None => event::idle_default(),
    }
}

/// Install a replacement idle hook, called whenever nothing is ready.
///
/// Event-loop adapters use this to block their reactor instead of aborting;
/// the hook is expected to eventually make some coroutine ready. The built-in
/// default drives the crate's own timer heap and reactor and, with neither
/// pending, prints `FATAL: deadlock detected` and exits with status 51.
pub fn set_idle(hook: impl FnMut() + 'static) {
    SCHED.with(|s| *s.idle.borrow_mut() = Some(Box::new(hook)));
}

/// Restore the built-in idle behavior.
pub fn clear_idle() {
    SCHED.with(|s| *s.idle.borrow_mut() = None);
}

/// Suspend the current coroutine and run the next ready one.
///
/// The caller does not become ready again by itself; something must `ready()`
/// it (or cancel it) for `schedule` to return. With no coroutine ready the
/// idle hook runs, repeatedly if need be.
pub fn schedule() {
    let prev = current();
    {
        let mut p = prev.inner.borrow_mut();
        if p.state == State::Running {
            p.state = State::Suspended;
        }
    }
    let next = loop {
        match pop_next() {
            Some(c) => break c,
            None => run_idle(),
        }
    };
    switch_to(prev, next);
}

/// Yield the timeslice while staying runnable.
///
/// Only coroutines of equal or higher priority run before the caller resumes.
/// Returns `true` if another coroutine actually ran.
pub fn cede() -> bool {
    let me = current();
    me.inner.borrow_mut().state = State::Ready;
    enqueue(me.clone());
    let next = loop {
        match pop_next() {
            Some(c) => break c,
            None => run_idle(),
        }
    };
    if next.ptr_eq(&me) {
        me.inner.borrow_mut().state = State::Running;
        return false;
    }
    switch_to(me, next);
    true
}

/// Like [`cede`], but yields to any other runnable coroutine, regardless of
/// priority. Returns `false` (without suspending) when the caller is the only
/// runnable coroutine.
pub fn cede_notself() -> bool {
    let me = current();
    if nready() == 0 {
        return false;
    }
    me.inner.borrow_mut().state = State::Ready;
    enqueue(me.clone());
    let next = match pop_next_skipping(&me) {
        Some(c) => c,
        None => {
            // Lost the race against cancellation of every other entry.
            dequeue(&me);
            me.inner.borrow_mut().state = State::Running;
            return false;
        }
    };
    switch_to(me, next);
    true
}

/// Terminate the current coroutine with the given return list.
pub fn terminate<V: IntoValues>(values: V) -> ! {
    finish(values.into_values());
    unreachable!("terminated coroutine resumed");
}

/// Terminal path of the running coroutine: mark it a zombie, hand it to the
/// reaper and schedule away. Every handle is moved into the destroy list or
/// dropped before the switch, so the abandoned frame pins nothing.
pub(crate) fn finish(values: Vec<crate::value::Value>) {
    {
        let me = current();
        me.finish_mark(values);
        push_destroy(me);
    }
    schedule();
}

/// Suspend the current coroutine after installing its removal hook.
///
/// The hook runs only if the coroutine is cancelled while suspended; it must
/// remove the coroutine from whatever wait-queue, timer or watch it was
/// parked on. A normal wake-up discards the hook.
pub(crate) fn park(unblock: Option<Box<dyn FnOnce()>>) {
    let me = current();
    me.inner.borrow_mut().unblock = unblock;
    schedule();
    me.inner.borrow_mut().unblock = None;
}

pub(crate) fn push_destroy(c: Coro) {
    SCHED.with(|s| s.destroy.borrow_mut().push(c));
    reaper::wake();
}

pub(crate) fn pop_destroy() -> Option<Coro> {
    SCHED.with(|s| s.destroy.borrow_mut().pop())
}

/// The transfer primitive: save the caller's CPU state into `prev`, resume
/// `next`.
///
/// This is the register-level operation underneath `schedule`; it does not
/// touch the ready queues. `prev` becomes the save slot for the caller (the
/// empty-coroutine idiom: a fresh [`Coro::empty`] is a legal `prev` and holds
/// a resumable snapshot afterwards). `next` must hold saved or fabricated
/// state and must not sit in a ready queue.
///
/// # Panics
/// When `next` is an empty coroutine that has never been transferred out of.
pub fn transfer(prev: &Coro, next: &Coro) {
    prev.assert_owner();
    next.assert_owner();
    if prev.ptr_eq(next) {
        return;
    }
    {
        let mut p = prev.inner.borrow_mut();
        if matches!(p.state, State::Running | State::New) {
            p.state = State::Suspended;
        }
    }
    switch_to(prev.clone(), next.clone());
}

/// Swap localized slots, update `current`, and perform the register switch.
///
/// `prev` must be the coroutine whose frame is executing right now. All
/// `RefCell` borrows are dropped before the switch: the coroutine resumed on
/// the other side re-enters this runtime through arbitrary entry points.
fn switch_to(prev: Coro, next: Coro) {
    if prev.ptr_eq(&next) {
        next.inner.borrow_mut().state = State::Running;
        return;
    }
    {
        // A raw transfer may name a coroutine that was never readied;
        // fabricate its first activation now. An entryless one has no
        // resumable state at all.
        let mut n = next.inner.borrow_mut();
        if !crate::coro::ensure_started(&mut n) {
            panic!("transfer into an empty coroutine");
        }
    }

    {
        let mut p = prev.inner.borrow_mut();
        locals::save_into(p.mask, &mut p.shadow);
        p.started = true;
    }
    {
        let mut n = next.inner.borrow_mut();
        locals::restore_from(n.mask, &n.shadow);
        n.state = State::Running;
    }
    trace!("switch {:?} -> {:?}", prev, next);
    SCHED.with(|s| *s.current.borrow_mut() = next.clone());

    // Raw pointers: the switch needs both register blocks at once, which the
    // borrow checker cannot express. The pointers stay valid because both
    // inner cells are heap-pinned behind their Rc.
    let prev_regs = {
        let mut p = prev.inner.borrow_mut();
        &mut p.regs as *mut crate::arch::Regs
    };
    let next_regs = {
        let n = next.inner.borrow();
        &n.regs as *const crate::arch::Regs
    };
    if prev.inner.borrow().state == State::Zombie {
        // This frame is abandoned, never unwound: release its handles now.
        // The destroy list keeps `prev` (and the stack this frame runs on)
        // alive until the reaper gets to it, and the current slot keeps
        // `next` alive.
        drop(prev);
        drop(next);
    }
    arch_switch(prev_regs, next_regs);
    // Back here: someone transferred into `prev`; `current` was updated on
    // the far side.
}

fn arch_switch(prev: *mut crate::arch::Regs, next: *const crate::arch::Regs) {
    crate::arch::switch(prev, next);
}
