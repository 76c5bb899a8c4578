//! The coroutine object: one cooperative thread of execution.
//!
//! A [`Coro`] owns (lazily) a stack, a saved register snapshot, a shadow copy
//! of the localized slots, a priority, and the bookkeeping the scheduler and
//! reaper need. Handles are cheap clones of a shared cell and are not `Send`;
//! the whole runtime is confined to the thread that created it.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::thread::{self, ThreadId};

use log::trace;

use crate::arch;
use crate::locals::{Locals, SaveFlags};
use crate::sched;
use crate::stack::{self, Stack};
use crate::value::{IntoValues, Value};

/// Type-erased entry closure.
pub(crate) type EntryFn = Box<dyn FnOnce() -> Vec<Value>>;

/// Lifecycle state of a coroutine.
///
/// `Zombie` means terminated but not yet reaped; `Dead` means the reaper has
/// run, the stack is gone and only the return list survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    New,
    Ready,
    Running,
    Suspended,
    Zombie,
    Dead,
}

pub(crate) struct Inner {
    /// Saved callee-saved registers; garbage until `started`.
    pub(crate) regs: arch::Regs,
    /// Attached on demand, recycled by the reaper.
    pub(crate) stack: Option<Stack>,
    /// Entry closure, present until the context is first made ready.
    entry: Option<EntryFn>,
    /// Raw entry box handed to the trampoline; reclaimed by the reaper if
    /// the context dies without ever running.
    entry_raw: Option<*mut EntryFn>,
    /// Whether `regs` holds a fabricated or saved snapshot.
    pub(crate) started: bool,
    pub(crate) state: State,
    pub(crate) prio: i32,
    pub(crate) mask: SaveFlags,
    pub(crate) desc: String,
    /// Shadow copy of the localized slots, per `mask`.
    pub(crate) shadow: Locals,
    /// Return list captured at termination.
    pub(crate) retvals: Vec<Value>,
    /// Contexts suspended in `join` on this one.
    pub(crate) joiners: Vec<Coro>,
    /// Removal hook installed by the primitive this context is blocked on;
    /// invoked by `cancel` so no wait-queue keeps a reference past death.
    pub(crate) unblock: Option<Box<dyn FnOnce()>>,
    pub(crate) is_main: bool,
    owner: ThreadId,
}

/// Handle to a coroutine.
///
/// Clones are identity-preserving: every operation goes through the shared
/// inner cell. `Coro` is `!Send`; handles must stay on the runtime thread.
#[derive(Clone)]
pub struct Coro {
    pub(crate) inner: Rc<RefCell<Inner>>,
}

impl std::fmt::Debug for Coro {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let i = self.inner.borrow();
        f.debug_struct("Coro")
            .field("desc", &i.desc)
            .field("state", &i.state)
            .field("prio", &i.prio)
            .finish()
    }
}

impl Coro {
    fn from_inner(inner: Inner) -> Self {
        Coro {
            inner: Rc::new(RefCell::new(inner)),
        }
    }

    fn blank(entry: Option<EntryFn>) -> Inner {
        Inner {
            regs: arch::Regs::default(),
            stack: None,
            entry,
            entry_raw: None,
            started: false,
            state: State::New,
            prio: sched::PRIO_NORMAL,
            mask: SaveFlags::DEF,
            desc: String::new(),
            shadow: Locals::default(),
            retvals: Vec::new(),
            joiners: Vec::new(),
            unblock: None,
            is_main: false,
            owner: thread::current().id(),
        }
    }

    /// Create a new coroutine in state `New`. No stack is allocated until it
    /// is first made ready. The closure's result becomes the return list
    /// delivered to joiners.
    pub fn new<F, R>(f: F) -> Self
    where
        F: FnOnce() -> R + 'static,
        R: IntoValues,
    {
        Coro::from_inner(Coro::blank(Some(Box::new(move || f().into_values()))))
    }

    /// Create an empty coroutine: a bare save slot with no entry point.
    ///
    /// Its only legal first use is being named as the `prev` side of
    /// [`sched::transfer`]; it can never be made ready, and transferring
    /// *into* it before it has saved state aborts.
    pub fn empty() -> Self {
        Coro::from_inner(Coro::blank(None))
    }

    /// The implicit root context of the runtime thread.
    pub(crate) fn main() -> Self {
        let mut i = Coro::blank(None);
        i.state = State::Running;
        i.started = true;
        i.is_main = true;
        i.desc = "main".to_owned();
        Coro::from_inner(i)
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Coro) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn state(&self) -> State {
        self.inner.borrow().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == State::Ready
    }

    pub fn is_running(&self) -> bool {
        self.state() == State::Running
    }

    pub fn is_zombie(&self) -> bool {
        self.state() == State::Zombie
    }

    pub fn is_dead(&self) -> bool {
        self.state() == State::Dead
    }

    /// Make the coroutine runnable.
    ///
    /// Moves `New` or `Suspended` into `Ready` and enqueues it in its
    /// priority bucket; a no-op on `Ready`/`Running`.
    ///
    /// # Panics
    /// On a `Zombie`/`Dead` context, and on an empty context (a context
    /// without an entry point can never run).
    pub fn ready(&self) {
        {
            let mut i = self.inner.borrow_mut();
            match i.state {
                State::Ready | State::Running => return,
                State::Zombie | State::Dead => {
                    panic!("cannot ready a terminated coroutine ({:?})", i.desc)
                }
                State::New | State::Suspended => {}
            }
            if i.state == State::New {
                if i.entry.is_none() {
                    panic!("cannot ready an empty coroutine");
                }
                attach(&mut i);
            }
            i.state = State::Ready;
            trace!("ready {:?}", i.desc);
        }
        sched::enqueue(self.clone());
    }

    /// Terminate the coroutine from outside, storing `values` as its return
    /// list and handing it to the reaper. Joiners observe the values once the
    /// reaper runs. Cancelling the current coroutine schedules away and never
    /// returns. A second cancel is a no-op.
    ///
    /// The coroutine is removed from whatever ready queue, wait-queue, timer
    /// or reactor watch it occupies before it is reaped.
    pub fn cancel<V: IntoValues>(&self, values: V) {
        let was = {
            let mut i = self.inner.borrow_mut();
            match i.state {
                State::Zombie | State::Dead => return,
                s => {
                    if i.is_main {
                        panic!("cannot cancel the main coroutine");
                    }
                    i.retvals = values.into_values();
                    i.state = State::Zombie;
                    s
                }
            }
        };
        let is_current = was == State::Running;
        if was == State::Ready {
            sched::dequeue(self);
        }
        let unblock = self.inner.borrow_mut().unblock.take();
        if let Some(f) = unblock {
            f();
        }
        trace!("cancel {:?}", self);
        sched::push_destroy(self.clone());
        if is_current {
            sched::schedule();
            unreachable!("cancelled coroutine resumed");
        }
    }

    /// Wait for the coroutine to terminate and return its return list.
    ///
    /// Suspends the caller unless the target is already `Zombie` or `Dead`;
    /// the return list outlives the stack, so joining a long-dead coroutine
    /// still yields the values passed to `cancel`/`terminate`.
    pub fn join(&self) -> Vec<Value> {
        let st = self.state();
        if st < State::Zombie {
            let me = sched::current();
            if self.ptr_eq(&me) {
                panic!("a coroutine cannot join itself");
            }
            self.inner.borrow_mut().joiners.push(me.clone());
            let target = self.clone();
            sched::park(Some(Box::new(move || {
                target.inner.borrow_mut().joiners.retain(|c| !c.ptr_eq(&me));
            })));
        }
        self.inner.borrow().retvals.clone()
    }

    /// Current priority.
    pub fn prio(&self) -> i32 {
        self.inner.borrow().prio
    }

    /// Set the priority, clamped to `[PRIO_MIN, PRIO_MAX]`; returns the old
    /// value.
    ///
    /// A change to the current coroutine takes effect at its next reschedule.
    /// A change to an enqueued `Ready` coroutine does not re-bucket it: the
    /// new priority is used from its next enqueue on.
    pub fn set_prio(&self, prio: i32) -> i32 {
        let mut i = self.inner.borrow_mut();
        let old = i.prio;
        i.prio = prio.clamp(sched::PRIO_MIN, sched::PRIO_MAX);
        old
    }

    /// Adjust the priority by `delta` (see [`set_prio`](Coro::set_prio));
    /// returns the old value.
    pub fn nice(&self, delta: i32) -> i32 {
        let old = self.prio();
        self.set_prio(old + delta);
        old
    }

    /// Diagnostics description.
    pub fn desc(&self) -> String {
        self.inner.borrow().desc.clone()
    }

    pub fn set_desc(&self, desc: impl Into<String>) {
        self.inner.borrow_mut().desc = desc.into();
    }

    /// The save mask controlling which localized slots this coroutine saves
    /// and restores on transfer.
    pub fn save_flags(&self) -> SaveFlags {
        self.inner.borrow().mask
    }

    /// Replace the save mask; returns the old one.
    pub fn set_save_flags(&self, mask: SaveFlags) -> SaveFlags {
        let mut i = self.inner.borrow_mut();
        std::mem::replace(&mut i.mask, mask)
    }

    /// Add `extra` to the save mask; returns the old mask.
    pub fn save_also(&self, extra: SaveFlags) -> SaveFlags {
        let old = self.save_flags();
        self.set_save_flags(old | extra);
        old
    }

    /// Add `extra` to the save mask for a bounded scope: the returned guard
    /// restores the previous mask when dropped.
    pub fn guarded_save(&self, extra: SaveFlags) -> SaveGuard {
        let old = self.save_also(extra);
        SaveGuard {
            coro: self.clone(),
            old,
        }
    }

    /// Terminal marking for the running coroutine; the caller owns the
    /// destroy-list handoff and the final reschedule.
    pub(crate) fn finish_mark(&self, values: Vec<Value>) {
        let mut i = self.inner.borrow_mut();
        debug_assert_eq!(i.state, State::Running);
        i.retvals = values;
        i.state = State::Zombie;
    }

    pub(crate) fn reserved_prio(&self) {
        self.inner.borrow_mut().prio = sched::PRIO_RESERVED;
    }

    pub(crate) fn assert_owner(&self) {
        let owner = self.inner.borrow().owner;
        if owner != thread::current().id() {
            panic!("coroutine handle used from a foreign thread");
        }
    }

    fn clear_entry_raw(&self) {
        self.inner.borrow_mut().entry_raw = None;
    }
}

/// Scoped reverter for a layered save mask; restores the prior mask on drop.
pub struct SaveGuard {
    coro: Coro,
    old: SaveFlags,
}

impl Drop for SaveGuard {
    fn drop(&mut self) {
        self.coro.inner.borrow_mut().mask = self.old;
    }
}

/// Create a coroutine and immediately make it ready.
pub fn spawn<F, R>(f: F) -> Coro
where
    F: FnOnce() -> R + 'static,
    R: IntoValues,
{
    let c = Coro::new(f);
    c.ready();
    c
}

/// Fabricate the first activation if the coroutine has an entry point and
/// has not started; returns whether the snapshot is now resumable.
pub(crate) fn ensure_started(i: &mut Inner) -> bool {
    if !i.started {
        if i.entry.is_some() {
            attach(i);
        } else {
            return false;
        }
    }
    true
}

/// Attach a stack and fabricate the first activation.
fn attach(i: &mut Inner) {
    let stack = stack::acquire();
    let f = i.entry.take().expect("attach on an entryless coroutine");
    let raw = Box::into_raw(Box::new(f));
    i.entry_raw = Some(raw);
    i.regs = arch::Regs::first(stack.top(), coro_start as usize, raw as u64);
    i.stack = Some(stack);
    i.started = true;
}

/// First frame of every spawned coroutine.
///
/// Recovers the entry closure from the register argument, runs it, and
/// terminates with its return list. A panic in the closure has already been
/// reported by the panic hook; the coroutine then terminates with an empty
/// return list. Execution must never fall off the end of this frame: there
/// is no caller to return to, so the backstop is a plain process exit, the
/// same way the main program's fall-through ends the process.
extern "C" fn coro_start() {
    let raw = arch::entry_arg() as *mut EntryFn;
    let f = unsafe { Box::from_raw(raw) };
    {
        let me = sched::current();
        me.clear_entry_raw();
    }

    let vals = match panic::catch_unwind(AssertUnwindSafe(move || (*f)())) {
        Ok(vals) => vals,
        Err(_) => Vec::new(),
    };

    sched::finish(vals);
    std::process::exit(0);
}

/// Reaper-side teardown: mark `Dead`, wake joiners, recycle the stack and
/// release everything but the return list.
pub(crate) fn reap(z: &Coro) {
    let (joiners, stack) = {
        let mut i = z.inner.borrow_mut();
        debug_assert_eq!(i.state, State::Zombie);
        i.state = State::Dead;
        i.unblock = None;
        i.shadow = Locals::default();
        if let Some(raw) = i.entry_raw.take() {
            // Died without ever running; reclaim the leaked entry box.
            drop(unsafe { Box::from_raw(raw) });
        }
        i.entry = None;
        (std::mem::take(&mut i.joiners), i.stack.take())
    };
    if let Some(s) = stack {
        stack::release(s);
    }
    trace!("reaped {:?}", z);
    for j in joiners {
        j.ready();
    }
}
