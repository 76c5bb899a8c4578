//! Counting semaphore.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::coro::Coro;
use crate::sched;

struct Inner {
    count: usize,
    waiters: VecDeque<Coro>,
}

/// A counting semaphore with strict FIFO wakeup.
///
/// `up` on a contended semaphore hands the permit straight to the head
/// waiter; the count is transferred, not re-contested, so a later `down`
/// cannot overtake a parked one.
#[derive(Clone)]
pub struct Semaphore {
    inner: Rc<RefCell<Inner>>,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Semaphore {
            inner: Rc::new(RefCell::new(Inner {
                count: permits,
                waiters: VecDeque::new(),
            })),
        }
    }

    /// Acquire one permit, suspending while none is available.
    pub fn down(&self) {
        {
            let mut i = self.inner.borrow_mut();
            if i.count > 0 {
                i.count -= 1;
                return;
            }
            i.waiters.push_back(sched::current());
        }
        let inner = self.inner.clone();
        let me = sched::current();
        sched::park(Some(Box::new(move || {
            inner.borrow_mut().waiters.retain(|c| !c.ptr_eq(&me));
        })));
        // Woken by `up`: the permit was handed over.
    }

    /// Acquire one permit without suspending; `false` when none is free.
    pub fn try_down(&self) -> bool {
        let mut i = self.inner.borrow_mut();
        if i.count > 0 {
            i.count -= 1;
            true
        } else {
            false
        }
    }

    /// Release one permit, waking the longest-waiting coroutine if any.
    pub fn up(&self) {
        let waiter = {
            let mut i = self.inner.borrow_mut();
            match i.waiters.pop_front() {
                Some(w) => Some(w),
                None => {
                    i.count += 1;
                    None
                }
            }
        };
        if let Some(w) = waiter {
            w.ready();
        }
    }

    /// Free permits right now.
    pub fn count(&self) -> usize {
        self.inner.borrow().count
    }

    /// Number of coroutines suspended in `down`.
    pub fn waiters(&self) -> usize {
        self.inner.borrow().waiters.len()
    }

    /// Acquire a permit held for the guard's lifetime; released on drop.
    pub fn guard(&self) -> SemGuard {
        self.down();
        SemGuard { sem: self.clone() }
    }
}

/// RAII permit from [`Semaphore::guard`].
pub struct SemGuard {
    sem: Semaphore,
}

impl Drop for SemGuard {
    fn drop(&mut self) {
        self.sem.up();
    }
}
