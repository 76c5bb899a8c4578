//! Edge-triggered signal.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::coro::Coro;
use crate::sched;

struct Inner {
    pending: bool,
    waiters: VecDeque<Coro>,
}

/// An edge-triggered wakeup flag.
///
/// `send` with no waiter latches one pending edge; the next `wait` consumes
/// it without suspending. `broadcast` wakes every current waiter and latches
/// nothing.
#[derive(Clone, Default)]
pub struct Signal {
    inner: Rc<RefCell<Inner>>,
}

impl Default for Inner {
    fn default() -> Self {
        Inner {
            pending: false,
            waiters: VecDeque::new(),
        }
    }
}

impl Signal {
    pub fn new() -> Self {
        Signal::default()
    }

    /// Wait for the next edge, consuming a pending one immediately.
    pub fn wait(&self) {
        {
            let mut i = self.inner.borrow_mut();
            if i.pending {
                i.pending = false;
                return;
            }
            i.waiters.push_back(sched::current());
        }
        let inner = self.inner.clone();
        let me = sched::current();
        sched::park(Some(Box::new(move || {
            inner.borrow_mut().waiters.retain(|c| !c.ptr_eq(&me));
        })));
    }

    /// Wake one waiter, or latch a pending edge if nobody waits.
    pub fn send(&self) {
        let waiter = {
            let mut i = self.inner.borrow_mut();
            match i.waiters.pop_front() {
                Some(w) => Some(w),
                None => {
                    i.pending = true;
                    None
                }
            }
        };
        if let Some(w) = waiter {
            w.ready();
        }
    }

    /// Wake every current waiter; does not latch.
    pub fn broadcast(&self) {
        let waiters: Vec<Coro> = self.inner.borrow_mut().waiters.drain(..).collect();
        for w in waiters {
            w.ready();
        }
    }

    /// Whether an edge is latched.
    pub fn is_pending(&self) -> bool {
        self.inner.borrow().pending
    }
}
