//! Read/write lock with writer preference.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::coro::Coro;
use crate::sched;

struct Inner {
    writer_held: bool,
    readers: usize,
    read_q: VecDeque<Coro>,
    write_q: VecDeque<Coro>,
}

/// A coroutine read/write lock.
///
/// Readers share, a writer excludes everyone. A reader may only enter while
/// no writer holds the lock *and* no writer is waiting, so a stream of
/// readers cannot starve a writer. Unlock wakes the next writer if any, else
/// every waiting reader at once.
#[derive(Clone)]
pub struct RwLock {
    inner: Rc<RefCell<Inner>>,
}

impl Default for RwLock {
    fn default() -> Self {
        RwLock::new()
    }
}

impl RwLock {
    pub fn new() -> Self {
        RwLock {
            inner: Rc::new(RefCell::new(Inner {
                writer_held: false,
                readers: 0,
                read_q: VecDeque::new(),
                write_q: VecDeque::new(),
            })),
        }
    }

    /// Acquire shared access; the guard releases it on drop.
    pub fn read(&self) -> ReadGuard {
        {
            let mut i = self.inner.borrow_mut();
            if !i.writer_held && i.write_q.is_empty() {
                i.readers += 1;
                return ReadGuard { lock: self.clone() };
            }
            i.read_q.push_back(sched::current());
        }
        let inner = self.inner.clone();
        let me = sched::current();
        sched::park(Some(Box::new(move || {
            inner.borrow_mut().read_q.retain(|c| !c.ptr_eq(&me));
        })));
        // The waker already counted us among the readers.
        ReadGuard { lock: self.clone() }
    }

    /// Shared access without suspending; `None` when contended.
    pub fn try_read(&self) -> Option<ReadGuard> {
        let mut i = self.inner.borrow_mut();
        if !i.writer_held && i.write_q.is_empty() {
            i.readers += 1;
            Some(ReadGuard { lock: self.clone() })
        } else {
            None
        }
    }

    /// Acquire exclusive access; the guard releases it on drop.
    pub fn write(&self) -> WriteGuard {
        {
            let mut i = self.inner.borrow_mut();
            if !i.writer_held && i.readers == 0 {
                i.writer_held = true;
                return WriteGuard { lock: self.clone() };
            }
            i.write_q.push_back(sched::current());
        }
        let inner = self.inner.clone();
        let me = sched::current();
        sched::park(Some(Box::new(move || {
            inner.borrow_mut().write_q.retain(|c| !c.ptr_eq(&me));
        })));
        // The waker set `writer_held` on our behalf.
        WriteGuard { lock: self.clone() }
    }

    /// Exclusive access without suspending; `None` when contended.
    pub fn try_write(&self) -> Option<WriteGuard> {
        let mut i = self.inner.borrow_mut();
        if !i.writer_held && i.readers == 0 {
            i.writer_held = true;
            Some(WriteGuard { lock: self.clone() })
        } else {
            None
        }
    }

    fn unlock_read(&self) {
        let waiter = {
            let mut i = self.inner.borrow_mut();
            i.readers -= 1;
            if i.readers == 0 && !i.writer_held {
                match i.write_q.pop_front() {
                    Some(w) => {
                        i.writer_held = true;
                        Some(w)
                    }
                    None => None,
                }
            } else {
                None
            }
        };
        if let Some(w) = waiter {
            w.ready();
        }
    }

    fn unlock_write(&self) {
        enum Wake {
            Writer(Coro),
            Readers(Vec<Coro>),
            Nobody,
        }
        let wake = {
            let mut i = self.inner.borrow_mut();
            i.writer_held = false;
            if let Some(w) = i.write_q.pop_front() {
                i.writer_held = true;
                Wake::Writer(w)
            } else if !i.read_q.is_empty() {
                let readers: Vec<Coro> = i.read_q.drain(..).collect();
                i.readers += readers.len();
                Wake::Readers(readers)
            } else {
                Wake::Nobody
            }
        };
        match wake {
            Wake::Writer(w) => w.ready(),
            Wake::Readers(rs) => {
                for r in rs {
                    r.ready();
                }
            }
            Wake::Nobody => {}
        }
    }
}

/// Shared access to an [`RwLock`]; releases on drop.
pub struct ReadGuard {
    lock: RwLock,
}

impl Drop for ReadGuard {
    fn drop(&mut self) {
        self.lock.unlock_read();
    }
}

/// Exclusive access to an [`RwLock`]; releases on drop.
pub struct WriteGuard {
    lock: RwLock,
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        self.lock.unlock_write();
    }
}
