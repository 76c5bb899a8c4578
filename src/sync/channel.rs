//! Bounded channel with direct hand-off.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::coro::Coro;
use crate::sched;

/// A parked putter's pending value, or a parked getter's landing slot.
type Slot<T> = Rc<RefCell<Option<T>>>;

struct Inner<T> {
    cap: usize,
    buf: VecDeque<T>,
    getters: VecDeque<(Coro, Slot<T>)>,
    putters: VecDeque<(Coro, Slot<T>)>,
}

/// A bounded FIFO channel between coroutines.
///
/// `put` suspends while the buffer is full, `get` while it is empty. Values
/// are handed to parked peers directly, so with capacity 0 the channel
/// degenerates to a rendezvous. Both wait-queues are strict FIFO.
#[derive(Clone)]
pub struct Channel<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T: 'static> Channel<T> {
    pub fn new(capacity: usize) -> Self {
        Channel {
            inner: Rc::new(RefCell::new(Inner {
                cap: capacity,
                buf: VecDeque::new(),
                getters: VecDeque::new(),
                putters: VecDeque::new(),
            })),
        }
    }

    /// Send `value`, suspending while the buffer is full.
    pub fn put(&self, value: T) {
        let slot = {
            let mut i = self.inner.borrow_mut();
            if let Some((getter, gslot)) = i.getters.pop_front() {
                *gslot.borrow_mut() = Some(value);
                drop(i);
                getter.ready();
                return;
            }
            if i.buf.len() < i.cap {
                i.buf.push_back(value);
                return;
            }
            let slot: Slot<T> = Rc::new(RefCell::new(Some(value)));
            i.putters.push_back((sched::current(), slot.clone()));
            slot
        };
        let inner = self.inner.clone();
        let me = sched::current();
        sched::park(Some(Box::new(move || {
            inner.borrow_mut().putters.retain(|(c, _)| !c.ptr_eq(&me));
        })));
        debug_assert!(slot.borrow().is_none(), "value not taken by a getter");
    }

    /// Receive the oldest value, suspending while the channel is empty.
    pub fn get(&self) -> T {
        let slot = {
            let mut i = self.inner.borrow_mut();
            if let Some(v) = i.buf.pop_front() {
                // A freed buffer slot lets the longest-parked putter land.
                if let Some((putter, pslot)) = i.putters.pop_front() {
                    let pv = pslot.borrow_mut().take().expect("parked putter lost its value");
                    i.buf.push_back(pv);
                    drop(i);
                    putter.ready();
                }
                return v;
            }
            if let Some((putter, pslot)) = i.putters.pop_front() {
                // Capacity 0: take the value straight from the putter.
                let pv = pslot.borrow_mut().take().expect("parked putter lost its value");
                drop(i);
                putter.ready();
                return pv;
            }
            let slot: Slot<T> = Rc::new(RefCell::new(None));
            i.getters.push_back((sched::current(), slot.clone()));
            slot
        };
        let inner = self.inner.clone();
        let me = sched::current();
        sched::park(Some(Box::new(move || {
            inner.borrow_mut().getters.retain(|(c, _)| !c.ptr_eq(&me));
        })));
        slot.borrow_mut()
            .take()
            .expect("woken getter without a value")
    }

    /// Receive without suspending; `None` when nothing is available.
    pub fn try_get(&self) -> Option<T> {
        let mut i = self.inner.borrow_mut();
        if let Some(v) = i.buf.pop_front() {
            if let Some((putter, pslot)) = i.putters.pop_front() {
                let pv = pslot.borrow_mut().take().expect("parked putter lost its value");
                i.buf.push_back(pv);
                drop(i);
                putter.ready();
            }
            return Some(v);
        }
        if let Some((putter, pslot)) = i.putters.pop_front() {
            let pv = pslot.borrow_mut().take().expect("parked putter lost its value");
            drop(i);
            putter.ready();
            return Some(pv);
        }
        None
    }

    /// Buffered values (parked putters not included).
    pub fn len(&self) -> usize {
        self.inner.borrow().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.borrow().cap
    }
}
