//! Semaphore, rwlock, channel and signal contracts.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use strand::{Channel, RwLock, Semaphore, Signal, cede, spawn};

#[test]
fn semaphore_counts() {
    let sem = Semaphore::new(2);
    assert!(sem.try_down());
    assert!(sem.try_down());
    assert!(!sem.try_down());
    sem.up();
    assert!(sem.try_down());
    sem.up();
    sem.up();
    assert_eq!(sem.count(), 2);
}

#[test]
fn semaphore_holders_never_exceed_permits() {
    const PERMITS: usize = 3;
    let sem = Semaphore::new(PERMITS);
    let holders = Rc::new(Cell::new(0usize));
    let peak = Rc::new(Cell::new(0usize));

    let workers: Vec<_> = (0..10)
        .map(|_| {
            let sem = sem.clone();
            let holders = holders.clone();
            let peak = peak.clone();
            spawn(move || {
                sem.down();
                holders.set(holders.get() + 1);
                peak.set(peak.get().max(holders.get()));
                cede();
                holders.set(holders.get() - 1);
                sem.up();
            })
        })
        .collect();

    for w in workers {
        w.join();
    }
    assert!(peak.get() <= PERMITS);
    assert_eq!(sem.count(), PERMITS);
}

#[test]
fn semaphore_wakes_in_fifo_order() {
    let sem = Semaphore::new(0);
    let order = Rc::new(RefCell::new(Vec::new()));

    let workers: Vec<_> = (0..3)
        .map(|i| {
            let sem = sem.clone();
            let order = order.clone();
            spawn(move || {
                sem.down();
                order.borrow_mut().push(i);
            })
        })
        .collect();
    cede(); // all three park, in spawn order

    for _ in 0..3 {
        sem.up();
    }
    for w in workers {
        w.join();
    }
    assert_eq!(*order.borrow(), [0, 1, 2]);
}

#[test]
fn semaphore_guard_releases_on_drop() {
    let sem = Semaphore::new(1);
    {
        let _g = sem.guard();
        assert_eq!(sem.count(), 0);
    }
    assert_eq!(sem.count(), 1);
}

#[test]
fn rwlock_readers_share() {
    let lock = RwLock::new();
    let a = lock.read();
    let b = lock.read();
    assert!(lock.try_write().is_none());
    drop(a);
    drop(b);
    assert!(lock.try_write().is_some());
}

#[test]
fn rwlock_writer_excludes() {
    let lock = RwLock::new();
    let g = lock.write();
    assert!(lock.try_read().is_none());
    assert!(lock.try_write().is_none());
    drop(g);
    assert!(lock.try_read().is_some());
}

#[test]
fn rwlock_waiting_writer_blocks_new_readers() {
    let lock = RwLock::new();
    let order = Rc::new(RefCell::new(Vec::new()));

    let first = lock.read();

    let l = lock.clone();
    let o = order.clone();
    let writer = spawn(move || {
        let _g = l.write();
        o.borrow_mut().push("writer");
    });
    cede(); // writer parks behind the held read lock

    // Writer preference: a fresh reader must queue behind the writer even
    // though only readers hold the lock right now.
    assert!(lock.try_read().is_none());
    let l = lock.clone();
    let o = order.clone();
    let reader = spawn(move || {
        let _g = l.read();
        o.borrow_mut().push("reader");
    });
    cede();

    drop(first);
    writer.join();
    reader.join();
    assert_eq!(*order.borrow(), ["writer", "reader"]);
}

#[test]
fn rwlock_unlock_wakes_all_readers() {
    let lock = RwLock::new();
    let running = Rc::new(Cell::new(0usize));

    let g = lock.write();
    let readers: Vec<_> = (0..3)
        .map(|_| {
            let l = lock.clone();
            let r = running.clone();
            spawn(move || {
                let _g = l.read();
                r.set(r.get() + 1);
                cede();
            })
        })
        .collect();
    cede(); // all readers park behind the writer

    drop(g);
    cede();
    // Every reader entered together before any of them finished.
    assert_eq!(running.get(), 3);
    for r in readers {
        r.join();
    }
}

#[test]
fn channel_bounded_put_suspends() {
    let ch = Channel::new(2);
    let done = Rc::new(Cell::new(false));

    let tx = ch.clone();
    let flag = done.clone();
    let putter = spawn(move || {
        tx.put(1);
        tx.put(2);
        tx.put(3); // buffer full: parks here
        flag.set(true);
    });
    cede();
    assert!(!done.get());
    assert_eq!(ch.len(), 2);

    assert_eq!(ch.get(), 1);
    cede(); // the freed slot lets the putter land 3 and finish
    assert!(done.get());
    assert_eq!(ch.get(), 2);
    assert_eq!(ch.get(), 3);
    putter.join();
}

#[test]
fn channel_get_suspends_until_put() {
    let ch = Channel::new(1);
    let rx = ch.clone();
    let getter = spawn(move || rx.get());
    cede(); // getter parks on the empty channel

    ch.put(5i64);
    assert_eq!(getter.join(), vec![strand::Value::Int(5)]);
}

#[test]
fn channel_rendezvous() {
    let ch = Channel::new(0);
    let order = Rc::new(RefCell::new(Vec::new()));

    let tx = ch.clone();
    let o = order.clone();
    let putter = spawn(move || {
        o.borrow_mut().push("putting");
        tx.put(42);
        o.borrow_mut().push("handed off");
    });
    cede();

    assert_eq!(ch.get(), 42);
    putter.join();
    assert_eq!(*order.borrow(), ["putting", "handed off"]);
}

#[test]
fn channel_try_get() {
    let ch: Channel<i32> = Channel::new(1);
    assert_eq!(ch.try_get(), None);
    ch.put(1);
    assert_eq!(ch.try_get(), Some(1));
}

#[test]
fn signal_pending_edge_is_consumed() {
    let sig = Signal::new();
    sig.send();
    assert!(sig.is_pending());
    sig.wait(); // consumes the latched edge without suspending
    assert!(!sig.is_pending());
}

#[test]
fn signal_wakes_one_waiter_per_send() {
    let sig = Signal::new();
    let woken = Rc::new(Cell::new(0usize));

    let waiters: Vec<_> = (0..2)
        .map(|_| {
            let s = sig.clone();
            let w = woken.clone();
            spawn(move || {
                s.wait();
                w.set(w.get() + 1);
            })
        })
        .collect();
    cede();

    sig.send();
    cede();
    assert_eq!(woken.get(), 1);
    sig.send();
    cede();
    assert_eq!(woken.get(), 2);
    for w in waiters {
        w.join();
    }
}

#[test]
fn signal_broadcast_wakes_all_latches_nothing() {
    let sig = Signal::new();
    let woken = Rc::new(Cell::new(0usize));

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let s = sig.clone();
            let w = woken.clone();
            spawn(move || {
                s.wait();
                w.set(w.get() + 1);
            })
        })
        .collect();
    cede();

    sig.broadcast();
    cede();
    assert_eq!(woken.get(), 3);
    assert!(!sig.is_pending());
    for w in waiters {
        w.join();
    }
}
