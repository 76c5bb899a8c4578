//! Raw transfer, the empty-coroutine save slot, and the native vtable.

use std::cell::Cell;
use std::rc::Rc;

use strand::api::{self, API_VERSION};
use strand::{Coro, transfer};

#[test]
fn empty_coroutine_as_save_slot() {
    // "Create an empty coroutine, then transfer with it as `prev`" allocates
    // a save area for the caller's registers; the peer resumes us through it.
    let hit = Rc::new(Cell::new(false));
    let slot = Coro::empty();

    let resume_into = slot.clone();
    let h = hit.clone();
    let t = Coro::new(move || -> () {
        h.set(true);
        transfer(&Coro::empty(), &resume_into);
        unreachable!("abandoned context resumed");
    });

    transfer(&slot, &t);
    assert!(hit.get());
}

#[test]
#[should_panic(expected = "empty coroutine")]
fn transfer_into_empty_panics() {
    let empty = Coro::empty();
    transfer(&strand::current(), &empty);
}

#[test]
fn api_vtable_drives_the_scheduler() {
    let api = api::open(API_VERSION);

    let c = Coro::new(|| 1);
    let h = api::into_handle(&c);
    unsafe {
        assert_eq!((api.is_ready)(h), 0);
        assert_eq!((api.ready)(h), 1);
        assert_eq!((api.is_ready)(h), 1);
        // Readying twice is a no-op.
        assert_eq!((api.ready)(h), 0);
        assert_eq!(*api.nready, 1);
    }

    assert_eq!((api.cede)(), 1);
    assert_eq!(c.join(), vec![strand::Value::Int(1)]);
    unsafe {
        assert_eq!(*api.nready, 0);
        let dup = (api.dup)(h);
        (api.release)(dup);
        (api.release)(h);
    }

    let cur = (api.current)();
    unsafe { (api.release)(cur) };
}

#[test]
#[should_panic(expected = "version mismatch")]
fn api_version_mismatch_refuses() {
    api::open(API_VERSION + 1);
}
