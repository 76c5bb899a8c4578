//! Stable C-level vtable for native extensions.
//!
//! Consumers obtain the table through [`open`], which aborts on a version
//! mismatch, and hold coroutines as opaque handles. Everything here is bound
//! to the runtime thread: handles carry their owner and using one from a
//! foreign thread aborts.

use std::ffi::c_void;
use std::rc::Rc;

use libc::c_int;

use crate::coro::Coro;
use crate::locals::SaveFlags;
use crate::sched;

/// Incremented whenever the table layout changes incompatibly.
pub const API_VERSION: u32 = 1;
/// Incremented on compatible additions.
pub const API_REVISION: u32 = 0;

/// The native extension vtable.
#[repr(C)]
pub struct CoroApi {
    pub version: u32,
    pub revision: u32,

    /// Register-level transfer between two handles.
    pub transfer: unsafe extern "C" fn(prev: *mut c_void, next: *mut c_void),
    pub schedule: extern "C" fn(),
    /// Returns 1 if another coroutine ran.
    pub cede: extern "C" fn() -> c_int,
    pub cede_notself: extern "C" fn() -> c_int,
    /// Returns 1 if the handle moved to ready, 0 if it already was.
    pub ready: unsafe extern "C" fn(coro: *mut c_void) -> c_int,
    pub is_ready: unsafe extern "C" fn(coro: *mut c_void) -> c_int,
    /// Live count of ready coroutines on the owning thread.
    pub nready: *const c_int,
    /// Fresh handle to the running coroutine; release with `release`.
    pub current: extern "C" fn() -> *mut c_void,
    pub get_save: unsafe extern "C" fn(coro: *mut c_void) -> u32,
    pub set_save: unsafe extern "C" fn(coro: *mut c_void, mask: u32) -> u32,
    /// Duplicate a handle.
    pub dup: unsafe extern "C" fn(coro: *mut c_void) -> *mut c_void,
    /// Drop a handle obtained from this table.
    pub release: unsafe extern "C" fn(coro: *mut c_void),
}

/// Build the vtable for the calling thread's runtime.
///
/// # Panics
/// When `version` differs from [`API_VERSION`]; a consumer compiled against
/// another layout must refuse to load.
pub fn open(version: u32) -> Box<CoroApi> {
    if version != API_VERSION {
        panic!("coroutine API version mismatch ({version} != {API_VERSION})");
    }
    Box::new(CoroApi {
        version: API_VERSION,
        revision: API_REVISION,
        transfer: api_transfer,
        schedule: api_schedule,
        cede: api_cede,
        cede_notself: api_cede_notself,
        ready: api_ready,
        is_ready: api_is_ready,
        nready: sched::nready_ptr(),
        current: api_current,
        get_save: api_get_save,
        set_save: api_set_save,
        dup: api_dup,
        release: api_release,
    })
}

/// Turn a coroutine into an opaque handle (one strong reference).
pub fn into_handle(c: &Coro) -> *mut c_void {
    Rc::into_raw(c.inner.clone()) as *mut c_void
}

/// Borrow the coroutine behind a handle without consuming it.
///
/// # Safety
/// `p` must come from [`into_handle`]/`clone` and not have been released.
unsafe fn with_handle(p: *mut c_void) -> Coro {
    let rc = unsafe { Rc::from_raw(p as *const std::cell::RefCell<crate::coro::Inner>) };
    let c = Coro { inner: rc.clone() };
    std::mem::forget(rc);
    c.assert_owner();
    c
}

unsafe extern "C" fn api_transfer(prev: *mut c_void, next: *mut c_void) {
    let (prev, next) = unsafe { (with_handle(prev), with_handle(next)) };
    sched::transfer(&prev, &next);
}

extern "C" fn api_schedule() {
    sched::schedule();
}

extern "C" fn api_cede() -> c_int {
    sched::cede() as c_int
}

extern "C" fn api_cede_notself() -> c_int {
    sched::cede_notself() as c_int
}

unsafe extern "C" fn api_ready(coro: *mut c_void) -> c_int {
    let c = unsafe { with_handle(coro) };
    let was_ready = c.is_ready() || c.is_running();
    c.ready();
    !was_ready as c_int
}

unsafe extern "C" fn api_is_ready(coro: *mut c_void) -> c_int {
    unsafe { with_handle(coro) }.is_ready() as c_int
}

extern "C" fn api_current() -> *mut c_void {
    into_handle(&sched::current())
}

unsafe extern "C" fn api_get_save(coro: *mut c_void) -> u32 {
    unsafe { with_handle(coro) }.save_flags().bits()
}

unsafe extern "C" fn api_set_save(coro: *mut c_void, mask: u32) -> u32 {
    let c = unsafe { with_handle(coro) };
    c.set_save_flags(SaveFlags::from_bits_truncate(mask)).bits()
}

unsafe extern "C" fn api_dup(coro: *mut c_void) -> *mut c_void {
    into_handle(&unsafe { with_handle(coro) })
}

unsafe extern "C" fn api_release(coro: *mut c_void) {
    drop(unsafe { Rc::from_raw(coro as *const std::cell::RefCell<crate::coro::Inner>) });
}
