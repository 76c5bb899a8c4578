//! macOS/BSD kqueue-based reactor.

use std::cell::RefCell;
use std::collections::HashMap;
use std::os::fd::RawFd;

use log::trace;

use super::{Dir, Waiter};

#[derive(Default)]
struct FdWatch {
    read: Option<Waiter>,
    write: Option<Waiter>,
}

impl FdWatch {
    fn is_empty(&self) -> bool {
        self.read.is_none() && self.write.is_none()
    }
}

struct Poller {
    kqueue_fd: RawFd,
    watches: RefCell<HashMap<RawFd, FdWatch>>,
}

thread_local! {
    static POLLER: Poller = {
        let kqueue_fd = unsafe { libc::kqueue() };
        if kqueue_fd < 0 {
            panic!("kqueue failed: {}", std::io::Error::last_os_error());
        }
        Poller {
            kqueue_fd,
            watches: RefCell::new(HashMap::new()),
        }
    };
}

fn filter(dir: Dir) -> i16 {
    match dir {
        Dir::Read => libc::EVFILT_READ,
        Dir::Write => libc::EVFILT_WRITE,
    }
}

fn change(kqueue_fd: RawFd, fd: RawFd, dir: Dir, flags: u16) -> i32 {
    let event = libc::kevent {
        ident: fd as libc::uintptr_t,
        filter: filter(dir),
        flags,
        fflags: 0,
        data: 0,
        udata: std::ptr::null_mut(),
    };
    unsafe {
        libc::kevent(
            kqueue_fd,
            &event,
            1,
            std::ptr::null_mut(),
            0,
            std::ptr::null(),
        )
    }
}

/// Register a directional watch for `fd`.
///
/// # Panics
/// When the same `(fd, direction)` already has a waiter; one watcher per
/// slot is the contract.
pub(crate) fn register(fd: RawFd, dir: Dir, waiter: Waiter) {
    POLLER.with(|p| {
        let mut watches = p.watches.borrow_mut();
        let watch = watches.entry(fd).or_default();
        let slot = match dir {
            Dir::Read => &mut watch.read,
            Dir::Write => &mut watch.write,
        };
        if slot.is_some() {
            panic!("fd {fd} already has a {dir:?} watcher");
        }
        *slot = Some(waiter);
        if change(p.kqueue_fd, fd, dir, libc::EV_ADD | libc::EV_ONESHOT) < 0 {
            panic!("kevent register failed: {}", std::io::Error::last_os_error());
        }
        trace!("watch fd={fd} {dir:?}");
    })
}

/// Drop the watch for `(fd, dir)` if present.
pub(crate) fn unregister(fd: RawFd, dir: Dir) {
    POLLER.with(|p| {
        let mut watches = p.watches.borrow_mut();
        let Some(watch) = watches.get_mut(&fd) else {
            return;
        };
        let slot = match dir {
            Dir::Read => &mut watch.read,
            Dir::Write => &mut watch.write,
        };
        if slot.take().is_some() {
            // The one-shot filter may already be gone; ENOENT is fine.
            change(p.kqueue_fd, fd, dir, libc::EV_DELETE);
        }
        if watch.is_empty() {
            watches.remove(&fd);
        }
    })
}

/// Whether any coroutine is parked on a watch.
pub(crate) fn has_waiters() -> bool {
    POLLER.with(|p| !p.watches.borrow().is_empty())
}

/// Block for up to `timeout_ms` (`-1` = indefinitely), then wake the waiters
/// of every descriptor that signalled.
pub(crate) fn poll(timeout_ms: i32) {
    POLLER.with(|p| {
        let timeout = libc::timespec {
            tv_sec: (timeout_ms.max(0) / 1000) as libc::time_t,
            tv_nsec: ((timeout_ms.max(0) % 1000) * 1_000_000) as libc::c_long,
        };
        let timeout_ptr = if timeout_ms < 0 {
            std::ptr::null()
        } else {
            &timeout as *const libc::timespec
        };

        let mut events: [libc::kevent; 64] = unsafe { std::mem::zeroed() };

        let n = unsafe {
            libc::kevent(
                p.kqueue_fd,
                std::ptr::null(),
                0,
                events.as_mut_ptr(),
                events.len() as i32,
                timeout_ptr,
            )
        };

        if n < 0 {
            // EINTR: just report nothing this round.
            return;
        }

        let mut woken = Vec::new();
        {
            let mut watches = p.watches.borrow_mut();
            for ev in &events[..n as usize] {
                let fd = ev.ident as RawFd;
                let Some(watch) = watches.get_mut(&fd) else {
                    continue;
                };
                let slot = match ev.filter {
                    libc::EVFILT_READ => &mut watch.read,
                    libc::EVFILT_WRITE => &mut watch.write,
                    _ => continue,
                };
                if let Some(w) = slot.take() {
                    woken.push(w);
                }
                if watch.is_empty() {
                    watches.remove(&fd);
                }
            }
        }
        for w in woken {
            trace!("fd ready, waking {:?}", w.coro);
            w.hit.set(true);
            w.coro.ready();
        }
    })
}
