//! Linux epoll-based reactor.

use std::cell::RefCell;
use std::collections::HashMap;
use std::os::fd::RawFd;

use log::trace;

use super::{Dir, Waiter};

/// Watch slots for one registered descriptor.
#[derive(Default)]
struct FdWatch {
    read: Option<Waiter>,
    write: Option<Waiter>,
}

impl FdWatch {
    fn events(&self) -> u32 {
        let mut ev = 0;
        if self.read.is_some() {
            ev |= (libc::EPOLLIN | libc::EPOLLRDHUP) as u32;
        }
        if self.write.is_some() {
            ev |= libc::EPOLLOUT as u32;
        }
        ev
    }

    fn is_empty(&self) -> bool {
        self.read.is_none() && self.write.is_none()
    }
}

struct Poller {
    epoll_fd: RawFd,
    watches: RefCell<HashMap<RawFd, FdWatch>>,
}

thread_local! {
    static POLLER: Poller = {
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            panic!("epoll_create1 failed: {}", std::io::Error::last_os_error());
        }
        Poller {
            epoll_fd,
            watches: RefCell::new(HashMap::new()),
        }
    };
}

fn update(epoll_fd: RawFd, fd: RawFd, watch: &FdWatch, existed: bool) {
    let mut event = libc::epoll_event {
        events: watch.events(),
        u64: fd as u64,
    };
    let op = match (existed, watch.is_empty()) {
        (false, _) => libc::EPOLL_CTL_ADD,
        (true, false) => libc::EPOLL_CTL_MOD,
        (true, true) => libc::EPOLL_CTL_DEL,
    };
    let ret = unsafe { libc::epoll_ctl(epoll_fd, op, fd, &mut event) };
    if ret < 0 && op != libc::EPOLL_CTL_DEL {
        panic!("epoll_ctl failed: {}", std::io::Error::last_os_error());
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
        let existed = watches.contains_key(&fd);
        let watch = watches.entry(fd).or_default();
        let slot = match dir {
            Dir::Read => &mut watch.read,
            Dir::Write => &mut watch.write,
        };
        if slot.is_some() {
            panic!("fd {fd} already has a {dir:?} watcher");
        }
        *slot = Some(waiter);
        update(p.epoll_fd, fd, watch, existed);
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
        match dir {
            Dir::Read => watch.read = None,
            Dir::Write => watch.write = None,
        }
        update(p.epoll_fd, fd, watch, true);
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
/// of every descriptor that signalled. Error and hangup conditions count as
/// readiness in both directions; the subsequent non-blocking syscall reports
/// the particulars.
pub(crate) fn poll(timeout_ms: i32) {
    POLLER.with(|p| {
        let mut events = [libc::epoll_event { events: 0, u64: 0 }; 64];

        let n = unsafe {
            libc::epoll_wait(
                p.epoll_fd,
                events.as_mut_ptr(),
                events.len() as i32,
                timeout_ms,
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
                let fd = ev.u64 as RawFd;
                let Some(watch) = watches.get_mut(&fd) else {
                    continue;
                };
                let err = ev.events
                    & (libc::EPOLLERR | libc::EPOLLHUP | libc::EPOLLRDHUP) as u32
                    != 0;
                if err || ev.events & libc::EPOLLIN as u32 != 0 {
                    if let Some(w) = watch.read.take() {
                        woken.push(w);
                    }
                }
                if err || ev.events & libc::EPOLLOUT as u32 != 0 {
                    if let Some(w) = watch.write.take() {
                        woken.push(w);
                    }
                }
                update(p.epoll_fd, fd, watch, true);
                if watch.is_empty() {
                    watches.remove(&fd);
                }
            }
        }
        // Watch borrow released before waking: `ready` touches scheduler
        // state only, but keeping the dispatch loop borrow-free is the
        // invariant worth holding.
        for w in woken {
            trace!("fd ready, waking {:?}", w.coro);
            w.hit.set(true);
            w.coro.ready();
        }
    })
}
