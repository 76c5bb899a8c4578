//! Blocking-style I/O over non-blocking descriptors.
//!
//! A [`Handle`] wraps a raw fd and turns readiness waiting into coroutine
//! suspension: `readable`/`writable` park the caller on a reactor watch,
//! optionally racing a timeout timer, and the buffered `read`/`write`/
//! `readline` operations loop over non-blocking syscalls, suspending on
//! `EAGAIN`. Watches and timers are unregistered on every exit path,
//! including cancellation of the waiting coroutine.

use std::cell::Cell;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::netpoll::{self, Dir, Waiter};
use crate::sched;
use crate::timer;

const CHUNK: usize = 8 * 1024;

/// A non-blocking file descriptor with a blocking coroutine interface.
#[derive(Debug)]
pub struct Handle {
    fd: OwnedFd,
    desc: String,
    timeout: Option<Duration>,
    rbuf: Vec<u8>,
    partial: bool,
}

impl Handle {
    /// Wrap `fd`, switching it to non-blocking mode.
    pub fn new(fd: OwnedFd) -> io::Result<Self> {
        set_nonblocking(fd.as_raw_fd())?;
        Ok(Handle {
            fd,
            desc: String::new(),
            timeout: None,
            rbuf: Vec::new(),
            partial: false,
        })
    }

    /// A connected pair of pipe handles `(read_end, write_end)`.
    pub fn pipe() -> io::Result<(Handle, Handle)> {
        let mut fds = [0 as RawFd; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
            return Err(io::Error::last_os_error());
        }
        let (r, w) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        Ok((Handle::new(r)?, Handle::new(w)?))
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Timeout applied to every suspension-capable operation; `None` waits
    /// indefinitely.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// With the partial flag set, `read` returns whatever it already has
    /// instead of suspending for the rest.
    pub fn partial(&self) -> bool {
        self.partial
    }

    pub fn set_partial(&mut self, partial: bool) {
        self.partial = partial;
    }

    pub fn desc(&self) -> &str {
        &self.desc
    }

    pub fn set_desc(&mut self, desc: impl Into<String>) {
        self.desc = desc.into();
    }

    /// Suspend until the descriptor is readable. Returns `false` if the
    /// timeout fired first.
    pub fn readable(&self) -> bool {
        self.wait_ready(Dir::Read)
    }

    /// Suspend until the descriptor is writable. Returns `false` if the
    /// timeout fired first.
    pub fn writable(&self) -> bool {
        self.wait_ready(Dir::Write)
    }

    fn wait_ready(&self, dir: Dir) -> bool {
        let me = sched::current();
        let hit = Rc::new(Cell::new(false));
        let fd = self.fd.as_raw_fd();

        netpoll::register(
            fd,
            dir,
            Waiter {
                coro: me.clone(),
                hit: hit.clone(),
            },
        );
        let tkey = self.timeout.map(|d| timer::insert(Instant::now() + d, me));

        sched::park(Some(Box::new(move || {
            netpoll::unregister(fd, dir);
            if let Some(k) = tkey {
                timer::cancel(k);
            }
        })));

        // Whichever of the watch and the timer lost the race is still
        // registered; both teardowns are idempotent.
        netpoll::unregister(fd, dir);
        if let Some(k) = tkey {
            timer::cancel(k);
        }
        hit.get()
    }

    /// Read up to `buf.len()` bytes, draining the internal buffer first.
    ///
    /// Suspends on `EAGAIN` and keeps going until the buffer is full, EOF,
    /// or the timeout fires. With the partial flag set, the first non-empty
    /// chunk is returned as-is instead. A transport error after
    /// some bytes were already read reports those bytes; the error resurfaces
    /// on the next call.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut got = 0;

        if !self.rbuf.is_empty() {
            let n = self.rbuf.len().min(buf.len());
            buf[..n].copy_from_slice(&self.rbuf[..n]);
            self.rbuf.drain(..n);
            got = n;
        }

        while got < buf.len() {
            if got > 0 && self.partial {
                break;
            }
            match raw_read(self.fd.as_raw_fd(), &mut buf[got..]) {
                Ok(0) => break, // EOF
                Ok(n) => got += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !self.readable() {
                        break; // timeout
                    }
                }
                Err(e) => {
                    if got == 0 {
                        return Err(e);
                    }
                    break;
                }
            }
        }
        Ok(got)
    }

    /// Write all of `buf`, suspending on `EAGAIN`.
    ///
    /// Returns the number of bytes actually sent; short only when the
    /// timeout fired or the descriptor errored mid-stream (a clean error
    /// before any byte is an `Err`).
    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut sent = 0;

        while sent < buf.len() {
            match raw_write(self.fd.as_raw_fd(), &buf[sent..]) {
                Ok(0) => break,
                Ok(n) => sent += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !self.writable() {
                        break; // timeout
                    }
                }
                Err(e) => {
                    if sent == 0 {
                        return Err(e);
                    }
                    break;
                }
            }
        }
        Ok(sent)
    }

    /// Read one record ending in `term`, inclusive.
    ///
    /// Suspends for more input while the buffer holds no terminator. At EOF
    /// a trailing unterminated record is returned once, then `None`. Returns
    /// `None` on timeout or error with the partial record retained for the
    /// next call.
    pub fn readline(&mut self, term: &[u8]) -> Option<Vec<u8>> {
        debug_assert!(!term.is_empty());
        loop {
            if let Some(pos) = find(&self.rbuf, term) {
                return Some(self.rbuf.drain(..pos + term.len()).collect());
            }

            let mut chunk = [0u8; CHUNK];
            match raw_read(self.fd.as_raw_fd(), &mut chunk) {
                Ok(0) => {
                    // EOF: hand out the unterminated tail, if any.
                    if self.rbuf.is_empty() {
                        return None;
                    }
                    return Some(std::mem::take(&mut self.rbuf));
                }
                Ok(n) => self.rbuf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !self.readable() {
                        return None; // timeout
                    }
                }
                Err(_) => return None,
            }
        }
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn raw_read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

fn raw_write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::find;

    #[test]
    fn find_terminator() {
        assert_eq!(find(b"abc\ndef", b"\n"), Some(3));
        assert_eq!(find(b"abcdef", b"\n"), None);
        assert_eq!(find(b"ab\r\ncd", b"\r\n"), Some(2));
        assert_eq!(find(b"", b"\n"), None);
    }
}
