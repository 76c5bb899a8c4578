//! Suspension-based synchronization primitives.
//!
//! All of them share one shape: a counter plus a FIFO wait-queue of
//! coroutines. Waking hands the resource over directly (the woken coroutine
//! does not re-check), and a cancelled waiter is removed from its queue
//! before it is reaped.

mod channel;
mod rwlock;
mod semaphore;
mod signal;

pub use channel::Channel;
pub use rwlock::{ReadGuard, RwLock, WriteGuard};
pub use semaphore::{SemGuard, Semaphore};
pub use signal::Signal;
