//! `strand`: a single-threaded cooperative coroutine runtime.
//!
//! Many independent threads of execution share one OS thread and yield to
//! one another only at explicit suspension points: `schedule`, `cede`,
//! `join`, the synchronization primitives, timers and handle I/O. Exactly
//! one coroutine runs at a time, so data touched between suspension points
//! needs no locking.
//!
//! ```no_run
//! use strand::{cede, spawn};
//!
//! let a = spawn(|| {
//!     println!("a1");
//!     cede();
//!     println!("a2");
//! });
//! let b = spawn(|| {
//!     println!("b1");
//!     cede();
//!     println!("b2");
//! });
//! a.join();
//! b.join();
//! ```
//!
//! Scheduling is strict FIFO within a priority level and strict preference
//! across levels. When nothing is ready the replaceable idle hook runs; the
//! built-in one drives the crate's timers and fd reactor, and treats a state
//! where nothing could ever become ready as a fatal deadlock.
//!
//! The runtime is confined to the thread that first touches it. Handles are
//! not `Send`; every thread that uses the crate gets its own independent
//! runtime.

mod arch;
mod netpoll;
mod reaper;

pub mod api;
pub mod coro;
pub mod event;
pub mod handle;
pub mod locals;
pub mod sched;
pub mod stack;
pub mod sync;
pub mod timer;
pub mod value;

pub use coro::{Coro, SaveGuard, State, spawn};
pub use handle::Handle;
pub use locals::{Locals, OutStream, SaveFlags};
pub use sched::{
    PRIO_HIGH, PRIO_IDLE, PRIO_LOW, PRIO_MAX, PRIO_MIN, PRIO_NORMAL, cede, cede_notself,
    clear_idle, current, nready, schedule, set_idle, terminate, transfer,
};
pub use sync::{Channel, RwLock, Semaphore, Signal};
pub use timer::{sleep, sleep_until};
pub use value::{IntoValues, Value};
