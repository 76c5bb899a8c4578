//! Architecture-specific register save/restore.
//!
//! Each backend provides:
//! - `Regs`: the callee-saved register snapshot for one suspended context
//! - `switch`: save the caller's registers into one snapshot, load another
//! - `Regs::first`: fabricate a snapshot so that the first switch into it
//!   begins execution at an entry function on a fresh stack
//! - `entry_arg`: recover the pointer smuggled to the entry function through
//!   a callee-saved register

#[cfg(target_arch = "x86_64")]
mod x86_64;
#[cfg(target_arch = "x86_64")]
pub use x86_64::*;

#[cfg(target_arch = "aarch64")]
mod aarch64;
#[cfg(target_arch = "aarch64")]
pub use aarch64::*;
