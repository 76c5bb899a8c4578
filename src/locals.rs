//! Localized process-wide slots and the per-context save mask.
//!
//! A small set of "global" values (the positional-argument vector, the
//! implicit scalar, the pending-error slot, the input record separator and
//! the default output stream) can be localized to a context: slots named in
//! the context's save mask are copied out to its shadow on transfer-away and
//! copied back in on transfer-to. Slots not in the mask are shared by
//! whichever contexts touch them.

use std::cell::RefCell;

use bitflags::bitflags;

use crate::value::Value;

bitflags! {
    /// Selects which localized slots a context saves and restores.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SaveFlags: u32 {
        /// The positional-argument vector.
        const DEFAV = 0x0000_0001;
        /// The implicit scalar.
        const DEFSV = 0x0000_0002;
        /// The pending-error slot.
        const ERRSV = 0x0000_0004;
        /// The input record separator.
        const IRSSV = 0x0000_0008;
        /// The default output stream.
        const DEFFH = 0x0000_0010;

        /// Every localized slot.
        const ALL = Self::DEFAV.bits()
            | Self::DEFSV.bits()
            | Self::ERRSV.bits()
            | Self::IRSSV.bits()
            | Self::DEFFH.bits();
        /// The default mask for new contexts.
        const DEF = Self::ALL.bits();
    }
}

/// Where the default output stream currently points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutStream {
    #[default]
    Stdout,
    Stderr,
}

/// The localized slot set. One live instance exists per runtime thread;
/// each context owns a shadow copy participating in save/restore per its
/// mask.
#[derive(Debug, Clone, PartialEq)]
pub struct Locals {
    /// Positional-argument vector (`DEFAV`).
    pub args: Vec<Value>,
    /// Implicit scalar (`DEFSV`).
    pub topic: Value,
    /// Pending-error slot (`ERRSV`).
    pub error: Value,
    /// Input record separator (`IRSSV`).
    pub input_sep: Vec<u8>,
    /// Default output stream (`DEFFH`).
    pub out: OutStream,
}

impl Default for Locals {
    fn default() -> Self {
        Locals {
            args: Vec::new(),
            topic: Value::Unit,
            error: Value::Unit,
            input_sep: b"\n".to_vec(),
            out: OutStream::Stdout,
        }
    }
}

thread_local! {
    static LIVE: RefCell<Locals> = RefCell::new(Locals::default());
}

/// Access the live slot set of the running context.
pub fn with<R>(f: impl FnOnce(&mut Locals) -> R) -> R {
    LIVE.with(|l| f(&mut l.borrow_mut()))
}

/// Copy the masked live slots into `shadow`. Transfer-away path.
pub(crate) fn save_into(mask: SaveFlags, shadow: &mut Locals) {
    LIVE.with(|l| {
        let live = l.borrow();
        if mask.contains(SaveFlags::DEFAV) {
            shadow.args = live.args.clone();
        }
        if mask.contains(SaveFlags::DEFSV) {
            shadow.topic = live.topic.clone();
        }
        if mask.contains(SaveFlags::ERRSV) {
            shadow.error = live.error.clone();
        }
        if mask.contains(SaveFlags::IRSSV) {
            shadow.input_sep = live.input_sep.clone();
        }
        if mask.contains(SaveFlags::DEFFH) {
            shadow.out = live.out;
        }
    })
}

/// Copy the masked slots of `shadow` into the live set. Transfer-to path.
pub(crate) fn restore_from(mask: SaveFlags, shadow: &Locals) {
    LIVE.with(|l| {
        let mut live = l.borrow_mut();
        if mask.contains(SaveFlags::DEFAV) {
            live.args = shadow.args.clone();
        }
        if mask.contains(SaveFlags::DEFSV) {
            live.topic = shadow.topic.clone();
        }
        if mask.contains(SaveFlags::ERRSV) {
            live.error = shadow.error.clone();
        }
        if mask.contains(SaveFlags::IRSSV) {
            live.input_sep = shadow.input_sep.clone();
        }
        if mask.contains(SaveFlags::DEFFH) {
            live.out = shadow.out;
        }
    })
}
