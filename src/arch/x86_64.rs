//! x86_64 register save/restore.

use std::arch::asm;
use std::arch::naked_asm;

/// Saved CPU state for one suspended context.
///
/// On x86_64 System V ABI these are the callee-saved registers; everything
/// else is dead across the `switch` call boundary by the calling convention.
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub struct Regs {
    /// Stack pointer
    rsp: u64,
    /// Frame pointer
    rbp: u64,
    /// General purpose (callee-saved)
    rbx: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
}

impl Regs {
    /// Fabricate the snapshot for a context that has never run.
    ///
    /// - `stack_top`: highest address of the fresh stack, 16-byte aligned
    /// - `entry`: address the first `switch` into this snapshot will enter
    /// - `arg`: opaque pointer delivered to `entry` via a callee-saved
    ///   register (read it with [`entry_arg`])
    pub fn first(stack_top: usize, entry: usize, arg: u64) -> Self {
        // The ABI wants RSP = 16n+8 at function entry (as if reached by
        // `call`). `switch` enters the context with `ret`, so seed the stack
        // with the entry address where the return address would sit:
        //
        //   stack_top - 8:  alignment padding
        //   stack_top - 16: entry address, popped by `ret`
        //
        // After `ret`, RSP = stack_top - 8 = 16n+8 as required.
        let initial_rsp = stack_top - 16;

        unsafe {
            std::ptr::write(initial_rsp as *mut u64, entry as u64);
        }

        Regs {
            rsp: initial_rsp as u64,
            r15: arg,
            ..Default::default()
        }
    }
}

/// Read the pointer stashed by [`Regs::first`].
///
/// Must run at the very top of the entry function, before any call could
/// clobber the register.
pub fn entry_arg() -> u64 {
    let ptr: u64;
    unsafe {
        asm!(
            "mov {}, r15",
            out(reg) ptr,
            options(nomem, nostack, preserves_flags)
        );
    }
    ptr
}

/// Save the caller's callee-saved registers into `old`, load `new`.
///
/// Returns when some future `switch` names `old` as its `new` operand. A
/// fabricated snapshot (from [`Regs::first`]) instead enters its entry
/// function.
///
/// # Safety
/// Both pointers must be valid, and `new` must hold either a previously
/// saved snapshot or a fabricated one. Loading a zeroed snapshot jumps
/// through a null return address.
#[unsafe(naked)]
pub extern "C" fn switch(_old: *mut Regs, _new: *const Regs) {
    naked_asm!(
        // Save callee-saved registers to the old snapshot (rdi)
        "mov [rdi + 0x00], rsp",
        "mov [rdi + 0x08], rbp",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], r12",
        "mov [rdi + 0x20], r13",
        "mov [rdi + 0x28], r14",
        "mov [rdi + 0x30], r15",
        // Load callee-saved registers from the new snapshot (rsi)
        "mov rsp, [rsi + 0x00]",
        "mov rbp, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov r12, [rsi + 0x18]",
        "mov r13, [rsi + 0x20]",
        "mov r14, [rsi + 0x28]",
        "mov r15, [rsi + 0x30]",
        // For a fresh context: pops the entry address and jumps there.
        // For a suspended one: returns to its call of `switch`.
        "ret",
    );
}
