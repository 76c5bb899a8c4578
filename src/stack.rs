//! Coroutine stacks and the idle-stack pool.
//!
//! A context only needs a stack once it is actually scheduled, so stacks are
//! attached on demand and returned here when the reaper destroys a context.
//! Up to [`pool_limit`](set_pool_limit) idle stacks are retained for reuse.

use std::cell::RefCell;

use log::trace;

/// Default stack size for each coroutine (64 KiB).
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

/// Hard floor below which stacks cannot be configured.
const MIN_STACK_SIZE: usize = 4 * 1024;

/// Default number of idle stacks kept for reuse.
const DEFAULT_POOL_LIMIT: usize = 8;

/// An owned coroutine stack.
///
/// The backing memory must stay alive for as long as any saved register
/// snapshot points into it.
pub struct Stack {
    mem: Vec<u8>,
}

impl Stack {
    fn alloc(size: usize) -> Self {
        Stack {
            mem: vec![0u8; size],
        }
    }

    /// Highest usable address, aligned down to 16 bytes as the ABI requires.
    pub fn top(&self) -> usize {
        let top = self.mem.as_ptr() as usize + self.mem.len();
        top & !0xF
    }

    pub fn size(&self) -> usize {
        self.mem.len()
    }
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("base", &self.mem.as_ptr())
            .field("size", &self.mem.len())
            .finish()
    }
}

struct Pool {
    idle: Vec<Stack>,
    size: usize,
    limit: usize,
}

thread_local! {
    static POOL: RefCell<Pool> = RefCell::new(Pool {
        idle: Vec::new(),
        size: DEFAULT_STACK_SIZE,
        limit: DEFAULT_POOL_LIMIT,
    });
}

/// Take a stack from the pool, or allocate a fresh one.
pub(crate) fn acquire() -> Stack {
    POOL.with(|p| {
        let mut p = p.borrow_mut();
        match p.idle.pop() {
            Some(s) => s,
            None => {
                trace!("stack pool empty, allocating {} bytes", p.size);
                Stack::alloc(p.size)
            }
        }
    })
}

/// Return a stack to the pool; dropped outright once the pool is full or the
/// configured size has since changed.
pub(crate) fn release(stack: Stack) {
    POOL.with(|p| {
        let mut p = p.borrow_mut();
        if p.idle.len() < p.limit && stack.size() == p.size {
            p.idle.push(stack);
        }
    })
}

/// Current stack size for newly allocated stacks, in bytes.
pub fn stack_size() -> usize {
    POOL.with(|p| p.borrow().size)
}

/// Set the stack size for coroutines allocated from now on.
///
/// Contexts that already hold a stack are unaffected. Values below a small
/// hard floor are rounded up. Pooled stacks of the old size are discarded as
/// they fail the size check on release; idle ones are dropped eagerly.
pub fn set_stack_size(bytes: usize) {
    POOL.with(|p| {
        let mut p = p.borrow_mut();
        p.size = bytes.max(MIN_STACK_SIZE);
        let size = p.size;
        p.idle.retain(|s| s.size() == size);
    })
}

/// Set how many idle stacks are retained for reuse.
pub fn set_pool_limit(limit: usize) {
    POOL.with(|p| {
        let mut p = p.borrow_mut();
        p.limit = limit;
        p.idle.truncate(limit);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_is_aligned() {
        let s = Stack::alloc(DEFAULT_STACK_SIZE);
        assert_eq!(s.top() & 0xF, 0);
        assert!(s.top() > s.mem.as_ptr() as usize);
    }

    #[test]
    fn pool_recycles() {
        let a = acquire();
        let base = a.mem.as_ptr() as usize;
        release(a);
        let b = acquire();
        assert_eq!(b.mem.as_ptr() as usize, base);
    }

    #[test]
    fn pool_limit_bounds_retention() {
        set_pool_limit(1);
        let a = acquire();
        let b = acquire();
        release(a);
        release(b);
        let kept = POOL.with(|p| p.borrow().idle.len());
        assert_eq!(kept, 1);
        set_pool_limit(0);
        let kept = POOL.with(|p| p.borrow().idle.len());
        assert_eq!(kept, 0);
    }

    #[test]
    fn resize_discards_mismatched() {
        let old = stack_size();
        release(Stack::alloc(old));
        set_stack_size(old * 2);
        let s = acquire();
        assert_eq!(s.size(), old * 2);
        set_stack_size(old);
    }
}
