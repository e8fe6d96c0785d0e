use core::alloc::Layout;
use core::ptr::NonNull;

use buddy_alloc::{BuddyAllocParam, buddy_alloc::BuddyAlloc};

use crate::error::KernelError;
use crate::param::KSTACK_SIZE;
use crate::spinlock::SpinLock;

/// A kernel stack of `KSTACK_SIZE` bytes, owned by at most one process.
///
/// Not `Clone`: a stack goes back to its pool exactly once, by value.
#[derive(Debug)]
pub struct Kstack {
    base: NonNull<u8>,
}

impl Kstack {
    pub fn base(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Initial stack pointer. The stack grows down from here.
    pub fn top(&self) -> usize {
        self.base() + KSTACK_SIZE
    }
}

// Safety: the stack memory is owned by whoever holds the `Kstack`.
unsafe impl Send for Kstack {}

/// Pool of kernel stacks carved from one region by a buddy allocator.
pub struct KstackPool {
    alloc: SpinLock<BuddyAlloc>,
    region: (usize, usize),
}

/// # Safety
/// Even though `BuddyAlloc` is not thread safe, `KstackPool` is thread safe because it is guarded by a `SpinLock`.
unsafe impl Sync for KstackPool {}
unsafe impl Send for KstackPool {}

impl KstackPool {
    /// Creates a pool over `[base, base + len)`.
    ///
    /// # Safety
    /// The region must be valid, writable and unused by anything else for the pool's lifetime.
    pub unsafe fn new(base: *const u8, len: usize) -> Self {
        let param = BuddyAllocParam::new(base, len, KSTACK_SIZE);
        let alloc = unsafe { BuddyAlloc::new(param) };
        Self {
            alloc: SpinLock::new(alloc, "kstack"),
            region: (base as usize, len),
        }
    }

    /// Creates a pool with room for at least `stacks` stacks, taking its region from the heap.
    /// The region is never given back.
    pub fn with_capacity(stacks: usize) -> Result<Self, KernelError> {
        // the allocator keeps its bookkeeping at the start of the region
        let len = (stacks + 2).next_power_of_two() * KSTACK_SIZE;
        let layout =
            Layout::from_size_align(len, KSTACK_SIZE).map_err(|_| KernelError::InvalidArgument)?;

        let base = unsafe { alloc::alloc::alloc_zeroed(layout) };
        if base.is_null() {
            return Err(KernelError::Alloc);
        }

        Ok(unsafe { Self::new(base, len) })
    }

    /// Takes a stack from the pool.
    pub fn alloc(&self) -> Result<Kstack, KernelError> {
        let ptr = self.alloc.lock().malloc(KSTACK_SIZE);
        match NonNull::new(ptr) {
            Some(base) => Ok(Kstack { base }),
            None => Err(KernelError::OutOfMemory),
        }
    }

    /// Returns a stack to the pool.
    pub fn free(&self, stack: Kstack) {
        assert!(self.contains(stack.base()), "kstack free: foreign stack");
        self.alloc.lock().free(stack.base.as_ptr());
    }

    /// Bytes still available for stacks.
    pub fn available(&self) -> usize {
        self.alloc.lock().available_bytes()
    }

    fn contains(&self, addr: usize) -> bool {
        let (base, len) = self.region;
        (base..base + len).contains(&addr)
    }
}
