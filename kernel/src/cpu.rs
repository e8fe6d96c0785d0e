use core::cell::UnsafeCell;

use crate::arch::{self, Context, interrupts};
use crate::param::NCPU;

/// Per-CPU state
pub struct Cpu {
    /// Table index of the process running on this cpu, if any.
    pub proc: Option<usize>,
    /// swtch() here to enter scheduler().
    pub context: Context,
    /// Depth of push_off() nesting.
    pub num_off: isize,
    /// Were interrupts enabled before push_off()?
    pub interrupts_enabled: bool,
    /// Kernel whose scheduler runs on this cpu.
    pub(crate) kernel: *const (),
}

impl Cpu {
    const fn new() -> Self {
        Self {
            proc: None,
            context: Context::new(),
            num_off: 0,
            interrupts_enabled: false,
            kernel: core::ptr::null(),
        }
    }

    /// Locks this CPU by disabling interrupts.
    fn lock(&mut self, old_state: bool) -> InterruptLock {
        if self.num_off == 0 {
            self.interrupts_enabled = old_state;
        }
        self.num_off += 1;
        InterruptLock
    }

    /// Unlocks this CPU by enabling interrupts if appropriate.
    pub fn unlock(&mut self) {
        assert!(!interrupts::get(), "cpu unlock - interruptible");
        assert!(self.num_off >= 1, "cpu unlock");

        self.num_off -= 1;
        if self.num_off == 0 && self.interrupts_enabled {
            interrupts::enable();
        }
    }
}

/// Table of CPUs
pub struct CpuTable([UnsafeCell<Cpu>; NCPU]);

impl CpuTable {
    /// Creates a new CPU table.
    pub const fn new() -> Self {
        Self([const { UnsafeCell::new(Cpu::new()) }; NCPU])
    }

    /// Returns the descriptor of CPU `id`.
    ///
    /// # Safety
    /// Only the hart `id` may touch its own descriptor, with interrupts disabled.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get(&self, id: usize) -> &mut Cpu {
        unsafe { &mut *self.0[id].get() }
    }
}

impl Default for CpuTable {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Sync for CpuTable {}

/// A lock that releases the CPU lock when dropped.
#[derive(Debug)]
pub struct InterruptLock;

impl Drop for InterruptLock {
    fn drop(&mut self) {
        // # Safety: we are still holding the CPU lock
        unsafe { current_cpu().unlock() }
    }
}

/// Returns the hart id of the current CPU.
///
/// # Safety
/// Must be called with interrupts disabled to prevent race with process being moved to a different CPU.
#[inline]
pub unsafe fn current_id() -> usize {
    unsafe { arch::hart_id() }
}

/// Returns a mutable pointer to the current CPU's [`Cpu`] struct.
///
/// # Safety
/// Must be called with interrupts disabled to prevent race with process being moved to a different CPU.
pub unsafe fn current_cpu() -> &'static mut Cpu {
    unsafe {
        assert!(!interrupts::get(), "mycpu interrupts enabled");
        let id = current_id();
        arch::cpu_table().get(id)
    }
}

/// Locks this CPU by disabling interrupts.
/// Returns an [`InterruptLock`] as the ownership and lifetime of the lock.
pub fn lock_current_cpu() -> InterruptLock {
    let old_state = interrupts::get();
    interrupts::disable();

    unsafe { current_cpu().lock(old_state) }
}
