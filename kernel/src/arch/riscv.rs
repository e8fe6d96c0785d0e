use core::arch::{asm, naked_asm};

use crate::cpu::CpuTable;

static CPU_TABLE: CpuTable = CpuTable::new();

pub mod interrupts {
    use core::arch::asm;

    /// Supervisor Interrupt Enable
    const SSTATUS_SIE: usize = 1 << 1;

    /// Returns true if device interrupts are enabled on this hart.
    #[inline]
    pub fn get() -> bool {
        let sstatus: usize;
        unsafe { asm!("csrr {}, sstatus", out(reg) sstatus) };
        sstatus & SSTATUS_SIE != 0
    }

    /// Enables device interrupts.
    #[inline]
    pub fn enable() {
        unsafe { asm!("csrs sstatus, {}", in(reg) SSTATUS_SIE) };
    }

    /// Disables device interrupts.
    #[inline]
    pub fn disable() {
        unsafe { asm!("csrc sstatus, {}", in(reg) SSTATUS_SIE) };
    }
}

/// Returns the id of this hart, which `start()` keeps in `tp`.
///
/// # Safety
/// Must be called with interrupts disabled to prevent race with process being moved to a different CPU.
#[inline]
pub unsafe fn hart_id() -> usize {
    let id: usize;
    unsafe { asm!("mv {}, tp", out(reg) id) };
    id
}

/// Returns the table of per-CPU descriptors.
pub fn cpu_table() -> &'static CpuTable {
    &CPU_TABLE
}

/// Stops this hart until the next interrupt.
pub fn wait_for_interrupt() {
    unsafe { asm!("wfi") };
}

/// Saved registers for kernel context switches.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct Context {
    pub ra: usize,
    pub sp: usize,

    // callee-saved
    pub s0: usize,
    pub s1: usize,
    pub s2: usize,
    pub s3: usize,
    pub s4: usize,
    pub s5: usize,
    pub s6: usize,
    pub s7: usize,
    pub s8: usize,
    pub s9: usize,
    pub s10: usize,
    pub s11: usize,
}

impl Context {
    pub const fn new() -> Self {
        Self {
            ra: 0,
            sp: 0,
            s0: 0,
            s1: 0,
            s2: 0,
            s3: 0,
            s4: 0,
            s5: 0,
            s6: 0,
            s7: 0,
            s8: 0,
            s9: 0,
            s10: 0,
            s11: 0,
        }
    }

    pub fn zero(&mut self) {
        *self = Self::new();
    }

    /// Sets up the context to start executing at `entry` on the stack ending at `stack_top`.
    pub fn prepare(&mut self, entry: extern "C-unwind" fn(), stack_top: usize) {
        self.zero();
        self.ra = entry as usize;
        self.sp = stack_top;
    }
}

/// Saves the current callee-saved registers in `old` and resumes `new`.
///
/// # Safety
/// `new` must hold a context saved by `swtch` or set up by `Context::prepare`.
#[unsafe(naked)]
pub unsafe extern "C" fn swtch(old: *mut Context, new: *const Context) {
    naked_asm!(
        "sd ra, 0(a0)",
        "sd sp, 8(a0)",
        "sd s0, 16(a0)",
        "sd s1, 24(a0)",
        "sd s2, 32(a0)",
        "sd s3, 40(a0)",
        "sd s4, 48(a0)",
        "sd s5, 56(a0)",
        "sd s6, 64(a0)",
        "sd s7, 72(a0)",
        "sd s8, 80(a0)",
        "sd s9, 88(a0)",
        "sd s10, 96(a0)",
        "sd s11, 104(a0)",
        "ld ra, 0(a1)",
        "ld sp, 8(a1)",
        "ld s0, 16(a1)",
        "ld s1, 24(a1)",
        "ld s2, 32(a1)",
        "ld s3, 40(a1)",
        "ld s4, 48(a1)",
        "ld s5, 56(a1)",
        "ld s6, 64(a1)",
        "ld s7, 72(a1)",
        "ld s8, 80(a1)",
        "ld s9, 88(a1)",
        "ld s10, 96(a1)",
        "ld s11, 104(a1)",
        "ret",
    )
}
