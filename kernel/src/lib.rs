//! Process management core of an xv6-style kernel.
//!
//! The process table, the per-CPU scheduler, the context switch protocol, and the locks that keep
//! `fork`, `exit`, `wait` and `sleep`/`wakeup` race free across CPUs.
//!
//! On bare metal (`target_os = "none"`) the crate is `no_std` and switches contexts with the
//! RISC-V `swtch` routine. On a host OS every kernel thread of execution is an OS thread, which is
//! what the tests run on.

#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

#[macro_use]
pub mod printf;
#[macro_use]
pub mod error;
pub mod arch;
pub mod cpu;
pub mod kstack;
pub mod param;
pub mod platform;
pub mod proc;
pub mod sleeplock;
pub mod spinlock;
pub mod sync;
pub mod syscall;
pub mod sysproc;

/// Panic entry point for the kernel binary.
#[cfg(target_os = "none")]
pub fn panic_handler(info: &core::panic::PanicInfo<'_>) -> ! {
    printf::handle_panic(info)
}
