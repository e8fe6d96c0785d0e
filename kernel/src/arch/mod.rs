//! Hart-level primitives: the interrupt-enable flag, hart identity, and the context switch.
//!
//! Nothing in here looks at process state. `swtch` saves the caller's registers into `old`,
//! restores `new`, and returns only when some other context switches back to `old`.

#[cfg(all(target_os = "none", not(target_arch = "riscv64")))]
compile_error!("bare metal builds only support riscv64");

#[cfg(target_os = "none")]
mod riscv;
#[cfg(target_os = "none")]
pub use riscv::{Context, cpu_table, hart_id, interrupts, swtch, wait_for_interrupt};

#[cfg(not(target_os = "none"))]
pub mod hosted;
#[cfg(not(target_os = "none"))]
pub use hosted::{Context, cpu_table, hart_id, interrupts, swtch, wait_for_interrupt};
