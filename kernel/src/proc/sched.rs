use core::sync::atomic::Ordering;

use super::{Kernel, Proc, ProcInner, ProcState};
use crate::arch::{interrupts, swtch, wait_for_interrupt};
use crate::cpu::current_cpu;
use crate::platform::Platform;
use crate::spinlock::SpinLockGuard;

impl<P: Platform> Kernel<P> {
    /// Per-CPU process scheduler.
    /// Each CPU calls `scheduler` after setting itself up.
    /// Scheduler never returns. It loops, doing:
    ///     - choose a process to run.
    ///     - swtch to start running that process.
    ///     - eventually that process transfers control via swtch back to the scheduler.
    ///
    /// # Safety
    /// Must be called with interrupts disabled, at most once per CPU.
    pub unsafe fn scheduler(&'static self) -> ! {
        // cpu does not change throughout the lifetime of the scheduler
        let cpu = unsafe { current_cpu() };

        cpu.proc.take();
        cpu.kernel = self as *const Self as *const ();

        loop {
            // The most recent process to run may have had interrupts turned off; enable them to
            // avoid a deadlock if all processes are waiting. Then, turn them off to avoid possible
            // race between an interrupt and wfi.
            interrupts::enable();
            interrupts::disable();

            let mut found = false;

            for proc in self.procs.iter() {
                let mut inner = proc.inner.lock();

                if inner.state == ProcState::Runnable {
                    // Switch to chosen process. It is the process's job to release its lock and
                    // then reacquire it before jumping back to us.
                    inner.state = ProcState::Running;
                    cpu.proc.replace(proc.id);
                    unsafe { swtch(&mut cpu.context, &proc.data().context) };

                    // Process is done running for now.
                    // It should have changed its state before coming back.
                    cpu.proc.take();
                    found = true;
                }
            }

            if !found {
                // nothing to run; stop running on this core until an interrupt.
                wait_for_interrupt();
            }
        }
    }

    /// Switch to scheduler.
    ///
    /// Must hold only `proc.inner` lock and have changed `proc.inner.state`.
    ///
    /// Saves and restores `interrupts_enabled` because `interrupts_enabled` is a property of this
    /// kernel thread, not this CPU.
    pub fn sched<'a>(
        &self,
        proc: &Proc<P>,
        proc_inner: SpinLockGuard<'a, ProcInner>,
    ) -> SpinLockGuard<'a, ProcInner> {
        assert!(proc_inner.is_lock(&proc.inner), "sched p->lock");

        let cpu = unsafe { current_cpu() };

        // make sure that interrupts are disabled and there are no nested locks.
        assert_eq!(cpu.num_off, 1, "sched locks");
        // make sure the process is not running before switch.
        assert_ne!(proc_inner.state, ProcState::Running, "sched running");

        // make sure that interrupts are disabled in the hardware.
        // this is to verify the software check done with num_off.
        assert!(!interrupts::get(), "sched interruptible");

        let interrupts_enabled = cpu.interrupts_enabled;

        // The lock stays held across the switch, but it is released and retaken by the scheduler,
        // so no guard lives in this frame meanwhile.
        let lock = SpinLockGuard::leak(proc_inner);

        // # Safety: we are the current proc, nobody else switches to our context
        let context = unsafe { &mut proc.data_mut().context };
        unsafe { swtch(context, &cpu.context) };

        // get current cpu again since the process may have been moved to a different cpu.
        let cpu = unsafe { current_cpu() };
        cpu.interrupts_enabled = interrupts_enabled;

        // # Safety: the scheduler that switched back here holds the lock for us
        unsafe { lock.assume_locked() }
    }

    /// Gives up the CPU for one scheduling round.
    pub fn r#yield(&self) {
        let proc = self.current_proc();

        // proc lock will be held until after the call to the sched.
        let mut inner = proc.inner.lock();
        inner.state = ProcState::Runnable;

        let _inner = self.sched(proc, inner);
    }
}

/// Entry point for a newly allocated process.
///
/// Not called directly: `alloc_proc` makes it the first thing the process's context runs, with the
/// process lock still held by the scheduler that switched here.
pub(super) extern "C-unwind" fn fork_ret<P: Platform>() {
    // # Safety: only `Kernel<P>::alloc_proc` prepares contexts that start here, and their
    // processes are run by schedulers of that same kernel.
    let kernel = unsafe { Kernel::<P>::current() };
    let proc = kernel.current_proc();

    // Still holding process lock from scheduler.
    unsafe { proc.inner.force_unlock() };

    // This is atomic since multiple CPUs could schedule their first process simultaneously.
    if kernel
        .first
        .compare_exchange(true, false, Ordering::Acquire, Ordering::Relaxed)
        .is_ok()
    {
        // e.g. file system initialization must be run in the context of a regular process
        // (because it calls sleep), and thus cannot be run from the boot path.
        kernel.platform.first_run();
    }

    // return to user space, mimicking `usertrap()`'s return
    P::user_return(kernel)
}
