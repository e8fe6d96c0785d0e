use core::sync::atomic::{AtomicUsize, Ordering};

use bytemuck::allocation::try_zeroed_box;

use super::sched::fork_ret;
use super::{Kernel, Pid, Proc, ProcInner, ProcState, TrapFrame};
use crate::error::KernelError;
use crate::param::NPROC;
use crate::platform::Platform;
use crate::spinlock::{SpinLock, SpinLockGuard};

/// Table of processes
pub struct ProcTable<P: Platform> {
    table: [Proc<P>; NPROC],
    // instead of having a global mutex and individual parent fields on each proc, combining all
    // parents to one array guarded by a mutex is better.
    // parents[child.id] == Some(parent.id)
    pub parents: SpinLock<[Option<usize>; NPROC]>,
    next_pid: AtomicUsize,
}

impl<P: Platform> ProcTable<P> {
    pub fn new() -> Self {
        Self {
            table: core::array::from_fn(Proc::new),
            parents: SpinLock::new([None; NPROC], "parents"),
            next_pid: AtomicUsize::new(1),
        }
    }

    /// Returns a reference to the process at the given index.
    pub fn get(&self, index: usize) -> &Proc<P> {
        &self.table[index]
    }

    /// Returns an iterator over all processes, in table order.
    pub fn iter(&self) -> impl Iterator<Item = &Proc<P>> {
        self.table.iter()
    }

    /// Hands out the next pid. Pids only grow, so none is reused while the kernel runs.
    pub fn alloc_pid(&self) -> Pid {
        Pid(self.next_pid.fetch_add(1, Ordering::Relaxed))
    }
}

impl<P: Platform> Default for ProcTable<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Platform> Kernel<P> {
    /// Searches the process table for an `ProcState::Unused` proc.
    /// If found, initialize state required to run in the kernel, and return both proc and its
    /// inner mutex guard. The proc stays `Used` until the caller makes it runnable.
    pub fn alloc_proc(&self) -> Result<(&Proc<P>, SpinLockGuard<'_, ProcInner>), KernelError> {
        for proc in self.procs.iter() {
            let mut inner = proc.inner.lock();
            if inner.state != ProcState::Unused {
                continue;
            }

            inner.pid = self.procs.alloc_pid();
            inner.state = ProcState::Used;

            // # Safety: proc is not yet runnable, so we are the only ones with access to it
            let data = unsafe { proc.data_mut() };

            match log!(self.kstacks.alloc()) {
                Ok(kstack) => {
                    data.kstack.replace(kstack);
                }
                Err(err) => {
                    self.free_proc(proc, &mut inner);
                    return Err(err);
                }
            }

            // Allocate a trapframe page.
            match try_zeroed_box::<TrapFrame>() {
                Ok(trapframe) => {
                    data.trapframe.replace(trapframe);
                }
                Err(()) => {
                    self.free_proc(proc, &mut inner);
                    err!(KernelError::Alloc);
                }
            }

            // Allocate an empty user page table.
            match log!(self.platform.uvm_create(data.trapframe())) {
                Ok(uvm) => {
                    data.pagetable.replace(uvm);
                }
                Err(err) => {
                    self.free_proc(proc, &mut inner);
                    return Err(err);
                }
            }

            // Set up new context to start executing at fork_ret, which returns to user space.
            let stack_top = data.kstack.as_ref().map_or(0, |kstack| kstack.top());
            data.context.prepare(fork_ret::<P>, stack_top);

            return Ok((proc, inner));
        }

        Err(KernelError::OutOfProc)
    }

    /// Free the process and the data attached to it (including user pages and its kernel stack).
    ///
    /// The caller holds `proc.inner` and keeps holding it: the guard is only borrowed.
    pub fn free_proc(&self, proc: &Proc<P>, inner: &mut SpinLockGuard<'_, ProcInner>) {
        assert!(inner.is_lock(&proc.inner), "free_proc: wrong lock");

        // # Safety: we hold the lock of a proc that is not running, nobody else touches its data
        let data = unsafe { proc.data_mut() };

        data.trapframe.take();

        if let Some(uvm) = data.pagetable.take() {
            self.platform.uvm_free(uvm, data.size);
        }

        if let Some(kstack) = data.kstack.take() {
            self.kstacks.free(kstack);
        }

        data.context.zero();
        data.size = 0;
        data.name.clear();
        inner.pid = Pid(0);
        inner.channel = None;
        inner.killed = false;
        inner.xstate = 0;
        inner.state = ProcState::Unused;
    }
}
