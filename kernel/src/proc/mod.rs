//! Processes: the process table, the per-CPU scheduler, fork/exit/wait and sleep/wakeup.
//!
//! Lock order: `ProcTable::parents` before any `Proc::inner`, and never two `Proc::inner` at once.

use core::cell::UnsafeCell;
use core::fmt;
use core::sync::atomic::AtomicBool;

use alloc::boxed::Box;
use alloc::string::String;

use bytemuck::Zeroable;

use crate::arch::Context;
use crate::cpu::{current_cpu, lock_current_cpu};
use crate::kstack::{Kstack, KstackPool};
use crate::param::{MAXNAME, NOFILE};
use crate::platform::Platform;
use crate::spinlock::SpinLock;
use crate::sync::OnceLock;

mod lifecycle;
mod sched;
mod sleep;
mod table;

pub use lifecycle::INITCODE;
pub use table::ProcTable;

/// Per-process data for the trap handling code.
/// Sits in a page by itself, mapped into the user page table by `Platform::uvm_create`. The trap
/// entry saves user registers here and the return to user space restores them, so syscall
/// arguments and results travel through this frame.
#[derive(Debug, Clone, Zeroable)]
#[repr(C, align(4096))]
pub struct TrapFrame {
    /*   0 */ pub kernel_satp: usize, // kernel page table
    /*   8 */ pub kernel_sp: usize, // top of process's kernel stack
    /*  16 */ pub kernel_trap: usize, // usertrap()
    /*  24 */ pub epc: usize, // saved user program counter
    /*  32 */ pub kernel_hartid: usize, // saved kernel tp
    /*  40 */ pub ra: usize,
    /*  48 */ pub sp: usize,
    /*  56 */ pub gp: usize,
    /*  64 */ pub tp: usize,
    /*  72 */ pub t0: usize,
    /*  80 */ pub t1: usize,
    /*  88 */ pub t2: usize,
    /*  96 */ pub s0: usize,
    /* 104 */ pub s1: usize,
    /* 112 */ pub a0: usize,
    /* 120 */ pub a1: usize,
    /* 128 */ pub a2: usize,
    /* 136 */ pub a3: usize,
    /* 144 */ pub a4: usize,
    /* 152 */ pub a5: usize,
    /* 160 */ pub a6: usize,
    /* 168 */ pub a7: usize,
    /* 176 */ pub s2: usize,
    /* 184 */ pub s3: usize,
    /* 192 */ pub s4: usize,
    /* 200 */ pub s5: usize,
    /* 208 */ pub s6: usize,
    /* 216 */ pub s7: usize,
    /* 224 */ pub s8: usize,
    /* 232 */ pub s9: usize,
    /* 240 */ pub s10: usize,
    /* 248 */ pub s11: usize,
    /* 256 */ pub t3: usize,
    /* 264 */ pub t4: usize,
    /* 272 */ pub t5: usize,
    /* 280 */ pub t6: usize,
}

/// Process ID, unique among live processes.
/// Handed out by `ProcTable::alloc_pid`; `Pid(0)` marks an unused slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Pid(usize);

impl Pid {
    /// Creates a PID from a usize, e.g. a `kill` argument.
    /// No process needs to have it.
    pub const fn from_usize(value: usize) -> Self {
        Pid(value)
    }
}

impl core::ops::Deref for Pid {
    type Target = usize;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Channel type for `sleep`/`wakeup`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// `proc.id` for `wait()` / `exit()`.
    Proc(usize),
    /// System ticks
    Ticks,
    /// I/O buffer
    Buffer(usize),
    /// Lock
    Lock(usize),
    /// Log
    Log,
    /// Read end of pipe.
    PipeRead(usize),
    /// Write end of pipe.
    PipeWrite(usize),
}

/// The state of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcState {
    #[default]
    Unused,
    /// Allocated, still being set up by the allocating caller.
    Used,
    Sleeping,
    Runnable,
    Running,
    Zombie,
}

/// Public fields for Proc
///
/// Process lock must be held when accessing these.
#[derive(Debug, Default)]
pub struct ProcInner {
    /// Process state
    pub state: ProcState,
    /// If Some, sleeping on chan
    pub channel: Option<Channel>,
    /// If true, have been killed
    pub killed: bool,
    /// Exit status to be returned to parent's wait
    pub xstate: i32,
    /// Process ID
    pub pid: Pid,
}

impl ProcInner {
    const fn new() -> Self {
        Self {
            state: ProcState::Unused,
            channel: None,
            killed: false,
            xstate: 0,
            pid: Pid(0),
        }
    }
}

/// Private fields for Proc
pub struct ProcData<P: Platform> {
    /// Kernel stack, owned from allocation until `free_proc`
    pub kstack: Option<Kstack>,
    /// Size of process memory (bytes)
    pub size: usize,
    /// User address space
    pub pagetable: Option<P::Uvm>,
    /// Saved user registers
    pub trapframe: Option<Box<TrapFrame>>,
    /// swtch() here to run process
    pub context: Context,
    /// Open files
    pub open_files: [Option<P::File>; NOFILE],
    /// Current directory
    pub cwd: Option<P::Inode>,
    /// Process name
    pub name: String,
}

impl<P: Platform> ProcData<P> {
    fn new() -> Self {
        Self {
            kstack: None,
            size: 0,
            pagetable: None,
            trapframe: None,
            context: Context::new(),
            open_files: [const { None }; NOFILE],
            cwd: None,
            name: String::new(),
        }
    }

    /// Returns a reference to the trapframe.
    pub fn trapframe(&self) -> &TrapFrame {
        self.trapframe.as_ref().expect("proc has no trapframe")
    }

    /// Returns a mutable reference to the trapframe.
    pub fn trapframe_mut(&mut self) -> &mut TrapFrame {
        self.trapframe.as_mut().expect("proc has no trapframe")
    }

    /// Returns a mutable reference to the user address space.
    pub fn pagetable_mut(&mut self) -> &mut P::Uvm {
        self.pagetable.as_mut().expect("proc has no pagetable")
    }

    /// Sets the name shown by `dump`, cut to `MAXNAME - 1` characters.
    pub fn set_name(&mut self, name: &str) {
        self.name.clear();
        self.name.extend(name.chars().take(MAXNAME - 1));
    }
}

/// Process control block
pub struct Proc<P: Platform> {
    /// NOT `Pid`. Used for indexing in `ProcTable` and matching parent-child relationships.
    pub id: usize,
    pub inner: SpinLock<ProcInner>,
    data: UnsafeCell<ProcData<P>>,
}

impl<P: Platform> Proc<P> {
    fn new(id: usize) -> Self {
        Self {
            id,
            inner: SpinLock::new(ProcInner::new(), "proc"),
            data: UnsafeCell::new(ProcData::new()),
        }
    }

    pub fn data(&self) -> &ProcData<P> {
        unsafe { &*self.data.get() }
    }

    /// Returns a mutable reference to the process's data.
    ///
    /// # Safety
    /// The caller must ensure they have exclusive access to the `Proc`. This is true if either
    ///     1. it's the current proc (most cases) or
    ///     2. the proc's state hasn't been set to Runnable/Sleeping yet (fork, alloc_proc) or
    ///     3. the proc is a zombie whose lock the caller holds (wait).
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn data_mut(&self) -> &mut ProcData<P> {
        unsafe { &mut *self.data.get() }
    }

    /// Returns true if this process has been killed.
    ///
    /// Acquires and releases the proc lock.
    pub fn is_killed(&self) -> bool {
        self.inner.lock().killed
    }

    /// Marks this process as killed.
    ///
    /// Acquires and releases the proc lock.
    pub fn set_killed(&self) {
        self.inner.lock().killed = true;
    }
}

unsafe impl<P: Platform> Sync for Proc<P> {}

/// One kernel instance: its external collaborators, process table and kernel stacks.
///
/// CPUs join by calling [`Kernel::scheduler`]; the instance must outlive them, so it is usually
/// leaked into a `&'static`.
pub struct Kernel<P: Platform> {
    platform: P,
    procs: ProcTable<P>,
    kstacks: KstackPool,
    init_proc: OnceLock<usize>,
    /// Set until the first scheduled process has run `Platform::first_run`.
    first: AtomicBool,
}

impl<P: Platform> Kernel<P> {
    pub fn new(platform: P, kstacks: KstackPool) -> Self {
        Self {
            platform,
            procs: ProcTable::new(),
            kstacks,
            init_proc: OnceLock::new(),
            first: AtomicBool::new(true),
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn procs(&self) -> &ProcTable<P> {
        &self.procs
    }

    pub fn kstacks(&self) -> &KstackPool {
        &self.kstacks
    }

    /// Returns true if `proc` is the init process.
    pub fn is_init_proc(&self, proc: &Proc<P>) -> bool {
        self.init_proc.get() == Some(&proc.id)
    }

    /// Returns the kernel whose scheduler runs on this CPU.
    ///
    /// # Safety
    /// The scheduler of this CPU must have been started from a `Kernel<P>` of the same `P`.
    pub(crate) unsafe fn current() -> &'static Self {
        let _lock = lock_current_cpu();
        let kernel = unsafe { current_cpu() }.kernel as *const Self;
        assert!(!kernel.is_null(), "no kernel on this cpu");
        unsafe { &*kernel }
    }

    /// Returns a reference to this CPU's [`Proc`].
    pub fn current_proc_opt(&self) -> Option<&Proc<P>> {
        let _lock = lock_current_cpu();

        let cpu = unsafe { current_cpu() };
        cpu.proc.map(|id| self.procs.get(id))
    }

    /// Returns a reference to this CPU's [`Proc`].
    /// It unwraps the option and panics if there is no current process.
    pub fn current_proc(&self) -> &Proc<P> {
        self.current_proc_opt().expect("no current process")
    }

    /// Prints a process listing to the console.
    ///
    /// # Safety
    /// For debugging only, it does not lock to avoid creating more problems, so the listing may be
    /// torn while other CPUs run.
    pub unsafe fn dump(&self) {
        println!("");
        let mut console = crate::printf::Console;
        let _ = unsafe { self.dump_to(&mut console) };
    }

    /// Writes `pid state name` for every slot in use, one per line.
    ///
    /// # Safety
    /// Same as [`Kernel::dump`].
    pub unsafe fn dump_to(&self, out: &mut impl fmt::Write) -> fmt::Result {
        for proc in self.procs.iter() {
            let inner = unsafe { proc.inner.get_mut_unchecked() };
            if inner.state == ProcState::Unused {
                continue;
            }

            writeln!(out, "{} {:?} {}", inner.pid, inner.state, proc.data().name)?;
        }
        Ok(())
    }
}
